//! Error types.
//!
//! Errors are split the same way the wire protocol is split: failures while
//! reading a stream are parse errors, failures while writing one are encoding
//! errors. Both carry an [`ErrorKind`] plus a free-form message.

use std::fmt::{self, Display, Formatter};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub struct Error {
    kind: ErrorKind,
    message: String,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ErrorKind {
    /// Underlying IO error on the sink/source.
    Io,
    /// The source ended in the middle of a value.
    UnexpectedEof,
    /// A control code was read that isn't 0, 1, or present in the decoder table.
    UnknownControlCode,
    /// The first byte of a varint had the illegal `1111xxxx` pattern.
    InvalidVarInt,
    /// A back-reference pointed at a byte offset with nothing recorded there.
    InvalidBackReference,
    /// A type declaration was read somewhere declarations aren't allowed.
    InvalidDeclarationSite,
    /// A decimal's packed nibbles didn't decode to a legal digit string.
    DecimalCorruption,
    /// A payload decoded to bytes or a string that isn't legal for its kind
    /// (non-UTF-8 text, an unparseable timestamp, an unknown IANA zone).
    MalformedData,
    /// The value being encoded has a host type the schema doesn't know.
    UnknownType,
    /// An integer (or varint) didn't fit in 2^60-1.
    ValueOutOfRange,
    /// Two registrations on the same schema collided (code or wire name).
    SchemaConflict,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Error { kind, message: message.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            Error::new(ErrorKind::UnexpectedEof, e.to_string())
        } else {
            Error::new(ErrorKind::Io, e.to_string())
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Io => "IO error",
            ErrorKind::UnexpectedEof => "unexpected end of stream",
            ErrorKind::UnknownControlCode => "unknown control code",
            ErrorKind::InvalidVarInt => "invalid varint",
            ErrorKind::InvalidBackReference => "invalid back-reference",
            ErrorKind::InvalidDeclarationSite => "declaration at invalid site",
            ErrorKind::DecimalCorruption => "corrupt decimal payload",
            ErrorKind::MalformedData => "malformed data",
            ErrorKind::UnknownType => "unknown type",
            ErrorKind::ValueOutOfRange => "value out of range",
            ErrorKind::SchemaConflict => "schema conflict",
        })
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

macro_rules! error {
    ($kind:ident, $($arg:tt)*) => {
        $crate::error::Error::new($crate::error::ErrorKind::$kind, format!($($arg)*))
    };
}

macro_rules! bail {
    ($($arg:tt)*) => {
        return Err(error!($($arg)*))
    };
}

macro_rules! ensure {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            bail!($($arg)*);
        }
    };
}

pub(crate) use bail;
pub(crate) use ensure;
pub(crate) use error;
