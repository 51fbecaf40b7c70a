//! A self-describing, schema-assisted binary wire format.
//!
//! Values are expressed as [`Value`], a dynamic tree shaped around this
//! format's kinds (sentinels, bools, arbitrary-precision integers, bytes,
//! text, floats, decimals, timestamps, sequences/tuples/sets, maps, and
//! named records) rather than any particular host language's type system.
//! A [`Schema`] binds each kind — and each caller-defined record type — to a
//! control code on the wire; [`EncoderContext`]/[`DecoderContext`] stream
//! values through a `Write`/`Read` pair, declaring record types inline the
//! first time they're used and eliding repeated large values as
//! back-references to an earlier position in the same stream.
//!
//! ```no_run
//! use wireflow::{Schema, Value};
//!
//! let schema = Schema::with_builtins();
//! let mut buf = Vec::new();
//! schema.encoder(&mut buf).encode_object(&Value::text("hello")).unwrap();
//! let mut slice = &buf[..];
//! let value = schema.decoder(&mut slice).decode_object().unwrap();
//! assert_eq!(value, Value::text("hello"));
//! ```
//!
//! A schema is forked (cheaply — a shallow copy of its maps) per caller that
//! wants to grow it with its own record types, so registering a type on one
//! fork never disturbs another, or a context already streaming from the
//! parent.

pub mod codec;
pub mod error;
mod schema;
mod value;

mod decoder;
mod encoder;
mod var_len;

pub use codec::{Codec, IntWidth, Selected, Sign, TextForm, TimeForm, VariantKey};
pub use decoder::DecoderContext;
pub use encoder::EncoderContext;
pub use error::{Error, ErrorKind, Result};
pub use schema::{FieldAttr, RecordDefinition, RecordField, Schema};
pub use value::{HostType, RecordInstance, RecordTag, Timestamp, Value};
