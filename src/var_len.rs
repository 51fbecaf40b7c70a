//! Variable-length unsigned integer framing: a big-endian value with a
//! length prefix packed into the high bits of the first byte.
//!
//! ```text
//! 0xxxxxxx                                  1 byte,  7 value bits
//! 10xxxxxx xxxxxxxx                         2 bytes, 14 value bits
//! 110xxxxx xxxxxxxx xxxxxxxx xxxxxxxx        4 bytes, 29 value bits
//! 1110xxxx ...three more bytes...            8 bytes, 60 value bits
//! 1111xxxx                                  illegal
//! ```
//!
//! The encoder always picks the narrowest width that fits; the decoder
//! tolerates non-minimal encodings (e.g. a 2-byte encoding of zero).

use crate::error::{bail, Error, ErrorKind, Result};
use std::io::{Read, Write};

pub const MAX_VALUE: u64 = (1 << 60) - 1;

pub fn write_varint<W: Write>(write: &mut W, val: u64) -> Result<()> {
    if val < 0x80 {
        write.write_all(&[val as u8])?;
    } else if val < 0x4000 {
        let word = (val as u16) | 0x8000;
        write.write_all(&word.to_be_bytes())?;
    } else if val < 0x2000_0000 {
        let word = (val as u32) | 0xC000_0000;
        write.write_all(&word.to_be_bytes())?;
    } else if val <= MAX_VALUE {
        let word = val | 0xE000_0000_0000_0000;
        write.write_all(&word.to_be_bytes())?;
    } else {
        bail!(ValueOutOfRange, "{} exceeds the varint range of 0..=2^60-1", val);
    }
    Ok(())
}

pub fn read_varint<R: Read>(read: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    read.read_exact(&mut buf[..1])?;
    let first = buf[0];
    if first & 0x80 == 0 {
        Ok(first as u64)
    } else if first & 0xC0 == 0x80 {
        read.read_exact(&mut buf[1..2])?;
        Ok((((first & 0x3F) as u64) << 8) | buf[1] as u64)
    } else if first & 0xE0 == 0xC0 {
        read.read_exact(&mut buf[1..4])?;
        let mut n = (first & 0x1F) as u64;
        for &b in &buf[1..4] {
            n = (n << 8) | b as u64;
        }
        Ok(n)
    } else if first & 0xF0 == 0xE0 {
        read.read_exact(&mut buf[1..8])?;
        let mut n = (first & 0x0F) as u64;
        for &b in &buf[1..8] {
            n = (n << 8) | b as u64;
        }
        Ok(n)
    } else {
        Err(Error::new(
            ErrorKind::InvalidVarInt,
            format!("first byte 0x{:02X} has illegal 1111xxxx pattern", first),
        ))
    }
}

/// Reads a varint, distinguishing "nothing was read" (true end of stream,
/// reported via `Ok(None)`) from a truncation that occurs after at least one
/// byte has been consumed (a genuine parse failure).
pub fn read_varint_eof_ok<R: Read>(read: &mut R) -> Result<Option<u64>> {
    let mut first = [0u8; 1];
    match read.read(&mut first) {
        Ok(0) => return Ok(None),
        Ok(_) => {}
        Err(e) => return Err(e.into()),
    }
    read_varint_continue(read, first[0]).map(Some)
}

pub(crate) fn read_varint_continue<R: Read>(read: &mut R, first: u8) -> Result<u64> {
    let mut buf = [0u8; 7];
    if first & 0x80 == 0 {
        Ok(first as u64)
    } else if first & 0xC0 == 0x80 {
        read.read_exact(&mut buf[..1])?;
        Ok((((first & 0x3F) as u64) << 8) | buf[0] as u64)
    } else if first & 0xE0 == 0xC0 {
        read.read_exact(&mut buf[..3])?;
        let mut n = (first & 0x1F) as u64;
        for &b in &buf[..3] {
            n = (n << 8) | b as u64;
        }
        Ok(n)
    } else if first & 0xF0 == 0xE0 {
        read.read_exact(&mut buf[..7])?;
        let mut n = (first & 0x0F) as u64;
        for &b in &buf[..7] {
            n = (n << 8) | b as u64;
        }
        Ok(n)
    } else {
        Err(Error::new(
            ErrorKind::InvalidVarInt,
            format!("first byte 0x{:02X} has illegal 1111xxxx pattern", first),
        ))
    }
}

#[test]
fn test_boundary_table() {
    let cases: &[(u64, &[u8])] = &[
        (0x00, &[0x00]),
        (0x7F, &[0x7F]),
        (0x80, &[0x80, 0x80]),
        (0x3FFF, &[0xBF, 0xFF]),
        (0x4000, &[0xC0, 0x00, 0x40, 0x00]),
        (0x1FFF_FFFF, &[0xDF, 0xFF, 0xFF, 0xFF]),
        (0x2000_0000, &[0xE0, 0x00, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00]),
        (
            0x0FFF_FFFF_FFFF_FFFF,
            &[0xEF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
        ),
    ];
    for &(val, bytes) in cases {
        let mut buf = Vec::new();
        write_varint(&mut buf, val).unwrap();
        assert_eq!(buf, bytes, "encoding of {:#x}", val);
        let decoded = read_varint(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, val);
    }
}

#[test]
fn test_out_of_range() {
    let mut buf = Vec::new();
    let err = write_varint(&mut buf, 0x1000_0000_0000_0000).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ValueOutOfRange);
}

#[test]
fn test_illegal_first_byte() {
    let err = read_varint(&mut &[0xF0u8][..]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidVarInt);
}

#[test]
fn test_non_minimal_tolerant() {
    let decoded = read_varint(&mut &[0x80u8, 0x00][..]).unwrap();
    assert_eq!(decoded, 0);
}

#[test]
fn test_round_trip_sweep() {
    let mut buf = Vec::new();
    for val in (0..1 << 16).chain((0..1 << 16).map(|n| n << 44)) {
        buf.clear();
        write_varint(&mut buf, val).unwrap();
        let decoded = read_varint(&mut buf.as_slice()).unwrap();
        assert_eq!(decoded, val);
    }
}
