//! The per-kind codec contract (§4.2): each kind implements `variants`,
//! `select_variant` and the payload read/write pair that plugs into the
//! encoder/decoder contexts. Built-in kinds are plain structs; a user kind
//! just needs to implement [`Codec`] and gets registered the same way.

use crate::decoder::DecoderContext;
use crate::encoder::EncoderContext;
use crate::error::{bail, error, Result};
use crate::schema::RecordDefinition;
use crate::value::{RecordInstance, Timestamp, Value};
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use num_bigint::BigUint;
use num_traits::{Signed, Zero};
use std::str::FromStr;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum VariantKey {
    Unit,
    Bool(bool),
    IntWidth(IntWidth),
    TextForm(TextForm),
    Sign(Sign),
    TimeForm(TimeForm),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum IntWidth {
    W1,
    W2,
    W4,
    W8,
    Big,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TextForm {
    Empty,
    One,
    Long,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Sign {
    Pos,
    Neg,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TimeForm {
    Iso,
    Iana,
}

/// What `select_variant` hands back: which variant to use, and whether this
/// value may be elided as a back-reference on a repeat occurrence.
pub struct Selected {
    pub variant: VariantKey,
    pub back_referable: bool,
}

pub trait Codec: Send + Sync + std::fmt::Debug {
    fn variants(&self) -> Vec<VariantKey>;
    fn select_variant(&self, value: &Value) -> Result<Selected>;
    fn write_payload(&self, value: &Value, variant: &VariantKey, enc: &mut EncoderContext) -> Result<()>;
    fn decode_payload(&self, variant: &VariantKey, dec: &mut DecoderContext) -> Result<Value>;
}

macro_rules! mismatch {
    ($value:expr) => {
        bail!(UnknownType, "codec received a value of the wrong shape: {:?}", $value)
    };
}

#[derive(Debug)]
pub struct SentinelCodec(pub Value);

impl Codec for SentinelCodec {
    fn variants(&self) -> Vec<VariantKey> {
        vec![VariantKey::Unit]
    }

    fn select_variant(&self, _value: &Value) -> Result<Selected> {
        Ok(Selected { variant: VariantKey::Unit, back_referable: false })
    }

    fn write_payload(&self, _value: &Value, _variant: &VariantKey, _enc: &mut EncoderContext) -> Result<()> {
        Ok(())
    }

    fn decode_payload(&self, _variant: &VariantKey, _dec: &mut DecoderContext) -> Result<Value> {
        Ok(self.0.clone())
    }
}

#[derive(Debug)]
pub struct BoolCodec;

impl Codec for BoolCodec {
    fn variants(&self) -> Vec<VariantKey> {
        vec![VariantKey::Bool(false), VariantKey::Bool(true)]
    }

    fn select_variant(&self, value: &Value) -> Result<Selected> {
        match value {
            Value::Bool(b) => Ok(Selected { variant: VariantKey::Bool(*b), back_referable: false }),
            _ => mismatch!(value),
        }
    }

    fn write_payload(&self, _value: &Value, _variant: &VariantKey, _enc: &mut EncoderContext) -> Result<()> {
        Ok(())
    }

    fn decode_payload(&self, variant: &VariantKey, _dec: &mut DecoderContext) -> Result<Value> {
        match variant {
            VariantKey::Bool(b) => Ok(Value::Bool(*b)),
            _ => bail!(UnknownType, "bool codec got a non-bool variant key"),
        }
    }
}

/// `u8`/`u16`/`u32`/`u64` fixed-width variants hold that many big-endian
/// bytes; `big` is a varint length followed by that many big-endian bytes.
/// The encoder always picks the narrowest width the value fits in.
#[derive(Debug)]
pub struct IntCodec;

fn int_byte_len(n: &BigUint) -> usize {
    ((n.bits() as usize) + 7) / 8
}

impl Codec for IntCodec {
    fn variants(&self) -> Vec<VariantKey> {
        use IntWidth::*;
        vec![W1, W2, W4, W8, Big].into_iter().map(VariantKey::IntWidth).collect()
    }

    fn select_variant(&self, value: &Value) -> Result<Selected> {
        let n = match value {
            Value::Int(n) => n,
            _ => mismatch!(value),
        };
        let width = match int_byte_len(n) {
            0 | 1 => IntWidth::W1,
            2 => IntWidth::W2,
            3 | 4 => IntWidth::W4,
            5..=8 => IntWidth::W8,
            _ => IntWidth::Big,
        };
        Ok(Selected { variant: VariantKey::IntWidth(width), back_referable: width == IntWidth::Big })
    }

    fn write_payload(&self, value: &Value, variant: &VariantKey, enc: &mut EncoderContext) -> Result<()> {
        let n = match value {
            Value::Int(n) => n,
            _ => mismatch!(value),
        };
        let width = match variant {
            VariantKey::IntWidth(w) => *w,
            _ => bail!(UnknownType, "int codec got a non-int variant key"),
        };
        let be = n.to_bytes_be();
        match width {
            IntWidth::Big => {
                enc.encode_varint(be.len() as u64)?;
                enc.write(&be)
            }
            fixed => {
                let width = match fixed {
                    IntWidth::W1 => 1,
                    IntWidth::W2 => 2,
                    IntWidth::W4 => 4,
                    IntWidth::W8 => 8,
                    IntWidth::Big => unreachable!(),
                };
                let mut buf = vec![0u8; width];
                buf[width - be.len()..].copy_from_slice(&be);
                enc.write(&buf)
            }
        }
    }

    fn decode_payload(&self, variant: &VariantKey, dec: &mut DecoderContext) -> Result<Value> {
        let width = match variant {
            VariantKey::IntWidth(w) => *w,
            _ => bail!(UnknownType, "int codec got a non-int variant key"),
        };
        let n = match width {
            IntWidth::W1 => BigUint::from_bytes_be(&dec.read(1)?),
            IntWidth::W2 => BigUint::from_bytes_be(&dec.read(2)?),
            IntWidth::W4 => BigUint::from_bytes_be(&dec.read(4)?),
            IntWidth::W8 => BigUint::from_bytes_be(&dec.read(8)?),
            IntWidth::Big => {
                let len = dec.decode_varint()? as usize;
                BigUint::from_bytes_be(&dec.read(len)?)
            }
        };
        Ok(Value::Int(Arc::new(n)))
    }
}

#[derive(Debug)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    fn variants(&self) -> Vec<VariantKey> {
        vec![VariantKey::Unit]
    }

    fn select_variant(&self, value: &Value) -> Result<Selected> {
        match value {
            Value::Bytes(_) => Ok(Selected { variant: VariantKey::Unit, back_referable: true }),
            _ => mismatch!(value),
        }
    }

    fn write_payload(&self, value: &Value, _variant: &VariantKey, enc: &mut EncoderContext) -> Result<()> {
        let b = match value {
            Value::Bytes(b) => b,
            _ => mismatch!(value),
        };
        enc.encode_varint(b.len() as u64)?;
        enc.write(b)
    }

    fn decode_payload(&self, _variant: &VariantKey, dec: &mut DecoderContext) -> Result<Value> {
        let len = dec.decode_varint()? as usize;
        Ok(Value::bytes(dec.read(len)?))
    }
}

/// Empty and single-codepoint strings are inlined with no length prefix (the
/// codepoint's own UTF-8 lead byte tells the decoder how many bytes follow);
/// everything else is length-prefixed and back-referable.
#[derive(Debug)]
pub struct TextCodec;

fn utf8_lead_len(byte: u8) -> Result<usize> {
    if byte & 0x80 == 0 {
        Ok(1)
    } else if byte & 0xE0 == 0xC0 {
        Ok(2)
    } else if byte & 0xF0 == 0xE0 {
        Ok(3)
    } else if byte & 0xF8 == 0xF0 {
        Ok(4)
    } else {
        bail!(MalformedData, "invalid UTF-8 lead byte 0x{:02X}", byte)
    }
}

impl Codec for TextCodec {
    fn variants(&self) -> Vec<VariantKey> {
        vec![TextForm::Empty, TextForm::One, TextForm::Long].into_iter().map(VariantKey::TextForm).collect()
    }

    fn select_variant(&self, value: &Value) -> Result<Selected> {
        let s = match value {
            Value::Text(s) => s,
            _ => mismatch!(value),
        };
        let mut chars = s.chars();
        let form = match (chars.next(), chars.next()) {
            (None, _) => TextForm::Empty,
            (Some(_), None) => TextForm::One,
            _ => TextForm::Long,
        };
        Ok(Selected { variant: VariantKey::TextForm(form), back_referable: form == TextForm::Long })
    }

    fn write_payload(&self, value: &Value, variant: &VariantKey, enc: &mut EncoderContext) -> Result<()> {
        let s = match value {
            Value::Text(s) => s,
            _ => mismatch!(value),
        };
        match variant {
            VariantKey::TextForm(TextForm::Empty) => Ok(()),
            VariantKey::TextForm(TextForm::One) => enc.write(s.as_bytes()),
            VariantKey::TextForm(TextForm::Long) => {
                enc.encode_varint(s.len() as u64)?;
                enc.write(s.as_bytes())
            }
            _ => bail!(UnknownType, "text codec got a non-text variant key"),
        }
    }

    fn decode_payload(&self, variant: &VariantKey, dec: &mut DecoderContext) -> Result<Value> {
        match variant {
            VariantKey::TextForm(TextForm::Empty) => Ok(Value::text("")),
            VariantKey::TextForm(TextForm::One) => {
                let lead = dec.read(1)?;
                let extra = utf8_lead_len(lead[0])? - 1;
                let mut bytes = lead;
                bytes.extend(dec.read(extra)?);
                let s = String::from_utf8(bytes)
                    .map_err(|_| error!(MalformedData, "non UTF-8 single-character text"))?;
                Ok(Value::text(s))
            }
            VariantKey::TextForm(TextForm::Long) => {
                let len = dec.decode_varint()? as usize;
                let bytes = dec.read(len)?;
                let s = String::from_utf8(bytes).map_err(|_| error!(MalformedData, "non UTF-8 text"))?;
                Ok(Value::text(s))
            }
            _ => bail!(UnknownType, "text codec got a non-text variant key"),
        }
    }
}

/// IEEE-754 double, pinned to big-endian so the stream has one consistent
/// byte order for every fixed-width field.
#[derive(Debug)]
pub struct FloatCodec;

impl Codec for FloatCodec {
    fn variants(&self) -> Vec<VariantKey> {
        vec![VariantKey::Unit]
    }

    fn select_variant(&self, value: &Value) -> Result<Selected> {
        match value {
            Value::Float(_) => Ok(Selected { variant: VariantKey::Unit, back_referable: true }),
            _ => mismatch!(value),
        }
    }

    fn write_payload(&self, value: &Value, _variant: &VariantKey, enc: &mut EncoderContext) -> Result<()> {
        let f = match value {
            Value::Float(f) => **f,
            _ => mismatch!(value),
        };
        enc.write(&f.to_be_bytes())
    }

    fn decode_payload(&self, _variant: &VariantKey, dec: &mut DecoderContext) -> Result<Value> {
        let bytes = dec.read(8)?;
        let arr: [u8; 8] = bytes.try_into().unwrap();
        Ok(Value::Float(Arc::new(f64::from_be_bytes(arr))))
    }
}

const DECIMAL_PAD: u8 = 0x0F;

fn nibble_of(ch: char) -> Result<u8> {
    match ch {
        '0'..='9' => Ok((ch as u8 - b'0') + 1),
        '.' => Ok(11),
        _ => bail!(DecimalCorruption, "illegal decimal digit character {:?}", ch),
    }
}

fn char_of(nibble: u8) -> Result<char> {
    match nibble {
        1..=10 => Ok((b'0' + (nibble - 1)) as char),
        11 => Ok('.'),
        _ => bail!(DecimalCorruption, "illegal decimal nibble 0x{:X}", nibble),
    }
}

/// Digits are packed two per byte, high nibble first, with `0x0F` padding
/// the low nibble of the final byte when the digit count is odd.
#[derive(Debug)]
pub struct DecimalCodec;

impl Codec for DecimalCodec {
    fn variants(&self) -> Vec<VariantKey> {
        vec![VariantKey::Sign(Sign::Pos), VariantKey::Sign(Sign::Neg)]
    }

    fn select_variant(&self, value: &Value) -> Result<Selected> {
        let d = match value {
            Value::Decimal(d) => d,
            _ => mismatch!(value),
        };
        let sign = if d.is_negative() { Sign::Neg } else { Sign::Pos };
        Ok(Selected { variant: VariantKey::Sign(sign), back_referable: false })
    }

    fn write_payload(&self, value: &Value, _variant: &VariantKey, enc: &mut EncoderContext) -> Result<()> {
        let d = match value {
            Value::Decimal(d) => d,
            _ => mismatch!(value),
        };
        let digits = d.abs().to_string();
        enc.encode_varint(digits.len() as u64)?;
        let chars: Vec<char> = digits.chars().collect();
        let mut packed = Vec::with_capacity((chars.len() + 1) / 2);
        let mut iter = chars.chunks(2);
        for pair in &mut iter {
            let hi = nibble_of(pair[0])?;
            let lo = if pair.len() == 2 { nibble_of(pair[1])? } else { DECIMAL_PAD };
            packed.push((hi << 4) | lo);
        }
        enc.write(&packed)
    }

    fn decode_payload(&self, variant: &VariantKey, dec: &mut DecoderContext) -> Result<Value> {
        let sign = match variant {
            VariantKey::Sign(s) => *s,
            _ => bail!(UnknownType, "decimal codec got a non-sign variant key"),
        };
        let n = dec.decode_varint()? as usize;
        let byte_len = (n + 1) / 2;
        let bytes = dec.read(byte_len)?;
        let mut digits = String::with_capacity(n);
        for (i, &byte) in bytes.iter().enumerate() {
            let hi = char_of(byte >> 4)?;
            digits.push(hi);
            let is_last_half_nibble = i == bytes.len() - 1 && n % 2 == 1;
            if is_last_half_nibble {
                if byte & 0x0F != DECIMAL_PAD {
                    bail!(DecimalCorruption, "expected padding nibble in final decimal byte");
                }
            } else {
                digits.push(char_of(byte & 0x0F)?);
            }
        }
        let magnitude = BigDecimal::from_str(&digits)
            .map_err(|e| error!(DecimalCorruption, "malformed decimal digit string {:?}: {}", digits, e))?;
        let value = if sign == Sign::Neg && !magnitude.is_zero() { -magnitude } else { magnitude };
        Ok(Value::Decimal(value))
    }
}

const ISO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

#[derive(Debug)]
pub struct TimestampCodec;

impl Codec for TimestampCodec {
    fn variants(&self) -> Vec<VariantKey> {
        vec![VariantKey::TimeForm(TimeForm::Iso), VariantKey::TimeForm(TimeForm::Iana)]
    }

    fn select_variant(&self, value: &Value) -> Result<Selected> {
        let ts = match value {
            Value::Timestamp(ts) => ts,
            _ => mismatch!(value),
        };
        let form = match **ts {
            Timestamp::Fixed(_) => TimeForm::Iso,
            Timestamp::Zoned(_) => TimeForm::Iana,
        };
        Ok(Selected { variant: VariantKey::TimeForm(form), back_referable: true })
    }

    fn write_payload(&self, value: &Value, _variant: &VariantKey, enc: &mut EncoderContext) -> Result<()> {
        let ts = match value {
            Value::Timestamp(ts) => ts,
            _ => mismatch!(value),
        };
        match &**ts {
            Timestamp::Fixed(dt) => enc.encode_string(&dt.to_rfc3339()),
            Timestamp::Zoned(dt) => {
                let utc_wall = dt.with_timezone(&Utc).naive_utc();
                enc.encode_string(&utc_wall.format(ISO_FORMAT).to_string())?;
                enc.encode_string(dt.timezone().name())
            }
        }
    }

    fn decode_payload(&self, variant: &VariantKey, dec: &mut DecoderContext) -> Result<Value> {
        let form = match variant {
            VariantKey::TimeForm(f) => *f,
            _ => bail!(UnknownType, "timestamp codec got a non-time variant key"),
        };
        let first = dec.decode_string()?;
        match form {
            TimeForm::Iso => {
                let dt = DateTime::parse_from_rfc3339(&first)
                    .map_err(|e| error!(MalformedData, "malformed ISO-8601 timestamp {:?}: {}", first, e))?;
                Ok(Value::Timestamp(Arc::new(Timestamp::Fixed(dt))))
            }
            TimeForm::Iana => {
                let naive = NaiveDateTime::parse_from_str(&first, ISO_FORMAT)
                    .map_err(|e| error!(MalformedData, "malformed ISO-8601 wall clock {:?}: {}", first, e))?;
                let zone_name = dec.decode_string()?;
                let tz: chrono_tz::Tz = zone_name
                    .parse()
                    .map_err(|_| error!(MalformedData, "unknown IANA zone {:?}", zone_name))?;
                let dt = Utc.from_utc_datetime(&naive).with_timezone(&tz);
                Ok(Value::Timestamp(Arc::new(Timestamp::Zoned(dt))))
            }
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SeqShape {
    Ordered,
    Tuple,
    Set,
}

#[derive(Debug)]
pub struct SeqCodec(pub SeqShape);

impl Codec for SeqCodec {
    fn variants(&self) -> Vec<VariantKey> {
        vec![VariantKey::Unit]
    }

    fn select_variant(&self, value: &Value) -> Result<Selected> {
        let matches = match (self.0, value) {
            (SeqShape::Ordered, Value::Seq(_)) => true,
            (SeqShape::Tuple, Value::Tuple(_)) => true,
            (SeqShape::Set, Value::Set(_)) => true,
            _ => false,
        };
        if !matches {
            mismatch!(value);
        }
        Ok(Selected { variant: VariantKey::Unit, back_referable: true })
    }

    fn write_payload(&self, value: &Value, _variant: &VariantKey, enc: &mut EncoderContext) -> Result<()> {
        let items = match value {
            Value::Seq(items) | Value::Tuple(items) | Value::Set(items) => items,
            _ => mismatch!(value),
        };
        enc.encode_varint(items.len() as u64)?;
        for item in items.iter() {
            enc.encode_object(item)?;
        }
        Ok(())
    }

    fn decode_payload(&self, _variant: &VariantKey, dec: &mut DecoderContext) -> Result<Value> {
        let len = dec.decode_varint()? as usize;
        let mut items = Vec::with_capacity(len);
        for _ in 0..len {
            items.push(dec.decode_object()?);
        }
        Ok(match self.0 {
            SeqShape::Ordered => Value::seq(items),
            SeqShape::Tuple => Value::tuple(items),
            SeqShape::Set => Value::set(items),
        })
    }
}

#[derive(Debug)]
pub struct MapCodec;

impl Codec for MapCodec {
    fn variants(&self) -> Vec<VariantKey> {
        vec![VariantKey::Unit]
    }

    fn select_variant(&self, value: &Value) -> Result<Selected> {
        match value {
            Value::Map(_) => Ok(Selected { variant: VariantKey::Unit, back_referable: true }),
            _ => mismatch!(value),
        }
    }

    fn write_payload(&self, value: &Value, _variant: &VariantKey, enc: &mut EncoderContext) -> Result<()> {
        let pairs = match value {
            Value::Map(pairs) => pairs,
            _ => mismatch!(value),
        };
        enc.encode_varint(pairs.len() as u64)?;
        for (k, v) in pairs.iter() {
            enc.encode_object(k)?;
            enc.encode_object(v)?;
        }
        Ok(())
    }

    fn decode_payload(&self, _variant: &VariantKey, dec: &mut DecoderContext) -> Result<Value> {
        let len = dec.decode_varint()? as usize;
        let mut pairs = Vec::with_capacity(len);
        for _ in 0..len {
            let k = dec.decode_object()?;
            let v = dec.decode_object()?;
            pairs.push((k, v));
        }
        Ok(Value::map(pairs))
    }
}

/// The single variant every declared record type gets. Its variant key is
/// just the `Null` sentinel, re-encoded through the engine when the type is
/// declared, per §4.4.
pub fn record_variant_key_value() -> Value {
    Value::Null
}

#[derive(Debug)]
pub struct RecordCodec(pub Arc<RecordDefinition>);

impl Codec for RecordCodec {
    fn variants(&self) -> Vec<VariantKey> {
        vec![VariantKey::Unit]
    }

    fn select_variant(&self, value: &Value) -> Result<Selected> {
        match value {
            Value::Record(r) if r.host_type == self.0.host_type => {
                Ok(Selected { variant: VariantKey::Unit, back_referable: true })
            }
            _ => mismatch!(value),
        }
    }

    fn write_payload(&self, value: &Value, _variant: &VariantKey, enc: &mut EncoderContext) -> Result<()> {
        let r: &RecordInstance = match value {
            Value::Record(r) => r,
            _ => mismatch!(value),
        };
        for field in self.0.fields.iter() {
            let out = match &field.read_attr {
                crate::schema::FieldAttr::Skip => Value::Skip,
                crate::schema::FieldAttr::Name(name) => r
                    .fields
                    .iter()
                    .find(|(n, _)| n == name)
                    .map(|(_, v)| v.clone())
                    .unwrap_or(Value::Skip),
            };
            enc.encode_object(&out)?;
        }
        Ok(())
    }

    fn decode_payload(&self, _variant: &VariantKey, dec: &mut DecoderContext) -> Result<Value> {
        let mut out = Vec::with_capacity(self.0.fields.len());
        for field in self.0.fields.iter() {
            let v = dec.decode_object()?;
            if matches!(v, Value::Skip) {
                continue;
            }
            if let crate::schema::FieldAttr::Name(name) = &field.write_attr {
                out.push((name.clone(), v));
            }
        }
        Ok((self.0.decode_factory)(out))
    }
}
