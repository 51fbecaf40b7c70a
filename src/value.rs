//! Dynamic representation of data within the wire's data model, analogous to
//! `serde_json::Value` but shaped around this codec's kinds rather than
//! JSON's.
//!
//! Kinds that are back-referable (see the contract in [`crate::codec`]) are
//! stored behind an [`Arc`] so that two [`Value`]s built from the same
//! `Arc::clone` share pointer identity. The encoder uses that identity, not
//! structural equality, to decide whether a repeated value can be elided as
//! a back-reference: two independently-constructed equal strings are two
//! distinct values on the wire, exactly as two independently-constructed
//! equal objects are distinct in the source implementation this format
//! comes from.

use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset};
use chrono_tz::Tz;
use num_bigint::BigUint;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    /// Marks a record field as intentionally absent.
    Skip,
    Ellipsis,
    Bool(bool),
    Int(Arc<BigUint>),
    Bytes(Arc<Vec<u8>>),
    Text(Arc<str>),
    Float(Arc<f64>),
    Decimal(BigDecimal),
    Timestamp(Arc<Timestamp>),
    /// Ordered, insertion-order-preserving sequence.
    Seq(Arc<Vec<Value>>),
    /// Heterogeneous fixed-arity sequence.
    Tuple(Arc<Vec<Value>>),
    /// Unordered sequence; wire order is whatever the caller iterated in.
    Set(Arc<Vec<Value>>),
    Map(Arc<Vec<(Value, Value)>>),
    Record(Arc<RecordInstance>),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(Arc::from(s.into()))
    }

    pub fn bytes(b: impl Into<Vec<u8>>) -> Self {
        Value::Bytes(Arc::new(b.into()))
    }

    pub fn int(n: impl Into<BigUint>) -> Self {
        Value::Int(Arc::new(n.into()))
    }

    pub fn seq(items: impl Into<Vec<Value>>) -> Self {
        Value::Seq(Arc::new(items.into()))
    }

    pub fn tuple(items: impl Into<Vec<Value>>) -> Self {
        Value::Tuple(Arc::new(items.into()))
    }

    pub fn set(items: impl Into<Vec<Value>>) -> Self {
        Value::Set(Arc::new(items.into()))
    }

    pub fn map(items: impl Into<Vec<(Value, Value)>>) -> Self {
        Value::Map(Arc::new(items.into()))
    }

    /// Pointer identity for the value's heap allocation, used by the encoder
    /// to recognize a value it has already emitted. Kinds with no stable
    /// allocation (sentinels, bools, decimals) return `None` and are simply
    /// never back-referenced.
    pub(crate) fn identity(&self) -> Option<usize> {
        match self {
            Value::Int(a) => Some(Arc::as_ptr(a) as usize),
            Value::Bytes(a) => Some(Arc::as_ptr(a) as usize),
            Value::Text(a) => Some(Arc::as_ptr(a) as *const u8 as usize),
            Value::Float(a) => Some(Arc::as_ptr(a) as usize),
            Value::Timestamp(a) => Some(Arc::as_ptr(a) as usize),
            Value::Seq(a) | Value::Tuple(a) | Value::Set(a) => Some(Arc::as_ptr(a) as usize),
            Value::Map(a) => Some(Arc::as_ptr(a) as usize),
            Value::Record(a) => Some(Arc::as_ptr(a) as usize),
            Value::Null | Value::Skip | Value::Ellipsis | Value::Bool(_) | Value::Decimal(_) => None,
        }
    }
}

/// A timestamp, either a fixed numeric UTC offset or an IANA zone.
#[derive(Debug, Clone, PartialEq)]
pub enum Timestamp {
    Fixed(DateTime<FixedOffset>),
    Zoned(DateTime<Tz>),
}

/// A decoded or to-be-encoded record. `host_type` identifies the record's
/// shape to the schema on the encode side; on decode, records whose wire
/// name the schema doesn't recognize come back with `host_type` set to the
/// generic fallback and `fields` holding exactly the wire-name/value pairs
/// that were read.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordInstance {
    pub host_type: RecordTag,
    pub fields: Vec<(String, Value)>,
}

/// Identifies a value's registered type within a [`crate::schema::Schema`]:
/// one of the fixed built-in kinds, or a named record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HostType {
    Null,
    Skip,
    Ellipsis,
    Bool,
    Int,
    Bytes,
    Text,
    Float,
    Decimal,
    Timestamp,
    Seq,
    Tuple,
    Set,
    Map,
    Record(RecordTag),
}

/// A caller-chosen stable identifier for one record type, independent of its
/// wire name (the wire name may be renamed via `define_record` without
/// disturbing `RecordTag` identity).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordTag(pub Arc<str>);

impl RecordTag {
    pub fn new(tag: impl Into<Arc<str>>) -> Self {
        RecordTag(tag.into())
    }

    /// Tag assigned to a record decoded through the generic (unknown wire
    /// name) fallback path.
    pub fn generic(wire_name: &str) -> Self {
        RecordTag(Arc::from(format!("<generic:{}>", wire_name)))
    }
}

impl HostType {
    pub(crate) fn of(value: &Value) -> HostType {
        match value {
            Value::Null => HostType::Null,
            Value::Skip => HostType::Skip,
            Value::Ellipsis => HostType::Ellipsis,
            Value::Bool(_) => HostType::Bool,
            Value::Int(_) => HostType::Int,
            Value::Bytes(_) => HostType::Bytes,
            Value::Text(_) => HostType::Text,
            Value::Float(_) => HostType::Float,
            Value::Decimal(_) => HostType::Decimal,
            Value::Timestamp(_) => HostType::Timestamp,
            Value::Seq(_) => HostType::Seq,
            Value::Tuple(_) => HostType::Tuple,
            Value::Set(_) => HostType::Set,
            Value::Map(_) => HostType::Map,
            Value::Record(r) => HostType::Record(r.host_type.clone()),
        }
    }
}
