//! The schema registry (§3, §4.3): the four maps binding value-kinds and
//! named record types to control codes, plus the operations that grow a
//! schema by forking.

use crate::codec::{
    record_variant_key_value, BoolCodec, BytesCodec, Codec, DecimalCodec, FloatCodec, IntCodec,
    MapCodec, RecordCodec, SeqCodec, SeqShape, SentinelCodec, TextCodec, TimestampCodec,
    VariantKey,
};
use crate::decoder::DecoderContext;
use crate::encoder::EncoderContext;
use crate::error::{bail, ensure, Result};
use crate::value::{HostType, RecordTag, Value};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::Arc;

/// A field of a [`RecordDefinition`]: which host-side attribute to read (or
/// write) and what name it travels under on the wire. Either attribute may
/// be [`FieldAttr::Skip`], meaning "do not read/write this field" (§3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldAttr {
    Name(String),
    Skip,
}

#[derive(Debug, Clone)]
pub struct RecordField {
    pub read_attr: FieldAttr,
    pub write_attr: FieldAttr,
    pub wire_name: String,
}

/// `(encode_type, decode_factory, wire_name, fields)` from §3. `decode_factory`
/// turns the field values read off the wire (paired with their `write_attr`
/// names) into a reconstructed [`Value::Record`].
pub struct RecordDefinition {
    pub host_type: RecordTag,
    pub wire_name: String,
    pub fields: Vec<RecordField>,
    pub decode_factory: Arc<dyn Fn(Vec<(String, Value)>) -> Value + Send + Sync>,
}

impl std::fmt::Debug for RecordDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("RecordDefinition")
            .field("host_type", &self.host_type)
            .field("wire_name", &self.wire_name)
            .field("fields", &self.fields)
            .finish()
    }
}

/// A registered (kind, variant->code map) pair, keyed by host type in the
/// encoder-side table.
#[derive(Clone)]
struct EncoderEntry {
    codec: Arc<dyn Codec>,
    variant_codes: HashMap<VariantKey, u64>,
}

/// The decoder-side counterpart: code -> (codec, variant key).
#[derive(Clone)]
struct DecoderEntry {
    codec: Arc<dyn Codec>,
    variant_key: VariantKey,
}

/// An immutable-by-convention registry (§3, §4.3): by-host-type and by-code
/// maps for encoding/decoding, plus record definitions indexed both ways.
/// Cheaply forked by shallow-copying the four maps.
#[derive(Clone, Default)]
pub struct Schema {
    by_type: HashMap<HostType, EncoderEntry>,
    by_code: HashMap<u64, DecoderEntry>,
    records_by_type: HashMap<RecordTag, Arc<RecordDefinition>>,
    records_by_name: HashMap<String, Arc<RecordDefinition>>,
}

impl std::fmt::Debug for Schema {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Schema")
            .field("kinds", &self.by_type.len())
            .field("codes", &self.by_code.len())
            .field("records", &self.records_by_type.len())
            .finish()
    }
}

impl Schema {
    /// A schema with no kinds and no records registered at all — not even
    /// the built-ins. Most callers want [`Schema::with_builtins`] instead.
    pub fn empty() -> Self {
        Schema::default()
    }

    /// Forks `self`: a shallow copy of the four maps (§3's Lifecycles).
    /// Mutating the fork never affects `self`, and contexts already built
    /// from `self` are unaffected by later mutation of either.
    pub fn fork(&self) -> Self {
        self.clone()
    }

    /// Registers `codec` for `host_type`, assigning one control code per
    /// variant (§4.3's `register_kind`/original's `add_type`).
    ///
    /// If `codes` is `None`, a contiguous run is allocated starting at
    /// `max(existing codes) + 1`, or `9` if no codes are registered yet
    /// (codes 0/1 are reserved for stream control and 2..=8 for future
    /// fixed assignments, per §3 and §6).
    pub fn register_kind(
        &mut self,
        host_type: HostType,
        codec: Arc<dyn Codec>,
        codes: Option<Vec<u64>>,
    ) -> Result<()> {
        let variants = codec.variants();
        let codes = match codes {
            Some(codes) => codes,
            None => {
                let start = self.by_code.keys().copied().max().map_or(9, |m| m + 1);
                (start..start + variants.len() as u64).collect()
            }
        };
        ensure!(
            codes.len() == variants.len(),
            SchemaConflict,
            "{} variants but {} control codes given",
            variants.len(),
            codes.len()
        );
        let mut unique = codes.clone();
        unique.sort_unstable();
        unique.dedup();
        ensure!(
            unique.len() == codes.len(),
            SchemaConflict,
            "duplicate control codes in registration: {:?}",
            codes
        );
        for &code in &codes {
            ensure!(
                !self.by_code.contains_key(&code),
                SchemaConflict,
                "control code {} already assigned",
                code
            );
        }

        let mut variant_codes = HashMap::with_capacity(variants.len());
        for (variant, code) in variants.into_iter().zip(codes.into_iter()) {
            variant_codes.insert(variant.clone(), code);
            self.by_code.insert(
                code,
                DecoderEntry { codec: codec.clone(), variant_key: variant },
            );
        }
        self.by_type.insert(host_type, EncoderEntry { codec, variant_codes });
        Ok(())
    }

    /// Registers a named record type (§4.3's `define_record`/original's
    /// `define_structure`). No control code is allocated here; the encoder
    /// declares the type lazily on first use (§4.4).
    ///
    /// `name` overrides the record's wire name; if two distinct host types
    /// would claim the same wire name this fails with `SchemaConflict`. If
    /// `host_type` was already defined under a different wire name, the old
    /// name entry is removed first, matching §4.3.
    pub fn define_record(&mut self, definition: RecordDefinition) -> Result<()> {
        let wire_name = definition.wire_name.clone();
        let host_type = definition.host_type.clone();
        if let Some(old) = self.records_by_type.get(&host_type) {
            if old.wire_name != wire_name {
                self.records_by_name.remove(&old.wire_name);
            }
        }
        if let Some(existing) = self.records_by_name.get(&wire_name) {
            ensure!(
                existing.host_type == host_type,
                SchemaConflict,
                "wire name {:?} already claimed by a different record type",
                wire_name
            );
        }
        let definition = Arc::new(definition);
        self.records_by_type.insert(host_type, definition.clone());
        self.records_by_name.insert(wire_name, definition);
        Ok(())
    }

    pub(crate) fn encoder_codec(&self, host_type: &HostType) -> Option<Arc<dyn Codec>> {
        self.by_type.get(host_type).map(|e| e.codec.clone())
    }

    pub(crate) fn encoder_code(&self, host_type: &HostType, variant: &VariantKey) -> Option<u64> {
        self.by_type.get(host_type).and_then(|e| e.variant_codes.get(variant).copied())
    }

    pub(crate) fn decoder_entry(&self, code: u64) -> Option<(Arc<dyn Codec>, VariantKey)> {
        self.by_code.get(&code).map(|e| (e.codec.clone(), e.variant_key.clone()))
    }

    pub(crate) fn record_by_type(&self, tag: &RecordTag) -> Option<Arc<RecordDefinition>> {
        self.records_by_type.get(tag).cloned()
    }

    pub(crate) fn record_by_name(&self, wire_name: &str) -> Option<Arc<RecordDefinition>> {
        self.records_by_name.get(wire_name).cloned()
    }

    pub(crate) fn next_code(&self) -> u64 {
        self.by_code.keys().copied().max().map_or(9, |m| m + 1)
    }

    pub(crate) fn install_codec(&mut self, host_type: HostType, codec: Arc<dyn Codec>, code: u64) {
        self.by_code.insert(code, DecoderEntry { codec: codec.clone(), variant_key: VariantKey::Unit });
        let mut variant_codes = HashMap::with_capacity(1);
        variant_codes.insert(VariantKey::Unit, code);
        self.by_type.insert(host_type, EncoderEntry { codec, variant_codes });
    }

    pub(crate) fn install_decoder_only(&mut self, code: u64, codec: Arc<dyn Codec>, variant_key: VariantKey) {
        self.by_code.insert(code, DecoderEntry { codec, variant_key });
    }

    /// Builds an encoder context over `self` and `sink` (§4.4).
    pub fn encoder<'w, W: Write>(&self, sink: &'w mut W) -> EncoderContext<'w, W> {
        EncoderContext::new(self.clone(), sink)
    }

    /// Builds a decoder context over `self` and `source` (§4.5).
    pub fn decoder<'r, R: Read>(&self, source: &'r mut R) -> DecoderContext<'r, R> {
        DecoderContext::new(self.clone(), source)
    }

    /// Encodes `value` to a fresh byte vector (§6's `dump_bytes`).
    pub fn dump_bytes(&self, value: &Value) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        let mut enc = self.encoder(&mut buf);
        enc.encode_object(value)?;
        Ok(buf)
    }

    /// Decodes exactly one top-level value from `bytes` (§6's `load_bytes`).
    pub fn load_bytes(&self, bytes: &[u8]) -> Result<Value> {
        let mut slice = bytes;
        let mut dec = self.decoder(&mut slice);
        dec.decode_object()
    }

    /// A schema pre-loaded with the built-in kinds at their conventional
    /// codes 9.. (sentinel/bool/int/bytes/text/float/decimal/timestamp are
    /// given fixed low codes; the three sequence shapes, map, come after).
    /// Matches `default_schema` in the Python original.
    pub fn with_builtins() -> Self {
        let mut schema = Schema::empty();
        schema
            .register_kind(HostType::Null, Arc::new(SentinelCodec(Value::Null)), None)
            .unwrap();
        schema
            .register_kind(HostType::Skip, Arc::new(SentinelCodec(Value::Skip)), None)
            .unwrap();
        schema
            .register_kind(HostType::Ellipsis, Arc::new(SentinelCodec(Value::Ellipsis)), None)
            .unwrap();
        schema.register_kind(HostType::Bool, Arc::new(BoolCodec), None).unwrap();
        schema.register_kind(HostType::Int, Arc::new(IntCodec), None).unwrap();
        schema.register_kind(HostType::Bytes, Arc::new(BytesCodec), None).unwrap();
        schema.register_kind(HostType::Text, Arc::new(TextCodec), None).unwrap();
        schema.register_kind(HostType::Float, Arc::new(FloatCodec), None).unwrap();
        schema.register_kind(HostType::Decimal, Arc::new(DecimalCodec), None).unwrap();
        schema
            .register_kind(HostType::Timestamp, Arc::new(TimestampCodec), None)
            .unwrap();
        schema
            .register_kind(HostType::Seq, Arc::new(SeqCodec(SeqShape::Ordered)), None)
            .unwrap();
        schema
            .register_kind(HostType::Tuple, Arc::new(SeqCodec(SeqShape::Tuple)), None)
            .unwrap();
        schema
            .register_kind(HostType::Set, Arc::new(SeqCodec(SeqShape::Set)), None)
            .unwrap();
        schema.register_kind(HostType::Map, Arc::new(MapCodec), None).unwrap();
        schema
    }
}

/// Builds a [`RecordCodec`] bound to `definition` and a single variant code,
/// used by the encoder/decoder contexts when they observe (or emit) a
/// declaration. Pulled out of `schema.rs` because both contexts need it and
/// neither owns the other.
pub(crate) fn record_codec(definition: Arc<RecordDefinition>) -> Arc<dyn Codec> {
    Arc::new(RecordCodec(definition))
}

/// The fixed variant key every record declaration's lone variant re-encodes
/// through `encode_object(.., simple_form=true)` (§4.4): the `Null`
/// sentinel, chosen because it is always already registered.
pub(crate) fn declared_variant_value() -> Value {
    record_variant_key_value()
}

pub(crate) fn unknown_host_type(host_type: &HostType) -> crate::error::Error {
    crate::error::error!(UnknownType, "no codec or record definition registered for {:?}", host_type)
}

#[allow(dead_code)]
fn _assert_send_sync() {
    fn assert<T: Send + Sync>() {}
    assert::<Schema>();
}
