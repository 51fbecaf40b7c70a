//! The encoder context (§4.4): holds a schema snapshot, the output sink, the
//! next-free-code counter (folded into the schema), and the back-reference
//! table. Emits type declarations lazily on first encounter of a record
//! type and shares the same interleaved stream as the decoder reads.

use crate::error::{bail, ensure, error, Result};
use crate::schema::{self, RecordDefinition, Schema};
use crate::value::{HostType, Value};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;

/// Encodes values to a `std::io::Write` conforming to a [`Schema`].
///
/// Built by [`Schema::encoder`]; lives for the duration of one stream. The
/// back-reference table is private to this context and discarded when it is
/// dropped (§3's Lifecycles, §5's Shared resources).
pub struct EncoderContext<'w, W> {
    schema: Schema,
    sink: &'w mut W,
    position: u64,
    back_refs: HashMap<usize, u64>,
}

impl<'w, W: Write> EncoderContext<'w, W> {
    pub fn new(schema: Schema, sink: &'w mut W) -> Self {
        EncoderContext { schema, sink, position: 0, back_refs: HashMap::new() }
    }

    /// The schema this context was built from. Mutating a clone of it has no
    /// effect on an in-flight context (§5).
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Writes raw bytes to the underlying sink. Intended for use by custom
    /// kind codecs.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.sink.write_all(bytes)?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Encodes a varint (§4.1). Does not write a control code first; callers
    /// encoding a value that participates in kind dispatch want
    /// [`EncoderContext::encode_object`] instead.
    pub fn encode_varint(&mut self, n: u64) -> Result<()> {
        let mut buf = Vec::with_capacity(8);
        crate::var_len::write_varint(&mut buf, n)?;
        self.write(&buf)
    }

    /// Encodes a UTF-8 string as a varint byte-length followed by its bytes.
    /// Does not write a control code first.
    pub fn encode_string(&mut self, s: &str) -> Result<()> {
        self.encode_varint(s.len() as u64)?;
        self.write(s.as_bytes())
    }

    /// Encodes one value, writing its control code and payload (or a
    /// back-reference), declaring its record type first if this is the
    /// first occurrence (§4.4).
    pub fn encode_object(&mut self, value: &Value) -> Result<()> {
        self.encode_object_impl(value, false)
    }

    fn encode_object_impl(&mut self, value: &Value, simple_form: bool) -> Result<()> {
        let host_type = HostType::of(value);
        let codec = match self.schema.encoder_codec(&host_type) {
            Some(codec) => codec,
            None => {
                ensure!(
                    !simple_form,
                    InvalidDeclarationSite,
                    "a declaration was needed while re-encoding a variant key, which is forbidden"
                );
                match &host_type {
                    HostType::Record(tag) => {
                        let def = self
                            .schema
                            .record_by_type(tag)
                            .ok_or_else(|| schema::unknown_host_type(&host_type))?;
                        self.declare_record(def)?;
                        self.schema
                            .encoder_codec(&host_type)
                            .expect("just installed by declare_record")
                    }
                    _ => return Err(schema::unknown_host_type(&host_type)),
                }
            }
        };

        // Captured after any inline declaration above has already advanced
        // the stream, so it lines up with the decoder's own `start_pos`
        // (read at the top of its loop, after consuming a declaration and
        // looping back) rather than the position before the declaration.
        let position = self.position;
        let selected = codec.select_variant(value)?;

        if selected.back_referable {
            if let Some(id) = value.identity() {
                if let Some(&target) = self.back_refs.get(&id) {
                    return self.encode_back_reference(position, target);
                }
            }
        }

        let code = self.schema.encoder_code(&host_type, &selected.variant).ok_or_else(|| {
            error!(
                UnknownType,
                "variant {:?} of {:?} has no assigned control code", selected.variant, host_type
            )
        })?;
        self.encode_varint(code)?;
        codec.write_payload(value, &selected.variant, self)?;

        if selected.back_referable {
            if let Some(id) = value.identity() {
                self.back_refs.insert(id, position);
            }
        }
        Ok(())
    }

    /// Declares a record type inline (§4.4): installs a fresh codec in the
    /// schema bound to one freshly allocated control code, then writes the
    /// declaration marker, wire name, variant table, and field-name list.
    fn declare_record(&mut self, def: Arc<RecordDefinition>) -> Result<()> {
        let codec = schema::record_codec(def.clone());
        let code = self.schema.next_code();
        self.schema.install_codec(HostType::Record(def.host_type.clone()), codec, code);

        self.encode_varint(0)?;
        self.encode_string(&def.wire_name)?;
        self.encode_varint(1)?;
        self.encode_varint(code)?;
        // The variant key is re-encoded through the engine in simple form,
        // forbidding a nested declaration from desynchronizing the
        // decoder's reservation of positions (§4.4).
        self.encode_object_impl(&schema::declared_variant_value(), true)?;
        self.encode_varint(def.fields.len() as u64)?;
        for field in &def.fields {
            self.encode_string(&field.wire_name)?;
        }
        Ok(())
    }

    fn encode_back_reference(&mut self, ref_pos: u64, target_pos: u64) -> Result<()> {
        if target_pos > ref_pos {
            bail!(
                InvalidBackReference,
                "recorded offset {} is ahead of the current position {}",
                target_pos,
                ref_pos
            );
        }
        self.encode_varint(1)?;
        self.encode_varint(ref_pos - target_pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{FieldAttr, RecordField};
    use crate::value::RecordTag;

    #[test]
    fn back_reference_costs_few_extra_bytes() {
        let schema = Schema::with_builtins();
        let s = Value::text("a shared string that is definitely long enough to back-reference");

        let mut single = Vec::new();
        schema.encoder(&mut single).encode_object(&s).unwrap();

        let mut doubled = Vec::new();
        {
            let mut enc = schema.encoder(&mut doubled);
            enc.encode_object(&s).unwrap();
            enc.encode_object(&s).unwrap();
        }

        assert!(doubled.len() < single.len() * 2);
        assert_eq!(doubled.len(), single.len() + 2);
    }

    #[test]
    fn back_reference_to_a_value_whose_first_encoding_declared_a_record() {
        // The record's first occurrence triggers an inline declaration,
        // which advances `self.position` past the declaration bytes before
        // the record's own data is written. The back-reference recorded for
        // that occurrence must point at the post-declaration data position,
        // not the pre-declaration one, or the second occurrence's relative
        // offset undershoots and resolves to the wrong byte.
        let mut schema = Schema::with_builtins();
        let tag = RecordTag::new("Point");
        schema
            .define_record(crate::schema::RecordDefinition {
                host_type: tag.clone(),
                wire_name: "Point".to_string(),
                fields: vec![
                    RecordField {
                        read_attr: FieldAttr::Name("x".into()),
                        write_attr: FieldAttr::Name("x".into()),
                        wire_name: "x".into(),
                    },
                    RecordField {
                        read_attr: FieldAttr::Name("y".into()),
                        write_attr: FieldAttr::Name("y".into()),
                        wire_name: "y".into(),
                    },
                ],
                decode_factory: Arc::new({
                    let tag = tag.clone();
                    move |fields| Value::Record(Arc::new(crate::value::RecordInstance { host_type: tag.clone(), fields }))
                }),
            })
            .unwrap();

        let record = Value::Record(Arc::new(crate::value::RecordInstance {
            host_type: tag,
            fields: vec![("x".to_string(), Value::int(1u32)), ("y".to_string(), Value::int(2u32))],
        }));
        let pair = Value::tuple(vec![record.clone(), record.clone()]);

        let bytes = schema.dump_bytes(&pair).unwrap();
        let decoded = schema.load_bytes(&bytes).unwrap();
        assert_eq!(decoded, pair);
    }

    #[test]
    fn unknown_type_is_an_error() {
        let schema = Schema::with_builtins();
        let mut buf = Vec::new();
        let mut enc = schema.encoder(&mut buf);
        let tag = RecordTag::new("Nope");
        let value = Value::Record(Arc::new(crate::value::RecordInstance { host_type: tag, fields: vec![] }));
        let err = enc.encode_object(&value).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnknownType);
    }

    #[test]
    fn declares_record_once() {
        let mut schema = Schema::with_builtins();
        let tag = RecordTag::new("Point");
        schema
            .define_record(RecordDefinition {
                host_type: tag.clone(),
                wire_name: "Point".to_string(),
                fields: vec![
                    RecordField {
                        read_attr: FieldAttr::Name("x".into()),
                        write_attr: FieldAttr::Name("x".into()),
                        wire_name: "x".into(),
                    },
                    RecordField {
                        read_attr: FieldAttr::Name("y".into()),
                        write_attr: FieldAttr::Name("y".into()),
                        wire_name: "y".into(),
                    },
                ],
                decode_factory: Arc::new(move |fields| {
                    Value::Record(Arc::new(crate::value::RecordInstance {
                        host_type: RecordTag::new("Point"),
                        fields,
                    }))
                }),
            })
            .unwrap();

        let point = |x: u32, y: u32| {
            Value::Record(Arc::new(crate::value::RecordInstance {
                host_type: tag.clone(),
                fields: vec![("x".to_string(), Value::int(x)), ("y".to_string(), Value::int(y))],
            }))
        };

        let mut buf = Vec::new();
        {
            let mut enc = schema.encoder(&mut buf);
            enc.encode_object(&point(1, 2)).unwrap();
            enc.encode_object(&point(3, 4)).unwrap();
        }

        // exactly one declaration marker (varint 0) should appear before any data
        assert_eq!(buf[0], 0);
    }
}
