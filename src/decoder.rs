//! The decoder context (§4.5): holds a schema snapshot, the input source,
//! and a back-reference table keyed by byte offset. Dispatches control
//! codes; on a declaration code, installs a fresh record codec in its own
//! table before continuing, so it can always materialize an unknown record
//! as a generic field-name→value mapping.

use crate::error::{bail, ensure, error, Result};
use crate::schema::{self, FieldAttr, RecordDefinition, RecordField, Schema};
use crate::value::{RecordInstance, RecordTag, Value};
use std::collections::HashMap;
use std::io::Read;
use std::sync::Arc;

/// Wraps a reader to count bytes pulled through it, so `decode_varint_eof_ok`
/// can advance `position` by exactly what `read_varint_continue` consumed
/// without duplicating its byte-layout logic here.
struct CountingRead<'a, R> {
    inner: &'a mut R,
    count: u64,
}

impl<'a, R: Read> Read for CountingRead<'a, R> {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.count += n as u64;
        Ok(n)
    }
}

/// Decodes values from a `std::io::Read` conforming to a [`Schema`].
///
/// Built by [`Schema::decoder`]; also usable directly as a lazy `Iterator`
/// over the stream's top-level values (§4.5, §6).
pub struct DecoderContext<'r, R> {
    schema: Schema,
    source: &'r mut R,
    position: u64,
    back_refs: HashMap<u64, Value>,
}

impl<'r, R: Read> DecoderContext<'r, R> {
    pub fn new(schema: Schema, source: &'r mut R) -> Self {
        DecoderContext { schema, source, position: 0, back_refs: HashMap::new() }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Reads exactly `n` raw bytes. Intended for use by custom kind codecs.
    pub fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        self.source.read_exact(&mut buf)?;
        self.position += n as u64;
        Ok(buf)
    }

    /// Decodes a varint (§4.1), always treating truncation as a genuine
    /// parse failure. Callers that need to distinguish a clean end of
    /// sequence want [`DecoderContext::decode_object`]'s iterator instead.
    pub fn decode_varint(&mut self) -> Result<u64> {
        match self.decode_varint_eof_ok()? {
            Some(n) => Ok(n),
            None => bail!(UnexpectedEof, "stream ended before a varint"),
        }
    }

    /// Returns `Ok(None)` only when zero bytes were available for the first
    /// byte (a clean end of stream); any truncation after that first byte is
    /// a genuine `UnexpectedEof`, per [`crate::var_len::read_varint_eof_ok`].
    fn decode_varint_eof_ok(&mut self) -> Result<Option<u64>> {
        let mut first = [0u8; 1];
        let n = self.source.read(&mut first)?;
        if n == 0 {
            return Ok(None);
        }
        self.position += 1;
        let mut counted = CountingRead { inner: &mut self.source, count: 0 };
        let value = crate::var_len::read_varint_continue(&mut counted, first[0])?;
        self.position += counted.count;
        Ok(Some(value))
    }

    /// Decodes a UTF-8 string: varint byte-length, then that many bytes.
    pub fn decode_string(&mut self) -> Result<String> {
        let len = self.decode_varint()? as usize;
        let bytes = self.read(len)?;
        String::from_utf8(bytes).map_err(|_| error!(MalformedData, "malformed UTF-8 in a length-prefixed string"))
    }

    /// Decodes one value, recursing into sub-values as the matched codec
    /// requires. Transparently consumes and installs any type declarations
    /// encountered along the way (§4.5).
    pub fn decode_object(&mut self) -> Result<Value> {
        match self.decode_one(true, false)? {
            Some(value) => Ok(value),
            None => unreachable!("decode_one with eof_ok=false always returns a value or an error"),
        }
    }

    /// As [`DecoderContext::decode_object`], but a declaration code
    /// encountered at this position is a parse error (`InvalidDeclarationSite`)
    /// rather than being consumed — used while re-decoding a record's
    /// variant key, mirroring the encoder's `simple_form`.
    pub(crate) fn decode_object_no_decl(&mut self) -> Result<Value> {
        match self.decode_one(false, false)? {
            Some(value) => Ok(value),
            None => unreachable!("decode_one with eof_ok=false always returns a value or an error"),
        }
    }

    fn decode_one(&mut self, allow_declaration: bool, eof_ok: bool) -> Result<Option<Value>> {
        loop {
            let start_pos = self.position;
            let code = match self.decode_varint_eof_ok()? {
                Some(code) => code,
                None if eof_ok => return Ok(None),
                None => bail!(UnexpectedEof, "stream ended before a control code"),
            };

            if code == 0 {
                ensure!(
                    allow_declaration,
                    InvalidDeclarationSite,
                    "a type declaration appeared where recursion disallows one"
                );
                self.read_declaration()?;
                continue;
            }

            if code == 1 {
                let offset = self.decode_varint()?;
                let target = start_pos.checked_sub(offset).ok_or_else(|| {
                    error!(InvalidBackReference, "offset {} exceeds the back-reference's own position {}", offset, start_pos)
                })?;
                let value = self
                    .back_refs
                    .get(&target)
                    .cloned()
                    .ok_or_else(|| error!(InvalidBackReference, "nothing recorded at byte offset {}", target))?;
                return Ok(Some(value));
            }

            let (codec, variant_key) = self
                .schema
                .decoder_entry(code)
                .ok_or_else(|| error!(UnknownControlCode, "control code {} is not registered", code))?;
            let value = codec.decode_payload(&variant_key, self)?;
            self.back_refs.insert(start_pos, value.clone());
            return Ok(Some(value));
        }
    }

    /// Mirrors §4.4's declaration write: wire name, variant table, field
    /// names. Installs a fresh [`crate::codec::RecordCodec`] for each
    /// declared variant code, reordering the known definition's fields (if
    /// any) to the wire order, or falling back to a generic name→value
    /// record if the wire name is unknown to this schema.
    fn read_declaration(&mut self) -> Result<()> {
        let wire_name = self.decode_string()?;
        let variant_count = self.decode_varint()? as usize;
        let mut codes = Vec::with_capacity(variant_count);
        for _ in 0..variant_count {
            let code = self.decode_varint()?;
            // The variant key's own bytes; for records this is always the
            // `Null` sentinel re-encoded in simple form (§4.4). We don't
            // need its value, only to consume exactly the bytes it wrote.
            let _key = self.decode_object_no_decl()?;
            codes.push(code);
        }
        let field_count = self.decode_varint()? as usize;
        let mut field_names = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            field_names.push(self.decode_string()?);
        }

        let definition = match self.schema.record_by_name(&wire_name) {
            Some(known) => {
                let by_wire_name: HashMap<&str, &RecordField> =
                    known.fields.iter().map(|f| (f.wire_name.as_str(), f)).collect();
                let fields = field_names
                    .iter()
                    .map(|wire_field_name| match by_wire_name.get(wire_field_name.as_str()) {
                        Some(field) => RecordField {
                            read_attr: field.read_attr.clone(),
                            write_attr: field.write_attr.clone(),
                            wire_name: wire_field_name.clone(),
                        },
                        // A field on the wire that this schema's definition
                        // doesn't know about: read it as a generic value and
                        // silently ignore it (§4.5).
                        None => RecordField {
                            read_attr: FieldAttr::Skip,
                            write_attr: FieldAttr::Skip,
                            wire_name: wire_field_name.clone(),
                        },
                    })
                    .collect();
                RecordDefinition {
                    host_type: known.host_type.clone(),
                    wire_name: wire_name.clone(),
                    fields,
                    decode_factory: known.decode_factory.clone(),
                }
            }
            None => {
                let tag = RecordTag::generic(&wire_name);
                let fields = field_names
                    .iter()
                    .map(|name| RecordField {
                        read_attr: FieldAttr::Name(name.clone()),
                        write_attr: FieldAttr::Name(name.clone()),
                        wire_name: name.clone(),
                    })
                    .collect();
                let factory_tag = tag.clone();
                RecordDefinition {
                    host_type: tag,
                    wire_name: wire_name.clone(),
                    fields,
                    decode_factory: Arc::new(move |fields| {
                        Value::Record(Arc::new(RecordInstance { host_type: factory_tag.clone(), fields }))
                    }),
                }
            }
        };

        let codec = schema::record_codec(Arc::new(definition));
        for code in codes {
            self.schema.install_decoder_only(code, codec.clone(), crate::codec::VariantKey::Unit);
        }
        Ok(())
    }
}

impl<'r, R: Read> Iterator for DecoderContext<'r, R> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.decode_one(true, true) {
            Ok(Some(value)) => Some(Ok(value)),
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_control_code_is_an_error() {
        let schema = Schema::with_builtins();
        let bytes = [0xEFu8, 0, 0, 0, 0, 0, 0, 0, 200]; // 8-byte varint encoding 200, an unregistered code
        let mut slice = &bytes[..];
        let mut dec = schema.decoder(&mut slice);
        let err = dec.decode_object().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::UnknownControlCode);
    }

    #[test]
    fn invalid_back_reference_is_an_error() {
        let schema = Schema::with_builtins();
        let bytes = [1u8, 5]; // back-reference control code, offset 5, nothing recorded yet
        let mut slice = &bytes[..];
        let mut dec = schema.decoder(&mut slice);
        let err = dec.decode_object().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::InvalidBackReference);
    }

    #[test]
    fn lazy_iterator_ends_cleanly_at_eof() {
        let schema = Schema::with_builtins();
        let bytes = schema.dump_bytes(&Value::Bool(true)).unwrap();
        let mut slice = &bytes[..];
        let mut dec = schema.decoder(&mut slice);
        assert_eq!(dec.next().unwrap().unwrap(), Value::Bool(true));
        assert!(dec.next().is_none());
    }

    #[test]
    fn unknown_record_falls_back_to_generic_mapping() {
        let schema = Schema::with_builtins();
        let mut buf = Vec::new();
        {
            let mut enc = schema.encoder(&mut buf);
            enc.encode_varint(0).unwrap(); // declaration marker
            enc.encode_string("Point").unwrap();
            enc.encode_varint(1).unwrap(); // one variant
            enc.encode_varint(schema.next_code()).unwrap();
            enc.encode_object(&Value::Null).unwrap(); // variant key
            enc.encode_varint(2).unwrap(); // two fields
            enc.encode_string("x").unwrap();
            enc.encode_string("y").unwrap();
            // field values
            enc.encode_object(&Value::int(1u32)).unwrap();
            enc.encode_object(&Value::int(2u32)).unwrap();
        }
        let mut slice = &buf[..];
        let mut dec = schema.decoder(&mut slice);
        let value = dec.decode_object().unwrap();
        match value {
            Value::Record(r) => {
                assert_eq!(r.host_type, RecordTag::generic("Point"));
                assert_eq!(r.fields, vec![("x".to_string(), Value::int(1u32)), ("y".to_string(), Value::int(2u32))]);
            }
            other => panic!("expected a generic record, got {:?}", other),
        }
    }

    #[test]
    fn known_record_round_trips() {
        use std::sync::Arc as StdArc;

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
                decode_factory: StdArc::new({
                    let tag = tag.clone();
                    move |fields| Value::Record(StdArc::new(RecordInstance { host_type: tag.clone(), fields }))
                }),
            })
            .unwrap();

        let point = Value::Record(StdArc::new(RecordInstance {
            host_type: tag,
            fields: vec![("x".to_string(), Value::int(1u32)), ("y".to_string(), Value::int(2u32))],
        }));

        let bytes = schema.dump_bytes(&point).unwrap();
        let decoded = schema.load_bytes(&bytes).unwrap();
        assert_eq!(decoded, point);
    }
}
