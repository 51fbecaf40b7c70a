//! Black-box tests driving `Schema`/`dump_bytes`/`load_bytes` the way
//! `test_read_write.py` exercises the original's `default_schema`, rather
//! than poking individual codecs directly.

use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use std::str::FromStr;
use std::sync::Arc;
use wireflow::{FieldAttr, RecordDefinition, RecordField, RecordInstance, RecordTag, Schema, Timestamp, Value};

fn roundtrip(schema: &Schema, value: &Value) -> Value {
    let bytes = schema.dump_bytes(value).unwrap();
    schema.load_bytes(&bytes).unwrap()
}

#[test]
fn sentinels_round_trip() {
    let schema = Schema::with_builtins();
    assert_eq!(roundtrip(&schema, &Value::Null), Value::Null);
    assert_eq!(roundtrip(&schema, &Value::Skip), Value::Skip);
    assert_eq!(roundtrip(&schema, &Value::Ellipsis), Value::Ellipsis);
}

#[test]
fn bools_round_trip() {
    let schema = Schema::with_builtins();
    assert_eq!(roundtrip(&schema, &Value::Bool(true)), Value::Bool(true));
    assert_eq!(roundtrip(&schema, &Value::Bool(false)), Value::Bool(false));
}

#[test]
fn integers_round_trip_across_all_widths() {
    let schema = Schema::with_builtins();
    for n in [0u64, 1, 127, 128, 255, 256, 65535, 65536, u32::MAX as u64, u64::MAX] {
        let v = Value::int(n);
        assert_eq!(roundtrip(&schema, &v), v, "n = {}", n);
    }
    // bigger than a u64: exercises the `big` variant.
    let huge = Value::Int(Arc::new(
        num_bigint::BigUint::from(u64::MAX) * num_bigint::BigUint::from(1000u32),
    ));
    assert_eq!(roundtrip(&schema, &huge), huge);
}

#[test]
fn scenario_dump_load_0x7f_is_int_w1() {
    let schema = Schema::with_builtins();
    let bytes = schema.dump_bytes(&Value::int(0x7Fu32)).unwrap();
    // control code 14 (int/w1, the 6th kind registered at the default start
    // of 9) fits in one varint byte, followed by the raw 0x7F payload byte.
    assert_eq!(bytes, vec![0x0E, 0x7F]);
    assert_eq!(schema.load_bytes(&bytes).unwrap(), Value::int(0x7Fu32));
}

#[test]
fn byte_strings_round_trip() {
    let schema = Schema::with_builtins();
    for b in [vec![], vec![0u8], vec![1, 2, 3, 4, 5], vec![0xFF; 300]] {
        let v = Value::bytes(b);
        assert_eq!(roundtrip(&schema, &v), v);
    }
}

#[test]
fn scenario_empty_text_has_no_payload() {
    let schema = Schema::with_builtins();
    let bytes = schema.dump_bytes(&Value::text("")).unwrap();
    assert_eq!(bytes, vec![0x14]); // text/empty's control code, no payload bytes follow
    assert_eq!(schema.load_bytes(&bytes).unwrap(), Value::text(""));
}

#[test]
fn scenario_pound_sign_is_two_byte_single_char() {
    let schema = Schema::with_builtins();
    let bytes = schema.dump_bytes(&Value::text("\u{a3}")).unwrap();
    assert_eq!(bytes, vec![0x15, 0xC2, 0xA3]);
    assert_eq!(schema.load_bytes(&bytes).unwrap(), Value::text("\u{a3}"));
}

#[test]
fn text_round_trips_through_all_forms() {
    let schema = Schema::with_builtins();
    for s in ["", "x", "\u{1F600}", "a string long enough to take the long-form encoding"] {
        let v = Value::text(s);
        assert_eq!(roundtrip(&schema, &v), v);
    }
}

#[test]
fn float_round_trips_except_nan() {
    let schema = Schema::with_builtins();
    for f in [0.0f64, -0.0, 1.5, -1.5, f64::INFINITY, f64::NEG_INFINITY, f64::MIN, f64::MAX] {
        let v = Value::Float(Arc::new(f));
        assert_eq!(roundtrip(&schema, &v), v);
    }
}

#[test]
fn decimal_round_trips_arbitrary_precision_and_sign() {
    let schema = Schema::with_builtins();
    for s in ["0", "1", "-1", "1.2345", "-1.2345", "123456789012345678901234567890.000001"] {
        let v = Value::Decimal(BigDecimal::from_str(s).unwrap());
        let decoded = roundtrip(&schema, &v);
        assert_eq!(decoded, v, "decimal {:?}", s);
    }
}

#[test]
fn decimal_digit_packing_uses_one_padding_nibble_when_odd() {
    let schema = Schema::with_builtins();
    // "123" has 3 digit characters: two full bytes' worth of nibbles plus a
    // padding nibble in the low half of the final byte.
    let v = Value::Decimal(BigDecimal::from_str("123").unwrap());
    let bytes = schema.dump_bytes(&v).unwrap();
    // control code, varint digit-count(3), then ceil(3/2) = 2 payload bytes
    assert_eq!(bytes.len(), 1 + 1 + 2);
    let last = *bytes.last().unwrap();
    assert_eq!(last & 0x0F, 0x0F, "odd digit count pads the final nibble");
    assert_eq!(schema.load_bytes(&bytes).unwrap(), v);
}

#[test]
fn timestamp_with_fixed_offset_round_trips() {
    let schema = Schema::with_builtins();
    let dt: DateTime<FixedOffset> =
        FixedOffset::east_opt(5 * 3600).unwrap().with_ymd_and_hms(2024, 3, 14, 9, 26, 53).unwrap();
    let v = Value::Timestamp(Arc::new(Timestamp::Fixed(dt)));
    assert_eq!(roundtrip(&schema, &v), v);
}

#[test]
fn timestamp_with_iana_zone_round_trips() {
    let schema = Schema::with_builtins();
    let naive = Utc.with_ymd_and_hms(2024, 3, 14, 9, 26, 53).unwrap();
    let tz: chrono_tz::Tz = "America/Los_Angeles".parse().unwrap();
    let zoned = naive.with_timezone(&tz);
    let v = Value::Timestamp(Arc::new(Timestamp::Zoned(zoned)));
    assert_eq!(roundtrip(&schema, &v), v);
}

#[test]
fn nested_sequences_tuples_sets_and_maps_round_trip() {
    let schema = Schema::with_builtins();
    let nested = Value::seq(vec![
        Value::tuple(vec![Value::int(1u32), Value::text("a")]),
        Value::set(vec![Value::Bool(true), Value::Bool(false)]),
        Value::map(vec![(Value::text("k"), Value::int(42u32))]),
        Value::seq(vec![]),
    ]);
    assert_eq!(roundtrip(&schema, &nested), nested);
}

#[test]
fn scenario_back_reference_elides_a_repeated_value_in_a_sequence() {
    let schema = Schema::with_builtins();
    let shared = Value::text("this string is long enough to be back-referable on repeat");

    let single = schema.dump_bytes(&Value::tuple(vec![shared.clone()])).unwrap();
    let doubled = schema.dump_bytes(&Value::tuple(vec![shared.clone(), shared.clone()])).unwrap();

    // the second occurrence costs one control byte + one offset byte, far
    // less than a second full copy of the string's payload.
    assert_eq!(doubled.len(), single.len() + 2);

    let decoded = schema.load_bytes(&doubled).unwrap();
    match decoded {
        Value::Tuple(items) => assert_eq!(items.as_slice(), &[shared.clone(), shared]),
        other => panic!("expected a tuple, got {:?}", other),
    }
}

#[test]
fn back_reference_survives_the_declaring_occurrence_of_a_record() {
    // Encodes the same `Arc`-identity record twice, where the first
    // occurrence is also the type's first-ever use (so it carries an inline
    // declaration ahead of its data). The back-reference recorded for that
    // first occurrence must resolve against the byte offset *after* the
    // declaration, matching where the decoder itself lands once it has
    // consumed the declaration and looped back to read the record's data.
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
            decode_factory: Arc::new({
                let tag = tag.clone();
                move |fields| Value::Record(Arc::new(RecordInstance { host_type: tag.clone(), fields }))
            }),
        })
        .unwrap();

    let record = Value::Record(Arc::new(RecordInstance {
        host_type: tag,
        fields: vec![("x".to_string(), Value::int(1u32)), ("y".to_string(), Value::int(2u32))],
    }));
    let pair = Value::tuple(vec![record.clone(), record.clone()]);

    let decoded = roundtrip(&schema, &pair);
    assert_eq!(decoded, pair);
}

#[test]
fn scenario_record_declared_once_then_reused() {
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
            decode_factory: Arc::new({
                let tag = tag.clone();
                move |fields| Value::Record(Arc::new(RecordInstance { host_type: tag.clone(), fields }))
            }),
        })
        .unwrap();

    let point = |x: u32, y: u32| {
        Value::Record(Arc::new(RecordInstance {
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

    // a decoder that shares this schema decodes both structurally.
    let mut slice = &buf[..];
    let mut dec = schema.decoder(&mut slice);
    assert_eq!(dec.decode_object().unwrap(), point(1, 2));
    assert_eq!(dec.decode_object().unwrap(), point(3, 4));

    // a decoder with no knowledge of `Point` still decodes both values, as
    // a generic wire-name to value mapping, from the same bytes.
    let naive = Schema::with_builtins();
    let mut slice = &buf[..];
    let mut dec = naive.decoder(&mut slice);
    let first = dec.decode_object().unwrap();
    let second = dec.decode_object().unwrap();
    for (value, x, y) in [(first, 1u32, 2u32), (second, 3, 4)] {
        match value {
            Value::Record(r) => {
                assert_eq!(r.host_type, RecordTag::generic("Point"));
                assert_eq!(r.fields, vec![("x".to_string(), Value::int(x)), ("y".to_string(), Value::int(y))]);
            }
            other => panic!("expected a generic record, got {:?}", other),
        }
    }
}

#[test]
fn unknown_type_fails_to_encode() {
    let schema = Schema::with_builtins();
    let value = Value::Record(Arc::new(RecordInstance { host_type: RecordTag::new("Nope"), fields: vec![] }));
    let err = schema.dump_bytes(&value).unwrap_err();
    assert_eq!(err.kind(), wireflow::ErrorKind::UnknownType);
}

#[test]
fn truncated_stream_is_unexpected_eof() {
    let schema = Schema::with_builtins();
    let bytes = schema.dump_bytes(&Value::text("a long enough string to take the length-prefixed form")).unwrap();
    let truncated = &bytes[..bytes.len() - 3];
    let mut slice = truncated;
    let err = schema.decoder(&mut slice).decode_object().unwrap_err();
    assert_eq!(err.kind(), wireflow::ErrorKind::UnexpectedEof);
}

#[test]
fn forked_schema_does_not_leak_registrations_back_to_parent() {
    let parent = Schema::with_builtins();
    let mut fork = parent.fork();
    fork.define_record(RecordDefinition {
        host_type: RecordTag::new("Only_in_fork"),
        wire_name: "OnlyInFork".to_string(),
        fields: vec![],
        decode_factory: Arc::new(|fields| {
            Value::Record(Arc::new(RecordInstance { host_type: RecordTag::new("Only_in_fork"), fields }))
        }),
    })
    .unwrap();

    let value = Value::Record(Arc::new(RecordInstance { host_type: RecordTag::new("Only_in_fork"), fields: vec![] }));
    assert!(fork.dump_bytes(&value).is_ok());
    assert!(parent.dump_bytes(&value).is_err());
}
