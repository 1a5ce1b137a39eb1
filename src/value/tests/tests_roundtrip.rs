#[cfg(test)]
mod tests {
    use crate::value::{VALUE_HEADER_SIZE, Value};

    fn roundtrip(value: Value) -> Value {
        let bytes = value.encode_to_vec();
        assert_eq!(bytes.len(), value.encoded_size());
        let (decoded, consumed) = Value::decode_from(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        decoded
    }

    #[test]
    fn test_roundtrip_nil_and_bool() {
        assert_eq!(roundtrip(Value::Nil), Value::Nil);
        assert_eq!(roundtrip(Value::Bool(true)), Value::Bool(true));
        assert_eq!(roundtrip(Value::Bool(false)), Value::Bool(false));
    }

    #[test]
    fn test_roundtrip_signed_integers() {
        assert_eq!(roundtrip(Value::I8(-1)), Value::I8(-1));
        assert_eq!(roundtrip(Value::I8(i8::MIN)), Value::I8(i8::MIN));
        assert_eq!(roundtrip(Value::I16(i16::MAX)), Value::I16(i16::MAX));
        assert_eq!(roundtrip(Value::I32(-123_456)), Value::I32(-123_456));
        assert_eq!(roundtrip(Value::I64(i64::MIN)), Value::I64(i64::MIN));
        assert_eq!(roundtrip(Value::I64(i64::MAX)), Value::I64(i64::MAX));
    }

    #[test]
    fn test_roundtrip_unsigned_integers() {
        assert_eq!(roundtrip(Value::U8(0)), Value::U8(0));
        assert_eq!(roundtrip(Value::U8(u8::MAX)), Value::U8(u8::MAX));
        assert_eq!(roundtrip(Value::U16(u16::MAX)), Value::U16(u16::MAX));
        assert_eq!(roundtrip(Value::U32(u32::MAX)), Value::U32(u32::MAX));
        assert_eq!(roundtrip(Value::U64(u64::MAX)), Value::U64(u64::MAX));
    }

    #[test]
    fn test_roundtrip_floats_bit_exact() {
        for v in [0.0f32, -0.0, 1.5, f32::MIN_POSITIVE, f32::MAX] {
            let decoded = roundtrip(Value::F32(v));
            assert_eq!(decoded.as_f32().unwrap().to_bits(), v.to_bits());
        }
        for v in [0.0f64, 95.5, -1e300, f64::EPSILON] {
            let decoded = roundtrip(Value::F64(v));
            assert_eq!(decoded.as_f64().unwrap().to_bits(), v.to_bits());
        }
    }

    #[test]
    fn test_roundtrip_strings() {
        assert_eq!(roundtrip(Value::from("")), Value::Str(String::new()));
        assert_eq!(roundtrip(Value::from("Alice")), Value::Str("Alice".into()));
        // Multi-byte UTF-8 survives intact.
        assert_eq!(
            roundtrip(Value::from("日本語 héllo")),
            Value::Str("日本語 héllo".into())
        );
    }

    #[test]
    fn test_roundtrip_bytes() {
        assert_eq!(roundtrip(Value::from(vec![])), Value::Bytes(vec![]));
        assert_eq!(
            roundtrip(Value::from(vec![1u8, 2, 3, 4, 5])),
            Value::Bytes(vec![1, 2, 3, 4, 5])
        );
        let blob: Vec<u8> = (0..=255).collect();
        assert_eq!(roundtrip(Value::from(blob.clone())), Value::Bytes(blob));
    }

    #[test]
    fn test_encoded_size_matches_wire_layout() {
        assert_eq!(Value::Nil.encoded_size(), VALUE_HEADER_SIZE);
        assert_eq!(Value::Bool(true).encoded_size(), VALUE_HEADER_SIZE + 1);
        assert_eq!(Value::I64(7).encoded_size(), VALUE_HEADER_SIZE + 8);
        assert_eq!(Value::from("abc").encoded_size(), VALUE_HEADER_SIZE + 3);
    }

    #[test]
    fn test_decode_consumes_exactly_one_value() {
        let mut buf = Vec::new();
        Value::I32(7).encode_to(&mut buf);
        Value::from("next").encode_to(&mut buf);

        let (first, consumed) = Value::decode_from(&buf).unwrap();
        assert_eq!(first, Value::I32(7));

        let (second, _) = Value::decode_from(&buf[consumed..]).unwrap();
        assert_eq!(second, Value::Str("next".into()));
    }
}
