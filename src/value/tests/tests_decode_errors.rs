#[cfg(test)]
mod tests {
    use crate::value::{Value, ValueError};

    #[test]
    fn test_empty_and_short_buffers_rejected() {
        assert!(matches!(
            Value::decode_from(&[]),
            Err(ValueError::Corrupt(_))
        ));
        // Tag present, length prefix truncated.
        assert!(matches!(
            Value::decode_from(&[4, 0, 0]),
            Err(ValueError::Corrupt(_))
        ));
    }

    #[test]
    fn test_payload_shorter_than_declared_length() {
        // Tag I32, declared length 4, only two payload bytes present.
        let buf = [4u8, 4, 0, 0, 0, 0xAA, 0xBB];
        assert!(matches!(
            Value::decode_from(&buf),
            Err(ValueError::Corrupt(_))
        ));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let buf = [200u8, 0, 0, 0, 0];
        assert!(matches!(
            Value::decode_from(&buf),
            Err(ValueError::Corrupt(_))
        ));
    }

    #[test]
    fn test_fixed_width_tag_with_wrong_length_rejected() {
        // Tag Bool with a 2-byte payload is malformed even though the
        // bytes are present.
        let buf = [1u8, 2, 0, 0, 0, 1, 1];
        assert!(matches!(
            Value::decode_from(&buf),
            Err(ValueError::Corrupt(_))
        ));
    }

    #[test]
    fn test_invalid_bool_byte_rejected() {
        let buf = [1u8, 1, 0, 0, 0, 7];
        assert!(matches!(
            Value::decode_from(&buf),
            Err(ValueError::Corrupt(_))
        ));
    }

    #[test]
    fn test_invalid_utf8_string_rejected() {
        let buf = [12u8, 2, 0, 0, 0, 0xFF, 0xFE];
        assert!(matches!(
            Value::decode_from(&buf),
            Err(ValueError::Corrupt(_))
        ));
    }
}
