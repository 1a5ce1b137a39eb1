#[cfg(test)]
mod tests {
    use crate::value::{Value, ValueError};

    #[test]
    fn test_matching_accessor_returns_value() {
        assert!(Value::Bool(true).as_bool().unwrap());
        assert_eq!(Value::I32(30).as_i32().unwrap(), 30);
        assert_eq!(Value::U64(9).as_u64().unwrap(), 9);
        assert_eq!(Value::F64(95.5).as_f64().unwrap(), 95.5);
        assert_eq!(Value::from("Alice").as_str().unwrap(), "Alice");
        assert_eq!(Value::from(vec![1u8, 2]).as_bytes().unwrap(), &[1, 2]);
    }

    #[test]
    fn test_mismatched_accessor_reports_both_types() {
        let err = Value::I32(30).as_str().unwrap_err();
        assert_eq!(
            err,
            ValueError::TypeMismatch {
                requested: "string",
                stored: "i32",
            }
        );

        let err = Value::from("Alice").as_f64().unwrap_err();
        assert_eq!(
            err,
            ValueError::TypeMismatch {
                requested: "f64",
                stored: "string",
            }
        );
    }

    #[test]
    fn test_accessors_do_not_coerce_across_widths() {
        // An i32 is not an i64, even though the value would fit.
        assert!(Value::I32(1).as_i64().is_err());
        assert!(Value::U8(1).as_u16().is_err());
        assert!(Value::F32(1.0).as_f64().is_err());
    }

    #[test]
    fn test_nil_checks() {
        assert!(Value::Nil.is_nil());
        assert!(!Value::Bool(false).is_nil());
        assert!(Value::Nil.as_bool().is_err());
    }

    #[test]
    fn test_from_impls_pick_expected_variant() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(30i32), Value::I32(30));
        assert_eq!(Value::from(95.5f64), Value::F64(95.5));
        assert_eq!(Value::from("s"), Value::Str("s".into()));
        assert_eq!(Value::from([1u8, 2, 3]), Value::Bytes(vec![1, 2, 3]));
        assert_eq!(Value::from(&b"xy"[..]), Value::Bytes(vec![120, 121]));
    }
}
