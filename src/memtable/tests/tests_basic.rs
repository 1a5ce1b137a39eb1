#[cfg(test)]
mod tests {
    use crate::memtable::{MemRecord, MemTable, MemtableLookup};
    use crate::value::Value;

    #[test]
    fn test_put_then_get() {
        let mt = MemTable::new();
        mt.put("name", Value::from("Alice")).unwrap();

        assert_eq!(
            mt.get("name").unwrap(),
            MemtableLookup::Value(Value::from("Alice"))
        );
        assert_eq!(mt.get("missing").unwrap(), MemtableLookup::Absent);
    }

    #[test]
    fn test_put_replaces_previous_value() {
        let mt = MemTable::new();
        mt.apply("age".into(), MemRecord::put(Value::I32(30), 1))
            .unwrap();
        mt.apply("age".into(), MemRecord::put(Value::I32(31), 2))
            .unwrap();

        assert_eq!(
            mt.get("age").unwrap(),
            MemtableLookup::Value(Value::I32(31))
        );
        assert_eq!(mt.len().unwrap(), 1);
    }

    #[test]
    fn test_delete_leaves_a_tombstone() {
        let mt = MemTable::new();
        mt.put("k", Value::I32(1)).unwrap();
        mt.delete("k").unwrap();

        // The key is masked, not forgotten: flush must still see it.
        assert_eq!(mt.get("k").unwrap(), MemtableLookup::Tombstone);
        assert_eq!(mt.len().unwrap(), 1);

        let records = mt.sorted_records().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].1.deleted);
        assert!(records[0].1.value.is_none());
    }

    #[test]
    fn test_delete_of_absent_key_still_recorded() {
        let mt = MemTable::new();
        mt.delete("ghost").unwrap();

        // The tombstone must flush to disk to mask any SSTable value.
        assert_eq!(mt.get("ghost").unwrap(), MemtableLookup::Tombstone);
        assert_eq!(mt.len().unwrap(), 1);
    }

    #[test]
    fn test_put_after_delete_revives_key() {
        let mt = MemTable::new();
        mt.apply("k".into(), MemRecord::put(Value::I32(1), 1)).unwrap();
        mt.apply("k".into(), MemRecord::tombstone(2)).unwrap();
        mt.apply("k".into(), MemRecord::put(Value::I32(3), 3)).unwrap();

        assert_eq!(mt.get("k").unwrap(), MemtableLookup::Value(Value::I32(3)));
        // Put → delete → put on one key is still a single logical row.
        assert_eq!(mt.len().unwrap(), 1);
    }

    #[test]
    fn test_clear_resets_everything() {
        let mt = MemTable::new();
        for i in 0..10 {
            mt.put(format!("k{i}"), Value::I32(i)).unwrap();
        }
        assert_eq!(mt.len().unwrap(), 10);

        mt.clear().unwrap();
        assert_eq!(mt.len().unwrap(), 0);
        assert!(mt.is_empty().unwrap());
        assert_eq!(mt.byte_size().unwrap(), 0);
        assert_eq!(mt.get("k0").unwrap(), MemtableLookup::Absent);
    }

    #[test]
    fn test_replay_timestamps_survive_apply() {
        let mt = MemTable::new();
        mt.apply("k".into(), MemRecord::put(Value::I32(1), 12345))
            .unwrap();

        let records = mt.sorted_records().unwrap();
        assert_eq!(records[0].1.timestamp, 12345);
    }
}
