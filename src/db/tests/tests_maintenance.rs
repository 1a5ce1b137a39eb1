#[cfg(test)]
mod tests {
    use crate::db::{Database, DbConfig};
    use crate::value::Value;
    use std::time::Duration;
    use tempfile::TempDir;

    fn tiny_buffer() -> DbConfig {
        DbConfig {
            flush_threshold: 32,
            ..Default::default()
        }
    }

    #[test]
    fn test_forced_compaction_preserves_every_live_key() {
        let tmp = TempDir::new().unwrap();

        // Exceed the default compaction threshold of 4 with room to spare.
        {
            let db = Database::open_with(tmp.path(), tiny_buffer()).unwrap();
            for i in 0..8 {
                db.put(format!("key_{i}"), i).unwrap();
            }
            db.close().unwrap();
        }

        let db = Database::open(tmp.path()).unwrap();
        let before = db.stats().unwrap().table_count;
        assert!(before >= 5, "expected at least 5 SSTables, got {before}");

        assert!(db.compact().unwrap());
        assert_eq!(db.stats().unwrap().table_count, 1);

        for i in 0..8 {
            assert_eq!(
                db.get(&format!("key_{i}")).unwrap(),
                Some(Value::I32(i)),
                "key_{i} lost in compaction"
            );
        }
        db.close().unwrap();
    }

    #[test]
    fn test_compaction_discards_tombstoned_keys() {
        let tmp = TempDir::new().unwrap();

        {
            let db = Database::open_with(tmp.path(), tiny_buffer()).unwrap();
            for i in 0..6 {
                db.put(format!("key_{i}"), i).unwrap();
            }
            for i in 0..6 {
                if i % 2 == 0 {
                    db.delete(format!("key_{i}")).unwrap();
                }
            }
            db.close().unwrap();
        }

        let db = Database::open(tmp.path()).unwrap();
        assert!(db.compact().unwrap());

        for i in 0..6 {
            let got = db.get(&format!("key_{i}")).unwrap();
            if i % 2 == 0 {
                assert_eq!(got, None);
            } else {
                assert_eq!(got, Some(Value::I32(i)));
            }
        }

        // The merged table holds only the three survivors.
        let mut count = 0;
        db.scan(None, None, |_, _| count += 1).unwrap();
        assert_eq!(count, 3);
        db.close().unwrap();
    }

    #[test]
    fn test_compaction_survivorship_across_reopen() {
        let tmp = TempDir::new().unwrap();

        {
            let db = Database::open_with(tmp.path(), tiny_buffer()).unwrap();
            for i in 0..10 {
                db.put(format!("key_{i:02}"), i).unwrap();
            }
            db.put("key_03", 333i32).unwrap();
            db.delete("key_07").unwrap();
            db.close().unwrap();
        }

        {
            let db = Database::open(tmp.path()).unwrap();
            assert!(db.compact().unwrap());
            db.close().unwrap();
        }

        let db = Database::open(tmp.path()).unwrap();
        assert_eq!(db.get("key_03").unwrap(), Some(Value::I32(333)));
        assert_eq!(db.get("key_07").unwrap(), None);
        assert_eq!(db.get("key_00").unwrap(), Some(Value::I32(0)));
        db.close().unwrap();
    }

    #[test]
    fn test_background_flush_drains_immutable_queue() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open_with(tmp.path(), tiny_buffer()).unwrap();

        for i in 0..4 {
            db.put(format!("key_{i}"), i).unwrap();
        }

        // The flush worker ticks every second; give it a few chances.
        let mut drained = false;
        for _ in 0..50 {
            let stats = db.stats().unwrap();
            if stats.immutable_count == 0 && stats.table_count >= 1 {
                drained = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(100));
        }
        assert!(drained, "flush worker never drained the immutable queue");

        // Data flushed by the worker stays readable.
        for i in 0..4 {
            assert_eq!(db.get(&format!("key_{i}")).unwrap(), Some(Value::I32(i)));
        }
        db.close().unwrap();
    }

    #[test]
    fn test_stats_reflect_database_shape() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path()).unwrap();

        let empty = db.stats().unwrap();
        assert_eq!(empty.active_bytes, 0);
        assert_eq!(empty.immutable_count, 0);
        assert_eq!(empty.table_count, 0);
        assert_eq!(empty.total_table_bytes, 0);

        db.put("k", "v").unwrap();
        let after_put = db.stats().unwrap();
        assert!(after_put.active_bytes > 0);

        db.close().unwrap();
    }

    #[test]
    fn test_compact_with_fewer_than_two_tables_is_a_no_op() {
        let tmp = TempDir::new().unwrap();
        let db = Database::open(tmp.path()).unwrap();

        db.put("k", 1i32).unwrap();
        assert!(!db.compact().unwrap());
        assert_eq!(db.get("k").unwrap(), Some(Value::I32(1)));
        db.close().unwrap();
    }
}
