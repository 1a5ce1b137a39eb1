#[cfg(test)]
mod tests {
    use crate::sstable::{SST_TRAILER_OFFSET_POS, SsTable, SstBuilder, SsTableError, TableRecord};
    use crate::value::Value;
    use std::fs::OpenOptions;
    use std::io::{Seek, SeekFrom, Write};
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn build_sample(dir: &Path) -> PathBuf {
        let path = dir.join("sstable_1.sst");
        let records: Vec<TableRecord> = (0..20)
            .map(|i| TableRecord::put(format!("key_{i:02}"), Value::I32(i), i as i64))
            .collect();
        SstBuilder::new(&path).build(records).unwrap();
        path
    }

    fn overwrite(path: &Path, offset: u64, bytes: &[u8]) {
        let mut f = OpenOptions::new().write(true).open(path).unwrap();
        f.seek(SeekFrom::Start(offset)).unwrap();
        f.write_all(bytes).unwrap();
        f.sync_all().unwrap();
    }

    #[test]
    fn test_bad_magic_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let path = build_sample(tmp.path());

        overwrite(&path, 0, b"XXXX");

        let err = SsTable::open(&path).unwrap_err();
        assert!(matches!(err, SsTableError::Corrupt(_)));
        assert!(err.to_string().contains("magic"));
    }

    #[test]
    fn test_unsupported_version_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let path = build_sample(tmp.path());

        overwrite(&path, 4, &99u32.to_le_bytes());

        let err = SsTable::open(&path).unwrap_err();
        assert!(matches!(err, SsTableError::Corrupt(_)));
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_trailer_offset_beyond_file_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let path = build_sample(tmp.path());

        overwrite(&path, SST_TRAILER_OFFSET_POS, &u64::MAX.to_le_bytes());

        let err = SsTable::open(&path).unwrap_err();
        assert!(matches!(err, SsTableError::Corrupt(_)));
    }

    #[test]
    fn test_trailer_offset_inside_prefix_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let path = build_sample(tmp.path());

        overwrite(&path, SST_TRAILER_OFFSET_POS, &3u64.to_le_bytes());

        assert!(matches!(
            SsTable::open(&path),
            Err(SsTableError::Corrupt(_))
        ));
    }

    #[test]
    fn test_truncated_trailer_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let path = build_sample(tmp.path());

        let len = std::fs::metadata(&path).unwrap().len();
        let f = OpenOptions::new().write(true).open(&path).unwrap();
        f.set_len(len - 10).unwrap();
        f.sync_all().unwrap();

        assert!(matches!(
            SsTable::open(&path),
            Err(SsTableError::Corrupt(_))
        ));
    }

    #[test]
    fn test_file_smaller_than_prefix_is_fatal() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sstable_1.sst");
        std::fs::write(&path, b"STDB").unwrap();

        assert!(matches!(
            SsTable::open(&path),
            Err(SsTableError::Corrupt(_))
        ));
    }

    #[test]
    fn test_intact_table_still_opens() {
        // Sanity check for the corruption harness itself.
        let tmp = TempDir::new().unwrap();
        let path = build_sample(tmp.path());
        let table = SsTable::open(&path).unwrap();
        assert_eq!(table.len(), 20);
    }
}
