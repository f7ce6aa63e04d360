//! Tests for maintenance operations
//!
//! These tests verify:
//! - Reorganize shrinks a churned file and keeps every live record
//! - The session keeps working (and keeps its lock) after reorganize
//! - Explicit sync and sync mode make writes visible to other sessions
//! - Cache size tuning

use std::fs;
use std::path::PathBuf;

use atlasdbm::{
    Config, Dbm, DbmError, OpenMode, DEFAULT_PERMISSIONS, NOLOCK, READER, SYNC, WRCREAT, WRITER,
};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_db() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("maint.db");
    (temp_dir, path)
}

fn reorg_file(path: &PathBuf) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".reorg");
    PathBuf::from(name)
}

fn churned(path: &PathBuf) -> Dbm {
    let config = Config::builder()
        .path(path)
        .block_size(512)
        .mode(OpenMode::NewDb)
        .build();
    let mut db = Dbm::open_with(config).unwrap();
    for i in 0..2000 {
        db.put(format!("key{}", i), vec![b'x'; 200]).unwrap();
    }
    db.delete_if(|k, _| !k.ends_with(b"7")).unwrap();
    db
}

// =============================================================================
// Reorganize Tests
// =============================================================================

#[test]
fn test_reorganize_shrinks_file() {
    let (_temp, path) = setup_temp_db();
    let mut db = churned(&path);

    let stats = db.reorganize().unwrap();

    assert_eq!(stats.records, 200);
    assert!(
        stats.bytes_after < stats.bytes_before,
        "no shrink: {:?}",
        stats
    );
    assert!(stats.reclaimed() > 0);
    assert_eq!(fs::metadata(&path).unwrap().len(), stats.bytes_after);
    assert!(!reorg_file(&path).exists());
}

#[test]
fn test_reorganize_keeps_records() {
    let (_temp, path) = setup_temp_db();
    let mut db = churned(&path);

    db.reorganize().unwrap();

    assert_eq!(db.len().unwrap(), 200);
    for i in 0..2000 {
        let expected = if i % 10 == 7 { Some(vec![b'x'; 200]) } else { None };
        assert_eq!(db.get(format!("key{}", i)).unwrap(), expected, "key{}", i);
    }
}

#[test]
fn test_session_continues_after_reorganize() {
    let (_temp, path) = setup_temp_db();
    {
        let mut db = churned(&path);
        db.reorganize().unwrap();
        db.put("fresh", "value").unwrap();
        db.delete("key7").unwrap();
        db.close().unwrap();
    }

    let mut db = Dbm::open(&path, DEFAULT_PERMISSIONS, READER).unwrap();
    assert_eq!(db.get("fresh").unwrap(), Some(b"value".to_vec()));
    assert_eq!(db.get("key7").unwrap(), None);
    assert_eq!(db.get("key17").unwrap(), Some(vec![b'x'; 200]));
    assert_eq!(db.len().unwrap(), 200);
}

#[cfg(unix)]
#[test]
fn test_reorganize_keeps_writer_lock() {
    let (_temp, path) = setup_temp_db();
    let mut db = churned(&path);
    db.reorganize().unwrap();

    let second = Dbm::open(&path, DEFAULT_PERMISSIONS, WRITER);
    assert!(matches!(second, Err(DbmError::CannotBeWriter(_))));
}

#[cfg(unix)]
#[test]
fn test_failed_install_removes_reorg_file() {
    let (_temp, path) = setup_temp_db();
    let mut db = churned(&path);
    // The open handle outlives the name, so only installing the copy fails
    fs::remove_file(&path).unwrap();

    let result = db.reorganize();

    assert!(matches!(result, Err(DbmError::Io(_))), "got {:?}", result);
    assert!(!reorg_file(&path).exists());
    assert_eq!(db.get("key7").unwrap(), Some(vec![b'x'; 200]));
}

#[test]
fn test_reorganize_empty_database() {
    let (_temp, path) = setup_temp_db();
    let mut db = Dbm::open(&path, DEFAULT_PERMISSIONS, WRCREAT).unwrap();

    let stats = db.reorganize().unwrap();

    assert_eq!(stats.records, 0);
    assert!(db.is_empty().unwrap());
    db.put("k", "v").unwrap();
    assert_eq!(db.len().unwrap(), 1);
}

#[test]
fn test_reorganize_keeps_sync_mode() {
    let (_temp, path) = setup_temp_db();
    let mut db = Dbm::open(&path, DEFAULT_PERMISSIONS, WRCREAT | SYNC).unwrap();
    db.put("k", "v").unwrap();

    db.reorganize().unwrap();

    assert!(db.sync_mode().unwrap());
}

#[test]
fn test_reader_cannot_reorganize() {
    let (_temp, path) = setup_temp_db();
    {
        let mut db = Dbm::open(&path, DEFAULT_PERMISSIONS, WRCREAT).unwrap();
        db.put("k", "v").unwrap();
    }

    let mut db = Dbm::open(&path, DEFAULT_PERMISSIONS, READER).unwrap();
    assert!(matches!(db.reorganize(), Err(DbmError::ReadOnly)));
}

// =============================================================================
// Sync Tests
// =============================================================================

#[test]
fn test_explicit_sync_publishes_writes() {
    let (_temp, path) = setup_temp_db();
    let mut writer = Dbm::open(&path, DEFAULT_PERMISSIONS, WRCREAT | NOLOCK).unwrap();
    for i in 0..300 {
        writer.put(format!("k{}", i), "v").unwrap();
    }

    writer.sync().unwrap();

    let mut reader = Dbm::open(&path, DEFAULT_PERMISSIONS, READER | NOLOCK).unwrap();
    assert_eq!(reader.len().unwrap(), 300);
}

#[test]
fn test_sync_mode_publishes_every_write() {
    let (_temp, path) = setup_temp_db();
    let mut writer = Dbm::open(&path, DEFAULT_PERMISSIONS, WRCREAT | NOLOCK).unwrap();
    writer.set_sync_mode(true).unwrap();

    writer.put("a", "1").unwrap();
    let mut reader = Dbm::open(&path, DEFAULT_PERMISSIONS, READER | NOLOCK).unwrap();
    assert_eq!(reader.get("a").unwrap(), Some(b"1".to_vec()));
    reader.close().unwrap();

    writer.delete("a").unwrap();
    let mut reader = Dbm::open(&path, DEFAULT_PERMISSIONS, READER | NOLOCK).unwrap();
    assert_eq!(reader.get("a").unwrap(), None);
}

// =============================================================================
// Cache Tuning Tests
// =============================================================================

#[test]
fn test_cache_size_validation() {
    let (_temp, path) = setup_temp_db();
    let mut db = Dbm::open(&path, DEFAULT_PERMISSIONS, WRCREAT).unwrap();

    assert!(matches!(
        db.set_cache_size(0),
        Err(DbmError::InvalidArgument(_))
    ));
    db.set_cache_size(4).unwrap();
    assert_eq!(db.cache_size().unwrap(), 4);

    let config = Config::builder().path(&path).cache_size(0).build();
    assert!(matches!(
        Dbm::open_with(config),
        Err(DbmError::InvalidArgument(_))
    ));
}

#[test]
fn test_shrinking_cache_keeps_dirty_buckets() {
    let (_temp, path) = setup_temp_db();
    {
        let config = Config::builder()
            .path(&path)
            .block_size(512)
            .mode(OpenMode::NewDb)
            .build();
        let mut db = Dbm::open_with(config).unwrap();
        for i in 0..1000 {
            db.put(format!("k{}", i), format!("v{}", i)).unwrap();
        }

        db.set_cache_size(1).unwrap();

        for i in 0..1000 {
            assert_eq!(
                db.get(format!("k{}", i)).unwrap(),
                Some(format!("v{}", i).into_bytes())
            );
        }
        db.close().unwrap();
    }

    let mut db = Dbm::open(&path, DEFAULT_PERMISSIONS, READER).unwrap();
    assert_eq!(db.len().unwrap(), 1000);
}
