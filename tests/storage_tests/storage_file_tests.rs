//! Tests for the storage layer
//!
//! These tests verify:
//! - Avail list best-fit allocation, splitting and coalescing
//! - Header block encoding and corruption detection
//! - StorageFile open modes, locking and truncation
//! - Space allocation and reuse
//! - Fatal hook on out-of-range reads

use std::fs::{self, File, OpenOptions};
use std::io::{Cursor, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use atlasdbm::storage::{AvailElem, AvailList, Header, StorageFile};
use atlasdbm::{Config, Dbm, DbmError, OpenFlags, OpenMode, MAX_BLOCK_SIZE};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_path() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.db");
    (temp_dir, path)
}

fn config_for(path: &PathBuf) -> Config {
    Config::builder().path(path).block_size(512).build()
}

/// Create a valid database file with one record and close it
fn create_database(path: &PathBuf) {
    let config = Config::builder()
        .path(path)
        .block_size(512)
        .mode(OpenMode::NewDb)
        .build();
    let mut db = Dbm::open_with(config).unwrap();
    db.put("key", "value").unwrap();
    db.close().unwrap();
}

// =============================================================================
// Avail List Tests
// =============================================================================

#[test]
fn test_avail_take_best_fit_and_split() {
    let mut avail = AvailList::new(4);
    assert!(avail.release(100, 50).is_none());
    assert!(avail.release(300, 20).is_none());

    // 20 is too small, 50 is the best fit; the 20 byte remainder is kept
    assert_eq!(avail.take(30), Some(100));
    assert_eq!(avail.len(), 2);
    assert!(avail.elems().contains(&AvailElem { offset: 130, size: 20 }));

    // Remainder below MIN_SPLIT stays with the allocation
    assert_eq!(avail.take(10), Some(130));
    assert_eq!(avail.len(), 1);
    assert_eq!(avail.elems()[0], AvailElem { offset: 300, size: 20 });
}

#[test]
fn test_avail_take_nothing_fits() {
    let mut avail = AvailList::new(4);
    avail.release(0, 10);

    assert_eq!(avail.take(11), None);
    assert_eq!(avail.len(), 1);
}

#[test]
fn test_avail_coalesces_neighbours() {
    let mut avail = AvailList::new(4);
    avail.release(0, 10);
    avail.release(20, 10);
    assert_eq!(avail.len(), 2);

    // Fills the gap between both regions
    avail.release(10, 10);

    assert_eq!(avail.len(), 1);
    assert_eq!(avail.elems()[0], AvailElem { offset: 0, size: 30 });
    assert_eq!(avail.free_bytes(), 30);
}

#[test]
fn test_avail_overflow_drops_smallest() {
    let mut avail = AvailList::new(2);
    assert!(avail.release(0, 10).is_none());
    assert!(avail.release(100, 20).is_none());

    let dropped = avail.release(200, 30);

    assert_eq!(dropped, Some(AvailElem { offset: 0, size: 10 }));
    assert_eq!(avail.len(), 2);
    assert_eq!(avail.free_bytes(), 50);
}

#[test]
fn test_avail_take_ending_at() {
    let mut avail = AvailList::new(4);
    avail.release(100, 20);

    assert_eq!(avail.take_ending_at(119), None);
    assert_eq!(
        avail.take_ending_at(120),
        Some(AvailElem { offset: 100, size: 20 })
    );
    assert!(avail.is_empty());
}

// =============================================================================
// Header Tests
// =============================================================================

#[test]
fn test_header_encode_fills_block() {
    let header = Header::new(512);
    let block = header.encode().unwrap();
    assert_eq!(block.len(), 512);
}

#[test]
fn test_header_decode_restores_fields() {
    let mut header = Header::new(1024);
    header.dir_offset = 1024;
    header.dir_bits = 7;
    header.bucket_elems = 42;
    header.next_block = 4096;
    header.avail.release(2048, 64);

    let block = header.encode().unwrap();
    let decoded = Header::decode(&mut Cursor::new(&block), block.len() as u64).unwrap();

    assert_eq!(decoded.block_size, 1024);
    assert_eq!(decoded.dir_offset, 1024);
    assert_eq!(decoded.dir_bits, 7);
    assert_eq!(decoded.bucket_elems, 42);
    assert_eq!(decoded.next_block, 4096);
    assert_eq!(decoded.avail.elems(), &[AvailElem { offset: 2048, size: 64 }]);
}

#[test]
fn test_header_detects_checksum_mismatch() {
    let header = Header::new(512);
    let mut block = header.encode().unwrap();
    block[12] ^= 0xFF;

    let result = Header::decode(&mut Cursor::new(&block), block.len() as u64);
    assert!(matches!(result, Err(DbmError::Corrupt(_))));
}

#[test]
fn test_header_detects_truncation() {
    let header = Header::new(512);
    let block = header.encode().unwrap();

    let result = Header::decode(&mut Cursor::new(&block[..4]), 4);
    assert!(matches!(result, Err(DbmError::Corrupt(_))));

    let result = Header::decode(&mut Cursor::new(&block[..20]), 20);
    assert!(matches!(result, Err(DbmError::Corrupt(_))));
}

#[test]
fn test_header_rejects_oversized_block_size() {
    // Checksum is valid; only the block size is out of range
    let header = Header::new(MAX_BLOCK_SIZE * 2);
    let block = header.encode().unwrap();

    let result = Header::decode(&mut Cursor::new(&block), block.len() as u64);
    assert!(
        matches!(result, Err(DbmError::Corrupt(ref msg)) if msg.contains("block size")),
        "got {:?}",
        result.map(|h| h.block_size)
    );

    let header = Header::new(MAX_BLOCK_SIZE);
    let block = header.encode().unwrap();
    let decoded = Header::decode(&mut Cursor::new(&block), block.len() as u64).unwrap();
    assert_eq!(decoded.block_size, MAX_BLOCK_SIZE);
}

#[test]
fn test_header_avail_capacity() {
    assert_eq!(Header::avail_capacity(512), 28);
    assert!(Header::avail_capacity(2048) > Header::avail_capacity(512));
}

// =============================================================================
// Open Tests
// =============================================================================

#[test]
fn test_open_new_file_is_fresh() {
    let (_temp, path) = setup_temp_path();

    let (storage, fresh) = StorageFile::open(&config_for(&path), OpenMode::WriteCreate).unwrap();

    assert!(fresh);
    assert!(storage.is_writable());
    assert_eq!(storage.block_size(), 512);
    assert_eq!(storage.header().next_block, 512);
}

#[test]
fn test_open_writer_requires_existing_file() {
    let (_temp, path) = setup_temp_path();

    let result = StorageFile::open(&config_for(&path), OpenMode::Writer);
    assert!(matches!(result, Err(DbmError::FileOpen { .. })));
}

#[test]
fn test_reader_rejects_empty_file() {
    let (_temp, path) = setup_temp_path();
    File::create(&path).unwrap();

    let result = StorageFile::open(&config_for(&path), OpenMode::Reader);
    assert!(matches!(result, Err(DbmError::Corrupt(_))));
}

#[test]
fn test_header_without_directory_is_corrupt() {
    let (_temp, path) = setup_temp_path();
    {
        let (mut storage, _) =
            StorageFile::open(&config_for(&path), OpenMode::WriteCreate).unwrap();
        storage.write_header().unwrap();
    }

    let result = StorageFile::open(&config_for(&path), OpenMode::Writer);
    assert!(matches!(result, Err(DbmError::Corrupt(_))));
}

#[test]
fn test_open_existing_database() {
    let (_temp, path) = setup_temp_path();
    create_database(&path);

    let (storage, fresh) = StorageFile::open(&config_for(&path), OpenMode::Reader).unwrap();

    assert!(!fresh);
    assert!(!storage.is_writable());
    assert_ne!(storage.header().dir_offset, 0);
}

#[test]
fn test_existing_file_keeps_its_block_size() {
    let (_temp, path) = setup_temp_path();
    create_database(&path);

    let config = Config::builder().path(&path).block_size(4096).build();
    let (storage, _) = StorageFile::open(&config, OpenMode::Writer).unwrap();

    assert_eq!(storage.block_size(), 512);
}

#[test]
fn test_newdb_truncates() {
    let (_temp, path) = setup_temp_path();
    create_database(&path);
    assert!(fs::metadata(&path).unwrap().len() > 0);

    let (_storage, fresh) = StorageFile::open(&config_for(&path), OpenMode::NewDb).unwrap();

    assert!(fresh);
    assert_eq!(fs::metadata(&path).unwrap().len(), 0);
}

#[test]
fn test_bad_magic_region_is_corrupt() {
    let (_temp, path) = setup_temp_path();
    create_database(&path);

    let mut file = OpenOptions::new().write(true).open(&path).unwrap();
    file.seek(SeekFrom::Start(8)).unwrap();
    file.write_all(&[0, 0, 0, 0]).unwrap();
    drop(file);

    let result = StorageFile::open(&config_for(&path), OpenMode::Writer);
    assert!(matches!(result, Err(DbmError::Corrupt(_))));
}

// =============================================================================
// Locking Tests
// =============================================================================

#[cfg(unix)]
#[test]
fn test_writer_lock_is_exclusive() {
    let (_temp, path) = setup_temp_path();
    create_database(&path);

    let (_writer, _) = StorageFile::open(&config_for(&path), OpenMode::Writer).unwrap();

    let second = StorageFile::open(&config_for(&path), OpenMode::Writer);
    assert!(matches!(second, Err(DbmError::CannotBeWriter(_))));

    let reader = StorageFile::open(&config_for(&path), OpenMode::Reader);
    assert!(matches!(reader, Err(DbmError::CannotBeReader(_))));
}

#[cfg(unix)]
#[test]
fn test_readers_share_lock() {
    let (_temp, path) = setup_temp_path();
    create_database(&path);

    let (_r1, _) = StorageFile::open(&config_for(&path), OpenMode::Reader).unwrap();
    let (_r2, _) = StorageFile::open(&config_for(&path), OpenMode::Reader).unwrap();

    let writer = StorageFile::open(&config_for(&path), OpenMode::Writer);
    assert!(matches!(writer, Err(ref e) if e.is_lock_contention()));
}

#[test]
fn test_nolock_skips_locking() {
    let (_temp, path) = setup_temp_path();
    create_database(&path);

    let config = Config::builder()
        .path(&path)
        .block_size(512)
        .flags(OpenFlags::NOLOCK)
        .build();
    let (_w1, _) = StorageFile::open(&config, OpenMode::Writer).unwrap();
    let (_w2, _) = StorageFile::open(&config, OpenMode::Writer).unwrap();
}

#[cfg(unix)]
#[test]
fn test_lock_released_on_drop() {
    let (_temp, path) = setup_temp_path();
    create_database(&path);

    {
        let (_writer, _) = StorageFile::open(&config_for(&path), OpenMode::Writer).unwrap();
    }

    assert!(StorageFile::open(&config_for(&path), OpenMode::Writer).is_ok());
}

// =============================================================================
// Allocation Tests
// =============================================================================

#[test]
fn test_allocate_grows_from_frontier() {
    let (_temp, path) = setup_temp_path();
    let (mut storage, _) = StorageFile::open(&config_for(&path), OpenMode::NewDb).unwrap();

    assert_eq!(storage.allocate(100), 512);
    assert_eq!(storage.allocate(100), 612);
    assert_eq!(storage.header().next_block, 712);
}

#[test]
fn test_free_at_tail_shrinks_frontier() {
    let (_temp, path) = setup_temp_path();
    let (mut storage, _) = StorageFile::open(&config_for(&path), OpenMode::NewDb).unwrap();

    let a = storage.allocate(100);
    let b = storage.allocate(100);

    storage.free(a, 100);
    assert_eq!(storage.header().avail.len(), 1);
    assert_eq!(storage.header().next_block, 712);

    // Freeing the tail also swallows the free region right before it
    storage.free(b, 100);
    assert_eq!(storage.header().next_block, 512);
    assert!(storage.header().avail.is_empty());
}

#[test]
fn test_freed_space_is_reused() {
    let (_temp, path) = setup_temp_path();
    let (mut storage, _) = StorageFile::open(&config_for(&path), OpenMode::NewDb).unwrap();

    let a = storage.allocate(100);
    let _b = storage.allocate(100);
    storage.free(a, 100);

    assert_eq!(storage.allocate(80), a);
    assert_eq!(storage.header().avail.free_bytes(), 20);
    assert_eq!(storage.header().next_block, 712);
}

#[test]
fn test_write_then_read() {
    let (_temp, path) = setup_temp_path();
    let (mut storage, _) = StorageFile::open(&config_for(&path), OpenMode::NewDb).unwrap();

    let offset = storage.allocate(11);
    storage.write_at(offset, b"hello world").unwrap();

    assert_eq!(storage.read_at(offset, 11).unwrap(), b"hello world");
    assert_eq!(storage.read_at(offset + 6, 5).unwrap(), b"world");
}

#[test]
fn test_reader_cannot_write() {
    let (_temp, path) = setup_temp_path();
    create_database(&path);

    let (mut storage, _) = StorageFile::open(&config_for(&path), OpenMode::Reader).unwrap();

    assert!(matches!(
        storage.write_at(600, b"nope"),
        Err(DbmError::ReadOnly)
    ));
}

#[test]
fn test_read_past_end_runs_fatal_hook() {
    let (_temp, path) = setup_temp_path();
    let called = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&called);

    let config = Config::builder()
        .path(&path)
        .block_size(512)
        .fatal_hook(move |_| flag.store(true, Ordering::SeqCst))
        .build();
    let (mut storage, _) = StorageFile::open(&config, OpenMode::NewDb).unwrap();

    let err = storage.read_at(10_000, 16).unwrap_err();

    assert!(err.is_fatal());
    assert!(called.load(Ordering::SeqCst));
}

#[test]
fn test_sync_and_truncate_to_frontier() {
    let (_temp, path) = setup_temp_path();
    let (mut storage, _) = StorageFile::open(&config_for(&path), OpenMode::NewDb).unwrap();

    let a = storage.allocate(1000);
    storage.write_at(a, &[7u8; 1000]).unwrap();
    storage.write_header().unwrap();
    storage.sync().unwrap();
    assert_eq!(storage.file_len().unwrap(), 1512);

    storage.free(a, 1000);
    storage.truncate_to_frontier().unwrap();
    assert_eq!(storage.file_len().unwrap(), 512);
}
