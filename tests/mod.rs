use std::fs::File;
use std::io::{Read, Write};

use tempfile::NamedTempFile;
use winmap::{FileKey, Manager, SlidingBuffer, StaticManager};

/// `_window_test_size` from `examples/original_source/smmap/test/test_mman.py`:
/// `1000 * 1000 * 8 + 5195`.
const WINDOW_TEST_SIZE: usize = 1_000 * 1_000 * 8 + 5195;

/// Writes a file of `size` bytes, each byte the low 8 bits of its offset, so
/// any slice read back can be checked against its expected content without
/// keeping the whole file in memory twice.
struct FileCreator {
    file: NamedTempFile,
    size: usize,
}

impl FileCreator {
    fn new(size: usize) -> Self {
        let mut file = NamedTempFile::new().unwrap();
        let chunk: Vec<u8> = (0..65536usize).map(|i| i as u8).collect();
        let mut written = 0;
        while written < size {
            let take = chunk.len().min(size - written);
            file.write_all(&chunk[..take]).unwrap();
            written += take;
        }
        file.flush().unwrap();
        Self { file, size }
    }

    fn read_direct(&self, start: usize, end: usize) -> Vec<u8> {
        let mut f = File::open(self.file.path()).unwrap();
        let mut buf = vec![0u8; end - start];
        std::io::Seek::seek(&mut f, std::io::SeekFrom::Start(start as u64)).unwrap();
        f.read_exact(&mut buf).unwrap();
        buf
    }

    fn key(&self) -> FileKey {
        FileKey::from_path(self.file.path())
    }
}

#[test]
fn cursor_basic_use_region() {
    let fc = FileCreator::new(10_000);
    let manager = Manager::new(0, 0, 0);
    let mut cursor = manager.make_cursor(fc.key()).unwrap();

    cursor.use_region(10, 10).unwrap();
    assert!(cursor.is_valid());
    assert_eq!(cursor.ofs_begin().unwrap(), 10);
    assert_eq!(cursor.size(), 10);
    assert_eq!(cursor.buffer().unwrap(), &fc.read_direct(10, 20)[..]);
}

#[test]
fn cursor_reuses_region_when_covered() {
    let fc = FileCreator::new(WINDOW_TEST_SIZE);
    let window_size = 80_051;
    let manager = Manager::new(window_size, WINDOW_TEST_SIZE / 3, 15);
    let mut cursor = manager.make_cursor(fc.key()).unwrap();

    cursor.use_region(5000, window_size / 2).unwrap();
    assert_eq!(manager.num_file_handles(), 1);

    cursor.use_region(0, window_size / 2 - 10).unwrap();
    assert_eq!(manager.num_file_handles(), 1, "must reuse the same region");
    assert_eq!(cursor.ofs_begin().unwrap(), 0);
    assert_eq!(cursor.size(), window_size / 2 - 10);
}

#[test]
fn cursor_allocates_new_region_near_eof() {
    let fc = FileCreator::new(WINDOW_TEST_SIZE);
    let window_size = 80_051;
    let manager = Manager::new(window_size, WINDOW_TEST_SIZE / 3, 15);
    let mut cursor = manager.make_cursor(fc.key()).unwrap();

    cursor.use_region(5000, window_size / 2).unwrap();
    let offset = WINDOW_TEST_SIZE - window_size / 2 + 4000;
    cursor.use_region(offset, window_size / 2).unwrap();

    assert!(cursor.is_valid());
    assert!(cursor.size() < window_size / 2, "clipped to EOF");
    assert_eq!(cursor.ofs_end().unwrap(), WINDOW_TEST_SIZE);
}

#[test]
fn use_region_at_or_past_eof() {
    let fc = FileCreator::new(1000);
    let manager = Manager::new(0, 0, 0);
    let mut cursor = manager.make_cursor(fc.key()).unwrap();

    cursor.use_region(1000, 1).unwrap();
    assert!(!cursor.is_valid());
    assert!(cursor.is_associated());

    cursor.use_region(999, 1).unwrap();
    assert!(cursor.is_valid());
    assert_eq!(cursor.size(), 1);
}

#[test]
fn random_walk_respects_budgets_and_reads_match_direct() {
    use std::time::{SystemTime, UNIX_EPOCH};

    let fc = FileCreator::new(WINDOW_TEST_SIZE);
    let window_size = 80_051;
    let max_memory = WINDOW_TEST_SIZE / 3;
    let max_handles = 15;
    let manager = Manager::new(window_size, max_memory, max_handles);
    let mut cursor = manager.make_cursor(fc.key()).unwrap();

    // Deterministic xorshift seeded from the clock; no external `rand`
    // dependency needed for a bounded walk like this.
    let mut state = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .subsec_nanos() as u64
        | 1;
    let mut next = move || {
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        state
    };

    for _ in 0..5000 {
        let offset = (next() as usize) % WINDOW_TEST_SIZE;
        let size = window_size / 2;

        cursor.use_region(offset, size).unwrap();
        assert!(manager.mapped_memory_size() <= max_memory);
        assert!(manager.num_file_handles() <= max_handles);

        if cursor.is_valid() {
            let begin = cursor.ofs_begin().unwrap();
            let end = cursor.ofs_end().unwrap();
            assert_eq!(cursor.buffer().unwrap(), &fc.read_direct(begin, end)[..]);
        }
    }

    drop(cursor);
    let freed = manager.collect();
    assert!(freed > 0 || manager.num_file_handles() == 0);
    assert_eq!(manager.num_file_handles(), 0);
    assert_eq!(manager.collect(), 0, "collect is idempotent once drained");
}

#[test]
fn sliding_buffer_matches_direct_reads() {
    let fc = FileCreator::new(WINDOW_TEST_SIZE);
    let manager = Manager::new(80_051, WINDOW_TEST_SIZE / 3, 15);
    let cursor = manager.make_cursor(fc.key()).unwrap();

    let mut buf = SlidingBuffer::new(cursor, 100, None).unwrap();
    let _guard = buf.scoped_guard();

    assert_eq!(buf.len(), WINDOW_TEST_SIZE - 100);
    assert_eq!(buf.get(0).unwrap(), fc.read_direct(100, 101)[0]);

    let direct = fc.read_direct(100, 200);
    assert_eq!(buf.slice(0, Some(100)).unwrap(), direct);

    let tail_direct = fc.read_direct(WINDOW_TEST_SIZE - 10, WINDOW_TEST_SIZE);
    assert_eq!(buf.slice(-10, None).unwrap(), tail_direct);
}

#[test]
fn sliding_buffer_negative_index_matches_len_minus_k() {
    let fc = FileCreator::new(10_000);
    let manager = Manager::new(0, 0, 0);
    let cursor = manager.make_cursor(fc.key()).unwrap();
    let mut buf = SlidingBuffer::new(cursor, 0, None).unwrap();
    let _guard = buf.scoped_guard();

    for k in 1..=50isize {
        assert_eq!(
            buf.get(-k).unwrap(),
            buf.get(buf.len() as isize - k).unwrap()
        );
    }
}

#[test]
fn sliding_buffer_fails_outside_entered_scope() {
    let fc = FileCreator::new(1000);
    let manager = Manager::new(0, 0, 0);
    let cursor = manager.make_cursor(fc.key()).unwrap();
    let mut buf = SlidingBuffer::new(cursor, 0, None).unwrap();
    assert!(buf.get(0).is_err());
}

#[test]
fn collect_is_idempotent_when_unheld() {
    let fc = FileCreator::new(10_000);
    let manager = Manager::new(1000, 0, 0);
    let mut cursor = manager.make_cursor(fc.key()).unwrap();
    cursor.use_region(0, 500).unwrap();
    cursor.unuse_region();

    let freed = manager.collect();
    assert_eq!(freed, 1);
    assert_eq!(manager.collect(), 0);
}

#[test]
fn static_manager_maps_whole_file_once() {
    let fc = FileCreator::new(50_000);
    let manager = StaticManager::new(0);
    let mut cursor = manager.make_cursor(fc.key()).unwrap();

    cursor.use_region(0, 10).unwrap();
    assert_eq!(cursor.size(), 10);
    assert_eq!(manager.num_file_handles(), 1);

    cursor.use_region(40_000, 10).unwrap();
    assert_eq!(manager.num_file_handles(), 1, "still a single whole-file region");
    assert_eq!(manager.collect(), 0, "static manager never evicts");
}

#[test]
fn file_smaller_than_one_page_maps_fully() {
    let fc = FileCreator::new(100);
    let manager = Manager::new(0, 0, 0);
    let mut cursor = manager.make_cursor(fc.key()).unwrap();
    cursor.use_region(0, 100).unwrap();
    assert_eq!(cursor.size(), 100);
    assert_eq!(cursor.buffer().unwrap(), &fc.read_direct(0, 100)[..]);
}
