//! Storage engine implementation
//!
//! One file per named store (`<name>.offc`): a header carrying the number of
//! committed records, followed by appended records. Batches are appended and
//! flushed before the header count is bumped, so a crash mid-batch leaves
//! only bytes past the committed count, which `open` truncates away.

use std::collections::{HashMap, HashSet};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use ahash::RandomState;
use memmap2::Mmap;
use parking_lot::RwLock;

use crate::entry::{RequestKey, Response};
use crate::error::{Error, Result};
use crate::parser::{
    create_header, encode_record, parse_header, parse_record, ENTRY_COUNT_OFFSET, FORMAT_VERSION,
    HEADER_LEN, OFFC_MAGIC,
};

/// Maximum response body size (64 MB)
const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

/// Maximum store file size (1 GB)
const MAX_STORE_SIZE: u64 = 1024 * 1024 * 1024;

/// Location of one record inside the mapped file
#[derive(Debug, Clone, Copy)]
struct Span {
    offset: usize,
    len: usize,
}

#[derive(Debug, Clone, Copy)]
struct Committed {
    len: u64,
    entries: u32,
}

/// CacheStore is a handle to one named store file
pub struct CacheStore {
    /// Store name
    name: String,

    /// Path to the store file
    path: PathBuf,

    /// Store file handle, used for writes only
    file: RwLock<File>,

    /// Read-only mapping of the committed part of the file
    map: RwLock<Mmap>,

    /// In-memory index: request -> record span
    index: RwLock<HashMap<RequestKey, Span, RandomState>>,

    /// Committed length and record count
    committed: RwLock<Committed>,

    /// Is the store closed?
    closed: RwLock<bool>,
}

impl CacheStore {
    /// Open or create a store file at the given path
    ///
    /// # Arguments
    /// * `path` - Store file path
    /// * `name` - Store name, reported back by [`CacheStore::name`]
    ///
    /// # Returns
    /// * `Result<CacheStore>` - Store handle
    pub fn open<P: AsRef<Path>>(path: P, name: &str) -> Result<Self> {
        let path = path.as_ref();

        let mut file = if path.exists() {
            OpenOptions::new().read(true).write(true).open(path)?
        } else {
            Self::create_new(path)?
        };

        // A crash inside create_new leaves an empty or partial header.
        if Self::header_unfinished(&mut file)? {
            Self::write_empty_header(&mut file)?;
        }

        let mut map = Self::map_file(&file)?;
        let (index, committed) = Self::load_index(&map)?;

        // Drop whatever a torn batch left past the committed records.
        if map.len() as u64 > committed.len {
            drop(map);
            file.set_len(committed.len)?;
            file.sync_all()?;
            map = Self::map_file(&file)?;
        }

        Ok(CacheStore {
            name: name.to_string(),
            path: path.to_path_buf(),
            file: RwLock::new(file),
            map: RwLock::new(map),
            index: RwLock::new(index),
            committed: RwLock::new(committed),
            closed: RwLock::new(false),
        })
    }

    fn create_new(path: &Path) -> Result<File> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;

        Self::write_empty_header(&mut file)?;
        Ok(file)
    }

    fn write_empty_header(file: &mut File) -> Result<()> {
        file.set_len(0)?;
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&create_header(FORMAT_VERSION, 0))?;
        file.sync_all()?;
        Ok(())
    }

    /// Shorter than a header and, as far as it goes, matching the magic
    fn header_unfinished(file: &mut File) -> Result<bool> {
        if file.metadata()?.len() >= HEADER_LEN as u64 {
            return Ok(false);
        }

        let mut data = Vec::with_capacity(HEADER_LEN);
        file.seek(SeekFrom::Start(0))?;
        file.read_to_end(&mut data)?;

        let n = data.len().min(OFFC_MAGIC.len());
        Ok(data[..n] == OFFC_MAGIC[..n])
    }

    fn map_file(file: &File) -> Result<Mmap> {
        // SAFETY: the file is only written through this handle, with the
        // mapping write-locked; shrinking happens with the mapping dropped.
        let map = unsafe { Mmap::map(file)? };
        Ok(map)
    }

    fn load_index(data: &[u8]) -> Result<(HashMap<RequestKey, Span, RandomState>, Committed)> {
        let header = parse_header(data)?;
        if header.version != FORMAT_VERSION {
            return Err(Error::Parse(format!(
                "Unsupported store version {}",
                header.version
            )));
        }

        let mut index = HashMap::with_hasher(RandomState::new());
        let mut rest = &data[HEADER_LEN..];

        for _ in 0..header.entry_count {
            let offset = data.len() - rest.len();
            let (next, (key, _)) = parse_record(rest)?;
            let len = rest.len() - next.len();

            // Later records for the same request win.
            index.insert(key, Span { offset, len });
            rest = next;
        }

        let committed = Committed {
            len: (data.len() - rest.len()) as u64,
            entries: header.entry_count,
        };

        Ok((index, committed))
    }

    /// Look up the stored response for a request
    ///
    /// Non-GET requests never match.
    pub fn match_request(&self, key: &RequestKey) -> Result<Option<Response>> {
        if *self.closed.read() {
            return Err(Error::Closed);
        }

        if !key.is_get() {
            return Ok(None);
        }

        let span = match self.index.read().get(key) {
            Some(span) => *span,
            None => return Ok(None),
        };

        // The map is swapped before the index, so any span is inside it.
        let map = self.map.read();
        let (_, (_, response)) = parse_record(&map[span.offset..span.offset + span.len])?;

        Ok(Some(response))
    }

    /// Store a batch of responses, all or nothing
    ///
    /// The batch is rejected before anything is written if it holds a non-GET
    /// request, a body over the size limit, or the same request twice.
    pub fn put_all(&self, entries: Vec<(RequestKey, Response)>) -> Result<()> {
        if *self.closed.read() {
            return Err(Error::Closed);
        }

        if entries.is_empty() {
            return Ok(());
        }

        let mut seen = HashSet::with_hasher(RandomState::new());
        let mut batch = Vec::new();
        let mut spans = Vec::with_capacity(entries.len());

        for (key, response) in &entries {
            if !key.is_get() {
                return Err(Error::UnsupportedMethod(key.method().to_string()));
            }
            if response.body.len() > MAX_BODY_SIZE {
                return Err(Error::ValueTooLarge(response.body.len()));
            }
            if !seen.insert(key) {
                return Err(Error::DuplicateKey(key.to_string()));
            }

            let start = batch.len();
            encode_record(&mut batch, key, response);
            spans.push((start, batch.len() - start));
        }

        let mut file = self.file.write();
        let mut committed = self.committed.write();

        let new_len = committed.len + batch.len() as u64;
        if new_len > MAX_STORE_SIZE {
            return Err(Error::StoreFull(committed.len));
        }
        let new_entries = u32::try_from(entries.len())
            .ok()
            .and_then(|n| committed.entries.checked_add(n))
            .ok_or(Error::StoreFull(committed.len))?;

        let mut map = self.map.write();
        let remapped = match Self::commit(&mut file, committed.len, &batch, new_entries) {
            Ok(remapped) => remapped,
            Err(e) => {
                // Readers keep the old mapping; put the file back under it.
                if let Err(rollback) = Self::rollback(&mut file, *committed) {
                    *self.closed.write() = true;
                    return Err(Error::RollbackFailed {
                        error: Box::new(e),
                        rollback,
                    });
                }
                return Err(e);
            }
        };

        let base = committed.len as usize;
        *committed = Committed {
            len: new_len,
            entries: new_entries,
        };

        *map = remapped;
        drop(map);

        let mut index = self.index.write();
        for ((key, _), (start, len)) in entries.into_iter().zip(spans) {
            index.insert(
                key,
                Span {
                    offset: base + start,
                    len,
                },
            );
        }

        Ok(())
    }

    /// Append the batch, map it, then publish the new count
    ///
    /// Nothing is committed until the header write, so every earlier failure
    /// is undone by [`CacheStore::rollback`].
    fn commit(file: &mut File, at: u64, batch: &[u8], entry_count: u32) -> Result<Mmap> {
        file.seek(SeekFrom::Start(at))?;
        file.write_all(batch)?;
        file.sync_data()?;

        let map = Self::map_file(file)?;

        file.seek(SeekFrom::Start(ENTRY_COUNT_OFFSET))?;
        file.write_all(&entry_count.to_le_bytes())?;
        file.sync_data()?;

        Ok(map)
    }

    fn rollback(file: &mut File, committed: Committed) -> io::Result<()> {
        file.seek(SeekFrom::Start(ENTRY_COUNT_OFFSET))?;
        file.write_all(&committed.entries.to_le_bytes())?;
        file.set_len(committed.len)?;
        file.sync_all()
    }

    /// Stored requests, in the order they were written
    pub fn keys(&self) -> Vec<RequestKey> {
        let index = self.index.read();
        let mut keys: Vec<_> = index.iter().map(|(k, s)| (s.offset, k.clone())).collect();
        keys.sort_by_key(|(offset, _)| *offset);
        keys.into_iter().map(|(_, k)| k).collect()
    }

    /// Store name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Committed size of the store file in bytes
    pub fn size_bytes(&self) -> u64 {
        self.committed.read().len
    }

    /// Get the number of distinct stored requests
    pub fn len(&self) -> usize {
        self.index.read().len()
    }

    /// Check if the store is empty
    pub fn is_empty(&self) -> bool {
        self.index.read().is_empty()
    }

    /// Close the store and fsync
    pub fn close(&self) -> Result<()> {
        if *self.closed.read() {
            return Ok(());
        }

        self.file.read().sync_all()?;
        *self.closed.write() = true;

        Ok(())
    }
}

impl Drop for CacheStore {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn seed(path: &str, body: &str) -> (RequestKey, Response) {
        let key = RequestKey::get(&format!("http://localhost:8000{}", path));
        (key, Response::new(200, body).with_header("Content-Type", "text/plain"))
    }

    #[test]
    fn test_create_and_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.offc");

        let store = CacheStore::open(&path, "test").unwrap();
        assert_eq!(store.len(), 0);
        assert!(store.is_empty());
        assert_eq!(store.name(), "test");
        assert_eq!(store.size_bytes(), HEADER_LEN as u64);
        store.close().unwrap();

        // Reopen
        let store = CacheStore::open(&path, "test").unwrap();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn test_put_all_and_match() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("test.offc"), "test").unwrap();

        let (key, response) = seed("/static/js/main.js", "console.log('hi');");
        store.put_all(vec![(key.clone(), response.clone())]).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.match_request(&key).unwrap(), Some(response));
    }

    #[test]
    fn test_match_miss() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("test.offc"), "test").unwrap();

        let key = RequestKey::get("http://localhost:8000/missing");
        assert_eq!(store.match_request(&key).unwrap(), None);
    }

    #[test]
    fn test_match_ignores_non_get() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("test.offc"), "test").unwrap();

        let (key, response) = seed("/", "<html></html>");
        store.put_all(vec![(key.clone(), response)]).unwrap();

        let head = RequestKey::new("HEAD", key.url());
        assert_eq!(store.match_request(&head).unwrap(), None);
    }

    #[test]
    fn test_match_ignores_fragment() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("test.offc"), "test").unwrap();

        let (key, response) = seed("/", "<html></html>");
        store.put_all(vec![(key, response.clone())]).unwrap();

        let with_fragment = RequestKey::get("http://localhost:8000/#top");
        assert_eq!(store.match_request(&with_fragment).unwrap(), Some(response));
    }

    #[test]
    fn test_duplicate_key_rejects_whole_batch() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("test.offc"), "test").unwrap();

        let batch = vec![
            seed("/", "a"),
            seed("/static/css/style.css", "b"),
            seed("/", "c"),
        ];
        let result = store.put_all(batch);

        assert!(matches!(result, Err(Error::DuplicateKey(_))));
        assert!(store.is_empty());
        assert_eq!(store.size_bytes(), HEADER_LEN as u64);
    }

    #[test]
    fn test_non_get_rejects_whole_batch() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("test.offc"), "test").unwrap();

        let post = RequestKey::new("POST", "http://localhost:8000/form");
        let result = store.put_all(vec![seed("/", "a"), (post, Response::new(200, "ok"))]);

        assert!(matches!(result, Err(Error::UnsupportedMethod(m)) if m == "POST"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_value_too_large() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("test.offc"), "test").unwrap();

        let key = RequestKey::get("http://localhost:8000/big.bin");
        let big = Response::new(200, vec![b'x'; MAX_BODY_SIZE + 1]);
        let result = store.put_all(vec![(key, big)]);

        assert!(matches!(result, Err(Error::ValueTooLarge(_))));
    }

    #[test]
    fn test_later_batch_overrides() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("test.offc"), "test").unwrap();

        let (key, first) = seed("/", "v1");
        store.put_all(vec![(key.clone(), first)]).unwrap();
        let (_, second) = seed("/", "v2");
        store.put_all(vec![(key.clone(), second.clone())]).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.match_request(&key).unwrap(), Some(second));
    }

    #[test]
    fn test_keys_in_write_order() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("test.offc"), "test").unwrap();

        let batch = vec![
            seed("/", "a"),
            seed("/static/css/style.css", "b"),
            seed("/static/js/main.js", "c"),
        ];
        let expected: Vec<_> = batch.iter().map(|(k, _)| k.clone()).collect();
        store.put_all(batch).unwrap();

        assert_eq!(store.keys(), expected);
    }

    #[test]
    fn test_persistence() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.offc");

        let (key, response) = seed("/static/img/logo.png", "\u{89}PNG");

        // Write data
        {
            let store = CacheStore::open(&path, "test").unwrap();
            store.put_all(vec![(key.clone(), response.clone())]).unwrap();
            store.close().unwrap();
        }

        // Reopen and verify
        {
            let store = CacheStore::open(&path, "test").unwrap();
            assert_eq!(store.len(), 1);
            assert_eq!(store.match_request(&key).unwrap(), Some(response));
        }
    }

    #[test]
    fn test_torn_batch_discarded_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.offc");

        let (key, response) = seed("/", "<html></html>");
        let committed_len = {
            let store = CacheStore::open(&path, "test").unwrap();
            store.put_all(vec![(key.clone(), response.clone())]).unwrap();
            store.size_bytes()
        };

        // Simulate a crash after appending records but before the header update.
        let mut torn = Vec::new();
        let (other, other_resp) = seed("/static/js/main.js", "partial");
        encode_record(&mut torn, &other, &other_resp);
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(&torn).unwrap();
        drop(file);

        let store = CacheStore::open(&path, "test").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.match_request(&other).unwrap(), None);
        assert_eq!(store.match_request(&key).unwrap(), Some(response));
        assert_eq!(fs::metadata(&path).unwrap().len(), committed_len);
    }

    #[test]
    fn test_corrupt_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.offc");
        fs::write(&path, b"not a store file").unwrap();

        assert!(matches!(CacheStore::open(&path, "test"), Err(Error::Parse(_))));
    }

    #[test]
    fn test_unfinished_header_starts_fresh() {
        let dir = TempDir::new().unwrap();

        for (i, partial) in [&b""[..], &b"OFFC0"[..], &b"OFFC001\n\x01\x00"[..]].into_iter().enumerate() {
            let path = dir.path().join(format!("partial{}.offc", i));
            fs::write(&path, partial).unwrap();

            let store = CacheStore::open(&path, "partial").unwrap();
            assert!(store.is_empty());
            store.put_all(vec![seed("/", "a")]).unwrap();
            drop(store);

            let store = CacheStore::open(&path, "partial").unwrap();
            assert_eq!(store.len(), 1);
        }
    }

    #[test]
    fn test_short_foreign_file_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.offc");
        fs::write(&path, b"junk").unwrap();

        assert!(matches!(CacheStore::open(&path, "test"), Err(Error::Parse(_))));
        assert_eq!(fs::read(&path).unwrap(), b"junk");
    }

    #[test]
    fn test_rollback_restores_committed_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.offc");

        let (key, response) = seed("/", "<html></html>");
        let store = CacheStore::open(&path, "test").unwrap();
        store.put_all(vec![(key.clone(), response.clone())]).unwrap();
        let committed = *store.committed.read();

        // A batch that got as far as its header write before failing.
        {
            let mut file = store.file.write();
            let mut batch = Vec::new();
            let (other, other_resp) = seed("/static/js/main.js", "init();");
            encode_record(&mut batch, &other, &other_resp);
            file.seek(SeekFrom::Start(committed.len)).unwrap();
            file.write_all(&batch).unwrap();
            file.seek(SeekFrom::Start(ENTRY_COUNT_OFFSET)).unwrap();
            file.write_all(&(committed.entries + 1).to_le_bytes()).unwrap();

            CacheStore::rollback(&mut file, committed).unwrap();
        }
        drop(store);

        assert_eq!(fs::metadata(&path).unwrap().len(), committed.len);
        let store = CacheStore::open(&path, "test").unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.match_request(&key).unwrap(), Some(response));
    }

    #[test]
    fn test_close_twice() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("test.offc"), "test").unwrap();

        store.close().unwrap();
        store.close().unwrap(); // Should not error
    }

    #[test]
    fn test_put_after_close() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open(dir.path().join("test.offc"), "test").unwrap();

        store.close().unwrap();

        assert!(matches!(store.put_all(vec![seed("/", "a")]), Err(Error::Closed)));
        let key = RequestKey::get("http://localhost:8000/");
        assert!(matches!(store.match_request(&key), Err(Error::Closed)));
    }
}
