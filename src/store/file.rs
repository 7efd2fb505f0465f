//! # File Store
//!
//! Durable bucket store backed by one JSON Lines journal per collection.
//!
//! Every accepted push is appended to `<root>/<collection>.jsonl` and synced
//! before it becomes visible in memory. Opening the store replays every
//! journal in the directory. A line that cannot be parsed is skipped with a
//! warning. A journal whose last line is unterminated (torn by a power cut or
//! a failed write) is truncated back to its last newline before anything is
//! appended to it.
//!
//! Dropping a collection deletes its journal.

use std::collections::HashMap;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::{validate_collection_name, Bucket, BucketStore, Collections, PushOutcome};
use crate::error::{NmeaRollupError, Result};
use crate::nmea::FieldMap;

/// Journal file extension
pub const JOURNAL_EXTENSION: &str = "jsonl";

/// One journal line
#[derive(Debug, Serialize, Deserialize)]
struct JournalEntry {
    id: i64,
    device: u32,
    fields: FieldMap,
}

#[derive(Debug, Default)]
struct FileState {
    collections: Collections,
    journals: HashMap<String, File>,
}

/// Bucket store persisted under a directory
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    state: Mutex<FileState>,
}

impl FileStore {
    /// Open (creating if needed) the store rooted at `root`
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created or listed, or a
    /// journal cannot be read.
    pub async fn open<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).await?;

        let mut collections = Collections::default();
        let mut replayed = 0usize;
        let mut entries = fs::read_dir(&root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(collection) = journal_collection(&path) else {
                continue;
            };
            let bytes = fs::read(&path).await?;
            let committed = committed_len(&bytes);
            if committed < bytes.len() {
                warn!(
                    "Truncating torn tail of {} ({} bytes)",
                    path.display(),
                    bytes.len() - committed
                );
                let journal = OpenOptions::new().write(true).open(&path).await?;
                journal.set_len(committed as u64).await?;
                journal.sync_data().await?;
            }

            let contents = String::from_utf8_lossy(&bytes[..committed]);
            for (line_no, line) in contents.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<JournalEntry>(line) {
                    Ok(e) => {
                        collections.push(&collection, e.id, e.device, &e.fields);
                        replayed += 1;
                    }
                    Err(err) => warn!(
                        "Skipping unreadable journal line {} in {}: {}",
                        line_no + 1,
                        path.display(),
                        err
                    ),
                }
            }
        }

        info!(
            "Opened file store at {} ({} collections, {} entries)",
            root.display(),
            collections.names().len(),
            replayed
        );

        Ok(Self {
            root,
            state: Mutex::new(FileState {
                collections,
                journals: HashMap::new(),
            }),
        })
    }

    fn journal_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{}.{}", collection, JOURNAL_EXTENSION))
    }
}

/// Length of the newline-terminated prefix of a journal
fn committed_len(bytes: &[u8]) -> usize {
    bytes.iter().rposition(|b| *b == b'\n').map_or(0, |i| i + 1)
}

/// Open a journal for appending, cutting any unterminated last line
async fn open_journal(path: &Path) -> io::Result<File> {
    let mut journal = OpenOptions::new()
        .create(true)
        .read(true)
        .append(true)
        .open(path)
        .await?;

    let len = journal.metadata().await?.len();
    if len == 0 {
        return Ok(journal);
    }
    let mut last = [0u8; 1];
    journal.seek(SeekFrom::Start(len - 1)).await?;
    journal.read_exact(&mut last).await?;
    if last[0] != b'\n' {
        journal.seek(SeekFrom::Start(0)).await?;
        let mut bytes = Vec::new();
        journal.read_to_end(&mut bytes).await?;
        let committed = committed_len(&bytes) as u64;
        warn!(
            "Truncating torn tail of {} ({} bytes)",
            path.display(),
            len - committed
        );
        journal.set_len(committed).await?;
    }
    Ok(journal)
}

/// Write one line and make it durable
async fn append_line(journal: &mut File, line: &[u8]) -> io::Result<()> {
    journal.write_all(line).await?;
    journal.flush().await?;
    journal.sync_data().await
}

/// Collection name of a journal file, if `path` is one
fn journal_collection(path: &Path) -> Option<String> {
    if path.extension()?.to_str()? != JOURNAL_EXTENSION {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    validate_collection_name(stem).ok()?;
    Some(stem.to_string())
}

#[async_trait]
impl BucketStore for FileStore {
    async fn ping(&self) -> Result<()> {
        let metadata = fs::metadata(&self.root).await.map_err(|e| {
            NmeaRollupError::Store(format!("{} unreachable: {}", self.root.display(), e))
        })?;
        if !metadata.is_dir() {
            return Err(NmeaRollupError::Store(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().await.collections.names())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.state.lock().await.collections.contains(collection))
    }

    async fn bucket(&self, collection: &str, id: i64) -> Result<Option<Bucket>> {
        Ok(self.state.lock().await.collections.get(collection, id).cloned())
    }

    async fn bucket_exists(&self, collection: &str, id: i64) -> Result<bool> {
        Ok(self.state.lock().await.collections.get(collection, id).is_some())
    }

    async fn push_entry(
        &self,
        collection: &str,
        id: i64,
        device: u32,
        fields: &FieldMap,
    ) -> Result<PushOutcome> {
        validate_collection_name(collection)?;
        let mut state = self.state.lock().await;
        if state.collections.has_device(collection, id, device) {
            return Ok(PushOutcome::Duplicate);
        }

        let mut line = serde_json::to_vec(&JournalEntry {
            id,
            device,
            fields: fields.clone(),
        })?;
        line.push(b'\n');

        // The handle is only cached again once the line is durable
        let mut journal = match state.journals.remove(collection) {
            Some(journal) => journal,
            None => open_journal(&self.journal_path(collection)).await?,
        };
        let committed = journal.metadata().await?.len();
        if let Err(e) = append_line(&mut journal, &line).await {
            if let Err(rollback) = journal.set_len(committed).await {
                warn!(
                    "Could not roll back {} journal to {} bytes: {}",
                    collection, committed, rollback
                );
            }
            return Err(e.into());
        }
        state.journals.insert(collection.to_string(), journal);

        let outcome = state.collections.push(collection, id, device, fields);
        debug!("{}/{} device {}: {:?}", collection, id, device, outcome);
        Ok(outcome)
    }

    async fn range(&self, collection: &str, start: i64, end: i64) -> Result<Vec<Bucket>> {
        Ok(self.state.lock().await.collections.range(collection, start, end))
    }

    async fn first_id(&self, collection: &str) -> Result<Option<i64>> {
        Ok(self.state.lock().await.collections.first_id(collection))
    }

    async fn last_id(&self, collection: &str) -> Result<Option<i64>> {
        Ok(self.state.lock().await.collections.last_id(collection))
    }

    async fn drop_collection(&self, collection: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.journals.remove(collection);
        let existed = state.collections.remove(collection);

        if validate_collection_name(collection).is_ok() {
            match fs::remove_file(self.journal_path(collection)).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(existed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn reading(device: u32, temperature: f64) -> FieldMap {
        let mut fields = FieldMap::new();
        fields.insert("deviceid".to_string(), device as f64);
        fields.insert("temperature".to_string(), temperature);
        fields
    }

    #[tokio::test]
    async fn test_push_survives_reopen() {
        let dir = TempDir::new().unwrap();

        {
            let store = FileStore::open(dir.path()).await.unwrap();
            store.push_entry("PAD", 100, 1, &reading(1, 20.0)).await.unwrap();
            store.push_entry("PAD", 100, 2, &reading(2, 22.0)).await.unwrap();
            store.push_entry("PAD", 101, 1, &reading(1, 21.0)).await.unwrap();
            store.push_entry("RMC", 100, 65_536, &reading(65_536, 0.0)).await.unwrap();
        }

        let store = FileStore::open(dir.path()).await.unwrap();
        let mut names = store.list_collections().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["PAD".to_string(), "RMC".to_string()]);

        let bucket = store.bucket("PAD", 100).await.unwrap().unwrap();
        assert_eq!(bucket.devices, vec![1, 2]);
        assert_eq!(bucket.data[1]["temperature"], 22.0);
        assert_eq!(store.first_id("PAD").await.unwrap(), Some(100));
        assert_eq!(store.last_id("PAD").await.unwrap(), Some(101));
    }

    #[tokio::test]
    async fn test_duplicate_is_not_journaled() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();

        assert_eq!(
            store.push_entry("PAD", 1, 1, &reading(1, 1.0)).await.unwrap(),
            PushOutcome::Created
        );
        assert_eq!(
            store.push_entry("PAD", 1, 1, &reading(1, 2.0)).await.unwrap(),
            PushOutcome::Duplicate
        );

        let journal = std::fs::read_to_string(dir.path().join("PAD.jsonl")).unwrap();
        assert_eq!(journal.lines().count(), 1);
    }

    #[tokio::test]
    async fn test_torn_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("PAD.jsonl"),
            "{\"id\":5,\"device\":1,\"fields\":{\"temperature\":3.0}}\n{\"id\":6,\"dev",
        )
        .unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        assert!(store.bucket_exists("PAD", 5).await.unwrap());
        assert!(!store.bucket_exists("PAD", 6).await.unwrap());
    }

    #[tokio::test]
    async fn test_push_after_torn_tail_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("PAD.jsonl");
        std::fs::write(
            &path,
            "{\"id\":5,\"device\":1,\"fields\":{\"temperature\":3.0}}\n{\"id\":6,\"dev",
        )
        .unwrap();

        {
            let store = FileStore::open(dir.path()).await.unwrap();
            assert_eq!(
                store.push_entry("PAD", 7, 1, &reading(1, 4.0)).await.unwrap(),
                PushOutcome::Created
            );
        }

        let journal = std::fs::read_to_string(&path).unwrap();
        assert!(journal.ends_with('\n'));
        assert_eq!(journal.lines().count(), 2);

        let store = FileStore::open(dir.path()).await.unwrap();
        assert!(store.bucket_exists("PAD", 5).await.unwrap());
        assert!(!store.bucket_exists("PAD", 6).await.unwrap());
        assert_eq!(store.bucket("PAD", 7).await.unwrap().unwrap().data[0]["temperature"], 4.0);
    }

    #[tokio::test]
    async fn test_journal_torn_after_open_is_repaired_on_append() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("PAD.jsonl");
        let store = FileStore::open(dir.path()).await.unwrap();

        // Left behind by a write that failed before its rollback could run
        std::fs::write(&path, "{\"id\":1,\"device\":1,\"fields\":{}}\n{\"id\":2,").unwrap();
        store.push_entry("PAD", 3, 1, &reading(1, 1.0)).await.unwrap();

        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert!(reopened.bucket_exists("PAD", 1).await.unwrap());
        assert!(reopened.bucket_exists("PAD", 3).await.unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().count(), 2);
    }

    #[test]
    fn test_committed_len() {
        assert_eq!(committed_len(b""), 0);
        assert_eq!(committed_len(b"{\"id\""), 0);
        assert_eq!(committed_len(b"a\nb\n"), 4);
        assert_eq!(committed_len(b"a\nb"), 2);
    }

    #[tokio::test]
    async fn test_ignores_foreign_files() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("notes.txt"), "hello").unwrap();
        std::fs::write(dir.path().join("bad name.jsonl"), "").unwrap();

        let store = FileStore::open(dir.path()).await.unwrap();
        assert!(store.list_collections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_drop_collection_removes_journal() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).await.unwrap();
        store.push_entry("PADminutes", 1, 1, &reading(1, 1.0)).await.unwrap();
        assert!(dir.path().join("PADminutes.jsonl").exists());

        assert!(store.drop_collection("PADminutes").await.unwrap());
        assert!(!dir.path().join("PADminutes.jsonl").exists());
        assert!(!store.collection_exists("PADminutes").await.unwrap());

        // Writing again recreates the journal
        store.push_entry("PADminutes", 2, 1, &reading(1, 1.0)).await.unwrap();
        let reopened = FileStore::open(dir.path()).await.unwrap();
        assert_eq!(reopened.first_id("PADminutes").await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_ping_fails_when_directory_removed() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("store");
        let store = FileStore::open(&root).await.unwrap();
        tokio_test::assert_ok!(store.ping().await);

        std::fs::remove_dir_all(&root).unwrap();
        tokio_test::assert_err!(store.ping().await);
    }
}
