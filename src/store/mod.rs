//! # Bucket Store Module
//!
//! Persistence contract for time-bucketed readings.
//!
//! A collection holds buckets keyed by an integer id: a second for raw
//! collections, an interval-aligned index for rollup collections. Each bucket
//! records which devices contributed (`devices`) and one field map per
//! contribution (`data`).
//!
//! The only mutation is [`BucketStore::push_entry`], an atomic
//! "create if absent, append unless this device is already present". Doing
//! existence check, creation and append in one step keeps duplicate
//! suppression correct when writes for the same second run concurrently.

pub mod file;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::config::{StoreConfig, StoreKind};
use crate::error::{NmeaRollupError, Result};
use crate::nmea::FieldMap;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Longest accepted collection name
pub const MAX_COLLECTION_NAME_LEN: usize = 64;

/// One persisted bucket
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bucket {
    /// Second (raw) or interval index (rollup)
    pub id: i64,
    /// Devices that contributed, each at most once
    pub devices: Vec<u32>,
    /// One field map per contribution, in write order
    pub data: Vec<FieldMap>,
}

impl Bucket {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    pub fn has_device(&self, device: u32) -> bool {
        self.devices.contains(&device)
    }
}

/// Result of [`BucketStore::push_entry`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Bucket did not exist and was created with this entry
    Created,
    /// Entry appended to an existing bucket
    Appended,
    /// Device already present in the bucket, nothing written
    Duplicate,
}

impl PushOutcome {
    pub fn is_written(self) -> bool {
        !matches!(self, PushOutcome::Duplicate)
    }
}

/// Operations the engine needs from a document store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BucketStore: Send + Sync {
    /// Check the store is reachable
    async fn ping(&self) -> Result<()>;

    /// Names of every existing collection
    async fn list_collections(&self) -> Result<Vec<String>>;

    async fn collection_exists(&self, collection: &str) -> Result<bool>;

    /// Point lookup by id
    async fn bucket(&self, collection: &str, id: i64) -> Result<Option<Bucket>>;

    async fn bucket_exists(&self, collection: &str, id: i64) -> Result<bool>;

    /// Create the bucket if missing and append `fields` unless `device`
    /// already contributed to it
    async fn push_entry(
        &self,
        collection: &str,
        id: i64,
        device: u32,
        fields: &FieldMap,
    ) -> Result<PushOutcome>;

    /// Buckets with `start <= id < end`, ascending
    async fn range(&self, collection: &str, start: i64, end: i64) -> Result<Vec<Bucket>>;

    /// Smallest bucket id in the collection
    async fn first_id(&self, collection: &str) -> Result<Option<i64>>;

    /// Largest bucket id in the collection
    async fn last_id(&self, collection: &str) -> Result<Option<i64>>;

    /// Remove a collection and all its buckets; false if it did not exist
    async fn drop_collection(&self, collection: &str) -> Result<bool>;
}

/// Reject names that cannot serve as a collection key
///
/// Names double as journal file stems, so only ASCII alphanumerics, `-`
/// and `_` are accepted.
pub fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && name.len() <= MAX_COLLECTION_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(NmeaRollupError::CollectionName(name.to_string()))
    }
}

/// In-memory collection state shared by the store backends
#[derive(Debug, Default)]
pub(crate) struct Collections {
    inner: BTreeMap<String, BTreeMap<i64, Bucket>>,
}

impl Collections {
    pub(crate) fn names(&self) -> Vec<String> {
        self.inner.keys().cloned().collect()
    }

    pub(crate) fn contains(&self, collection: &str) -> bool {
        self.inner.contains_key(collection)
    }

    pub(crate) fn get(&self, collection: &str, id: i64) -> Option<&Bucket> {
        self.inner.get(collection)?.get(&id)
    }

    pub(crate) fn has_device(&self, collection: &str, id: i64, device: u32) -> bool {
        self.get(collection, id)
            .is_some_and(|bucket| bucket.has_device(device))
    }

    pub(crate) fn push(
        &mut self,
        collection: &str,
        id: i64,
        device: u32,
        fields: &FieldMap,
    ) -> PushOutcome {
        let buckets = self.inner.entry(collection.to_string()).or_default();
        let mut outcome = PushOutcome::Appended;
        let bucket = buckets.entry(id).or_insert_with(|| {
            outcome = PushOutcome::Created;
            Bucket::new(id)
        });
        if bucket.has_device(device) {
            return PushOutcome::Duplicate;
        }
        bucket.devices.push(device);
        bucket.data.push(fields.clone());
        outcome
    }

    pub(crate) fn range(&self, collection: &str, start: i64, end: i64) -> Vec<Bucket> {
        if start >= end {
            return Vec::new();
        }
        self.inner
            .get(collection)
            .map(|buckets| buckets.range(start..end).map(|(_, b)| b.clone()).collect())
            .unwrap_or_default()
    }

    pub(crate) fn first_id(&self, collection: &str) -> Option<i64> {
        self.inner.get(collection)?.keys().next().copied()
    }

    pub(crate) fn last_id(&self, collection: &str) -> Option<i64> {
        self.inner.get(collection)?.keys().next_back().copied()
    }

    pub(crate) fn remove(&mut self, collection: &str) -> bool {
        self.inner.remove(collection).is_some()
    }
}

/// The configured store, dispatching to a concrete backend
#[derive(Debug)]
pub enum StoreBackend {
    Memory(MemoryStore),
    File(FileStore),
}

impl StoreBackend {
    /// Open the backend selected by configuration
    ///
    /// # Errors
    ///
    /// Returns error if the file store directory cannot be created or its
    /// journals cannot be read.
    pub async fn open(config: &StoreConfig) -> Result<Self> {
        match config.backend {
            StoreKind::Memory => Ok(StoreBackend::Memory(MemoryStore::new())),
            StoreKind::File => Ok(StoreBackend::File(FileStore::open(&config.path).await?)),
        }
    }
}

#[async_trait]
impl BucketStore for StoreBackend {
    async fn ping(&self) -> Result<()> {
        match self {
            StoreBackend::Memory(store) => store.ping().await,
            StoreBackend::File(store) => store.ping().await,
        }
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        match self {
            StoreBackend::Memory(store) => store.list_collections().await,
            StoreBackend::File(store) => store.list_collections().await,
        }
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        match self {
            StoreBackend::Memory(store) => store.collection_exists(collection).await,
            StoreBackend::File(store) => store.collection_exists(collection).await,
        }
    }

    async fn bucket(&self, collection: &str, id: i64) -> Result<Option<Bucket>> {
        match self {
            StoreBackend::Memory(store) => store.bucket(collection, id).await,
            StoreBackend::File(store) => store.bucket(collection, id).await,
        }
    }

    async fn bucket_exists(&self, collection: &str, id: i64) -> Result<bool> {
        match self {
            StoreBackend::Memory(store) => store.bucket_exists(collection, id).await,
            StoreBackend::File(store) => store.bucket_exists(collection, id).await,
        }
    }

    async fn push_entry(
        &self,
        collection: &str,
        id: i64,
        device: u32,
        fields: &FieldMap,
    ) -> Result<PushOutcome> {
        match self {
            StoreBackend::Memory(store) => store.push_entry(collection, id, device, fields).await,
            StoreBackend::File(store) => store.push_entry(collection, id, device, fields).await,
        }
    }

    async fn range(&self, collection: &str, start: i64, end: i64) -> Result<Vec<Bucket>> {
        match self {
            StoreBackend::Memory(store) => store.range(collection, start, end).await,
            StoreBackend::File(store) => store.range(collection, start, end).await,
        }
    }

    async fn first_id(&self, collection: &str) -> Result<Option<i64>> {
        match self {
            StoreBackend::Memory(store) => store.first_id(collection).await,
            StoreBackend::File(store) => store.first_id(collection).await,
        }
    }

    async fn last_id(&self, collection: &str) -> Result<Option<i64>> {
        match self {
            StoreBackend::Memory(store) => store.last_id(collection).await,
            StoreBackend::File(store) => store.last_id(collection).await,
        }
    }

    async fn drop_collection(&self, collection: &str) -> Result<bool> {
        match self {
            StoreBackend::Memory(store) => store.drop_collection(collection).await,
            StoreBackend::File(store) => store.drop_collection(collection).await,
        }
    }
}
