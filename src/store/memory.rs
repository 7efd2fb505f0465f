//! In-memory bucket store.
//!
//! Nothing survives the process; used for tests and for running without a
//! data directory. Clones share the same collections.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use super::{validate_collection_name, Bucket, BucketStore, Collections, PushOutcome};
use crate::error::Result;
use crate::nmea::FieldMap;

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    collections: Arc<RwLock<Collections>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BucketStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>> {
        Ok(self.collections.read().await.names())
    }

    async fn collection_exists(&self, collection: &str) -> Result<bool> {
        Ok(self.collections.read().await.contains(collection))
    }

    async fn bucket(&self, collection: &str, id: i64) -> Result<Option<Bucket>> {
        Ok(self.collections.read().await.get(collection, id).cloned())
    }

    async fn bucket_exists(&self, collection: &str, id: i64) -> Result<bool> {
        Ok(self.collections.read().await.get(collection, id).is_some())
    }

    async fn push_entry(
        &self,
        collection: &str,
        id: i64,
        device: u32,
        fields: &FieldMap,
    ) -> Result<PushOutcome> {
        validate_collection_name(collection)?;
        let outcome = self
            .collections
            .write()
            .await
            .push(collection, id, device, fields);
        debug!("{}/{} device {}: {:?}", collection, id, device, outcome);
        Ok(outcome)
    }

    async fn range(&self, collection: &str, start: i64, end: i64) -> Result<Vec<Bucket>> {
        Ok(self.collections.read().await.range(collection, start, end))
    }

    async fn first_id(&self, collection: &str) -> Result<Option<i64>> {
        Ok(self.collections.read().await.first_id(collection))
    }

    async fn last_id(&self, collection: &str) -> Result<Option<i64>> {
        Ok(self.collections.read().await.last_id(collection))
    }

    async fn drop_collection(&self, collection: &str) -> Result<bool> {
        Ok(self.collections.write().await.remove(collection))
    }
}
