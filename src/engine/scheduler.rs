//! # Rollup Scheduler
//!
//! Periodic rollup dispatch and the full recompute.
//!
//! Each tick lists the raw types in the store and runs one rollup task per
//! type. A type whose previous task has not finished yet is skipped for that
//! tick, so at most one rollup pass per type runs at any time.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::task::JoinSet;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error};

use super::rollup::is_rollup_collection;
use super::Engine;
use crate::error::Result;

/// One async mutex per raw type, created on first use
#[derive(Debug, Clone, Default)]
pub(crate) struct DispatchLocks {
    inner: Arc<std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>>,
}

impl DispatchLocks {
    fn handle(&self, kind: &str) -> Arc<Mutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(kind.to_string()).or_default().clone()
    }

    /// Take the lock for `kind` if nobody holds it
    pub(crate) fn try_acquire(&self, kind: &str) -> Option<OwnedMutexGuard<()>> {
        self.handle(kind).try_lock_owned().ok()
    }

    /// Wait for the lock for `kind`
    pub(crate) async fn acquire(&self, kind: &str) -> OwnedMutexGuard<()> {
        self.handle(kind).lock_owned().await
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

impl Engine {
    /// Raw collections, i.e. everything that is not a rollup
    pub async fn raw_types(&self) -> Result<Vec<String>> {
        let collections = self.store.list_collections().await?;
        let mut kinds: Vec<String> = collections
            .iter()
            .filter(|name| !is_rollup_collection(name, &collections))
            .cloned()
            .collect();
        kinds.sort();
        Ok(kinds)
    }

    /// Run one rollup pass over every raw type
    ///
    /// # Returns
    ///
    /// * `usize` - Number of types a rollup task was started for
    pub async fn dispatch_pass(&self) -> usize {
        self.dispatch_pass_at(now()).await
    }

    pub(crate) async fn dispatch_pass_at(&self, now: i64) -> usize {
        if self.ping().await.is_err() {
            return 0;
        }

        let kinds = match self.raw_types().await {
            Ok(kinds) => kinds,
            Err(e) => {
                self.diagnostics.low(format!("could not list collections: {}", e));
                return 0;
            }
        };

        let mut tasks = JoinSet::new();
        for kind in kinds {
            let Some(guard) = self.locks.try_acquire(&kind) else {
                debug!("Rollup for {} still running, skipping this tick", kind);
                continue;
            };
            let engine = self.clone();
            tasks.spawn(async move {
                let _guard = guard;
                engine.dispatch_reported(&kind, now, false).await
            });
        }

        let dispatched = tasks.len();
        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                error!("rollup task failed: {}", e);
            }
        }
        dispatched
    }

    async fn dispatch_reported(&self, kind: &str, now: i64, force_backfill: bool) -> usize {
        match self.dispatch_type(kind, now, force_backfill).await {
            Ok(written) => written,
            Err(e) => {
                self.diagnostics
                    .low(format!("rollup of {} failed: {}", kind, e));
                0
            }
        }
    }

    /// Dispatch once now, then once per tick until aborted
    ///
    /// A slow pass never delays the ticker; the next tick starts its own
    /// pass and per-type locking skips whatever is still busy.
    pub(crate) async fn rollup_loop(self) {
        self.dispatch_pass().await;

        let period = self.settings.tick_interval;
        let mut ticker = time::interval_at(time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let engine = self.clone();
            tokio::spawn(async move {
                engine.dispatch_pass().await;
            });
        }
    }

    /// Drop every rollup collection and rebuild all rollups from raw data
    ///
    /// Waits for in-progress rollup tasks and holds every type's lock until
    /// the rebuild is done, so ticks in the meantime skip those types.
    ///
    /// # Returns
    ///
    /// * `Result<usize>` - Number of rollup buckets written
    ///
    /// # Errors
    ///
    /// Returns error (after a `High` diagnostic) if the store is unreachable,
    /// or if the collections cannot be listed.
    pub async fn recalculate_average(&self) -> Result<usize> {
        self.recalculate_average_at(now()).await
    }

    pub(crate) async fn recalculate_average_at(&self, now: i64) -> Result<usize> {
        self.diagnostics.debug("recalculating averages: please wait");
        self.ping().await?;

        let collections = self.store.list_collections().await.map_err(|e| {
            self.diagnostics.low(format!("could not list collections: {}", e));
            e
        })?;
        let mut kinds: Vec<String> = collections
            .iter()
            .filter(|name| !is_rollup_collection(name, &collections))
            .cloned()
            .collect();
        kinds.sort();

        // Sorted acquisition order, so concurrent recomputes cannot deadlock
        let mut guards = Vec::with_capacity(kinds.len());
        for kind in &kinds {
            guards.push(self.locks.acquire(kind).await);
        }

        let rollups: Vec<&String> = collections
            .iter()
            .filter(|name| is_rollup_collection(name, &collections))
            .collect();
        for collection in rollups {
            if let Err(e) = self.store.drop_collection(collection).await {
                self.diagnostics
                    .low(format!("could not drop {}: {}", collection, e));
            }
        }

        let mut tasks = JoinSet::new();
        for (kind, guard) in kinds.into_iter().zip(guards) {
            let engine = self.clone();
            tasks.spawn(async move {
                let _guard = guard;
                engine.dispatch_reported(&kind, now, true).await
            });
        }

        let mut written = 0;
        while let Some(finished) = tasks.join_next().await {
            match finished {
                Ok(count) => written += count,
                Err(e) => error!("rollup task failed: {}", e),
            }
        }

        self.diagnostics
            .info(format!("recalculated averages ({} rollup buckets)", written));
        Ok(written)
    }
}
