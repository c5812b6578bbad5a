//! Time-bounded cache over the remote sheet.
//!
//! Readers take an `Arc<Dataset>` snapshot and keep it for the whole
//! operation. A refresh builds the new dataset off to the side and swaps the
//! pointer under a short write lock, so a reader sees either the old dataset
//! or the new one. Refreshes are single-flight: concurrent triggers that find
//! the cache stale queue on `refresh_lock` and re-check before fetching.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use super::decode::decode_sheet;
use super::source::DatasetSource;
use super::Dataset;
use crate::error::FetchError;
use crate::types::{ColumnAliases, DatasetFormat};

pub struct TabularCache {
    source: Arc<dyn DatasetSource>,
    format: DatasetFormat,
    aliases: ColumnAliases,
    ttl: Duration,
    current: RwLock<Arc<Dataset>>,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl TabularCache {
    pub fn new(
        source: Arc<dyn DatasetSource>,
        format: DatasetFormat,
        aliases: ColumnAliases,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            format,
            aliases,
            ttl,
            current: RwLock::new(Arc::new(Dataset::empty())),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Current dataset, refreshing first if it is missing or older than the TTL.
    pub async fn get_dataset(&self) -> Arc<Dataset> {
        self.get_dataset_at(Utc::now()).await
    }

    /// `get_dataset` with an explicit clock reading.
    pub async fn get_dataset_at(&self, now: DateTime<Utc>) -> Arc<Dataset> {
        let snapshot = self.snapshot();
        if !self.is_stale(&snapshot, now) {
            return snapshot;
        }

        let _guard = self.refresh_lock.lock().await;

        let snapshot = self.snapshot();
        if !self.is_stale(&snapshot, now) {
            return snapshot;
        }

        match self.refresh(now).await {
            Ok(dataset) => dataset,
            Err(e) => {
                // Decode and schema failures will not clear up on their own
                let level = if e.is_retryable() {
                    log::Level::Warn
                } else {
                    log::Level::Error
                };
                if snapshot.is_empty_sentinel() {
                    log::log!(
                        level,
                        "Dataset refresh from {} failed and no cached copy exists: {} ({})",
                        self.source.describe(),
                        e,
                        e.recovery_suggestion()
                    );
                } else {
                    log::log!(
                        level,
                        "Dataset refresh from {} failed, keeping copy from {:?}: {}",
                        self.source.describe(),
                        snapshot.fetched_at,
                        e
                    );
                }
                snapshot
            }
        }
    }

    /// The cached dataset as-is, without any refresh.
    pub fn snapshot(&self) -> Arc<Dataset> {
        self.current.read().clone()
    }

    fn is_stale(&self, dataset: &Dataset, now: DateTime<Utc>) -> bool {
        match dataset.fetched_at {
            Some(fetched_at) => now - fetched_at > self.ttl,
            None => true,
        }
    }

    async fn refresh(&self, now: DateTime<Utc>) -> Result<Arc<Dataset>, FetchError> {
        let bytes = self.source.fetch().await?;
        let decoded = decode_sheet(&bytes, self.format, &self.aliases)?;

        let dataset = Arc::new(Dataset {
            records: decoded.records,
            columns: decoded.columns,
            fetched_at: Some(now),
        });

        *self.current.write() = dataset.clone();

        log::info!(
            "Dataset refreshed from {}: {} records, {} columns",
            self.source.describe(),
            dataset.records.len(),
            dataset.columns.len()
        );
        Ok(dataset)
    }
}
