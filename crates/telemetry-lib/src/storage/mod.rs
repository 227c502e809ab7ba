//! Time-series persistence
//!
//! [`SeriesStore`] owns the single on-disk [`TimeSeriesStore`] of an agent.
//! The engine is opened lazily on first use; concurrent first callers share
//! one instance. [`SeriesStore::purge`] wipes everything and resets the
//! initializer so the next call opens a fresh, empty store.

mod engine;
mod rows;


pub use engine::{StoreOptions, TimeSeriesStore};
pub use rows::{names, snapshot_rows};

use crate::models::{DataPoint, Label, MetricRow};
use crate::observability::AgentMetrics;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("store is closed")]
    Closed,

    #[error("invalid row for metric {metric:?}: {reason}")]
    InvalidRow { metric: String, reason: &'static str },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode rows: {0}")]
    Encode(#[from] serde_json::Error),
}

impl StorageError {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Lazily opened, purgeable handle to the agent's time-series store
pub struct SeriesStore {
    dir: PathBuf,
    options: StoreOptions,
    store: Mutex<Option<Arc<TimeSeriesStore>>>,
    metrics: AgentMetrics,
}

impl SeriesStore {
    pub fn new(dir: impl Into<PathBuf>, options: StoreOptions) -> Self {
        Self {
            dir: dir.into(),
            options,
            store: Mutex::new(None),
            metrics: AgentMetrics::new(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The shared engine, opening it on first use
    pub async fn handle(&self) -> Result<Arc<TimeSeriesStore>, StorageError> {
        let mut slot = self.store.lock().await;
        if let Some(store) = slot.as_ref() {
            return Ok(Arc::clone(store));
        }

        let store = Arc::new(TimeSeriesStore::open(&self.dir, self.options.clone()).await?);
        *slot = Some(Arc::clone(&store));
        Ok(store)
    }

    pub async fn is_open(&self) -> bool {
        match self.store.lock().await.as_ref() {
            Some(store) => !store.is_closed().await,
            None => false,
        }
    }

    pub async fn insert(&self, rows: &[MetricRow]) -> Result<(), StorageError> {
        let result = match self.handle().await {
            Ok(store) => store.insert(rows).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => self.metrics.inc_rows_stored(rows.len() as u64),
            Err(_) => self.metrics.inc_storage_errors(),
        }
        result
    }

    pub async fn select(
        &self,
        metric: &str,
        labels: &[Label],
        start: i64,
        end: i64,
    ) -> Result<Vec<DataPoint>, StorageError> {
        self.handle().await?.select(metric, labels, start, end).await
    }

    /// Points of `metric` for one host between two unix timestamps, inclusive
    pub async fn data_points(
        &self,
        metric: &str,
        host: &str,
        start: i64,
        end: i64,
    ) -> Result<Vec<DataPoint>, StorageError> {
        self.select(metric, &[Label::host(host)], start, end).await
    }

    /// Close the open engine, if any; safe to call repeatedly
    pub async fn close(&self) -> Result<(), StorageError> {
        let store = self.store.lock().await.clone();
        match store {
            Some(store) => store.close().await,
            None => Ok(()),
        }
    }

    /// Close the engine, delete all on-disk state and reset the initializer
    pub async fn purge(&self) -> Result<(), StorageError> {
        let mut slot = self.store.lock().await;
        if let Some(store) = slot.take() {
            store.close().await?;
        }

        match tokio::fs::remove_dir_all(&self.dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        }

        info!(path = %self.dir.display(), "Time-series store purged");
        Ok(())
    }
}
