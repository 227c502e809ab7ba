//! Embedded time-series engine
//!
//! Points live in memory, bucketed into fixed-width partitions keyed by
//! their start time. Every insert batch is appended to `series.wal` as a
//! single JSON line and synced before it becomes visible, so a batch is
//! either fully stored or not at all. Reopening replays the log.
//!
//! A background task evicts points older than the retention window and
//! rewrites the log without them.

use super::StorageError;
use crate::models::{DataPoint, Label, MetricRow};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, info, warn};

const WAL_FILE: &str = "series.wal";

/// Rows per line when the log is rewritten
const COMPACTION_CHUNK: usize = 10_000;

/// Engine options
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Points older than `now - retention` are evicted
    pub retention: Duration,
    /// Width of one in-memory partition
    pub partition_width: Duration,
    /// How often the background task looks for expired points
    pub eviction_interval: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            retention: crate::config::DEFAULT_RETENTION,
            partition_width: Duration::from_secs(60 * 60),
            eviction_interval: Duration::from_secs(60),
        }
    }
}

impl StoreOptions {
    pub fn with_retention(retention: Duration) -> Self {
        Self {
            retention,
            ..Default::default()
        }
    }

    fn partition_secs(&self) -> i64 {
        self.partition_width.as_secs().max(1) as i64
    }
}

/// Metric name plus its sorted label set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct SeriesKey {
    metric: String,
    labels: Vec<Label>,
}

impl SeriesKey {
    fn new(metric: &str, labels: &[Label]) -> Self {
        let mut labels = labels.to_vec();
        labels.sort();
        Self {
            metric: metric.to_string(),
            labels,
        }
    }
}

type Partition = HashMap<SeriesKey, Vec<DataPoint>>;

struct State {
    partitions: BTreeMap<i64, Partition>,
    wal: Option<File>,
    /// Set when an append may have left a partial line behind
    wal_needs_rewrite: bool,
    closed: bool,
}

struct Inner {
    wal_path: PathBuf,
    options: StoreOptions,
    state: Mutex<State>,
}

/// Label-indexed, append-only time-series store backed by a write-ahead log
pub struct TimeSeriesStore {
    inner: Arc<Inner>,
    shutdown: broadcast::Sender<()>,
    retention_task: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl TimeSeriesStore {
    /// Open or create the store in `dir`
    ///
    /// Must be called within a tokio runtime; the retention task is spawned here.
    pub async fn open(dir: &Path, options: StoreOptions) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| StorageError::io(dir, e))?;

        let wal_path = dir.join(WAL_FILE);
        let (partitions, needs_rewrite, replayed) = replay(&wal_path, &options).await?;

        let wal = open_append(&wal_path).await?;
        let inner = Arc::new(Inner {
            wal_path,
            options,
            state: Mutex::new(State {
                partitions,
                wal: Some(wal),
                wal_needs_rewrite: needs_rewrite,
                closed: false,
            }),
        });

        // Expired points from a previous run go before anything is served
        inner.evict_expired(chrono::Utc::now().timestamp()).await?;
        {
            let mut state = inner.state.lock().await;
            if state.wal_needs_rewrite {
                inner.rewrite_log(&mut state).await?;
            }
        }

        let (shutdown, shutdown_rx) = broadcast::channel(1);
        let task = tokio::spawn(run_retention(Arc::clone(&inner), shutdown_rx));

        info!(
            path = %inner.wal_path.display(),
            replayed_rows = replayed,
            retention_secs = inner.options.retention.as_secs(),
            "Time-series store opened"
        );

        Ok(Self {
            inner,
            shutdown,
            retention_task: std::sync::Mutex::new(Some(task)),
        })
    }

    /// Store all rows as one batch
    pub async fn insert(&self, rows: &[MetricRow]) -> Result<(), StorageError> {
        for row in rows {
            validate(row)?;
        }

        let mut state = self.inner.state.lock().await;
        if state.closed {
            return Err(StorageError::Closed);
        }
        if rows.is_empty() {
            return Ok(());
        }
        if state.wal_needs_rewrite {
            self.inner.rewrite_log(&mut state).await?;
        }

        let mut line = serde_json::to_vec(rows)?;
        line.push(b'\n');

        let path = &self.inner.wal_path;
        let wal = state.wal.as_mut().ok_or(StorageError::Closed)?;
        let written = async {
            wal.write_all(&line).await?;
            wal.sync_data().await
        }
        .await;

        if let Err(e) = written {
            state.wal_needs_rewrite = true;
            return Err(StorageError::io(path, e));
        }

        let width = self.inner.options.partition_secs();
        for row in rows {
            let key = SeriesKey::new(&row.metric, &row.labels);
            state
                .partitions
                .entry(partition_start(row.data_point.timestamp, width))
                .or_default()
                .entry(key)
                .or_default()
                .push(row.data_point);
        }

        debug!(rows = rows.len(), "Batch stored");
        Ok(())
    }

    /// Points of one series with `start <= timestamp <= end`
    ///
    /// Returned in storage order: by partition, then by insertion.
    pub async fn select(
        &self,
        metric: &str,
        labels: &[Label],
        start: i64,
        end: i64,
    ) -> Result<Vec<DataPoint>, StorageError> {
        let state = self.inner.state.lock().await;
        if state.closed {
            return Err(StorageError::Closed);
        }
        if start > end {
            return Ok(Vec::new());
        }

        let width = self.inner.options.partition_secs();
        let key = SeriesKey::new(metric, labels);
        let range = partition_start(start, width)..=partition_start(end, width);

        Ok(state
            .partitions
            .range(range)
            .filter_map(|(_, partition)| partition.get(&key))
            .flatten()
            .filter(|point| point.timestamp >= start && point.timestamp <= end)
            .copied()
            .collect())
    }

    /// Flush and close; later calls are no-ops
    pub async fn close(&self) -> Result<(), StorageError> {
        let synced = {
            let mut state = self.inner.state.lock().await;
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            state.partitions.clear();
            match state.wal.take() {
                Some(wal) => wal.sync_all().await,
                None => Ok(()),
            }
        };

        // The retention task stops even when the final sync failed
        self.stop_retention().await;
        synced.map_err(|e| StorageError::io(&self.inner.wal_path, e))?;

        info!(path = %self.inner.wal_path.display(), "Time-series store closed");
        Ok(())
    }

    async fn stop_retention(&self) {
        let _ = self.shutdown.send(());
        let task = self
            .retention_task
            .lock()
            .ok()
            .and_then(|mut task| task.take());
        if let Some(task) = task {
            let _ = task.await;
        }
    }

    #[cfg(test)]
    pub(crate) fn retention_running(&self) -> bool {
        self.retention_task
            .lock()
            .map(|task| task.as_ref().is_some_and(|task| !task.is_finished()))
            .unwrap_or(false)
    }

    pub async fn is_closed(&self) -> bool {
        self.inner.state.lock().await.closed
    }

    /// Number of stored points across all series
    pub async fn len(&self) -> usize {
        let state = self.inner.state.lock().await;
        state
            .partitions
            .values()
            .flat_map(|partition| partition.values())
            .map(Vec::len)
            .sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Run one eviction pass as if the clock read `now`
    pub(crate) async fn evict_expired_at(&self, now: i64) -> Result<usize, StorageError> {
        self.inner.evict_expired(now).await
    }

    #[cfg(test)]
    pub(crate) async fn replace_log_file(&self, file: File) {
        self.inner.state.lock().await.wal = Some(file);
    }
}

impl Drop for TimeSeriesStore {
    fn drop(&mut self) {
        let _ = self.shutdown.send(());
    }
}

impl Inner {
    async fn evict_expired(&self, now: i64) -> Result<usize, StorageError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Ok(0);
        }

        let retention = self.options.retention.as_secs().min(i64::MAX as u64) as i64;
        let cutoff = now.saturating_sub(retention);
        let width = self.options.partition_secs();
        let mut evicted = 0usize;

        // Partitions that end at or before the cutoff go whole
        let boundary = partition_start(cutoff, width);
        let mut kept = state.partitions.split_off(&boundary);
        for partition in state.partitions.values() {
            evicted += partition.values().map(Vec::len).sum::<usize>();
        }

        if let Some(partition) = kept.get_mut(&boundary) {
            for points in partition.values_mut() {
                let before = points.len();
                points.retain(|point| point.timestamp >= cutoff);
                evicted += before - points.len();
            }
            partition.retain(|_, points| !points.is_empty());
            if partition.is_empty() {
                kept.remove(&boundary);
            }
        }
        state.partitions = kept;

        if evicted > 0 {
            self.rewrite_log(&mut state).await?;
            debug!(evicted, cutoff, "Evicted expired points");
        }
        Ok(evicted)
    }

    /// Replace the log with the current in-memory contents
    async fn rewrite_log(&self, state: &mut State) -> Result<(), StorageError> {
        let rows: Vec<MetricRow> = state
            .partitions
            .values()
            .flat_map(|partition| partition.iter())
            .flat_map(|(key, points)| {
                points
                    .iter()
                    .map(move |point| MetricRow {
                        metric: key.metric.clone(),
                        labels: key.labels.clone(),
                        data_point: *point,
                    })
            })
            .collect();

        let mut data = Vec::new();
        for chunk in rows.chunks(COMPACTION_CHUNK) {
            data.extend(serde_json::to_vec(chunk)?);
            data.push(b'\n');
        }

        let temp_path = self.wal_path.with_extension("tmp");
        let io = |e| StorageError::io(&temp_path, e);
        let mut temp = File::create(&temp_path).await.map_err(io)?;
        temp.write_all(&data).await.map_err(io)?;
        temp.sync_all().await.map_err(io)?;
        drop(temp);

        tokio::fs::rename(&temp_path, &self.wal_path)
            .await
            .map_err(|e| StorageError::io(&self.wal_path, e))?;

        state.wal = Some(open_append(&self.wal_path).await?);
        state.wal_needs_rewrite = false;
        Ok(())
    }
}

async fn run_retention(inner: Arc<Inner>, mut shutdown: broadcast::Receiver<()>) {
    let period = inner.options.eviction_interval.max(Duration::from_millis(10));
    let mut ticker = interval_at(Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = inner.evict_expired(chrono::Utc::now().timestamp()).await {
                    warn!(error = %e, "Retention pass failed");
                }
            }
            _ = shutdown.recv() => break,
        }
    }
}

/// Start of the partition holding `timestamp`
///
/// Clamped at `i64::MIN` for the lowest partition, which keeps the mapping
/// monotonic over the whole timestamp range.
fn partition_start(timestamp: i64, width: i64) -> i64 {
    timestamp.saturating_sub(timestamp.rem_euclid(width))
}

fn validate(row: &MetricRow) -> Result<(), StorageError> {
    let reason = if row.metric.is_empty() {
        "metric name is empty"
    } else if !row.data_point.value.is_finite() {
        "value is not finite"
    } else {
        return Ok(());
    };

    Err(StorageError::InvalidRow {
        metric: row.metric.clone(),
        reason,
    })
}

async fn open_append(path: &Path) -> Result<File, StorageError> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| StorageError::io(path, e))
}

/// Rebuild partitions from the log
///
/// Returns the partitions, whether the log held unreadable lines, and the
/// number of rows replayed.
async fn replay(
    path: &Path,
    options: &StoreOptions,
) -> Result<(BTreeMap<i64, Partition>, bool, usize), StorageError> {
    let data = match tokio::fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Ok((BTreeMap::new(), false, 0))
        }
        Err(e) => return Err(StorageError::io(path, e)),
    };

    let width = options.partition_secs();
    let mut partitions: BTreeMap<i64, Partition> = BTreeMap::new();
    let mut damaged = false;
    let mut replayed = 0usize;

    for (index, line) in data.split(|b| *b == b'\n').enumerate() {
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let rows: Vec<MetricRow> = match serde_json::from_slice(line) {
            Ok(rows) => rows,
            Err(e) => {
                warn!(line = index + 1, error = %e, "Discarding unreadable log entry");
                damaged = true;
                continue;
            }
        };

        for row in rows {
            let key = SeriesKey::new(&row.metric, &row.labels);
            partitions
                .entry(partition_start(row.data_point.timestamp, width))
                .or_default()
                .entry(key)
                .or_default()
                .push(row.data_point);
            replayed += 1;
        }
    }

    Ok((partitions, damaged, replayed))
}
