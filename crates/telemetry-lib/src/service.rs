//! Service identity, start-time cache and request accounting
//!
//! The first-seen start time of each service name is cached in
//! `service_info.json` so uptime reporting survives restarts.

use crate::models::{RequestStats, ServiceInfo};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const CACHE_FILE: &str = "service_info.json";

/// Counts requests the host reports and their total duration
#[derive(Debug, Clone, Default)]
pub struct RequestCounter {
    count: Arc<AtomicU64>,
    total_micros: Arc<AtomicU64>,
}

impl RequestCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, duration: Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_micros
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn stats(&self) -> RequestStats {
        RequestStats {
            request_count: self.count.load(Ordering::Relaxed),
            total_duration_secs: self.total_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0,
        }
    }
}

/// Start times keyed by service name, persisted as JSON
pub struct ServiceInfoCache {
    path: PathBuf,
    entries: BTreeMap<String, DateTime<Utc>>,
}

impl ServiceInfoCache {
    /// Open the cache in `data_dir`, starting empty if the file is missing or unreadable
    pub fn open(data_dir: &Path) -> Self {
        let path = data_dir.join(CACHE_FILE);
        let entries = match std::fs::read(&path) {
            Ok(data) => match serde_json::from_slice(&data) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Corrupt service cache, starting fresh");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        Self { path, entries }
    }

    /// Record a start for `service_name`, keeping the earliest time already cached
    pub fn record_start(&mut self, service_name: &str, now: DateTime<Utc>) -> Result<ServiceInfo> {
        let start = match self.entries.get(service_name) {
            Some(start) => *start,
            None => {
                self.entries.insert(service_name.to_string(), now);
                self.save()?;
                info!(service = %service_name, "Recorded first start of service");
                now
            }
        };

        Ok(ServiceInfo {
            service_name: service_name.to_string(),
            service_start_time: start,
            agent_version: env!("CARGO_PKG_VERSION").to_string(),
            process_id: std::process::id(),
        })
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {:?}", parent))?;
        }

        let json = serde_json::to_vec_pretty(&self.entries)
            .context("Failed to serialize service cache")?;

        let temp_path = self.path.with_extension("tmp");
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&temp_path)
            .with_context(|| format!("Failed to create temp file {:?}", temp_path))?;
        file.write_all(&json)
            .context("Failed to write service cache")?;
        file.sync_all().context("Failed to sync service cache")?;

        std::fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to rename {:?} to {:?}", temp_path, self.path))?;
        Ok(())
    }
}

/// Time elapsed since `start`, zero if `start` is in the future
pub fn uptime(start: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (now - start).to_std().unwrap_or_default()
}

/// Render an uptime using its two most significant units, e.g. "3d 4h"
pub fn format_uptime(uptime: Duration) -> String {
    const UNITS: [(&str, u64); 6] = [
        ("y", 365 * 86_400),
        ("mo", 30 * 86_400),
        ("d", 86_400),
        ("h", 3_600),
        ("m", 60),
        ("s", 1),
    ];

    let mut remaining = uptime.as_secs();
    let mut parts = Vec::new();
    for (suffix, secs) in UNITS {
        if remaining >= secs {
            parts.push(format!("{}{}", remaining / secs, suffix));
            remaining %= secs;
        }
        if parts.len() == 2 {
            break;
        }
    }

    if parts.is_empty() {
        "0s".to_string()
    } else {
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn test_request_counter() {
        let counter = RequestCounter::new();
        counter.record(Duration::from_millis(250));
        counter.clone().record(Duration::from_millis(750));

        let stats = counter.stats();
        assert_eq!(stats.request_count, 2);
        assert!((stats.total_duration_secs - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_start_time_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap();

        let mut cache = ServiceInfoCache::open(temp_dir.path());
        let info = cache.record_start("orders", first).unwrap();
        assert_eq!(info.service_start_time, first);

        let mut reopened = ServiceInfoCache::open(temp_dir.path());
        let info = reopened.record_start("orders", later).unwrap();
        assert_eq!(info.service_start_time, first);

        let other = reopened.record_start("payments", later).unwrap();
        assert_eq!(other.service_start_time, later);
    }

    #[test]
    fn test_corrupt_cache_starts_fresh() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(CACHE_FILE), b"{not json").unwrap();

        let now = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let mut cache = ServiceInfoCache::open(temp_dir.path());
        let info = cache.record_start("orders", now).unwrap();
        assert_eq!(info.service_start_time, now);

        // The rewritten file is readable again
        let mut reopened = ServiceInfoCache::open(temp_dir.path());
        let info = reopened.record_start("orders", Utc::now()).unwrap();
        assert_eq!(info.service_start_time, now);
    }

    #[test]
    fn test_format_uptime() {
        assert_eq!(format_uptime(Duration::ZERO), "0s");
        assert_eq!(format_uptime(Duration::from_secs(42)), "42s");
        assert_eq!(format_uptime(Duration::from_secs(3_725)), "1h 2m");
        assert_eq!(format_uptime(Duration::from_secs(3 * 86_400 + 7_200)), "3d 2h");
        assert_eq!(format_uptime(Duration::from_secs(400 * 86_400)), "1y 1mo");
    }

    #[test]
    fn test_uptime_never_negative() {
        let now = Utc::now();
        assert_eq!(uptime(now + chrono::Duration::seconds(5), now), Duration::ZERO);
        assert_eq!(uptime(now - chrono::Duration::seconds(5), now), Duration::from_secs(5));
    }
}
