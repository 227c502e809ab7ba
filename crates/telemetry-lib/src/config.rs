//! Agent configuration
//!
//! Duration fields are kept as strings and parsed with [`parse_duration_or_default`]
//! when the agent starts, so a bad value never stops the host from starting.

use crate::scoring::{Threshold, Thresholds};
use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// Default interval between scheduled flushes
pub const DEFAULT_SYNC_FREQUENCY: Duration = Duration::from_secs(5 * 60);

/// Default age after which stored rows are evicted
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Default CPU sampling window
pub const DEFAULT_CPU_SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Agent configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Name of the instrumented service
    pub service_name: String,

    /// Working directory for the store, profiles and service cache
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Interval between scheduled flushes, e.g. "30s", "5m"
    #[serde(default = "default_sync_frequency")]
    pub sync_frequency: String,

    /// Maximum age of stored rows, e.g. "7d", "1month"
    #[serde(default = "default_retention_period")]
    pub retention_period: String,

    /// Value of the `host` label on every stored row
    #[serde(default = "default_host_label")]
    pub host_label: String,

    /// CPU sampling window in milliseconds
    #[serde(default = "default_cpu_sample_window_ms")]
    pub cpu_sample_window_ms: u64,

    #[serde(default)]
    pub thresholds: ThresholdOverrides,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("telemetry")
}

fn default_sync_frequency() -> String {
    "5m".to_string()
}

fn default_retention_period() -> String {
    "7d".to_string()
}

fn default_host_label() -> String {
    sysinfo::System::host_name().unwrap_or_else(|| "localhost".to_string())
}

fn default_cpu_sample_window_ms() -> u64 {
    DEFAULT_CPU_SAMPLE_WINDOW.as_millis() as u64
}

impl AgentConfig {
    /// Configuration with defaults for everything but the service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            data_dir: default_data_dir(),
            sync_frequency: default_sync_frequency(),
            retention_period: default_retention_period(),
            host_label: default_host_label(),
            cpu_sample_window_ms: default_cpu_sample_window_ms(),
            thresholds: ThresholdOverrides::default(),
        }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = data_dir.into();
        self
    }

    pub fn with_sync_frequency(mut self, frequency: impl Into<String>) -> Self {
        self.sync_frequency = frequency.into();
        self
    }

    pub fn with_retention_period(mut self, retention: impl Into<String>) -> Self {
        self.retention_period = retention.into();
        self
    }

    pub fn with_host_label(mut self, host: impl Into<String>) -> Self {
        self.host_label = host.into();
        self
    }

    pub fn with_cpu_sample_window(mut self, window: Duration) -> Self {
        self.cpu_sample_window_ms = window.as_millis() as u64;
        self
    }

    pub fn with_thresholds(mut self, overrides: ThresholdOverrides) -> Self {
        self.thresholds = overrides;
        self
    }

    /// Reject configuration the agent cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.service_name.trim().is_empty() {
            bail!("service_name is required");
        }
        if self.host_label.trim().is_empty() {
            bail!("host_label must not be empty");
        }
        Ok(())
    }

    pub fn sync_frequency(&self) -> Duration {
        parse_duration_or_default(&self.sync_frequency, DEFAULT_SYNC_FREQUENCY, "sync_frequency")
    }

    pub fn retention(&self) -> Duration {
        parse_duration_or_default(&self.retention_period, DEFAULT_RETENTION, "retention_period")
    }

    pub fn cpu_sample_window(&self) -> Duration {
        Duration::from_millis(self.cpu_sample_window_ms)
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("data")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.data_dir.join("profiles")
    }
}

/// Parse a human duration such as "90s", "5m", "7d" or "1month"
///
/// Invalid or zero values fall back to `default` with a warning.
pub fn parse_duration_or_default(value: &str, default: Duration, field: &str) -> Duration {
    match humantime::parse_duration(value.trim()) {
        Ok(parsed) if !parsed.is_zero() => parsed,
        Ok(_) => {
            warn!(field = %field, value = %value, default = ?default, "Zero duration, using default");
            default
        }
        Err(e) => {
            warn!(
                field = %field,
                value = %value,
                default = ?default,
                error = %e,
                "Invalid duration, using default"
            );
            default
        }
    }
}

/// Optional threshold overrides applied on top of [`Thresholds::default`]
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ThresholdOverrides {
    pub max_cpu_load: Option<f64>,
    pub cpu_weight: Option<f64>,
    pub max_memory_load: Option<f64>,
    pub memory_weight: Option<f64>,
    pub max_tasks: Option<f64>,
    pub tasks_weight: Option<f64>,
}

impl ThresholdOverrides {
    pub fn apply(&self, base: Thresholds) -> Thresholds {
        let merge = |t: Threshold, limit: Option<f64>, weight: Option<f64>| Threshold {
            limit: limit.unwrap_or(t.limit),
            weight: weight.unwrap_or(t.weight),
        };

        Thresholds {
            cpu: merge(base.cpu, self.max_cpu_load, self.cpu_weight),
            memory: merge(base.memory, self.max_memory_load, self.memory_weight),
            tasks: merge(base.tasks, self.max_tasks, self.tasks_weight),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AgentConfig::new("checkout");
        assert_eq!(config.sync_frequency(), DEFAULT_SYNC_FREQUENCY);
        assert_eq!(config.retention(), DEFAULT_RETENTION);
        assert_eq!(config.cpu_sample_window(), Duration::from_secs(1));
        assert_eq!(config.store_dir(), PathBuf::from("telemetry/data"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_duration_units() {
        let d = Duration::from_secs(1);
        assert_eq!(parse_duration_or_default("90s", d, "f"), Duration::from_secs(90));
        assert_eq!(parse_duration_or_default("5m", d, "f"), Duration::from_secs(300));
        assert_eq!(
            parse_duration_or_default("7d", d, "f"),
            Duration::from_secs(7 * 86_400)
        );
        assert!(parse_duration_or_default("1month", d, "f") > Duration::from_secs(29 * 86_400));
    }

    #[test]
    fn test_parse_duration_falls_back() {
        let d = Duration::from_secs(42);
        assert_eq!(parse_duration_or_default("soon", d, "f"), d);
        assert_eq!(parse_duration_or_default("", d, "f"), d);
        assert_eq!(parse_duration_or_default("0s", d, "f"), d);
    }

    #[test]
    fn test_invalid_frequency_uses_default() {
        let config = AgentConfig::new("svc").with_sync_frequency("every now and then");
        assert_eq!(config.sync_frequency(), DEFAULT_SYNC_FREQUENCY);
    }

    #[test]
    fn test_empty_service_name_rejected() {
        assert!(AgentConfig::new("  ").validate().is_err());
    }

    #[test]
    fn test_threshold_overrides() {
        let overrides = ThresholdOverrides {
            max_cpu_load: Some(80.0),
            tasks_weight: Some(0.5),
            ..Default::default()
        };
        let merged = overrides.apply(Thresholds::default());

        assert_eq!(merged.cpu.limit, 80.0);
        assert_eq!(merged.cpu.weight, Thresholds::default().cpu.weight);
        assert_eq!(merged.tasks.weight, 0.5);
        assert_eq!(merged.memory, Thresholds::default().memory);
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: AgentConfig =
            serde_json::from_str(r#"{"service_name": "billing", "sync_frequency": "30s"}"#)
                .unwrap();
        assert_eq!(config.service_name, "billing");
        assert_eq!(config.sync_frequency(), Duration::from_secs(30));
        assert_eq!(config.retention_period, "7d");
    }
}
