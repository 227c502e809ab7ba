//! Host configuration, read from `TELEMETRY_*` environment variables

use anyhow::{bail, Context, Result};
use config::builder::DefaultState;
use config::ConfigBuilder;
use serde::Deserialize;
use std::path::PathBuf;
use telemetry_lib::{AgentConfig, ThresholdOverrides};

/// Binary configuration
///
/// Every field maps to one variable, e.g. `TELEMETRY_SYNC_FREQUENCY=30s` or
/// `TELEMETRY_MAX_CPU_LOAD=80`.
#[derive(Debug, Clone, Deserialize)]
pub struct HostConfig {
    /// Name the samples are recorded under; required
    pub service_name: String,

    /// Port for health and metrics endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default = "default_sync_frequency")]
    pub sync_frequency: String,

    #[serde(default = "default_retention_period")]
    pub retention_period: String,

    /// Defaults to the machine's host name
    pub host_label: Option<String>,

    pub cpu_sample_window_ms: Option<u64>,

    pub max_cpu_load: Option<f64>,
    pub cpu_weight: Option<f64>,
    pub max_memory_load: Option<f64>,
    pub memory_weight: Option<f64>,
    pub max_tasks: Option<f64>,
    pub tasks_weight: Option<f64>,
}

fn default_api_port() -> u16 {
    8080
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

impl HostConfig {
    /// Load configuration from the environment
    pub fn load() -> Result<Self> {
        Self::from_builder(
            config::Config::builder()
                .add_source(config::Environment::with_prefix("TELEMETRY").try_parsing(true)),
        )
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self> {
        let config: Self = builder
            .build()
            .context("Failed to read environment")?
            .try_deserialize()
            .context("Invalid TELEMETRY_* configuration")?;

        if config.service_name.trim().is_empty() {
            bail!("TELEMETRY_SERVICE_NAME must not be empty");
        }
        Ok(config)
    }

    /// Library configuration for the embedded agent
    pub fn agent_config(&self) -> AgentConfig {
        let mut agent = AgentConfig::new(&self.service_name)
            .with_data_dir(&self.data_dir)
            .with_sync_frequency(&self.sync_frequency)
            .with_retention_period(&self.retention_period)
            .with_thresholds(ThresholdOverrides {
                max_cpu_load: self.max_cpu_load,
                cpu_weight: self.cpu_weight,
                max_memory_load: self.max_memory_load,
                memory_weight: self.memory_weight,
                max_tasks: self.max_tasks,
                tasks_weight: self.tasks_weight,
            });

        if let Some(host) = &self.host_label {
            agent = agent.with_host_label(host);
        }
        if let Some(window_ms) = self.cpu_sample_window_ms {
            agent = agent.with_cpu_sample_window(std::time::Duration::from_millis(window_ms));
        }
        agent
    }
}
