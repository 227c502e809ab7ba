//! Health scoring
//!
//! Converts a snapshot's CPU, memory and task figures into a 0-100 health
//! percentage. Each dimension contributes `actual / limit * weight` of
//! penalty; the summed penalty is subtracted from 100 and clamped.

use crate::models::ServiceSnapshot;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Percentage above which a service counts as healthy
pub const HEALTHY_ABOVE: f64 = 50.0;

/// A limit and the weight its ratio carries in the score
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub limit: f64,
    pub weight: f64,
}

impl Threshold {
    pub const fn new(limit: f64, weight: f64) -> Self {
        Self { limit, weight }
    }
}

/// Limits for every scored dimension
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Service CPU load in percent
    pub cpu: Threshold,
    /// Service memory load in percent
    pub memory: Threshold,
    /// Live task count
    pub tasks: Threshold,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            cpu: Threshold::new(95.0, 0.4),
            memory: Threshold::new(95.0, 0.4),
            tasks: Threshold::new(100.0, 0.2),
        }
    }
}

impl Thresholds {
    /// Check every dimension, naming the first invalid one
    pub fn validate(&self) -> Result<(), ScoreError> {
        for (dimension, threshold) in self.dimensions() {
            if threshold.limit == 0.0 {
                return Err(ScoreError::ZeroLimit { dimension });
            }
            if !threshold.limit.is_finite() || threshold.limit < 0.0 {
                return Err(ScoreError::InvalidLimit {
                    dimension,
                    limit: threshold.limit,
                });
            }
            if !threshold.weight.is_finite() || threshold.weight < 0.0 {
                return Err(ScoreError::InvalidWeight {
                    dimension,
                    weight: threshold.weight,
                });
            }
        }
        Ok(())
    }

    fn dimensions(&self) -> [(&'static str, Threshold); 3] {
        [("cpu", self.cpu), ("memory", self.memory), ("tasks", self.tasks)]
    }
}

/// Threshold configuration errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoreError {
    #[error("{dimension} threshold limit is zero")]
    ZeroLimit { dimension: &'static str },

    #[error("{dimension} threshold limit {limit} is not a positive number")]
    InvalidLimit { dimension: &'static str, limit: f64 },

    #[error("{dimension} threshold weight {weight} is not a non-negative number")]
    InvalidWeight { dimension: &'static str, weight: f64 },

    #[error("{dimension} reading {actual} is not a finite number")]
    InvalidReading { dimension: &'static str, actual: f64 },
}

/// The live thresholds shared by the agent
///
/// Readers get a copy; a replace only affects scoring that starts after it.
/// The lock is never held across an await point other than its own.
#[derive(Debug, Clone, Default)]
pub struct ThresholdConfig {
    inner: Arc<RwLock<Thresholds>>,
}

impl ThresholdConfig {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            inner: Arc::new(RwLock::new(thresholds)),
        }
    }

    /// Replace the live thresholds after validating them
    pub async fn configure(&self, thresholds: Thresholds) -> Result<(), ScoreError> {
        thresholds.validate()?;
        *self.inner.write().await = thresholds;
        Ok(())
    }

    pub async fn get(&self) -> Thresholds {
        *self.inner.read().await
    }

    #[cfg(test)]
    pub(crate) fn inner_for_tests(&self) -> &RwLock<Thresholds> {
        &self.inner
    }
}

/// Figures the scorer reads from a snapshot
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreInputs {
    pub cpu_load: f64,
    pub memory_load: f64,
    pub tasks: f64,
}

impl From<&ServiceSnapshot> for ScoreInputs {
    fn from(snapshot: &ServiceSnapshot) -> Self {
        Self {
            cpu_load: snapshot.cpu.service_cpu_load,
            memory_load: snapshot.memory.service_memory_load,
            tasks: snapshot.tasks as f64,
        }
    }
}

/// Qualitative band for a health percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthBand {
    Outstanding,
    Impressive,
    Solid,
    Fair,
    Wobbly,
    Oops,
}

impl HealthBand {
    pub fn from_percent(percent: f64) -> Self {
        match percent {
            p if p >= 90.0 => HealthBand::Outstanding,
            p if p >= 85.0 => HealthBand::Impressive,
            p if p >= 70.0 => HealthBand::Solid,
            p if p >= 50.0 => HealthBand::Fair,
            p if p >= 30.0 => HealthBand::Wobbly,
            _ => HealthBand::Oops,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HealthBand::Outstanding => "Outstanding",
            HealthBand::Impressive => "Impressive",
            HealthBand::Solid => "Solid",
            HealthBand::Fair => "Fair",
            HealthBand::Wobbly => "Wobbly",
            HealthBand::Oops => "Oops",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            HealthBand::Outstanding => "Outstanding! The service is running with plenty of headroom.",
            HealthBand::Impressive => "Impressive. Resource usage is well within limits.",
            HealthBand::Solid => "Solid. The service is healthy with moderate load.",
            HealthBand::Fair => "Fair. Load is noticeable; keep an eye on it.",
            HealthBand::Wobbly => "Wobbly. The service is close to its limits.",
            HealthBand::Oops => "Oops! The service is over its limits and needs attention.",
        }
    }
}

impl fmt::Display for HealthBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Derived health of the service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthScore {
    /// In `[0, 100]`
    pub percent: f64,
    pub healthy: bool,
    pub band: HealthBand,
    pub message: String,
}

impl HealthScore {
    fn from_percent(percent: f64) -> Self {
        let band = HealthBand::from_percent(percent);
        Self {
            percent,
            healthy: percent > HEALTHY_ABOVE,
            band,
            message: band.message().to_string(),
        }
    }
}

/// Score a snapshot against thresholds
pub fn score(inputs: ScoreInputs, thresholds: &Thresholds) -> Result<HealthScore, ScoreError> {
    thresholds.validate()?;

    let readings = [
        ("cpu", inputs.cpu_load, thresholds.cpu),
        ("memory", inputs.memory_load, thresholds.memory),
        ("tasks", inputs.tasks, thresholds.tasks),
    ];

    let mut penalty = 0.0;
    for (dimension, actual, threshold) in readings {
        if !actual.is_finite() {
            return Err(ScoreError::InvalidReading { dimension, actual });
        }
        // Ratios above 1 are deliberately uncapped
        penalty += actual / threshold.limit * threshold.weight;
    }

    let percent = (100.0 - penalty * 100.0).clamp(0.0, 100.0);
    Ok(HealthScore::from_percent(percent))
}

/// Score a snapshot directly
pub fn score_snapshot(
    snapshot: &ServiceSnapshot,
    thresholds: &Thresholds,
) -> Result<HealthScore, ScoreError> {
    score(ScoreInputs::from(snapshot), thresholds)
}
