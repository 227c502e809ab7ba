//! In-process telemetry agent
//!
//! This crate provides the core functionality for:
//! - Sampling process and host resources on a schedule
//! - Scoring service health against configurable thresholds
//! - Persisting samples in an embedded time-series store with retention
//! - Profiling individual functions on demand
//! - Health checks and observability of the agent itself

pub mod agent;
pub mod collector;
pub mod config;
pub mod health;
pub mod models;
pub mod observability;
pub mod profiler;
pub mod scoring;
pub mod service;
pub mod storage;
pub mod sync;

pub use agent::{TelemetryAgent, AGENT_VERSION};
pub use config::{AgentConfig, ThresholdOverrides};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
pub use scoring::{HealthBand, HealthScore, ScoreError, Threshold, Thresholds};
pub use storage::StorageError;

// Allocator counters are only meaningful with the tracking allocator installed
#[cfg(test)]
#[global_allocator]
static GLOBAL: collector::TrackingAllocator = collector::TrackingAllocator::system();
