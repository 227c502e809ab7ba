//! Telemetry agent host
//!
//! Runs the embedded agent for this process and serves its health and
//! Prometheus metrics over HTTP.

use anyhow::Result;
use std::sync::Arc;
use telemetry_lib::collector::TrackingAllocator;
use telemetry_lib::TelemetryAgent;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;

#[global_allocator]
static GLOBAL: TrackingAllocator = TrackingAllocator::system();

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    let config = config::HostConfig::load()?;
    info!(
        service = %config.service_name,
        data_dir = %config.data_dir.display(),
        "Telemetry agent configured"
    );

    let agent = Arc::new(TelemetryAgent::new(config.agent_config())?);
    agent.start().await;

    let info = agent.service_info();
    info!(
        service = %info.service_name,
        since = %info.service_start_time,
        uptime = %telemetry_lib::service::format_uptime(agent.uptime()),
        "Service start time loaded"
    );

    let state = api::AppState {
        health_registry: agent.health_registry().clone(),
    };
    let mut api_handle = tokio::spawn(api::serve(config.api_port, state));

    let reason = tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => "SIGINT received",
            Err(e) => {
                error!(error = %e, "Failed to listen for shutdown signal");
                "signal handler failed"
            }
        },
        served = &mut api_handle => {
            match served {
                Ok(Err(e)) => error!(error = %e, "API server stopped"),
                Err(e) => error!(error = %e, "API server task failed"),
                Ok(Ok(())) => {}
            }
            "API server stopped"
        }
    };

    agent.shutdown(reason).await;
    api_handle.abort();

    Ok(())
}
