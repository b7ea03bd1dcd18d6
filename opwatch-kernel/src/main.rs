//! Opwatch Kernel - fleet-wide PHP opcache observer
//!
//! Boot sequence: load the YAML topology, build the observer with its
//! configured telemetry sinks, start the periodic sweep schedule, then serve
//! the HTTP API on the configured address.

mod agent;
mod config;
mod http;
mod metrics;
mod models;
mod observer;
mod parser;
mod state;

use crate::agent::AgentClient;
use crate::config::load_config;
use crate::http::AppState;
use crate::metrics::prometheus::PrometheusSink;
use crate::metrics::statsd::StatsdSink;
use crate::observer::Observer;
use anyhow::{Context, Result};
use prometheus::Registry;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, Level};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let level = match std::env::var("OPWATCH_LOG").as_deref() {
        Ok("debug") => Level::DEBUG,
        _ => Level::INFO,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    let cfg = load_config().await?;
    info!(
        "observing {} cluster(s), sweeping every {}s",
        cfg.clusters.len(),
        cfg.pull_interval_seconds
    );

    let agent = AgentClient::new(Duration::from_secs(cfg.agent_timeout_seconds))
        .context("building the agent HTTP client")?;
    let mut observer = Observer::new(cfg.clusters.clone(), agent);

    if let Some(statsd) = cfg.metrics.statsd.as_ref().filter(|s| s.enabled) {
        let sink = StatsdSink::new(&statsd.host, statsd.port, &statsd.prefix).with_context(
            || format!("opening the statsd socket towards {}:{}", statsd.host, statsd.port),
        )?;
        observer.add_sink(Box::new(sink));
        info!("hierarchical metrics go to {}:{}", statsd.host, statsd.port);
    }

    let mut metrics_registry = None;
    if let Some(prom) = cfg.metrics.prometheus.as_ref().filter(|p| p.enabled) {
        let registry = Registry::new();
        let sink = PrometheusSink::new(&registry, &prom.prefix)
            .context("registering the exposition gauges")?;
        observer.add_sink(Box::new(sink));
        metrics_registry = Some(registry);
        info!("label-based metrics exposed under /api/nodes/statistics/prometheus");
    }

    let observer = Arc::new(observer);
    let statuses = observer.statuses();
    Observer::start_scheduling(
        observer.clone(),
        Duration::from_secs(cfg.pull_interval_seconds),
    )
    .context("starting the sweep schedule")?;

    let app = http::build_router(AppState {
        observer,
        statuses,
        metrics_registry,
    });

    let addr = format!("{}:{}", cfg.ui.host, cfg.ui.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("listening on http://{addr}");
    axum::serve(listener, app).await.context("http server")?;
    Ok(())
}
