//! YAML configuration: the monitored cluster/group/host topology plus daemon
//! settings (bind address, sweep interval, metric sinks).
//!
//! The file path comes from `OPWATCH_CONFIG` (default `opwatch.yaml`); a
//! missing or malformed file is a startup error, as are an empty cluster map
//! and a zero pull interval.

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::fs;

pub const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
pub const DEFAULT_HTTP_PORT: u16 = 42042;
pub const DEFAULT_STATSD_PORT: u16 = 8125;
pub const DEFAULT_PULL_INTERVAL_SECONDS: u64 = 3600;
pub const DEFAULT_AGENT_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_AGENT_PORT: u16 = 80;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    /// Sweep period in seconds.
    #[serde(rename = "pullInterval", default = "default_pull_interval")]
    pub pull_interval_seconds: u64,
    /// Per-request timeout towards one agent, in seconds.
    #[serde(rename = "agentTimeout", default = "default_agent_timeout")]
    pub agent_timeout_seconds: u64,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub clusters: HashMap<String, ClusterConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UiConfig {
    #[serde(default = "default_http_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub port: u16,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HTTP_HOST.into(),
            port: DEFAULT_HTTP_PORT,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ClusterConfig {
    pub groups: HashMap<String, GroupConfig>,
}

/// One set of hosts sharing a connection template and credentials. The agent
/// URL is either `urlPattern` verbatim or assembled from schema/port/path.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfig {
    #[serde(default)]
    pub url_pattern: Option<String>,
    #[serde(default)]
    pub path: String,
    #[serde(default = "default_agent_port")]
    pub port: u16,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub basic_auth: Option<BasicAuthCredentials>,
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            url_pattern: None,
            path: String::new(),
            port: DEFAULT_AGENT_PORT,
            secure: false,
            basic_auth: None,
            hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BasicAuthCredentials {
    pub user: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub statsd: Option<StatsdConfig>,
    #[serde(default)]
    pub prometheus: Option<PrometheusConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StatsdConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub host: String,
    #[serde(default = "default_statsd_port")]
    pub port: u16,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PrometheusConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub prefix: String,
}

fn default_pull_interval() -> u64 {
    DEFAULT_PULL_INTERVAL_SECONDS
}

fn default_agent_timeout() -> u64 {
    DEFAULT_AGENT_TIMEOUT_SECONDS
}

fn default_http_host() -> String {
    DEFAULT_HTTP_HOST.into()
}

fn default_http_port() -> u16 {
    DEFAULT_HTTP_PORT
}

fn default_agent_port() -> u16 {
    DEFAULT_AGENT_PORT
}

fn default_statsd_port() -> u16 {
    DEFAULT_STATSD_PORT
}

fn default_enabled() -> bool {
    true
}

pub async fn load_config() -> anyhow::Result<AppConfig> {
    let path = std::env::var("OPWATCH_CONFIG").unwrap_or_else(|_| "opwatch.yaml".into());
    let text = fs::read_to_string(&path)
        .await
        .with_context(|| format!("reading config file '{path}'"))?;
    parse_config(&text).with_context(|| format!("invalid config file '{path}'"))
}

fn parse_config(text: &str) -> anyhow::Result<AppConfig> {
    let config: AppConfig = serde_yaml::from_str(text)?;
    if config.clusters.is_empty() {
        bail!("no clusters configured, nothing to monitor");
    }
    if config.pull_interval_seconds == 0 {
        // a zero interval would make the sweep timer unconstructible
        bail!("pullInterval must be at least 1 second");
    }
    Ok(config)
}
