//! HTTP round trips against the per-host status agents: the detail fetch that
//! feeds the parser, and the remote cache reset. One request per call, no
//! retries; a failed host is simply retried on the next sweep.

use crate::config::GroupConfig;
use reqwest::StatusCode;
use std::time::Duration;

/// Template used when a group configures schema/port/path instead of a full
/// URL pattern.
const DEFAULT_URL_TEMPLATE: &str = "{schema}://{host}:{port}{path}";

/// Query marker selecting the script-level detail variant of the payload.
const DETAIL_QUERY: &str = "scripts=1";

/// Query marker asking the agent to reset its opcache.
const RESET_QUERY: &str = "command=reset";

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("transport failure for {url}: {source}")]
    Transport {
        url: String,
        source: reqwest::Error,
    },
    #[error("agent at {url} answered {status}")]
    HttpStatus { url: String, status: StatusCode },
    #[error("malformed agent payload: {0}")]
    MalformedPayload(String),
    #[error("agent payload carries no cached scripts")]
    NoData,
    #[error("reset rejected by {url}: {reason}")]
    ResetRejected { url: String, reason: String },
}

/// Resolves the agent base URL for one host of a group by substituting the
/// `{schema}`, `{host}`, `{port}` and `{path}` placeholders.
pub fn resolve_agent_url(group: &GroupConfig, host: &str) -> String {
    let schema = if group.secure { "https" } else { "http" };
    let template = group.url_pattern.as_deref().unwrap_or(DEFAULT_URL_TEMPLATE);
    template
        .replace("{schema}", schema)
        .replace("{host}", host)
        .replace("{port}", &group.port.to_string())
        .replace("{path}", &group.path)
}

fn detail_url(group: &GroupConfig, host: &str) -> String {
    format!("{}?{}", resolve_agent_url(group, host), DETAIL_QUERY)
}

fn reset_url(group: &GroupConfig, host: &str) -> String {
    format!("{}?{}", resolve_agent_url(group, host), RESET_QUERY)
}

pub struct AgentClient {
    http: reqwest::Client,
}

impl AgentClient {
    /// Builds a client enforcing the given per-request timeout, so one
    /// unreachable host cannot stall a whole sweep.
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http })
    }

    /// Fetches the detail payload for one host and returns the raw body.
    pub async fn fetch(&self, group: &GroupConfig, host: &str) -> Result<Vec<u8>, AgentError> {
        let url = detail_url(group, host);

        let mut request = self.http.get(&url);
        if let Some(auth) = &group.basic_auth {
            request = request.basic_auth(&auth.user, Some(&auth.password));
        }

        let response = request.send().await.map_err(|source| AgentError::Transport {
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::HttpStatus { url, status });
        }

        let body = response.bytes().await.map_err(|source| AgentError::Transport {
            url: url.clone(),
            source,
        })?;
        Ok(body.to_vec())
    }

    /// Issues the remote reset command. Any failure, transport or status,
    /// comes back as `ResetRejected`; the body is not parsed.
    pub async fn trigger_reset(&self, group: &GroupConfig, host: &str) -> Result<(), AgentError> {
        let url = reset_url(group, host);

        let mut request = self.http.get(&url);
        if let Some(auth) = &group.basic_auth {
            request = request.basic_auth(&auth.user, Some(&auth.password));
        }

        let response = request.send().await.map_err(|e| AgentError::ResetRejected {
            url: url.clone(),
            reason: e.to_string(),
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::ResetRejected {
                url,
                reason: status.to_string(),
            });
        }
        Ok(())
    }
}
