//! HTTP API for the opwatch kernel.
//!
//! Read endpoints serve point-in-time copies of the aggregated status tree;
//! the refresh and reset triggers answer immediately and do their work in a
//! spawned task, so a slow fleet never stalls the caller.

use crate::models::ApcuStatus;
use crate::observer::SharedObserver;
use crate::state::{Shared, StatusTree};
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use prometheus::{Encoder, Registry, TextEncoder};
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use time::format_description::well_known::Rfc3339;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub observer: SharedObserver,
    pub statuses: Shared<StatusTree>,
    /// Present only when the label-based sink is enabled; gates the
    /// exposition route.
    pub metrics_registry: Option<Registry>,
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/api/nodes/statistics/opcache", get(opcache_statistics))
        .route("/api/nodes/statistics/apcu", get(apcu_statistics))
        .route("/api/nodes/statistics/refresh", get(trigger_refresh))
        .route(
            "/api/nodes/{clusterName}/{groupName}/{hostName}/resetOpcache",
            get(trigger_reset),
        )
        .route("/api/status", get(daemon_status));
    if state.metrics_registry.is_some() {
        router = router.route(
            "/api/nodes/statistics/prometheus",
            get(prometheus_exposition),
        );
    }
    router.with_state(state)
}

#[derive(Debug, Deserialize)]
struct PrettyParams {
    pretty: Option<String>,
}

impl PrettyParams {
    fn is_pretty(&self) -> bool {
        self.pretty.as_deref() == Some("1")
    }
}

fn json_body<T: serde::Serialize>(value: &T, pretty: bool) -> Response {
    let encoded = if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    };
    match encoded {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("failed to encode response body: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn opcache_statistics(
    State(state): State<AppState>,
    Query(params): Query<PrettyParams>,
) -> Response {
    let snapshot = state.statuses.lock().clone();
    json_body(&snapshot.nodes, params.is_pretty())
}

/// Same tree, narrowed to each host's companion cache section.
async fn apcu_statistics(
    State(state): State<AppState>,
    Query(params): Query<PrettyParams>,
) -> Response {
    let snapshot = state.statuses.lock().clone();
    let mut projection: HashMap<String, HashMap<String, HashMap<String, Option<ApcuStatus>>>> =
        HashMap::new();
    for (cluster, groups) in snapshot.nodes {
        let cluster_entry = projection.entry(cluster).or_default();
        for (group, hosts) in groups {
            let group_entry = cluster_entry.entry(group).or_default();
            for (host, status) in hosts {
                group_entry.insert(host, status.apcu);
            }
        }
    }
    json_body(&projection, params.is_pretty())
}

async fn trigger_refresh(State(state): State<AppState>) -> &'static str {
    let observer = state.observer.clone();
    tokio::spawn(async move { observer.refresh().await });
    "OK"
}

async fn trigger_reset(
    State(state): State<AppState>,
    Path((cluster, group, host)): Path<(String, String, String)>,
) -> &'static str {
    let observer = state.observer.clone();
    tokio::spawn(async move {
        if let Err(e) = observer.reset_target(&cluster, &group, &host).await {
            warn!("reset of {cluster}/{group}/{host} failed: {e}");
        }
    });
    "OK"
}

async fn daemon_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let last_update = state
        .statuses
        .lock()
        .last_update
        .and_then(|t| t.format(&Rfc3339).ok());
    Json(json!({
        "version": env!("CARGO_PKG_VERSION"),
        "lastStatusUpdate": last_update,
    }))
}

async fn prometheus_exposition(State(state): State<AppState>) -> Response {
    let Some(registry) = state.metrics_registry.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("failed to encode metrics exposition: {e}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }
    ([(header::CONTENT_TYPE, encoder.format_type())], buffer).into_response()
}
