/*!
HTTP stub standing in for one PHP status agent.

Binds an ephemeral localhost port and answers every route according to its
configured [`StubBehavior`], counting detail fetches and reset commands so
tests can assert on the traffic they caused.
*/

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

/// How the stub answers incoming requests.
#[derive(Debug, Clone)]
pub enum StubBehavior {
    /// Answer detail fetches with this JSON body; resets are acknowledged.
    Payload(String),
    /// Answer everything with this HTTP status code.
    Status(u16),
    /// Sleep before answering, to exercise client timeouts.
    Hang(Duration),
    /// Sleep before answering the first request only; later requests answer
    /// immediately. Like `Hang`, answers 204.
    HangOnce(Duration),
}

#[derive(Clone)]
struct StubState {
    behavior: Arc<StubBehavior>,
    fetches: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
    hung: Arc<AtomicBool>,
}

pub struct StubAgent {
    addr: SocketAddr,
    fetches: Arc<AtomicUsize>,
    resets: Arc<AtomicUsize>,
    server: JoinHandle<()>,
}

impl StubAgent {
    pub async fn spawn(behavior: StubBehavior) -> Result<Self> {
        let fetches = Arc::new(AtomicUsize::new(0));
        let resets = Arc::new(AtomicUsize::new(0));
        let state = StubState {
            behavior: Arc::new(behavior),
            fetches: fetches.clone(),
            resets: resets.clone(),
            hung: Arc::new(AtomicBool::new(false)),
        };

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("binding the stub agent listener")?;
        let addr = listener
            .local_addr()
            .context("reading the stub agent address")?;

        let app = Router::new().fallback(answer).with_state(state);
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            addr,
            fetches,
            resets,
            server,
        })
    }

    /// `host:port` identifier, usable directly as a configured host together
    /// with a `http://{host}/...` URL pattern.
    pub fn host_id(&self) -> String {
        self.addr.to_string()
    }

    /// Detail fetches (`scripts=1`) received so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    /// Reset commands (`command=reset`) received so far.
    pub fn reset_count(&self) -> usize {
        self.resets.load(Ordering::SeqCst)
    }
}

impl Drop for StubAgent {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn answer(State(state): State<StubState>, uri: Uri) -> Response {
    let query = uri.query().unwrap_or_default();
    let is_reset = query.contains("command=reset");
    if is_reset {
        state.resets.fetch_add(1, Ordering::SeqCst);
    } else if query.contains("scripts=1") {
        state.fetches.fetch_add(1, Ordering::SeqCst);
    }

    match state.behavior.as_ref() {
        StubBehavior::Payload(body) => {
            if is_reset {
                (StatusCode::OK, r#"{"error":null}"#).into_response()
            } else {
                (StatusCode::OK, body.clone()).into_response()
            }
        }
        StubBehavior::Status(code) => StatusCode::from_u16(*code)
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            .into_response(),
        StubBehavior::Hang(pause) => {
            tokio::time::sleep(*pause).await;
            StatusCode::NO_CONTENT.into_response()
        }
        StubBehavior::HangOnce(pause) => {
            if !state.hung.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(*pause).await;
            }
            StatusCode::NO_CONTENT.into_response()
        }
    }
}
