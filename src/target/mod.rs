//! Dummy HTTP target for local smoke runs.
//!
//! Routes:
//!
//!   GET  /status/:code    answers with `code`
//!   GET  /delay/:ms       answers 200 after `ms` milliseconds
//!   GET  /stats           `{"hits": n}`, requests served so far
//!   ANY  anything else    200 with `<method> <path>` as body
//!
//! Every response carries `X-Response-Time-Us` and `Server-Timing`.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Path, Request, State},
    http::{Method, StatusCode, Uri},
    middleware::{self as axum_mw, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

pub const RESPONSE_TIME_HEADER: &str = "X-Response-Time-Us";

#[derive(Debug, Default)]
pub struct TargetState {
    hits: AtomicU64,
}

impl TargetState {
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Serialize)]
struct Stats {
    hits: u64,
}

/// Builds the target's `Router` with its routes and middleware.
pub fn router(state: Arc<TargetState>) -> Router {
    Router::new()
        .route("/status/:code", get(status))
        .route("/delay/:ms", get(delay))
        .route("/stats", get(stats))
        .fallback(echo)
        .layer(axum_mw::from_fn_with_state(state.clone(), timing))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn bind(addr: &str) -> std::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// Serves on `listener` until `ctx` is cancelled.
pub async fn serve(listener: TcpListener, state: Arc<TargetState>, ctx: CancellationToken) -> std::io::Result<()> {
    let addr: SocketAddr = listener.local_addr()?;
    info!(%addr, "dummy target listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move { ctx.cancelled().await })
        .await?;
    info!(%addr, "dummy target stopped");
    Ok(())
}

// ─── Handlers ────────────────────────────────────────────────────

async fn status(Path(code): Path<u16>) -> Response {
    match StatusCode::from_u16(code) {
        Ok(code) => code.into_response(),
        Err(_) => (StatusCode::BAD_REQUEST, format!("invalid status {code}")).into_response(),
    }
}

async fn delay(Path(ms): Path<u64>) -> &'static str {
    tokio::time::sleep(Duration::from_millis(ms)).await;
    "ok"
}

async fn stats(State(state): State<Arc<TargetState>>) -> Json<Stats> {
    Json(Stats { hits: state.hits() })
}

async fn echo(method: Method, uri: Uri) -> String {
    format!("{method} {}", uri.path())
}

// ─── Middleware ──────────────────────────────────────────────────

/// Counts the request and stamps the handler wall time on the response.
async fn timing(State(state): State<Arc<TargetState>>, req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_owned();
    if path != "/stats" {
        state.hits.fetch_add(1, Ordering::Relaxed);
    }

    let start = Instant::now();
    let mut response = next.run(req).await;
    let elapsed = start.elapsed();
    let us = elapsed.as_micros();

    if let Ok(val) = us.to_string().parse() {
        response.headers_mut().insert(RESPONSE_TIME_HEADER, val);
    }
    let server_timing = format!("total;dur={:.3}", elapsed.as_secs_f64() * 1000.0);
    if let Ok(val) = server_timing.parse() {
        response.headers_mut().insert("Server-Timing", val);
    }

    debug!(status = response.status().as_u16(), %method, %path, us, "served");
    response
}
