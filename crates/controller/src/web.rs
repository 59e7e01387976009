use axum::extract::State;
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::state::SharedState;

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/healthz", get(healthz))
        .with_state(state)
}

async fn api_status(State(state): State<SharedState>) -> impl IntoResponse {
    let st = state.read().await;
    Json(st.to_status())
}

async fn healthz() -> &'static str {
    "ok"
}

// ---------------------------------------------------------------------------
// Server entry-point
// ---------------------------------------------------------------------------

/// Serve the status API. A bind or serve failure is logged; the control
/// loop keeps running without it.
pub async fn serve(state: SharedState, port: u16) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("status api disabled: failed to bind {addr}: {e}");
            return;
        }
    };

    info!("status api listening on http://{addr}");

    if let Err(e) = axum::serve(listener, router(state)).await {
        error!("status api stopped: {e}");
    }
}

// ===========================================================================
// Tests
// ===========================================================================
