//! Admin HTTP API.
//!
//! # Endpoints
//! - `GET /health`: liveness, always 200
//! - `GET /ready`: 200 once a configuration has been applied, else 503
//! - `GET /admin/status`: controller snapshot (bearer token)
//! - `POST /admin/reconcile`: run a reconciliation now (bearer token)

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::controller::{ReconcileTrigger, SyncController};
use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub controller: Arc<SyncController>,
    pub trigger: ReconcileTrigger,
    pub api_key: Arc<str>,
}

impl AppState {
    pub fn new(controller: Arc<SyncController>, trigger: ReconcileTrigger, api_key: &str) -> Self {
        Self {
            controller,
            trigger,
            api_key: Arc::from(api_key),
        }
    }
}

pub fn setup_admin_router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/reconcile", post(trigger_reconcile))
        .route_layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware));

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API until `cancel` fires.
pub async fn serve(
    listener: TcpListener,
    state: AppState,
    cancel: CancellationToken,
) -> Result<(), std::io::Error> {
    let addr = listener.local_addr()?;
    tracing::info!(address = %addr, "Admin API listening");

    axum::serve(listener, setup_admin_router(state))
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;

    tracing::info!("Admin API stopped");
    Ok(())
}
