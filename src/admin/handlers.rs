use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::admin::AppState;
use crate::controller::{ControllerStatus, ReconcileOutcome, TriggerError};

#[derive(Serialize)]
pub struct Liveness {
    pub version: &'static str,
    pub status: &'static str,
}

#[derive(Serialize)]
pub struct Readiness {
    pub ready: bool,
    pub deployed_hash: Option<String>,
}

#[derive(Serialize)]
pub struct ReconcileResponse {
    pub outcome: Option<ReconcileOutcome>,
    pub error: Option<String>,
}

pub async fn health() -> Json<Liveness> {
    Json(Liveness {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
    })
}

pub async fn ready(State(state): State<AppState>) -> Response {
    let status = state.controller.status();
    let body = Readiness {
        ready: status.first_deploy_succeeded,
        deployed_hash: status.deployed_hash.clone(),
    };
    let code = if body.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body)).into_response()
}

pub async fn get_status(State(state): State<AppState>) -> Json<ControllerStatus> {
    Json(state.controller.status().as_ref().clone())
}

pub async fn trigger_reconcile(State(state): State<AppState>) -> Response {
    match state.trigger.request().await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ReconcileResponse { outcome: Some(outcome), error: None }),
        )
            .into_response(),
        Err(e @ TriggerError::ServiceStopped) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ReconcileResponse { outcome: None, error: Some(e.to_string()) }),
        )
            .into_response(),
        Err(TriggerError::Fatal(message)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ReconcileResponse { outcome: None, error: Some(message) }),
        )
            .into_response(),
    }
}
