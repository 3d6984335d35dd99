// src/api.rs
//! HTTP surface: the two entry points, read-only lookups, health and metrics.

use std::any::Any;
use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::CorsLayer;
use tracing::{error, warn};

use crate::analyze::reply::FALLBACK_REPLY;
use crate::metrics::Metrics;
use crate::service::{ChatRequest, RiskEngine};
use crate::snapshot::AssessmentRequest;

const DEFAULT_PREDICTION_LIMIT: usize = 20;
const MAX_PREDICTION_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<RiskEngine>,
}

pub fn create_router(engine: Arc<RiskEngine>, metrics: &Metrics) -> Router {
    let state = AppState { engine };

    // Chat panics still answer with the counselor redirect.
    let chat = Router::new()
        .route("/api/chat", post(chat))
        .layer(CatchPanicLayer::custom(chat_panic));

    Router::new()
        .route("/health", get(health))
        .route("/api/risk-assessment", post(risk_assessment))
        .route("/api/students/{id}/predictions", get(student_predictions))
        .route("/api/students/{id}/alerts", get(student_alerts))
        .route("/api/students/{id}/conversation", get(student_conversation))
        .merge(chat)
        .merge(metrics.router())
        .layer(CatchPanicLayer::custom(generic_panic))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn panic_text(err: &(dyn Any + Send)) -> String {
    if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    }
}

fn generic_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    error!(panic = %panic_text(err.as_ref()), "request handler panicked");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "The request could not be processed due to a technical problem. Please try again later." })),
    )
        .into_response()
}

fn chat_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    error!(panic = %panic_text(err.as_ref()), "chat handler panicked");
    chat_error(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
}

fn chat_error(status: StatusCode, detail: impl Into<String>) -> Response {
    (
        status,
        Json(json!({
            "response": FALLBACK_REPLY,
            "error": true,
            "detail": detail.into(),
        })),
    )
        .into_response()
}

fn bad_request(message: impl Into<String>) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": message.into() })),
    )
        .into_response()
}

fn storage_unavailable() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "storage is temporarily unavailable" })),
    )
        .into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn risk_assessment(
    State(state): State<AppState>,
    payload: Result<Json<AssessmentRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(rejection) => return bad_request(rejection.body_text()),
    };
    match state.engine.assess_student(request).await {
        Ok(out) => Json(out).into_response(),
        Err(e) => bad_request(e.to_string()),
    }
}

async fn chat(
    State(state): State<AppState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(p) => p,
        Err(rejection) => return chat_error(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    match state.engine.chat_turn(request).await {
        Ok(out) => Json(out).into_response(),
        Err(e) => chat_error(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[derive(Debug, Deserialize)]
struct LookupQuery {
    limit: Option<usize>,
}

async fn student_predictions(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
    Query(q): Query<LookupQuery>,
) -> Response {
    let limit = q
        .limit
        .unwrap_or(DEFAULT_PREDICTION_LIMIT)
        .clamp(1, MAX_PREDICTION_LIMIT);
    match state.engine.predictions(&student_id, limit).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            warn!(error = %e, "prediction lookup failed");
            storage_unavailable()
        }
    }
}

async fn student_alerts(State(state): State<AppState>, Path(student_id): Path<String>) -> Response {
    match state.engine.alerts(&student_id).await {
        Ok(rows) => Json(rows).into_response(),
        Err(e) => {
            warn!(error = %e, "alert lookup failed");
            storage_unavailable()
        }
    }
}

async fn student_conversation(
    State(state): State<AppState>,
    Path(student_id): Path<String>,
) -> Response {
    match state.engine.conversation(&student_id).await {
        Ok(Some(c)) => Json(c).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no conversation for this student" })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "conversation lookup failed");
            storage_unavailable()
        }
    }
}
