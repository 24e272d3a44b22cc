//! Control API handlers.

use {
    axum::{
        Json, Router,
        extract::{Path, State, rejection::JsonRejection},
        response::IntoResponse,
        routing::{get, post},
    },
    serde::{Deserialize, Serialize},
    serde_json::{Value, json},
    wagate_sessions::{InitRequest, SendRequest, SessionSnapshot, StatusReport},
};

use crate::{error::ApiError, state::AppState};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/init", post(init_handler))
        .route("/disconnect", post(disconnect_handler))
        .route("/status/{profile_id}", get(status_handler))
        .route("/send", post(send_handler))
        .route("/health", get(health_handler))
        .route("/sessions", get(sessions_handler))
        .fallback(not_found_handler)
}

async fn init_handler(
    State(state): State<AppState>,
    payload: Result<Json<InitRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(request) = payload?;
    let outcome = state.manager.init(request).await?;
    Ok(Json(json!({ "success": true, "status": outcome })))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct DisconnectBody {
    profile_id: String,
}

async fn disconnect_handler(
    State(state): State<AppState>,
    payload: Result<Json<DisconnectBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    state.manager.disconnect(&body.profile_id).await?;
    Ok(Json(json!({ "success": true })))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    success: bool,
    profile_id: String,
    #[serde(flatten)]
    report: StatusReport,
}

async fn status_handler(
    State(state): State<AppState>,
    Path(profile_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let report = state.manager.status(&profile_id).await?;
    Ok(Json(StatusResponse {
        success: true,
        profile_id,
        report,
    }))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct SendBody {
    number: String,
    message: String,
    profile_id: Option<String>,
}

async fn send_handler(
    State(state): State<AppState>,
    payload: Result<Json<SendBody>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(body) = payload?;
    let receipt = state
        .manager
        .send_message(SendRequest {
            profile_id: body.profile_id,
            recipient: body.number,
            message: body.message,
        })
        .await?;
    Ok(Json(json!({
        "success": true,
        "messageId": receipt.message_id,
    })))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let health = state.manager.health().await;
    Json(json!({
        "status": health.status,
        "activeSessionCount": health.active_session_count,
        "connectedSessionCount": health.connected_session_count,
        "version": state.version,
    }))
}

#[derive(Serialize)]
struct SessionsResponse {
    success: bool,
    sessions: Vec<SessionSnapshot>,
}

async fn sessions_handler(State(state): State<AppState>) -> Json<SessionsResponse> {
    Json(SessionsResponse {
        success: true,
        sessions: state.manager.list().await,
    })
}

async fn not_found_handler() -> ApiError {
    ApiError::not_found()
}
