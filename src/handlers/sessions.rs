//! Session inspection and control endpoints.
//!
//! - `GET /api/v1/sessions`: ids of every live session
//! - `GET /api/v1/sessions/{id}`: turn state and counters
//! - `GET /api/v1/sessions/{id}/history`: the conversation so far
//! - `DELETE /api/v1/sessions/{id}`: end the call

use crate::{error::AppError, session::SessionId, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn list_sessions(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let sessions = state.registry.session_ids();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "count": sessions.len(),
        "capacity": state.registry.capacity(),
        "sessions": sessions
    })))
}

pub async fn get_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = SessionId::from(path.into_inner());
    let status = state
        .registry
        .status(&session_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session {} not found", session_id)))?;

    Ok(HttpResponse::Ok().json(status))
}

pub async fn get_session_history(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = SessionId::from(path.into_inner());
    let history = state
        .registry
        .history(&session_id)
        .await
        .ok_or_else(|| AppError::NotFound(format!("Session {} not found", session_id)))?;

    Ok(HttpResponse::Ok().json(json!({
        "session_id": session_id,
        "entries": history
    })))
}

pub async fn end_session(
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, AppError> {
    let session_id = SessionId::from(path.into_inner());
    if !state.registry.end(&session_id) {
        return Err(AppError::NotFound(format!(
            "Session {} not found",
            session_id
        )));
    }

    Ok(HttpResponse::Ok().json(json!({
        "status": "ended",
        "session_id": session_id,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
