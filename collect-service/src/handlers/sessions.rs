use crate::dtos::{CompleteResponse, SessionRequest, SessionResponse};
use crate::startup::AppState;
use axum::{
    Extension, Json,
    body::Bytes,
    extract::{OriginalUri, State},
    http::Method,
};
use chrono::Utc;
use service_core::error::AppError;
use service_core::middleware::tracing::RequestId;

/// `POST /sessions`: start an upload session or refresh its credentials.
pub async fn start_session(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Result<Json<SessionResponse>, AppError> {
    let requested_at = Utc::now();
    let request = SessionRequest::from_body(&body)?;

    let grant = state
        .sessions
        .start(&request, &request_id, requested_at)
        .await?;

    Ok(Json(SessionResponse::from(grant)))
}

/// `POST /complete`: confirm a finished session.
pub async fn complete_session(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Bytes,
) -> Result<Json<CompleteResponse>, AppError> {
    let request = SessionRequest::from_body(&body)?;

    state.sessions.complete(&request, &request_id).await?;

    Ok(Json(CompleteResponse { ok: true }))
}

pub async fn not_found(method: Method, OriginalUri(uri): OriginalUri) -> AppError {
    AppError::not_found(format!("404: {} {}", method, uri.path()))
}
