//! HTTP surface: request parsing, handler wiring, error → status mapping

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{post, put};
use axum::{body::Bytes, Json, Router};
use haven_core::{DeviceInfo, Event, EventBus, HavenError};
use haven_transfer::{PrepareUploadRequest, PrepareUploadResponse, RegistrationService, TransferCoordinator};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// Shared state for all protocol handlers.
#[derive(Clone)]
pub struct ApiState {
    pub registration: Arc<RegistrationService>,
    pub coordinator: Arc<TransferCoordinator>,
    pub events: EventBus,
    pub device_info: DeviceInfo,
    /// Destination for uploads whose session lost its folder
    pub default_folder_id: i64,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/api/v1/ping", post(ping))
        .route("/api/v1/register", post(register))
        .route("/api/v1/prepare-upload", post(prepare_upload))
        .route("/api/v1/upload", put(upload))
        .route("/api/v1/close-connection", post(close_connection))
        // payloads are bounded by prepare-upload declarations, not by a
        // transport-level cap
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Protocol error carrying its HTTP status.
pub struct ApiError(pub HavenError);

impl From<HavenError> for ApiError {
    fn from(err: HavenError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            HavenError::InvalidPin
            | HavenError::InvalidSession
            | HavenError::InvalidTransmission => StatusCode::UNAUTHORIZED,
            HavenError::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
            HavenError::TransferNotFound | HavenError::NotFound(_) => StatusCode::NOT_FOUND,
            HavenError::TransferComplete => StatusCode::CONFLICT,
            HavenError::InvalidRequest(_) | HavenError::DuplicateSession(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
struct PingRequest {
    #[serde(default)]
    alias: Option<String>,
}

async fn ping(
    State(state): State<ApiState>,
    body: Option<Json<PingRequest>>,
) -> Json<DeviceInfo> {
    let alias = body.and_then(|Json(request)| request.alias);
    debug!(?alias, "ping received");
    state.events.emit(Event::PingReceived { alias });
    Json(state.device_info.clone())
}

#[derive(Debug, Deserialize)]
struct RegisterRequest {
    pin: String,
    nonce: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RegisterResponse {
    session_id: String,
}

async fn register(
    State(state): State<ApiState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    state.events.emit(Event::RegisterRequestReceived {
        nonce: request.nonce.clone(),
    });

    let session_id = state
        .registration
        .create_session(&request.pin, &request.nonce)?;
    Ok(Json(RegisterResponse { session_id }))
}

async fn prepare_upload(
    State(state): State<ApiState>,
    Json(request): Json<PrepareUploadRequest>,
) -> Result<Json<PrepareUploadResponse>, ApiError> {
    let response = state.coordinator.prepare_upload(request).await?;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UploadParams {
    #[serde(default)]
    session_id: String,
    #[serde(default)]
    transmission_id: String,
    #[serde(default)]
    file_id: String,
}

impl UploadParams {
    fn validate(&self) -> Result<(), HavenError> {
        for (value, name) in [
            (&self.session_id, "sessionId"),
            (&self.transmission_id, "transmissionId"),
            (&self.file_id, "fileId"),
        ] {
            if value.is_empty() {
                return Err(HavenError::InvalidRequest(format!("{name} is required")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct SuccessResponse {
    success: bool,
}

async fn upload(
    State(state): State<ApiState>,
    Query(params): Query<UploadParams>,
    body: Bytes,
) -> Result<Json<SuccessResponse>, ApiError> {
    params.validate()?;

    state
        .coordinator
        .handle_upload(
            &params.session_id,
            &params.transmission_id,
            &params.file_id,
            body.to_vec(),
            state.default_folder_id,
        )
        .await?;

    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseConnectionRequest {
    session_id: String,
}

async fn close_connection(
    State(state): State<ApiState>,
    Json(request): Json<CloseConnectionRequest>,
) -> Result<Json<SuccessResponse>, ApiError> {
    state.coordinator.close_connection(&request.session_id)?;
    Ok(Json(SuccessResponse { success: true }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_for(err: HavenError) -> StatusCode {
        ApiError(err).into_response().status()
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(status_for(HavenError::InvalidPin), StatusCode::UNAUTHORIZED);
        assert_eq!(
            status_for(HavenError::TooManyAttempts),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            status_for(HavenError::InvalidSession),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(HavenError::InvalidTransmission),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(HavenError::TransferNotFound),
            StatusCode::NOT_FOUND
        );
        assert_eq!(status_for(HavenError::TransferComplete), StatusCode::CONFLICT);
        assert_eq!(
            status_for(HavenError::InvalidRequest("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(HavenError::DuplicateSession("s".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_for(HavenError::CryptoFailure),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(HavenError::Store("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_upload_params_validation() {
        let params = UploadParams {
            session_id: "s".into(),
            transmission_id: String::new(),
            file_id: "f".into(),
        };
        assert!(matches!(
            params.validate(),
            Err(HavenError::InvalidRequest(message)) if message.contains("transmissionId")
        ));
    }
}
