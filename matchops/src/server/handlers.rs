//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::State,
    Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::deploy::executor::DeploymentStatusView;
use crate::errors::{DeployError, OpsError, SecurityError};
use crate::models::deployment::{DeploymentOptions, DeploymentOutcome};
use crate::models::security::SecurityAlert;
use crate::security::pipeline::CheckKind;
use crate::server::guard::CleanParams;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// Error body returned by every failing route
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,

    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

/// An error with its HTTP status
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub reasons: Vec<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            reasons: Vec::new(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            error!("Request failed: {}", self.message);
        }
        let body = ErrorResponse {
            error: self.message,
            reasons: self.reasons,
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<DeployError> for ApiError {
    fn from(err: DeployError) -> Self {
        let status = match &err {
            DeployError::ValidationFailed(_) => StatusCode::BAD_REQUEST,
            DeployError::InProgress(_) => StatusCode::CONFLICT,
            DeployError::StageFailed { .. }
            | DeployError::RollbackFailed { .. }
            | DeployError::LogStore(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

impl From<SecurityError> for ApiError {
    /// Rate limiting wins over authentication, then authorization; any
    /// other rejection is a bad request
    fn from(err: SecurityError) -> Self {
        let SecurityError::ValidationFailed { reasons, report } = &err else {
            return Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        };

        let failed = |check| report.outcome(check).is_some_and(|o| !o.passed);
        let status = if failed(CheckKind::RateLimit) {
            StatusCode::TOO_MANY_REQUESTS
        } else if failed(CheckKind::Authentication) {
            StatusCode::UNAUTHORIZED
        } else if failed(CheckKind::Authorization) {
            StatusCode::FORBIDDEN
        } else {
            StatusCode::BAD_REQUEST
        };

        Self {
            status,
            message: err.to_string(),
            reasons: reasons.clone(),
        }
    }
}

impl From<OpsError> for ApiError {
    fn from(err: OpsError) -> Self {
        match err {
            OpsError::Deploy(e) => e.into(),
            OpsError::Security(e) => e.into(),
            OpsError::NotFound(what) => Self::new(StatusCode::NOT_FOUND, what),
            OpsError::ValidationError(msg) => Self::new(StatusCode::BAD_REQUEST, msg),
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, other.to_string()),
        }
    }
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub version: String,
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "matchops".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    Json(version_info())
}

/// Run a release
pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Json(options): Json<DeploymentOptions>,
) -> Result<Json<DeploymentOutcome>, ApiError> {
    let outcome = state.deployments.deploy(options).await?;
    Ok(Json(outcome))
}

/// Status and log rows of one deployment
pub async fn deployment_status_handler(
    State(state): State<Arc<ServerState>>,
    Extension(params): Extension<CleanParams>,
) -> Result<Json<DeploymentStatusView>, ApiError> {
    let deployment_id = params
        .get("id")
        .ok_or_else(|| ApiError::new(StatusCode::BAD_REQUEST, "Missing deployment id"))?;
    match state.deployments.status(deployment_id).await? {
        Some(view) => Ok(Json(view)),
        None => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("Deployment {} not found", deployment_id),
        )),
    }
}

/// Alerts raised by the security monitor
pub async fn alerts_handler(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Vec<SecurityAlert>>, ApiError> {
    let alerts = state.alerts.list().await?;
    Ok(Json(alerts))
}
