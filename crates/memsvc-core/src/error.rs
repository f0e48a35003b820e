use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Error vocabulary shared by every crate in the workspace.
///
/// Individual crates define their own narrower error enum (`CryptoError`,
/// `StoreError`, `AccessError`, ...) and convert into this one with `#[from]`
/// only at the point a result crosses into `memsvc-api`. This keeps a crate's
/// public API honest about which failures it can actually produce.
#[derive(Debug, Error)]
pub enum MemsvcError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("access denied: {0}")]
    AccessDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict {
        message: String,
        code: &'static str,
        details: serde_json::Value,
    },

    #[error("justification required for this admin action")]
    JustificationRequired,

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl MemsvcError {
    pub fn conflict(code: &'static str, message: impl Into<String>) -> Self {
        MemsvcError::Conflict {
            message: message.into(),
            code,
            details: serde_json::Value::Null,
        }
    }

    pub fn conflict_with_details(
        code: &'static str,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        MemsvcError::Conflict {
            message: message.into(),
            code,
            details,
        }
    }

    /// Machine-readable status code string, returned in the `code` field of
    /// every error response body.
    pub fn code(&self) -> &'static str {
        match self {
            MemsvcError::BadRequest(_) => "bad_request",
            MemsvcError::Unauthorized(_) => "unauthorized",
            MemsvcError::AccessDenied(_) => "forbidden",
            MemsvcError::NotFound(_) => "not_found",
            MemsvcError::Conflict { code, .. } => code,
            MemsvcError::JustificationRequired => "justification_required",
            MemsvcError::UpstreamUnavailable(_) => "upstream_unavailable",
            MemsvcError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status code for this error, as a plain `u16` so crates that only
    /// care about the failure kind (not the HTTP stack) can match on it
    /// without pulling in `axum::http::StatusCode` themselves.
    pub fn http_status(&self) -> u16 {
        match self {
            MemsvcError::BadRequest(_) => 400,
            MemsvcError::Unauthorized(_) => 401,
            MemsvcError::AccessDenied(_) => 403,
            MemsvcError::NotFound(_) => 404,
            MemsvcError::Conflict { .. } => 409,
            MemsvcError::JustificationRequired => 428,
            MemsvcError::UpstreamUnavailable(_) => 503,
            MemsvcError::Internal(_) => 500,
        }
    }

    /// True for the status codes that warrant a full stack trace in the log.
    pub fn is_server_fault(&self) -> bool {
        self.http_status() >= 500
    }
}

pub type Result<T> = std::result::Result<T, MemsvcError>;

/// Every handler across `memsvc-api` returns `Result<T, MemsvcError>`
/// directly; this is the one place the error-to-response mapping lives.
impl IntoResponse for MemsvcError {
    fn into_response(self) -> Response {
        if self.is_server_fault() {
            tracing::error!(error = %self, code = self.code(), "internal error");
        } else {
            tracing::warn!(error = %self, code = self.code(), "request failed");
        }

        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let details = match &self {
            MemsvcError::Conflict { details, .. } => details.clone(),
            _ => serde_json::Value::Null,
        };
        let body = json!({
            "code": self.code(),
            "error": self.to_string(),
            "details": details,
        });
        (status, Json(body)).into_response()
    }
}
