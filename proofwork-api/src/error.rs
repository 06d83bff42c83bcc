//! Maps `ProofworkError` onto the `{error: {code, message}}` HTTP
//! payload. Status codes follow the propagation policy: validation and
//! conflict are caller mistakes (4xx), transient and chain errors ask
//! the caller to retry (503/502), everything else is a server fault.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use proofwork_core::ProofworkError;

pub struct ApiError(pub ProofworkError);

impl From<ProofworkError> for ApiError {
    fn from(err: ProofworkError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ProofworkError::Validation(_) | ProofworkError::Serialization(_) => StatusCode::BAD_REQUEST,
            ProofworkError::Conflict(_) => StatusCode::CONFLICT,
            ProofworkError::NotFound(_) => StatusCode::NOT_FOUND,
            ProofworkError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            ProofworkError::Chain(_) => StatusCode::BAD_GATEWAY,
            ProofworkError::Store(_) | ProofworkError::Config(_) | ProofworkError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self.0, "request failed");
        }

        let body = Json(serde_json::json!({
            "error": { "code": self.0.code(), "message": self.0.to_string() }
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
