//! Bearer auth for the worker and verifier gateway endpoints. Both read
//! a plain `Authorization: Bearer <token>` header; there is no session
//! or cookie layer in this API, only the two service-to-service
//! credentials the spec calls out.

use axum::http::HeaderMap;

use proofwork_core::auth::{split_bearer_token, verify_verifier_bearer, verify_worker_secret};
use proofwork_core::models::Worker;
use proofwork_core::ProofworkError;

use crate::error::ApiError;
use crate::state::AppState;

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiError> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError(ProofworkError::validation("missing bearer token")))
}

/// Resolves and authenticates the worker bearer token `{prefix}.{secret}`,
/// returning the worker row on success.
pub async fn authenticate_worker(state: &AppState, headers: &HeaderMap) -> Result<Worker, ApiError> {
    let token = bearer_token(headers)?;
    let (prefix, secret) = split_bearer_token(token)?;

    let worker = state
        .store
        .find_worker_by_token_prefix(prefix)
        .await
        .map_err(|e| ApiError(ProofworkError::store(e.to_string())))?
        .ok_or_else(|| ApiError(ProofworkError::validation("invalid worker token")))?;

    if worker.disabled {
        return Err(ApiError(ProofworkError::conflict("worker disabled")));
    }

    if !verify_worker_secret(secret, &state.config.worker_token_pepper, &worker.token_hmac_hash) {
        return Err(ApiError(ProofworkError::validation("invalid worker token")));
    }

    Ok(worker)
}

/// Checks the shared verifier gateway bearer secret. There's no
/// per-verifier identity to return: the gateway is one trusted process.
pub fn authenticate_verifier(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let token = bearer_token(headers)?;
    if !verify_verifier_bearer(token, &state.config.verifier_bearer_token) {
        return Err(ApiError(ProofworkError::validation("invalid verifier token")));
    }
    Ok(())
}
