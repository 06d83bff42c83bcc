//! HTTP route handlers. Thin: parse, authenticate, hand off to the
//! matching `proofwork-engine` coordinator, serialize the result.

use std::collections::BTreeSet;
use std::time::Duration;

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use proofwork_core::models::{Scorecard, Verdict};
use proofwork_core::ProofworkError;

use proofwork_chain::signer::recover_eip191_signer;
use proofwork_engine::job_queue::NextJobFilters;
use proofwork_engine::submission::SubmitRequest;
use proofwork_engine::verification::{ClaimRequest, VerdictOutcome, VerdictRequest};

use crate::auth::{authenticate_verifier, authenticate_worker};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/jobs/next", get(jobs_next))
        .route("/api/jobs/:id/claim", post(jobs_claim))
        .route("/api/jobs/:id/submit", post(jobs_submit))
        .route("/api/verifier/claim", post(verifier_claim))
        .route("/api/verifier/verdict", post(verifier_verdict))
        .route("/api/worker/payout-address/message", post(payout_address_message))
        .route("/api/worker/payout-address", post(payout_address_register))
        .route("/api/internal/reap-leases", post(internal_reap_leases))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct NextJobQuery {
    capability_tags: Option<String>,
    capability_tag: Option<String>,
    min_payout_cents: Option<i64>,
    require_task_type: Option<String>,
}

async fn jobs_next(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<NextJobQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let worker = authenticate_worker(&state, &headers).await?;

    let worker_capabilities: BTreeSet<String> = query
        .capability_tags
        .as_deref()
        .map(|csv| csv.split(',').map(str::trim).filter(|s| !s.is_empty()).map(str::to_string).collect())
        .unwrap_or_else(|| worker.capability_tags.clone());

    let filters = NextJobFilters {
        required_tag: query.capability_tag,
        min_payout_cents: query.min_payout_cents,
        require_task_type: query.require_task_type,
        canary_percent: 0,
    };

    let response = state.job_queue.next(&worker_capabilities, &filters).await?;
    Ok(Json(serde_json::to_value(response).map_err(ProofworkError::from)?))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ClaimHttpResponse {
    lease_expires_at: Option<DateTime<Utc>>,
}

async fn jobs_claim(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
) -> ApiResult<Json<ClaimHttpResponse>> {
    let worker = authenticate_worker(&state, &headers).await?;
    let outcome = state.job_queue.claim(job_id, worker.id).await?;
    Ok(Json(ClaimHttpResponse { lease_expires_at: outcome.job.lease_expires_at }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitHttpRequest {
    manifest: serde_json::Value,
    #[serde(default)]
    artifact_index: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SubmitHttpResponse {
    submission_id: Uuid,
}

async fn jobs_submit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(job_id): Path<Uuid>,
    Json(body): Json<SubmitHttpRequest>,
) -> ApiResult<Json<SubmitHttpResponse>> {
    let worker = authenticate_worker(&state, &headers).await?;
    let idempotency_key = headers
        .get("Idempotency-Key")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError(ProofworkError::validation("missing Idempotency-Key header")))?
        .to_string();

    let submission_id = state
        .submissions
        .submit(SubmitRequest {
            job_id,
            worker_id: worker.id,
            manifest: body.manifest,
            artifact_index: body.artifact_index,
            idempotency_key,
        })
        .await?;

    Ok(Json(SubmitHttpResponse { submission_id }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifierClaimHttpRequest {
    submission_id: Uuid,
    attempt_no: i32,
    idempotency_key: String,
    #[serde(default)]
    claim_ttl_sec: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifierClaimHttpResponse {
    verification_id: Uuid,
    claim_token: String,
    job_spec: serde_json::Value,
    submission: proofwork_core::models::Submission,
}

async fn verifier_claim(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<VerifierClaimHttpRequest>,
) -> ApiResult<Json<VerifierClaimHttpResponse>> {
    authenticate_verifier(&state, &headers)?;

    let claimed = state
        .verification
        .claim(ClaimRequest {
            submission_id: body.submission_id,
            attempt_no: body.attempt_no,
            idempotency_key: body.idempotency_key,
            claim_ttl: Duration::from_secs(body.claim_ttl_sec.unwrap_or(300)),
        })
        .await?;

    let submission = state
        .store
        .get_submission(claimed.submission_id)
        .await
        .map_err(|e| ApiError(ProofworkError::store(e.to_string())))?;
    let job = state.store.get_job(submission.job_id).await.map_err(|e| ApiError(ProofworkError::store(e.to_string())))?;

    Ok(Json(VerifierClaimHttpResponse {
        verification_id: claimed.verification_id,
        claim_token: claimed.claim_token,
        job_spec: job.task_descriptor,
        submission,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifierVerdictHttpRequest {
    verification_id: Uuid,
    claim_token: String,
    verdict: Verdict,
    #[serde(default)]
    scorecard: Option<Scorecard>,
    #[serde(default)]
    run_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OkResponse {
    ok: bool,
}

async fn verifier_verdict(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<VerifierVerdictHttpRequest>,
) -> ApiResult<Json<OkResponse>> {
    authenticate_verifier(&state, &headers)?;

    let verification = state
        .store
        .get_verification(body.verification_id)
        .await
        .map_err(|e| ApiError(ProofworkError::store(e.to_string())))?;
    let submission = state
        .store
        .get_submission(verification.submission_id)
        .await
        .map_err(|e| ApiError(ProofworkError::store(e.to_string())))?;

    let now = Utc::now();
    let outcome = state
        .verification
        .post_verdict(
            VerdictRequest {
                verification_id: body.verification_id,
                claim_token: body.claim_token,
                verdict: body.verdict,
                scorecard: body.scorecard,
                run_metadata: body.run_metadata,
            },
            submission.job_id,
            now,
        )
        .await?;

    if let VerdictOutcome::SchedulePayout { submission_id, .. } = outcome {
        state.payouts.create_for_submission(submission_id, now).await?;
    }

    Ok(Json(OkResponse { ok: true }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayoutAddressMessageRequest {
    chain: String,
    address: String,
}

#[derive(Debug, Serialize)]
struct PayoutAddressMessageResponse {
    message: String,
}

fn payout_address_challenge(worker_id: Uuid, chain: &str, address: &str) -> String {
    format!("link payout address:{worker_id}:{chain}:{address}")
}

async fn payout_address_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PayoutAddressMessageRequest>,
) -> ApiResult<Json<PayoutAddressMessageResponse>> {
    let worker = authenticate_worker(&state, &headers).await?;
    let message = payout_address_challenge(worker.id, &body.chain, &body.address);
    Ok(Json(PayoutAddressMessageResponse { message }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PayoutAddressRegisterRequest {
    chain: String,
    address: String,
    signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PayoutAddressRegisterResponse {
    address: String,
    unblocked_payouts: Vec<Uuid>,
}

async fn payout_address_register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<PayoutAddressRegisterRequest>,
) -> ApiResult<Json<PayoutAddressRegisterResponse>> {
    let worker = authenticate_worker(&state, &headers).await?;
    let message = payout_address_challenge(worker.id, &body.chain, &body.address);

    let recovered = recover_eip191_signer(&message, &body.signature)
        .map_err(|e| ApiError(ProofworkError::validation(format!("signature verification failed: {e}"))))?;
    let claimed: alloy_primitives::Address = body
        .address
        .parse()
        .map_err(|_| ApiError(ProofworkError::validation("address is not a valid EVM address")))?;
    if recovered != claimed {
        return Err(ApiError(ProofworkError::validation("signature does not match the claimed address")));
    }

    state
        .store
        .set_worker_payout_address(worker.id, &body.chain, &body.address)
        .await
        .map_err(|e| ApiError(ProofworkError::store(e.to_string())))?;

    let unblocked = state.payouts.unblock_for_worker(worker.id).await?;

    Ok(Json(PayoutAddressRegisterResponse { address: body.address, unblocked_payouts: unblocked }))
}

#[derive(Debug, Serialize)]
struct ReapLeasesResponse {
    reaped: usize,
}

async fn internal_reap_leases(State(state): State<AppState>) -> ApiResult<Json<ReapLeasesResponse>> {
    let reaped = state.job_queue.reap_expired_leases(500).await?;
    Ok(Json(ReapLeasesResponse { reaped: reaped.len() }))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use alloy_signer::Signer;
    use alloy_signer_local::PrivateKeySigner;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use proofwork_core::auth::issue_worker_token;
    use proofwork_core::models::Worker;
    use proofwork_core::Config;
    use proofwork_engine::payout::PayoutEngine;
    use proofwork_store::fake::FakeStore;
    use proofwork_store::StoreLike;
    use tower::ServiceExt;

    use super::*;

    fn test_state() -> (AppState, Arc<FakeStore>) {
        let store = Arc::new(FakeStore::new());
        let config = Arc::new(Config::for_tests());
        let payouts = Arc::new(PayoutEngine::new(
            store.clone(),
            config.proofwork_fee_bps,
            config.max_proofwork_fee_bps,
            config.proofwork_fee_wallet.clone(),
            None,
            None,
        ));
        let state = AppState::new(store.clone(), config, payouts);
        (state, store)
    }

    fn seed_worker(store: &FakeStore, pepper: &str) -> (Uuid, String) {
        let issued = issue_worker_token(pepper);
        let worker = Worker {
            id: Uuid::new_v4(),
            token_prefix: issued.token_prefix,
            token_hmac_hash: issued.token_hmac_hash,
            capability_tags: BTreeSet::new(),
            payout_chain: None,
            payout_address: None,
            payout_verified_at: None,
            disabled: false,
        };
        let worker_id = worker.id;
        store.seed_worker(worker);
        (worker_id, issued.bearer_token)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn jobs_next_without_bearer_token_is_rejected() {
        let (state, _store) = test_state();
        let app = router(state);

        let response =
            app.oneshot(Request::builder().uri("/api/jobs/next").body(Body::empty()).unwrap()).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn jobs_next_reports_idle_when_queue_is_empty() {
        let (state, store) = test_state();
        let (_worker_id, bearer_token) = seed_worker(&store, "test-pepper");
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/jobs/next")
                    .header("Authorization", format!("Bearer {bearer_token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["state"], "idle");
    }

    #[tokio::test]
    async fn jobs_next_rejects_a_disabled_worker() {
        let (state, store) = test_state();
        let issued = issue_worker_token("test-pepper");
        let worker = Worker {
            id: Uuid::new_v4(),
            token_prefix: issued.token_prefix,
            token_hmac_hash: issued.token_hmac_hash,
            capability_tags: BTreeSet::new(),
            payout_chain: None,
            payout_address: None,
            payout_verified_at: None,
            disabled: true,
        };
        store.seed_worker(worker);
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/api/jobs/next")
                    .header("Authorization", format!("Bearer {}", issued.bearer_token))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn verifier_endpoints_reject_a_wrong_bearer_token() {
        let (state, _store) = test_state();
        let app = router(state);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/verifier/claim")
                    .header("Authorization", "Bearer wrong-token")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_vec(&serde_json::json!({
                            "submissionId": Uuid::new_v4(),
                            "attemptNo": 1,
                            "idempotencyKey": "k1",
                        }))
                        .unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn payout_address_round_trip_links_a_verified_address() {
        let (state, store) = test_state();
        let (worker_id, bearer_token) = seed_worker(&store, "test-pepper");
        let signer = PrivateKeySigner::random();
        let address = signer.address();
        let app = router(state);

        let message_response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/worker/payout-address/message")
                    .header("Authorization", format!("Bearer {bearer_token}"))
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_vec(&serde_json::json!({
                            "chain": "base",
                            "address": format!("{address:#x}"),
                        }))
                        .unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(message_response.status(), StatusCode::OK);
        let message_body = body_json(message_response).await;
        let message = message_body["message"].as_str().unwrap().to_string();

        let signature = signer.sign_message(message.as_bytes()).await.unwrap();

        let register_response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/worker/payout-address")
                    .header("Authorization", format!("Bearer {bearer_token}"))
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::to_vec(&serde_json::json!({
                            "chain": "base",
                            "address": format!("{address:#x}"),
                            "signature": format!("0x{}", alloy_primitives::hex::encode(signature.as_bytes())),
                        }))
                        .unwrap(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(register_response.status(), StatusCode::OK);
        let worker = store.get_worker(worker_id).await.unwrap();
        assert!(worker.has_payout_address());
    }
}
