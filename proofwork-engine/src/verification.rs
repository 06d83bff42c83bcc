//! Verification coordinator: the three-step claim/run/verdict
//! handshake between an untrusted verifier worker and the store.
//!
//! The gateway invocation itself (the "run" step) is an external
//! collaborator reached over HTTP; this module owns only the claim and
//! verdict edges of the handshake plus the state transitions they drive.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use proofwork_core::models::{JobState, Scorecard, SubmissionState, Verdict, Verification};
use proofwork_core::{ProofworkError, ProofworkResult};
use proofwork_store::StoreLike;

pub const CLAIM_TOKEN_BYTES: usize = 24; // 192 bits, well above the 128-bit floor

#[derive(Debug, Clone)]
pub struct ClaimRequest {
    pub submission_id: Uuid,
    pub attempt_no: i32,
    pub idempotency_key: String,
    pub claim_ttl: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub verification_id: Uuid,
    pub claim_token: String,
    pub submission_id: Uuid,
    pub attempt_no: i32,
}

#[derive(Debug, Clone)]
pub struct VerdictRequest {
    pub verification_id: Uuid,
    pub claim_token: String,
    pub verdict: Verdict,
    pub scorecard: Option<Scorecard>,
    pub run_metadata: Option<serde_json::Value>,
}

pub struct VerificationCoordinator {
    store: Arc<dyn StoreLike>,
    max_attempts: i32,
    dispute_window_sec: i64,
}

impl VerificationCoordinator {
    pub fn new(store: Arc<dyn StoreLike>, max_attempts: i32, dispute_window_sec: i64) -> Self {
        Self { store, max_attempts, dispute_window_sec }
    }

    pub async fn claim(&self, req: ClaimRequest) -> ProofworkResult<ClaimResponse> {
        if let Some(existing) = self
            .store
            .find_verification_by_idempotency_key(&req.idempotency_key)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?
        {
            return Ok(ClaimResponse {
                verification_id: existing.id,
                claim_token: existing.claim_token,
                submission_id: existing.submission_id,
                attempt_no: existing.attempt,
            });
        }

        let submission = self
            .store
            .get_submission(req.submission_id)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;

        if !matches!(submission.state, SubmissionState::Pending | SubmissionState::Verifying) {
            return Err(ProofworkError::conflict("submission not claimable for verification"));
        }
        if req.attempt_no != submission.attempt {
            return Err(ProofworkError::conflict("stale attempt number"));
        }

        let claim_token = generate_claim_token();
        let verification = Verification {
            id: Uuid::new_v4(),
            submission_id: req.submission_id,
            attempt: req.attempt_no,
            idempotency_key: req.idempotency_key,
            claim_token: claim_token.clone(),
            claim_expires_at: Utc::now() + chrono::Duration::from_std(req.claim_ttl).unwrap_or(chrono::Duration::seconds(300)),
            verdict: None,
            scorecard: None,
            run_metadata: None,
            created_at: Utc::now(),
            finished_at: None,
        };

        self.store.open_verification(&verification).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        self.store
            .set_submission_state(req.submission_id, SubmissionState::Verifying)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;

        info!(submission_id = %req.submission_id, attempt = req.attempt_no, "verification claimed");

        Ok(ClaimResponse {
            verification_id: verification.id,
            claim_token,
            submission_id: req.submission_id,
            attempt_no: req.attempt_no,
        })
    }

    /// Posts a verdict and drives the job/submission state machine
    /// accordingly. Returns `Some(job_id)` when a `payout.requested`
    /// event should be scheduled by the caller's outbox transaction,
    /// and `Some(submission_id)` re-enqueue info when exhaustion occurs.
    pub async fn post_verdict(&self, req: VerdictRequest, job_id: Uuid, now: DateTime<Utc>) -> ProofworkResult<VerdictOutcome> {
        let accepted = self
            .store
            .post_verdict(
                req.verification_id,
                &req.claim_token,
                req.verdict,
                req.scorecard.as_ref(),
                req.run_metadata.as_ref(),
            )
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;

        if !accepted {
            warn!(verification_id = %req.verification_id, "verdict rejected: claim token mismatch or already finished");
            return Err(ProofworkError::conflict("claim token invalid or expired"));
        }

        let verification = self.store.get_verification(req.verification_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        let submission_state = SubmissionState::from_verdict(req.verdict);
        self.store
            .set_submission_state(verification.submission_id, submission_state)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;

        match req.verdict {
            Verdict::Pass => {
                self.store
                    .set_job_state(job_id, JobState::Done)
                    .await
                    .map_err(|e| ProofworkError::store(e.to_string()))?;
                self.store
                    .set_final_verdict(job_id, Verdict::Pass)
                    .await
                    .map_err(|e| ProofworkError::store(e.to_string()))?;
                let available_at = now + chrono::Duration::seconds(self.dispute_window_sec.max(0));
                Ok(VerdictOutcome::SchedulePayout { submission_id: verification.submission_id, available_at })
            }
            Verdict::Fail | Verdict::Inconclusive => {
                if verification.attempt < self.max_attempts {
                    Ok(VerdictOutcome::Reenqueue { submission_id: verification.submission_id, next_attempt: verification.attempt + 1 })
                } else if req.verdict == Verdict::Inconclusive {
                    self.store
                        .set_job_state(job_id, JobState::Open)
                        .await
                        .map_err(|e| ProofworkError::store(e.to_string()))?;
                    Ok(VerdictOutcome::ReleasedToOpen)
                } else {
                    self.store
                        .set_final_verdict(job_id, Verdict::Fail)
                        .await
                        .map_err(|e| ProofworkError::store(e.to_string()))?;
                    Ok(VerdictOutcome::ExhaustedFailed)
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum VerdictOutcome {
    SchedulePayout { submission_id: Uuid, available_at: DateTime<Utc> },
    Reenqueue { submission_id: Uuid, next_attempt: i32 },
    ReleasedToOpen,
    ExhaustedFailed,
}

fn generate_claim_token() -> String {
    let mut bytes = [0u8; CLAIM_TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proofwork_core::models::{Bounty, Job, Submission};
    use proofwork_store::fake::FakeStore;

    async fn seeded(store: &FakeStore) -> (Uuid, Uuid) {
        let bounty = Bounty::new(Uuid::new_v4(), 1500, 1, 0);
        let job = Job::new(bounty.id, serde_json::json!({}), None);
        store.insert_job(&job).await.unwrap();
        let submission = Submission::new(job.id, Uuid::new_v4(), serde_json::json!({}), vec![], 1, "seed-key".to_string());
        store.insert_submission(&submission).await.unwrap();
        (job.id, submission.id)
    }

    #[tokio::test]
    async fn claim_is_idempotent_on_same_key() {
        let fake = Arc::new(FakeStore::new());
        let (_, submission_id) = seeded(&fake).await;
        let store: Arc<dyn StoreLike> = fake;
        let coordinator = VerificationCoordinator::new(store, 3, 0);

        let req = ClaimRequest {
            submission_id,
            attempt_no: 1,
            idempotency_key: "idem-1".to_string(),
            claim_ttl: Duration::from_secs(60),
        };
        let first = coordinator.claim(req.clone()).await.unwrap();
        let second = coordinator.claim(req).await.unwrap();
        assert_eq!(first.verification_id, second.verification_id);
        assert_eq!(first.claim_token, second.claim_token);
    }

    #[tokio::test]
    async fn pass_verdict_marks_job_done_and_schedules_payout() {
        let fake = Arc::new(FakeStore::new());
        let (job_id, submission_id) = seeded(&fake).await;
        let store: Arc<dyn StoreLike> = fake;
        let coordinator = VerificationCoordinator::new(store, 3, 0);

        let claimed = coordinator
            .claim(ClaimRequest { submission_id, attempt_no: 1, idempotency_key: "k".to_string(), claim_ttl: Duration::from_secs(60) })
            .await
            .unwrap();

        let outcome = coordinator
            .post_verdict(
                VerdictRequest {
                    verification_id: claimed.verification_id,
                    claim_token: claimed.claim_token,
                    verdict: Verdict::Pass,
                    scorecard: None,
                    run_metadata: None,
                },
                job_id,
                Utc::now(),
            )
            .await
            .unwrap();

        assert!(matches!(outcome, VerdictOutcome::SchedulePayout { .. }));
    }

    #[tokio::test]
    async fn fail_verdict_below_max_attempts_reenqueues() {
        let fake = Arc::new(FakeStore::new());
        let (job_id, submission_id) = seeded(&fake).await;
        let store: Arc<dyn StoreLike> = fake;
        let coordinator = VerificationCoordinator::new(store, 3, 0);

        let claimed = coordinator
            .claim(ClaimRequest { submission_id, attempt_no: 1, idempotency_key: "k".to_string(), claim_ttl: Duration::from_secs(60) })
            .await
            .unwrap();

        let outcome = coordinator
            .post_verdict(
                VerdictRequest {
                    verification_id: claimed.verification_id,
                    claim_token: claimed.claim_token,
                    verdict: Verdict::Fail,
                    scorecard: None,
                    run_metadata: None,
                },
                job_id,
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(outcome, VerdictOutcome::Reenqueue { submission_id, next_attempt: 2 });
    }

    #[tokio::test]
    async fn verdict_with_wrong_token_is_rejected() {
        let fake = Arc::new(FakeStore::new());
        let (job_id, submission_id) = seeded(&fake).await;
        let store: Arc<dyn StoreLike> = fake;
        let coordinator = VerificationCoordinator::new(store, 3, 0);

        let claimed = coordinator
            .claim(ClaimRequest { submission_id, attempt_no: 1, idempotency_key: "k".to_string(), claim_ttl: Duration::from_secs(60) })
            .await
            .unwrap();

        let err = coordinator
            .post_verdict(
                VerdictRequest {
                    verification_id: claimed.verification_id,
                    claim_token: "wrong-token".to_string(),
                    verdict: Verdict::Pass,
                    scorecard: None,
                    run_metadata: None,
                },
                job_id,
                Utc::now(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProofworkError::Conflict(_)));
    }
}
