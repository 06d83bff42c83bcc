//! Submission coordinator: accepts a worker's attempt against a claimed
//! job, persists it, and schedules the verification-requested event.
//!
//! Grounded on `JobQueue::claim`'s shape (load, guard state, write,
//! schedule follow-on event, audit, log) generalized to the submit step.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use proofwork_core::models::{JobState, Submission};
use proofwork_core::{ProofworkError, ProofworkResult};
use proofwork_store::StoreLike;

fn verification_requested_key(submission_id: Uuid, attempt: i32) -> String {
    format!("verification:{submission_id}:{attempt}")
}

#[derive(Debug, Clone)]
pub struct SubmitRequest {
    pub job_id: Uuid,
    pub worker_id: Uuid,
    pub manifest: serde_json::Value,
    pub artifact_index: Vec<String>,
    pub idempotency_key: String,
}

pub struct SubmissionCoordinator {
    store: Arc<dyn StoreLike>,
}

impl SubmissionCoordinator {
    pub fn new(store: Arc<dyn StoreLike>) -> Self {
        Self { store }
    }

    /// Accepts a worker's attempt for a claimed job. Same idempotency
    /// key on a retry returns the original submission's id unchanged
    /// rather than minting a second attempt.
    pub async fn submit(&self, req: SubmitRequest) -> ProofworkResult<Uuid> {
        if let Some(existing) = self
            .store
            .find_submission_by_idempotency_key(req.job_id, req.worker_id, &req.idempotency_key)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?
        {
            return Ok(existing.id);
        }

        let job = self.store.get_job(req.job_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        if job.state != JobState::Claimed || job.claim_holder != Some(req.worker_id) {
            return Err(ProofworkError::conflict("job not claimed by this worker"));
        }

        let attempt = self
            .store
            .next_submission_attempt(req.job_id)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;

        let submission = Submission::new(req.job_id, req.worker_id, req.manifest, req.artifact_index, attempt, req.idempotency_key);

        self.store.insert_submission(&submission).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        self.store
            .set_job_state(req.job_id, JobState::Submitted)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;
        self.store
            .record_job_audit(req.job_id, Some(req.worker_id), "submitted", None)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;
        self.store
            .schedule_outbox_event(
                "verification.requested",
                &verification_requested_key(submission.id, attempt),
                &serde_json::json!({ "submissionId": submission.id, "attemptNo": attempt }),
            )
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;

        info!(job_id = %req.job_id, worker_id = %req.worker_id, submission_id = %submission.id, attempt, "submission accepted");
        Ok(submission.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proofwork_core::models::Bounty;
    use proofwork_core::models::Job;
    use proofwork_store::fake::FakeStore;

    async fn claimed_job(store: &FakeStore, worker_id: Uuid) -> Uuid {
        let bounty = Bounty::new(Uuid::new_v4(), 1500, 1, 0);
        let mut job = Job::new(bounty.id, serde_json::json!({}), None);
        job.state = JobState::Claimed;
        job.claim_holder = Some(worker_id);
        store.insert_job(&job).await.unwrap();
        job.id
    }

    #[tokio::test]
    async fn submit_marks_job_submitted_and_schedules_verification() {
        let fake = Arc::new(FakeStore::new());
        let worker_id = Uuid::new_v4();
        let job_id = claimed_job(&fake, worker_id).await;
        let store: Arc<dyn StoreLike> = fake.clone();
        let coordinator = SubmissionCoordinator::new(store);

        let submission_id = coordinator
            .submit(SubmitRequest {
                job_id,
                worker_id,
                manifest: serde_json::json!({"ok": true}),
                artifact_index: vec!["artifact-1".to_string()],
                idempotency_key: "idem-1".to_string(),
            })
            .await
            .unwrap();

        let job = fake.get_job(job_id).await.unwrap();
        assert_eq!(job.state, JobState::Submitted);
        let submission = fake.get_submission(submission_id).await.unwrap();
        assert_eq!(submission.attempt, 1);
    }

    #[tokio::test]
    async fn submit_is_idempotent_on_same_key() {
        let fake = Arc::new(FakeStore::new());
        let worker_id = Uuid::new_v4();
        let job_id = claimed_job(&fake, worker_id).await;
        let store: Arc<dyn StoreLike> = fake;
        let coordinator = SubmissionCoordinator::new(store);

        let req = SubmitRequest {
            job_id,
            worker_id,
            manifest: serde_json::json!({}),
            artifact_index: vec![],
            idempotency_key: "idem-1".to_string(),
        };
        let first = coordinator.submit(req.clone()).await.unwrap();
        let second = coordinator.submit(req).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn submit_rejected_when_job_not_claimed_by_worker() {
        let fake = Arc::new(FakeStore::new());
        let worker_id = Uuid::new_v4();
        let other_worker = Uuid::new_v4();
        let job_id = claimed_job(&fake, worker_id).await;
        let store: Arc<dyn StoreLike> = fake;
        let coordinator = SubmissionCoordinator::new(store);

        let err = coordinator
            .submit(SubmitRequest {
                job_id,
                worker_id: other_worker,
                manifest: serde_json::json!({}),
                artifact_index: vec![],
                idempotency_key: "idem-2".to_string(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ProofworkError::Conflict(_)));
    }
}
