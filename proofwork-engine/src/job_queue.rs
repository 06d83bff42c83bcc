//! Job queue coordinator: `next` (candidate selection honoring the
//! backpressure gate, capability subset, and canary partitioning) and
//! `claim` (the atomic row-lock race), plus the lease reaper.
//!
//! Grounded on the request/response struct shapes and `info!`/`warn!`
//! logging style of the teacher's task manager, generalized from a
//! single in-memory `HashMap` to the store trait seam.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use proofwork_core::models::Job;
use proofwork_core::{ProofworkError, ProofworkResult};
use proofwork_store::StoreLike;

use crate::backpressure::BackpressureGate;

#[derive(Debug, Clone, Default)]
pub struct NextJobFilters {
    pub required_tag: Option<String>,
    pub min_payout_cents: Option<i64>,
    pub require_task_type: Option<String>,
    pub canary_percent: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum NextJobResponse {
    Job { job: Job },
    Idle { reason: String },
}

#[derive(Debug)]
pub struct ClaimOutcome {
    pub job: Job,
}

pub struct JobQueue {
    store: Arc<dyn StoreLike>,
    gate: BackpressureGate,
    default_lease_sec: i64,
}

impl JobQueue {
    pub fn new(store: Arc<dyn StoreLike>, gate: BackpressureGate, default_lease_sec: i64) -> Self {
        Self { store, gate, default_lease_sec }
    }

    /// Candidate selection per the worker's capability set, honoring
    /// the backpressure gate before ever touching the store.
    pub async fn next(
        &self,
        worker_capabilities: &BTreeSet<String>,
        filters: &NextJobFilters,
    ) -> ProofworkResult<NextJobResponse> {
        let verdict = self.gate.evaluate().await?;
        if verdict.paused {
            return Ok(NextJobResponse::Idle { reason: verdict.reason.unwrap_or_else(|| "paused".to_string()) });
        }

        let candidates = self
            .store
            .next_claimable_jobs(worker_capabilities, 50)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;

        for job in candidates {
            if !passes_filters(&job, filters) {
                continue;
            }
            if !passes_canary(job.id, filters.canary_percent) {
                continue;
            }
            if let Some(min_payout_cents) = filters.min_payout_cents {
                let bounty = self.store.get_bounty(job.bounty_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
                if bounty.reward_per_proof_cents < min_payout_cents {
                    continue;
                }
            }
            return Ok(NextJobResponse::Job { job });
        }

        Ok(NextJobResponse::Idle { reason: "no_matching_jobs".to_string() })
    }

    /// Atomic claim. Returns `stale_job` if the freshness deadline has
    /// passed, `lost_race` if another worker's claim landed first.
    pub async fn claim(&self, job_id: Uuid, worker_id: Uuid) -> ProofworkResult<ClaimOutcome> {
        let job = self.store.get_job(job_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        if job.is_stale(Utc::now()) {
            return Err(ProofworkError::stale_job());
        }

        let claimed = self
            .store
            .claim_job(job_id, worker_id, self.default_lease_sec)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;

        let Some(claimed) = claimed else {
            warn!(%job_id, %worker_id, "lost claim race");
            return Err(ProofworkError::lost_race());
        };

        self.store
            .record_job_audit(job_id, Some(worker_id), "claimed", None)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;

        info!(%job_id, %worker_id, lease_expires_at = ?claimed.lease_expires_at, "job claimed");
        Ok(ClaimOutcome { job: claimed })
    }

    /// Periodic and on-demand: flip expired leases back to open.
    /// Idempotent even if run concurrently by multiple processes.
    pub async fn reap_expired_leases(&self, batch_limit: i64) -> ProofworkResult<Vec<Uuid>> {
        let reaped = self
            .store
            .reap_expired_leases(batch_limit)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;

        for job_id in &reaped {
            self.store
                .record_job_audit(*job_id, None, "lease_reaped", None)
                .await
                .map_err(|e| ProofworkError::store(e.to_string()))?;
        }

        if !reaped.is_empty() {
            info!(count = reaped.len(), "reaped expired leases");
        }
        Ok(reaped)
    }
}

fn passes_filters(job: &Job, filters: &NextJobFilters) -> bool {
    if let Some(tag) = &filters.required_tag {
        let tags = job
            .task_descriptor
            .get("capability_tags")
            .and_then(|v| v.as_array())
            .map(|arr| arr.iter().filter_map(|x| x.as_str()).collect::<Vec<_>>())
            .unwrap_or_default();
        if !tags.contains(&tag.as_str()) {
            return false;
        }
    }
    if let Some(task_type) = &filters.require_task_type {
        let matches = job.task_descriptor.get("type").and_then(|v| v.as_str()) == Some(task_type.as_str());
        if !matches {
            return false;
        }
    }
    true
}

/// `hash(jobId) mod 100 < percent` deterministic canary partitioning:
/// a given percent of jobs, stable across repeated calls for the same
/// job id, are held back from the general worker pool.
fn passes_canary(job_id: Uuid, percent: i32) -> bool {
    if percent <= 0 {
        return true;
    }
    let bucket = (job_id.as_u128() % 100) as i32;
    bucket < percent
}

#[cfg(test)]
mod tests {
    use super::*;
    use proofwork_core::models::{Bounty, JobState};
    use proofwork_store::fake::FakeStore;

    fn gate_always_open() -> BackpressureGate {
        BackpressureGate::new(Arc::new(FakeStore::new()), Default::default())
    }

    #[tokio::test]
    async fn next_returns_idle_when_no_jobs() {
        let store: Arc<dyn StoreLike> = Arc::new(FakeStore::new());
        let queue = JobQueue::new(store, gate_always_open(), 300);
        let result = queue.next(&BTreeSet::new(), &NextJobFilters::default()).await.unwrap();
        assert!(matches!(result, NextJobResponse::Idle { .. }));
    }

    #[tokio::test]
    async fn claim_on_missing_lease_wins_then_loses() {
        let fake = Arc::new(FakeStore::new());
        let store: Arc<dyn StoreLike> = fake.clone();
        let queue = JobQueue::new(store, gate_always_open(), 300);

        let bounty = Bounty::new(Uuid::new_v4(), 1000, 1, 0);
        let job = Job::new(bounty.id, serde_json::json!({"capability_tags": []}), None);
        fake.insert_job(&job).await.unwrap();

        let worker_a = Uuid::new_v4();
        let worker_b = Uuid::new_v4();
        let outcome = queue.claim(job.id, worker_a).await.unwrap();
        assert_eq!(outcome.job.state, JobState::Claimed);

        let err = queue.claim(job.id, worker_b).await.unwrap_err();
        assert!(matches!(err, ProofworkError::Conflict(reason) if reason == "lost_race"));
    }

    #[tokio::test]
    async fn claim_past_freshness_deadline_is_stale() {
        let fake = Arc::new(FakeStore::new());
        let store: Arc<dyn StoreLike> = fake.clone();
        let queue = JobQueue::new(store, gate_always_open(), 300);

        let bounty = Bounty::new(Uuid::new_v4(), 1000, 1, 0);
        let job = Job::new(
            bounty.id,
            serde_json::json!({"capability_tags": []}),
            Some(Utc::now() - chrono::Duration::seconds(1)),
        );
        fake.insert_job(&job).await.unwrap();

        let err = queue.claim(job.id, Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, ProofworkError::Conflict(reason) if reason == "stale_job"));
    }
}
