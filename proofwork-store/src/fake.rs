//! In-memory `Store` double for fast, deterministic engine tests.
//!
//! Mirrors the `Arc<RwLock<HashMap<...>>>` in-memory bookkeeping the
//! teacher's escrow engine keeps alongside its database-backed state,
//! reused here as a standalone test fixture instead of a live Postgres
//! instance.

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use proofwork_core::models::{
    Artifact, ArtifactState, BlockedReason, Bounty, BountyState, Dispute, DisputeState, Job,
    JobState, Org, Payout, PayoutState, PayoutTransfer, Scorecard, Submission, SubmissionState,
    Verdict, Verification, Worker, WorkerReputation,
};

use crate::error::{StoreError, StoreResult};
use crate::settings::SettingsSnapshot;
use crate::store_trait::StoreLike;

#[derive(Default)]
pub struct FakeStore {
    bounties: RwLock<HashMap<Uuid, Bounty>>,
    jobs: RwLock<HashMap<Uuid, Job>>,
    job_audit: RwLock<Vec<(Uuid, Option<Uuid>, String, Option<serde_json::Value>)>>,
    submissions: RwLock<HashMap<Uuid, Submission>>,
    verifications: RwLock<HashMap<Uuid, Verification>>,
    payouts: RwLock<HashMap<Uuid, Payout>>,
    transfers: RwLock<HashMap<Uuid, PayoutTransfer>>,
    nonces: RwLock<HashMap<i64, i64>>,
    disputes: RwLock<HashMap<Uuid, Dispute>>,
    orgs: RwLock<HashMap<Uuid, Org>>,
    workers: RwLock<HashMap<Uuid, Worker>>,
    reputations: RwLock<HashMap<Uuid, WorkerReputation>>,
    outbox: RwLock<HashMap<Uuid, proofwork_core::models::OutboxEvent>>,
    settings: RwLock<SettingsSnapshot>,
    artifacts: RwLock<HashMap<Uuid, Artifact>>,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self { universal_pause: false, canary_percent: 0 }
    }
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_org(&self, org: Org) {
        self.orgs.write().unwrap().insert(org.id, org);
    }

    pub fn seed_bounty(&self, bounty: Bounty) {
        self.bounties.write().unwrap().insert(bounty.id, bounty);
    }

    pub fn seed_worker(&self, worker: Worker) {
        self.workers.write().unwrap().insert(worker.id, worker);
    }

    /// Mirrors `Store::set_universal_pause`; not part of `StoreLike`
    /// since only an operator CLI/API path needs it, never the engine.
    pub async fn set_universal_pause(&self, paused: bool) -> StoreResult<()> {
        self.settings.write().unwrap().universal_pause = paused;
        Ok(())
    }

    pub async fn set_canary_percent(&self, percent: i32) -> StoreResult<()> {
        self.settings.write().unwrap().canary_percent = percent;
        Ok(())
    }
}

#[async_trait]
impl StoreLike for FakeStore {
    async fn next_claimable_jobs(&self, capability_tags: &BTreeSet<String>, limit: i64) -> StoreResult<Vec<Job>> {
        let now = Utc::now();
        let jobs = self.jobs.read().unwrap();
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|j| j.is_claimable(now))
            .filter(|j| {
                let required: BTreeSet<String> = j
                    .task_descriptor
                    .get("capability_tags")
                    .and_then(|v| v.as_array())
                    .map(|arr| arr.iter().filter_map(|x| x.as_str().map(String::from)).collect())
                    .unwrap_or_default();
                required.is_subset(capability_tags)
            })
            .cloned()
            .collect();
        matching.sort_by_key(|j| j.created_at);
        matching.truncate(limit.max(0) as usize);
        Ok(matching)
    }

    async fn claim_job(&self, job_id: Uuid, worker_id: Uuid, lease_duration_sec: i64) -> StoreResult<Option<Job>> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().unwrap();
        let Some(job) = jobs.get_mut(&job_id) else { return Ok(None) };
        if !job.is_claimable(now) {
            return Ok(None);
        }
        job.state = JobState::Claimed;
        job.claim_holder = Some(worker_id);
        job.lease_expires_at = Some(now + chrono::Duration::seconds(lease_duration_sec));
        Ok(Some(job.clone()))
    }

    async fn reap_expired_leases(&self, batch_limit: i64) -> StoreResult<Vec<Uuid>> {
        let now = Utc::now();
        let mut jobs = self.jobs.write().unwrap();
        let mut reaped = Vec::new();
        for job in jobs.values_mut() {
            if reaped.len() as i64 >= batch_limit {
                break;
            }
            if job.state == JobState::Claimed && job.lease_expires_at.map(|e| e <= now).unwrap_or(false) {
                job.state = JobState::Open;
                job.claim_holder = None;
                job.lease_expires_at = None;
                reaped.push(job.id);
            }
        }
        Ok(reaped)
    }

    async fn get_job(&self, job_id: Uuid) -> StoreResult<Job> {
        self.jobs
            .read()
            .unwrap()
            .get(&job_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))
    }

    async fn insert_job(&self, job: &Job) -> StoreResult<()> {
        self.jobs.write().unwrap().insert(job.id, job.clone());
        Ok(())
    }

    async fn set_job_state(&self, job_id: Uuid, state: JobState) -> StoreResult<()> {
        if let Some(job) = self.jobs.write().unwrap().get_mut(&job_id) {
            job.state = state;
        }
        Ok(())
    }

    async fn set_final_verdict(&self, job_id: Uuid, verdict: Verdict) -> StoreResult<()> {
        if let Some(job) = self.jobs.write().unwrap().get_mut(&job_id) {
            job.final_verdict = Some(verdict);
        }
        Ok(())
    }

    async fn record_job_audit(
        &self,
        job_id: Uuid,
        worker_id: Option<Uuid>,
        event_type: &str,
        metadata: Option<serde_json::Value>,
    ) -> StoreResult<()> {
        self.job_audit
            .write()
            .unwrap()
            .push((job_id, worker_id, event_type.to_string(), metadata));
        Ok(())
    }

    async fn insert_bounty(&self, bounty: &Bounty) -> StoreResult<()> {
        self.bounties.write().unwrap().insert(bounty.id, bounty.clone());
        Ok(())
    }

    async fn get_bounty(&self, bounty_id: Uuid) -> StoreResult<Bounty> {
        self.bounties
            .read()
            .unwrap()
            .get(&bounty_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("bounty {bounty_id}")))
    }

    async fn set_bounty_state(&self, bounty_id: Uuid, state: BountyState) -> StoreResult<()> {
        if let Some(b) = self.bounties.write().unwrap().get_mut(&bounty_id) {
            b.state = state;
        }
        Ok(())
    }

    async fn insert_submission(&self, submission: &Submission) -> StoreResult<()> {
        self.submissions.write().unwrap().insert(submission.id, submission.clone());
        Ok(())
    }

    async fn find_submission_by_idempotency_key(&self, job_id: Uuid, worker_id: Uuid, idempotency_key: &str) -> StoreResult<Option<Submission>> {
        Ok(self
            .submissions
            .read()
            .unwrap()
            .values()
            .find(|s| s.job_id == job_id && s.worker_id == worker_id && s.idempotency_key == idempotency_key)
            .cloned())
    }

    async fn next_submission_attempt(&self, job_id: Uuid) -> StoreResult<i32> {
        let max = self
            .submissions
            .read()
            .unwrap()
            .values()
            .filter(|s| s.job_id == job_id)
            .map(|s| s.attempt)
            .max()
            .unwrap_or(0);
        Ok(max + 1)
    }

    async fn get_submission(&self, submission_id: Uuid) -> StoreResult<Submission> {
        self.submissions
            .read()
            .unwrap()
            .get(&submission_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("submission {submission_id}")))
    }

    async fn set_submission_state(&self, submission_id: Uuid, state: SubmissionState) -> StoreResult<()> {
        if let Some(s) = self.submissions.write().unwrap().get_mut(&submission_id) {
            s.state = state;
        }
        Ok(())
    }

    async fn open_verification(&self, verification: &Verification) -> StoreResult<()> {
        self.verifications.write().unwrap().insert(verification.id, verification.clone());
        Ok(())
    }

    async fn find_verification_by_idempotency_key(&self, idempotency_key: &str) -> StoreResult<Option<Verification>> {
        Ok(self
            .verifications
            .read()
            .unwrap()
            .values()
            .find(|v| v.idempotency_key == idempotency_key)
            .cloned())
    }

    async fn claim_next_open_verification(&self) -> StoreResult<Option<Verification>> {
        let now = Utc::now();
        let verifications = self.verifications.read().unwrap();
        let mut open: Vec<&Verification> = verifications
            .values()
            .filter(|v| v.is_open() && !v.is_claim_expired(now))
            .collect();
        open.sort_by_key(|v| v.created_at);
        Ok(open.first().map(|v| (*v).clone()))
    }

    async fn post_verdict(
        &self,
        verification_id: Uuid,
        claim_token: &str,
        verdict: Verdict,
        scorecard: Option<&Scorecard>,
        run_metadata: Option<&serde_json::Value>,
    ) -> StoreResult<bool> {
        let mut verifications = self.verifications.write().unwrap();
        let Some(v) = verifications.get_mut(&verification_id) else { return Ok(false) };
        if v.claim_token != claim_token || v.finished_at.is_some() || v.is_claim_expired(Utc::now()) {
            return Ok(false);
        }
        v.verdict = Some(verdict);
        v.scorecard = scorecard.cloned();
        v.run_metadata = run_metadata.cloned();
        v.finished_at = Some(Utc::now());
        Ok(true)
    }

    async fn get_verification(&self, verification_id: Uuid) -> StoreResult<Verification> {
        self.verifications
            .read()
            .unwrap()
            .get(&verification_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("verification {verification_id}")))
    }

    async fn oldest_open_verification_age_sec(&self) -> StoreResult<Option<i64>> {
        let now = Utc::now();
        Ok(self
            .verifications
            .read()
            .unwrap()
            .values()
            .filter(|v| v.is_open())
            .map(|v| (now - v.created_at).num_seconds())
            .max())
    }

    async fn insert_payout(&self, payout: &Payout) -> StoreResult<()> {
        self.payouts.write().unwrap().insert(payout.id, payout.clone());
        Ok(())
    }

    async fn get_payout(&self, payout_id: Uuid) -> StoreResult<Payout> {
        self.payouts
            .read()
            .unwrap()
            .get(&payout_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("payout {payout_id}")))
    }

    async fn set_payout_state(
        &self,
        payout_id: Uuid,
        state: PayoutState,
        blocked_reason: Option<BlockedReason>,
    ) -> StoreResult<()> {
        if let Some(p) = self.payouts.write().unwrap().get_mut(&payout_id) {
            p.state = state;
            p.blocked_reason = blocked_reason;
            p.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn set_payout_hold_until(&self, payout_id: Uuid, hold_until: DateTime<Utc>) -> StoreResult<()> {
        if let Some(p) = self.payouts.write().unwrap().get_mut(&payout_id) {
            p.hold_until = Some(hold_until);
            p.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn payouts_ready_for_settlement(&self, limit: i64) -> StoreResult<Vec<Payout>> {
        let now = Utc::now();
        let mut ready: Vec<Payout> = self
            .payouts
            .read()
            .unwrap()
            .values()
            .filter(|p| p.state == PayoutState::Pending && !p.is_dispute_window_open(now))
            .cloned()
            .collect();
        ready.sort_by_key(|p| p.created_at);
        ready.truncate(limit.max(0) as usize);
        Ok(ready)
    }

    async fn payouts_blocked_on_missing_address(&self, worker_id: Uuid) -> StoreResult<Vec<Payout>> {
        Ok(self
            .payouts
            .read()
            .unwrap()
            .values()
            .filter(|p| p.worker_id == worker_id && p.blocked_reason == Some(BlockedReason::WorkerPayoutAddressMissing))
            .cloned()
            .collect())
    }

    async fn insert_transfer(&self, transfer: &PayoutTransfer) -> StoreResult<()> {
        self.transfers.write().unwrap().insert(transfer.id, transfer.clone());
        Ok(())
    }

    async fn set_transfer_state(&self, transfer_id: Uuid, state: proofwork_core::models::TransferState) -> StoreResult<()> {
        if let Some(t) = self.transfers.write().unwrap().get_mut(&transfer_id) {
            t.state = state;
            t.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn transfers_for_payout(&self, payout_id: Uuid) -> StoreResult<Vec<PayoutTransfer>> {
        let mut transfers: Vec<PayoutTransfer> = self
            .transfers
            .read()
            .unwrap()
            .values()
            .filter(|t| t.payout_id == payout_id)
            .cloned()
            .collect();
        transfers.sort_by_key(|t| t.created_at);
        Ok(transfers)
    }

    async fn allocate_next_nonce(&self, chain_id: i64) -> StoreResult<i64> {
        let mut nonces = self.nonces.write().unwrap();
        let entry = nonces.entry(chain_id).or_insert(0);
        let allocated = *entry;
        *entry += 1;
        Ok(allocated)
    }

    async fn open_dispute(&self, dispute: &Dispute) -> StoreResult<()> {
        self.disputes.write().unwrap().insert(dispute.id, dispute.clone());
        Ok(())
    }

    async fn get_dispute(&self, dispute_id: Uuid) -> StoreResult<Dispute> {
        self.disputes
            .read()
            .unwrap()
            .get(&dispute_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("dispute {dispute_id}")))
    }

    async fn resolve_dispute(&self, dispute_id: Uuid, state: DisputeState) -> StoreResult<()> {
        if let Some(d) = self.disputes.write().unwrap().get_mut(&dispute_id) {
            d.state = state;
            d.resolved_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn credit_org_balance(&self, org_id: Uuid, cents: i64) -> StoreResult<()> {
        if let Some(org) = self.orgs.write().unwrap().get_mut(&org_id) {
            org.billing_balance_cents += cents;
        }
        Ok(())
    }

    async fn schedule_outbox_event(
        &self,
        topic: &str,
        idempotency_key: &str,
        payload: &serde_json::Value,
    ) -> StoreResult<Uuid> {
        let mut outbox = self.outbox.write().unwrap();
        if let Some(existing) = outbox
            .values()
            .find(|e| e.topic == topic && e.idempotency_key == idempotency_key)
        {
            return Ok(existing.id);
        }
        let event = proofwork_core::models::OutboxEvent {
            id: Uuid::new_v4(),
            topic: topic.to_string(),
            idempotency_key: idempotency_key.to_string(),
            payload: payload.clone(),
            state: proofwork_core::models::OutboxState::Pending,
            attempts: 0,
            available_at: Utc::now(),
            locked_at: None,
            locked_by: None,
            last_error: None,
            created_at: Utc::now(),
            sent_at: None,
        };
        let id = event.id;
        outbox.insert(id, event);
        Ok(id)
    }

    async fn claim_due_outbox_events(
        &self,
        locked_by: &str,
        limit: i64,
    ) -> StoreResult<Vec<proofwork_core::models::OutboxEvent>> {
        let now = Utc::now();
        let mut outbox = self.outbox.write().unwrap();
        let mut due_ids: Vec<Uuid> = outbox
            .values()
            .filter(|e| e.state == proofwork_core::models::OutboxState::Pending && e.available_at <= now)
            .map(|e| e.id)
            .collect();
        due_ids.sort();
        due_ids.truncate(limit.max(0) as usize);

        let mut claimed = Vec::new();
        for id in due_ids {
            if let Some(event) = outbox.get_mut(&id) {
                event.state = proofwork_core::models::OutboxState::Processing;
                event.locked_at = Some(now);
                event.locked_by = Some(locked_by.to_string());
                claimed.push(event.clone());
            }
        }
        Ok(claimed)
    }

    async fn find_outbox_event_by_key(&self, topic: &str, idempotency_key: &str) -> StoreResult<Option<proofwork_core::models::OutboxEvent>> {
        Ok(self
            .outbox
            .read()
            .unwrap()
            .values()
            .find(|e| e.topic == topic && e.idempotency_key == idempotency_key)
            .cloned())
    }

    async fn reschedule_outbox_at(&self, event_id: Uuid, available_at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(e) = self.outbox.write().unwrap().get_mut(&event_id) {
            e.state = proofwork_core::models::OutboxState::Pending;
            e.available_at = available_at;
        }
        Ok(())
    }

    async fn mark_outbox_sent(&self, event_id: Uuid) -> StoreResult<()> {
        if let Some(e) = self.outbox.write().unwrap().get_mut(&event_id) {
            e.state = proofwork_core::models::OutboxState::Sent;
            e.sent_at = Some(Utc::now());
            e.locked_at = None;
            e.locked_by = None;
        }
        Ok(())
    }

    async fn reschedule_or_deadletter_outbox(
        &self,
        event_id: Uuid,
        error: &str,
        max_attempts: i32,
        backoff_sec: i64,
    ) -> StoreResult<proofwork_core::models::OutboxState> {
        let mut outbox = self.outbox.write().unwrap();
        let Some(event) = outbox.get_mut(&event_id) else {
            return Err(StoreError::NotFound(format!("outbox event {event_id}")));
        };
        event.attempts += 1;
        event.last_error = Some(error.to_string());
        event.locked_at = None;
        event.locked_by = None;
        event.state = if event.attempts >= max_attempts {
            proofwork_core::models::OutboxState::Deadletter
        } else {
            event.available_at = Utc::now() + chrono::Duration::seconds(backoff_sec);
            proofwork_core::models::OutboxState::Pending
        };
        Ok(event.state)
    }

    async fn oldest_pending_outbox_age_sec(&self) -> StoreResult<Option<i64>> {
        let now = Utc::now();
        Ok(self
            .outbox
            .read()
            .unwrap()
            .values()
            .filter(|e| {
                matches!(
                    e.state,
                    proofwork_core::models::OutboxState::Pending
                        | proofwork_core::models::OutboxState::Processing
                )
            })
            .map(|e| (now - e.available_at).num_seconds())
            .max())
    }

    async fn release_stale_outbox_locks(&self, lock_timeout_sec: i64) -> StoreResult<u64> {
        let now = Utc::now();
        let mut outbox = self.outbox.write().unwrap();
        let mut released = 0u64;
        for event in outbox.values_mut() {
            if event.state == proofwork_core::models::OutboxState::Processing {
                if let Some(locked_at) = event.locked_at {
                    if now - locked_at >= chrono::Duration::seconds(lock_timeout_sec) {
                        event.state = proofwork_core::models::OutboxState::Pending;
                        event.locked_at = None;
                        event.locked_by = None;
                        released += 1;
                    }
                }
            }
        }
        Ok(released)
    }

    async fn get_worker(&self, worker_id: Uuid) -> StoreResult<Worker> {
        self.workers
            .read()
            .unwrap()
            .get(&worker_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("worker {worker_id}")))
    }

    async fn find_worker_by_token_prefix(&self, token_prefix: &str) -> StoreResult<Option<Worker>> {
        Ok(self.workers.read().unwrap().values().find(|w| w.token_prefix == token_prefix).cloned())
    }

    async fn insert_worker(&self, worker: &Worker) -> StoreResult<()> {
        self.workers.write().unwrap().insert(worker.id, worker.clone());
        Ok(())
    }

    async fn set_worker_payout_address(&self, worker_id: Uuid, chain: &str, address: &str) -> StoreResult<()> {
        if let Some(w) = self.workers.write().unwrap().get_mut(&worker_id) {
            w.payout_chain = Some(chain.to_string());
            w.payout_address = Some(address.to_string());
            w.payout_verified_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn get_org(&self, org_id: Uuid) -> StoreResult<Org> {
        self.orgs
            .read()
            .unwrap()
            .get(&org_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("org {org_id}")))
    }

    async fn get_reputation(&self, worker_id: Uuid) -> StoreResult<Option<WorkerReputation>> {
        Ok(self.reputations.read().unwrap().get(&worker_id).cloned())
    }

    async fn upsert_reputation(&self, reputation: &WorkerReputation) -> StoreResult<()> {
        self.reputations.write().unwrap().insert(reputation.worker_id, reputation.clone());
        Ok(())
    }

    async fn get_settings_snapshot(&self) -> StoreResult<SettingsSnapshot> {
        Ok(self.settings.read().unwrap().clone())
    }

    async fn insert_artifact(&self, artifact: &Artifact) -> StoreResult<()> {
        self.artifacts.write().unwrap().insert(artifact.id, artifact.clone());
        Ok(())
    }

    async fn get_artifact(&self, artifact_id: Uuid) -> StoreResult<Artifact> {
        self.artifacts
            .read()
            .unwrap()
            .get(&artifact_id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("artifact {artifact_id}")))
    }

    async fn set_artifact_state(&self, artifact_id: Uuid, state: ArtifactState, now: DateTime<Utc>) -> StoreResult<()> {
        let mut artifacts = self.artifacts.write().unwrap();
        let artifact = artifacts
            .get_mut(&artifact_id)
            .ok_or_else(|| StoreError::NotFound(format!("artifact {artifact_id}")))?;
        artifact.state = state;
        artifact.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proofwork_core::models::Bounty;

    #[tokio::test]
    async fn claim_races_only_one_winner() {
        let store = FakeStore::new();
        let bounty = Bounty::new(Uuid::new_v4(), 1000, 1, 3600);
        let job = Job::new(bounty.id, serde_json::json!({"capability_tags": []}), None);
        store.insert_job(&job).await.unwrap();

        let worker_a = Uuid::new_v4();
        let worker_b = Uuid::new_v4();
        let first = store.claim_job(job.id, worker_a, 60).await.unwrap();
        let second = store.claim_job(job.id, worker_b, 60).await.unwrap();

        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn outbox_schedule_is_idempotent() {
        let store = FakeStore::new();
        let id_a = store.schedule_outbox_event("job.done", "key-1", &serde_json::json!({})).await.unwrap();
        let id_b = store.schedule_outbox_event("job.done", "key-1", &serde_json::json!({})).await.unwrap();
        assert_eq!(id_a, id_b);
    }
}
