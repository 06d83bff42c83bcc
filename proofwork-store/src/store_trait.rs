//! Trait seam between `proofwork-engine` and storage, so engine tests
//! can run against `fake::FakeStore` instead of a live Postgres
//! instance. Mirrors the shape of `Store`'s inherent methods; `Store`
//! itself implements this by delegating straight through.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use proofwork_core::models::{
    Artifact, ArtifactState, BlockedReason, Bounty, BountyState, Dispute, DisputeState, Job,
    JobState, Org, Payout, PayoutState, PayoutTransfer, Scorecard, Submission, SubmissionState,
    Verdict, Verification, Worker, WorkerReputation,
};

use crate::settings::SettingsSnapshot;
use crate::StoreResult;

#[async_trait]
pub trait StoreLike: Send + Sync {
    async fn next_claimable_jobs(&self, capability_tags: &BTreeSet<String>, limit: i64) -> StoreResult<Vec<Job>>;
    async fn claim_job(&self, job_id: Uuid, worker_id: Uuid, lease_duration_sec: i64) -> StoreResult<Option<Job>>;
    async fn reap_expired_leases(&self, batch_limit: i64) -> StoreResult<Vec<Uuid>>;
    async fn get_job(&self, job_id: Uuid) -> StoreResult<Job>;
    async fn insert_job(&self, job: &Job) -> StoreResult<()>;
    async fn set_job_state(&self, job_id: Uuid, state: JobState) -> StoreResult<()>;
    async fn set_final_verdict(&self, job_id: Uuid, verdict: Verdict) -> StoreResult<()>;
    async fn record_job_audit(
        &self,
        job_id: Uuid,
        worker_id: Option<Uuid>,
        event_type: &str,
        metadata: Option<serde_json::Value>,
    ) -> StoreResult<()>;

    async fn insert_bounty(&self, bounty: &Bounty) -> StoreResult<()>;
    async fn get_bounty(&self, bounty_id: Uuid) -> StoreResult<Bounty>;
    async fn set_bounty_state(&self, bounty_id: Uuid, state: BountyState) -> StoreResult<()>;

    async fn insert_submission(&self, submission: &Submission) -> StoreResult<()>;
    async fn find_submission_by_idempotency_key(&self, job_id: Uuid, worker_id: Uuid, idempotency_key: &str) -> StoreResult<Option<Submission>>;
    async fn next_submission_attempt(&self, job_id: Uuid) -> StoreResult<i32>;
    async fn get_submission(&self, submission_id: Uuid) -> StoreResult<Submission>;
    async fn set_submission_state(&self, submission_id: Uuid, state: SubmissionState) -> StoreResult<()>;

    async fn open_verification(&self, verification: &Verification) -> StoreResult<()>;
    async fn find_verification_by_idempotency_key(&self, idempotency_key: &str) -> StoreResult<Option<Verification>>;
    async fn claim_next_open_verification(&self) -> StoreResult<Option<Verification>>;
    async fn post_verdict(
        &self,
        verification_id: Uuid,
        claim_token: &str,
        verdict: Verdict,
        scorecard: Option<&Scorecard>,
        run_metadata: Option<&serde_json::Value>,
    ) -> StoreResult<bool>;
    async fn get_verification(&self, verification_id: Uuid) -> StoreResult<Verification>;
    async fn oldest_open_verification_age_sec(&self) -> StoreResult<Option<i64>>;

    async fn insert_payout(&self, payout: &Payout) -> StoreResult<()>;
    async fn get_payout(&self, payout_id: Uuid) -> StoreResult<Payout>;
    async fn set_payout_state(
        &self,
        payout_id: Uuid,
        state: PayoutState,
        blocked_reason: Option<BlockedReason>,
    ) -> StoreResult<()>;
    async fn set_payout_hold_until(&self, payout_id: Uuid, hold_until: DateTime<Utc>) -> StoreResult<()>;
    async fn payouts_ready_for_settlement(&self, limit: i64) -> StoreResult<Vec<Payout>>;
    async fn payouts_blocked_on_missing_address(&self, worker_id: Uuid) -> StoreResult<Vec<Payout>>;
    async fn insert_transfer(&self, transfer: &PayoutTransfer) -> StoreResult<()>;
    async fn set_transfer_state(&self, transfer_id: Uuid, state: proofwork_core::models::TransferState) -> StoreResult<()>;
    async fn transfers_for_payout(&self, payout_id: Uuid) -> StoreResult<Vec<PayoutTransfer>>;
    async fn allocate_next_nonce(&self, chain_id: i64) -> StoreResult<i64>;

    async fn open_dispute(&self, dispute: &Dispute) -> StoreResult<()>;
    async fn get_dispute(&self, dispute_id: Uuid) -> StoreResult<Dispute>;
    async fn resolve_dispute(&self, dispute_id: Uuid, state: DisputeState) -> StoreResult<()>;
    async fn credit_org_balance(&self, org_id: Uuid, cents: i64) -> StoreResult<()>;

    async fn schedule_outbox_event(
        &self,
        topic: &str,
        idempotency_key: &str,
        payload: &serde_json::Value,
    ) -> StoreResult<Uuid>;
    async fn claim_due_outbox_events(
        &self,
        locked_by: &str,
        limit: i64,
    ) -> StoreResult<Vec<proofwork_core::models::OutboxEvent>>;
    async fn find_outbox_event_by_key(&self, topic: &str, idempotency_key: &str) -> StoreResult<Option<proofwork_core::models::OutboxEvent>>;
    async fn reschedule_outbox_at(&self, event_id: Uuid, available_at: DateTime<Utc>) -> StoreResult<()>;
    async fn mark_outbox_sent(&self, event_id: Uuid) -> StoreResult<()>;
    async fn reschedule_or_deadletter_outbox(
        &self,
        event_id: Uuid,
        error: &str,
        max_attempts: i32,
        backoff_sec: i64,
    ) -> StoreResult<proofwork_core::models::OutboxState>;
    async fn oldest_pending_outbox_age_sec(&self) -> StoreResult<Option<i64>>;
    async fn release_stale_outbox_locks(&self, lock_timeout_sec: i64) -> StoreResult<u64>;

    async fn get_worker(&self, worker_id: Uuid) -> StoreResult<Worker>;
    async fn find_worker_by_token_prefix(&self, token_prefix: &str) -> StoreResult<Option<Worker>>;
    async fn insert_worker(&self, worker: &Worker) -> StoreResult<()>;
    async fn set_worker_payout_address(&self, worker_id: Uuid, chain: &str, address: &str) -> StoreResult<()>;
    async fn get_org(&self, org_id: Uuid) -> StoreResult<Org>;
    async fn get_reputation(&self, worker_id: Uuid) -> StoreResult<Option<WorkerReputation>>;
    async fn upsert_reputation(&self, reputation: &WorkerReputation) -> StoreResult<()>;
    async fn get_settings_snapshot(&self) -> StoreResult<SettingsSnapshot>;

    async fn insert_artifact(&self, artifact: &Artifact) -> StoreResult<()>;
    async fn get_artifact(&self, artifact_id: Uuid) -> StoreResult<Artifact>;
    async fn set_artifact_state(&self, artifact_id: Uuid, state: ArtifactState, now: DateTime<Utc>) -> StoreResult<()>;
}

#[async_trait]
impl StoreLike for crate::Store {
    async fn next_claimable_jobs(&self, capability_tags: &BTreeSet<String>, limit: i64) -> StoreResult<Vec<Job>> {
        crate::Store::next_claimable_jobs(self, capability_tags, limit).await
    }
    async fn claim_job(&self, job_id: Uuid, worker_id: Uuid, lease_duration_sec: i64) -> StoreResult<Option<Job>> {
        crate::Store::claim_job(self, job_id, worker_id, lease_duration_sec).await
    }
    async fn reap_expired_leases(&self, batch_limit: i64) -> StoreResult<Vec<Uuid>> {
        crate::Store::reap_expired_leases(self, batch_limit).await
    }
    async fn get_job(&self, job_id: Uuid) -> StoreResult<Job> {
        crate::Store::get_job(self, job_id).await
    }
    async fn insert_job(&self, job: &Job) -> StoreResult<()> {
        crate::Store::insert_job(self, job).await
    }
    async fn set_job_state(&self, job_id: Uuid, state: JobState) -> StoreResult<()> {
        crate::Store::set_job_state(self, job_id, state).await
    }
    async fn set_final_verdict(&self, job_id: Uuid, verdict: Verdict) -> StoreResult<()> {
        crate::Store::set_final_verdict(self, job_id, verdict).await
    }
    async fn record_job_audit(
        &self,
        job_id: Uuid,
        worker_id: Option<Uuid>,
        event_type: &str,
        metadata: Option<serde_json::Value>,
    ) -> StoreResult<()> {
        crate::Store::record_job_audit(self, job_id, worker_id, event_type, metadata).await
    }

    async fn insert_bounty(&self, bounty: &Bounty) -> StoreResult<()> {
        crate::Store::insert_bounty(self, bounty).await
    }
    async fn get_bounty(&self, bounty_id: Uuid) -> StoreResult<Bounty> {
        crate::Store::get_bounty(self, bounty_id).await
    }
    async fn set_bounty_state(&self, bounty_id: Uuid, state: BountyState) -> StoreResult<()> {
        crate::Store::set_bounty_state(self, bounty_id, state).await
    }

    async fn insert_submission(&self, submission: &Submission) -> StoreResult<()> {
        crate::Store::insert_submission(self, submission).await
    }
    async fn find_submission_by_idempotency_key(&self, job_id: Uuid, worker_id: Uuid, idempotency_key: &str) -> StoreResult<Option<Submission>> {
        crate::Store::find_submission_by_idempotency_key(self, job_id, worker_id, idempotency_key).await
    }
    async fn next_submission_attempt(&self, job_id: Uuid) -> StoreResult<i32> {
        crate::Store::next_submission_attempt(self, job_id).await
    }
    async fn get_submission(&self, submission_id: Uuid) -> StoreResult<Submission> {
        crate::Store::get_submission(self, submission_id).await
    }
    async fn set_submission_state(&self, submission_id: Uuid, state: SubmissionState) -> StoreResult<()> {
        crate::Store::set_submission_state(self, submission_id, state).await
    }

    async fn open_verification(&self, verification: &Verification) -> StoreResult<()> {
        crate::Store::open_verification(self, verification).await
    }
    async fn find_verification_by_idempotency_key(&self, idempotency_key: &str) -> StoreResult<Option<Verification>> {
        crate::Store::find_verification_by_idempotency_key(self, idempotency_key).await
    }
    async fn claim_next_open_verification(&self) -> StoreResult<Option<Verification>> {
        crate::Store::claim_next_open_verification(self).await
    }
    async fn post_verdict(
        &self,
        verification_id: Uuid,
        claim_token: &str,
        verdict: Verdict,
        scorecard: Option<&Scorecard>,
        run_metadata: Option<&serde_json::Value>,
    ) -> StoreResult<bool> {
        crate::Store::post_verdict(self, verification_id, claim_token, verdict, scorecard, run_metadata).await
    }
    async fn get_verification(&self, verification_id: Uuid) -> StoreResult<Verification> {
        crate::Store::get_verification(self, verification_id).await
    }
    async fn oldest_open_verification_age_sec(&self) -> StoreResult<Option<i64>> {
        crate::Store::oldest_open_verification_age_sec(self).await
    }

    async fn insert_payout(&self, payout: &Payout) -> StoreResult<()> {
        crate::Store::insert_payout(self, payout).await
    }
    async fn get_payout(&self, payout_id: Uuid) -> StoreResult<Payout> {
        crate::Store::get_payout(self, payout_id).await
    }
    async fn set_payout_state(
        &self,
        payout_id: Uuid,
        state: PayoutState,
        blocked_reason: Option<BlockedReason>,
    ) -> StoreResult<()> {
        crate::Store::set_payout_state(self, payout_id, state, blocked_reason).await
    }
    async fn set_payout_hold_until(&self, payout_id: Uuid, hold_until: DateTime<Utc>) -> StoreResult<()> {
        crate::Store::set_payout_hold_until(self, payout_id, hold_until).await
    }
    async fn payouts_ready_for_settlement(&self, limit: i64) -> StoreResult<Vec<Payout>> {
        crate::Store::payouts_ready_for_settlement(self, limit).await
    }
    async fn payouts_blocked_on_missing_address(&self, worker_id: Uuid) -> StoreResult<Vec<Payout>> {
        crate::Store::payouts_blocked_on_missing_address(self, worker_id).await
    }
    async fn insert_transfer(&self, transfer: &PayoutTransfer) -> StoreResult<()> {
        crate::Store::insert_transfer(self, transfer).await
    }
    async fn set_transfer_state(&self, transfer_id: Uuid, state: proofwork_core::models::TransferState) -> StoreResult<()> {
        crate::Store::set_transfer_state(self, transfer_id, state).await
    }
    async fn transfers_for_payout(&self, payout_id: Uuid) -> StoreResult<Vec<PayoutTransfer>> {
        crate::Store::transfers_for_payout(self, payout_id).await
    }
    async fn allocate_next_nonce(&self, chain_id: i64) -> StoreResult<i64> {
        crate::Store::allocate_next_nonce(self, chain_id).await
    }

    async fn open_dispute(&self, dispute: &Dispute) -> StoreResult<()> {
        crate::Store::open_dispute(self, dispute).await
    }
    async fn get_dispute(&self, dispute_id: Uuid) -> StoreResult<Dispute> {
        crate::Store::get_dispute(self, dispute_id).await
    }
    async fn resolve_dispute(&self, dispute_id: Uuid, state: DisputeState) -> StoreResult<()> {
        crate::Store::resolve_dispute(self, dispute_id, state).await
    }
    async fn credit_org_balance(&self, org_id: Uuid, cents: i64) -> StoreResult<()> {
        crate::Store::credit_org_balance(self, org_id, cents).await
    }

    async fn schedule_outbox_event(
        &self,
        topic: &str,
        idempotency_key: &str,
        payload: &serde_json::Value,
    ) -> StoreResult<Uuid> {
        crate::Store::schedule_outbox_event(self, topic, idempotency_key, payload).await
    }
    async fn claim_due_outbox_events(
        &self,
        locked_by: &str,
        limit: i64,
    ) -> StoreResult<Vec<proofwork_core::models::OutboxEvent>> {
        crate::Store::claim_due_outbox_events(self, locked_by, limit).await
    }
    async fn find_outbox_event_by_key(&self, topic: &str, idempotency_key: &str) -> StoreResult<Option<proofwork_core::models::OutboxEvent>> {
        crate::Store::find_outbox_event_by_key(self, topic, idempotency_key).await
    }
    async fn reschedule_outbox_at(&self, event_id: Uuid, available_at: DateTime<Utc>) -> StoreResult<()> {
        crate::Store::reschedule_outbox_at(self, event_id, available_at).await
    }
    async fn mark_outbox_sent(&self, event_id: Uuid) -> StoreResult<()> {
        crate::Store::mark_outbox_sent(self, event_id).await
    }
    async fn reschedule_or_deadletter_outbox(
        &self,
        event_id: Uuid,
        error: &str,
        max_attempts: i32,
        backoff_sec: i64,
    ) -> StoreResult<proofwork_core::models::OutboxState> {
        crate::Store::reschedule_or_deadletter_outbox(self, event_id, error, max_attempts, backoff_sec).await
    }
    async fn oldest_pending_outbox_age_sec(&self) -> StoreResult<Option<i64>> {
        crate::Store::oldest_pending_outbox_age_sec(self).await
    }
    async fn release_stale_outbox_locks(&self, lock_timeout_sec: i64) -> StoreResult<u64> {
        crate::Store::release_stale_outbox_locks(self, lock_timeout_sec).await
    }

    async fn get_worker(&self, worker_id: Uuid) -> StoreResult<Worker> {
        crate::Store::get_worker(self, worker_id).await
    }
    async fn find_worker_by_token_prefix(&self, token_prefix: &str) -> StoreResult<Option<Worker>> {
        crate::Store::find_worker_by_token_prefix(self, token_prefix).await
    }
    async fn insert_worker(&self, worker: &Worker) -> StoreResult<()> {
        crate::Store::insert_worker(self, worker).await
    }
    async fn set_worker_payout_address(&self, worker_id: Uuid, chain: &str, address: &str) -> StoreResult<()> {
        crate::Store::set_worker_payout_address(self, worker_id, chain, address).await
    }
    async fn get_org(&self, org_id: Uuid) -> StoreResult<Org> {
        crate::Store::get_org(self, org_id).await
    }
    async fn get_reputation(&self, worker_id: Uuid) -> StoreResult<Option<WorkerReputation>> {
        crate::Store::get_reputation(self, worker_id).await
    }
    async fn upsert_reputation(&self, reputation: &WorkerReputation) -> StoreResult<()> {
        crate::Store::upsert_reputation(self, reputation).await
    }
    async fn get_settings_snapshot(&self) -> StoreResult<SettingsSnapshot> {
        crate::Store::get_settings_snapshot(self).await
    }

    async fn insert_artifact(&self, artifact: &Artifact) -> StoreResult<()> {
        crate::Store::insert_artifact(self, artifact).await
    }
    async fn get_artifact(&self, artifact_id: Uuid) -> StoreResult<Artifact> {
        crate::Store::get_artifact(self, artifact_id).await
    }
    async fn set_artifact_state(&self, artifact_id: Uuid, state: ArtifactState, now: DateTime<Utc>) -> StoreResult<()> {
        crate::Store::set_artifact_state(self, artifact_id, state, now).await
    }
}
