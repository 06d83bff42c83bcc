//! Core data models for the job lifecycle and settlement engine
//!
//! Mirrors the entity set in the specification: Org, Bounty, Job, Worker,
//! Submission, Verification, Payout, PayoutTransfer, Dispute, and
//! OutboxEvent. State machines expose `can_*`/`is_terminal` helpers so
//! callers validate transitions before ever touching the store.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ProofworkError;

/// Basis points denominator used throughout fee math.
pub const BPS_DENOMINATOR: i64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BountyState {
    Draft,
    Published,
    Closed,
}

impl BountyState {
    pub fn can_materialize_jobs(&self) -> bool {
        matches!(self, Self::Published)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Open,
    Claimed,
    Submitted,
    Done,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Pass,
    Fail,
    Inconclusive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubmissionState {
    Pending,
    Verifying,
    Passed,
    Failed,
    Inconclusive,
    /// Payout for this submission was refunded through dispute resolution;
    /// distinct from `Failed` so a paid-then-reversed submission isn't
    /// indistinguishable from one that never passed verification.
    Reversed,
}

impl SubmissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Passed | Self::Failed | Self::Reversed)
    }

    pub fn from_verdict(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Pass => Self::Passed,
            Verdict::Fail => Self::Failed,
            Verdict::Inconclusive => Self::Inconclusive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayoutState {
    Pending,
    Paid,
    Failed,
    Refunded,
}

impl PayoutState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Paid | Self::Refunded)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BlockedReason {
    WorkerPayoutAddressMissing,
    DisputeOpen,
    InsufficientFunds,
}

impl BlockedReason {
    /// Whether the payout may still execute once the block is re-evaluated
    /// without operator intervention (dispute resolution, address linked).
    pub fn is_waivable(&self) -> bool {
        matches!(self, Self::DisputeOpen)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Net,
    PlatformFee,
    ProofworkFee,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferState {
    Broadcast,
    Confirmed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeState {
    Open,
    ResolvedRefund,
    ResolvedUphold,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ArtifactState {
    Uploaded,
    Scanning,
    Clean,
    Quarantined,
}

impl ArtifactState {
    /// Submission attachment requires a scan verdict of clean.
    pub fn is_attachable(&self) -> bool {
        matches!(self, Self::Clean)
    }

    pub fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Uploaded, Self::Scanning)
                | (Self::Scanning, Self::Clean)
                | (Self::Scanning, Self::Quarantined)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutboxState {
    Pending,
    Processing,
    Sent,
    Deadletter,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Org {
    pub id: Uuid,
    pub billing_balance_cents: i64,
    pub platform_fee_bps: i32,
    pub platform_fee_wallet: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Org {
    pub fn validate_fee_bps(bps: i32) -> Result<(), ProofworkError> {
        if !(0..=10_000).contains(&bps) {
            return Err(ProofworkError::validation(format!(
                "platform fee bps {bps} out of range 0..=10000"
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bounty {
    pub id: Uuid,
    pub org_id: Uuid,
    pub reward_per_proof_cents: i64,
    pub required_proofs: i32,
    pub allowed_origins: BTreeSet<String>,
    pub required_fingerprint_classes: BTreeSet<String>,
    pub dispute_window_sec: i64,
    pub task_descriptor: Option<serde_json::Value>,
    pub state: BountyState,
    pub created_at: DateTime<Utc>,
}

impl Bounty {
    pub fn new(
        org_id: Uuid,
        reward_per_proof_cents: i64,
        required_proofs: i32,
        dispute_window_sec: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            org_id,
            reward_per_proof_cents,
            required_proofs,
            allowed_origins: BTreeSet::new(),
            required_fingerprint_classes: BTreeSet::new(),
            dispute_window_sec: dispute_window_sec.max(0),
            task_descriptor: None,
            state: BountyState::Draft,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub bounty_id: Uuid,
    pub task_descriptor: serde_json::Value,
    pub state: JobState,
    pub claim_holder: Option<Uuid>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub freshness_deadline: Option<DateTime<Utc>>,
    pub final_verdict: Option<Verdict>,
    pub created_at: DateTime<Utc>,
}

impl Job {
    pub fn new(bounty_id: Uuid, task_descriptor: serde_json::Value, freshness_deadline: Option<DateTime<Utc>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            bounty_id,
            task_descriptor,
            state: JobState::Open,
            claim_holder: None,
            lease_expires_at: None,
            freshness_deadline,
            final_verdict: None,
            created_at: Utc::now(),
        }
    }

    /// A job is claimable when open, or claimed with an expired lease,
    /// and not past its freshness deadline.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        if self.is_stale(now) {
            return false;
        }
        match self.state {
            JobState::Open => true,
            JobState::Claimed => self.lease_expires_at.map(|exp| exp <= now).unwrap_or(false),
            _ => false,
        }
    }

    pub fn is_stale(&self, now: DateTime<Utc>) -> bool {
        self.freshness_deadline.map(|deadline| now > deadline).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub id: Uuid,
    pub token_prefix: String,
    pub token_hmac_hash: String,
    pub capability_tags: BTreeSet<String>,
    pub payout_chain: Option<String>,
    pub payout_address: Option<String>,
    pub payout_verified_at: Option<DateTime<Utc>>,
    pub disabled: bool,
}

impl Worker {
    pub fn has_payout_address(&self) -> bool {
        self.payout_address.is_some() && self.payout_verified_at.is_some()
    }

    pub fn capabilities_satisfy(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.capability_tags)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    pub id: Uuid,
    pub job_id: Uuid,
    pub worker_id: Uuid,
    pub manifest: serde_json::Value,
    pub artifact_index: Vec<String>,
    pub attempt: i32,
    pub idempotency_key: String,
    pub state: SubmissionState,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    pub fn new(
        job_id: Uuid,
        worker_id: Uuid,
        manifest: serde_json::Value,
        artifact_index: Vec<String>,
        attempt: i32,
        idempotency_key: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            worker_id,
            manifest,
            artifact_index,
            attempt,
            idempotency_key,
            state: SubmissionState::Pending,
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Scorecard {
    pub repro: f64,
    pub evidence: f64,
    pub accuracy: f64,
    pub novelty: f64,
    pub traceability: f64,
    pub quality_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verification {
    pub id: Uuid,
    pub submission_id: Uuid,
    pub attempt: i32,
    pub idempotency_key: String,
    pub claim_token: String,
    pub claim_expires_at: DateTime<Utc>,
    pub verdict: Option<Verdict>,
    pub scorecard: Option<Scorecard>,
    pub run_metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl Verification {
    pub fn is_open(&self) -> bool {
        self.finished_at.is_none()
    }

    pub fn is_claim_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.claim_expires_at
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payout {
    pub id: Uuid,
    pub org_id: Uuid,
    pub submission_id: Uuid,
    pub worker_id: Uuid,
    pub gross_cents: i64,
    pub net_cents: i64,
    pub platform_fee_cents: i64,
    pub platform_fee_bps: i32,
    pub platform_fee_wallet: Option<String>,
    pub proofwork_fee_cents: i64,
    pub proofwork_fee_bps: i32,
    pub proofwork_fee_wallet: Option<String>,
    pub provider: Option<String>,
    pub provider_reference: Option<String>,
    pub state: PayoutState,
    pub blocked_reason: Option<BlockedReason>,
    pub hold_until: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Payout {
    /// gross = net + platformFee + proofworkFee, by construction.
    pub fn invariant_holds(&self) -> bool {
        self.gross_cents == self.net_cents + self.platform_fee_cents + self.proofwork_fee_cents
    }

    pub fn is_dispute_window_open(&self, now: DateTime<Utc>) -> bool {
        self.hold_until.map(|h| h > now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutTransfer {
    pub id: Uuid,
    pub payout_id: Uuid,
    pub kind: TransferKind,
    pub from_address: String,
    pub to_address: String,
    pub token_id: String,
    pub amount_base_units: String,
    pub tx_hash: String,
    pub nonce: i64,
    pub state: TransferState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispute {
    pub id: Uuid,
    pub bounty_id: Uuid,
    pub payout_id: Uuid,
    pub state: DisputeState,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: Uuid,
    pub submission_id: Option<Uuid>,
    pub kind: String,
    pub storage_key: String,
    pub state: ArtifactState,
    pub retention_job_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub topic: String,
    pub idempotency_key: String,
    pub payload: serde_json::Value,
    pub state: OutboxState,
    pub attempts: i32,
    pub available_at: DateTime<Utc>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CryptoNonce {
    pub chain_id: i64,
    pub next_nonce: i64,
}

/// Append-only audit record for job claim/lease transitions. Write-only
/// from the engine's perspective; never read back by core logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub job_id: Uuid,
    pub worker_id: Option<Uuid>,
    pub event_type: String,
    pub metadata: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Worker reputation score. Purely additive: a ranking hint for `next()`,
/// never a hard filter on top of the capability-subset gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReputation {
    pub worker_id: Uuid,
    pub score: i32,
    pub tier: String,
    pub tasks_completed: i32,
    pub tasks_failed: i32,
    pub disputes_lost: i32,
    pub updated_at: DateTime<Utc>,
}

impl WorkerReputation {
    pub fn new(worker_id: Uuid) -> Self {
        Self {
            worker_id,
            score: 500,
            tier: "new".to_string(),
            tasks_completed: 0,
            tasks_failed: 0,
            disputes_lost: 0,
            updated_at: Utc::now(),
        }
    }

    pub fn calculate_tier(&mut self) {
        self.tier = match self.score {
            0..=199 => "new",
            200..=499 => "developing",
            500..=799 => "trusted",
            _ => "elite",
        }
        .to_string();
    }

    pub fn record_completion(&mut self, passed: bool) {
        if passed {
            self.score = (self.score + 20).min(1000);
            self.tasks_completed += 1;
        } else {
            self.score = (self.score - 10).max(0);
            self.tasks_failed += 1;
        }
        self.calculate_tier();
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_open_is_claimable() {
        let job = Job::new(Uuid::new_v4(), serde_json::json!({}), None);
        assert!(job.is_claimable(Utc::now()));
    }

    #[test]
    fn job_claimed_with_live_lease_is_not_claimable() {
        let mut job = Job::new(Uuid::new_v4(), serde_json::json!({}), None);
        job.state = JobState::Claimed;
        job.lease_expires_at = Some(Utc::now() + chrono::Duration::seconds(60));
        assert!(!job.is_claimable(Utc::now()));
    }

    #[test]
    fn job_claimed_with_expired_lease_is_claimable() {
        let mut job = Job::new(Uuid::new_v4(), serde_json::json!({}), None);
        job.state = JobState::Claimed;
        job.lease_expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(job.is_claimable(Utc::now()));
    }

    #[test]
    fn job_past_freshness_deadline_is_stale_and_unclaimable() {
        let job = Job::new(
            Uuid::new_v4(),
            serde_json::json!({}),
            Some(Utc::now() - chrono::Duration::seconds(1)),
        );
        assert!(job.is_stale(Utc::now()));
        assert!(!job.is_claimable(Utc::now()));
    }

    #[test]
    fn payout_invariant_checks_gross_split() {
        let payout = Payout {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            submission_id: Uuid::new_v4(),
            worker_id: Uuid::new_v4(),
            gross_cents: 1500,
            net_cents: 1448,
            platform_fee_cents: 37,
            platform_fee_bps: 250,
            platform_fee_wallet: Some("0xabc".to_string()),
            proofwork_fee_cents: 15,
            proofwork_fee_bps: 100,
            proofwork_fee_wallet: Some("0xdef".to_string()),
            provider: None,
            provider_reference: None,
            state: PayoutState::Pending,
            blocked_reason: None,
            hold_until: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(payout.invariant_holds());
    }

    #[test]
    fn dispute_open_is_waivable_other_reasons_are_not() {
        assert!(BlockedReason::DisputeOpen.is_waivable());
        assert!(!BlockedReason::WorkerPayoutAddressMissing.is_waivable());
        assert!(!BlockedReason::InsufficientFunds.is_waivable());
    }

    #[test]
    fn worker_capability_subset_gate() {
        let mut worker = Worker {
            id: Uuid::new_v4(),
            token_prefix: "pw_".to_string(),
            token_hmac_hash: "hash".to_string(),
            capability_tags: BTreeSet::new(),
            payout_chain: None,
            payout_address: None,
            payout_verified_at: None,
            disabled: false,
        };
        worker.capability_tags.insert("http".to_string());
        worker.capability_tags.insert("llm_summarize".to_string());

        let mut required = BTreeSet::new();
        required.insert("http".to_string());
        assert!(worker.capabilities_satisfy(&required));

        required.insert("browser".to_string());
        assert!(!worker.capabilities_satisfy(&required));
    }
}
