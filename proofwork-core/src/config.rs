//! Immutable process configuration.
//!
//! Per the design notes: "Global mutable settings... consolidate into an
//! immutable configuration struct constructed at process start." Hot
//! toggles (universal pause, canary percent) are intentionally excluded —
//! those live in a small versioned settings table read through the store.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ProofworkError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,

    #[serde(default = "defaults::max_outbox_attempts")]
    pub max_outbox_attempts: i32,
    #[serde(default = "defaults::outbox_lock_timeout_sec")]
    pub outbox_lock_timeout_sec: i64,
    #[serde(default = "defaults::max_verification_attempts")]
    pub max_verification_attempts: i32,

    #[serde(default = "defaults::max_verifier_backlog_age_sec")]
    pub max_verifier_backlog_age_sec: i64,
    #[serde(default = "defaults::max_outbox_pending_age_sec")]
    pub max_outbox_pending_age_sec: i64,
    #[serde(default = "defaults::max_artifact_scan_backlog_age_sec")]
    pub max_artifact_scan_backlog_age_sec: i64,

    #[serde(default = "defaults::default_dispute_window_sec")]
    pub default_dispute_window_sec: i64,

    #[serde(default = "defaults::proofwork_fee_bps")]
    pub proofwork_fee_bps: i32,
    #[serde(default = "defaults::max_proofwork_fee_bps")]
    pub max_proofwork_fee_bps: i32,

    #[serde(default = "defaults::base_confirmations_required")]
    pub base_confirmations_required: u64,
    #[serde(default = "defaults::base_gas_limit")]
    pub base_gas_limit: u64,

    /// EVM JSON-RPC endpoint for the on-chain payout splitter.
    pub evm_rpc_url: Option<String>,
    /// Chain id of the payout rail (e.g. 8453 for Base mainnet).
    #[serde(default = "defaults::evm_chain_id")]
    pub evm_chain_id: u64,

    #[serde(default = "defaults::http_deadline_ms")]
    pub http_deadline_ms: u64,
    #[serde(default = "defaults::rpc_read_deadline_ms")]
    pub rpc_read_deadline_ms: u64,
    #[serde(default = "defaults::rpc_broadcast_deadline_ms")]
    pub rpc_broadcast_deadline_ms: u64,

    #[serde(default = "defaults::outbox_poll_interval_ms")]
    pub outbox_poll_interval_ms: u64,
    #[serde(default = "defaults::outbox_worker_concurrency")]
    pub outbox_worker_concurrency: usize,

    /// Rotating pepper mixed into every worker token HMAC, so a leaked
    /// `token_hmac_hash` column is useless without it.
    pub worker_token_pepper: String,
    /// Shared bearer secret for the verifier gateway's two endpoints.
    /// A single static secret, not a per-verifier credential: the
    /// verifier gateway is one trusted collaborator process, not a
    /// multi-tenant caller.
    pub verifier_bearer_token: String,

    /// Default claim lease length handed to `JobQueue::new`.
    #[serde(default = "defaults::claim_lease_sec")]
    pub claim_lease_sec: i64,

    /// Address the API server binds to.
    #[serde(default = "defaults::http_bind_addr")]
    pub http_bind_addr: String,

    /// Base URL of the off-chain payment provider. Absent means the
    /// off-chain settlement leg is disabled for this process.
    pub off_chain_provider_url: Option<String>,

    /// Hex-encoded private key for the on-chain payout signer. Absent
    /// means the on-chain settlement leg is disabled for this process.
    pub payout_signer_private_key: Option<String>,
    /// ERC-20 token the splitter pays out in.
    pub payout_token_address: Option<String>,
    #[serde(default = "defaults::payout_token_decimals")]
    pub payout_token_decimals: u32,
    /// Fee-split contract the on-chain leg calls.
    pub payout_splitter_address: Option<String>,
    /// Wallet credited with the platform's cut of each payout.
    pub proofwork_fee_wallet: Option<String>,

    /// Base URL the outbox dispatcher posts `payout.requested` /
    /// `dispute.auto_refund` announcements to. Absent disables the
    /// notifier leg; the dispatcher still drives the state machine.
    pub webhook_base_url: Option<String>,

    #[serde(default = "defaults::outbox_batch_limit")]
    pub outbox_batch_limit: i64,
    #[serde(default = "defaults::lease_reap_batch_limit")]
    pub lease_reap_batch_limit: i64,
    #[serde(default = "defaults::lease_reap_interval_ms")]
    pub lease_reap_interval_ms: u64,
}

impl Config {
    /// Layer env vars (prefixed `PROOFWORK_`) over defaults. `.env` is
    /// loaded by the caller (teacher's choice of `dotenv`) before this runs.
    pub fn load() -> Result<Self, ProofworkError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("PROOFWORK")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ProofworkError::config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ProofworkError::config(e.to_string()))
    }

    pub fn http_deadline(&self) -> Duration {
        Duration::from_millis(self.http_deadline_ms)
    }

    pub fn rpc_read_deadline(&self) -> Duration {
        Duration::from_millis(self.rpc_read_deadline_ms)
    }

    pub fn rpc_broadcast_deadline(&self) -> Duration {
        Duration::from_millis(self.rpc_broadcast_deadline_ms)
    }

    pub fn outbox_lock_timeout(&self) -> Duration {
        Duration::from_secs(self.outbox_lock_timeout_sec.max(0) as u64)
    }

    pub fn outbox_poll_interval(&self) -> Duration {
        Duration::from_millis(self.outbox_poll_interval_ms)
    }

    /// Fixture `Config` for tests across the workspace that need a fully
    /// populated struct without going through `load()`'s env layering.
    pub fn for_tests() -> Self {
        Self {
            database_url: "postgres://localhost/test".to_string(),
            max_outbox_attempts: defaults::max_outbox_attempts(),
            outbox_lock_timeout_sec: defaults::outbox_lock_timeout_sec(),
            max_verification_attempts: defaults::max_verification_attempts(),
            max_verifier_backlog_age_sec: defaults::max_verifier_backlog_age_sec(),
            max_outbox_pending_age_sec: defaults::max_outbox_pending_age_sec(),
            max_artifact_scan_backlog_age_sec: defaults::max_artifact_scan_backlog_age_sec(),
            default_dispute_window_sec: defaults::default_dispute_window_sec(),
            proofwork_fee_bps: defaults::proofwork_fee_bps(),
            max_proofwork_fee_bps: defaults::max_proofwork_fee_bps(),
            base_confirmations_required: defaults::base_confirmations_required(),
            base_gas_limit: defaults::base_gas_limit(),
            evm_rpc_url: None,
            evm_chain_id: defaults::evm_chain_id(),
            http_deadline_ms: defaults::http_deadline_ms(),
            rpc_read_deadline_ms: defaults::rpc_read_deadline_ms(),
            rpc_broadcast_deadline_ms: defaults::rpc_broadcast_deadline_ms(),
            outbox_poll_interval_ms: defaults::outbox_poll_interval_ms(),
            outbox_worker_concurrency: defaults::outbox_worker_concurrency(),
            worker_token_pepper: "test-pepper".to_string(),
            verifier_bearer_token: "test-verifier-token".to_string(),
            claim_lease_sec: defaults::claim_lease_sec(),
            http_bind_addr: defaults::http_bind_addr(),
            off_chain_provider_url: None,
            payout_signer_private_key: None,
            payout_token_address: None,
            payout_token_decimals: defaults::payout_token_decimals(),
            payout_splitter_address: None,
            proofwork_fee_wallet: Some("0xproofwork".to_string()),
            webhook_base_url: None,
            outbox_batch_limit: defaults::outbox_batch_limit(),
            lease_reap_batch_limit: defaults::lease_reap_batch_limit(),
            lease_reap_interval_ms: defaults::lease_reap_interval_ms(),
        }
    }
}

mod defaults {
    pub fn max_outbox_attempts() -> i32 {
        10
    }
    pub fn outbox_lock_timeout_sec() -> i64 {
        600
    }
    pub fn max_verification_attempts() -> i32 {
        3
    }
    pub fn max_verifier_backlog_age_sec() -> i64 {
        300
    }
    pub fn max_outbox_pending_age_sec() -> i64 {
        300
    }
    pub fn max_artifact_scan_backlog_age_sec() -> i64 {
        600
    }
    pub fn default_dispute_window_sec() -> i64 {
        86_400
    }
    pub fn proofwork_fee_bps() -> i32 {
        100
    }
    pub fn max_proofwork_fee_bps() -> i32 {
        500
    }
    pub fn base_confirmations_required() -> u64 {
        5
    }
    pub fn base_gas_limit() -> u64 {
        250_000
    }
    pub fn evm_chain_id() -> u64 {
        8453
    }
    pub fn http_deadline_ms() -> u64 {
        15_000
    }
    pub fn rpc_read_deadline_ms() -> u64 {
        30_000
    }
    pub fn rpc_broadcast_deadline_ms() -> u64 {
        120_000
    }
    pub fn outbox_poll_interval_ms() -> u64 {
        500
    }
    pub fn outbox_worker_concurrency() -> usize {
        4
    }
    pub fn claim_lease_sec() -> i64 {
        300
    }
    pub fn http_bind_addr() -> String {
        "0.0.0.0:8080".to_string()
    }
    pub fn payout_token_decimals() -> u32 {
        6
    }
    pub fn outbox_batch_limit() -> i64 {
        50
    }
    pub fn lease_reap_batch_limit() -> i64 {
        500
    }
    pub fn lease_reap_interval_ms() -> u64 {
        5_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_constants() {
        std::env::set_var("PROOFWORK_DATABASE_URL", "postgres://localhost/test");
        std::env::set_var("PROOFWORK_WORKER_TOKEN_PEPPER", "test-pepper");
        std::env::set_var("PROOFWORK_VERIFIER_BEARER_TOKEN", "test-verifier-token");
        let config = Config::load().unwrap();
        assert_eq!(config.max_outbox_attempts, 10);
        assert_eq!(config.outbox_lock_timeout_sec, 600);
        assert_eq!(config.max_verification_attempts, 3);
        assert_eq!(config.base_confirmations_required, 5);
        assert_eq!(config.base_gas_limit, 250_000);
        assert_eq!(config.claim_lease_sec, 300);
        std::env::remove_var("PROOFWORK_DATABASE_URL");
        std::env::remove_var("PROOFWORK_WORKER_TOKEN_PEPPER");
        std::env::remove_var("PROOFWORK_VERIFIER_BEARER_TOKEN");
    }
}
