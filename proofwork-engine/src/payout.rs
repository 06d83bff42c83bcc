//! Payout engine: fee split, off-chain/on-chain settlement, and
//! multi-stage confirmation.
//!
//! Grounded on the teacher's payment coordinator for the "load, guard
//! on terminal/blocked state, act, persist" shape; the on-chain leg is
//! new work grounded on `proofwork_chain`.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};
use uuid::Uuid;

use proofwork_core::models::{
    BlockedReason, Payout, PayoutState, PayoutTransfer, TransferKind, TransferState,
};
use proofwork_core::money::split_fees;
use proofwork_core::{ProofworkError, ProofworkResult};
use proofwork_store::StoreLike;

fn payout_requested_key(payout_id: Uuid) -> String {
    format!("payout:{payout_id}")
}

use proofwork_chain::broadcast::to_base_units;
use proofwork_chain::signer::PayoutSigner;
use proofwork_chain::splitter::{SplitCall, SplitLeg};
use proofwork_chain::{BroadcastClient, ChainError, PendingNonceCache};

#[derive(Debug, Clone, PartialEq)]
pub enum PayoutOutcome {
    NoOp { reason: &'static str },
    Paid { provider_reference: String },
    Broadcast { tx_hash: String, nonce: i64 },
    Failed { reason: String },
}

/// Off-chain settlement provider. Implemented in production against a
/// payment gateway over HTTP; tests swap in a `wiremock` server behind
/// `HttpPaymentProvider` or a hand-rolled fake.
#[async_trait::async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn create_payout(&self, payout_id: Uuid, net_cents: i64, worker_id: Uuid) -> ProofworkResult<OffChainResult>;
}

pub struct OffChainResult {
    pub paid: bool,
    pub provider: String,
    pub provider_reference: String,
}

pub struct HttpPaymentProvider {
    client: reqwest::Client,
    base_url: String,
    deadline: Duration,
}

impl HttpPaymentProvider {
    pub fn new(base_url: String, deadline: Duration) -> Self {
        Self { client: reqwest::Client::new(), base_url, deadline }
    }
}

#[async_trait::async_trait]
impl PaymentProvider for HttpPaymentProvider {
    async fn create_payout(&self, payout_id: Uuid, net_cents: i64, worker_id: Uuid) -> ProofworkResult<OffChainResult> {
        #[derive(serde::Serialize)]
        struct Req {
            payout_id: Uuid,
            amount_cents: i64,
            worker_id: Uuid,
            currency: &'static str,
        }
        #[derive(serde::Deserialize)]
        struct Resp {
            status: String,
            provider: String,
            provider_ref: String,
        }

        let response = self
            .client
            .post(format!("{}/payouts", self.base_url))
            .timeout(self.deadline)
            .json(&Req { payout_id, amount_cents: net_cents, worker_id, currency: "usd" })
            .send()
            .await
            .map_err(|e| ProofworkError::transient(format!("payment provider unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| ProofworkError::transient(format!("payment provider error status: {e}")))?
            .json::<Resp>()
            .await
            .map_err(|e| ProofworkError::transient(format!("payment provider bad response: {e}")))?;

        Ok(OffChainResult { paid: response.status == "paid", provider: response.provider, provider_reference: response.provider_ref })
    }
}

pub struct OnChainExecutor {
    pub broadcast: BroadcastClient,
    pub signer: Arc<dyn PayoutSigner>,
    pub nonce_cache: PendingNonceCache,
    pub chain_id: i64,
    pub token_address: alloy_primitives::Address,
    pub token_decimals: u32,
    pub splitter_address: alloy_primitives::Address,
    pub confirmations_required: u64,
    pub rpc_deadline: Duration,
    pub broadcast_deadline: Duration,
}

pub struct PayoutEngine {
    store: Arc<dyn StoreLike>,
    proofwork_fee_bps: i32,
    max_proofwork_fee_bps: i32,
    proofwork_fee_wallet: Option<String>,
    off_chain: Option<Arc<dyn PaymentProvider>>,
    on_chain: Option<OnChainExecutor>,
}

impl PayoutEngine {
    pub fn new(
        store: Arc<dyn StoreLike>,
        proofwork_fee_bps: i32,
        max_proofwork_fee_bps: i32,
        proofwork_fee_wallet: Option<String>,
        off_chain: Option<Arc<dyn PaymentProvider>>,
        on_chain: Option<OnChainExecutor>,
    ) -> Self {
        Self { store, proofwork_fee_bps, max_proofwork_fee_bps, proofwork_fee_wallet, off_chain, on_chain }
    }

    /// Creates the pending payout row for a passed submission and
    /// schedules `payout.requested` at the bounty's dispute-window
    /// boundary. Called once, by the verdict handler, before the
    /// outbox ever sees the event.
    pub async fn create_for_submission(&self, submission_id: Uuid, now: chrono::DateTime<chrono::Utc>) -> ProofworkResult<Payout> {
        let submission = self.store.get_submission(submission_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        let job = self.store.get_job(submission.job_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        let bounty = self.store.get_bounty(job.bounty_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        let org = self.store.get_org(bounty.org_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        let worker = self.store.get_worker(submission.worker_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;

        let split = split_fees(
            bounty.reward_per_proof_cents,
            org.platform_fee_bps,
            org.platform_fee_wallet.as_deref(),
            self.proofwork_fee_bps,
            self.max_proofwork_fee_bps,
        )?;

        let blocked_reason = if self.on_chain.is_some() && !worker.has_payout_address() {
            Some(BlockedReason::WorkerPayoutAddressMissing)
        } else {
            None
        };
        let hold_until = (bounty.dispute_window_sec > 0).then(|| now + chrono::Duration::seconds(bounty.dispute_window_sec));

        let payout = Payout {
            id: Uuid::new_v4(),
            org_id: org.id,
            submission_id,
            worker_id: submission.worker_id,
            gross_cents: split.gross_cents,
            net_cents: split.net_cents,
            platform_fee_cents: split.platform_fee_cents,
            platform_fee_bps: org.platform_fee_bps,
            platform_fee_wallet: org.platform_fee_wallet.clone(),
            proofwork_fee_cents: split.proofwork_fee_cents,
            proofwork_fee_bps: self.proofwork_fee_bps,
            proofwork_fee_wallet: self.proofwork_fee_wallet.clone(),
            provider: None,
            provider_reference: None,
            state: PayoutState::Pending,
            blocked_reason,
            hold_until,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_payout(&payout).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        let event_id = self
            .store
            .schedule_outbox_event(
                "payout.requested",
                &payout_requested_key(payout.id),
                &serde_json::json!({ "payoutId": payout.id }),
            )
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;
        if let Some(hold_until) = hold_until {
            self.store
                .reschedule_outbox_at(event_id, hold_until)
                .await
                .map_err(|e| ProofworkError::store(e.to_string()))?;
        }

        info!(payout_id = %payout.id, submission_id = %submission_id, ?hold_until, "payout created, settlement requested");
        Ok(payout)
    }

    /// Clears `worker_payout_address_missing` on every payout held for
    /// this worker and reschedules their `payout.requested` event.
    /// Called once, by the payout-address registration handler, after
    /// the signature has been verified.
    pub async fn unblock_for_worker(&self, worker_id: Uuid) -> ProofworkResult<Vec<Uuid>> {
        let blocked = self
            .store
            .payouts_blocked_on_missing_address(worker_id)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;

        let mut unblocked = Vec::with_capacity(blocked.len());
        for payout in blocked {
            self.store
                .set_payout_state(payout.id, payout.state, None)
                .await
                .map_err(|e| ProofworkError::store(e.to_string()))?;
            let key = payout_requested_key(payout.id);
            match self
                .store
                .find_outbox_event_by_key("payout.requested", &key)
                .await
                .map_err(|e| ProofworkError::store(e.to_string()))?
            {
                Some(existing) => {
                    self.store
                        .reschedule_outbox_at(existing.id, chrono::Utc::now())
                        .await
                        .map_err(|e| ProofworkError::store(e.to_string()))?;
                }
                None => {
                    self.store
                        .schedule_outbox_event("payout.requested", &key, &serde_json::json!({ "payoutId": payout.id }))
                        .await
                        .map_err(|e| ProofworkError::store(e.to_string()))?;
                }
            }
            unblocked.push(payout.id);
        }

        if !unblocked.is_empty() {
            info!(%worker_id, count = unblocked.len(), "payouts unblocked on payout address registration");
        }
        Ok(unblocked)
    }

    pub async fn execute(&self, payout_id: Uuid) -> ProofworkResult<PayoutOutcome> {
        let payout = self.store.get_payout(payout_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;

        if payout.state.is_terminal() {
            return Ok(PayoutOutcome::NoOp { reason: "already_terminal" });
        }
        if let Some(reason) = payout.blocked_reason {
            if !reason.is_waivable() || matches!(reason, BlockedReason::DisputeOpen) {
                return Ok(PayoutOutcome::NoOp { reason: "blocked" });
            }
        }

        let existing_transfers = self
            .store
            .transfers_for_payout(payout_id)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;
        if !existing_transfers.is_empty() {
            return Ok(PayoutOutcome::NoOp { reason: "transfers_already_broadcast" });
        }

        let split = split_fees(
            payout.gross_cents,
            payout.platform_fee_bps,
            payout.platform_fee_wallet.as_deref(),
            payout.proofwork_fee_bps,
            self.max_proofwork_fee_bps,
        )?;

        match &self.on_chain {
            Some(chain) => self.execute_on_chain(&payout, chain, split).await,
            None => self.execute_off_chain(&payout, split).await,
        }
    }

    async fn execute_off_chain(&self, payout: &Payout, split: proofwork_core::money::FeeSplit) -> ProofworkResult<PayoutOutcome> {
        let Some(provider) = &self.off_chain else {
            return Err(ProofworkError::config("no settlement provider configured"));
        };

        let result = provider.create_payout(payout.id, split.net_cents, payout.worker_id).await?;

        if result.paid {
            self.store
                .set_payout_state(payout.id, PayoutState::Paid, None)
                .await
                .map_err(|e| ProofworkError::store(e.to_string()))?;
            info!(payout_id = %payout.id, provider = %result.provider, "payout settled off-chain");
            Ok(PayoutOutcome::Paid { provider_reference: result.provider_reference })
        } else {
            self.store
                .set_payout_state(payout.id, PayoutState::Failed, None)
                .await
                .map_err(|e| ProofworkError::store(e.to_string()))?;
            warn!(payout_id = %payout.id, "off-chain payout reported failure");
            Ok(PayoutOutcome::Failed { reason: "provider_reported_failure".to_string() })
        }
    }

    async fn execute_on_chain(
        &self,
        payout: &Payout,
        chain: &OnChainExecutor,
        split: proofwork_core::money::FeeSplit,
    ) -> ProofworkResult<PayoutOutcome> {
        let worker = self.store.get_worker(payout.worker_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        let worker_address: alloy_primitives::Address = worker
            .payout_address
            .as_deref()
            .ok_or_else(|| ProofworkError::conflict("worker has no verified payout address"))?
            .parse()
            .map_err(|_| ProofworkError::validation("worker payout address is not a valid EVM address"))?;

        let platform_address = parse_optional_address(payout.platform_fee_wallet.as_deref())?;
        let proofwork_address = parse_optional_address(payout.proofwork_fee_wallet.as_deref())?;

        let signer_address = chain.signer.address();
        let chain_pending = chain.broadcast.pending_nonce(signer_address, chain.rpc_deadline).await.map_err(to_proofwork_err)?;
        let reconciled = chain.nonce_cache.reconcile(signer_address, chain_pending).await;
        let stored_floor = self.store.allocate_next_nonce(chain.chain_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        let nonce = reconciled.max(stored_floor as u64);

        let call = SplitCall {
            token: chain.token_address,
            worker_leg: SplitLeg { recipient: Some(worker_address), amount_base_units: to_base_units(split.net_cents, chain.token_decimals) },
            platform_leg: SplitLeg { recipient: platform_address, amount_base_units: to_base_units(split.platform_fee_cents, chain.token_decimals) },
            proofwork_leg: SplitLeg { recipient: proofwork_address, amount_base_units: to_base_units(split.proofwork_fee_cents, chain.token_decimals) },
        };
        let calldata = call.encode();

        let broadcast_result = match chain
            .broadcast
            .broadcast(chain.signer.as_ref(), chain.splitter_address, calldata.into(), nonce, chain.broadcast_deadline)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                chain.nonce_cache.invalidate(signer_address).await;
                return Err(to_proofwork_err(e));
            }
        };

        let tx_hash = format!("{:#x}", broadcast_result.tx_hash);

        for (kind, recipient, amount) in [
            (TransferKind::Net, Some(worker_address), split.net_cents),
            (TransferKind::PlatformFee, platform_address, split.platform_fee_cents),
            (TransferKind::ProofworkFee, proofwork_address, split.proofwork_fee_cents),
        ] {
            if amount == 0 {
                continue;
            }
            let transfer = PayoutTransfer {
                id: Uuid::new_v4(),
                payout_id: payout.id,
                kind,
                from_address: format!("{signer_address:#x}"),
                to_address: recipient.map(|a| format!("{a:#x}")).unwrap_or_default(),
                token_id: format!("{:#x}", chain.token_address),
                amount_base_units: amount.to_string(),
                tx_hash: tx_hash.clone(),
                nonce: nonce as i64,
                state: TransferState::Broadcast,
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
            };
            self.store.insert_transfer(&transfer).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        }

        info!(payout_id = %payout.id, %tx_hash, nonce, "payout broadcast on-chain");
        Ok(PayoutOutcome::Broadcast { tx_hash, nonce: nonce as i64 })
    }

    /// Confirmation handler for `payout.confirm.requested`. A pending
    /// receipt is surfaced as a transient error so the outbox retries;
    /// reverted and confirmed are terminal outcomes.
    pub async fn confirm(&self, payout_id: Uuid) -> ProofworkResult<PayoutOutcome> {
        let chain = self.on_chain.as_ref().ok_or_else(|| ProofworkError::config("confirmation requires an on-chain executor"))?;
        let payout = self.store.get_payout(payout_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        let transfers = self.store.transfers_for_payout(payout_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        let Some(first) = transfers.first() else {
            return Err(ProofworkError::internal("confirming a payout with no transfers"));
        };

        let tx_hash: alloy_primitives::B256 = first
            .tx_hash
            .parse()
            .map_err(|_| ProofworkError::internal("stored tx hash is not a valid B256"))?;

        let status = chain
            .broadcast
            .poll_receipt(tx_hash, chain.confirmations_required, chain.rpc_deadline)
            .await
            .map_err(to_proofwork_err)?;

        if status.reverted {
            self.store.set_payout_state(payout_id, PayoutState::Failed, None).await.map_err(|e| ProofworkError::store(e.to_string()))?;
            for transfer in &transfers {
                self.store.set_transfer_state(transfer.id, TransferState::Failed).await.map_err(|e| ProofworkError::store(e.to_string()))?;
            }
            warn!(payout_id = %payout_id, "on-chain payout reverted");
            return Ok(PayoutOutcome::Failed { reason: "reverted".to_string() });
        }

        if !status.confirmed {
            return Err(ProofworkError::transient("receipt not yet at required confirmation depth"));
        }

        self.store.set_payout_state(payout_id, PayoutState::Paid, None).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        for transfer in &transfers {
            self.store.set_transfer_state(transfer.id, TransferState::Confirmed).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        }
        payout.invariant_holds().then_some(()).ok_or_else(|| ProofworkError::internal("payout fee split invariant violated"))?;

        info!(payout_id = %payout_id, confirmations = status.confirmations, "payout confirmed");
        Ok(PayoutOutcome::Paid { provider_reference: first.tx_hash.clone() })
    }
}

fn parse_optional_address(raw: Option<&str>) -> ProofworkResult<Option<alloy_primitives::Address>> {
    raw.map(|s| s.parse().map_err(|_| ProofworkError::validation("invalid EVM fee wallet address")))
        .transpose()
}

fn to_proofwork_err(e: ChainError) -> ProofworkError {
    match e {
        ChainError::Pending | ChainError::Rpc(_) | ChainError::Deadline(_) => ProofworkError::transient(e.to_string()),
        ChainError::Reverted | ChainError::Signer(_) | ChainError::InvalidAddress(_) => ProofworkError::chain(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proofwork_store::fake::FakeStore;

    struct FakeProvider {
        paid: bool,
    }

    #[async_trait::async_trait]
    impl PaymentProvider for FakeProvider {
        async fn create_payout(&self, _payout_id: Uuid, _net_cents: i64, _worker_id: Uuid) -> ProofworkResult<OffChainResult> {
            Ok(OffChainResult { paid: self.paid, provider: "fake".to_string(), provider_reference: "ref-1".to_string() })
        }
    }

    fn sample_payout(worker_id: Uuid) -> Payout {
        Payout {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
            submission_id: Uuid::new_v4(),
            worker_id,
            gross_cents: 1500,
            net_cents: 1448,
            platform_fee_cents: 37,
            platform_fee_bps: 250,
            platform_fee_wallet: Some("0xplatform".to_string()),
            proofwork_fee_cents: 15,
            proofwork_fee_bps: 100,
            proofwork_fee_wallet: Some("0xproofwork".to_string()),
            provider: None,
            provider_reference: None,
            state: PayoutState::Pending,
            blocked_reason: None,
            hold_until: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    #[tokio::test]
    async fn off_chain_success_marks_paid() {
        let fake = Arc::new(FakeStore::new());
        let worker_id = Uuid::new_v4();
        let payout = sample_payout(worker_id);
        fake.insert_payout(&payout).await.unwrap();
        let store: Arc<dyn StoreLike> = fake;
        let engine = PayoutEngine::new(store.clone(), 100, 500, Some("0xpw".to_string()), Some(Arc::new(FakeProvider { paid: true })), None);

        let outcome = engine.execute(payout.id).await.unwrap();
        assert!(matches!(outcome, PayoutOutcome::Paid { .. }));
        let reloaded = store.get_payout(payout.id).await.unwrap();
        assert_eq!(reloaded.state, PayoutState::Paid);
    }

    #[tokio::test]
    async fn terminal_payout_is_a_noop() {
        let fake = Arc::new(FakeStore::new());
        let mut payout = sample_payout(Uuid::new_v4());
        payout.state = PayoutState::Paid;
        fake.insert_payout(&payout).await.unwrap();
        let store: Arc<dyn StoreLike> = fake;
        let engine = PayoutEngine::new(store, 100, 500, Some("0xpw".to_string()), Some(Arc::new(FakeProvider { paid: true })), None);

        let outcome = engine.execute(payout.id).await.unwrap();
        assert_eq!(outcome, PayoutOutcome::NoOp { reason: "already_terminal" });
    }

    #[tokio::test]
    async fn dispute_blocked_payout_is_a_noop() {
        let fake = Arc::new(FakeStore::new());
        let mut payout = sample_payout(Uuid::new_v4());
        payout.blocked_reason = Some(BlockedReason::DisputeOpen);
        fake.insert_payout(&payout).await.unwrap();
        let store: Arc<dyn StoreLike> = fake;
        let engine = PayoutEngine::new(store, 100, 500, Some("0xpw".to_string()), Some(Arc::new(FakeProvider { paid: true })), None);

        let outcome = engine.execute(payout.id).await.unwrap();
        assert_eq!(outcome, PayoutOutcome::NoOp { reason: "blocked" });
    }

    async fn seed_settlement_chain(store: &FakeStore, worker_payout_address: bool) -> Uuid {
        use proofwork_core::models::{Bounty, Job, Org, Submission, Worker};

        let org = Org { id: Uuid::new_v4(), billing_balance_cents: 0, platform_fee_bps: 250, platform_fee_wallet: Some("0xplatform".to_string()), created_at: chrono::Utc::now() };
        store.seed_org(org.clone());
        let bounty = Bounty::new(org.id, 1500, 1, 0);
        store.seed_bounty(bounty.clone());
        let job = Job::new(bounty.id, serde_json::json!({}), None);
        store.insert_job(&job).await.unwrap();

        let mut worker = Worker {
            id: Uuid::new_v4(),
            token_prefix: "wk".to_string(),
            token_hmac_hash: "hash".to_string(),
            capability_tags: Default::default(),
            payout_chain: None,
            payout_address: None,
            payout_verified_at: None,
            disabled: false,
        };
        if worker_payout_address {
            worker.payout_chain = Some("base".to_string());
            worker.payout_address = Some("0xworker".to_string());
            worker.payout_verified_at = Some(chrono::Utc::now());
        }
        store.seed_worker(worker.clone());

        let submission = Submission::new(job.id, worker.id, serde_json::json!({}), vec![], 1, "idem-1".to_string());
        store.insert_submission(&submission).await.unwrap();
        submission.id
    }

    #[tokio::test]
    async fn create_for_submission_blocks_off_chain_less_worker_without_payout_address() {
        let fake = Arc::new(FakeStore::new());
        let submission_id = seed_settlement_chain(&fake, false).await;
        let store: Arc<dyn StoreLike> = fake;
        // off-chain engine (on_chain: None) never requires a payout address.
        let engine = PayoutEngine::new(store, 100, 500, Some("0xpw".to_string()), Some(Arc::new(FakeProvider { paid: true })), None);

        let payout = engine.create_for_submission(submission_id, chrono::Utc::now()).await.unwrap();
        assert_eq!(payout.platform_fee_cents, 37);
        assert_eq!(payout.proofwork_fee_cents, 15);
        assert_eq!(payout.net_cents, 1448);
        assert!(payout.blocked_reason.is_none());
    }

    #[tokio::test]
    async fn unblock_for_worker_clears_missing_address_and_reschedules() {
        let fake = Arc::new(FakeStore::new());
        let worker_id = Uuid::new_v4();
        let mut payout = sample_payout(worker_id);
        payout.blocked_reason = Some(BlockedReason::WorkerPayoutAddressMissing);
        fake.insert_payout(&payout).await.unwrap();
        let store: Arc<dyn StoreLike> = fake;
        let engine = PayoutEngine::new(store.clone(), 100, 500, Some("0xpw".to_string()), Some(Arc::new(FakeProvider { paid: true })), None);

        let unblocked = engine.unblock_for_worker(worker_id).await.unwrap();
        assert_eq!(unblocked, vec![payout.id]);
        let reloaded = store.get_payout(payout.id).await.unwrap();
        assert!(reloaded.blocked_reason.is_none());
    }
}
