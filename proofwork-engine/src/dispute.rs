//! Dispute holds and auto-refund scheduling.
//!
//! Grounded on the escrow dispute flow in the teacher's task manager:
//! opening a dispute blocks the in-flight payout, and resolution either
//! releases it or reverses the transfer via a buyer-balance credit.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use proofwork_core::models::{BlockedReason, Dispute, DisputeState, PayoutState, SubmissionState};
use proofwork_core::{ProofworkError, ProofworkResult};
use proofwork_store::StoreLike;

pub struct DisputeCoordinator {
    store: Arc<dyn StoreLike>,
}

fn payout_requested_key(payout_id: Uuid) -> String {
    format!("payout:{payout_id}")
}

fn auto_refund_key(dispute_id: Uuid) -> String {
    format!("dispute:auto_refund:{dispute_id}")
}

impl DisputeCoordinator {
    pub fn new(store: Arc<dyn StoreLike>) -> Self {
        Self { store }
    }

    pub async fn open(&self, bounty_id: Uuid, payout_id: Uuid, now: DateTime<Utc>) -> ProofworkResult<Dispute> {
        let payout = self.store.get_payout(payout_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        let hold_until = payout.hold_until.ok_or_else(|| ProofworkError::conflict("payout has no dispute window"))?;
        if hold_until <= now {
            return Err(ProofworkError::conflict("dispute window has closed"));
        }

        self.store
            .set_payout_state(payout_id, payout.state, Some(BlockedReason::DisputeOpen))
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;

        if let Some(pending) = self
            .store
            .find_outbox_event_by_key("payout.requested", &payout_requested_key(payout_id))
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?
        {
            self.store.mark_outbox_sent(pending.id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        }

        let dispute = Dispute { id: Uuid::new_v4(), bounty_id, payout_id, state: DisputeState::Open, created_at: now, resolved_at: None };
        self.store.open_dispute(&dispute).await.map_err(|e| ProofworkError::store(e.to_string()))?;

        let event_id = self
            .store
            .schedule_outbox_event(
                "dispute.auto_refund.requested",
                &auto_refund_key(dispute.id),
                &serde_json::json!({ "disputeId": dispute.id }),
            )
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;
        self.store.reschedule_outbox_at(event_id, hold_until).await.map_err(|e| ProofworkError::store(e.to_string()))?;

        info!(dispute_id = %dispute.id, %payout_id, "dispute opened");
        Ok(dispute)
    }

    /// Cancel before the hold expires: clears the block and reschedules
    /// the original payout execution at `max(now, hold_until)`.
    pub async fn cancel(&self, dispute_id: Uuid, now: DateTime<Utc>) -> ProofworkResult<()> {
        let dispute = self.store.get_dispute(dispute_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        if dispute.state != DisputeState::Open {
            return Err(ProofworkError::conflict("dispute is not open"));
        }
        let payout = self.store.get_payout(dispute.payout_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;

        self.store
            .set_payout_state(dispute.payout_id, payout.state, None)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;
        self.store.resolve_dispute(dispute_id, DisputeState::Cancelled).await.map_err(|e| ProofworkError::store(e.to_string()))?;

        let reschedule_at = payout.hold_until.map(|h| h.max(now)).unwrap_or(now);
        let key = payout_requested_key(dispute.payout_id);
        match self.store.find_outbox_event_by_key("payout.requested", &key).await.map_err(|e| ProofworkError::store(e.to_string()))? {
            Some(existing) => {
                self.store.reschedule_outbox_at(existing.id, reschedule_at).await.map_err(|e| ProofworkError::store(e.to_string()))?;
            }
            None => {
                self.store
                    .schedule_outbox_event("payout.requested", &key, &serde_json::json!({ "payoutId": dispute.payout_id }))
                    .await
                    .map_err(|e| ProofworkError::store(e.to_string()))?;
            }
        }

        info!(dispute_id = %dispute_id, "dispute cancelled, payout rescheduled");
        Ok(())
    }

    /// Admin resolution: `refund` reverses the payout and credits the
    /// buyer's org balance; `uphold` releases the block so settlement
    /// proceeds on its next outbox pass.
    pub async fn resolve(&self, dispute_id: Uuid, refund: bool) -> ProofworkResult<()> {
        let dispute = self.store.get_dispute(dispute_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        if dispute.state != DisputeState::Open {
            return Err(ProofworkError::conflict("dispute is not open"));
        }

        if refund {
            self.apply_refund(&dispute).await?;
            self.store.resolve_dispute(dispute_id, DisputeState::ResolvedRefund).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        } else {
            let payout = self.store.get_payout(dispute.payout_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
            self.store
                .set_payout_state(dispute.payout_id, payout.state, None)
                .await
                .map_err(|e| ProofworkError::store(e.to_string()))?;
            let key = payout_requested_key(dispute.payout_id);
            self.store
                .schedule_outbox_event("payout.requested", &key, &serde_json::json!({ "payoutId": dispute.payout_id }))
                .await
                .map_err(|e| ProofworkError::store(e.to_string()))?;
            self.store.resolve_dispute(dispute_id, DisputeState::ResolvedUphold).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        }
        Ok(())
    }

    /// Fires off `dispute.auto_refund.requested` at `hold_until` if the
    /// dispute was never resolved. Idempotent: a dispute already out of
    /// the `open` state is a no-op.
    pub async fn handle_auto_refund(&self, dispute_id: Uuid) -> ProofworkResult<bool> {
        let dispute = self.store.get_dispute(dispute_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        if dispute.state != DisputeState::Open {
            return Ok(false);
        }
        self.apply_refund(&dispute).await?;
        self.store.resolve_dispute(dispute_id, DisputeState::ResolvedRefund).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        Ok(true)
    }

    async fn apply_refund(&self, dispute: &Dispute) -> ProofworkResult<()> {
        let payout = self.store.get_payout(dispute.payout_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        if payout.state.is_terminal() {
            return Ok(());
        }
        let refund_cents = payout.gross_cents - payout.proofwork_fee_cents;
        self.store.credit_org_balance(payout.org_id, refund_cents).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        self.store
            .set_payout_state(dispute.payout_id, PayoutState::Refunded, None)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;
        self.store
            .set_submission_state(payout.submission_id, SubmissionState::Reversed)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;
        info!(payout_id = %dispute.payout_id, refund_cents, "dispute refund applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proofwork_core::models::{Org, Payout};
    use proofwork_store::fake::FakeStore;

    fn sample_payout(org_id: Uuid, hold_until: Option<DateTime<Utc>>) -> Payout {
        Payout {
            id: Uuid::new_v4(),
            org_id,
            submission_id: Uuid::new_v4(),
            worker_id: Uuid::new_v4(),
            gross_cents: 1000,
            net_cents: 890,
            platform_fee_cents: 0,
            platform_fee_bps: 0,
            platform_fee_wallet: None,
            proofwork_fee_cents: 10,
            proofwork_fee_bps: 100,
            proofwork_fee_wallet: Some("0xpw".to_string()),
            provider: None,
            provider_reference: None,
            state: PayoutState::Pending,
            blocked_reason: None,
            hold_until,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn open_requires_hold_window_still_open() {
        let fake = Arc::new(FakeStore::new());
        let payout = sample_payout(Uuid::new_v4(), Some(Utc::now() - chrono::Duration::seconds(1)));
        fake.insert_payout(&payout).await.unwrap();
        let store: Arc<dyn StoreLike> = fake;
        let coordinator = DisputeCoordinator::new(store);

        let err = coordinator.open(Uuid::new_v4(), payout.id, Utc::now()).await.unwrap_err();
        assert!(matches!(err, ProofworkError::Conflict(_)));
    }

    #[tokio::test]
    async fn auto_refund_credits_gross_minus_proofwork_fee() {
        let fake = Arc::new(FakeStore::new());
        let org = Org { id: Uuid::new_v4(), billing_balance_cents: 0, platform_fee_bps: 0, platform_fee_wallet: None, created_at: Utc::now() };
        fake.seed_org(org.clone());
        let payout = sample_payout(org.id, Some(Utc::now() + chrono::Duration::seconds(86_400)));
        fake.insert_payout(&payout).await.unwrap();
        let store: Arc<dyn StoreLike> = fake.clone();
        let coordinator = DisputeCoordinator::new(store);

        let dispute = coordinator.open(Uuid::new_v4(), payout.id, Utc::now()).await.unwrap();
        let did_refund = coordinator.handle_auto_refund(dispute.id).await.unwrap();
        assert!(did_refund);

        let reloaded_org = fake.get_org(org.id).await.unwrap();
        assert_eq!(reloaded_org.billing_balance_cents, 990);
        let reloaded_payout = fake.get_payout(payout.id).await.unwrap();
        assert_eq!(reloaded_payout.state, PayoutState::Refunded);
    }

    #[tokio::test]
    async fn auto_refund_is_idempotent_once_resolved() {
        let fake = Arc::new(FakeStore::new());
        let org = Org { id: Uuid::new_v4(), billing_balance_cents: 0, platform_fee_bps: 0, platform_fee_wallet: None, created_at: Utc::now() };
        fake.seed_org(org.clone());
        let payout = sample_payout(org.id, Some(Utc::now() + chrono::Duration::seconds(86_400)));
        fake.insert_payout(&payout).await.unwrap();
        let store: Arc<dyn StoreLike> = fake.clone();
        let coordinator = DisputeCoordinator::new(store);

        let dispute = coordinator.open(Uuid::new_v4(), payout.id, Utc::now()).await.unwrap();
        assert!(coordinator.handle_auto_refund(dispute.id).await.unwrap());
        assert!(!coordinator.handle_auto_refund(dispute.id).await.unwrap());

        let reloaded_org = fake.get_org(org.id).await.unwrap();
        assert_eq!(reloaded_org.billing_balance_cents, 990);
    }
}
