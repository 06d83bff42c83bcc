//! Outbox dispatcher: claim a batch under skip-locked semantics, route
//! each event to its topic handler, then mark sent/rescheduled/dead.
//!
//! Grounded on the shared job-queue crate's worker-pool shape — a
//! bounded `tokio::sync::mpsc` channel feeding a small pool of tasks —
//! reused here for outbound event delivery instead of generic jobs.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use proofwork_core::models::OutboxEvent;
use proofwork_core::ProofworkError;
use proofwork_store::StoreLike;

use crate::dispute::DisputeCoordinator;
use crate::payout::PayoutEngine;

/// External notification sink for topics the engine only announces —
/// the actual work (verifier run, artifact scan) happens on the other
/// side of this call. Mirrors `PaymentProvider`'s HTTP-client shape.
#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    async fn notify(&self, topic: &str, payload: &serde_json::Value) -> Result<(), String>;
}

pub struct HttpWebhookNotifier {
    client: reqwest::Client,
    base_url: String,
    deadline: std::time::Duration,
}

impl HttpWebhookNotifier {
    pub fn new(base_url: String, deadline: std::time::Duration) -> Self {
        Self { client: reqwest::Client::new(), base_url, deadline }
    }
}

#[async_trait]
impl WebhookNotifier for HttpWebhookNotifier {
    async fn notify(&self, topic: &str, payload: &serde_json::Value) -> Result<(), String> {
        let resp = self
            .client
            .post(format!("{}/hooks/{}", self.base_url, topic))
            .timeout(self.deadline)
            .json(payload)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("webhook returned {}", resp.status()));
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct PayoutRequestedPayload {
    #[serde(rename = "payoutId")]
    payout_id: Uuid,
}

#[derive(Deserialize)]
struct DisputeAutoRefundPayload {
    #[serde(rename = "disputeId")]
    dispute_id: Uuid,
}

pub struct OutboxDispatcher {
    store: Arc<dyn StoreLike>,
    payout_engine: Arc<PayoutEngine>,
    dispute_coordinator: Arc<DisputeCoordinator>,
    notifier: Option<Arc<dyn WebhookNotifier>>,
    max_attempts: i32,
    lock_timeout_sec: i64,
    worker_concurrency: usize,
}

pub struct DispatchSummary {
    pub claimed: usize,
    pub sent: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    pub stale_locks_released: u64,
}

impl OutboxDispatcher {
    pub fn new(
        store: Arc<dyn StoreLike>,
        payout_engine: Arc<PayoutEngine>,
        dispute_coordinator: Arc<DisputeCoordinator>,
        notifier: Option<Arc<dyn WebhookNotifier>>,
        max_attempts: i32,
        lock_timeout_sec: i64,
        worker_concurrency: usize,
    ) -> Self {
        Self {
            store,
            payout_engine,
            dispute_coordinator,
            notifier,
            max_attempts,
            lock_timeout_sec,
            worker_concurrency: worker_concurrency.max(1),
        }
    }

    /// One dispatch pass: release stale locks, claim a batch, fan the
    /// batch out over a bounded channel to `worker_concurrency` tasks.
    pub async fn run_once(&self, locked_by: &str, batch_limit: i64) -> DispatchSummary {
        let stale_locks_released = match self.store.release_stale_outbox_locks(self.lock_timeout_sec).await {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "failed releasing stale outbox locks");
                0
            }
        };

        let events = match self.store.claim_due_outbox_events(locked_by, batch_limit).await {
            Ok(events) => events,
            Err(e) => {
                error!(error = %e, "failed claiming outbox batch");
                return DispatchSummary { claimed: 0, sent: 0, retried: 0, dead_lettered: 0, stale_locks_released };
            }
        };
        let claimed = events.len();

        let (tx, mut rx) = mpsc::channel::<(usize, usize, usize)>(claimed.max(1));
        let mut handles = Vec::with_capacity(claimed);
        let semaphore = Arc::new(tokio::sync::Semaphore::new(self.worker_concurrency));

        for event in events {
            let permit = semaphore.clone().acquire_owned().await.expect("semaphore not closed");
            let store = self.store.clone();
            let payout_engine = self.payout_engine.clone();
            let dispute_coordinator = self.dispute_coordinator.clone();
            let notifier = self.notifier.clone();
            let max_attempts = self.max_attempts;
            let tx = tx.clone();

            handles.push(tokio::spawn(async move {
                let _permit = permit;
                let outcome = dispatch_one(&payout_engine, &dispute_coordinator, notifier.as_deref(), &event).await;
                let (sent, retried, dead) = match outcome {
                    Ok(()) => {
                        if let Err(e) = store.mark_outbox_sent(event.id).await {
                            error!(event_id = %event.id, error = %e, "failed marking outbox event sent");
                        }
                        (1, 0, 0)
                    }
                    Err(err) => {
                        let backoff_sec = next_backoff_sec(event.attempts + 1);
                        match store.reschedule_or_deadletter_outbox(event.id, &err.to_string(), max_attempts, backoff_sec).await {
                            Ok(proofwork_core::models::OutboxState::Deadletter) => {
                                warn!(event_id = %event.id, topic = %event.topic, "outbox event dead-lettered");
                                (0, 0, 1)
                            }
                            Ok(_) => (0, 1, 0),
                            Err(store_err) => {
                                error!(event_id = %event.id, error = %store_err, "failed rescheduling outbox event");
                                (0, 0, 0)
                            }
                        }
                    }
                };
                let _ = tx.send((sent, retried, dead)).await;
            }));
        }
        drop(tx);

        let mut sent = 0;
        let mut retried = 0;
        let mut dead_lettered = 0;
        while let Some((s, r, d)) = rx.recv().await {
            sent += s;
            retried += r;
            dead_lettered += d;
        }
        for handle in handles {
            let _ = handle.await;
        }

        info!(claimed, sent, retried, dead_lettered, stale_locks_released, "outbox dispatch pass complete");
        DispatchSummary { claimed, sent, retried, dead_lettered, stale_locks_released }
    }
}

/// `delaySec = min(60, 2^min(10, attempts-1))`, per the attempt number
/// this delivery is about to become.
fn next_backoff_sec(attempt_number: i32) -> i64 {
    let exponent = (attempt_number - 1).clamp(0, 10);
    (1i64 << exponent).min(60)
}

async fn dispatch_one(
    payout_engine: &Arc<PayoutEngine>,
    dispute_coordinator: &Arc<DisputeCoordinator>,
    notifier: Option<&dyn WebhookNotifier>,
    event: &OutboxEvent,
) -> Result<(), ProofworkError> {
    match event.topic.as_str() {
        "payout.requested" | "payout.confirm.requested" => {
            let parsed: PayoutRequestedPayload = serde_json::from_value(event.payload.clone())
                .map_err(|e| ProofworkError::internal(format!("malformed {} payload: {e}", event.topic)))?;
            let outcome = if event.topic == "payout.requested" {
                payout_engine.execute(parsed.payout_id).await?
            } else {
                payout_engine.confirm(parsed.payout_id).await?
            };
            info!(payout_id = %parsed.payout_id, topic = %event.topic, ?outcome, "payout handler complete");
            Ok(())
        }
        "dispute.auto_refund.requested" => {
            let parsed: DisputeAutoRefundPayload = serde_json::from_value(event.payload.clone())
                .map_err(|e| ProofworkError::internal(format!("malformed {} payload: {e}", event.topic)))?;
            dispute_coordinator.handle_auto_refund(parsed.dispute_id).await?;
            Ok(())
        }
        "verification.requested" | "artifact.scan.requested" | "artifact.delete.requested" => {
            match notifier {
                Some(notifier) => notifier.notify(&event.topic, &event.payload).await.map_err(ProofworkError::transient),
                None => Ok(()),
            }
        }
        other => {
            warn!(topic = %other, event_id = %event.id, "no handler registered for outbox topic");
            Err(ProofworkError::internal(format!("unknown outbox topic '{other}'")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payout::PayoutEngine;
    use proofwork_core::models::{Payout, PayoutState};
    use proofwork_store::fake::FakeStore;

    fn sample_payout() -> Payout {
        let now = chrono::Utc::now();
        Payout {
            id: Uuid::new_v4(),
            org_id: Uuid::new_v4(),
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
            hold_until: None,
            created_at: now,
            updated_at: now,
        }
    }

    struct NoopProvider;

    #[async_trait::async_trait]
    impl crate::payout::PaymentProvider for NoopProvider {
        async fn create_payout(&self, _payout_id: Uuid, _net_cents: i64, _worker_id: Uuid) -> proofwork_core::ProofworkResult<crate::payout::OffChainResult> {
            Ok(crate::payout::OffChainResult { paid: true, provider: "noop".to_string(), provider_reference: "ref".to_string() })
        }
    }

    #[tokio::test]
    async fn payout_requested_event_is_marked_sent_on_success() {
        let fake = Arc::new(FakeStore::new());
        let payout = sample_payout();
        fake.insert_payout(&payout).await.unwrap();
        fake.schedule_outbox_event("payout.requested", &format!("payout:{}", payout.id), &serde_json::json!({ "payoutId": payout.id })).await.unwrap();

        let store: Arc<dyn StoreLike> = fake.clone();
        let payout_engine = Arc::new(PayoutEngine::new(store.clone(), 100, 500, Some("0xpw".to_string()), Some(Arc::new(NoopProvider)), None));
        let dispute_coordinator = Arc::new(DisputeCoordinator::new(store.clone()));
        let dispatcher = OutboxDispatcher::new(store, payout_engine, dispute_coordinator, None, 10, 600, 2);

        let summary = dispatcher.run_once("worker-1", 10).await;
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.retried, 0);
    }

    #[tokio::test]
    async fn unknown_topic_is_retried_not_silently_dropped() {
        let fake = Arc::new(FakeStore::new());
        fake.schedule_outbox_event("mystery.topic", "k1", &serde_json::json!({})).await.unwrap();

        let store: Arc<dyn StoreLike> = fake;
        let payout_engine = Arc::new(PayoutEngine::new(store.clone(), 100, 500, Some("0xpw".to_string()), Some(Arc::new(NoopProvider)), None));
        let dispute_coordinator = Arc::new(DisputeCoordinator::new(store.clone()));
        let dispatcher = OutboxDispatcher::new(store, payout_engine, dispute_coordinator, None, 10, 600, 2);

        let summary = dispatcher.run_once("worker-1", 10).await;
        assert_eq!(summary.claimed, 1);
        assert_eq!(summary.retried, 1);
    }

    #[test]
    fn backoff_matches_the_documented_sequence() {
        assert_eq!(next_backoff_sec(1), 1);
        assert_eq!(next_backoff_sec(2), 2);
        assert_eq!(next_backoff_sec(3), 4);
        assert_eq!(next_backoff_sec(11), 60);
        assert_eq!(next_backoff_sec(20), 60);
    }
}
