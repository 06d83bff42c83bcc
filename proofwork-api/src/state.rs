use std::sync::Arc;

use proofwork_core::config::Config;
use proofwork_engine::backpressure::BackpressureGate;
use proofwork_engine::job_queue::JobQueue;
use proofwork_engine::payout::PayoutEngine;
use proofwork_engine::submission::SubmissionCoordinator;
use proofwork_engine::verification::VerificationCoordinator;
use proofwork_store::StoreLike;

/// Everything the HTTP handlers need, built once at startup and cloned
/// into every request (cheap: it's all `Arc`s under the hood).
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StoreLike>,
    pub config: Arc<Config>,
    pub job_queue: Arc<JobQueue>,
    pub submissions: Arc<SubmissionCoordinator>,
    pub verification: Arc<VerificationCoordinator>,
    pub payouts: Arc<PayoutEngine>,
}

impl AppState {
    pub fn new(store: Arc<dyn StoreLike>, config: Arc<Config>, payouts: Arc<PayoutEngine>) -> Self {
        let gate = BackpressureGate::new(store.clone(), (&*config).into());
        let job_queue = Arc::new(JobQueue::new(store.clone(), gate, config.claim_lease_sec));
        let submissions = Arc::new(SubmissionCoordinator::new(store.clone()));
        let verification = Arc::new(VerificationCoordinator::new(
            store.clone(),
            config.max_verification_attempts,
            config.default_dispute_window_sec,
        ));
        Self { store, config, job_queue, submissions, verification, payouts }
    }
}
