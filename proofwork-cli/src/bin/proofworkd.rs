//! Background worker daemon: outbox dispatch loop and lease reaper.
//! The HTTP surface lives in `proofwork-api`; this binary only runs the
//! loops nothing is waiting on a response for.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use proofwork_core::Config;
use proofwork_engine::backpressure::BackpressureGate;
use proofwork_engine::dispute::DisputeCoordinator;
use proofwork_engine::job_queue::JobQueue;
use proofwork_engine::outbox_dispatcher::{HttpWebhookNotifier, OutboxDispatcher, WebhookNotifier};
use proofwork_engine::payout::PayoutEngine;
use proofwork_store::{Store, StoreLike};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "proofworkd")]
#[command(about = "Proofwork background worker daemon")]
struct Cli {
    /// Identifier recorded against outbox locks this process claims.
    #[arg(long, default_value_t = default_worker_id())]
    worker_id: String,
}

fn default_worker_id() -> String {
    format!("proofworkd-{}", Uuid::new_v4())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = Config::load()?;
    let store = Store::connect(&config.database_url).await?;
    let store: Arc<dyn StoreLike> = Arc::new(store);

    let payout_engine = Arc::new(PayoutEngine::new(
        store.clone(),
        config.proofwork_fee_bps,
        config.max_proofwork_fee_bps,
        config.proofwork_fee_wallet.clone(),
        None,
        None,
    ));
    let dispute_coordinator = Arc::new(DisputeCoordinator::new(store.clone()));
    let notifier: Option<Arc<dyn WebhookNotifier>> = config
        .webhook_base_url
        .as_ref()
        .map(|url| Arc::new(HttpWebhookNotifier::new(url.clone(), config.http_deadline())) as Arc<dyn WebhookNotifier>);

    let dispatcher = Arc::new(OutboxDispatcher::new(
        store.clone(),
        payout_engine,
        dispute_coordinator,
        notifier,
        config.max_outbox_attempts,
        config.outbox_lock_timeout_sec,
        config.outbox_worker_concurrency,
    ));

    let gate = BackpressureGate::new(store.clone(), (&config).into());
    let job_queue = Arc::new(JobQueue::new(store.clone(), gate, config.claim_lease_sec));

    let outbox_handle = tokio::spawn(run_outbox_loop(
        dispatcher,
        cli.worker_id.clone(),
        config.outbox_batch_limit,
        config.outbox_poll_interval(),
    ));
    let reap_handle = tokio::spawn(run_lease_reap_loop(
        job_queue,
        config.lease_reap_batch_limit,
        Duration::from_millis(config.lease_reap_interval_ms),
    ));

    tracing::info!(worker_id = %cli.worker_id, "proofworkd started");
    tokio::try_join!(outbox_handle, reap_handle)?;
    Ok(())
}

async fn run_outbox_loop(dispatcher: Arc<OutboxDispatcher>, locked_by: String, batch_limit: i64, poll_interval: Duration) {
    loop {
        let summary = dispatcher.run_once(&locked_by, batch_limit).await;
        if summary.claimed > 0 {
            tracing::info!(
                claimed = summary.claimed,
                sent = summary.sent,
                retried = summary.retried,
                dead_lettered = summary.dead_lettered,
                "outbox dispatch pass"
            );
        }
        tokio::time::sleep(poll_interval).await;
    }
}

async fn run_lease_reap_loop(job_queue: Arc<JobQueue>, batch_limit: i64, interval: Duration) {
    loop {
        match job_queue.reap_expired_leases(batch_limit).await {
            Ok(reaped) if !reaped.is_empty() => {
                tracing::info!(count = reaped.len(), "reaped expired job leases");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = %e, "lease reap pass failed"),
        }
        tokio::time::sleep(interval).await;
    }
}
