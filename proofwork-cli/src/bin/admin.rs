//! One-off operator commands: lease reaping, stale outbox lock release,
//! and dispute resolution outside the normal auto-refund timer.

use std::sync::Arc;

use clap::{Parser, Subcommand};
use proofwork_core::Config;
use proofwork_engine::backpressure::BackpressureGate;
use proofwork_engine::dispute::DisputeCoordinator;
use proofwork_engine::job_queue::JobQueue;
use proofwork_store::{Store, StoreLike};
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "proofwork-admin")]
#[command(about = "Proofwork operator commands")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reap leases past their expiry and return the affected jobs to the queue.
    ReapLeases {
        #[arg(long, default_value_t = 500)]
        batch_limit: i64,
    },
    /// Clear outbox row locks held past the lock timeout.
    ReleaseStaleOutboxLocks,
    /// Resolve an open dispute, refunding the org or releasing the payout.
    ResolveDispute {
        dispute_id: Uuid,
        #[arg(long)]
        refund: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = Config::load()?;
    let store = Store::connect(&config.database_url).await?;
    let store: Arc<dyn StoreLike> = Arc::new(store);

    match cli.command {
        Commands::ReapLeases { batch_limit } => {
            let gate = BackpressureGate::new(store.clone(), (&config).into());
            let job_queue = JobQueue::new(store, gate, config.claim_lease_sec);
            let reaped = job_queue.reap_expired_leases(batch_limit).await?;
            println!("reaped {} job lease(s)", reaped.len());
        }
        Commands::ReleaseStaleOutboxLocks => {
            let released = store.release_stale_outbox_locks(config.outbox_lock_timeout_sec).await?;
            println!("released {released} stale outbox lock(s)");
        }
        Commands::ResolveDispute { dispute_id, refund } => {
            let coordinator = DisputeCoordinator::new(store);
            coordinator.resolve(dispute_id, refund).await?;
            println!("resolved dispute {dispute_id} (refund={refund})");
        }
    }

    Ok(())
}
