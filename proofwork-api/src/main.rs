mod auth;
mod error;
mod routes;
mod state;

use std::sync::Arc;
use std::time::Duration;

use proofwork_chain::{BroadcastClient, LocalKeySigner, PendingNonceCache};
use proofwork_core::Config;
use proofwork_engine::payout::{HttpPaymentProvider, OnChainExecutor, PaymentProvider, PayoutEngine};
use proofwork_store::{Store, StoreLike};
use tower_http::cors::CorsLayer;

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = Config::load()?;
    let store = Store::connect(&config.database_url).await?;
    let store: Arc<dyn StoreLike> = Arc::new(store);

    let off_chain = config
        .off_chain_provider_url
        .as_ref()
        .map(|url| Arc::new(HttpPaymentProvider::new(url.clone(), config.http_deadline())) as Arc<dyn PaymentProvider>);

    let on_chain = build_on_chain_executor(&config)?;

    let payout_engine = Arc::new(PayoutEngine::new(
        store.clone(),
        config.proofwork_fee_bps,
        config.max_proofwork_fee_bps,
        config.proofwork_fee_wallet.clone(),
        off_chain,
        on_chain,
    ));

    let bind_addr = config.http_bind_addr.clone();
    let state = AppState::new(store, Arc::new(config), payout_engine);
    let app = routes::router(state).layer(CorsLayer::permissive());

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(%bind_addr, "proofwork-api listening");
    axum::serve(listener, app).await?;

    Ok(())
}

/// Builds the on-chain settlement leg when the operator has configured
/// an RPC endpoint, signer key, token, and splitter contract. Any one
/// missing leaves the on-chain leg disabled; the payout engine falls
/// back to off-chain settlement (or marks the payout blocked if neither
/// is configured) rather than failing startup.
fn build_on_chain_executor(config: &Config) -> anyhow::Result<Option<OnChainExecutor>> {
    let (Some(rpc_url), Some(private_key), Some(token_address), Some(splitter_address)) = (
        config.evm_rpc_url.as_ref(),
        config.payout_signer_private_key.as_ref(),
        config.payout_token_address.as_ref(),
        config.payout_splitter_address.as_ref(),
    ) else {
        return Ok(None);
    };

    let broadcast = BroadcastClient::connect(rpc_url, config.evm_chain_id, config.base_gas_limit)?;
    let signer = Arc::new(LocalKeySigner::from_hex(private_key, config.evm_chain_id)?);

    Ok(Some(OnChainExecutor {
        broadcast,
        signer,
        nonce_cache: PendingNonceCache::new(),
        chain_id: config.evm_chain_id as i64,
        token_address: token_address.parse()?,
        token_decimals: config.payout_token_decimals,
        splitter_address: splitter_address.parse()?,
        confirmations_required: config.base_confirmations_required,
        rpc_deadline: Duration::from_millis(config.rpc_read_deadline_ms),
        broadcast_deadline: Duration::from_millis(config.rpc_broadcast_deadline_ms),
    }))
}
