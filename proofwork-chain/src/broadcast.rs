//! Transaction broadcast and confirmation polling against a JSON-RPC
//! endpoint. The payout worker calls `broadcast` once per payout and
//! `poll_receipt` on a separate confirmation-topic loop; a pending
//! receipt is a retryable error, not a failure.

use std::time::Duration;

use alloy_primitives::{Address, Bytes, B256, U256};
use alloy_provider::network::TransactionBuilder;
use alloy_provider::{Provider, ProviderBuilder};
use alloy_rpc_types_eth::TransactionRequest;

use crate::error::{ChainError, ChainResult};
use crate::signer::PayoutSigner;

pub struct BroadcastClient {
    provider: Box<dyn Provider + Send + Sync>,
    chain_id: u64,
    gas_limit: u64,
}

pub struct BroadcastResult {
    pub tx_hash: B256,
    pub nonce: u64,
}

pub struct ReceiptStatus {
    pub confirmed: bool,
    pub reverted: bool,
    pub confirmations: u64,
}

impl BroadcastClient {
    pub fn connect(rpc_url: &str, chain_id: u64, gas_limit: u64) -> ChainResult<Self> {
        let url = rpc_url
            .parse()
            .map_err(|e| ChainError::Rpc(format!("invalid rpc url: {e}")))?;
        let provider = ProviderBuilder::new().on_http(url).boxed();
        Ok(Self { provider: Box::new(provider), chain_id, gas_limit })
    }

    /// Current nonce the chain reports as pending for `address`,
    /// including mempool transactions — the floor a reconciling
    /// `PendingNonceCache` must never fall below.
    pub async fn pending_nonce(&self, address: Address, deadline: Duration) -> ChainResult<u64> {
        tokio::time::timeout(deadline, self.provider.get_transaction_count(address).pending())
            .await
            .map_err(|_| ChainError::Deadline("pending_nonce".to_string()))?
            .map_err(|e| ChainError::Rpc(e.to_string()))
    }

    /// Sign and broadcast `calldata` to `to` at `nonce`. Returns the tx
    /// hash the caller persists alongside the payout's transfer rows
    /// before the transaction is even mined.
    pub async fn broadcast(
        &self,
        signer: &dyn PayoutSigner,
        to: Address,
        calldata: Bytes,
        nonce: u64,
        deadline: Duration,
    ) -> ChainResult<BroadcastResult> {
        let gas_price = tokio::time::timeout(deadline, self.provider.get_gas_price())
            .await
            .map_err(|_| ChainError::Deadline("get_gas_price".to_string()))?
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        let mut request = TransactionRequest::default()
            .from(signer.address())
            .to(to)
            .input(calldata.into())
            .nonce(nonce)
            .gas_limit(self.gas_limit);
        request.set_gas_price(gas_price);
        request.set_chain_id(self.chain_id);

        let pending = tokio::time::timeout(deadline, self.provider.send_transaction(request))
            .await
            .map_err(|_| ChainError::Deadline("send_transaction".to_string()))?
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        Ok(BroadcastResult { tx_hash: *pending.tx_hash(), nonce })
    }

    /// Fetch the receipt and compute confirmation depth against the
    /// current head. A missing receipt means the transaction has not
    /// been mined yet, which the payout worker treats as retryable
    /// rather than failed.
    pub async fn poll_receipt(
        &self,
        tx_hash: B256,
        required_confirmations: u64,
        deadline: Duration,
    ) -> ChainResult<ReceiptStatus> {
        let receipt = tokio::time::timeout(deadline, self.provider.get_transaction_receipt(tx_hash))
            .await
            .map_err(|_| ChainError::Deadline("get_transaction_receipt".to_string()))?
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        let Some(receipt) = receipt else {
            return Err(ChainError::Pending);
        };

        if !receipt.status() {
            return Ok(ReceiptStatus { confirmed: false, reverted: true, confirmations: 0 });
        }

        let latest_block = tokio::time::timeout(deadline, self.provider.get_block_number())
            .await
            .map_err(|_| ChainError::Deadline("get_block_number".to_string()))?
            .map_err(|e| ChainError::Rpc(e.to_string()))?;

        let receipt_block = receipt.block_number.ok_or(ChainError::Pending)?;
        let confirmations = latest_block.saturating_sub(receipt_block) + 1;

        Ok(ReceiptStatus {
            confirmed: confirmations >= required_confirmations,
            reverted: false,
            confirmations,
        })
    }
}

/// `amount * 10^decimals` as a base-unit integer, saturating rather than
/// panicking on overflow — payouts are bounded by fee math upstream,
/// but a defensive ceiling here costs nothing.
pub fn to_base_units(amount_cents: i64, token_decimals: u32) -> U256 {
    let amount = U256::from(amount_cents.max(0) as u128);
    let scale = U256::from(10u128).pow(U256::from(token_decimals));
    amount.saturating_mul(scale)
}
