//! Per-(chain, address) nonce cache.
//!
//! The durable counter lives in `proofwork-store`'s `crypto_nonces`
//! table, locked for the duration of a broadcast-prep transaction. This
//! in-process cache only avoids a redundant RPC round trip to fetch the
//! chain's pending nonce on every broadcast, and lets a failed
//! broadcast force a fresh reconciliation instead of trusting a value
//! that may already have been consumed by a transaction the node never
//! confirmed sending.
//!
//! Grounded on the `PendingNonceManager` in the retrieval pack's
//! `x402-rs` EVM chain module: an `Arc<DashMap<Address, Arc<Mutex<u64>>>>`
//! cache with a sentinel value that forces a requery.

use std::sync::Arc;

use alloy_primitives::Address;
use dashmap::DashMap;
use tokio::sync::Mutex;

const UNSET: u64 = u64::MAX;

#[derive(Clone, Debug, Default)]
pub struct PendingNonceCache {
    nonces: Arc<DashMap<Address, Arc<Mutex<u64>>>>,
}

impl PendingNonceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reconcile the cache with a chain-observed pending nonce, taking
    /// the max of what's cached and what the chain reports so a stale
    /// local value never regresses ahead of what the mempool shows.
    pub async fn reconcile(&self, address: Address, chain_pending: u64) -> u64 {
        let slot = self
            .nonces
            .entry(address)
            .or_insert_with(|| Arc::new(Mutex::new(UNSET)))
            .clone();
        let mut cached = slot.lock().await;
        let reconciled = if *cached == UNSET { chain_pending } else { (*cached).max(chain_pending) };
        *cached = reconciled;
        reconciled
    }

    /// Take the next nonce to use, bumping the cache so a concurrent
    /// broadcast on the same process does not reuse it before the store
    /// row lock is released.
    pub async fn take_next(&self, address: Address) -> Option<u64> {
        let slot = self.nonces.get(&address)?.clone();
        let mut cached = slot.lock().await;
        if *cached == UNSET {
            return None;
        }
        let next = *cached;
        *cached += 1;
        Some(next)
    }

    /// Drop the cached value after a broadcast failure: the next use
    /// forces a fresh `reconcile` rather than trusting a possibly
    /// consumed nonce.
    pub async fn invalidate(&self, address: Address) {
        if let Some(slot) = self.nonces.get(&address) {
            let mut cached = slot.lock().await;
            *cached = UNSET;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[tokio::test]
    async fn reconcile_takes_max_of_cached_and_chain() {
        let cache = PendingNonceCache::new();
        let addr = address!("0000000000000000000000000000000000000001");

        let first = cache.reconcile(addr, 5).await;
        assert_eq!(first, 5);

        // A lower chain-observed value must not regress the cache.
        let second = cache.reconcile(addr, 2).await;
        assert_eq!(second, 5);

        let third = cache.reconcile(addr, 9).await;
        assert_eq!(third, 9);
    }

    #[tokio::test]
    async fn invalidate_forces_fresh_reconcile() {
        let cache = PendingNonceCache::new();
        let addr = address!("0000000000000000000000000000000000000002");
        cache.reconcile(addr, 10).await;
        cache.invalidate(addr).await;
        // After invalidation a lower chain value is accepted again.
        let reconciled = cache.reconcile(addr, 3).await;
        assert_eq!(reconciled, 3);
    }
}
