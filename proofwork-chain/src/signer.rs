//! Pluggable payout signer: a local private key for development and a
//! seam for a KMS-backed implementation in production. Callers depend
//! on the `PayoutSigner` trait, never on `LocalKeySigner` directly, so
//! the payout worker never needs to change when the signing backend
//! does.

use async_trait::async_trait;
use alloy_primitives::{eip191_hash_message, Address, Signature, B256};
use alloy_signer::Signer;
use alloy_signer_local::PrivateKeySigner;

use crate::error::{ChainError, ChainResult};

/// Recovers the EVM address that produced an EIP-191 personal-sign
/// signature over `message`. Used to verify a worker owns the payout
/// address they're registering before it is ever trusted.
pub fn recover_eip191_signer(message: &str, signature_hex: &str) -> ChainResult<Address> {
    let trimmed = signature_hex.trim_start_matches("0x");
    let signature_bytes = alloy_primitives::hex::decode(trimmed)
        .map_err(|e| ChainError::Signer(format!("invalid signature hex: {e}")))?;
    let signature = Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| ChainError::Signer(format!("malformed signature: {e}")))?;
    let hash = eip191_hash_message(message.as_bytes());
    signature
        .recover_address_from_prehash(&hash)
        .map_err(|e| ChainError::Signer(format!("signature recovery failed: {e}")))
}

#[async_trait]
pub trait PayoutSigner: Send + Sync {
    fn address(&self) -> Address;

    /// Sign a 32-byte transaction or message digest and return the raw
    /// signature bytes in `r || s || v` form.
    async fn sign_digest(&self, digest: B256) -> ChainResult<Vec<u8>>;
}

pub struct LocalKeySigner {
    inner: PrivateKeySigner,
}

impl LocalKeySigner {
    pub fn from_hex(private_key_hex: &str, chain_id: u64) -> ChainResult<Self> {
        let signer: PrivateKeySigner = private_key_hex
            .parse()
            .map_err(|e| ChainError::Signer(format!("invalid private key: {e}")))?;
        Ok(Self { inner: signer.with_chain_id(Some(chain_id)) })
    }
}

#[async_trait]
impl PayoutSigner for LocalKeySigner {
    fn address(&self) -> Address {
        self.inner.address()
    }

    async fn sign_digest(&self, digest: B256) -> ChainResult<Vec<u8>> {
        let signature = self
            .inner
            .sign_hash(&digest)
            .await
            .map_err(|e| ChainError::Signer(e.to_string()))?;
        Ok(signature.as_bytes().to_vec())
    }
}

/// Placeholder for a remote KMS-backed signer (e.g. AWS KMS, GCP KMS, or
/// an HSM-fronted signing service). `Open Question`: which provider to
/// target first is an operator decision, not an engine one — the
/// `PayoutSigner` trait is the integration seam either way.
pub struct KmsSigner {
    address: Address,
}

impl KmsSigner {
    pub fn new(address: Address) -> Self {
        Self { address }
    }
}

#[async_trait]
impl PayoutSigner for KmsSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign_digest(&self, _digest: B256) -> ChainResult<Vec<u8>> {
        Err(ChainError::Signer("KMS signer backend not configured".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recovers_the_signing_address_from_a_personal_sign_message() {
        let key = PrivateKeySigner::random();
        let expected = key.address();
        let message = "link payout address:base:0xworker";

        let signature = key.sign_message(message.as_bytes()).await.unwrap();
        let signature_hex = format!("0x{}", alloy_primitives::hex::encode(signature.as_bytes()));

        let recovered = recover_eip191_signer(message, &signature_hex).unwrap();
        assert_eq!(recovered, expected);
    }

    #[test]
    fn rejects_malformed_signature_hex() {
        assert!(recover_eip191_signer("hello", "not-hex").is_err());
    }
}
