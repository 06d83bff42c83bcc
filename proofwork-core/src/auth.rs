//! Worker bearer token issuance and verification.
//!
//! A worker token is `{token_prefix}.{secret}`. The prefix is stored in
//! the clear on the `workers` row so a lookup doesn't require scanning
//! every worker's hash; the secret is never stored, only an HMAC-SHA256
//! of it (keyed by the rotating pepper) is. Rotating the pepper
//! invalidates every outstanding token at once, which is the intended
//! recovery path for a pepper leak.

use base64::Engine;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::ProofworkError;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_PREFIX_LEN: usize = 12;
const TOKEN_SECRET_BYTES: usize = 32;

/// A freshly minted worker credential. `bearer_token` is shown to the
/// worker exactly once; only `token_prefix` and `token_hmac_hash` are
/// persisted.
pub struct IssuedWorkerToken {
    pub bearer_token: String,
    pub token_prefix: String,
    pub token_hmac_hash: String,
}

/// Generates a new worker token and its storable HMAC under `pepper`.
pub fn issue_worker_token(pepper: &str) -> IssuedWorkerToken {
    let mut prefix_bytes = [0u8; TOKEN_PREFIX_LEN];
    rand::thread_rng().fill_bytes(&mut prefix_bytes);
    let token_prefix = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(prefix_bytes);

    let mut secret_bytes = [0u8; TOKEN_SECRET_BYTES];
    rand::thread_rng().fill_bytes(&mut secret_bytes);
    let secret = base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(secret_bytes);

    let token_hmac_hash = hash_worker_secret(&secret, pepper);
    let bearer_token = format!("{token_prefix}.{secret}");

    IssuedWorkerToken { bearer_token, token_prefix, token_hmac_hash }
}

/// HMAC-SHA256 of `secret` keyed by `pepper`, base64-encoded for storage.
pub fn hash_worker_secret(secret: &str, pepper: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(pepper.as_bytes()).expect("HMAC accepts keys of any length");
    mac.update(secret.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
}

/// Splits a bearer token into its prefix (used to look up the worker
/// row) and secret (verified against the stored hash).
pub fn split_bearer_token(bearer_token: &str) -> Result<(&str, &str), ProofworkError> {
    bearer_token
        .split_once('.')
        .filter(|(prefix, secret)| !prefix.is_empty() && !secret.is_empty())
        .ok_or_else(|| ProofworkError::validation("malformed worker bearer token"))
}

/// Verifies `secret` against `stored_hash` under `pepper` using a
/// constant-time comparison, so a rotating pepper can be checked as
/// `current` then `previous` without leaking timing information about
/// which one matched.
pub fn verify_worker_secret(secret: &str, pepper: &str, stored_hash: &str) -> bool {
    let Ok(expected) = base64::engine::general_purpose::STANDARD.decode(stored_hash) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(pepper.as_bytes()) else {
        return false;
    };
    mac.update(secret.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

/// Constant-time comparison for the verifier gateway's single shared
/// bearer secret, which has no prefix/hash split to anchor a lookup on.
pub fn verify_verifier_bearer(presented: &str, configured: &str) -> bool {
    let presented = presented.as_bytes();
    let configured = configured.as_bytes();
    if presented.len() != configured.len() {
        return false;
    }
    let mut diff = 0u8;
    for (a, b) in presented.iter().zip(configured.iter()) {
        diff |= a ^ b;
    }
    diff == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_round_trips_through_split_and_verify() {
        let issued = issue_worker_token("pepper-v1");
        let (prefix, secret) = split_bearer_token(&issued.bearer_token).unwrap();
        assert_eq!(prefix, issued.token_prefix);
        assert!(verify_worker_secret(secret, "pepper-v1", &issued.token_hmac_hash));
    }

    #[test]
    fn verify_fails_under_wrong_pepper() {
        let issued = issue_worker_token("pepper-v1");
        let (_, secret) = split_bearer_token(&issued.bearer_token).unwrap();
        assert!(!verify_worker_secret(secret, "pepper-v2", &issued.token_hmac_hash));
    }

    #[test]
    fn verify_fails_on_tampered_secret() {
        let issued = issue_worker_token("pepper-v1");
        assert!(!verify_worker_secret("not-the-secret", "pepper-v1", &issued.token_hmac_hash));
    }

    #[test]
    fn split_rejects_missing_separator() {
        assert!(split_bearer_token("no-dot-here").is_err());
    }

    #[test]
    fn verifier_bearer_match_is_exact() {
        assert!(verify_verifier_bearer("shared-secret", "shared-secret"));
        assert!(!verify_verifier_bearer("shared-secret", "other-secret"));
        assert!(!verify_verifier_bearer("short", "longer-secret"));
    }
}
