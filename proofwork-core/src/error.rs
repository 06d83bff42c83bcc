//! Error kinds for the job lifecycle and settlement engine
//!
//! The taxonomy follows the propagation policy in the spec: validation
//! and conflict errors are surfaced to the caller immediately, transient
//! errors are retried by the outbox dispatcher, and permanent-business
//! outcomes are never represented as errors at all (they are typed
//! result values such as `Verdict::Fail`).

use thiserror::Error;

/// Main error type for Proofwork domain operations
#[derive(Error, Debug)]
pub enum ProofworkError {
    /// Bad descriptor, size/depth exceeded, forbidden keys, unknown capability.
    /// Never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// stale_job, lost_race, and other caller-visible conflicts.
    #[error("conflict: {0}")]
    Conflict(String),

    /// RPC timeouts, provider timeouts, gateway unreachable. Retried by the outbox.
    #[error("transient error: {0}")]
    Transient(String),

    /// Requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Persistence layer failure, already classified by the store.
    #[error("store error: {0}")]
    Store(String),

    /// On-chain signer/RPC/broadcast failure.
    #[error("chain error: {0}")]
    Chain(String),

    /// Configuration is missing or malformed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Programmer-facing internal invariant violation.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ProofworkError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn stale_job() -> Self {
        Self::Conflict("stale_job".to_string())
    }

    pub fn lost_race() -> Self {
        Self::Conflict("lost_race".to_string())
    }

    pub fn transient<S: Into<String>>(msg: S) -> Self {
        Self::Transient(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn store<S: Into<String>>(msg: S) -> Self {
        Self::Store(msg.into())
    }

    pub fn chain<S: Into<String>>(msg: S) -> Self {
        Self::Chain(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the outbox dispatcher should retry a handler that failed with this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Store(_) | Self::Chain(_))
    }

    /// Machine-readable error code for the `{error:{code,message}}` API payload.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_failure",
            Self::Conflict(msg) if msg == "stale_job" => "stale_job",
            Self::Conflict(msg) if msg == "lost_race" => "lost_race",
            Self::Conflict(_) => "conflict",
            Self::Transient(_) => "transient",
            Self::NotFound(_) => "not_found",
            Self::Store(_) => "store_error",
            Self::Chain(_) => "chain_error",
            Self::Config(_) => "configuration_error",
            Self::Serialization(_) => "serialization_error",
            Self::Internal(_) => "internal_error",
        }
    }
}

pub type ProofworkResult<T> = Result<T, ProofworkError>;
