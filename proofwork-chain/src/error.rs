use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChainError {
    #[error("rpc call failed: {0}")]
    Rpc(String),

    #[error("transaction reverted")]
    Reverted,

    #[error("transaction pending, not yet mined")]
    Pending,

    #[error("signer error: {0}")]
    Signer(String),

    #[error("deadline exceeded: {0}")]
    Deadline(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

pub type ChainResult<T> = Result<T, ChainError>;
