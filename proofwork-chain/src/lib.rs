//! EVM chain access for the on-chain payout splitter: a pluggable
//! signer seam, per-address nonce reconciliation, splitter call
//! encoding, and transaction broadcast/confirmation polling.

pub mod broadcast;
pub mod error;
pub mod nonce;
pub mod signer;
pub mod splitter;

pub use broadcast::{BroadcastClient, BroadcastResult, ReceiptStatus};
pub use error::{ChainError, ChainResult};
pub use nonce::PendingNonceCache;
pub use signer::{KmsSigner, LocalKeySigner, PayoutSigner};
pub use splitter::{SplitCall, SplitLeg};
