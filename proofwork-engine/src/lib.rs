//! Job lifecycle coordination for the bounty marketplace: the claim
//! protocol, the verification claim/verdict handshake, payout
//! settlement over the fee split and EVM splitter, dispute holds, the
//! backpressure gate, and the outbox dispatcher that ties the topics
//! together.
//!
//! Every coordinator here takes `Arc<dyn StoreLike>` rather than a
//! concrete `Store`, so tests run against `proofwork_store::fake::FakeStore`
//! without a live Postgres instance.

pub mod artifact;
pub mod backpressure;
pub mod dispute;
pub mod job_queue;
pub mod outbox_dispatcher;
pub mod payout;
pub mod submission;
pub mod verification;

pub use proofwork_core::{ProofworkError, ProofworkResult};
