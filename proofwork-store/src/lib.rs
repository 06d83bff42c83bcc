//! Relational persistence for the job lifecycle and settlement engine.
//!
//! Every write that needs to survive a crash mid-flight goes through a
//! `SELECT ... FOR UPDATE` or a conditional `UPDATE ... WHERE ... RETURNING`
//! so two callers racing the same row never both win. Nothing in here
//! interprets domain state machines — that lives in `proofwork-engine`;
//! this crate only moves rows in and out of Postgres.

pub mod artifacts;
pub mod bounties;
pub mod disputes;
pub mod error;
#[cfg(any(test, feature = "fake"))]
pub mod fake;
pub mod jobs;
pub mod outbox;
pub mod payouts;
pub mod settings;
pub mod store_trait;
pub mod submissions;
pub mod verification;

pub use error::{StoreError, StoreResult};
pub use store_trait::StoreLike;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

#[derive(Clone)]
pub struct Store {
    pub(crate) pool: PgPool,
}

impl Store {
    pub async fn connect(database_url: &str) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
