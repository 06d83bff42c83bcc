//! Bounty storage: the buyer-facing unit of work that materializes into
//! jobs on publish. Mirrors `submissions.rs`'s structure.

use std::collections::BTreeSet;

use sqlx::Row;
use uuid::Uuid;

use proofwork_core::models::{Bounty, BountyState};

use crate::error::{StoreError, StoreResult};
use crate::Store;

impl Store {
    pub async fn insert_bounty(&self, bounty: &Bounty) -> StoreResult<()> {
        let allowed_origins: Vec<String> = bounty.allowed_origins.iter().cloned().collect();
        let required_fingerprint_classes: Vec<String> = bounty.required_fingerprint_classes.iter().cloned().collect();
        sqlx::query(
            r#"
            INSERT INTO bounties (
                id, org_id, reward_per_proof_cents, required_proofs, allowed_origins,
                required_fingerprint_classes, dispute_window_sec, task_descriptor, state, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(bounty.id)
        .bind(bounty.org_id)
        .bind(bounty.reward_per_proof_cents)
        .bind(bounty.required_proofs)
        .bind(&allowed_origins)
        .bind(&required_fingerprint_classes)
        .bind(bounty.dispute_window_sec)
        .bind(&bounty.task_descriptor)
        .bind(bounty_state_to_str(bounty.state))
        .bind(bounty.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_bounty(&self, bounty_id: Uuid) -> StoreResult<Bounty> {
        let row = sqlx::query(
            r#"
            SELECT id, org_id, reward_per_proof_cents, required_proofs, allowed_origins,
                   required_fingerprint_classes, dispute_window_sec, task_descriptor, state, created_at
            FROM bounties WHERE id = $1
            "#,
        )
        .bind(bounty_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("bounty {bounty_id}")))?;
        row_to_bounty(&row)
    }

    pub async fn set_bounty_state(&self, bounty_id: Uuid, state: BountyState) -> StoreResult<()> {
        sqlx::query("UPDATE bounties SET state = $2 WHERE id = $1")
            .bind(bounty_id)
            .bind(bounty_state_to_str(state))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_bounty(row: &sqlx::postgres::PgRow) -> StoreResult<Bounty> {
    let state: String = row.try_get("state")?;
    let allowed_origins: Vec<String> = row.try_get("allowed_origins")?;
    let required_fingerprint_classes: Vec<String> = row.try_get("required_fingerprint_classes")?;
    Ok(Bounty {
        id: row.try_get("id")?,
        org_id: row.try_get("org_id")?,
        reward_per_proof_cents: row.try_get("reward_per_proof_cents")?,
        required_proofs: row.try_get("required_proofs")?,
        allowed_origins: allowed_origins.into_iter().collect::<BTreeSet<String>>(),
        required_fingerprint_classes: required_fingerprint_classes.into_iter().collect::<BTreeSet<String>>(),
        dispute_window_sec: row.try_get("dispute_window_sec")?,
        task_descriptor: row.try_get("task_descriptor")?,
        state: str_to_bounty_state(&state)?,
        created_at: row.try_get("created_at")?,
    })
}

fn bounty_state_to_str(state: BountyState) -> &'static str {
    match state {
        BountyState::Draft => "draft",
        BountyState::Published => "published",
        BountyState::Closed => "closed",
    }
}

fn str_to_bounty_state(s: &str) -> StoreResult<BountyState> {
    Ok(match s {
        "draft" => BountyState::Draft,
        "published" => BountyState::Published,
        "closed" => BountyState::Closed,
        other => return Err(StoreError::InvalidData(format!("unknown bounty state '{other}'"))),
    })
}
