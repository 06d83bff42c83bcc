//! Dispute storage: opening a hold against a payout, and resolving it
//! either into a refund (org billing balance credited back) or an
//! uphold (the held payout resumes its normal settlement path).

use uuid::Uuid;

use proofwork_core::models::{Dispute, DisputeState};

use crate::error::{StoreError, StoreResult};
use crate::Store;

impl Store {
    pub async fn open_dispute(&self, dispute: &Dispute) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO disputes (id, bounty_id, payout_id, state, created_at, resolved_at)
            VALUES ($1, $2, $3, $4, $5, NULL)
            "#,
        )
        .bind(dispute.id)
        .bind(dispute.bounty_id)
        .bind(dispute.payout_id)
        .bind(dispute_state_to_str(dispute.state))
        .bind(dispute.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_dispute(&self, dispute_id: Uuid) -> StoreResult<Dispute> {
        let row = sqlx::query(
            "SELECT id, bounty_id, payout_id, state, created_at, resolved_at FROM disputes WHERE id = $1",
        )
        .bind(dispute_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("dispute {dispute_id}")))?;
        row_to_dispute(&row)
    }

    pub async fn resolve_dispute(&self, dispute_id: Uuid, state: DisputeState) -> StoreResult<()> {
        sqlx::query("UPDATE disputes SET state = $2, resolved_at = now() WHERE id = $1")
            .bind(dispute_id)
            .bind(dispute_state_to_str(state))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Credit an org's billing balance (refund path) atomically.
    pub async fn credit_org_balance(&self, org_id: Uuid, cents: i64) -> StoreResult<()> {
        sqlx::query("UPDATE orgs SET billing_balance_cents = billing_balance_cents + $2 WHERE id = $1")
            .bind(org_id)
            .bind(cents)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn open_disputes_for_payout(&self, payout_id: Uuid) -> StoreResult<Vec<Dispute>> {
        let rows = sqlx::query(
            "SELECT id, bounty_id, payout_id, state, created_at, resolved_at FROM disputes WHERE payout_id = $1 AND state = 'open'",
        )
        .bind(payout_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_dispute).collect()
    }
}

fn row_to_dispute(row: &sqlx::postgres::PgRow) -> StoreResult<Dispute> {
    use sqlx::Row;
    let state: String = row.try_get("state")?;
    Ok(Dispute {
        id: row.try_get("id")?,
        bounty_id: row.try_get("bounty_id")?,
        payout_id: row.try_get("payout_id")?,
        state: str_to_dispute_state(&state)?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}

fn dispute_state_to_str(s: DisputeState) -> &'static str {
    match s {
        DisputeState::Open => "open",
        DisputeState::ResolvedRefund => "resolved_refund",
        DisputeState::ResolvedUphold => "resolved_uphold",
        DisputeState::Cancelled => "cancelled",
    }
}

fn str_to_dispute_state(s: &str) -> StoreResult<DisputeState> {
    Ok(match s {
        "open" => DisputeState::Open,
        "resolved_refund" => DisputeState::ResolvedRefund,
        "resolved_uphold" => DisputeState::ResolvedUphold,
        "cancelled" => DisputeState::Cancelled,
        other => return Err(StoreError::InvalidData(format!("unknown dispute state '{other}'"))),
    })
}
