//! Worker records, payout address linking, org fee settings, and the
//! small versioned hot-toggle table (universal pause, canary percent)
//! that intentionally lives outside the immutable `Config` struct.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use proofwork_core::models::{Org, Worker, WorkerReputation};

use crate::error::{StoreError, StoreResult};
use crate::Store;

#[derive(Debug, Clone)]
pub struct SettingsSnapshot {
    pub universal_pause: bool,
    pub canary_percent: i32,
}

impl Store {
    pub async fn get_settings_snapshot(&self) -> StoreResult<SettingsSnapshot> {
        let row = sqlx::query(
            "SELECT universal_pause, canary_percent FROM operator_settings WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(match row {
            Some(row) => SettingsSnapshot {
                universal_pause: row.try_get("universal_pause")?,
                canary_percent: row.try_get("canary_percent")?,
            },
            None => SettingsSnapshot { universal_pause: false, canary_percent: 0 },
        })
    }

    pub async fn set_universal_pause(&self, paused: bool) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO operator_settings (id, universal_pause, canary_percent)
            VALUES (1, $1, 0)
            ON CONFLICT (id) DO UPDATE SET universal_pause = $1
            "#,
        )
        .bind(paused)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_worker(&self, worker_id: Uuid) -> StoreResult<Worker> {
        let row = sqlx::query(
            r#"
            SELECT id, token_prefix, token_hmac_hash, capability_tags, payout_chain,
                   payout_address, payout_verified_at, disabled
            FROM workers WHERE id = $1
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("worker {worker_id}")))?;
        row_to_worker(&row)
    }

    /// Looks up the worker owning a bearer token's prefix, so the caller
    /// can verify the secret half against `token_hmac_hash` without
    /// scanning the whole table.
    pub async fn find_worker_by_token_prefix(&self, token_prefix: &str) -> StoreResult<Option<Worker>> {
        let row = sqlx::query(
            r#"
            SELECT id, token_prefix, token_hmac_hash, capability_tags, payout_chain,
                   payout_address, payout_verified_at, disabled
            FROM workers WHERE token_prefix = $1
            "#,
        )
        .bind(token_prefix)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_worker).transpose()
    }

    pub async fn insert_worker(&self, worker: &Worker) -> StoreResult<()> {
        let tags: Vec<String> = worker.capability_tags.iter().cloned().collect();
        sqlx::query(
            r#"
            INSERT INTO workers (id, token_prefix, token_hmac_hash, capability_tags,
                                  payout_chain, payout_address, payout_verified_at, disabled)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(worker.id)
        .bind(&worker.token_prefix)
        .bind(&worker.token_hmac_hash)
        .bind(&tags)
        .bind(&worker.payout_chain)
        .bind(&worker.payout_address)
        .bind(worker.payout_verified_at)
        .bind(worker.disabled)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Link a signature-verified payout address. Called only after the
    /// caller has checked the worker's signed challenge off-store.
    pub async fn set_worker_payout_address(
        &self,
        worker_id: Uuid,
        chain: &str,
        address: &str,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE workers
            SET payout_chain = $2, payout_address = $3, payout_verified_at = now()
            WHERE id = $1
            "#,
        )
        .bind(worker_id)
        .bind(chain)
        .bind(address)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_org(&self, org_id: Uuid) -> StoreResult<Org> {
        let row = sqlx::query(
            "SELECT id, billing_balance_cents, platform_fee_bps, platform_fee_wallet, created_at FROM orgs WHERE id = $1",
        )
        .bind(org_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("org {org_id}")))?;
        row_to_org(&row)
    }

    pub async fn get_reputation(&self, worker_id: Uuid) -> StoreResult<Option<WorkerReputation>> {
        let row = sqlx::query(
            r#"
            SELECT worker_id, score, tier, tasks_completed, tasks_failed, disputes_lost, updated_at
            FROM worker_reputation WHERE worker_id = $1
            "#,
        )
        .bind(worker_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_reputation).transpose()
    }

    pub async fn upsert_reputation(&self, reputation: &WorkerReputation) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO worker_reputation (worker_id, score, tier, tasks_completed, tasks_failed, disputes_lost, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (worker_id) DO UPDATE SET
                score = $2, tier = $3, tasks_completed = $4, tasks_failed = $5,
                disputes_lost = $6, updated_at = $7
            "#,
        )
        .bind(reputation.worker_id)
        .bind(reputation.score)
        .bind(&reputation.tier)
        .bind(reputation.tasks_completed)
        .bind(reputation.tasks_failed)
        .bind(reputation.disputes_lost)
        .bind(reputation.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_worker(row: &sqlx::postgres::PgRow) -> StoreResult<Worker> {
    let tags: Vec<String> = row.try_get("capability_tags")?;
    Ok(Worker {
        id: row.try_get("id")?,
        token_prefix: row.try_get("token_prefix")?,
        token_hmac_hash: row.try_get("token_hmac_hash")?,
        capability_tags: tags.into_iter().collect::<BTreeSet<_>>(),
        payout_chain: row.try_get("payout_chain")?,
        payout_address: row.try_get("payout_address")?,
        payout_verified_at: row.try_get::<Option<DateTime<Utc>>, _>("payout_verified_at")?,
        disabled: row.try_get("disabled")?,
    })
}

fn row_to_org(row: &sqlx::postgres::PgRow) -> StoreResult<Org> {
    Ok(Org {
        id: row.try_get("id")?,
        billing_balance_cents: row.try_get("billing_balance_cents")?,
        platform_fee_bps: row.try_get("platform_fee_bps")?,
        platform_fee_wallet: row.try_get("platform_fee_wallet")?,
        created_at: row.try_get("created_at")?,
    })
}

fn row_to_reputation(row: &sqlx::postgres::PgRow) -> StoreResult<WorkerReputation> {
    Ok(WorkerReputation {
        worker_id: row.try_get("worker_id")?,
        score: row.try_get("score")?,
        tier: row.try_get("tier")?,
        tasks_completed: row.try_get("tasks_completed")?,
        tasks_failed: row.try_get("tasks_failed")?,
        disputes_lost: row.try_get("disputes_lost")?,
        updated_at: row.try_get("updated_at")?,
    })
}
