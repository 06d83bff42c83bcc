//! Verification claim/verdict storage: a verifier claims a submission
//! under a time-boxed token, then posts a verdict idempotently against
//! that token so a retried callback can never double-apply.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use proofwork_core::models::{Scorecard, Verdict, Verification};

use crate::error::{StoreError, StoreResult};
use crate::jobs::{str_to_verdict, verdict_to_str};
use crate::Store;

impl Store {
    pub async fn open_verification(&self, verification: &Verification) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO verifications (id, submission_id, attempt, idempotency_key, claim_token,
                                        claim_expires_at, verdict, scorecard, run_metadata, created_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, NULL, NULL, NULL, $7, NULL)
            "#,
        )
        .bind(verification.id)
        .bind(verification.submission_id)
        .bind(verification.attempt)
        .bind(&verification.idempotency_key)
        .bind(&verification.claim_token)
        .bind(verification.claim_expires_at)
        .bind(verification.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Replay guard for the claim step: the same `idempotencyKey` must
    /// return the original claim payload rather than mint a second one.
    pub async fn find_verification_by_idempotency_key(&self, idempotency_key: &str) -> StoreResult<Option<Verification>> {
        let row = sqlx::query(
            r#"
            SELECT id, submission_id, attempt, idempotency_key, claim_token, claim_expires_at,
                   verdict, scorecard, run_metadata, created_at, finished_at
            FROM verifications WHERE idempotency_key = $1
            "#,
        )
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_verification).transpose()
    }

    /// Claim the oldest open, unexpired verification slot for a
    /// verifier. `FOR UPDATE SKIP LOCKED` so concurrent verifier
    /// gateway pods never hand out the same slot twice.
    pub async fn claim_next_open_verification(&self) -> StoreResult<Option<Verification>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id FROM verifications
            WHERE finished_at IS NULL AND claim_expires_at > now()
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.commit().await?;
            return Ok(None);
        };
        let id: Uuid = row.try_get("id")?;

        let full = sqlx::query(
            r#"
            SELECT id, submission_id, attempt, idempotency_key, claim_token, claim_expires_at,
                   verdict, scorecard, run_metadata, created_at, finished_at
            FROM verifications WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_one(&mut *tx)
        .await?;
        tx.commit().await?;
        row_to_verification(&full).map(Some)
    }

    /// Post a verdict, guarded by `claim_token` so a stale or duplicate
    /// callback cannot overwrite an already-finished verification.
    pub async fn post_verdict(
        &self,
        verification_id: Uuid,
        claim_token: &str,
        verdict: Verdict,
        scorecard: Option<&Scorecard>,
        run_metadata: Option<&serde_json::Value>,
    ) -> StoreResult<bool> {
        let scorecard_json = scorecard.map(|s| serde_json::to_value(s)).transpose()?;
        let row = sqlx::query(
            r#"
            UPDATE verifications
            SET verdict = $3, scorecard = $4, run_metadata = $5, finished_at = now()
            WHERE id = $1 AND claim_token = $2 AND finished_at IS NULL AND claim_expires_at > now()
            RETURNING id
            "#,
        )
        .bind(verification_id)
        .bind(claim_token)
        .bind(verdict_to_str(verdict))
        .bind(scorecard_json)
        .bind(run_metadata)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    pub async fn get_verification(&self, verification_id: Uuid) -> StoreResult<Verification> {
        let row = sqlx::query(
            r#"
            SELECT id, submission_id, attempt, idempotency_key, claim_token, claim_expires_at,
                   verdict, scorecard, run_metadata, created_at, finished_at
            FROM verifications WHERE id = $1
            "#,
        )
        .bind(verification_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("verification {verification_id}")))?;
        row_to_verification(&row)
    }

    /// Oldest unexpired open verification's age, for the backpressure
    /// gate's verifier-backlog signal.
    pub async fn oldest_open_verification_age_sec(&self) -> StoreResult<Option<i64>> {
        let row = sqlx::query(
            r#"
            SELECT EXTRACT(EPOCH FROM (now() - MIN(created_at)))::bigint AS age_sec
            FROM verifications WHERE finished_at IS NULL
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<Option<i64>, _>("age_sec")?)
    }
}

fn row_to_verification(row: &sqlx::postgres::PgRow) -> StoreResult<Verification> {
    let verdict: Option<String> = row.try_get("verdict")?;
    let scorecard_json: Option<serde_json::Value> = row.try_get("scorecard")?;
    let scorecard = scorecard_json
        .map(serde_json::from_value::<Scorecard>)
        .transpose()
        .map_err(|e| StoreError::InvalidData(format!("bad scorecard json: {e}")))?;

    Ok(Verification {
        id: row.try_get("id")?,
        submission_id: row.try_get("submission_id")?,
        attempt: row.try_get("attempt")?,
        idempotency_key: row.try_get("idempotency_key")?,
        claim_token: row.try_get("claim_token")?,
        claim_expires_at: row.try_get("claim_expires_at")?,
        verdict: verdict.map(|v| str_to_verdict(&v)).transpose()?,
        scorecard,
        run_metadata: row.try_get("run_metadata")?,
        created_at: row.try_get("created_at")?,
        finished_at: row.try_get::<Option<DateTime<Utc>>, _>("finished_at")?,
    })
}
