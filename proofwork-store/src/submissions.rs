//! Submission storage: one row per worker attempt at a job, carrying
//! the manifest and artifact index handed to verification.

use sqlx::Row;
use uuid::Uuid;

use proofwork_core::models::{Submission, SubmissionState};

use crate::error::{StoreError, StoreResult};
use crate::Store;

impl Store {
    pub async fn insert_submission(&self, submission: &Submission) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO submissions (id, job_id, worker_id, manifest, artifact_index, attempt, idempotency_key, state, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(submission.id)
        .bind(submission.job_id)
        .bind(submission.worker_id)
        .bind(&submission.manifest)
        .bind(&submission.artifact_index)
        .bind(submission.attempt)
        .bind(&submission.idempotency_key)
        .bind(submission_state_to_str(submission.state))
        .bind(submission.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_submission_by_idempotency_key(&self, job_id: Uuid, worker_id: Uuid, idempotency_key: &str) -> StoreResult<Option<Submission>> {
        let row = sqlx::query(
            r#"
            SELECT id, job_id, worker_id, manifest, artifact_index, attempt, idempotency_key, state, created_at
            FROM submissions WHERE job_id = $1 AND worker_id = $2 AND idempotency_key = $3
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_submission).transpose()
    }

    /// Highest attempt number already recorded for this job, so the
    /// caller can assign the next one without a read-modify-write race
    /// (the unique `(job_id, attempt)` constraint is the real guard).
    pub async fn next_submission_attempt(&self, job_id: Uuid) -> StoreResult<i32> {
        let row = sqlx::query("SELECT COALESCE(MAX(attempt), 0) AS max_attempt FROM submissions WHERE job_id = $1")
            .bind(job_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i32, _>("max_attempt")? + 1)
    }

    pub async fn get_submission(&self, submission_id: Uuid) -> StoreResult<Submission> {
        let row = sqlx::query(
            r#"
            SELECT id, job_id, worker_id, manifest, artifact_index, attempt, idempotency_key, state, created_at
            FROM submissions WHERE id = $1
            "#,
        )
        .bind(submission_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("submission {submission_id}")))?;
        row_to_submission(&row)
    }

    pub async fn set_submission_state(&self, submission_id: Uuid, state: SubmissionState) -> StoreResult<()> {
        sqlx::query("UPDATE submissions SET state = $2 WHERE id = $1")
            .bind(submission_id)
            .bind(submission_state_to_str(state))
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_submission(row: &sqlx::postgres::PgRow) -> StoreResult<Submission> {
    let state: String = row.try_get("state")?;
    Ok(Submission {
        id: row.try_get("id")?,
        job_id: row.try_get("job_id")?,
        worker_id: row.try_get("worker_id")?,
        manifest: row.try_get("manifest")?,
        artifact_index: row.try_get("artifact_index")?,
        attempt: row.try_get("attempt")?,
        idempotency_key: row.try_get("idempotency_key")?,
        state: str_to_submission_state(&state)?,
        created_at: row.try_get("created_at")?,
    })
}

fn submission_state_to_str(state: SubmissionState) -> &'static str {
    match state {
        SubmissionState::Pending => "pending",
        SubmissionState::Verifying => "verifying",
        SubmissionState::Passed => "passed",
        SubmissionState::Failed => "failed",
        SubmissionState::Inconclusive => "inconclusive",
        SubmissionState::Reversed => "reversed",
    }
}

fn str_to_submission_state(s: &str) -> StoreResult<SubmissionState> {
    Ok(match s {
        "pending" => SubmissionState::Pending,
        "verifying" => SubmissionState::Verifying,
        "passed" => SubmissionState::Passed,
        "failed" => SubmissionState::Failed,
        "inconclusive" => SubmissionState::Inconclusive,
        "reversed" => SubmissionState::Reversed,
        other => return Err(StoreError::InvalidData(format!("unknown submission state '{other}'"))),
    })
}
