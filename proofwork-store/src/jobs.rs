//! Job queue storage: candidate selection, atomic claim races, lease
//! expiry reaping, and the append-only claim/lease audit trail.
//!
//! Grounded on the skip-locked claim queries and conditional
//! `UPDATE ... WHERE ... RETURNING` claim race pattern used for
//! background job dispatch in the retrieval pack's shared job-queue
//! crate.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use proofwork_core::models::{Job, JobState, Verdict};

use crate::error::{StoreError, StoreResult};
use crate::Store;

impl Store {
    /// Candidate jobs a worker with `capability_tags` could claim: open,
    /// or claimed with an expired lease, not past freshness deadline.
    /// Ordered oldest-first and capped so a single worker poll never
    /// scans the whole open queue.
    pub async fn next_claimable_jobs(
        &self,
        capability_tags: &BTreeSet<String>,
        limit: i64,
    ) -> StoreResult<Vec<Job>> {
        let tags: Vec<String> = capability_tags.iter().cloned().collect();
        // `task_descriptor -> 'capability_tags'` is a json array; the `?|`
        // operator would match if ANY tag overlapped, so instead we check
        // the descriptor's tag set is fully covered by what the worker
        // carries via a NOT EXISTS anti-join over `jsonb_array_elements_text`.
        let rows = sqlx::query(
            r#"
            SELECT id, bounty_id, task_descriptor, state, claim_holder,
                   lease_expires_at, freshness_deadline, final_verdict, created_at
            FROM jobs j
            WHERE (j.state = 'open' OR (j.state = 'claimed' AND j.lease_expires_at <= now()))
              AND (j.freshness_deadline IS NULL OR j.freshness_deadline > now())
              AND NOT EXISTS (
                  SELECT 1
                  FROM jsonb_array_elements_text(
                      COALESCE(j.task_descriptor -> 'capability_tags', '[]'::jsonb)
                  ) AS required_tag
                  WHERE required_tag NOT IN (SELECT unnest($1::text[]))
              )
            ORDER BY j.created_at ASC
            LIMIT $2
            "#,
        )
        .bind(&tags)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_job).collect()
    }

    /// Win the race for a single job by flipping it atomically from a
    /// claimable state to `claimed` under a fresh lease. Returns `None`
    /// if another worker won first (the `WHERE` clause simply matched
    /// zero rows), never an error.
    pub async fn claim_job(
        &self,
        job_id: Uuid,
        worker_id: Uuid,
        lease_duration_sec: i64,
    ) -> StoreResult<Option<Job>> {
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'claimed',
                claim_holder = $2,
                lease_expires_at = now() + ($3 || ' seconds')::interval
            WHERE id = $1
              AND (state = 'open' OR (state = 'claimed' AND lease_expires_at <= now()))
              AND (freshness_deadline IS NULL OR freshness_deadline > now())
            RETURNING id, bounty_id, task_descriptor, state, claim_holder,
                      lease_expires_at, freshness_deadline, final_verdict, created_at
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(lease_duration_sec.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_job).transpose()
    }

    /// Sweep claimed jobs whose lease has expired back to `open`, so
    /// they re-enter `next_claimable_jobs` for a different worker.
    /// Returns the ids reaped, for audit logging by the caller.
    pub async fn reap_expired_leases(&self, batch_limit: i64) -> StoreResult<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            UPDATE jobs
            SET state = 'open', claim_holder = NULL, lease_expires_at = NULL
            WHERE id IN (
                SELECT id FROM jobs
                WHERE state = 'claimed' AND lease_expires_at <= now()
                ORDER BY lease_expires_at ASC
                LIMIT $1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING id
            "#,
        )
        .bind(batch_limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get::<Uuid, _>("id")).collect())
    }

    pub async fn get_job(&self, job_id: Uuid) -> StoreResult<Job> {
        let row = sqlx::query(
            r#"
            SELECT id, bounty_id, task_descriptor, state, claim_holder,
                   lease_expires_at, freshness_deadline, final_verdict, created_at
            FROM jobs WHERE id = $1
            "#,
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("job {job_id}")))?;
        row_to_job(&row)
    }

    pub async fn insert_job(&self, job: &Job) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO jobs (id, bounty_id, task_descriptor, state, claim_holder,
                               lease_expires_at, freshness_deadline, final_verdict, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(job.id)
        .bind(job.bounty_id)
        .bind(&job.task_descriptor)
        .bind(job_state_to_str(job.state))
        .bind(job.claim_holder)
        .bind(job.lease_expires_at)
        .bind(job.freshness_deadline)
        .bind(job.final_verdict.map(verdict_to_str))
        .bind(job.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn set_job_state(&self, job_id: Uuid, state: JobState) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET state = $2 WHERE id = $1")
            .bind(job_id)
            .bind(job_state_to_str(state))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn set_final_verdict(&self, job_id: Uuid, verdict: Verdict) -> StoreResult<()> {
        sqlx::query("UPDATE jobs SET final_verdict = $2 WHERE id = $1")
            .bind(job_id)
            .bind(verdict_to_str(verdict))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn record_job_audit(
        &self,
        job_id: Uuid,
        worker_id: Option<Uuid>,
        event_type: &str,
        metadata: Option<serde_json::Value>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO job_audit_log (job_id, worker_id, event_type, metadata, created_at)
            VALUES ($1, $2, $3, $4, now())
            "#,
        )
        .bind(job_id)
        .bind(worker_id)
        .bind(event_type)
        .bind(metadata)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> StoreResult<Job> {
    let state: String = row.try_get("state")?;
    let final_verdict: Option<String> = row.try_get("final_verdict")?;
    Ok(Job {
        id: row.try_get("id")?,
        bounty_id: row.try_get("bounty_id")?,
        task_descriptor: row.try_get("task_descriptor")?,
        state: str_to_job_state(&state)?,
        claim_holder: row.try_get("claim_holder")?,
        lease_expires_at: row.try_get::<Option<DateTime<Utc>>, _>("lease_expires_at")?,
        freshness_deadline: row.try_get::<Option<DateTime<Utc>>, _>("freshness_deadline")?,
        final_verdict: final_verdict.map(|v| str_to_verdict(&v)).transpose()?,
        created_at: row.try_get("created_at")?,
    })
}

pub(crate) fn job_state_to_str(state: JobState) -> &'static str {
    match state {
        JobState::Open => "open",
        JobState::Claimed => "claimed",
        JobState::Submitted => "submitted",
        JobState::Done => "done",
        JobState::Cancelled => "cancelled",
    }
}

fn str_to_job_state(s: &str) -> StoreResult<JobState> {
    Ok(match s {
        "open" => JobState::Open,
        "claimed" => JobState::Claimed,
        "submitted" => JobState::Submitted,
        "done" => JobState::Done,
        "cancelled" => JobState::Cancelled,
        other => return Err(StoreError::InvalidData(format!("unknown job state '{other}'"))),
    })
}

pub(crate) fn verdict_to_str(v: Verdict) -> &'static str {
    match v {
        Verdict::Pass => "pass",
        Verdict::Fail => "fail",
        Verdict::Inconclusive => "inconclusive",
    }
}

pub(crate) fn str_to_verdict(s: &str) -> StoreResult<Verdict> {
    Ok(match s {
        "pass" => Verdict::Pass,
        "fail" => Verdict::Fail,
        "inconclusive" => Verdict::Inconclusive,
        other => return Err(StoreError::InvalidData(format!("unknown verdict '{other}'"))),
    })
}
