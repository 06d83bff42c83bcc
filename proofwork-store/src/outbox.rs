//! Transactional outbox storage: skip-locked batch claims, exponential
//! backoff rescheduling, and dead-lettering after the attempt ceiling.
//!
//! Grounded on the retrieval pack's shared job-queue crate, which claims
//! a batch with `FOR UPDATE SKIP LOCKED` inside a single transaction and
//! marks rows `processing` before handing them to workers — the same
//! shape used here for outbound event delivery instead of generic jobs.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use proofwork_core::models::{OutboxEvent, OutboxState};

use crate::error::{StoreError, StoreResult};
use crate::Store;

impl Store {
    pub async fn schedule_outbox_event(
        &self,
        topic: &str,
        idempotency_key: &str,
        payload: &serde_json::Value,
    ) -> StoreResult<Uuid> {
        let id = Uuid::new_v4();
        let row = sqlx::query(
            r#"
            INSERT INTO outbox_events (id, topic, idempotency_key, payload, state, attempts, available_at, created_at)
            VALUES ($1, $2, $3, $4, 'pending', 0, now(), now())
            ON CONFLICT (topic, idempotency_key) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(id)
        .bind(topic)
        .bind(idempotency_key)
        .bind(payload)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(r.get::<Uuid, _>("id")),
            None => {
                let existing = sqlx::query(
                    "SELECT id FROM outbox_events WHERE topic = $1 AND idempotency_key = $2",
                )
                .bind(topic)
                .bind(idempotency_key)
                .fetch_one(&self.pool)
                .await?;
                Ok(existing.get::<Uuid, _>("id"))
            }
        }
    }

    /// Claim up to `limit` due events for this dispatcher instance,
    /// flipping them to `processing` inside the same transaction that
    /// selected them so no two dispatcher workers grab the same row.
    pub async fn claim_due_outbox_events(
        &self,
        locked_by: &str,
        limit: i64,
    ) -> StoreResult<Vec<OutboxEvent>> {
        let mut tx = self.pool.begin().await?;

        let rows = sqlx::query(
            r#"
            SELECT id FROM outbox_events
            WHERE state = 'pending' AND available_at <= now()
            ORDER BY available_at ASC
            LIMIT $1
            FOR UPDATE SKIP LOCKED
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let ids: Vec<Uuid> = rows.iter().map(|r| r.get::<Uuid, _>("id")).collect();
        if ids.is_empty() {
            tx.commit().await?;
            return Ok(Vec::new());
        }

        let claimed = sqlx::query(
            r#"
            UPDATE outbox_events
            SET state = 'processing', locked_at = now(), locked_by = $2
            WHERE id = ANY($1)
            RETURNING id, topic, idempotency_key, payload, state, attempts,
                      available_at, locked_at, locked_by, last_error, created_at, sent_at
            "#,
        )
        .bind(&ids)
        .bind(locked_by)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;
        claimed.iter().map(row_to_outbox_event).collect()
    }

    /// Look up a scheduled event by its natural key, used to pre-empt a
    /// pending `payout.requested` row when a dispute opens.
    pub async fn find_outbox_event_by_key(&self, topic: &str, idempotency_key: &str) -> StoreResult<Option<OutboxEvent>> {
        let row = sqlx::query(
            r#"
            SELECT id, topic, idempotency_key, payload, state, attempts,
                   available_at, locked_at, locked_by, last_error, created_at, sent_at
            FROM outbox_events WHERE topic = $1 AND idempotency_key = $2
            "#,
        )
        .bind(topic)
        .bind(idempotency_key)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_outbox_event).transpose()
    }

    /// Move a pending event's `available_at`, used when a dispute is
    /// cancelled before expiry and the payout must run again later.
    pub async fn reschedule_outbox_at(&self, event_id: Uuid, available_at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE outbox_events SET state = 'pending', available_at = $2 WHERE id = $1")
            .bind(event_id)
            .bind(available_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Release locks held past `lock_timeout_sec`, returning them to
    /// `pending` so a crashed dispatcher worker doesn't strand an event.
    pub async fn release_stale_outbox_locks(&self, lock_timeout_sec: i64) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_events
            SET state = 'pending', locked_at = NULL, locked_by = NULL
            WHERE state = 'processing' AND locked_at < now() - ($1 || ' seconds')::interval
            "#,
        )
        .bind(lock_timeout_sec.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn mark_outbox_sent(&self, event_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE outbox_events SET state = 'sent', sent_at = now(), locked_at = NULL, locked_by = NULL WHERE id = $1",
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Reschedule a failed delivery with exponential backoff, or
    /// dead-letter it once `attempts` reaches `max_attempts`.
    pub async fn reschedule_or_deadletter_outbox(
        &self,
        event_id: Uuid,
        error: &str,
        max_attempts: i32,
        backoff_sec: i64,
    ) -> StoreResult<OutboxState> {
        let row = sqlx::query(
            r#"
            UPDATE outbox_events
            SET attempts = attempts + 1,
                last_error = $2,
                locked_at = NULL,
                locked_by = NULL,
                state = CASE WHEN attempts + 1 >= $3 THEN 'deadletter' ELSE 'pending' END,
                available_at = CASE WHEN attempts + 1 >= $3 THEN available_at
                                     ELSE now() + ($4 || ' seconds')::interval END
            WHERE id = $1
            RETURNING state
            "#,
        )
        .bind(event_id)
        .bind(error)
        .bind(max_attempts)
        .bind(backoff_sec.to_string())
        .fetch_one(&self.pool)
        .await?;

        let state: String = row.try_get("state")?;
        str_to_outbox_state(&state)
    }

    pub async fn get_outbox_event(&self, event_id: Uuid) -> StoreResult<OutboxEvent> {
        let row = sqlx::query(
            r#"
            SELECT id, topic, idempotency_key, payload, state, attempts,
                   available_at, locked_at, locked_by, last_error, created_at, sent_at
            FROM outbox_events WHERE id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("outbox event {event_id}")))?;
        row_to_outbox_event(&row)
    }

    /// Oldest `available_at` among pending/processing events, used by
    /// the backpressure gate to measure queue age.
    pub async fn oldest_pending_outbox_age_sec(&self) -> StoreResult<Option<i64>> {
        let row = sqlx::query(
            r#"
            SELECT EXTRACT(EPOCH FROM (now() - MIN(available_at)))::bigint AS age_sec
            FROM outbox_events WHERE state IN ('pending', 'processing')
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get::<Option<i64>, _>("age_sec")?)
    }
}

fn row_to_outbox_event(row: &sqlx::postgres::PgRow) -> StoreResult<OutboxEvent> {
    let state: String = row.try_get("state")?;
    Ok(OutboxEvent {
        id: row.try_get("id")?,
        topic: row.try_get("topic")?,
        idempotency_key: row.try_get("idempotency_key")?,
        payload: row.try_get("payload")?,
        state: str_to_outbox_state(&state)?,
        attempts: row.try_get("attempts")?,
        available_at: row.try_get("available_at")?,
        locked_at: row.try_get::<Option<DateTime<Utc>>, _>("locked_at")?,
        locked_by: row.try_get("locked_by")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        sent_at: row.try_get::<Option<DateTime<Utc>>, _>("sent_at")?,
    })
}

fn str_to_outbox_state(s: &str) -> StoreResult<OutboxState> {
    Ok(match s {
        "pending" => OutboxState::Pending,
        "processing" => OutboxState::Processing,
        "sent" => OutboxState::Sent,
        "deadletter" => OutboxState::Deadletter,
        other => return Err(StoreError::InvalidData(format!("unknown outbox state '{other}'"))),
    })
}
