//! Artifact storage: upload-complete records and the
//! uploaded → scanning → clean|quarantined state machine. The engine
//! owns this as a contract — actual bytes live in whatever object
//! store wrote the `storage_key`.

use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

use proofwork_core::models::{Artifact, ArtifactState};

use crate::error::{StoreError, StoreResult};
use crate::Store;

impl Store {
    pub async fn insert_artifact(&self, artifact: &Artifact) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO artifacts (id, submission_id, kind, storage_key, state, retention_job_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(artifact.id)
        .bind(artifact.submission_id)
        .bind(&artifact.kind)
        .bind(&artifact.storage_key)
        .bind(artifact_state_to_str(artifact.state))
        .bind(artifact.retention_job_id)
        .bind(artifact.created_at)
        .bind(artifact.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_artifact(&self, artifact_id: Uuid) -> StoreResult<Artifact> {
        let row = sqlx::query(
            r#"
            SELECT id, submission_id, kind, storage_key, state, retention_job_id, created_at, updated_at
            FROM artifacts WHERE id = $1
            "#,
        )
        .bind(artifact_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| StoreError::NotFound(format!("artifact {artifact_id}")))?;
        row_to_artifact(&row)
    }

    pub async fn set_artifact_state(&self, artifact_id: Uuid, state: ArtifactState, now: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE artifacts SET state = $2, updated_at = $3 WHERE id = $1")
            .bind(artifact_id)
            .bind(artifact_state_to_str(state))
            .bind(now)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

fn row_to_artifact(row: &sqlx::postgres::PgRow) -> StoreResult<Artifact> {
    let state: String = row.try_get("state")?;
    Ok(Artifact {
        id: row.try_get("id")?,
        submission_id: row.try_get("submission_id")?,
        kind: row.try_get("kind")?,
        storage_key: row.try_get("storage_key")?,
        state: str_to_artifact_state(&state)?,
        retention_job_id: row.try_get("retention_job_id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn artifact_state_to_str(state: ArtifactState) -> &'static str {
    match state {
        ArtifactState::Uploaded => "uploaded",
        ArtifactState::Scanning => "scanning",
        ArtifactState::Clean => "clean",
        ArtifactState::Quarantined => "quarantined",
    }
}

fn str_to_artifact_state(s: &str) -> StoreResult<ArtifactState> {
    Ok(match s {
        "uploaded" => ArtifactState::Uploaded,
        "scanning" => ArtifactState::Scanning,
        "clean" => ArtifactState::Clean,
        "quarantined" => ArtifactState::Quarantined,
        other => return Err(StoreError::InvalidData(format!("unknown artifact state '{other}'"))),
    })
}
