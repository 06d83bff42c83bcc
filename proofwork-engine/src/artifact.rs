//! Artifact lifecycle: presign → upload → scan-enqueue →
//! quarantine/clean. Contract only — the engine tracks state and fires
//! the scan/delete events; the actual bytes and the scanner itself live
//! outside this crate.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use proofwork_core::models::{Artifact, ArtifactState};
use proofwork_core::{ProofworkError, ProofworkResult};
use proofwork_store::StoreLike;

fn scan_key(artifact_id: Uuid) -> String {
    format!("artifact_scan:{artifact_id}")
}

pub struct ArtifactCoordinator {
    store: Arc<dyn StoreLike>,
}

impl ArtifactCoordinator {
    pub fn new(store: Arc<dyn StoreLike>) -> Self {
        Self { store }
    }

    /// Records the upload-complete marker and schedules
    /// `artifact.scan.requested` in the same logical step, so a scan is
    /// never lost between the two writes landing.
    pub async fn record_upload(&self, kind: &str, storage_key: &str) -> ProofworkResult<Artifact> {
        let now = Utc::now();
        let artifact = Artifact {
            id: Uuid::new_v4(),
            submission_id: None,
            kind: kind.to_string(),
            storage_key: storage_key.to_string(),
            state: ArtifactState::Uploaded,
            retention_job_id: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_artifact(&artifact).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        self.store
            .schedule_outbox_event(
                "artifact.scan.requested",
                &scan_key(artifact.id),
                &serde_json::json!({ "artifactId": artifact.id }),
            )
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;
        self.store
            .set_artifact_state(artifact.id, ArtifactState::Scanning, now)
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;
        info!(artifact_id = %artifact.id, "artifact uploaded, scan requested");
        Ok(Artifact { state: ArtifactState::Scanning, ..artifact })
    }

    /// Applies the external scanner's verdict. Not idempotent by design:
    /// the scanner is expected to be externally idempotent and only
    /// calls this once per completed scan.
    pub async fn apply_scan_result(&self, artifact_id: Uuid, clean: bool) -> ProofworkResult<ArtifactState> {
        let artifact = self.store.get_artifact(artifact_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        let next = if clean { ArtifactState::Clean } else { ArtifactState::Quarantined };
        if !artifact.state.can_transition_to(next) {
            return Err(ProofworkError::conflict(format!(
                "artifact {artifact_id} cannot move from {:?} to {:?}",
                artifact.state, next
            )));
        }
        self.store
            .set_artifact_state(artifact_id, next, Utc::now())
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;
        info!(%artifact_id, ?next, "artifact scan result applied");
        Ok(next)
    }

    /// A submission may only attach artifacts that finished scanning clean.
    pub async fn assert_attachable(&self, artifact_id: Uuid) -> ProofworkResult<()> {
        let artifact = self.store.get_artifact(artifact_id).await.map_err(|e| ProofworkError::store(e.to_string()))?;
        if !artifact.state.is_attachable() {
            return Err(ProofworkError::conflict(format!("artifact {artifact_id} is not clean")));
        }
        Ok(())
    }

    /// Schedules `artifact.delete.requested` tied to a retention job.
    /// Deletion itself is a no-op here — the deleter on the other end of
    /// the event is externally idempotent, so replays never double-delete.
    pub async fn request_deletion(&self, artifact_id: Uuid, retention_job_id: Uuid) -> ProofworkResult<()> {
        self.store
            .schedule_outbox_event(
                "artifact.delete.requested",
                &format!("artifact_delete:{artifact_id}:{retention_job_id}"),
                &serde_json::json!({ "artifactId": artifact_id, "retentionJobId": retention_job_id }),
            )
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proofwork_store::fake::FakeStore;

    #[tokio::test]
    async fn upload_moves_straight_to_scanning() {
        let store: Arc<dyn StoreLike> = Arc::new(FakeStore::new());
        let coordinator = ArtifactCoordinator::new(store);
        let artifact = coordinator.record_upload("screenshot", "s3://bucket/key").await.unwrap();
        assert_eq!(artifact.state, ArtifactState::Scanning);
    }

    #[tokio::test]
    async fn clean_scan_makes_artifact_attachable() {
        let store: Arc<dyn StoreLike> = Arc::new(FakeStore::new());
        let coordinator = ArtifactCoordinator::new(store);
        let artifact = coordinator.record_upload("log", "s3://bucket/key").await.unwrap();
        coordinator.apply_scan_result(artifact.id, true).await.unwrap();
        assert!(coordinator.assert_attachable(artifact.id).await.is_ok());
    }

    #[tokio::test]
    async fn quarantined_artifact_is_not_attachable() {
        let store: Arc<dyn StoreLike> = Arc::new(FakeStore::new());
        let coordinator = ArtifactCoordinator::new(store);
        let artifact = coordinator.record_upload("video", "s3://bucket/key").await.unwrap();
        coordinator.apply_scan_result(artifact.id, false).await.unwrap();
        let err = coordinator.assert_attachable(artifact.id).await.unwrap_err();
        assert!(matches!(err, ProofworkError::Conflict(_)));
    }

    #[tokio::test]
    async fn scan_result_cannot_be_applied_twice() {
        let store: Arc<dyn StoreLike> = Arc::new(FakeStore::new());
        let coordinator = ArtifactCoordinator::new(store);
        let artifact = coordinator.record_upload("log", "s3://bucket/key").await.unwrap();
        coordinator.apply_scan_result(artifact.id, true).await.unwrap();
        let err = coordinator.apply_scan_result(artifact.id, true).await.unwrap_err();
        assert!(matches!(err, ProofworkError::Conflict(_)));
    }
}
