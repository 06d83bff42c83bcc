//! Backpressure gate: a pure function of queue ages and pause flags
//! that `job_queue::next` consults before handing a worker anything.
//!
//! Grounded on the settings-snapshot read in the teacher's coordinator
//! layer, generalized from a single boolean toggle to the full set of
//! age-based thresholds.

use std::sync::Arc;

use proofwork_core::config::Config;
use proofwork_core::{ProofworkError, ProofworkResult};
use proofwork_store::StoreLike;

#[derive(Debug, Clone, Copy)]
pub struct BackpressureThresholds {
    pub max_verifier_backlog_age_sec: i64,
    pub max_outbox_pending_age_sec: i64,
}

impl Default for BackpressureThresholds {
    fn default() -> Self {
        Self { max_verifier_backlog_age_sec: 300, max_outbox_pending_age_sec: 300 }
    }
}

impl From<&Config> for BackpressureThresholds {
    fn from(config: &Config) -> Self {
        Self {
            max_verifier_backlog_age_sec: config.max_verifier_backlog_age_sec,
            max_outbox_pending_age_sec: config.max_outbox_pending_age_sec,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateVerdict {
    pub paused: bool,
    pub reason: Option<String>,
}

pub struct BackpressureGate {
    store: Arc<dyn StoreLike>,
    thresholds: BackpressureThresholds,
}

impl BackpressureGate {
    pub fn new(store: Arc<dyn StoreLike>, thresholds: BackpressureThresholds) -> Self {
        Self { store, thresholds }
    }

    /// Checked on every `next()` call. The first tripped condition wins;
    /// operators read the reason off worker telemetry, not a combined code.
    pub async fn evaluate(&self) -> ProofworkResult<GateVerdict> {
        let settings = self.store.get_settings_snapshot().await.map_err(|e| ProofworkError::store(e.to_string()))?;
        if settings.universal_pause {
            return Ok(GateVerdict { paused: true, reason: Some("universal_pause".to_string()) });
        }

        if let Some(age) = self
            .store
            .oldest_open_verification_age_sec()
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?
        {
            if age > self.thresholds.max_verifier_backlog_age_sec {
                return Ok(GateVerdict { paused: true, reason: Some("verifier_backlog".to_string()) });
            }
        }

        if let Some(age) = self
            .store
            .oldest_pending_outbox_age_sec()
            .await
            .map_err(|e| ProofworkError::store(e.to_string()))?
        {
            if age > self.thresholds.max_outbox_pending_age_sec {
                return Ok(GateVerdict { paused: true, reason: Some("outbox_backlog".to_string()) });
            }
        }

        Ok(GateVerdict { paused: false, reason: None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proofwork_store::fake::FakeStore;

    #[tokio::test]
    async fn open_when_nothing_is_backed_up() {
        let store: Arc<dyn StoreLike> = Arc::new(FakeStore::new());
        let gate = BackpressureGate::new(store, BackpressureThresholds::default());
        let verdict = gate.evaluate().await.unwrap();
        assert!(!verdict.paused);
    }

    #[tokio::test]
    async fn universal_pause_wins_over_everything() {
        let fake = Arc::new(FakeStore::new());
        fake.set_universal_pause(true).await.unwrap();
        let store: Arc<dyn StoreLike> = fake;
        let gate = BackpressureGate::new(store, BackpressureThresholds::default());
        let verdict = gate.evaluate().await.unwrap();
        assert!(verdict.paused);
        assert_eq!(verdict.reason.as_deref(), Some("universal_pause"));
    }
}
