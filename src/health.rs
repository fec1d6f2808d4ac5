use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::backend::ChatBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendState {
    Up,
    Down,
}

/// Result of one liveness probe, shared by every caller inside the TTL.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    /// Serialized as `llama`, the field name web clients poll for.
    #[serde(rename = "llama")]
    pub backend: BackendState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: DateTime<Utc>,
    #[serde(skip)]
    taken_at: Instant,
}

impl HealthSnapshot {
    pub fn age(&self) -> Duration {
        self.taken_at.elapsed()
    }

    pub fn is_ok(&self) -> bool {
        self.status == HealthStatus::Ok
    }
}

/// Short-lived memo around the backend liveness probe.
///
/// The lock is held across the probe, so callers arriving while a probe is
/// in flight wait for it instead of starting their own.
pub struct HealthProbe {
    backend: Arc<dyn ChatBackend>,
    ttl: Duration,
    cached: Mutex<Option<HealthSnapshot>>,
}

impl HealthProbe {
    pub fn new(backend: Arc<dyn ChatBackend>, ttl: Duration) -> Self {
        Self {
            backend,
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub async fn check(&self) -> HealthSnapshot {
        let mut cached = self.cached.lock().await;
        if let Some(snapshot) = cached.as_ref() {
            if snapshot.age() < self.ttl {
                return snapshot.clone();
            }
        }

        let snapshot = self.probe().await;
        *cached = Some(snapshot.clone());
        snapshot
    }

    async fn probe(&self) -> HealthSnapshot {
        let (status, backend, models, error) = match self.backend.list_models().await {
            Ok(models) => {
                debug!("Backend is up, {} model(s) loaded", models.len());
                (HealthStatus::Ok, BackendState::Up, Some(models), None)
            }
            Err(e) => {
                // Failures are memoized too, so an outage isn't hammered.
                warn!("Backend health probe failed: {}", e);
                (HealthStatus::Degraded, BackendState::Down, None, Some(e.to_string()))
            }
        };

        HealthSnapshot {
            status,
            backend,
            models,
            error,
            checked_at: Utc::now(),
            taken_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MockChatBackend;
    use crate::error::ParleyError;

    #[tokio::test]
    async fn test_calls_within_ttl_share_one_probe() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_list_models()
            .times(1)
            .returning(|| Ok(vec!["llama".to_string()]));
        let probe = HealthProbe::new(Arc::new(backend), Duration::from_secs(2));

        let first = probe.check().await;
        let second = probe.check().await;
        assert!(first.is_ok());
        assert_eq!(second.models, Some(vec!["llama".to_string()]));
        assert_eq!(first.checked_at, second.checked_at);
    }

    #[tokio::test]
    async fn test_concurrent_callers_share_one_probe() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_list_models()
            .times(1)
            .returning(|| Ok(vec!["llama".to_string()]));
        let probe = Arc::new(HealthProbe::new(Arc::new(backend), Duration::from_secs(2)));

        let checks: Vec<_> = (0..8)
            .map(|_| {
                let probe = probe.clone();
                tokio::spawn(async move { probe.check().await })
            })
            .collect();
        for check in checks {
            assert!(check.await.unwrap().is_ok());
        }
    }

    #[tokio::test]
    async fn test_failure_is_cached_as_degraded() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_list_models()
            .times(1)
            .returning(|| Err(ParleyError::BackendUnreachable("connection refused".to_string())));
        let probe = HealthProbe::new(Arc::new(backend), Duration::from_secs(2));

        let snapshot = probe.check().await;
        assert_eq!(snapshot.status, HealthStatus::Degraded);
        assert_eq!(snapshot.backend, BackendState::Down);
        assert!(snapshot.error.unwrap().contains("connection refused"));
        assert_eq!(probe.check().await.status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_expired_snapshot_is_refreshed() {
        let mut backend = MockChatBackend::new();
        backend
            .expect_list_models()
            .times(2)
            .returning(|| Ok(Vec::new()));
        let probe = HealthProbe::new(Arc::new(backend), Duration::from_millis(20));

        probe.check().await;
        tokio::time::sleep(Duration::from_millis(40)).await;
        probe.check().await;
    }

    #[test]
    fn test_snapshot_serializes_without_internal_clock() {
        let snapshot = HealthSnapshot {
            status: HealthStatus::Degraded,
            backend: BackendState::Down,
            models: None,
            error: Some("timeout".to_string()),
            checked_at: Utc::now(),
            taken_at: Instant::now(),
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["status"], "degraded");
        assert_eq!(json["llama"], "down");
        assert!(json.get("backend").is_none());
        assert!(json.get("models").is_none());
        assert!(json.get("taken_at").is_none());
    }
}
