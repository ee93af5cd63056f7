//! AdmissionService: transport-agnostic admission control.
//!
//! This service owns:
//! - The current AdmissionManager, atomically replaceable at runtime
//! - The overload gate that sheds admitted work
//! - Shutdown coordination
//!
//! Transports (HTTP today) delegate to this service and keep no admission
//! state of their own.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::gate::{GateDecision, OverloadGate};
use crate::permit::{AcquireError, AdmissionGuard, AdmissionManager, ConfigError, ManagerStats};
use crate::version::VersionInfo;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmitError {
    #[error(transparent)]
    Acquire(#[from] AcquireError),
    /// Shed by the overload gate.
    #[error("application error")]
    Overloaded,
}

/// Coarse service state derived from the current manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    /// Capacity available
    Ready,
    /// Every token is out, nobody waiting yet
    Busy,
    /// Acquires are waiting; the gate is shedding
    Overloaded,
    ShuttingDown,
}

impl HealthStatus {
    fn from_stats(stats: &ManagerStats, shutting_down: bool) -> Self {
        if shutting_down {
            HealthStatus::ShuttingDown
        } else if stats.pending_demand > 0 {
            HealthStatus::Overloaded
        } else if stats.is_saturated() {
            HealthStatus::Busy
        } else {
            HealthStatus::Ready
        }
    }
}

/// Snapshot of service health for transports to query.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: HealthStatus,
    #[serde(flatten)]
    pub stats: ManagerStats,
    pub version: VersionInfo,
}

/// Transport-agnostic admission service.
pub struct AdmissionService {
    manager: ArcSwap<AdmissionManager>,
    gate: OverloadGate,
    max_work_delay: Duration,
    version: VersionInfo,
    /// Fires on shutdown; also cancels acquires still waiting for capacity.
    shutdown: CancellationToken,
}

impl AdmissionService {
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime; see [`AdmissionManager::new`].
    pub fn new(limit: i64) -> Result<Self, ConfigError> {
        let manager = AdmissionManager::new(limit)?;
        Ok(Self {
            manager: ArcSwap::from_pointee(manager),
            gate: OverloadGate::new(),
            max_work_delay: Duration::ZERO,
            version: VersionInfo::new(),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_gate(mut self, gate: OverloadGate) -> Self {
        self.gate = gate;
        self
    }

    /// Upper bound of the simulated work done by guarded requests.
    pub fn with_max_work_delay(mut self, delay: Duration) -> Self {
        self.max_work_delay = delay;
        self
    }

    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    pub fn max_work_delay(&self) -> Duration {
        self.max_work_delay
    }

    /// The manager new admissions currently go to.
    pub fn manager(&self) -> Arc<AdmissionManager> {
        self.manager.load_full()
    }

    /// Replace the manager with a fresh one using `limit`.
    ///
    /// Tokens issued by the previous manager are still released against it.
    pub fn set_limit(&self, limit: i64) -> Result<usize, ConfigError> {
        let next = AdmissionManager::new(limit)?;
        let new_limit = next.limit();
        let previous = self.manager.swap(Arc::new(next));
        let old = previous.stats();

        tracing::info!(
            old_limit = old.limit,
            new_limit,
            old_active = old.active,
            old_pending = old.pending_demand,
            "Admission limit updated"
        );
        Ok(new_limit)
    }

    /// Acquire a token from the current manager and pass it through the gate.
    ///
    /// A shed admission has already given its token back when this returns.
    pub async fn admit(&self) -> Result<AdmissionGuard, AdmitError> {
        let manager = self.manager.load_full();
        let token = manager.acquire_with_cancel(&self.shutdown).await?;
        let guard = AdmissionGuard::new(token, AdmissionManager::clone(&manager));

        match self.gate.decide(manager.overload_ratio()) {
            GateDecision::Admit => Ok(guard),
            GateDecision::Shed { ratio, check } => {
                tracing::warn!(
                    ratio,
                    check,
                    token = ?guard.token_id(),
                    "Overloaded - shedding request"
                );
                guard.release().await;
                Err(AdmitError::Overloaded)
            }
        }
    }

    /// Run `work` while holding an admission.
    ///
    /// The token is released exactly once whatever `work` returns; if the
    /// future is dropped midway, the guard's drop releases it.
    pub async fn run_guarded<F, Fut, T>(&self, work: F) -> Result<T, AdmitError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let guard = self.admit().await?;
        let output = work().await;
        guard.release().await;
        Ok(output)
    }

    /// Administrative reset of the current manager.
    pub async fn release_all(&self) {
        self.manager.load().release_all().await;
    }

    pub fn health(&self) -> HealthSnapshot {
        let stats = self.manager.load().stats();
        HealthSnapshot {
            status: HealthStatus::from_stats(&stats, self.shutdown.is_cancelled()),
            stats,
            version: self.version.clone(),
        }
    }

    pub fn trigger_shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
