//! Health check infrastructure for the advisor
//!
//! Components report their own status; the control loop's status follows the
//! share of regions that failed in the last cycle. Liveness and readiness
//! probes read the aggregate.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component, ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Still operational, but some work is failing
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        *self != ComponentStatus::Unhealthy
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

/// Region counts from the most recent control cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleStats {
    pub attempted: usize,
    pub failed: usize,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: BTreeMap<String, ComponentHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_cycle: Option<CycleStats>,
}

impl HealthResponse {
    /// Worst status among components; healthy when none are registered
    pub fn compute_status(components: &BTreeMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .max()
            .unwrap_or(ComponentStatus::Healthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Component names for health tracking
pub mod components {
    pub const CONTROL_LOOP: &str = "control_loop";
    pub const INDICATOR_STORE: &str = "indicator_store";
    pub const REGISTRY: &str = "registry";
    pub const API: &str = "api";
}

/// Shared health state; clones observe the same components
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<BTreeMap<String, ComponentHealth>>>,
    last_cycle: Arc<RwLock<Option<CycleStats>>>,
    ready: Arc<AtomicBool>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component as healthy
    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components.write().await.insert(name.to_string(), health);
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    /// Derive the control loop's health from one cycle over all regions.
    ///
    /// Degraded when some regions failed, unhealthy when every region did.
    pub async fn record_cycle(&self, failed: usize, attempted: usize) {
        let health = if failed == 0 {
            ComponentHealth::healthy()
        } else if failed < attempted {
            ComponentHealth::degraded(format!("{} of {} regions failed", failed, attempted))
        } else {
            ComponentHealth::unhealthy(format!("all {} regions failed", attempted))
        };

        *self.last_cycle.write().await = Some(CycleStats {
            attempted,
            failed,
            timestamp: health.last_check_timestamp,
        });
        self.update(components::CONTROL_LOOP, health).await;
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::Release);
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        HealthResponse {
            status: HealthResponse::compute_status(&components),
            components,
            last_cycle: *self.last_cycle.read().await,
        }
    }

    /// Ready once initialized, until some component turns unhealthy
    pub async fn readiness(&self) -> ReadinessResponse {
        if !self.ready.load(Ordering::Acquire) {
            return ReadinessResponse {
                ready: false,
                reason: Some("Advisor not yet initialized".to_string()),
            };
        }

        let components = self.components.read().await;
        let unhealthy = components
            .iter()
            .find(|(_, health)| !health.status.is_operational());

        match unhealthy {
            Some((name, health)) => ReadinessResponse {
                ready: false,
                reason: Some(format!(
                    "{} unhealthy: {}",
                    name,
                    health.message.as_deref().unwrap_or("no details")
                )),
            },
            None => ReadinessResponse {
                ready: true,
                reason: None,
            },
        }
    }
}
