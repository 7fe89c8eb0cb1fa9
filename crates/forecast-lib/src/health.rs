//! Health check infrastructure for the forecast service
//!
//! Component health is derived from the outcome of the most recent tick;
//! readiness requires at least one completed tick.

use crate::predictor::TickSummary;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Health status of a component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Component is functioning normally
    Healthy,
    /// Component is experiencing issues but still operational
    Degraded,
    /// Component has failed
    Unhealthy,
}

impl ComponentStatus {
    /// Returns true if the component is at least partially operational
    pub fn is_operational(&self) -> bool {
        matches!(self, ComponentStatus::Healthy | ComponentStatus::Degraded)
    }
}

/// Information about a component's health
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub last_check_timestamp: i64,
}

impl ComponentHealth {
    pub fn healthy() -> Self {
        Self {
            status: ComponentStatus::Healthy,
            message: None,
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Degraded,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self {
            status: ComponentStatus::Unhealthy,
            message: Some(message.into()),
            last_check_timestamp: chrono::Utc::now().timestamp(),
        }
    }
}

/// Overall health response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Overall status is the worst component status
    pub fn compute_status(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        let mut has_degraded = false;

        for health in components.values() {
            match health.status {
                ComponentStatus::Unhealthy => return ComponentStatus::Unhealthy,
                ComponentStatus::Degraded => has_degraded = true,
                ComponentStatus::Healthy => {}
            }
        }

        if has_degraded {
            ComponentStatus::Degraded
        } else {
            ComponentStatus::Healthy
        }
    }
}

/// Readiness response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_tick_at: Option<i64>,
}

/// Component names for health tracking
pub mod components {
    pub const REGISTRY: &str = "registry";
    pub const TIME_SERIES: &str = "time_series";
    pub const MODEL_STORE: &str = "model_store";
    pub const SINK: &str = "sink";

    pub const ALL: [&str; 4] = [REGISTRY, TIME_SERIES, MODEL_STORE, SINK];
}

/// Health registry for tracking component health
#[derive(Debug, Clone)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    last_tick_at: Arc<RwLock<Option<i64>>>,
}

impl Default for HealthRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self {
            components: Arc::new(RwLock::new(HashMap::new())),
            last_tick_at: Arc::new(RwLock::new(None)),
        }
    }

    /// Registry with every service component registered as healthy
    pub async fn with_components() -> Self {
        let registry = Self::new();
        for name in components::ALL {
            registry.register(name).await;
        }
        registry
    }

    /// Register a component with initial healthy status
    pub async fn register(&self, name: &str) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), ComponentHealth::healthy());
    }

    /// Update component health status
    pub async fn update(&self, name: &str, health: ComponentHealth) {
        let mut components = self.components.write().await;
        components.insert(name.to_string(), health);
    }

    /// Derive every component's health from a finished tick and mark ready
    pub async fn record_tick(&self, summary: &TickSummary) {
        let registry = match &summary.registry_error {
            Some(e) => ComponentHealth::unhealthy(format!("Sensor listing failed: {}", e)),
            None => ComponentHealth::healthy(),
        };

        let source_failures = summary.count_failed("source_failure");
        let time_series = match (&summary.resolve_error, source_failures) {
            (Some(e), _) => ComponentHealth::degraded(format!("Key resolution failed: {}", e)),
            (None, 0) => ComponentHealth::healthy(),
            (None, n) => ComponentHealth::degraded(format!("{} series queries failed", n)),
        };

        let model_store = match summary.count_failed("persistence_failure") {
            0 => ComponentHealth::healthy(),
            n => ComponentHealth::degraded(format!("{} model reads or writes failed", n)),
        };

        let sink = match summary.delivery_failures() {
            0 => ComponentHealth::healthy(),
            n => ComponentHealth::degraded(format!("{} deliveries failed", n)),
        };

        {
            let mut components = self.components.write().await;
            components.insert(components::REGISTRY.to_string(), registry);
            components.insert(components::TIME_SERIES.to_string(), time_series);
            components.insert(components::MODEL_STORE.to_string(), model_store);
            components.insert(components::SINK.to_string(), sink);
        }

        *self.last_tick_at.write().await = Some(summary.started_at.timestamp());
    }

    /// Get health response
    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        let status = HealthResponse::compute_status(&components);
        HealthResponse { status, components }
    }

    /// Get readiness response
    pub async fn readiness(&self) -> ReadinessResponse {
        let last_tick_at = *self.last_tick_at.read().await;
        let health = self.health().await;

        if last_tick_at.is_none() {
            ReadinessResponse {
                ready: false,
                reason: Some("No tick completed yet".to_string()),
                last_tick_at,
            }
        } else if !health.status.is_operational() {
            ReadinessResponse {
                ready: false,
                reason: Some("Critical component unhealthy".to_string()),
                last_tick_at,
            }
        } else {
            ReadinessResponse {
                ready: true,
                reason: None,
                last_tick_at,
            }
        }
    }
}
