//! Per-sensor incremental forecasting engine
//!
//! This crate provides the core functionality for:
//! - Online training of one regression pipeline per sensor, gated on MAE
//! - Autoregressive hourly forecasts
//! - Durable model artifacts with checksums
//! - Registry, time-series and sink clients
//! - Health checks and observability

pub mod api;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod remote;
pub mod storage;

pub use error::{EngineError, EngineResult, RegressorError};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ForecastMetrics, StructuredLogger};
