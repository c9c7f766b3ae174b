//! Provisioning library for the node-local QoS advisor
//!
//! This crate provides the core functionality for:
//! - Feedback control of a region's CPU knob from performance indicators
//! - Region and container state kept across control cycles
//! - Indicator readings with staleness tracking
//! - The periodic control loop
//! - Health checks and observability

pub mod config;
pub mod control_loop;
pub mod error;
pub mod health;
pub mod indicator;
pub mod models;
pub mod observability;
pub mod provision;
pub mod registry;

pub use config::{IndicatorTargetConfig, ProvisionConfig};
pub use control_loop::{ControlLoop, CycleSummary};
pub use error::{ProvisionError, ProvisionResult};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use indicator::{IndicatorSource, IndicatorStore};
pub use models::*;
pub use observability::{AdvisorMetrics, StructuredLogger};
pub use provision::{CycleReport, PolicyRama, ProvisionPolicy};
pub use registry::{MetaCache, RegionRegistry};
