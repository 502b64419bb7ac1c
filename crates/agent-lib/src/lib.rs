//! Detection core for the protect agent
//!
//! This crate provides the core functionality for:
//! - Loading declarative detection strategies
//! - Evaluating typed checks against container snapshots
//! - Persisting per-container flag history
//! - Alerting and suspending through the game panel
//! - Health checks and observability

pub mod check;
pub mod dispatch;
pub mod error;
pub mod evaluator;
pub mod health;
pub mod ledger;
pub mod models;
pub mod observability;
pub mod scan;
pub mod snapshot;
pub mod strategy;

pub use health::{ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse};
pub use models::*;
pub use observability::{ProtectMetrics, StructuredLogger};
