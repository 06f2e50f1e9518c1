//! Node-local eviction manager library
//!
//! This crate provides the core functionality for:
//! - Pressure detection over memory, disk, inode, and pid signals
//! - Threshold evaluation with grace periods and min-reclaim goals
//! - Victim ranking by QoS, priority, and usage above request
//! - Node-level reclaim via image and container garbage collection
//! - Per-pod local storage limit enforcement
//! - Admission gating while pressure is active

pub mod allocation;
pub mod health;
pub mod manager;
pub mod models;
pub mod notifier;
pub mod observability;
pub mod observations;
pub mod quantity;
pub mod ranking;
pub mod reclaim;
pub mod signals;
pub mod stats;
pub mod thresholds;
pub mod types;

pub use health::{HealthTracker, Probe, ProbeStatus};
pub use manager::{AdmissionGate, EvictionManager, EvictionManagerBuilder};
pub use observability::EvictionMetrics;
pub use quantity::Quantity;
pub use signals::{parse_threshold_config, NodeConditionType, Signal, Threshold};
pub use types::{AdmitAttributes, AdmitResult, Config, FeatureGates};
