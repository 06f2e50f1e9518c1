//! Collaborator interfaces and manager configuration
//!
//! Everything the manager consumes from the surrounding agent is a trait
//! here: stats, disk topology, the pod population, the kill primitive,
//! garbage collectors, event recording, and the clock. Implementations
//! live with the embedding binary; tests substitute mocks.

use crate::models::Pod;
use crate::signals::Threshold;
use crate::stats::Summary;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Event reason attached to every eviction.
pub const EVICTION_REASON: &str = "Evicted";
/// Condition type stamped on disrupted pods when the feature gate is on.
pub const DISRUPTION_TARGET_CONDITION: &str = "DisruptionTarget";
/// Condition reason identifying the node agent as the disruptor.
pub const TERMINATION_BY_KUBELET_REASON: &str = "TerminationByKubelet";

/// Returns node and pod usage snapshots.
#[async_trait]
pub trait SummaryProvider: Send + Sync {
    async fn get(&self, update_stats: bool) -> Result<Summary>;
}

/// Answers whether images live on a filesystem separate from the rootfs.
#[async_trait]
pub trait DiskInfoProvider: Send + Sync {
    async fn has_dedicated_image_fs(&self) -> Result<bool>;
}

/// Supplies the current set of active pods on the node.
#[async_trait]
pub trait ActivePodsProvider: Send + Sync {
    async fn active_pods(&self) -> Result<Vec<Arc<Pod>>>;
}

/// Answers whether a previously killed pod's resources are fully released.
#[async_trait]
pub trait PodCleanupChecker: Send + Sync {
    async fn pod_cleaned_up(&self, pod: &Pod) -> bool;
}

/// Terminates a pod. Blocks until the pod and its containers are gone.
#[async_trait]
pub trait PodKiller: Send + Sync {
    async fn kill_pod(
        &self,
        pod: &Pod,
        is_evicted: bool,
        grace_period_override: Option<i64>,
        status: PodStatusPatch,
    ) -> Result<()>;
}

/// Looks up the mirror pod reflecting a static pod into cluster state.
pub trait MirrorPodProvider: Send + Sync {
    fn mirror_pod(&self, static_pod: &Pod) -> Option<Arc<Pod>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    Normal,
    Warning,
}

/// Reference to the object an event is recorded against.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: String,
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
}

impl ObjectRef {
    pub fn node(name: impl Into<String>) -> Self {
        ObjectRef {
            kind: "Node".to_string(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn pod(pod: &Pod) -> Self {
        ObjectRef {
            kind: "Pod".to_string(),
            name: pod.name.clone(),
            namespace: pod.namespace.clone(),
            uid: pod.uid.clone(),
        }
    }
}

/// Records cluster events about nodes and pods.
pub trait EventRecorder: Send + Sync {
    fn event(&self, object: &ObjectRef, event_type: EventType, reason: &str, message: &str);

    fn annotated_event(
        &self,
        object: &ObjectRef,
        annotations: &std::collections::HashMap<String, String>,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        let _ = annotations;
        self.event(object, event_type, reason, message);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodCondition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: String,
    pub reason: String,
    pub message: String,
}

/// Status mutation applied by the kill primitive to the dying pod.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodStatusPatch {
    pub phase: PodPhase,
    pub reason: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<PodCondition>,
}

/// Monotonic-enough time source; injectable for tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Process-wide feature switches the manager consults at decision time.
/// Passed in rather than read from a global so the core stays testable.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeatureGates {
    pub pod_disruption_conditions: bool,
}

/// Manager configuration.
#[derive(Clone)]
pub struct Config {
    /// Configured eviction thresholds.
    pub thresholds: Vec<Threshold>,
    /// Hysteresis window during which a condition stays reported after its
    /// last trigger.
    pub pressure_transition_period: Duration,
    /// Grace period granted to victims of soft thresholds.
    pub max_pod_grace_period_seconds: i64,
    /// Root of the pod cgroup hierarchy, for notifier plumbing.
    pub pod_cgroup_root: String,
    /// Enable kernel memcg notification for memory thresholds.
    pub kernel_memcg_notification: bool,
    /// Enable per-pod ephemeral/emptyDir limit enforcement.
    pub local_storage_capacity_isolation: bool,
    pub feature_gates: FeatureGates,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            thresholds: Vec::new(),
            pressure_transition_period: Duration::from_secs(5 * 60),
            max_pod_grace_period_seconds: 0,
            pod_cgroup_root: String::new(),
            kernel_memcg_notification: false,
            local_storage_capacity_isolation: false,
            feature_gates: FeatureGates::default(),
        }
    }
}

/// Admission request: the pod asking to start on this node.
#[derive(Debug, Clone)]
pub struct AdmitAttributes {
    pub pod: Arc<Pod>,
}

/// Admission verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmitResult {
    pub admit: bool,
    pub reason: Option<String>,
    pub message: Option<String>,
}

impl AdmitResult {
    pub fn admitted() -> Self {
        AdmitResult {
            admit: true,
            reason: None,
            message: None,
        }
    }

    pub fn rejected(reason: impl Into<String>, message: impl Into<String>) -> Self {
        AdmitResult {
            admit: false,
            reason: Some(reason.into()),
            message: Some(message.into()),
        }
    }
}
