//! Workload model for eviction decisions
//!
//! A trimmed-down pod representation carrying exactly what pressure
//! ranking, local-storage enforcement, and admission need: identity,
//! annotations, priority, per-container resource requirements, volumes,
//! and tolerations.

use crate::quantity::Quantity;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Annotation marking the config source of a pod; file-sourced pods are static.
pub const CONFIG_SOURCE_ANNOTATION: &str = "kubernetes.io/config.source";
/// Annotation present on mirror pods.
pub const CONFIG_MIRROR_ANNOTATION: &str = "kubernetes.io/config.mirror";
/// Config source value identifying a static pod.
pub const CONFIG_SOURCE_FILE: &str = "file";

/// Priority at or above which a pod is system-critical.
pub const SYSTEM_CRITICAL_PRIORITY: i32 = 2_000_000_000;

/// Taint applied to nodes under memory pressure.
pub const TAINT_NODE_MEMORY_PRESSURE: &str = "node.kubernetes.io/memory-pressure";

/// A resource dimension named in requests, limits, or overhead.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceName {
    Cpu,
    Memory,
    EphemeralStorage,
    Pids,
    Inodes,
    /// Extended (scalar) resources, e.g. `nvidia.com/gpu`.
    Named(String),
}

impl ResourceName {
    pub fn as_str(&self) -> &str {
        match self {
            ResourceName::Cpu => "cpu",
            ResourceName::Memory => "memory",
            ResourceName::EphemeralStorage => "ephemeral-storage",
            ResourceName::Pids => "pids",
            ResourceName::Inodes => "inodes",
            ResourceName::Named(name) => name,
        }
    }

    /// Extended resources are scalar: scoring skips them when unrequested.
    pub fn is_scalar(&self) -> bool {
        matches!(self, ResourceName::Named(_))
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceName {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "cpu" => ResourceName::Cpu,
            "memory" => ResourceName::Memory,
            "ephemeral-storage" => ResourceName::EphemeralStorage,
            "pids" => ResourceName::Pids,
            "inodes" => ResourceName::Inodes,
            other => ResourceName::Named(other.to_string()),
        })
    }
}

impl Serialize for ResourceName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ResourceName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// Resource name to quantity map, as used for requests, limits, and overhead.
pub type ResourceList = BTreeMap<ResourceName, Quantity>;

/// A single container's declared resources.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Container {
    pub name: String,
    #[serde(default)]
    pub requests: ResourceList,
    #[serde(default)]
    pub limits: ResourceList,
}

/// Backing medium for an emptyDir volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StorageMedium {
    #[default]
    #[serde(rename = "")]
    Default,
    Memory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmptyDirVolumeSource {
    #[serde(default)]
    pub medium: StorageMedium,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_limit: Option<Quantity>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirVolumeSource>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaintEffect {
    NoSchedule,
    PreferNoSchedule,
    NoExecute,
}

#[derive(Debug, Clone)]
pub struct Taint {
    pub key: String,
    pub value: String,
    pub effect: TaintEffect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TolerationOperator {
    Exists,
    #[default]
    Equal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Toleration {
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub operator: TolerationOperator,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub effect: Option<TaintEffect>,
}

impl Toleration {
    /// Whether this toleration matches the given taint.
    pub fn tolerates(&self, taint: &Taint) -> bool {
        if let Some(effect) = self.effect {
            if effect != taint.effect {
                return false;
            }
        }
        match &self.key {
            // An empty key with operator Exists tolerates everything.
            None => self.operator == TolerationOperator::Exists,
            Some(key) => {
                if key != &taint.key {
                    return false;
                }
                match self.operator {
                    TolerationOperator::Exists => true,
                    TolerationOperator::Equal => {
                        self.value.as_deref().unwrap_or("") == taint.value
                    }
                }
            }
        }
    }
}

/// Quality-of-service class, derived from CPU/memory requests and limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QosClass {
    /// No CPU/memory requests or limits anywhere. Evicted first.
    BestEffort,
    /// Some requests or limits, but not fully guaranteed.
    Burstable,
    /// CPU and memory requests equal limits for every container.
    Guaranteed,
}

/// The workload unit subject to eviction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Pod {
    pub name: String,
    pub namespace: String,
    pub uid: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub containers: Vec<Container>,
    #[serde(default)]
    pub init_containers: Vec<Container>,
    /// Fixed per-pod runtime sandbox cost, added onto aggregate requests.
    #[serde(default)]
    pub overhead: ResourceList,
    #[serde(default)]
    pub volumes: Vec<Volume>,
    #[serde(default)]
    pub tolerations: Vec<Toleration>,
}

impl Pod {
    /// Pods whose spec came from a file source rather than the API.
    pub fn is_static(&self) -> bool {
        self.annotations
            .get(CONFIG_SOURCE_ANNOTATION)
            .is_some_and(|source| source == CONFIG_SOURCE_FILE)
    }

    /// Mirror pods reflect a static pod into cluster state.
    pub fn is_mirror(&self) -> bool {
        self.annotations.contains_key(CONFIG_MIRROR_ANNOTATION)
    }

    /// Critical pods are never evicted: static, mirror, or system-priority.
    pub fn is_critical(&self) -> bool {
        if self.is_static() || self.is_mirror() {
            return true;
        }
        self.priority
            .is_some_and(|priority| priority >= SYSTEM_CRITICAL_PRIORITY)
    }

    /// Derive the QoS class from container CPU/memory requests and limits.
    pub fn qos_class(&self) -> QosClass {
        let mut has_requests = false;
        let mut has_limits = false;
        let mut guaranteed = true;

        for container in self.containers.iter().chain(&self.init_containers) {
            for resource in [ResourceName::Cpu, ResourceName::Memory] {
                let request = container.requests.get(&resource);
                let limit = container.limits.get(&resource);
                if request.is_some() {
                    has_requests = true;
                }
                if limit.is_some() {
                    has_limits = true;
                }
                match (request, limit) {
                    (Some(r), Some(l)) if r == l => {}
                    (None, Some(_)) => {}
                    _ => guaranteed = false,
                }
            }
        }

        if !has_requests && !has_limits {
            QosClass::BestEffort
        } else if guaranteed && has_limits {
            QosClass::Guaranteed
        } else {
            QosClass::Burstable
        }
    }

    /// Whether any toleration on this pod tolerates the taint.
    pub fn tolerates_taint(&self, taint: &Taint) -> bool {
        self.tolerations.iter().any(|t| t.tolerates(taint))
    }

    /// `namespace/name` for log and event output.
    pub fn qualified_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}
