//! Agent configuration

use anyhow::{Context, Result};
use eviction_lib::signals::{parse_duration, parse_threshold_config};
use eviction_lib::types::FeatureGates;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

/// Agent configuration, layered from an optional config file and
/// `AGENT_`-prefixed environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Node name from Kubernetes downward API
    #[serde(default = "default_node_name")]
    pub node_name: String,

    /// API server port for health/metrics/pressure endpoints
    #[serde(default = "default_api_port")]
    pub api_port: u16,

    /// Kubelet summary/pods endpoint
    #[serde(default = "default_kubelet_endpoint")]
    pub kubelet_endpoint: String,

    /// Kubernetes API server endpoint used to evict pods
    #[serde(default = "default_api_server_endpoint")]
    pub api_server_endpoint: String,

    /// Service account token file for API server calls
    #[serde(default = "default_token_path")]
    pub token_path: String,

    /// Accept self-signed certificates from the kubelet/API server
    #[serde(default)]
    pub insecure_tls: bool,

    /// Pressure monitoring interval in seconds
    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval_secs: u64,

    /// Condition hysteresis window, e.g. "5m"
    #[serde(default = "default_pressure_transition_period")]
    pub pressure_transition_period: String,

    /// Grace period clamp for soft-threshold evictions
    #[serde(default)]
    pub max_pod_grace_period_seconds: i64,

    /// Root of the pod cgroup hierarchy
    #[serde(default = "default_pod_cgroup_root")]
    pub pod_cgroup_root: String,

    /// Enable kernel memcg notification for memory thresholds
    #[serde(default)]
    pub kernel_memcg_notification: bool,

    /// Enforce per-pod ephemeral storage and emptyDir limits
    #[serde(default = "default_true")]
    pub local_storage_capacity_isolation: bool,

    /// Stamp a DisruptionTarget condition on evicted pods
    #[serde(default)]
    pub pod_disruption_conditions: bool,

    /// Hard eviction thresholds, e.g. "memory.available" -> "100Mi"
    #[serde(default = "default_eviction_hard")]
    pub eviction_hard: BTreeMap<String, String>,

    /// Soft eviction thresholds
    #[serde(default)]
    pub eviction_soft: BTreeMap<String, String>,

    /// Grace periods for soft thresholds, e.g. "1m30s"
    #[serde(default)]
    pub eviction_soft_grace_period: BTreeMap<String, String>,

    /// Minimum reclaim amounts per signal
    #[serde(default)]
    pub eviction_minimum_reclaim: BTreeMap<String, String>,

    /// Node allocatable enforcement keys; "pods" mirrors memory thresholds
    /// onto the allocatable cgroup
    #[serde(default = "default_enforce_node_allocatable")]
    pub enforce_node_allocatable: Vec<String>,

    /// CRI command-line client used for node-level garbage collection
    #[serde(default = "default_crictl_path")]
    pub crictl_path: String,
}

fn default_node_name() -> String {
    std::env::var("NODE_NAME").unwrap_or_else(|_| "unknown".to_string())
}

fn default_api_port() -> u16 {
    8080
}

fn default_kubelet_endpoint() -> String {
    "http://127.0.0.1:10255".to_string()
}

fn default_api_server_endpoint() -> String {
    "https://kubernetes.default.svc".to_string()
}

fn default_token_path() -> String {
    "/var/run/secrets/kubernetes.io/serviceaccount/token".to_string()
}

fn default_monitoring_interval() -> u64 {
    10
}

fn default_pressure_transition_period() -> String {
    "5m".to_string()
}

fn default_pod_cgroup_root() -> String {
    "/kubepods".to_string()
}

fn default_true() -> bool {
    true
}

fn default_eviction_hard() -> BTreeMap<String, String> {
    [
        ("memory.available", "100Mi"),
        ("nodefs.available", "10%"),
        ("nodefs.inodesFree", "5%"),
        ("imagefs.available", "15%"),
    ]
    .iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn default_enforce_node_allocatable() -> Vec<String> {
    vec!["pods".to_string()]
}

fn default_crictl_path() -> String {
    "crictl".to_string()
}

impl AgentConfig {
    /// Load configuration from environment and config file
    pub fn load() -> Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("/etc/eviction-agent/config").required(false))
            .add_source(config::Environment::with_prefix("AGENT"))
            .build()?;

        Ok(config.try_deserialize().unwrap_or_else(|_| Self::defaults()))
    }

    pub fn defaults() -> Self {
        AgentConfig {
            node_name: default_node_name(),
            api_port: default_api_port(),
            kubelet_endpoint: default_kubelet_endpoint(),
            api_server_endpoint: default_api_server_endpoint(),
            token_path: default_token_path(),
            insecure_tls: false,
            monitoring_interval_secs: default_monitoring_interval(),
            pressure_transition_period: default_pressure_transition_period(),
            max_pod_grace_period_seconds: 0,
            pod_cgroup_root: default_pod_cgroup_root(),
            kernel_memcg_notification: false,
            local_storage_capacity_isolation: true,
            pod_disruption_conditions: false,
            eviction_hard: default_eviction_hard(),
            eviction_soft: BTreeMap::new(),
            eviction_soft_grace_period: BTreeMap::new(),
            eviction_minimum_reclaim: BTreeMap::new(),
            enforce_node_allocatable: default_enforce_node_allocatable(),
            crictl_path: default_crictl_path(),
        }
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring_interval_secs)
    }

    /// Translate into the eviction manager's configuration.
    pub fn manager_config(&self) -> Result<eviction_lib::Config> {
        let thresholds = parse_threshold_config(
            &self.enforce_node_allocatable,
            &self.eviction_hard,
            &self.eviction_soft,
            &self.eviction_soft_grace_period,
            &self.eviction_minimum_reclaim,
        )
        .context("invalid eviction threshold configuration")?;

        let pressure_transition_period = parse_duration(&self.pressure_transition_period)
            .context("invalid pressure transition period")?;

        Ok(eviction_lib::Config {
            thresholds,
            pressure_transition_period,
            max_pod_grace_period_seconds: self.max_pod_grace_period_seconds,
            pod_cgroup_root: self.pod_cgroup_root.clone(),
            kernel_memcg_notification: self.kernel_memcg_notification,
            local_storage_capacity_isolation: self.local_storage_capacity_isolation,
            feature_gates: FeatureGates {
                pod_disruption_conditions: self.pod_disruption_conditions,
            },
        })
    }
}
