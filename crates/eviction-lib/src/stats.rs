//! Usage snapshot model
//!
//! Node- and pod-level stats as returned by the summary provider. Field
//! names serialize in camelCase so snapshots fetched from a kubelet
//! summary endpoint deserialize without translation. Every leaf is
//! optional; stats sources routinely omit fields they cannot measure.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name of the system container aggregating all user pods.
pub const SYSTEM_CONTAINER_PODS: &str = "pods";

/// Top-level usage snapshot for one sampling round.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub node: NodeStats,
    #[serde(default)]
    pub pods: Vec<PodStats>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStats {
    #[serde(default)]
    pub node_name: String,
    #[serde(default)]
    pub system_containers: Vec<ContainerStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fs: Option<FsStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rlimit: Option<RlimitStats>,
}

impl NodeStats {
    /// Look up a system container aggregate by name.
    pub fn system_container(&self, name: &str) -> Option<&ContainerStats> {
        self.system_containers.iter().find(|c| c.name == name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_set_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FsStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inodes_free: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inodes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inodes_used: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_fs: Option<FsStats>,
}

/// Process-count limits and usage from the node's pid subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RlimitStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maxpid: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub curproc: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodReference {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub uid: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodStats {
    pub pod_ref: PodReference,
    #[serde(default)]
    pub containers: Vec<ContainerStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryStats>,
    #[serde(default)]
    pub volume_stats: Vec<VolumeStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ephemeral_storage: Option<FsStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_stats: Option<ProcessStats>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerStats {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rootfs: Option<FsStats>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<FsStats>,
}

/// Per-volume filesystem stats; fs fields are inlined beside the name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStats {
    pub name: String,
    #[serde(flatten)]
    pub fs: FsStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_count: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_deserializes_camel_case() {
        let raw = r#"{
            "node": {
                "nodeName": "worker-1",
                "systemContainers": [
                    {"name": "pods", "memory": {"availableBytes": 1048576, "workingSetBytes": 524288}}
                ],
                "memory": {"time": "2024-05-01T10:00:00Z", "availableBytes": 2097152, "workingSetBytes": 1048576},
                "fs": {"availableBytes": 100, "capacityBytes": 1000, "inodesFree": 50, "inodes": 100},
                "runtime": {"imageFs": {"availableBytes": 200, "capacityBytes": 2000}},
                "rlimit": {"maxpid": 32768, "curproc": 120}
            },
            "pods": [
                {
                    "podRef": {"name": "web", "namespace": "default", "uid": "u1"},
                    "containers": [{"name": "app", "logs": {"usedBytes": 10}}],
                    "volumeStats": [{"name": "scratch", "usedBytes": 42}]
                }
            ]
        }"#;

        let summary: Summary = serde_json::from_str(raw).unwrap();
        assert_eq!(summary.node.node_name, "worker-1");
        assert_eq!(
            summary
                .node
                .system_container(SYSTEM_CONTAINER_PODS)
                .and_then(|c| c.memory.as_ref())
                .and_then(|m| m.available_bytes),
            Some(1048576)
        );
        assert_eq!(summary.node.rlimit.as_ref().unwrap().maxpid, Some(32768));
        assert_eq!(summary.pods.len(), 1);
        assert_eq!(summary.pods[0].volume_stats[0].fs.used_bytes, Some(42));
    }
}
