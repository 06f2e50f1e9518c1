//! Eviction ranking
//!
//! Per-signal comparators over the active pod set. Every comparator
//! orders toward "evict first": BestEffort before Burstable before
//! Guaranteed, lower priority before higher, then greater usage above
//! request on the pressured resource.

use crate::allocation::calculate_pod_resource_request;
use crate::models::{Pod, ResourceName};
use crate::observations::StatsFunc;
use crate::quantity::Quantity;
use crate::signals::Signal;
use crate::stats::{ContainerStats, PodStats};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

/// Sorts the pod slice in eviction order for one signal.
pub type RankFunc = Box<dyn Fn(&mut [Arc<Pod>], &StatsFunc) + Send + Sync>;

/// Which filesystem stats count toward a pod's disk usage for a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsStatsType {
    Root,
    Logs,
    LocalVolumeSources,
}

/// Which unit a disk signal ranks by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DiskUnit {
    Bytes,
    Inodes,
}

/// Names of volumes whose usage lands on the node's local disk. Memory-
/// backed emptyDirs are accounted as RAM, not disk.
pub fn local_ephemeral_volume_names(pod: &Pod) -> Vec<&str> {
    pod.volumes
        .iter()
        .filter(|v| {
            v.empty_dir
                .as_ref()
                .is_some_and(|e| e.medium == crate::models::StorageMedium::Default)
        })
        .map(|v| v.name.as_str())
        .collect()
}

/// A single container's disk usage: logs plus, when the signal measures
/// the root filesystem, the container's writable layer.
pub fn container_disk_usage(stats: &ContainerStats, include_rootfs: bool) -> Quantity {
    let mut used = stats
        .logs
        .as_ref()
        .and_then(|fs| fs.used_bytes)
        .unwrap_or(0);
    if include_rootfs {
        used += stats
            .rootfs
            .as_ref()
            .and_then(|fs| fs.used_bytes)
            .unwrap_or(0);
    }
    Quantity::from_value(used as i64)
}

/// Aggregate pod disk usage over the selected stat groups.
pub fn pod_disk_usage(stats: &PodStats, pod: &Pod, fs_stats: &[FsStatsType]) -> Quantity {
    disk_usage(stats, pod, fs_stats, DiskUnit::Bytes)
}

fn disk_usage(stats: &PodStats, pod: &Pod, fs_stats: &[FsStatsType], unit: DiskUnit) -> Quantity {
    let read = |fs: &Option<crate::stats::FsStats>| -> u64 {
        fs.as_ref()
            .and_then(|fs| match unit {
                DiskUnit::Bytes => fs.used_bytes,
                DiskUnit::Inodes => fs.inodes_used,
            })
            .unwrap_or(0)
    };

    let mut total: u64 = 0;
    for container in &stats.containers {
        if fs_stats.contains(&FsStatsType::Root) {
            total += read(&container.rootfs);
        }
        if fs_stats.contains(&FsStatsType::Logs) {
            total += read(&container.logs);
        }
    }
    if fs_stats.contains(&FsStatsType::LocalVolumeSources) {
        let local_volumes = local_ephemeral_volume_names(pod);
        for volume in &stats.volume_stats {
            if local_volumes.contains(&volume.name.as_str()) {
                total += match unit {
                    DiskUnit::Bytes => volume.fs.used_bytes.unwrap_or(0),
                    DiskUnit::Inodes => volume.fs.inodes_used.unwrap_or(0),
                };
            }
        }
    }
    Quantity::from_value(total as i64)
}

fn memory_working_set(stats: Option<&PodStats>) -> Quantity {
    let bytes = stats
        .and_then(|s| s.memory.as_ref())
        .and_then(|m| m.working_set_bytes)
        .unwrap_or(0);
    Quantity::from_value(bytes as i64)
}

fn process_count(stats: Option<&PodStats>) -> Quantity {
    let count = stats
        .and_then(|s| s.process_stats.as_ref())
        .and_then(|p| p.process_count)
        .unwrap_or(0);
    Quantity::from_value(count as i64)
}

fn cmp_qos(a: &Pod, b: &Pod) -> Ordering {
    a.qos_class().cmp(&b.qos_class())
}

fn cmp_priority(a: &Pod, b: &Pod) -> Ordering {
    a.priority.unwrap_or(0).cmp(&b.priority.unwrap_or(0))
}

/// Greater usage above request sorts first.
fn cmp_excess(a_excess: Quantity, b_excess: Quantity) -> Ordering {
    b_excess.cmp(&a_excess)
}

fn rank<F>(pods: &mut [Arc<Pod>], stats: &StatsFunc, excess: F)
where
    F: Fn(&Pod, Option<&PodStats>) -> Quantity,
{
    // Compute each pod's excess once; the comparator itself stays cheap.
    let excesses: HashMap<String, Quantity> = pods
        .iter()
        .map(|pod| {
            let pod_stats = stats(pod);
            (pod.uid.clone(), excess(pod, pod_stats.as_deref()))
        })
        .collect();

    pods.sort_by(|a, b| {
        cmp_qos(a, b)
            .then_with(|| cmp_priority(a, b))
            .then_with(|| {
                cmp_excess(
                    excesses.get(&a.uid).copied().unwrap_or_default(),
                    excesses.get(&b.uid).copied().unwrap_or_default(),
                )
            })
    });
}

fn memory_excess(pod: &Pod, stats: Option<&PodStats>) -> Quantity {
    let request = Quantity::from_value(calculate_pod_resource_request(
        pod,
        &ResourceName::Memory,
        true,
    ));
    memory_working_set(stats) - request
}

fn make_memory_rank() -> RankFunc {
    Box::new(|pods, stats| rank(pods, stats, memory_excess))
}

fn make_disk_rank(fs_stats: Vec<FsStatsType>, unit: DiskUnit) -> RankFunc {
    Box::new(move |pods, stats| {
        rank(pods, stats, |pod, pod_stats| {
            let usage = pod_stats
                .map(|s| disk_usage(s, pod, &fs_stats, unit))
                .unwrap_or_default();
            let request = match unit {
                DiskUnit::Bytes => Quantity::from_value(calculate_pod_resource_request(
                    pod,
                    &ResourceName::EphemeralStorage,
                    true,
                )),
                // Inodes cannot be requested; usage alone ranks.
                DiskUnit::Inodes => Quantity::zero(),
            };
            usage - request
        })
    })
}

fn make_process_rank() -> RankFunc {
    Box::new(|pods, stats| {
        rank(pods, stats, |pod, pod_stats| {
            let request = Quantity::from_value(calculate_pod_resource_request(
                pod,
                &ResourceName::Pids,
                true,
            ));
            process_count(pod_stats) - request
        })
    })
}

/// Per-signal rank functions, shaped by whether images live on their own
/// filesystem.
pub fn build_signal_to_rank_func(has_dedicated_image_fs: bool) -> HashMap<Signal, RankFunc> {
    let mut funcs: HashMap<Signal, RankFunc> = HashMap::new();
    funcs.insert(Signal::MemoryAvailable, make_memory_rank());
    funcs.insert(Signal::AllocatableMemoryAvailable, make_memory_rank());
    funcs.insert(Signal::PidAvailable, make_process_rank());

    if has_dedicated_image_fs {
        funcs.insert(
            Signal::NodeFsAvailable,
            make_disk_rank(
                vec![FsStatsType::Logs, FsStatsType::LocalVolumeSources],
                DiskUnit::Bytes,
            ),
        );
        funcs.insert(
            Signal::NodeFsInodesFree,
            make_disk_rank(
                vec![FsStatsType::Logs, FsStatsType::LocalVolumeSources],
                DiskUnit::Inodes,
            ),
        );
        funcs.insert(
            Signal::ImageFsAvailable,
            make_disk_rank(vec![FsStatsType::Root], DiskUnit::Bytes),
        );
        funcs.insert(
            Signal::ImageFsInodesFree,
            make_disk_rank(vec![FsStatsType::Root], DiskUnit::Inodes),
        );
    } else {
        let everything = vec![
            FsStatsType::Root,
            FsStatsType::Logs,
            FsStatsType::LocalVolumeSources,
        ];
        funcs.insert(
            Signal::NodeFsAvailable,
            make_disk_rank(everything.clone(), DiskUnit::Bytes),
        );
        funcs.insert(
            Signal::NodeFsInodesFree,
            make_disk_rank(everything.clone(), DiskUnit::Inodes),
        );
        funcs.insert(
            Signal::ImageFsAvailable,
            make_disk_rank(everything.clone(), DiskUnit::Bytes),
        );
        funcs.insert(
            Signal::ImageFsInodesFree,
            make_disk_rank(everything, DiskUnit::Inodes),
        );
    }

    funcs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Container, ResourceList};
    use crate::stats::{FsStats, MemoryStats, PodReference, ProcessStats, VolumeStats};

    fn resources(pairs: &[(&str, &str)]) -> ResourceList {
        pairs
            .iter()
            .map(|(k, v)| (k.parse().unwrap(), v.parse().unwrap()))
            .collect()
    }

    fn pod(name: &str, requests: &[(&str, &str)], limits: &[(&str, &str)]) -> Arc<Pod> {
        Arc::new(Pod {
            name: name.to_string(),
            namespace: "default".to_string(),
            uid: name.to_string(),
            containers: vec![Container {
                name: "app".to_string(),
                requests: resources(requests),
                limits: resources(limits),
            }],
            ..Default::default()
        })
    }

    fn stats_with_memory(pods: &[(&str, u64)]) -> StatsFunc {
        let by_uid: HashMap<String, Arc<PodStats>> = pods
            .iter()
            .map(|(uid, working_set)| {
                (
                    uid.to_string(),
                    Arc::new(PodStats {
                        pod_ref: PodReference {
                            name: uid.to_string(),
                            namespace: "default".to_string(),
                            uid: uid.to_string(),
                        },
                        memory: Some(MemoryStats {
                            working_set_bytes: Some(*working_set),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                )
            })
            .collect();
        Arc::new(move |pod: &Pod| by_uid.get(&pod.uid).cloned())
    }

    #[test]
    fn test_memory_rank_orders_qos_then_excess() {
        let guaranteed = pod(
            "guaranteed",
            &[("cpu", "100m"), ("memory", "100Mi")],
            &[("cpu", "100m"), ("memory", "100Mi")],
        );
        let best_effort_small = pod("be-small", &[], &[]);
        let best_effort_large = pod("be-large", &[], &[]);
        let stats = stats_with_memory(&[
            ("guaranteed", 500 << 20),
            ("be-small", 10 << 20),
            ("be-large", 200 << 20),
        ]);

        let rank = make_memory_rank();
        let mut pods = vec![guaranteed, best_effort_small, best_effort_large];
        rank(&mut pods, &stats);

        let order: Vec<&str> = pods.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(order, vec!["be-large", "be-small", "guaranteed"]);
    }

    #[test]
    fn test_memory_rank_breaks_ties_by_priority() {
        let mut low = Pod {
            name: "low".to_string(),
            uid: "low".to_string(),
            priority: Some(10),
            ..Default::default()
        };
        let mut high = Pod {
            name: "high".to_string(),
            uid: "high".to_string(),
            priority: Some(1000),
            ..Default::default()
        };
        // Identical QoS (BestEffort) and identical usage.
        low.namespace = "default".to_string();
        high.namespace = "default".to_string();
        let stats = stats_with_memory(&[("low", 50 << 20), ("high", 50 << 20)]);

        let rank = make_memory_rank();
        let mut pods = vec![Arc::new(high), Arc::new(low)];
        rank(&mut pods, &stats);
        assert_eq!(pods[0].name, "low");
    }

    #[test]
    fn test_usage_above_request_outranks_raw_usage() {
        // Burstable pod 60Mi over its request vs one 10Mi over.
        let over = pod("over", &[("memory", "40Mi")], &[]);
        let under = pod("under", &[("memory", "90Mi")], &[]);
        let stats = stats_with_memory(&[("over", 100 << 20), ("under", 100 << 20)]);

        let rank = make_memory_rank();
        let mut pods = vec![under, over];
        rank(&mut pods, &stats);
        assert_eq!(pods[0].name, "over");
    }

    #[test]
    fn test_disk_usage_accounting() {
        let pod = Pod {
            name: "disk".to_string(),
            uid: "disk".to_string(),
            volumes: vec![
                crate::models::Volume {
                    name: "scratch".to_string(),
                    empty_dir: Some(Default::default()),
                },
                crate::models::Volume {
                    name: "ram".to_string(),
                    empty_dir: Some(crate::models::EmptyDirVolumeSource {
                        medium: crate::models::StorageMedium::Memory,
                        size_limit: None,
                    }),
                },
            ],
            ..Default::default()
        };
        let stats = PodStats {
            pod_ref: PodReference {
                uid: "disk".to_string(),
                ..Default::default()
            },
            containers: vec![ContainerStats {
                name: "app".to_string(),
                rootfs: Some(FsStats {
                    used_bytes: Some(100),
                    inodes_used: Some(7),
                    ..Default::default()
                }),
                logs: Some(FsStats {
                    used_bytes: Some(10),
                    inodes_used: Some(1),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            volume_stats: vec![
                VolumeStats {
                    name: "scratch".to_string(),
                    fs: FsStats {
                        used_bytes: Some(1000),
                        inodes_used: Some(3),
                        ..Default::default()
                    },
                },
                VolumeStats {
                    name: "ram".to_string(),
                    fs: FsStats {
                        used_bytes: Some(5000),
                        ..Default::default()
                    },
                },
            ],
            ..Default::default()
        };

        // Memory-backed emptyDir usage never counts toward disk.
        let all = pod_disk_usage(
            &stats,
            &pod,
            &[
                FsStatsType::Root,
                FsStatsType::Logs,
                FsStatsType::LocalVolumeSources,
            ],
        );
        assert_eq!(all.value(), 1110);

        let logs_and_volumes =
            pod_disk_usage(&stats, &pod, &[FsStatsType::Logs, FsStatsType::LocalVolumeSources]);
        assert_eq!(logs_and_volumes.value(), 1010);

        let inodes = disk_usage(
            &stats,
            &pod,
            &[FsStatsType::Root, FsStatsType::Logs, FsStatsType::LocalVolumeSources],
            DiskUnit::Inodes,
        );
        assert_eq!(inodes.value(), 11);
    }

    #[test]
    fn test_process_rank_uses_count_above_request() {
        let many = pod("many", &[], &[]);
        let few = pod("few", &[], &[]);
        let by_uid: HashMap<String, Arc<PodStats>> = [("many", 500u64), ("few", 3u64)]
            .iter()
            .map(|(uid, count)| {
                (
                    uid.to_string(),
                    Arc::new(PodStats {
                        pod_ref: PodReference {
                            uid: uid.to_string(),
                            ..Default::default()
                        },
                        process_stats: Some(ProcessStats {
                            process_count: Some(*count),
                        }),
                        ..Default::default()
                    }),
                )
            })
            .collect();
        let stats: StatsFunc = Arc::new(move |pod: &Pod| by_uid.get(&pod.uid).cloned());

        let rank = make_process_rank();
        let mut pods = vec![few, many];
        rank(&mut pods, &stats);
        assert_eq!(pods[0].name, "many");
    }

    #[test]
    fn test_rank_func_table_shape() {
        let dedicated = build_signal_to_rank_func(true);
        assert_eq!(dedicated.len(), 7);
        let shared = build_signal_to_rank_func(false);
        assert_eq!(shared.len(), 7);
    }
}
