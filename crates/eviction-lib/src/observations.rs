//! Observation engine
//!
//! Turns a usage snapshot into per-signal observations, timestamped by the
//! snapshot itself rather than the local clock, plus a lookup from pod to
//! its stats within the same snapshot.

use crate::models::Pod;
use crate::quantity::Quantity;
use crate::signals::Signal;
use crate::stats::{PodStats, Summary, SYSTEM_CONTAINER_PODS};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;

/// One signal's observed state at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct SignalObservation {
    pub available: Quantity,
    /// Absent for signals whose snapshot carries no capacity.
    pub capacity: Option<Quantity>,
    /// Snapshot timestamp; absent when the stats source omits it.
    pub time: Option<DateTime<Utc>>,
}

pub type SignalObservations = HashMap<Signal, SignalObservation>;

/// Pod stats lookup scoped to one snapshot.
pub type StatsFunc = Arc<dyn Fn(&Pod) -> Option<Arc<PodStats>> + Send + Sync>;

/// Derive per-signal observations from a snapshot and return a stats
/// lookup for the pods captured in the same snapshot.
pub fn make_signal_observations(summary: &Summary) -> (SignalObservations, StatsFunc) {
    let mut observations = SignalObservations::new();

    if let Some(memory) = &summary.node.memory {
        if let (Some(available), Some(working_set)) =
            (memory.available_bytes, memory.working_set_bytes)
        {
            observations.insert(
                Signal::MemoryAvailable,
                SignalObservation {
                    available: Quantity::from_value(available as i64),
                    capacity: Some(Quantity::from_value((available + working_set) as i64)),
                    time: memory.time,
                },
            );
        }
    }

    if let Some(allocatable) = summary.node.system_container(SYSTEM_CONTAINER_PODS) {
        if let Some(memory) = &allocatable.memory {
            if let (Some(available), Some(working_set)) =
                (memory.available_bytes, memory.working_set_bytes)
            {
                observations.insert(
                    Signal::AllocatableMemoryAvailable,
                    SignalObservation {
                        available: Quantity::from_value(available as i64),
                        capacity: Some(Quantity::from_value((available + working_set) as i64)),
                        time: memory.time,
                    },
                );
            }
        }
    }

    if let Some(fs) = &summary.node.fs {
        if let (Some(available), Some(capacity)) = (fs.available_bytes, fs.capacity_bytes) {
            observations.insert(
                Signal::NodeFsAvailable,
                SignalObservation {
                    available: Quantity::from_value(available as i64),
                    capacity: Some(Quantity::from_value(capacity as i64)),
                    time: fs.time,
                },
            );
        }
        if let (Some(inodes_free), Some(inodes)) = (fs.inodes_free, fs.inodes) {
            observations.insert(
                Signal::NodeFsInodesFree,
                SignalObservation {
                    available: Quantity::from_value(inodes_free as i64),
                    capacity: Some(Quantity::from_value(inodes as i64)),
                    time: fs.time,
                },
            );
        }
    }

    // Image filesystem entries are simply absent on nodes without one.
    if let Some(image_fs) = summary.node.runtime.as_ref().and_then(|r| r.image_fs.as_ref()) {
        if let (Some(available), Some(capacity)) =
            (image_fs.available_bytes, image_fs.capacity_bytes)
        {
            observations.insert(
                Signal::ImageFsAvailable,
                SignalObservation {
                    available: Quantity::from_value(available as i64),
                    capacity: Some(Quantity::from_value(capacity as i64)),
                    time: image_fs.time,
                },
            );
        }
        if let (Some(inodes_free), Some(inodes)) = (image_fs.inodes_free, image_fs.inodes) {
            observations.insert(
                Signal::ImageFsInodesFree,
                SignalObservation {
                    available: Quantity::from_value(inodes_free as i64),
                    capacity: Some(Quantity::from_value(inodes as i64)),
                    time: image_fs.time,
                },
            );
        }
    }

    if let Some(rlimit) = &summary.node.rlimit {
        if let (Some(maxpid), Some(curproc)) = (rlimit.maxpid, rlimit.curproc) {
            observations.insert(
                Signal::PidAvailable,
                SignalObservation {
                    available: Quantity::from_value(maxpid.saturating_sub(curproc)),
                    capacity: Some(Quantity::from_value(maxpid)),
                    time: rlimit.time,
                },
            );
        }
    }

    let by_uid: HashMap<String, Arc<PodStats>> = summary
        .pods
        .iter()
        .map(|stats| (stats.pod_ref.uid.clone(), Arc::new(stats.clone())))
        .collect();
    let stats_func: StatsFunc = Arc::new(move |pod: &Pod| by_uid.get(&pod.uid).cloned());

    (observations, stats_func)
}
