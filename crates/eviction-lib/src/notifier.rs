//! Kernel memory threshold notifiers
//!
//! Edge-triggered wakeups for memory thresholds: a kernel-side cgroup
//! notifier fires when usage crosses a computed trigger level, and the
//! crossing is funneled into the manager's synchronize entry point. The
//! trigger level is recomputed from fresh capacity on every refresh.

use crate::signals::{Signal, Threshold};
use crate::stats::{Summary, SYSTEM_CONTAINER_PODS};
use anyhow::{bail, Context, Result};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::debug;

/// Cgroup attribute watched for memory threshold crossings.
pub const MEMORY_USAGE_ATTRIBUTE: &str = "memory.usage_in_bytes";

const MEMORY_CGROUP_BASE: &str = "/sys/fs/cgroup/memory";

/// Kernel-side notifier bound to one cgroup attribute and trigger level.
pub trait CgroupNotifier: Send + Sync {
    /// Begin delivering one unit per crossing into `events`.
    fn start(&self, events: mpsc::Sender<()>);
    fn stop(&self);
}

/// Creates kernel-side notifiers; injected so tests need no kernel.
pub trait CgroupNotifierFactory: Send + Sync {
    fn new_cgroup_notifier(
        &self,
        path: &str,
        attribute: &str,
        threshold: i64,
    ) -> Result<Arc<dyn CgroupNotifier>>;
}

/// A notifier for one eviction threshold, refreshed as capacity changes.
pub trait ThresholdNotifier: Send + Sync {
    /// Recompute the kernel trigger level from a fresh snapshot and rewire
    /// the kernel-side notifier.
    fn update_threshold(&self, summary: &Summary) -> Result<()>;

    fn description(&self) -> String;
}

pub struct MemoryThresholdNotifier {
    threshold: Threshold,
    cgroup_path: String,
    factory: Arc<dyn CgroupNotifierFactory>,
    events_tx: mpsc::Sender<()>,
    notifier: Mutex<Option<Arc<dyn CgroupNotifier>>>,
}

impl MemoryThresholdNotifier {
    /// Build a notifier for a memory threshold. The returned receiver
    /// yields one unit per kernel-side crossing.
    pub fn new(
        threshold: Threshold,
        pod_cgroup_root: &str,
        factory: Arc<dyn CgroupNotifierFactory>,
    ) -> Result<(Self, mpsc::Receiver<()>)> {
        if !threshold.signal.is_memory() {
            bail!(
                "memory threshold notifier requires a memory signal, got {}",
                threshold.signal
            );
        }
        let cgroup_path = if threshold.signal == Signal::AllocatableMemoryAvailable {
            format!(
                "{MEMORY_CGROUP_BASE}/{}",
                pod_cgroup_root.trim_start_matches('/')
            )
        } else {
            MEMORY_CGROUP_BASE.to_string()
        };

        let (events_tx, events_rx) = mpsc::channel(1);
        Ok((
            MemoryThresholdNotifier {
                threshold,
                cgroup_path,
                factory,
                events_tx,
                notifier: Mutex::new(None),
            },
            events_rx,
        ))
    }
}

impl ThresholdNotifier for MemoryThresholdNotifier {
    fn update_threshold(&self, summary: &Summary) -> Result<()> {
        let memory = if self.threshold.signal == Signal::AllocatableMemoryAvailable {
            summary
                .node
                .system_container(SYSTEM_CONTAINER_PODS)
                .and_then(|c| c.memory.as_ref())
        } else {
            summary.node.memory.as_ref()
        }
        .context("snapshot carries no memory stats")?;

        let available = memory
            .available_bytes
            .context("snapshot carries no available memory")? as i64;
        let working_set = memory
            .working_set_bytes
            .context("snapshot carries no working set")? as i64;
        let usage = memory.usage_bytes.unwrap_or(working_set as u64) as i64;

        let capacity = available + working_set;
        let eviction_threshold = self
            .threshold
            .value
            .quantity(Some(crate::quantity::Quantity::from_value(capacity)))
            .context("threshold value cannot be resolved against capacity")?
            .value();
        // Inactive file pages are reclaimable and do not count against the
        // working set, so the kernel trigger sits above them.
        let inactive_file = usage.saturating_sub(working_set);
        let memcg_threshold = capacity - eviction_threshold + inactive_file;

        let new_notifier = self.factory.new_cgroup_notifier(
            &self.cgroup_path,
            MEMORY_USAGE_ATTRIBUTE,
            memcg_threshold,
        )?;
        new_notifier.start(self.events_tx.clone());

        let mut slot = self.notifier.lock().unwrap();
        if let Some(old) = slot.replace(new_notifier) {
            old.stop();
        }
        debug!(
            signal = %self.threshold.signal,
            cgroup = %self.cgroup_path,
            trigger = memcg_threshold,
            "Rewired memory threshold notifier"
        );
        Ok(())
    }

    fn description(&self) -> String {
        format!("{} memory threshold notifier", self.threshold.signal)
    }
}
