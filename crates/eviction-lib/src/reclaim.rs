//! Node-level reclaim
//!
//! Before evicting user pods, pressure on image/container filesystems can
//! often be relieved by garbage collection. Each signal maps to an ordered
//! list of reclaim actions; memory and pid pressure have none.

use crate::signals::Signal;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;

/// Deletes unused images from the image store.
#[async_trait]
pub trait ImageGc: Send + Sync {
    async fn delete_unused_images(&self) -> Result<()>;
}

/// Deletes all dead containers from the runtime.
#[async_trait]
pub trait ContainerGc: Send + Sync {
    async fn delete_all_unused_containers(&self) -> Result<()>;
}

/// One node-level reclaim step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReclaimAction {
    CleanupContainers,
    CleanupImages,
}

impl ReclaimAction {
    pub fn describe(&self) -> &'static str {
        match self {
            ReclaimAction::CleanupContainers => "delete unused containers",
            ReclaimAction::CleanupImages => "delete unused images",
        }
    }

    pub async fn run(
        &self,
        image_gc: &dyn ImageGc,
        container_gc: &dyn ContainerGc,
    ) -> Result<()> {
        match self {
            ReclaimAction::CleanupContainers => container_gc.delete_all_unused_containers().await,
            ReclaimAction::CleanupImages => image_gc.delete_unused_images().await,
        }
    }
}

/// Per-signal reclaim action lists, shaped by filesystem topology. Disk
/// signals on the filesystem holding images get the GC pair; everything
/// else reclaims nothing at node level.
pub fn build_signal_to_reclaim_actions(
    has_dedicated_image_fs: bool,
) -> HashMap<Signal, Vec<ReclaimAction>> {
    let gc_pair = vec![ReclaimAction::CleanupContainers, ReclaimAction::CleanupImages];
    let mut actions: HashMap<Signal, Vec<ReclaimAction>> = HashMap::new();

    actions.insert(Signal::MemoryAvailable, Vec::new());
    actions.insert(Signal::AllocatableMemoryAvailable, Vec::new());
    actions.insert(Signal::PidAvailable, Vec::new());

    if has_dedicated_image_fs {
        actions.insert(Signal::NodeFsAvailable, Vec::new());
        actions.insert(Signal::NodeFsInodesFree, Vec::new());
        actions.insert(Signal::ImageFsAvailable, gc_pair.clone());
        actions.insert(Signal::ImageFsInodesFree, gc_pair);
    } else {
        actions.insert(Signal::NodeFsAvailable, gc_pair.clone());
        actions.insert(Signal::NodeFsInodesFree, gc_pair.clone());
        actions.insert(Signal::ImageFsAvailable, gc_pair.clone());
        actions.insert(Signal::ImageFsInodesFree, gc_pair);
    }

    actions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_and_pid_have_no_reclaim() {
        for dedicated in [true, false] {
            let actions = build_signal_to_reclaim_actions(dedicated);
            assert!(actions[&Signal::MemoryAvailable].is_empty());
            assert!(actions[&Signal::AllocatableMemoryAvailable].is_empty());
            assert!(actions[&Signal::PidAvailable].is_empty());
        }
    }

    #[test]
    fn test_gc_pair_follows_image_filesystem() {
        let dedicated = build_signal_to_reclaim_actions(true);
        assert!(dedicated[&Signal::NodeFsAvailable].is_empty());
        assert_eq!(
            dedicated[&Signal::ImageFsAvailable],
            vec![ReclaimAction::CleanupContainers, ReclaimAction::CleanupImages]
        );

        let shared = build_signal_to_reclaim_actions(false);
        assert_eq!(
            shared[&Signal::NodeFsAvailable],
            vec![ReclaimAction::CleanupContainers, ReclaimAction::CleanupImages]
        );
    }
}
