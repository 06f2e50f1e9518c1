//! Resource-allocation scoring
//!
//! The request aggregation shared by the scheduler-facing allocation score
//! and the eviction ranking: regular containers sum, init containers take
//! the max (they run sequentially), and pod overhead is added on top.

use crate::models::{Pod, ResourceList, ResourceName};
use anyhow::{bail, Result};
use std::collections::HashMap;
use tracing::trace;

/// Floor applied to containers that declare no CPU request when scoring
/// with defaults (`use_requested = false`).
pub const DEFAULT_MILLI_CPU_REQUEST: i64 = 100;
/// Floor applied to containers that declare no memory request.
pub const DEFAULT_MEMORY_REQUEST: i64 = 200 << 20;

/// Resource name to value map; CPU values are millicores, all other
/// resources use their base unit.
pub type ResourceValueMap = HashMap<ResourceName, i64>;

/// Node-side aggregates the scorer compares a pod against.
#[derive(Debug, Clone, Default)]
pub struct NodeResources {
    pub allocatable: ResourceValueMap,
    pub requested: ResourceValueMap,
    /// Requested with per-container default floors applied.
    pub non_zero_requested: ResourceValueMap,
}

/// A container's request for one resource, optionally substituting the
/// default floor when nothing is declared.
pub fn get_request_for_resource(
    resource: &ResourceName,
    requests: &ResourceList,
    non_zero: bool,
) -> i64 {
    let declared = requests.get(resource);
    match resource {
        ResourceName::Cpu => declared
            .map(|q| q.milli_value())
            .unwrap_or(if non_zero { DEFAULT_MILLI_CPU_REQUEST } else { 0 }),
        ResourceName::Memory => declared
            .map(|q| q.value())
            .unwrap_or(if non_zero { DEFAULT_MEMORY_REQUEST } else { 0 }),
        _ => declared.map(|q| q.value()).unwrap_or(0),
    }
}

/// Aggregate pod request for one resource:
/// `max(sum(regular containers), max(init containers)) + overhead`.
pub fn calculate_pod_resource_request(
    pod: &Pod,
    resource: &ResourceName,
    use_requested: bool,
) -> i64 {
    let non_zero = !use_requested;
    let mut pod_request: i64 = pod
        .containers
        .iter()
        .map(|c| get_request_for_resource(resource, &c.requests, non_zero))
        .sum();

    for init_container in &pod.init_containers {
        let value = get_request_for_resource(resource, &init_container.requests, non_zero);
        if pod_request < value {
            pod_request = value;
        }
    }

    if let Some(overhead) = pod.overhead.get(resource) {
        pod_request += match resource {
            ResourceName::Cpu => overhead.milli_value(),
            _ => overhead.value(),
        };
    }

    pod_request
}

/// Scores a pod placement from requested vs allocatable aggregates.
pub struct ResourceAllocationScorer {
    pub name: &'static str,
    /// Use declared requests as-is instead of the defaulted floors.
    pub use_requested: bool,
    scorer: fn(&ResourceValueMap, &ResourceValueMap) -> i64,
    resource_weights: HashMap<ResourceName, i64>,
}

impl ResourceAllocationScorer {
    pub fn new(
        name: &'static str,
        use_requested: bool,
        scorer: fn(&ResourceValueMap, &ResourceValueMap) -> i64,
        resource_weights: HashMap<ResourceName, i64>,
    ) -> Self {
        Self {
            name,
            use_requested,
            scorer,
            resource_weights,
        }
    }

    /// Standard least-allocated scorer over the given resources.
    pub fn least_allocated(resources: &[(ResourceName, i64)]) -> Self {
        Self::new(
            "LeastAllocated",
            false,
            least_allocated_score,
            resources.iter().cloned().collect(),
        )
    }

    /// Score the pod against the node aggregates.
    pub fn score(&self, pod: &Pod, node: &NodeResources) -> Result<i64> {
        if self.resource_weights.is_empty() {
            bail!("resource weights not configured for scorer {}", self.name);
        }

        let mut requested = ResourceValueMap::new();
        let mut allocatable = ResourceValueMap::new();
        for resource in self.resource_weights.keys() {
            let (alloc, req) = self.allocatable_and_request(node, pod, resource);
            if alloc != 0 {
                // Extended resources the pod does not request are skipped.
                allocatable.insert(resource.clone(), alloc);
                requested.insert(resource.clone(), req);
            }
        }

        let score = (self.scorer)(&requested, &allocatable);
        trace!(
            scorer = self.name,
            pod = %pod.qualified_name(),
            score,
            "Scored resource allocation"
        );
        Ok(score)
    }

    /// Allocatable and would-be-requested totals for one resource. Extended
    /// resources the pod does not request yield `(0, 0)` so scoring skips
    /// the dimension.
    fn allocatable_and_request(
        &self,
        node: &NodeResources,
        pod: &Pod,
        resource: &ResourceName,
    ) -> (i64, i64) {
        let base = if self.use_requested {
            &node.requested
        } else {
            &node.non_zero_requested
        };

        let pod_request = calculate_pod_resource_request(pod, resource, self.use_requested);
        if pod_request == 0 && resource.is_scalar() {
            return (0, 0);
        }

        let requested_of = |m: &ResourceValueMap| m.get(resource).copied().unwrap_or(0);
        match resource {
            ResourceName::Cpu | ResourceName::Memory => (
                node.allocatable.get(resource).copied().unwrap_or(0),
                requested_of(base) + pod_request,
            ),
            ResourceName::EphemeralStorage => (
                node.allocatable.get(resource).copied().unwrap_or(0),
                requested_of(&node.requested) + pod_request,
            ),
            _ => match node.allocatable.get(resource) {
                Some(alloc) => (*alloc, requested_of(&node.requested) + pod_request),
                None => (0, 0),
            },
        }
    }
}

/// Average of `(allocatable - requested) / allocatable` across dimensions,
/// scaled to 0..=100.
fn least_allocated_score(requested: &ResourceValueMap, allocatable: &ResourceValueMap) -> i64 {
    if allocatable.is_empty() {
        return 0;
    }
    let mut total = 0i64;
    for (resource, alloc) in allocatable {
        let req = requested.get(resource).copied().unwrap_or(0);
        if *alloc <= 0 || req > *alloc {
            continue;
        }
        total += (alloc - req) * 100 / alloc;
    }
    total / allocatable.len() as i64
}
