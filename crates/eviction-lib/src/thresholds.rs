//! Threshold evaluation
//!
//! Pure functions over configured thresholds and signal observations:
//! which thresholds are met, when they were first observed, which have
//! outlasted their grace period, and which node conditions they imply.
//! The transition window keeps conditions reported through brief dips.

use crate::models::ResourceName;
use crate::signals::{NodeConditionType, Signal, Threshold};
use crate::observations::SignalObservations;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// When each met threshold began being continuously met.
pub type ThresholdsObservedAt = Vec<(Threshold, DateTime<Utc>)>;

/// When each node condition was last triggered by a met threshold.
pub type NodeConditionsObservedAt = HashMap<NodeConditionType, DateTime<Utc>>;

/// Thresholds whose observed availability is below the configured value.
///
/// With `enforce_min_reclaim`, the minimum-reclaim headroom is added onto
/// the value; used when re-checking already-met thresholds so they are not
/// cleared before true headroom is restored.
pub fn thresholds_met(
    thresholds: &[Threshold],
    observations: &SignalObservations,
    enforce_min_reclaim: bool,
) -> Vec<Threshold> {
    let mut results = Vec::new();
    for threshold in thresholds {
        let Some(observed) = observations.get(&threshold.signal) else {
            continue;
        };
        let Some(mut value) = threshold.value.quantity(observed.capacity) else {
            continue;
        };
        if enforce_min_reclaim {
            if let Some(min_reclaim) = threshold
                .min_reclaim
                .as_ref()
                .and_then(|m| m.quantity(observed.capacity))
            {
                value = value + min_reclaim;
            }
        }
        if observed.available < value {
            results.push(threshold.clone());
        }
    }
    results
}

/// Union of two threshold sets, deduplicated by signal, value, and grace
/// period.
pub fn merge_thresholds(a: Vec<Threshold>, b: Vec<Threshold>) -> Vec<Threshold> {
    let mut merged = a;
    for candidate in b {
        if !merged.iter().any(|t| t.same_as(&candidate)) {
            merged.push(candidate);
        }
    }
    merged
}

/// Carry forward the first-observed timestamp for thresholds still met and
/// stamp `now` on newly met ones. Thresholds no longer met are dropped.
pub fn thresholds_first_observed_at(
    thresholds: &[Threshold],
    last_observed_at: &ThresholdsObservedAt,
    now: DateTime<Utc>,
) -> ThresholdsObservedAt {
    thresholds
        .iter()
        .map(|threshold| {
            let at = last_observed_at
                .iter()
                .find(|(t, _)| t.same_as(threshold))
                .map(|(_, at)| *at)
                .unwrap_or(now);
            (threshold.clone(), at)
        })
        .collect()
}

/// Thresholds whose grace period has elapsed since first observation.
/// Hard thresholds have a zero grace period and pass immediately.
pub fn thresholds_met_grace_period(
    observed_at: &ThresholdsObservedAt,
    now: DateTime<Utc>,
) -> Vec<Threshold> {
    observed_at
        .iter()
        .filter(|(threshold, at)| {
            let elapsed = now.signed_duration_since(*at).to_std().unwrap_or_default();
            elapsed >= threshold.grace_period
        })
        .map(|(threshold, _)| threshold.clone())
        .collect()
}

/// Thresholds whose observation timestamp strictly advanced since the last
/// synchronization; guards against acting twice on one stale snapshot.
pub fn thresholds_updated_stats(
    thresholds: &[Threshold],
    observations: &SignalObservations,
    last_observations: &SignalObservations,
) -> Vec<Threshold> {
    thresholds
        .iter()
        .filter(|threshold| {
            let Some(observed) = observations.get(&threshold.signal) else {
                return false;
            };
            match (observed.time, last_observations.get(&threshold.signal)) {
                (_, None) => true,
                (None, Some(_)) => true,
                (Some(time), Some(last)) => match last.time {
                    Some(last_time) => time > last_time,
                    None => true,
                },
            }
        })
        .cloned()
        .collect()
}

/// Node conditions implied by the given thresholds, deduplicated.
pub fn node_conditions(thresholds: &[Threshold]) -> Vec<NodeConditionType> {
    let mut conditions = Vec::new();
    for threshold in thresholds {
        if let Some(condition) = threshold.signal.condition() {
            if !conditions.contains(&condition) {
                conditions.push(condition);
            }
        }
    }
    conditions
}

/// Stamp `now` on currently observed conditions, keeping older stamps for
/// conditions not observed this round.
pub fn node_conditions_last_observed_at(
    conditions: &[NodeConditionType],
    last_observed_at: &NodeConditionsObservedAt,
    now: DateTime<Utc>,
) -> NodeConditionsObservedAt {
    let mut results = last_observed_at.clone();
    for condition in conditions {
        results.insert(*condition, now);
    }
    results
}

/// Conditions observed within the transition period, i.e. still reported.
pub fn node_conditions_observed_since(
    observed_at: &NodeConditionsObservedAt,
    period: Duration,
    now: DateTime<Utc>,
) -> Vec<NodeConditionType> {
    observed_at
        .iter()
        .filter(|(_, at)| {
            let elapsed = now.signed_duration_since(**at).to_std().unwrap_or_default();
            elapsed < period
        })
        .map(|(condition, _)| *condition)
        .collect()
}

pub fn has_node_condition(conditions: &[NodeConditionType], wanted: NodeConditionType) -> bool {
    conditions.contains(&wanted)
}

/// Order thresholds so memory signals are reclaimed before all others.
pub fn sort_by_eviction_priority(thresholds: &mut [Threshold]) {
    thresholds.sort_by_key(|t| !t.signal.is_memory());
}

/// First threshold with a reclaimable resource, paired with that resource.
pub fn get_reclaimable_threshold(
    thresholds: &[Threshold],
) -> Option<(Threshold, ResourceName)> {
    thresholds.iter().find_map(|threshold| {
        threshold
            .signal
            .starved_resource()
            .map(|resource| (threshold.clone(), resource))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observations::SignalObservation;
    use crate::quantity::Quantity;
    use crate::signals::{ThresholdOperator, ThresholdValue};

    fn threshold(signal: Signal, value: &str, grace: Duration) -> Threshold {
        Threshold {
            signal,
            operator: ThresholdOperator::LessThan,
            value: ThresholdValue::Quantity(value.parse().unwrap()),
            grace_period: grace,
            min_reclaim: None,
        }
    }

    fn observe(
        observations: &mut SignalObservations,
        signal: Signal,
        available: i64,
        capacity: i64,
        time: Option<DateTime<Utc>>,
    ) {
        observations.insert(
            signal,
            SignalObservation {
                available: Quantity::from_value(available),
                capacity: Some(Quantity::from_value(capacity)),
                time,
            },
        );
    }

    #[test]
    fn test_thresholds_met_below_value() {
        let thresholds = vec![threshold(
            Signal::MemoryAvailable,
            "100Mi",
            Duration::ZERO,
        )];
        let mut observations = SignalObservations::new();
        observe(
            &mut observations,
            Signal::MemoryAvailable,
            80 << 20,
            1 << 30,
            None,
        );
        assert_eq!(thresholds_met(&thresholds, &observations, false).len(), 1);

        observe(
            &mut observations,
            Signal::MemoryAvailable,
            120 << 20,
            1 << 30,
            None,
        );
        assert!(thresholds_met(&thresholds, &observations, false).is_empty());
    }

    #[test]
    fn test_thresholds_met_enforces_min_reclaim() {
        let mut t = threshold(Signal::MemoryAvailable, "100Mi", Duration::ZERO);
        t.min_reclaim = Some(ThresholdValue::Quantity("50Mi".parse().unwrap()));
        let thresholds = vec![t];

        // Above the value but inside the min-reclaim headroom.
        let mut observations = SignalObservations::new();
        observe(
            &mut observations,
            Signal::MemoryAvailable,
            120 << 20,
            1 << 30,
            None,
        );
        assert!(thresholds_met(&thresholds, &observations, false).is_empty());
        assert_eq!(thresholds_met(&thresholds, &observations, true).len(), 1);

        observe(
            &mut observations,
            Signal::MemoryAvailable,
            160 << 20,
            1 << 30,
            None,
        );
        assert!(thresholds_met(&thresholds, &observations, true).is_empty());
    }

    #[test]
    fn test_percentage_threshold_uses_capacity() {
        let thresholds = vec![Threshold {
            signal: Signal::NodeFsAvailable,
            operator: ThresholdOperator::LessThan,
            value: ThresholdValue::Percentage(0.1),
            grace_period: Duration::ZERO,
            min_reclaim: None,
        }];
        let mut observations = SignalObservations::new();
        observe(&mut observations, Signal::NodeFsAvailable, 50, 1000, None);
        assert_eq!(thresholds_met(&thresholds, &observations, false).len(), 1);

        observe(&mut observations, Signal::NodeFsAvailable, 150, 1000, None);
        assert!(thresholds_met(&thresholds, &observations, false).is_empty());
    }

    #[test]
    fn test_merge_thresholds_dedups() {
        let a = vec![threshold(Signal::MemoryAvailable, "100Mi", Duration::ZERO)];
        let b = vec![
            threshold(Signal::MemoryAvailable, "100Mi", Duration::ZERO),
            threshold(Signal::NodeFsAvailable, "1Gi", Duration::ZERO),
        ];
        let merged = merge_thresholds(a, b);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_first_observed_at_carries_and_drops() {
        let now: DateTime<Utc> = "2024-05-01T10:00:00Z".parse().unwrap();
        let later = now + chrono::Duration::seconds(30);
        let memory = threshold(Signal::MemoryAvailable, "100Mi", Duration::ZERO);
        let disk = threshold(Signal::NodeFsAvailable, "1Gi", Duration::ZERO);

        let first = thresholds_first_observed_at(&[memory.clone(), disk.clone()], &Vec::new(), now);
        assert_eq!(first.len(), 2);

        // Memory stays met, disk resolves: memory keeps its stamp, disk drops.
        let second = thresholds_first_observed_at(&[memory.clone()], &first, later);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].1, now);
    }

    #[test]
    fn test_grace_period_gates_soft_thresholds() {
        let start: DateTime<Utc> = "2024-05-01T10:00:00Z".parse().unwrap();
        let soft = threshold(
            Signal::NodeFsAvailable,
            "1Gi",
            Duration::from_secs(120),
        );
        let hard = threshold(Signal::MemoryAvailable, "100Mi", Duration::ZERO);
        let observed_at = vec![(soft.clone(), start), (hard.clone(), start)];

        let at_90s = thresholds_met_grace_period(&observed_at, start + chrono::Duration::seconds(90));
        assert_eq!(at_90s.len(), 1);
        assert_eq!(at_90s[0].signal, Signal::MemoryAvailable);

        let at_130s =
            thresholds_met_grace_period(&observed_at, start + chrono::Duration::seconds(130));
        assert_eq!(at_130s.len(), 2);
    }

    #[test]
    fn test_updated_stats_requires_time_advance() {
        let t0: DateTime<Utc> = "2024-05-01T10:00:00Z".parse().unwrap();
        let t1 = t0 + chrono::Duration::seconds(10);
        let thresholds = vec![threshold(Signal::MemoryAvailable, "100Mi", Duration::ZERO)];

        let mut last = SignalObservations::new();
        observe(&mut last, Signal::MemoryAvailable, 80, 100, Some(t0));

        let mut stale = SignalObservations::new();
        observe(&mut stale, Signal::MemoryAvailable, 80, 100, Some(t0));
        assert!(thresholds_updated_stats(&thresholds, &stale, &last).is_empty());

        let mut fresh = SignalObservations::new();
        observe(&mut fresh, Signal::MemoryAvailable, 80, 100, Some(t1));
        assert_eq!(thresholds_updated_stats(&thresholds, &fresh, &last).len(), 1);

        // Nothing previously observed counts as updated.
        assert_eq!(
            thresholds_updated_stats(&thresholds, &fresh, &SignalObservations::new()).len(),
            1
        );
    }

    #[test]
    fn test_node_conditions_mapping() {
        let conditions = node_conditions(&[
            threshold(Signal::MemoryAvailable, "100Mi", Duration::ZERO),
            threshold(Signal::AllocatableMemoryAvailable, "100Mi", Duration::ZERO),
            threshold(Signal::NodeFsInodesFree, "1000", Duration::ZERO),
            threshold(Signal::PidAvailable, "500", Duration::ZERO),
        ]);
        assert_eq!(
            conditions,
            vec![
                NodeConditionType::MemoryPressure,
                NodeConditionType::DiskPressure,
                NodeConditionType::PidPressure,
            ]
        );
    }

    #[test]
    fn test_transition_window_keeps_condition_reported() {
        let now: DateTime<Utc> = "2024-05-01T10:00:00Z".parse().unwrap();
        let observed_at = node_conditions_last_observed_at(
            &[NodeConditionType::DiskPressure],
            &NodeConditionsObservedAt::new(),
            now,
        );

        let period = Duration::from_secs(300);
        let inside = node_conditions_observed_since(
            &observed_at,
            period,
            now + chrono::Duration::seconds(299),
        );
        assert_eq!(inside, vec![NodeConditionType::DiskPressure]);

        let outside = node_conditions_observed_since(
            &observed_at,
            period,
            now + chrono::Duration::seconds(300),
        );
        assert!(outside.is_empty());
    }

    #[test]
    fn test_eviction_priority_puts_memory_first() {
        let mut thresholds = vec![
            threshold(Signal::NodeFsAvailable, "1Gi", Duration::ZERO),
            threshold(Signal::PidAvailable, "500", Duration::ZERO),
            threshold(Signal::MemoryAvailable, "100Mi", Duration::ZERO),
        ];
        sort_by_eviction_priority(&mut thresholds);
        assert_eq!(thresholds[0].signal, Signal::MemoryAvailable);

        let (reclaimable, resource) = get_reclaimable_threshold(&thresholds).unwrap();
        assert_eq!(reclaimable.signal, Signal::MemoryAvailable);
        assert_eq!(resource, ResourceName::Memory);
    }
}
