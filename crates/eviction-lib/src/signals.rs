//! Signal and threshold model
//!
//! Names the monitored node resources, the threshold predicates applied to
//! them, and the parsing/validation of threshold configuration maps of the
//! form `"memory.available" -> "100Mi"` / `"nodefs.available" -> "10%"`.

use crate::models::ResourceName;
use crate::quantity::Quantity;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Allocatable enforcement key that mirrors memory thresholds onto the
/// allocatable cgroup.
pub const NODE_ALLOCATABLE_ENFORCEMENT_KEY: &str = "pods";

/// A monitored quantity on the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Signal {
    MemoryAvailable,
    AllocatableMemoryAvailable,
    NodeFsAvailable,
    NodeFsInodesFree,
    ImageFsAvailable,
    ImageFsInodesFree,
    PidAvailable,
    /// Metrics label for container ephemeral-storage limit violations.
    EphemeralContainerFsLimit,
    /// Metrics label for pod ephemeral-storage limit violations.
    EphemeralPodFsLimit,
    /// Metrics label for emptyDir sizeLimit violations.
    EmptyDirFsLimit,
}

impl Signal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Signal::MemoryAvailable => "memory.available",
            Signal::AllocatableMemoryAvailable => "allocatableMemory.available",
            Signal::NodeFsAvailable => "nodefs.available",
            Signal::NodeFsInodesFree => "nodefs.inodesFree",
            Signal::ImageFsAvailable => "imagefs.available",
            Signal::ImageFsInodesFree => "imagefs.inodesFree",
            Signal::PidAvailable => "pid.available",
            Signal::EphemeralContainerFsLimit => "ephemeralcontainerfs.limit",
            Signal::EphemeralPodFsLimit => "ephemeralpodfs.limit",
            Signal::EmptyDirFsLimit => "emptydirfs.limit",
        }
    }

    /// Signals that may appear in threshold configuration. The `*.limit`
    /// pseudo-signals label metrics only and are rejected here.
    pub fn is_threshold_signal(&self) -> bool {
        !matches!(
            self,
            Signal::EphemeralContainerFsLimit
                | Signal::EphemeralPodFsLimit
                | Signal::EmptyDirFsLimit
        )
    }

    pub fn is_memory(&self) -> bool {
        matches!(
            self,
            Signal::MemoryAvailable | Signal::AllocatableMemoryAvailable
        )
    }

    /// Node condition triggered when a threshold on this signal is met.
    pub fn condition(&self) -> Option<NodeConditionType> {
        match self {
            Signal::MemoryAvailable | Signal::AllocatableMemoryAvailable => {
                Some(NodeConditionType::MemoryPressure)
            }
            Signal::NodeFsAvailable
            | Signal::NodeFsInodesFree
            | Signal::ImageFsAvailable
            | Signal::ImageFsInodesFree => Some(NodeConditionType::DiskPressure),
            Signal::PidAvailable => Some(NodeConditionType::PidPressure),
            _ => None,
        }
    }

    /// The starved resource named in events and eviction messages.
    pub fn starved_resource(&self) -> Option<ResourceName> {
        match self {
            Signal::MemoryAvailable | Signal::AllocatableMemoryAvailable => {
                Some(ResourceName::Memory)
            }
            Signal::NodeFsAvailable | Signal::ImageFsAvailable => {
                Some(ResourceName::EphemeralStorage)
            }
            Signal::NodeFsInodesFree | Signal::ImageFsInodesFree => Some(ResourceName::Inodes),
            Signal::PidAvailable => Some(ResourceName::Pids),
            _ => None,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Signal {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "memory.available" => Signal::MemoryAvailable,
            "allocatableMemory.available" => Signal::AllocatableMemoryAvailable,
            "nodefs.available" => Signal::NodeFsAvailable,
            "nodefs.inodesFree" => Signal::NodeFsInodesFree,
            "imagefs.available" => Signal::ImageFsAvailable,
            "imagefs.inodesFree" => Signal::ImageFsInodesFree,
            "pid.available" => Signal::PidAvailable,
            "ephemeralcontainerfs.limit" => Signal::EphemeralContainerFsLimit,
            "ephemeralpodfs.limit" => Signal::EphemeralPodFsLimit,
            "emptydirfs.limit" => Signal::EmptyDirFsLimit,
            other => bail!("unknown eviction signal {other:?}"),
        })
    }
}

/// Coarse pressure summary attached to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeConditionType {
    MemoryPressure,
    DiskPressure,
    PidPressure,
}

impl fmt::Display for NodeConditionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeConditionType::MemoryPressure => "MemoryPressure",
            NodeConditionType::DiskPressure => "DiskPressure",
            NodeConditionType::PidPressure => "PIDPressure",
        };
        f.write_str(s)
    }
}

/// The only supported threshold predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThresholdOperator {
    LessThan,
}

impl fmt::Display for ThresholdOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LessThan")
    }
}

/// An absolute quantity or a percentage of observed capacity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ThresholdValue {
    Quantity(Quantity),
    /// Fraction in (0, 1].
    Percentage(f32),
}

impl ThresholdValue {
    /// Resolve to an absolute quantity against the observed capacity.
    /// Percentages without a known capacity cannot be resolved.
    pub fn quantity(&self, capacity: Option<Quantity>) -> Option<Quantity> {
        match self {
            ThresholdValue::Quantity(q) => Some(*q),
            ThresholdValue::Percentage(fraction) => capacity.map(|cap| {
                Quantity::from_value((cap.value() as f64 * *fraction as f64) as i64)
            }),
        }
    }
}

impl fmt::Display for ThresholdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdValue::Quantity(q) => write!(f, "{q}"),
            ThresholdValue::Percentage(fraction) => write!(f, "{}%", fraction * 100.0),
        }
    }
}

/// A configured eviction threshold over one signal.
#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub signal: Signal,
    pub operator: ThresholdOperator,
    pub value: ThresholdValue,
    /// Zero for hard thresholds; soft thresholds wait this long after the
    /// threshold is first continuously met.
    pub grace_period: Duration,
    /// Headroom above `value` that must be restored before the threshold
    /// is considered resolved.
    pub min_reclaim: Option<ThresholdValue>,
}

impl Threshold {
    pub fn is_hard(&self) -> bool {
        self.grace_period.is_zero()
    }

    /// Identity used for deduplication: signal, value, and grace period.
    pub fn same_as(&self, other: &Threshold) -> bool {
        self.signal == other.signal
            && self.value == other.value
            && self.grace_period == other.grace_period
    }
}

/// Parse and validate threshold configuration maps.
///
/// `allocatable_config` mirrors every `memory.available` threshold onto
/// `allocatableMemory.available` when it contains the enforcement key.
pub fn parse_threshold_config(
    allocatable_config: &[String],
    eviction_hard: &BTreeMap<String, String>,
    eviction_soft: &BTreeMap<String, String>,
    eviction_soft_grace_period: &BTreeMap<String, String>,
    eviction_minimum_reclaim: &BTreeMap<String, String>,
) -> Result<Vec<Threshold>> {
    let mut thresholds = Vec::new();

    for (raw_signal, raw_value) in eviction_hard {
        let signal = parse_threshold_signal(raw_signal)?;
        let value = parse_threshold_value(raw_value)
            .with_context(|| format!("invalid hard eviction threshold for {raw_signal}"))?;
        thresholds.push(Threshold {
            signal,
            operator: ThresholdOperator::LessThan,
            value,
            grace_period: Duration::ZERO,
            min_reclaim: None,
        });
    }

    for (raw_signal, raw_value) in eviction_soft {
        let signal = parse_threshold_signal(raw_signal)?;
        let value = parse_threshold_value(raw_value)
            .with_context(|| format!("invalid soft eviction threshold for {raw_signal}"))?;
        let raw_grace = eviction_soft_grace_period.get(raw_signal).with_context(|| {
            format!("soft eviction threshold {raw_signal} declared without a grace period")
        })?;
        let grace_period = parse_duration(raw_grace)
            .with_context(|| format!("invalid grace period for {raw_signal}"))?;
        if grace_period.is_zero() {
            bail!("soft eviction threshold {raw_signal} must have a positive grace period");
        }
        thresholds.push(Threshold {
            signal,
            operator: ThresholdOperator::LessThan,
            value,
            grace_period,
            min_reclaim: None,
        });
    }

    for raw_signal in eviction_soft_grace_period.keys() {
        if !eviction_soft.contains_key(raw_signal) {
            bail!("grace period declared for {raw_signal} without a matching soft threshold");
        }
    }

    for (raw_signal, raw_value) in eviction_minimum_reclaim {
        let signal = parse_threshold_signal(raw_signal)?;
        let min_reclaim = parse_threshold_value(raw_value)
            .with_context(|| format!("invalid minimum reclaim for {raw_signal}"))?;
        let mut applied = false;
        for threshold in &mut thresholds {
            if threshold.signal == signal {
                threshold.min_reclaim = Some(min_reclaim);
                applied = true;
            }
        }
        if !applied {
            bail!("minimum reclaim declared for {raw_signal} without a matching threshold");
        }
    }

    if allocatable_config
        .iter()
        .any(|key| key == NODE_ALLOCATABLE_ENFORCEMENT_KEY)
    {
        let mirrored: Vec<Threshold> = thresholds
            .iter()
            .filter(|t| t.signal == Signal::MemoryAvailable)
            .map(|t| Threshold {
                signal: Signal::AllocatableMemoryAvailable,
                ..t.clone()
            })
            .collect();
        thresholds.extend(mirrored);
    }

    Ok(thresholds)
}

fn parse_threshold_signal(raw: &str) -> Result<Signal> {
    let signal: Signal = raw.parse()?;
    if !signal.is_threshold_signal() {
        bail!("signal {raw:?} cannot be used as an eviction threshold");
    }
    Ok(signal)
}

fn parse_threshold_value(raw: &str) -> Result<ThresholdValue> {
    if let Some(percent) = raw.strip_suffix('%') {
        let percent: f32 = percent
            .parse()
            .map_err(|_| anyhow::anyhow!("invalid percentage {raw:?}"))?;
        if percent <= 0.0 || percent > 100.0 {
            bail!("percentage {raw:?} must be in (0%, 100%]");
        }
        return Ok(ThresholdValue::Percentage(percent / 100.0));
    }
    let quantity: Quantity = raw.parse()?;
    if !quantity.is_positive() {
        bail!("threshold {raw:?} must be positive");
    }
    Ok(ThresholdValue::Quantity(quantity))
}

/// Parse compound duration strings such as `90s`, `1m30s`, or `2h`.
pub fn parse_duration(raw: &str) -> Result<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("empty duration");
    }
    let mut total = Duration::ZERO;
    let mut digits = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            bail!("invalid duration {raw:?}");
        }
        let value: u64 = digits.parse()?;
        digits.clear();
        let unit = match c {
            'h' => Duration::from_secs(value * 3600),
            'm' if chars.peek() == Some(&'s') => {
                chars.next();
                Duration::from_millis(value)
            }
            'm' => Duration::from_secs(value * 60),
            's' => Duration::from_secs(value),
            other => bail!("invalid duration unit {other:?} in {raw:?}"),
        };
        total += unit;
    }
    if !digits.is_empty() {
        // A bare number is taken as seconds.
        total += Duration::from_secs(digits.parse()?);
    }
    Ok(total)
}
