//! Probe health for the eviction agent
//!
//! Liveness and readiness derive from the work the agent must keep doing:
//! fetching stats snapshots, listing active pods, and completing
//! synchronize rounds. Each probe counts consecutive failures; a probe
//! that keeps failing flips the agent unready so the node is not left
//! running without eviction protection.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// Consecutive failures after which a probe is considered failing.
const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// The external work tracked for health reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Probe {
    /// Stats snapshot fetches, including the disk topology probe.
    SummaryStats,
    /// Active pod listing.
    ActivePods,
    /// A committed synchronize round.
    Synchronize,
}

impl Probe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Probe::SummaryStats => "summary_stats",
            Probe::ActivePods => "active_pods",
            Probe::Synchronize => "synchronize",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    /// Last attempt succeeded.
    Ok,
    /// Failing, but not yet past the failure threshold.
    Degraded,
    /// At or past the failure threshold.
    Failing,
}

#[derive(Debug, Clone, Default)]
struct ProbeState {
    consecutive_failures: u32,
    total_failures: u64,
    last_error: Option<String>,
    last_success_timestamp: Option<i64>,
}

/// One probe's state as reported by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ProbeHealth {
    pub status: ProbeStatus,
    pub consecutive_failures: u32,
    pub total_failures: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_success_timestamp: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: ProbeStatus,
    pub probes: HashMap<&'static str, ProbeHealth>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Records probe outcomes from the synchronize loop and answers the
/// liveness and readiness endpoints.
pub struct HealthTracker {
    probes: RwLock<HashMap<Probe, ProbeState>>,
    ready: AtomicBool,
    failure_threshold: u32,
}

impl Default for HealthTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthTracker {
    pub fn new() -> Self {
        Self::with_failure_threshold(DEFAULT_FAILURE_THRESHOLD)
    }

    pub fn with_failure_threshold(failure_threshold: u32) -> Self {
        Self {
            probes: RwLock::new(HashMap::new()),
            ready: AtomicBool::new(false),
            failure_threshold: failure_threshold.max(1),
        }
    }

    /// A probe attempt succeeded; clears its failure streak.
    pub fn record_success(&self, probe: Probe) {
        let mut probes = self.probes.write().unwrap();
        let state = probes.entry(probe).or_default();
        state.consecutive_failures = 0;
        state.last_error = None;
        state.last_success_timestamp = Some(chrono::Utc::now().timestamp());
    }

    /// A probe attempt failed; extends its failure streak.
    pub fn record_failure(&self, probe: Probe, error: &str) {
        let mut probes = self.probes.write().unwrap();
        let state = probes.entry(probe).or_default();
        state.consecutive_failures += 1;
        state.total_failures += 1;
        state.last_error = Some(error.to_string());
    }

    /// Flip once startup wiring is complete.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    fn probe_status(&self, state: &ProbeState) -> ProbeStatus {
        if state.consecutive_failures == 0 {
            ProbeStatus::Ok
        } else if state.consecutive_failures < self.failure_threshold {
            ProbeStatus::Degraded
        } else {
            ProbeStatus::Failing
        }
    }

    /// Per-probe detail plus the worst status across probes. Probes that
    /// have not run yet are not reported.
    pub fn health(&self) -> HealthResponse {
        let probes = self.probes.read().unwrap();
        let mut overall = ProbeStatus::Ok;
        let mut reported = HashMap::new();
        for (probe, state) in probes.iter() {
            let status = self.probe_status(state);
            match (status, overall) {
                (ProbeStatus::Failing, _) => overall = ProbeStatus::Failing,
                (ProbeStatus::Degraded, ProbeStatus::Ok) => overall = ProbeStatus::Degraded,
                _ => {}
            }
            reported.insert(
                probe.as_str(),
                ProbeHealth {
                    status,
                    consecutive_failures: state.consecutive_failures,
                    total_failures: state.total_failures,
                    last_error: state.last_error.clone(),
                    last_success_timestamp: state.last_success_timestamp,
                },
            );
        }
        HealthResponse {
            status: overall,
            probes: reported,
        }
    }

    /// Ready once startup wiring completed and no probe is failing.
    pub fn readiness(&self) -> ReadinessResponse {
        if !self.ready.load(Ordering::SeqCst) {
            return ReadinessResponse {
                ready: false,
                reason: Some("Agent not yet initialized".to_string()),
            };
        }

        let probes = self.probes.read().unwrap();
        for (probe, state) in probes.iter() {
            if self.probe_status(state) == ProbeStatus::Failing {
                let detail = state.last_error.as_deref().unwrap_or("unknown error");
                return ReadinessResponse {
                    ready: false,
                    reason: Some(format!(
                        "probe {} failing after {} attempts: {}",
                        probe.as_str(),
                        state.consecutive_failures,
                        detail
                    )),
                };
            }
        }

        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}
