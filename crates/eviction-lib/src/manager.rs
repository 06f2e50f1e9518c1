//! Eviction manager
//!
//! The control loop that watches node resource pressure and keeps the node
//! stable: sample stats, evaluate thresholds, refresh node conditions, try
//! node-level reclaim, and as a last resort kill exactly one ranked pod
//! per round. Local-storage limit enforcement runs as an independent path
//! ahead of threshold eviction. An admission gate derived from the same
//! state rejects new pods while pressure is active.

use crate::health::{HealthTracker, Probe};
use crate::models::{Pod, QosClass, ResourceName, Taint, TaintEffect, TAINT_NODE_MEMORY_PRESSURE};
use crate::notifier::{
    CgroupNotifierFactory, MemoryThresholdNotifier, ThresholdNotifier,
};
use crate::observability::EvictionMetrics;
use crate::observations::{make_signal_observations, SignalObservations, StatsFunc};
use crate::quantity::Quantity;
use crate::ranking::{build_signal_to_rank_func, container_disk_usage, RankFunc};
use crate::reclaim::{build_signal_to_reclaim_actions, ContainerGc, ImageGc, ReclaimAction};
use crate::signals::{NodeConditionType, Signal, Threshold};
use crate::stats::PodStats;
use crate::thresholds::{
    get_reclaimable_threshold, merge_thresholds, node_conditions, node_conditions_last_observed_at,
    node_conditions_observed_since, sort_by_eviction_priority, thresholds_first_observed_at,
    thresholds_met, thresholds_met_grace_period, thresholds_updated_stats,
    NodeConditionsObservedAt, ThresholdsObservedAt,
};
use crate::types::{
    ActivePodsProvider, AdmitAttributes, AdmitResult, Clock, Config, DiskInfoProvider,
    EventRecorder, EventType, MirrorPodProvider, ObjectRef, PodCleanupChecker, PodCondition,
    PodKiller, PodPhase, PodStatusPatch, SummaryProvider, SystemClock,
    DISRUPTION_TARGET_CONDITION, EVICTION_REASON, TERMINATION_BY_KUBELET_REASON,
};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

const POD_CLEANUP_TIMEOUT: Duration = Duration::from_secs(30);
const POD_CLEANUP_POLL_FREQ: Duration = Duration::from_secs(1);
const NOTIFIER_REFRESH_INTERVAL: Duration = Duration::from_secs(10);

const EVICTION_THRESHOLD_MET_REASON: &str = "EvictionThresholdMet";

const OFFENDING_CONTAINERS_KEY: &str = "offending_containers";
const OFFENDING_CONTAINERS_USAGE_KEY: &str = "offending_containers_usage";
const STARVED_RESOURCE_KEY: &str = "starved_resource";

/// Bookkeeping mutated only inside `synchronize`, read by the admission
/// gate and the pressure getters.
#[derive(Default)]
struct ManagerState {
    node_conditions: Vec<NodeConditionType>,
    node_conditions_last_observed_at: NodeConditionsObservedAt,
    thresholds_first_observed_at: ThresholdsObservedAt,
    thresholds_met: Vec<Threshold>,
    last_observations: SignalObservations,
    notifiers_last_updated: Option<DateTime<Utc>>,
}

/// Snapshot of pressure state for the read-only HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct PressureStatus {
    pub memory_pressure: bool,
    pub disk_pressure: bool,
    pub pid_pressure: bool,
    pub conditions: Vec<String>,
}

/// One signal's latest observation, rendered for the HTTP surface.
#[derive(Debug, Clone, Serialize)]
pub struct ObservationRecord {
    pub signal: String,
    pub available: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capacity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<DateTime<Utc>>,
}

pub struct EvictionManager {
    config: Config,
    clock: Arc<dyn Clock>,
    summary_provider: Arc<dyn SummaryProvider>,
    disk_info: Arc<dyn DiskInfoProvider>,
    active_pods: Arc<dyn ActivePodsProvider>,
    cleanup_checker: Arc<dyn PodCleanupChecker>,
    pod_killer: Arc<dyn PodKiller>,
    mirror_pods: Option<Arc<dyn MirrorPodProvider>>,
    image_gc: Arc<dyn ImageGc>,
    container_gc: Arc<dyn ContainerGc>,
    recorder: Arc<dyn EventRecorder>,
    notifier_factory: Option<Arc<dyn CgroupNotifierFactory>>,
    node_ref: ObjectRef,
    metrics: EvictionMetrics,
    /// Probe outcomes feeding the liveness/readiness endpoints.
    health: Option<Arc<HealthTracker>>,
    state: RwLock<ManagerState>,
    /// Probed once on the first successful synchronize, then fixed for the
    /// process lifetime; the dispatch tables below are sealed with it.
    dedicated_image_fs: OnceLock<bool>,
    rank_funcs: OnceLock<HashMap<Signal, RankFunc>>,
    reclaim_actions: OnceLock<HashMap<Signal, Vec<ReclaimAction>>>,
    notifiers: Mutex<Vec<Arc<dyn ThresholdNotifier>>>,
}

/// Read-only admission capability over the manager's pressure state.
/// Handed out by [`EvictionManagerBuilder::build`] so the admission
/// subsystem never holds a mutable reference back into the manager.
#[derive(Clone)]
pub struct AdmissionGate {
    manager: Arc<EvictionManager>,
}

impl AdmissionGate {
    /// Reject pods that are unsafe to start while pressure is active.
    pub fn admit(&self, attrs: &AdmitAttributes) -> AdmitResult {
        self.manager.admit(attrs)
    }
}

/// Builder wiring the manager's collaborators.
#[derive(Default)]
pub struct EvictionManagerBuilder {
    config: Option<Config>,
    node_ref: Option<ObjectRef>,
    clock: Option<Arc<dyn Clock>>,
    summary_provider: Option<Arc<dyn SummaryProvider>>,
    disk_info: Option<Arc<dyn DiskInfoProvider>>,
    active_pods: Option<Arc<dyn ActivePodsProvider>>,
    cleanup_checker: Option<Arc<dyn PodCleanupChecker>>,
    pod_killer: Option<Arc<dyn PodKiller>>,
    mirror_pods: Option<Arc<dyn MirrorPodProvider>>,
    image_gc: Option<Arc<dyn ImageGc>>,
    container_gc: Option<Arc<dyn ContainerGc>>,
    recorder: Option<Arc<dyn EventRecorder>>,
    notifier_factory: Option<Arc<dyn CgroupNotifierFactory>>,
    health: Option<Arc<HealthTracker>>,
}

impl EvictionManagerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    pub fn node_ref(mut self, node_ref: ObjectRef) -> Self {
        self.node_ref = Some(node_ref);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn summary_provider(mut self, provider: Arc<dyn SummaryProvider>) -> Self {
        self.summary_provider = Some(provider);
        self
    }

    pub fn disk_info_provider(mut self, provider: Arc<dyn DiskInfoProvider>) -> Self {
        self.disk_info = Some(provider);
        self
    }

    pub fn active_pods_provider(mut self, provider: Arc<dyn ActivePodsProvider>) -> Self {
        self.active_pods = Some(provider);
        self
    }

    pub fn cleanup_checker(mut self, checker: Arc<dyn PodCleanupChecker>) -> Self {
        self.cleanup_checker = Some(checker);
        self
    }

    pub fn pod_killer(mut self, killer: Arc<dyn PodKiller>) -> Self {
        self.pod_killer = Some(killer);
        self
    }

    pub fn mirror_pod_provider(mut self, provider: Arc<dyn MirrorPodProvider>) -> Self {
        self.mirror_pods = Some(provider);
        self
    }

    pub fn image_gc(mut self, gc: Arc<dyn ImageGc>) -> Self {
        self.image_gc = Some(gc);
        self
    }

    pub fn container_gc(mut self, gc: Arc<dyn ContainerGc>) -> Self {
        self.container_gc = Some(gc);
        self
    }

    pub fn event_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn notifier_factory(mut self, factory: Arc<dyn CgroupNotifierFactory>) -> Self {
        self.notifier_factory = Some(factory);
        self
    }

    pub fn health_tracker(mut self, tracker: Arc<HealthTracker>) -> Self {
        self.health = Some(tracker);
        self
    }

    /// Build the manager and its admission gate.
    pub fn build(self) -> Result<(Arc<EvictionManager>, AdmissionGate)> {
        let config = self.config.context("config is required")?;
        if config.kernel_memcg_notification && self.notifier_factory.is_none() {
            anyhow::bail!("kernel memcg notification requires a cgroup notifier factory");
        }
        let manager = Arc::new(EvictionManager {
            config,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            summary_provider: self.summary_provider.context("summary provider is required")?,
            disk_info: self.disk_info.context("disk info provider is required")?,
            active_pods: self.active_pods.context("active pods provider is required")?,
            cleanup_checker: self.cleanup_checker.context("cleanup checker is required")?,
            pod_killer: self.pod_killer.context("pod killer is required")?,
            mirror_pods: self.mirror_pods,
            image_gc: self.image_gc.context("image gc is required")?,
            container_gc: self.container_gc.context("container gc is required")?,
            recorder: self.recorder.context("event recorder is required")?,
            notifier_factory: self.notifier_factory,
            node_ref: self.node_ref.context("node reference is required")?,
            metrics: EvictionMetrics::new(),
            health: self.health,
            state: RwLock::new(ManagerState::default()),
            dedicated_image_fs: OnceLock::new(),
            rank_funcs: OnceLock::new(),
            reclaim_actions: OnceLock::new(),
            notifiers: Mutex::new(Vec::new()),
        });
        let gate = AdmissionGate {
            manager: manager.clone(),
        };
        Ok((manager, gate))
    }
}

impl EvictionManager {
    /// Start the monitoring loop and, when configured, the kernel memory
    /// notifier tasks. Returns the handle of the main loop task.
    pub fn start(
        self: Arc<Self>,
        monitoring_interval: Duration,
        shutdown: &broadcast::Sender<()>,
    ) -> tokio::task::JoinHandle<()> {
        if self.config.kernel_memcg_notification {
            if let Some(factory) = self.notifier_factory.clone() {
                for threshold in &self.config.thresholds {
                    if !threshold.signal.is_memory() {
                        continue;
                    }
                    match MemoryThresholdNotifier::new(
                        threshold.clone(),
                        &self.config.pod_cgroup_root,
                        factory.clone(),
                    ) {
                        Ok((notifier, mut events)) => {
                            let notifier = Arc::new(notifier);
                            let registered: Arc<dyn ThresholdNotifier> = notifier.clone();
                            self.notifiers.lock().unwrap().push(registered);
                            let manager = self.clone();
                            let mut shutdown_rx = shutdown.subscribe();
                            tokio::spawn(async move {
                                loop {
                                    tokio::select! {
                                        event = events.recv() => match event {
                                            Some(()) => {
                                                info!(
                                                    notifier = %notifier.description(),
                                                    "Memory threshold crossed, synchronizing"
                                                );
                                                manager.synchronize().await;
                                            }
                                            None => break,
                                        },
                                        _ = shutdown_rx.recv() => break,
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            info!(error = %e, "Eviction manager: failed to create memory threshold notifier");
                        }
                    }
                }
            }
        }

        let manager = self.clone();
        let mut shutdown_rx = shutdown.subscribe();
        tokio::spawn(async move {
            info!(
                interval_secs = monitoring_interval.as_secs(),
                "Starting eviction manager loop"
            );
            loop {
                let evicted = manager.synchronize().await;
                if !evicted.is_empty() {
                    info!(
                        pods = ?evicted.iter().map(|p| p.qualified_name()).collect::<Vec<_>>(),
                        "Eviction manager: pods evicted, waiting for pod to be cleaned up"
                    );
                    manager.wait_for_pods_cleanup(&evicted).await;
                } else {
                    tokio::select! {
                        _ = tokio::time::sleep(monitoring_interval) => {}
                        _ = shutdown_rx.recv() => {
                            info!("Shutting down eviction manager loop");
                            break;
                        }
                    }
                }
            }
        })
    }

    pub fn is_under_memory_pressure(&self) -> bool {
        self.has_condition(NodeConditionType::MemoryPressure)
    }

    pub fn is_under_disk_pressure(&self) -> bool {
        self.has_condition(NodeConditionType::DiskPressure)
    }

    pub fn is_under_pid_pressure(&self) -> bool {
        self.has_condition(NodeConditionType::PidPressure)
    }

    fn has_condition(&self, condition: NodeConditionType) -> bool {
        self.state
            .read()
            .unwrap()
            .node_conditions
            .contains(&condition)
    }

    /// Current pressure state for the read-only HTTP surface.
    pub fn pressure_status(&self) -> PressureStatus {
        let state = self.state.read().unwrap();
        PressureStatus {
            memory_pressure: state
                .node_conditions
                .contains(&NodeConditionType::MemoryPressure),
            disk_pressure: state
                .node_conditions
                .contains(&NodeConditionType::DiskPressure),
            pid_pressure: state
                .node_conditions
                .contains(&NodeConditionType::PidPressure),
            conditions: state.node_conditions.iter().map(|c| c.to_string()).collect(),
        }
    }

    /// Last synchronized observations for the read-only HTTP surface.
    pub fn latest_observations(&self) -> Vec<ObservationRecord> {
        let state = self.state.read().unwrap();
        let mut records: Vec<ObservationRecord> = state
            .last_observations
            .iter()
            .map(|(signal, observation)| ObservationRecord {
                signal: signal.to_string(),
                available: observation.available.to_string(),
                capacity: observation.capacity.map(|c| c.to_string()),
                time: observation.time,
            })
            .collect();
        records.sort_by(|a, b| a.signal.cmp(&b.signal));
        records
    }

    fn admit(&self, attrs: &AdmitAttributes) -> AdmitResult {
        let state = self.state.read().unwrap();
        if state.node_conditions.is_empty() {
            return AdmitResult::admitted();
        }
        // Critical pods are required for node stability and always admitted.
        if attrs.pod.is_critical() {
            return AdmitResult::admitted();
        }

        let only_memory_pressure = state.node_conditions.len() == 1
            && state
                .node_conditions
                .contains(&NodeConditionType::MemoryPressure);
        if only_memory_pressure {
            if attrs.pod.qos_class() != QosClass::BestEffort {
                return AdmitResult::admitted();
            }
            let memory_pressure_taint = Taint {
                key: TAINT_NODE_MEMORY_PRESSURE.to_string(),
                value: String::new(),
                effect: TaintEffect::NoSchedule,
            };
            if attrs.pod.tolerates_taint(&memory_pressure_taint) {
                return AdmitResult::admitted();
            }
        }

        let conditions: Vec<String> = state.node_conditions.iter().map(|c| c.to_string()).collect();
        info!(
            pod = %attrs.pod.qualified_name(),
            node_conditions = ?conditions,
            "Failed to admit pod to node"
        );
        AdmitResult::rejected(
            EVICTION_REASON,
            format!("the node has condition: {}", conditions.join(", ")),
        )
    }

    /// One synchronization round. Re-entrant; concurrent invocations from
    /// notifier tasks are linearized by the state lock, and the action
    /// phase runs on a local snapshot of the decision. Never fails: errors
    /// are logged and the round is skipped.
    pub async fn synchronize(&self) -> Vec<Arc<Pod>> {
        let configured_thresholds = &self.config.thresholds;
        if configured_thresholds.is_empty() && !self.config.local_storage_capacity_isolation {
            return Vec::new();
        }

        debug!("Eviction manager: synchronize housekeeping");

        let dedicated_image_fs = match self.dedicated_image_fs.get().copied() {
            Some(dedicated) => dedicated,
            None => match self.disk_info.has_dedicated_image_fs().await {
                Ok(dedicated) => *self.dedicated_image_fs.get_or_init(|| dedicated),
                Err(e) => {
                    warn!(error = %e, "Eviction manager: failed to probe for dedicated image filesystem");
                    self.record_probe_failure(Probe::SummaryStats, &e);
                    return Vec::new();
                }
            },
        };
        self.rank_funcs
            .get_or_init(|| build_signal_to_rank_func(dedicated_image_fs));
        self.reclaim_actions
            .get_or_init(|| build_signal_to_reclaim_actions(dedicated_image_fs));

        let active_pods = match self.active_pods.active_pods().await {
            Ok(pods) => {
                self.record_probe_success(Probe::ActivePods);
                pods
            }
            Err(e) => {
                warn!(error = %e, "Eviction manager: failed to list active pods");
                self.record_probe_failure(Probe::ActivePods, &e);
                return Vec::new();
            }
        };

        let summary = match self.summary_provider.get(true).await {
            Ok(summary) => {
                self.record_probe_success(Probe::SummaryStats);
                summary
            }
            Err(e) => {
                warn!(error = %e, "Eviction manager: failed to get summary stats");
                self.record_probe_failure(Probe::SummaryStats, &e);
                return Vec::new();
            }
        };

        let now = self.clock.now();
        self.refresh_notifiers(&summary, now);

        let (observations, stats_func) = make_signal_observations(&summary);

        // Thresholds met right now, ignoring grace periods.
        let mut thresholds = thresholds_met(configured_thresholds, &observations, false);

        let (first_observed_prev, conditions_prev) = {
            let state = self.state.read().unwrap();
            // Previously met thresholds stay met until min-reclaim headroom
            // is restored.
            if !state.thresholds_met.is_empty() {
                let not_yet_resolved = thresholds_met(&state.thresholds_met, &observations, true);
                thresholds = merge_thresholds(thresholds, not_yet_resolved);
            }
            (
                state.thresholds_first_observed_at.clone(),
                state.node_conditions_last_observed_at.clone(),
            )
        };

        let first_observed_at = thresholds_first_observed_at(&thresholds, &first_observed_prev, now);

        let observed_conditions = node_conditions(&thresholds);
        let conditions_last_observed_at =
            node_conditions_last_observed_at(&observed_conditions, &conditions_prev, now);
        let reported_conditions = node_conditions_observed_since(
            &conditions_last_observed_at,
            self.config.pressure_transition_period,
            now,
        );
        if !reported_conditions.is_empty() {
            debug!(conditions = ?reported_conditions, "Eviction manager: node conditions observed");
        }

        let met_thresholds = thresholds_met_grace_period(&first_observed_at, now);

        let actionable_thresholds = {
            let mut state = self.state.write().unwrap();
            state.node_conditions = reported_conditions;
            state.thresholds_first_observed_at = first_observed_at;
            state.node_conditions_last_observed_at = conditions_last_observed_at;
            state.thresholds_met = met_thresholds.clone();
            // Only act on thresholds whose stats advanced since last round.
            let updated =
                thresholds_updated_stats(&met_thresholds, &observations, &state.last_observations);
            state.last_observations = observations.clone();
            updated
        };
        // The round's evaluation is committed, whatever action follows.
        self.record_probe_success(Probe::Synchronize);

        // Per-pod local storage limits are enforced independently of node
        // thresholds; any violation preempts threshold eviction this round.
        if self.config.local_storage_capacity_isolation {
            let evicted = self
                .local_storage_eviction(&active_pods, &stats_func, dedicated_image_fs)
                .await;
            if !evicted.is_empty() {
                return evicted;
            }
        }

        if actionable_thresholds.is_empty() {
            debug!("Eviction manager: no resources are starved");
            return Vec::new();
        }

        let mut ranked_thresholds = actionable_thresholds;
        sort_by_eviction_priority(&mut ranked_thresholds);
        let Some((threshold_to_reclaim, resource_to_reclaim)) =
            get_reclaimable_threshold(&ranked_thresholds)
        else {
            return Vec::new();
        };
        info!(resource = %resource_to_reclaim, "Eviction manager: attempting to reclaim");

        self.recorder.event(
            &self.node_ref,
            EventType::Warning,
            EVICTION_THRESHOLD_MET_REASON,
            &format!("Attempting to reclaim {resource_to_reclaim}"),
        );

        // Node-level reclaim may relieve pressure without touching pods.
        if self
            .reclaim_node_level_resources(threshold_to_reclaim.signal, &resource_to_reclaim)
            .await
        {
            info!(
                resource = %resource_to_reclaim,
                "Eviction manager: able to reduce resource pressure without evicting pods"
            );
            return Vec::new();
        }

        info!(
            resource = %resource_to_reclaim,
            "Eviction manager: must evict pod(s) to reclaim"
        );

        let Some(rank) = self
            .rank_funcs
            .get()
            .and_then(|funcs| funcs.get(&threshold_to_reclaim.signal))
        else {
            error!(
                signal = %threshold_to_reclaim.signal,
                "Eviction manager: no ranking function for signal"
            );
            if let Some(health) = &self.health {
                health.record_failure(
                    Probe::Synchronize,
                    &format!("no ranking function for signal {}", threshold_to_reclaim.signal),
                );
            }
            return Vec::new();
        };

        if active_pods.is_empty() {
            error!("Eviction manager: eviction thresholds have been met, but no pods are active to evict");
            return Vec::new();
        }

        let mut candidates = active_pods;
        rank(&mut candidates, &stats_func);
        debug!(
            pods = ?candidates.iter().map(|p| p.qualified_name()).collect::<Vec<_>>(),
            "Eviction manager: pods ranked for eviction"
        );

        // Record how stale the stats behind each acted-on threshold were.
        for threshold in &ranked_thresholds {
            if let Some(time) = observations.get(&threshold.signal).and_then(|o| o.time) {
                let age = now.signed_duration_since(time).to_std().unwrap_or_default();
                self.metrics
                    .observe_stats_age(threshold.signal, age.as_secs_f64());
            }
        }

        // Hard thresholds kill immediately; soft thresholds grant the
        // configured maximum grace.
        let grace_period_override = if threshold_to_reclaim.is_hard() {
            0
        } else {
            self.config.max_pod_grace_period_seconds
        };

        // At most one pod is killed per round.
        for pod in &candidates {
            let (message, annotations) =
                eviction_message(&resource_to_reclaim, pod, &stats_func);
            let condition = self
                .config
                .feature_gates
                .pod_disruption_conditions
                .then(|| PodCondition {
                    condition_type: DISRUPTION_TARGET_CONDITION.to_string(),
                    status: "True".to_string(),
                    reason: TERMINATION_BY_KUBELET_REASON.to_string(),
                    message: message.clone(),
                });
            if self
                .evict_pod(pod, grace_period_override, message, annotations, condition)
                .await
            {
                self.metrics.inc_evictions(threshold_to_reclaim.signal);
                return vec![pod.clone()];
            }
        }
        info!("Eviction manager: unable to evict any pods from the node");
        Vec::new()
    }

    fn record_probe_success(&self, probe: Probe) {
        if let Some(health) = &self.health {
            health.record_success(probe);
        }
    }

    fn record_probe_failure(&self, probe: Probe, error: &anyhow::Error) {
        if let Some(health) = &self.health {
            health.record_failure(probe, &error.to_string());
        }
    }

    /// Push fresh capacity to the kernel notifiers every refresh interval.
    fn refresh_notifiers(&self, summary: &crate::stats::Summary, now: DateTime<Utc>) {
        let due = {
            let mut state = self.state.write().unwrap();
            let due = state.notifiers_last_updated.map_or(true, |last| {
                now.signed_duration_since(last).to_std().unwrap_or_default()
                    > NOTIFIER_REFRESH_INTERVAL
            });
            if due {
                state.notifiers_last_updated = Some(now);
            }
            due
        };
        if !due {
            return;
        }
        let notifiers = self.notifiers.lock().unwrap().clone();
        for notifier in notifiers {
            if let Err(e) = notifier.update_threshold(summary) {
                info!(
                    notifier = %notifier.description(),
                    error = %e,
                    "Eviction manager: failed to update notifier"
                );
            }
        }
    }

    /// Run the signal's reclaim actions, then re-sample once and re-check
    /// thresholds with min-reclaim enforced. True means pressure is gone
    /// and no pod needs to die this round.
    async fn reclaim_node_level_resources(
        &self,
        signal: Signal,
        resource: &ResourceName,
    ) -> bool {
        let actions = self
            .reclaim_actions
            .get()
            .and_then(|map| map.get(&signal))
            .cloned()
            .unwrap_or_default();
        for action in &actions {
            if let Err(e) = action.run(&*self.image_gc, &*self.container_gc).await {
                info!(
                    resource = %resource,
                    action = action.describe(),
                    error = %e,
                    "Eviction manager: unexpected error when attempting to reduce resource pressure"
                );
            }
        }
        if actions.is_empty() {
            return false;
        }

        let summary = match self.summary_provider.get(true).await {
            Ok(summary) => summary,
            Err(e) => {
                warn!(error = %e, "Eviction manager: failed to get summary stats after resource reclaim");
                return false;
            }
        };
        let (observations, _) = make_signal_observations(&summary);
        let still_met = thresholds_met(&self.config.thresholds, &observations, true);
        still_met.is_empty()
    }

    /// Enforce per-pod local storage limits. All violators found in one
    /// pass are evicted; checks short-circuit per pod at the first
    /// violation.
    async fn local_storage_eviction(
        &self,
        pods: &[Arc<Pod>],
        stats_func: &StatsFunc,
        dedicated_image_fs: bool,
    ) -> Vec<Arc<Pod>> {
        let mut evicted = Vec::new();
        for pod in pods {
            let Some(pod_stats) = stats_func(pod) else {
                continue;
            };

            if self.empty_dir_limit_eviction(&pod_stats, pod).await {
                evicted.push(pod.clone());
                continue;
            }

            if self.pod_ephemeral_storage_limit_eviction(&pod_stats, pod).await {
                evicted.push(pod.clone());
                continue;
            }

            if self
                .container_ephemeral_storage_limit_eviction(&pod_stats, pod, dedicated_image_fs)
                .await
            {
                evicted.push(pod.clone());
            }
        }
        evicted
    }

    async fn empty_dir_limit_eviction(&self, pod_stats: &PodStats, pod: &Arc<Pod>) -> bool {
        let volume_used: HashMap<&str, u64> = pod_stats
            .volume_stats
            .iter()
            .filter_map(|v| v.fs.used_bytes.map(|used| (v.name.as_str(), used)))
            .collect();

        for volume in &pod.volumes {
            let Some(empty_dir) = &volume.empty_dir else {
                continue;
            };
            let Some(size_limit) = empty_dir.size_limit.filter(|limit| limit.is_positive()) else {
                continue;
            };
            let Some(used) = volume_used.get(volume.name.as_str()) else {
                continue;
            };
            if Quantity::from_value(*used as i64) > size_limit {
                let message = format!(
                    "Usage of EmptyDir volume \"{}\" exceeds the limit \"{}\". ",
                    volume.name, size_limit
                );
                if self
                    .evict_pod(pod, 0, message, HashMap::new(), None)
                    .await
                {
                    self.metrics.inc_evictions(Signal::EmptyDirFsLimit);
                    return true;
                }
                return false;
            }
        }
        false
    }

    async fn pod_ephemeral_storage_limit_eviction(
        &self,
        pod_stats: &PodStats,
        pod: &Arc<Pod>,
    ) -> bool {
        let mut limit = Quantity::zero();
        let mut limited = false;
        for container in &pod.containers {
            if let Some(container_limit) = container.limits.get(&ResourceName::EphemeralStorage) {
                limit = limit + *container_limit;
                limited = true;
            }
        }
        if !limited {
            return false;
        }
        if let Some(overhead) = pod.overhead.get(&ResourceName::EphemeralStorage) {
            limit = limit + *overhead;
        }

        let used = pod_stats
            .ephemeral_storage
            .as_ref()
            .and_then(|fs| fs.used_bytes)
            .unwrap_or(0);
        if Quantity::from_value(used as i64) > limit {
            let message = format!(
                "Pod ephemeral local storage usage exceeds the total limit of containers {limit}. "
            );
            if self.evict_pod(pod, 0, message, HashMap::new(), None).await {
                self.metrics.inc_evictions(Signal::EphemeralPodFsLimit);
                return true;
            }
            return false;
        }
        false
    }

    async fn container_ephemeral_storage_limit_eviction(
        &self,
        pod_stats: &PodStats,
        pod: &Arc<Pod>,
        dedicated_image_fs: bool,
    ) -> bool {
        let limits: HashMap<&str, Quantity> = pod
            .containers
            .iter()
            .filter_map(|c| {
                c.limits
                    .get(&ResourceName::EphemeralStorage)
                    .filter(|limit| limit.is_positive())
                    .map(|limit| (c.name.as_str(), *limit))
            })
            .collect();

        for container_stats in &pod_stats.containers {
            let Some(limit) = limits.get(container_stats.name.as_str()) else {
                continue;
            };
            // Without a dedicated image filesystem the writable layer also
            // lands on the node filesystem and counts against the limit.
            let used = container_disk_usage(container_stats, !dedicated_image_fs);
            if used > *limit {
                let message = format!(
                    "Container {} exceeded its local ephemeral storage limit \"{limit}\". ",
                    container_stats.name
                );
                if self.evict_pod(pod, 0, message, HashMap::new(), None).await {
                    self.metrics.inc_evictions(Signal::EphemeralContainerFsLimit);
                    return true;
                }
                return false;
            }
        }
        false
    }

    /// Kill one pod. Refuses critical pods, records the eviction event,
    /// and returns true iff the kill primitive succeeded.
    async fn evict_pod(
        &self,
        pod: &Arc<Pod>,
        grace_period_override: i64,
        message: String,
        annotations: HashMap<String, String>,
        condition: Option<PodCondition>,
    ) -> bool {
        if pod.is_critical() {
            error!(
                pod = %pod.qualified_name(),
                "Eviction manager: cannot evict a critical pod"
            );
            return false;
        }

        // Static pods are mirrored into cluster state; events land on the
        // mirror so they are visible through the API.
        let event_ref = if pod.is_static() {
            self.mirror_pods
                .as_ref()
                .and_then(|provider| provider.mirror_pod(pod))
                .map(|mirror| ObjectRef::pod(&mirror))
                .unwrap_or_else(|| ObjectRef::pod(pod))
        } else {
            ObjectRef::pod(pod)
        };
        self.recorder.annotated_event(
            &event_ref,
            &annotations,
            EventType::Warning,
            EVICTION_REASON,
            &message,
        );

        debug!(
            pod = %pod.qualified_name(),
            uid = %pod.uid,
            message = %message,
            "Evicting pod"
        );
        let status = PodStatusPatch {
            phase: PodPhase::Failed,
            reason: EVICTION_REASON.to_string(),
            message: message.clone(),
            condition,
        };
        match self
            .pod_killer
            .kill_pod(pod, true, Some(grace_period_override), status)
            .await
        {
            Ok(()) => {
                info!(pod = %pod.qualified_name(), "Eviction manager: pod is evicted successfully");
                true
            }
            Err(e) => {
                warn!(
                    pod = %pod.qualified_name(),
                    error = %e,
                    "Eviction manager: pod failed to evict"
                );
                false
            }
        }
    }

    /// Block until the evicted pods' resources are released, bounded by
    /// the cleanup timeout.
    async fn wait_for_pods_cleanup(&self, pods: &[Arc<Pod>]) {
        let wait = async {
            loop {
                tokio::time::sleep(POD_CLEANUP_POLL_FREQ).await;
                let mut all_cleaned = true;
                for pod in pods {
                    if !self.cleanup_checker.pod_cleaned_up(pod).await {
                        all_cleaned = false;
                        break;
                    }
                }
                if all_cleaned {
                    return;
                }
            }
        };
        match tokio::time::timeout(POD_CLEANUP_TIMEOUT, wait).await {
            Ok(()) => info!("Eviction manager: pods successfully cleaned up"),
            Err(_) => {
                info!("Eviction manager: timed out waiting for pods to be cleaned up");
            }
        }
    }
}

/// Message and event annotations for a threshold eviction, enumerating
/// containers using more of the starved resource than they requested.
fn eviction_message(
    resource: &ResourceName,
    pod: &Pod,
    stats_func: &StatsFunc,
) -> (String, HashMap<String, String>) {
    let mut message = format!("The node was low on resource: {resource}. ");
    let mut offending_containers = Vec::new();
    let mut offending_usage = Vec::new();

    if let Some(pod_stats) = stats_func(pod) {
        for container in &pod.containers {
            let Some(request) = container.requests.get(resource) else {
                continue;
            };
            let usage = pod_stats
                .containers
                .iter()
                .find(|cs| cs.name == container.name)
                .and_then(|cs| match resource {
                    ResourceName::Memory => cs
                        .memory
                        .as_ref()
                        .and_then(|m| m.working_set_bytes)
                        .map(|b| Quantity::from_value(b as i64)),
                    ResourceName::EphemeralStorage => {
                        Some(container_disk_usage(cs, true))
                    }
                    _ => None,
                });
            if let Some(usage) = usage {
                if usage > *request {
                    message.push_str(&format!(
                        "Container {} was using {}, which exceeds its request of {}. ",
                        container.name, usage, request
                    ));
                    offending_containers.push(container.name.clone());
                    offending_usage.push(usage.to_string());
                }
            }
        }
    }

    let mut annotations = HashMap::new();
    annotations.insert(
        OFFENDING_CONTAINERS_KEY.to_string(),
        offending_containers.join(","),
    );
    annotations.insert(
        OFFENDING_CONTAINERS_USAGE_KEY.to_string(),
        offending_usage.join(","),
    );
    annotations.insert(STARVED_RESOURCE_KEY.to_string(), resource.to_string());
    (message, annotations)
}
