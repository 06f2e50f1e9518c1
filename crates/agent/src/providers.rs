//! Concrete providers wired into the eviction manager
//!
//! The kubelet serves the usage snapshots and the active pod list; the
//! API server carries out evictions and answers cleanup checks. Events
//! are recorded through structured logs.

use anyhow::{Context, Result};
use async_trait::async_trait;
use eviction_lib::models::{
    Container, EmptyDirVolumeSource, Pod, ResourceList, StorageMedium, TaintEffect, Toleration,
    TolerationOperator, Volume,
};
use eviction_lib::stats::Summary;
use eviction_lib::types::{
    ActivePodsProvider, DiskInfoProvider, EventRecorder, EventType, ObjectRef,
    PodCleanupChecker, PodKiller, PodStatusPatch, SummaryProvider,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Client for the kubelet's stats and pod endpoints.
pub struct KubeletClient {
    client: Client,
    base_url: Url,
}

impl KubeletClient {
    pub fn new(endpoint: &str, insecure_tls: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .danger_accept_invalid_certs(insecure_tls)
            .build()
            .context("Failed to create kubelet HTTP client")?;
        let base_url = Url::parse(endpoint).context("Invalid kubelet endpoint")?;
        Ok(Self { client, base_url })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = self.base_url.join(path).context("Invalid path")?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .context("Failed to send request to kubelet")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("kubelet error ({status}): {body}");
        }
        response.json().await.context("Failed to parse kubelet response")
    }
}

#[async_trait]
impl SummaryProvider for KubeletClient {
    async fn get(&self, _update_stats: bool) -> Result<Summary> {
        self.get_json("/stats/summary").await
    }
}

#[async_trait]
impl DiskInfoProvider for KubeletClient {
    /// The summary reports an image filesystem entry only when the runtime
    /// keeps images on their own device.
    async fn has_dedicated_image_fs(&self) -> Result<bool> {
        let summary: Summary = self.get_json("/stats/summary").await?;
        let image_fs = summary.node.runtime.as_ref().and_then(|r| r.image_fs.as_ref());
        let node_fs = summary.node.fs.as_ref();
        let dedicated = match (image_fs, node_fs) {
            (Some(image), Some(node)) => image.capacity_bytes != node.capacity_bytes,
            (Some(_), None) => true,
            _ => false,
        };
        Ok(dedicated)
    }
}

#[async_trait]
impl ActivePodsProvider for KubeletClient {
    async fn active_pods(&self) -> Result<Vec<Arc<Pod>>> {
        let pod_list: KubePodList = self.get_json("/pods").await?;
        let pods = pod_list
            .items
            .into_iter()
            .filter(|p| {
                !matches!(
                    p.status.phase.as_deref(),
                    Some("Succeeded") | Some("Failed")
                )
            })
            .map(|p| Arc::new(p.into_pod()))
            .collect();
        Ok(pods)
    }
}

/// Client for the Kubernetes API server's eviction and pod endpoints.
pub struct ApiServerClient {
    client: Client,
    base_url: Url,
    token: Option<String>,
}

impl ApiServerClient {
    pub fn new(endpoint: &str, token_path: &str, insecure_tls: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(insecure_tls)
            .build()
            .context("Failed to create API server HTTP client")?;
        let base_url = Url::parse(endpoint).context("Invalid API server endpoint")?;
        let token = match std::fs::read_to_string(token_path) {
            Ok(token) => Some(token.trim().to_string()),
            Err(e) => {
                warn!(path = token_path, error = %e, "Service account token unavailable");
                None
            }
        };
        Ok(Self {
            client,
            base_url,
            token,
        })
    }

    fn request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    fn pod_url(&self, namespace: &str, name: &str, subresource: &str) -> Result<Url> {
        let path = format!("/api/v1/namespaces/{namespace}/pods/{name}{subresource}");
        self.base_url.join(&path).context("Invalid pod path")
    }
}

#[async_trait]
impl PodKiller for ApiServerClient {
    async fn kill_pod(
        &self,
        pod: &Pod,
        _is_evicted: bool,
        grace_period_override: Option<i64>,
        status: PodStatusPatch,
    ) -> Result<()> {
        // The status patch is best effort; the eviction itself decides
        // success.
        let status_url = self.pod_url(&pod.namespace, &pod.name, "/status")?;
        let patch = serde_json::json!({ "status": status_body(&status) });
        let patch_result = self
            .request(self.client.patch(status_url))
            .header("content-type", "application/strategic-merge-patch+json")
            .json(&patch)
            .send()
            .await;
        if let Err(e) = patch_result {
            debug!(pod = %pod.qualified_name(), error = %e, "Failed to patch pod status before eviction");
        }

        let eviction_url = self.pod_url(&pod.namespace, &pod.name, "/eviction")?;
        let eviction = serde_json::json!({
            "apiVersion": "policy/v1",
            "kind": "Eviction",
            "metadata": { "name": pod.name, "namespace": pod.namespace },
            "deleteOptions": { "gracePeriodSeconds": grace_period_override },
        });
        let response = self
            .request(self.client.post(eviction_url))
            .json(&eviction)
            .send()
            .await
            .context("Failed to send eviction request")?;
        if !response.status().is_success() {
            let status_code = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("eviction rejected ({status_code}): {body}");
        }
        Ok(())
    }
}

#[async_trait]
impl PodCleanupChecker for ApiServerClient {
    async fn pod_cleaned_up(&self, pod: &Pod) -> bool {
        let Ok(url) = self.pod_url(&pod.namespace, &pod.name, "") else {
            return false;
        };
        match self.request(self.client.get(url)).send().await {
            Ok(response) => response.status() == StatusCode::NOT_FOUND,
            Err(_) => false,
        }
    }
}

fn status_body(status: &PodStatusPatch) -> serde_json::Value {
    let mut body = serde_json::json!({
        "phase": "Failed",
        "reason": status.reason,
        "message": status.message,
    });
    if let Some(condition) = &status.condition {
        body["conditions"] = serde_json::json!([condition]);
    }
    body
}

/// Node-level garbage collection through the CRI command-line client.
pub struct CrictlGc {
    crictl_path: String,
}

impl CrictlGc {
    pub fn new(crictl_path: impl Into<String>) -> Self {
        Self {
            crictl_path: crictl_path.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<()> {
        let output = tokio::process::Command::new(&self.crictl_path)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to run {} {}", self.crictl_path, args.join(" ")))?;
        if !output.status.success() {
            anyhow::bail!(
                "{} {} failed: {}",
                self.crictl_path,
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}

#[async_trait]
impl eviction_lib::reclaim::ImageGc for CrictlGc {
    async fn delete_unused_images(&self) -> Result<()> {
        self.run(&["rmi", "--prune"]).await
    }
}

#[async_trait]
impl eviction_lib::reclaim::ContainerGc for CrictlGc {
    async fn delete_all_unused_containers(&self) -> Result<()> {
        // rm without --force only removes exited containers.
        self.run(&["rm", "--all"]).await
    }
}

/// Records events as structured log lines.
pub struct LogEventRecorder;

impl EventRecorder for LogEventRecorder {
    fn event(&self, object: &ObjectRef, event_type: EventType, reason: &str, message: &str) {
        info!(
            event = "cluster_event",
            kind = %object.kind,
            object = %object.name,
            namespace = %object.namespace,
            event_type = ?event_type,
            reason = %reason,
            message = %message,
            "Recorded event"
        );
    }

    fn annotated_event(
        &self,
        object: &ObjectRef,
        annotations: &HashMap<String, String>,
        event_type: EventType,
        reason: &str,
        message: &str,
    ) {
        if annotations.is_empty() {
            self.event(object, event_type, reason, message);
            return;
        }
        info!(
            event = "cluster_event",
            kind = %object.kind,
            object = %object.name,
            namespace = %object.namespace,
            event_type = ?event_type,
            reason = %reason,
            message = %message,
            annotations = ?annotations,
            "Recorded event"
        );
    }
}

// Pod list shapes as served by the kubelet's /pods endpoint.

#[derive(Debug, Deserialize)]
struct KubePodList {
    #[serde(default)]
    items: Vec<KubePod>,
}

#[derive(Debug, Deserialize)]
struct KubePod {
    metadata: KubeMetadata,
    #[serde(default)]
    spec: KubePodSpec,
    #[serde(default)]
    status: KubePodStatus,
}

#[derive(Debug, Default, Deserialize)]
struct KubeMetadata {
    name: String,
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    uid: String,
    #[serde(default)]
    annotations: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubePodSpec {
    #[serde(default)]
    containers: Vec<KubeContainer>,
    #[serde(default)]
    init_containers: Vec<KubeContainer>,
    #[serde(default)]
    volumes: Vec<KubeVolume>,
    #[serde(default)]
    tolerations: Vec<KubeToleration>,
    #[serde(default)]
    priority: Option<i32>,
    #[serde(default)]
    overhead: HashMap<String, String>,
}

#[derive(Debug, Default, Deserialize)]
struct KubePodStatus {
    #[serde(default)]
    phase: Option<String>,
}

#[derive(Debug, Deserialize)]
struct KubeContainer {
    name: String,
    #[serde(default)]
    resources: KubeResources,
}

#[derive(Debug, Default, Deserialize)]
struct KubeResources {
    #[serde(default)]
    requests: HashMap<String, String>,
    #[serde(default)]
    limits: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubeVolume {
    name: String,
    #[serde(default)]
    empty_dir: Option<KubeEmptyDir>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KubeEmptyDir {
    #[serde(default)]
    medium: Option<String>,
    #[serde(default)]
    size_limit: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
struct KubeToleration {
    #[serde(default)]
    key: Option<String>,
    #[serde(default)]
    operator: Option<String>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    effect: Option<String>,
}

fn resource_list(raw: &HashMap<String, String>) -> ResourceList {
    raw.iter()
        .filter_map(|(name, value)| {
            let quantity = match value.parse() {
                Ok(quantity) => quantity,
                Err(e) => {
                    debug!(resource = %name, value = %value, error = %e, "Skipping unparseable quantity");
                    return None;
                }
            };
            name.parse().ok().map(|resource| (resource, quantity))
        })
        .collect()
}

impl KubePod {
    fn into_pod(self) -> Pod {
        let containers = |list: Vec<KubeContainer>| -> Vec<Container> {
            list.into_iter()
                .map(|c| Container {
                    name: c.name,
                    requests: resource_list(&c.resources.requests),
                    limits: resource_list(&c.resources.limits),
                })
                .collect()
        };

        Pod {
            name: self.metadata.name,
            namespace: self.metadata.namespace,
            uid: self.metadata.uid,
            annotations: self.metadata.annotations,
            priority: self.spec.priority,
            containers: containers(self.spec.containers),
            init_containers: containers(self.spec.init_containers),
            overhead: resource_list(&self.spec.overhead),
            volumes: self
                .spec
                .volumes
                .into_iter()
                .map(|v| Volume {
                    name: v.name,
                    empty_dir: v.empty_dir.map(|e| EmptyDirVolumeSource {
                        medium: match e.medium.as_deref() {
                            Some("Memory") => StorageMedium::Memory,
                            _ => StorageMedium::Default,
                        },
                        size_limit: e.size_limit.and_then(|s| s.parse().ok()),
                    }),
                })
                .collect(),
            tolerations: self
                .spec
                .tolerations
                .into_iter()
                .map(|t| Toleration {
                    key: t.key,
                    operator: match t.operator.as_deref() {
                        Some("Exists") => TolerationOperator::Exists,
                        _ => TolerationOperator::Equal,
                    },
                    value: t.value,
                    effect: match t.effect.as_deref() {
                        Some("NoSchedule") => Some(TaintEffect::NoSchedule),
                        Some("PreferNoSchedule") => Some(TaintEffect::PreferNoSchedule),
                        Some("NoExecute") => Some(TaintEffect::NoExecute),
                        _ => None,
                    },
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eviction_lib::models::ResourceName;

    #[test]
    fn test_kube_pod_conversion() {
        let raw = r#"{
            "items": [
                {
                    "metadata": {
                        "name": "web",
                        "namespace": "default",
                        "uid": "u1",
                        "annotations": {"kubernetes.io/config.source": "api"}
                    },
                    "spec": {
                        "priority": 100,
                        "containers": [
                            {
                                "name": "app",
                                "resources": {
                                    "requests": {"cpu": "100m", "memory": "128Mi"},
                                    "limits": {"memory": "256Mi", "ephemeral-storage": "1Gi"}
                                }
                            }
                        ],
                        "volumes": [
                            {"name": "scratch", "emptyDir": {"sizeLimit": "1Gi"}},
                            {"name": "ram", "emptyDir": {"medium": "Memory"}}
                        ],
                        "tolerations": [
                            {"key": "node.kubernetes.io/memory-pressure", "operator": "Exists", "effect": "NoSchedule"}
                        ]
                    },
                    "status": {"phase": "Running"}
                }
            ]
        }"#;

        let list: KubePodList = serde_json::from_str(raw).unwrap();
        let pod = list.items.into_iter().next().unwrap().into_pod();

        assert_eq!(pod.name, "web");
        assert_eq!(pod.priority, Some(100));
        assert_eq!(
            pod.containers[0]
                .requests
                .get(&ResourceName::Cpu)
                .unwrap()
                .milli_value(),
            100
        );
        assert_eq!(
            pod.containers[0]
                .limits
                .get(&ResourceName::EphemeralStorage)
                .unwrap()
                .value(),
            1 << 30
        );
        assert_eq!(pod.volumes.len(), 2);
        assert_eq!(
            pod.volumes[1].empty_dir.as_ref().unwrap().medium,
            StorageMedium::Memory
        );
        assert_eq!(pod.tolerations.len(), 1);
        assert!(!pod.is_critical());
    }

    #[test]
    fn test_unparseable_quantities_are_skipped() {
        let raw: HashMap<String, String> = [
            ("memory".to_string(), "128Mi".to_string()),
            ("cpu".to_string(), "not-a-number".to_string()),
        ]
        .into_iter()
        .collect();
        let list = resource_list(&raw);
        assert_eq!(list.len(), 1);
        assert!(list.contains_key(&ResourceName::Memory));
    }
}
