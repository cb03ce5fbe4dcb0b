use std::{fmt::Debug, net::IpAddr, time::Duration};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Node, Pod, Service};
use kube::{
    api::ListParams,
    config::{KubeConfigOptions, Kubeconfig},
    Api, Client, Config,
};
use tracing::{debug, warn};

use crate::config::KubeNamespace;

/// What the pipelines read back from a running cluster.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Block until at least `expected` nodes exist and every node is Ready.
    async fn wait_nodes_ready(
        &self,
        expected: usize,
        timeout: Duration,
        poll: Duration,
    ) -> anyhow::Result<()>;

    async fn workload_status(&self, namespace: &KubeNamespace) -> anyhow::Result<WorkloadStatus>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodState {
    pub name: String,
    pub phase: String,
    pub ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceState {
    pub name: String,
    pub kind: String,
    pub ports: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadStatus {
    pub pods: Vec<PodState>,
    pub services: Vec<ServiceState>,
}

impl WorkloadStatus {
    pub fn not_running(&self) -> impl Iterator<Item = &PodState> {
        self.pods
            .iter()
            .filter(|p| !(p.phase == "Running" && p.ready) && p.phase != "Succeeded")
    }
}

/// Builds a [`ClusterApi`] once the cluster exists and has a kubeconfig.
#[async_trait]
pub trait ClusterConnector: Send + Sync {
    async fn connect(&self, kubeconfig_yaml: &str) -> anyhow::Result<Box<dyn ClusterApi>>;
}

pub struct KubeConnector;

#[async_trait]
impl ClusterConnector for KubeConnector {
    async fn connect(&self, kubeconfig_yaml: &str) -> anyhow::Result<Box<dyn ClusterApi>> {
        Ok(Box::new(KubeCluster::from_kubeconfig_yaml(kubeconfig_yaml).await?))
    }
}

/// A kind cluster reached through the admin kubeconfig kind hands out.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub async fn from_kubeconfig_yaml(yaml: &str) -> anyhow::Result<Self> {
        let kubeconfig = Kubeconfig::from_yaml(yaml)?;
        let mut config =
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default()).await?;
        pin_tls_server_name(&mut config);
        Ok(Self {
            client: Client::try_from(config)?,
        })
    }
}

/// kind serves its api on `https://127.0.0.1:<port>` and rustls refuses to
/// verify a certificate for an ip address. The apiserver certificate also
/// names `localhost`, so verify against that.
fn pin_tls_server_name(config: &mut Config) {
    if config.tls_server_name.is_some() {
        return;
    }
    let ip_host = config
        .cluster_url
        .host()
        .map(|h| h.trim_start_matches('[').trim_end_matches(']'))
        .map_or(false, |h| h.parse::<IpAddr>().is_ok());
    if ip_host {
        config.tls_server_name = Some("localhost".to_string());
    }
}

/// Consecutive list failures before the readiness wait stops being quiet about them.
const LIST_FAILURES_BEFORE_WARN: u32 = 3;

/// Poll until the node list satisfies `expected`, recording in `last_seen`
/// what the api server last said.
async fn poll_nodes(nodes: &Api<Node>, expected: usize, poll: Duration, last_seen: &mut String) {
    let mut failures = 0;
    loop {
        match nodes.list(&ListParams::default()).await {
            Ok(list) => {
                failures = 0;
                let total = list.items.len();
                let ready = list.items.iter().filter(|n| node_ready(n)).count();
                debug!("{}/{} nodes ready", ready, total);
                if total >= expected && ready == total {
                    return;
                }
                *last_seen = format!("{} of {} nodes ready, expected {}", ready, total, expected);
            }
            Err(e) => {
                failures += 1;
                // the api server may still be coming up
                if failures == LIST_FAILURES_BEFORE_WARN {
                    warn!("listing nodes keeps failing: {}", e);
                } else {
                    debug!("listing nodes failed: {}", e);
                }
                *last_seen = format!("last error: {}", e);
            }
        }
        tokio::time::sleep(poll).await;
    }
}

impl Debug for KubeCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KubeCluster")
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn wait_nodes_ready(
        &self,
        expected: usize,
        timeout: Duration,
        poll: Duration,
    ) -> anyhow::Result<()> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let mut last_seen = "no answer from the api server".to_string();
        let waited =
            tokio::time::timeout(timeout, poll_nodes(&nodes, expected, poll, &mut last_seen)).await;
        match waited {
            Ok(()) => Ok(()),
            Err(_) => anyhow::bail!(
                "nodes were not ready within {}s: {}",
                timeout.as_secs(),
                last_seen
            ),
        }
    }

    async fn workload_status(&self, namespace: &KubeNamespace) -> anyhow::Result<WorkloadStatus> {
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace.as_str());
        let services: Api<Service> = Api::namespaced(self.client.clone(), namespace.as_str());
        let pods = pods.list(&ListParams::default()).await?;
        let services = services.list(&ListParams::default()).await?;
        Ok(WorkloadStatus {
            pods: pods.items.iter().map(pod_state).collect(),
            services: services.items.iter().map(service_state).collect(),
        })
    }
}

pub fn node_ready(node: &Node) -> bool {
    node.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .map(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
        .unwrap_or(false)
}

fn pod_state(pod: &Pod) -> PodState {
    let status = pod.status.as_ref();
    let ready = status
        .and_then(|s| s.container_statuses.as_ref())
        .map(|cs| !cs.is_empty() && cs.iter().all(|c| c.ready))
        .unwrap_or(false);
    PodState {
        name: pod.metadata.name.clone().unwrap_or_default(),
        phase: status
            .and_then(|s| s.phase.clone())
            .unwrap_or_else(|| "Unknown".to_string()),
        ready,
    }
}

fn service_state(service: &Service) -> ServiceState {
    let spec = service.spec.as_ref();
    ServiceState {
        name: service.metadata.name.clone().unwrap_or_default(),
        kind: spec
            .and_then(|s| s.type_.clone())
            .unwrap_or_else(|| "ClusterIP".to_string()),
        ports: spec
            .and_then(|s| s.ports.as_ref())
            .map(|ports| {
                ports
                    .iter()
                    .map(|p| match p.node_port {
                        Some(node_port) => format!(
                            "{}:{}/{}",
                            p.port,
                            node_port,
                            p.protocol.as_deref().unwrap_or("TCP")
                        ),
                        None => format!("{}/{}", p.port, p.protocol.as_deref().unwrap_or("TCP")),
                    })
                    .collect()
            })
            .unwrap_or_default(),
    }
}
