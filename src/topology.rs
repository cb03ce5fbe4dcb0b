use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const WORKER_NODES: usize = 2;

/// kind cluster descriptor, `kind.x-k8s.io/v1alpha4`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct KindCluster {
    pub kind: String,
    pub api_version: String,
    pub nodes: Vec<Node>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub role: Role,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_port_mappings: Vec<PortMapping>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    ControlPlane,
    Worker,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PortMapping {
    pub container_port: u16,
    pub host_port: u16,
    pub protocol: String,
}

impl PortMapping {
    fn tcp(port: u16) -> Self {
        Self {
            container_port: port,
            host_port: port,
            protocol: "TCP".to_string(),
        }
    }
}

impl KindCluster {
    /// One control plane exposing `service_port` and `aux_ports` on the
    /// host, plus the workers. A port listed twice is mapped once.
    pub fn new(service_port: u16, aux_ports: &[u16]) -> Self {
        let mut ports = vec![service_port];
        for port in aux_ports {
            if !ports.contains(port) {
                ports.push(*port);
            }
        }

        let control_plane = Node {
            role: Role::ControlPlane,
            extra_port_mappings: ports.into_iter().map(PortMapping::tcp).collect(),
        };
        let workers = (0..WORKER_NODES).map(|_| Node {
            role: Role::Worker,
            extra_port_mappings: Vec::new(),
        });

        Self {
            kind: "Cluster".to_string(),
            api_version: "kind.x-k8s.io/v1alpha4".to_string(),
            nodes: std::iter::once(control_plane).chain(workers).collect(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn to_yaml(&self) -> anyhow::Result<String> {
        Ok(serde_yaml::to_string(self)?)
    }
}

/// The descriptor on disk. The file lives exactly as long as this value,
/// so it is removed however the pipeline ends, including cancellation.
#[derive(Debug)]
pub struct TopologyFile {
    path: PathBuf,
}

impl TopologyFile {
    pub fn write(path: &Path, cluster: &KindCluster) -> anyhow::Result<Self> {
        let yaml = cluster.to_yaml()?;
        std::fs::write(path, yaml)
            .with_context(|| format!("failed to write cluster config to {}", path.display()))?;
        debug!("wrote cluster config to {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TopologyFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("removed {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("failed to remove {}: {}", self.path.display(), e),
        }
    }
}
