//! A scripted stand-in for the real machine, just stateful enough for the
//! pipelines to observe their own effects: installed binaries show up on
//! PATH, deleted clusters disappear from `kind get clusters`, and so on.

use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;

use crate::{
    config::KubeNamespace,
    exec::{Cmd, CommandError, Output},
    host::Host,
    kubestuff::{ClusterApi, ClusterConnector, PodState, ServiceState, WorkloadStatus},
};

const KIND_LABEL: &str = "label=io.x-k8s.kind.cluster=";

pub struct State {
    /// programs found on PATH, resolved under /usr/local/bin
    pub tools: BTreeSet<String>,
    pub files: BTreeSet<PathBuf>,
    pub clusters: Vec<String>,
    /// (container id, owning kind cluster)
    pub containers: Vec<(String, String)>,
    pub images: Vec<String>,
    pub commands: Vec<Cmd>,
    /// commands whose rendering starts with one of these exit 1
    pub failing: Vec<String>,
    pub answer: bool,
    pub prompts: usize,
    pub os_release: Option<String>,
    pub root: bool,
    pub free_bytes: u64,
    pub online: bool,
    pub downloads: HashMap<String, Vec<u8>>,
    /// contents of the --config file at the time kind create ran
    pub topology_seen: Option<String>,
}

pub struct FakeHost {
    state: Mutex<State>,
}

impl FakeHost {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                tools: BTreeSet::new(),
                files: BTreeSet::new(),
                clusters: Vec::new(),
                containers: Vec::new(),
                images: Vec::new(),
                commands: Vec::new(),
                failing: Vec::new(),
                answer: false,
                prompts: 0,
                os_release: Some("ID=ubuntu\nID_LIKE=debian\n".to_string()),
                root: true,
                free_bytes: 100 * 1024 * 1024 * 1024,
                online: true,
                downloads: HashMap::new(),
                topology_seen: None,
            }),
        }
    }

    /// Everything elchi-install would have left behind for `bin_dir`.
    pub fn provisioned(bin_dir: &Path, cluster: &str) -> Self {
        let host = Self::new();
        host.with(|s| {
            for tool in ["docker", "kubectl", "kind", "helm", "curl", "netstat", "dig", "ping"] {
                s.tools.insert(tool.to_string());
            }
            for tool in ["kubectl", "kind", "helm"] {
                s.files.insert(bin_dir.join(tool));
            }
            s.clusters.push(cluster.to_string());
            s.containers.push(("c0ffee".to_string(), cluster.to_string()));
            s.containers.push(("unrelated".to_string(), "other".to_string()));
            s.images = [
                "kindest/node:v1.31.0",
                "ghcr.io/cloudnativeworks/elchi:v1.0.0",
                "mongo:6.0",
                "victoriametrics/victoria-metrics:v1.93.0",
                "envoyproxy/envoy:v1.30.1",
                "postgres:16",
            ]
            .map(String::from)
            .to_vec();
        });
        host
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn fail_on(&self, prefix: &str) {
        self.with(|s| s.failing.push(prefix.to_string()));
    }

    pub fn commands(&self) -> Vec<Cmd> {
        self.with(|s| s.commands.clone())
    }

    pub fn ran(&self, prefix: &str) -> bool {
        self.commands()
            .iter()
            .any(|c| c.to_string().starts_with(prefix))
    }

    fn simulate(s: &mut State, cmd: &Cmd) -> String {
        let args: Vec<&str> = cmd.args.iter().map(String::as_str).collect();
        match (cmd.program.as_str(), args.as_slice()) {
            ("kind", ["get", "clusters"]) => s.clusters.join("\n"),
            ("kind", ["delete", "cluster", "--name", name]) => {
                s.clusters.retain(|c| c != name);
                String::new()
            }
            ("kind", ["create", "cluster", "--name", name, "--config", config, ..]) => {
                s.topology_seen = std::fs::read_to_string(config).ok();
                s.clusters.push(name.to_string());
                String::new()
            }
            ("kind", ["get", "kubeconfig", "--name", name]) => format!(
                "apiVersion: v1\nkind: Config\ncurrent-context: kind-{name}\nclusters: []\ncontexts: []\nusers: []\n"
            ),
            ("kind", ["version"]) => "kind v0.24.0 go1.22.6 linux/amd64".to_string(),
            ("kubectl", ["version", "--client"]) => "Client Version: v1.31.0".to_string(),
            ("helm", ["version", "--short"]) => "v3.16.1+g5a5449d".to_string(),
            ("docker", ["--version"]) => "Docker version 24.0.7, build 24.0.7".to_string(),
            ("docker", ["ps", "-a", "-q", "--filter", filter]) => {
                let cluster = filter.strip_prefix(KIND_LABEL).unwrap_or_default();
                s.containers
                    .iter()
                    .filter(|(_, owner)| owner == cluster)
                    .map(|(id, _)| id.clone())
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            ("docker", ["rm", "-f", ids @ ..]) => {
                s.containers.retain(|(id, _)| !ids.contains(&id.as_str()));
                String::new()
            }
            ("docker", ["images", "--format", _]) => s.images.join("\n"),
            ("docker", ["rmi", "-f", image]) => {
                s.images.retain(|i| i != image);
                String::new()
            }
            ("install", ["-m", "0755", _, dest]) => {
                let dest = PathBuf::from(dest);
                if let Some(name) = dest.file_name() {
                    s.tools.insert(name.to_string_lossy().into_owned());
                }
                s.files.insert(dest);
                String::new()
            }
            ("rm", ["-f", path]) => {
                let path = PathBuf::from(path);
                if let Some(name) = path.file_name() {
                    s.tools.remove(&*name.to_string_lossy());
                }
                s.files.remove(&path);
                String::new()
            }
            ("apt-get", ["install", "-y", packages @ ..]) => {
                for package in packages {
                    let provides: &[&str] = match *package {
                        "docker.io" => &["docker"],
                        "curl" => &["curl"],
                        "net-tools" => &["netstat"],
                        "dnsutils" => &["dig"],
                        "iputils-ping" => &["ping"],
                        _ => &[],
                    };
                    s.tools.extend(provides.iter().map(|t| t.to_string()));
                }
                String::new()
            }
            _ => String::new(),
        }
    }
}

#[async_trait]
impl Host for FakeHost {
    async fn run(&self, cmd: &Cmd) -> Result<Output, CommandError> {
        self.with(|s| {
            s.commands.push(cmd.clone());
            let rendered = cmd.to_string();
            if s.failing.iter().any(|p| rendered.starts_with(p.as_str())) {
                return Ok(Output {
                    status: Some(1),
                    stdout: String::new(),
                    stderr: "simulated failure".to_string(),
                });
            }
            Ok(Output {
                status: Some(0),
                stdout: Self::simulate(s, cmd),
                stderr: String::new(),
            })
        })
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        self.with(|s| s.tools.contains(program))
            .then(|| PathBuf::from("/usr/local/bin").join(program))
    }

    fn exists(&self, path: &Path) -> bool {
        self.with(|s| s.files.contains(path))
    }

    fn read_to_string(&self, path: &Path) -> anyhow::Result<String> {
        self.with(|s| s.os_release.clone())
            .ok_or_else(|| anyhow::anyhow!("{} not found", path.display()))
    }

    fn available_bytes(&self, _path: &Path) -> anyhow::Result<u64> {
        Ok(self.with(|s| s.free_bytes))
    }

    fn is_root(&self) -> bool {
        self.with(|s| s.root)
    }

    fn env(&self, key: &str) -> Option<String> {
        (key == "SUDO_USER").then(|| "operator".to_string())
    }

    async fn reachable(&self, url: &str) -> anyhow::Result<()> {
        anyhow::ensure!(self.with(|s| s.online), "{} is unreachable", url);
        Ok(())
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        self.with(|s| s.downloads.get(url).cloned())
            .ok_or_else(|| anyhow::anyhow!("failed to download {}: 404 Not Found", url))
    }

    fn confirm(&self, _question: &str) -> anyhow::Result<bool> {
        Ok(self.with(|s| {
            s.prompts += 1;
            s.answer
        }))
    }
}

/// Cluster API double with canned answers. Clones share what they record.
#[derive(Clone)]
pub struct FakeCluster {
    pub nodes_ready: bool,
    pub pods: Vec<PodState>,
    pub waited: Arc<Mutex<Option<(usize, Duration)>>>,
    pub kubeconfig: Arc<Mutex<Option<String>>>,
}

impl FakeCluster {
    pub fn ready() -> Self {
        Self {
            nodes_ready: true,
            pods: vec![PodState {
                name: "elchi-controller-0".to_string(),
                phase: "Running".to_string(),
                ready: true,
            }],
            waited: Arc::new(Mutex::new(None)),
            kubeconfig: Arc::new(Mutex::new(None)),
        }
    }

    pub fn stuck() -> Self {
        Self {
            nodes_ready: false,
            ..Self::ready()
        }
    }

    pub fn waited(&self) -> Option<(usize, Duration)> {
        *self.waited.lock().unwrap()
    }
}

#[async_trait]
impl ClusterConnector for FakeCluster {
    async fn connect(&self, kubeconfig_yaml: &str) -> anyhow::Result<Box<dyn ClusterApi>> {
        *self.kubeconfig.lock().unwrap() = Some(kubeconfig_yaml.to_string());
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn wait_nodes_ready(
        &self,
        expected: usize,
        timeout: Duration,
        _poll: Duration,
    ) -> anyhow::Result<()> {
        *self.waited.lock().unwrap() = Some((expected, timeout));
        anyhow::ensure!(
            self.nodes_ready,
            "nodes were not ready within {}s",
            timeout.as_secs()
        );
        Ok(())
    }

    async fn workload_status(&self, _namespace: &KubeNamespace) -> anyhow::Result<WorkloadStatus> {
        Ok(WorkloadStatus {
            pods: self.pods.clone(),
            services: vec![ServiceState {
                name: "elchi".to_string(),
                kind: "NodePort".to_string(),
                ports: vec!["8080/TCP".to_string()],
            }],
        })
    }
}
