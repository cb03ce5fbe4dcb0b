use std::{
    fmt::{Debug, Display, Formatter},
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use anyhow::Context;
use clap::{builder::NonEmptyStringValueParser, Args, Parser};
use serde::Deserialize;

/// Bootstrap a local kind cluster and install the elchi stack into it.
#[derive(Parser, Debug, Clone)]
#[command(name = "elchi-install", version)]
pub struct InstallOpts {
    /// Address the stack is served on, e.g. elchi.example.com
    #[clap(value_parser = NonEmptyStringValueParser::new())]
    pub address: String,

    /// Port the stack is served on, 1-65535
    pub port: ServicePort,

    #[clap(flatten)]
    pub common: CommonOpts,
}

/// Delete the local kind cluster and the tooling installed by elchi-install.
#[derive(Parser, Debug, Clone)]
#[command(name = "elchi-uninstall", version)]
pub struct UninstallOpts {
    #[clap(flatten)]
    pub common: CommonOpts,
}

#[derive(Args, Debug, Clone)]
pub struct CommonOpts {
    /// TOML file overriding the built-in settings. Both binaries must be given the same file.
    #[clap(long, env = "ELCHI_KIND_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise.
    #[clap(short, long)]
    pub verbose: bool,
}

impl CommonOpts {
    pub fn settings(&self) -> anyhow::Result<Settings> {
        match &self.config {
            Some(path) => Settings::from_file(path),
            None => Ok(Settings::default()),
        }
    }
}

/// Everything the install and uninstall pipelines agree on.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub cluster_name: String,
    pub namespace: KubeNamespace,
    pub release: String,

    pub chart_repo_name: String,
    pub chart_repo_url: String,
    /// `<repo>/<chart>` reference passed to helm install
    pub chart: String,
    pub chart_version: Option<String>,

    pub kubectl_version: String,
    pub kind_version: String,
    pub helm_version: String,
    /// kindest/node image, kind picks its own default when unset
    pub node_image: Option<String>,

    /// where kubectl, kind and helm are placed
    pub bin_dir: PathBuf,
    pub topology_path: PathBuf,

    pub min_free_disk_gib: u64,
    pub connectivity_url: String,
    pub readiness_timeout_secs: u64,
    pub readiness_poll_secs: u64,

    /// mapped from host to control plane next to the service port
    pub aux_ports: Vec<u16>,
    /// docker repositories removed by uninstall, matched as substrings
    pub image_patterns: Vec<String>,
    /// values of ID / ID_LIKE in /etc/os-release accepted without asking
    pub supported_distros: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cluster_name: "elchi-cluster".to_string(),
            namespace: KubeNamespace("elchi-stack".to_string()),
            release: "elchi".to_string(),
            chart_repo_name: "elchi".to_string(),
            chart_repo_url: "https://charts.elchi.io".to_string(),
            chart: "elchi/elchi-stack".to_string(),
            chart_version: None,
            kubectl_version: "v1.31.0".to_string(),
            kind_version: "v0.24.0".to_string(),
            helm_version: "v3.16.1".to_string(),
            node_image: None,
            bin_dir: PathBuf::from("/usr/local/bin"),
            topology_path: PathBuf::from("/tmp/elchi-kind-config.yaml"),
            min_free_disk_gib: 20,
            connectivity_url: "https://dl.k8s.io".to_string(),
            readiness_timeout_secs: 300,
            readiness_poll_secs: 5,
            aux_ports: vec![80, 443],
            image_patterns: ["kindest/node", "elchi", "mongo", "victoriametrics", "envoyproxy"]
                .map(String::from)
                .to_vec(),
            supported_distros: vec!["ubuntu".to_string(), "debian".to_string()],
        }
    }
}

impl Settings {
    /// Read overrides from a toml file, anything left out keeps its default.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        Self::from_toml(&text)
            .with_context(|| format!("invalid config file at {}", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        let settings: Settings = toml::from_str(text)?;
        anyhow::ensure!(
            !settings.cluster_name.is_empty(),
            "cluster_name cannot be an empty string"
        );
        anyhow::ensure!(!settings.release.is_empty(), "release cannot be an empty string");
        anyhow::ensure!(
            settings.aux_ports.iter().all(|p| *p != 0),
            "aux_ports must be in 1-65535"
        );
        Ok(settings)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(self.readiness_timeout_secs)
    }

    pub fn readiness_poll(&self) -> Duration {
        Duration::from_secs(self.readiness_poll_secs.max(1))
    }

    pub fn min_free_disk_bytes(&self) -> u64 {
        self.min_free_disk_gib.saturating_mul(1024 * 1024 * 1024)
    }

    /// kubeconfig context kind writes for the cluster
    pub fn kube_context(&self) -> String {
        format!("kind-{}", self.cluster_name)
    }
}

/// Valid custom namespaces:
///   must not be empty, use "default" instead
///   contain at most 63 characters
///   contain only lowercase alphanumeric characters or '-'
///   start with an alphanumeric character
///   end with an alphanumeric character
///   should not start with 'kube-'
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct KubeNamespace(String);

impl KubeNamespace {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl FromStr for KubeNamespace {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        anyhow::ensure!(!s.is_empty(), "namespace cannot be an empty string");
        anyhow::ensure!(s.len() <= 63, "namespace must be <= 63 characters");
        anyhow::ensure!(
            s.chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-'),
            "namespace must contain only lowercase alphanumeric characters or '-'"
        );
        anyhow::ensure!(
            s.starts_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit()),
            "namespace must start with an alphanumeric character"
        );
        anyhow::ensure!(
            s.ends_with(|c: char| c.is_ascii_lowercase() || c.is_ascii_digit()),
            "namespace must end with an alphanumeric character"
        );
        anyhow::ensure!(
            !s.starts_with("kube-"),
            "namespace should not start with 'kube-'"
        );
        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for KubeNamespace {
    type Error = anyhow::Error;

    fn try_from(s: String) -> anyhow::Result<Self> {
        s.parse()
    }
}

impl Debug for KubeNamespace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for KubeNamespace {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A tcp port given on the command line. Only plain decimal digits are
/// accepted, so "+80", " 80" and "0x50" are all rejected.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServicePort(u16);

impl ServicePort {
    pub fn get(self) -> u16 {
        self.0
    }
}

impl FromStr for ServicePort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        anyhow::ensure!(
            !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()),
            "invalid port {:?}: must be a number between 1 and 65535",
            s
        );
        let port = s
            .parse::<u16>()
            .ok()
            .filter(|p| *p != 0)
            .ok_or_else(|| anyhow::anyhow!("invalid port {}: must be between 1 and 65535", s))?;
        Ok(Self(port))
    }
}

impl Debug for ServicePort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for ServicePort {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
