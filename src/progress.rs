//! Operator-facing output. Diagnostics go through `tracing` on stderr,
//! step banners and summaries are printed on stdout.

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::{
    config::{ServicePort, Settings},
    kubestuff::WorkloadStatus,
    probe::Tool,
};

pub fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Numbered banners for a fixed sequence of steps.
pub struct Steps {
    current: usize,
    total: usize,
}

impl Steps {
    pub fn new(total: usize) -> Self {
        Self { current: 0, total }
    }

    pub fn begin(&mut self, title: &str) -> String {
        self.current += 1;
        let banner = format!("[{}/{}] {}", self.current, self.total, title);
        println!("\n==> {}", banner);
        info!("{}", title);
        banner
    }
}

/// What elchi-install leaves behind, for the closing summary.
#[derive(Debug, Clone)]
pub struct InstallSummary {
    pub address: String,
    pub port: ServicePort,
    pub cluster_name: String,
    pub namespace: String,
    pub release: String,
    pub context: String,
    /// the install ran through sudo, so kind wrote the context into root's kubeconfig
    pub sudo: bool,
    pub workloads: Option<WorkloadStatus>,
}

impl InstallSummary {
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str("\nelchi is installed\n\n");
        out.push_str(&format!("  url:        {}\n", self.url()));
        out.push_str(&format!("  cluster:    {}\n", self.cluster_name));
        out.push_str(&format!("  namespace:  {}\n", self.namespace));
        out.push_str(&format!("  release:    {}\n", self.release));
        if let Some(workloads) = &self.workloads {
            let pending = workloads.not_running().count();
            out.push_str(&format!(
                "  pods:       {} ({} not yet running)\n",
                workloads.pods.len(),
                pending
            ));
        }
        let sudo = if self.sudo { "sudo " } else { "" };
        out.push_str("\nuseful commands:\n");
        out.push_str(&format!(
            "  {}kubectl --context {} -n {} get pods\n",
            sudo, self.context, self.namespace
        ));
        out.push_str(&format!(
            "  {}kubectl --context {} -n {} get svc\n",
            sudo, self.context, self.namespace
        ));
        out.push_str(&format!(
            "  {}helm -n {} status {}\n",
            sudo, self.namespace, self.release
        ));
        out.push_str("  elchi-uninstall\n");
        if self.sudo {
            out.push_str(&format!(
                "\nthe {} context is in root's kubeconfig. To use it without sudo:\n",
                self.context
            ));
            out.push_str(&format!(
                "  sudo kind get kubeconfig --name {} > ~/.kube/elchi && export KUBECONFIG=~/.kube/elchi\n",
                self.cluster_name
            ));
        }
        out
    }
}

/// Outcome of elchi-uninstall, item by item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub removed: Vec<String>,
    pub skipped: Vec<String>,
}

impl TeardownReport {
    pub fn removed(&mut self, item: impl Into<String>) {
        let item = item.into();
        info!("removed {}", item);
        self.removed.push(item);
    }

    pub fn skipped(&mut self, item: impl Into<String>, reason: &str) {
        let item = item.into();
        info!("skip {}: {}", item, reason);
        self.skipped.push(item);
    }

    pub fn render(&self, settings: &Settings) -> String {
        let mut out = String::from("\nelchi uninstall finished\n");
        out.push_str("\nremoved:\n");
        if self.removed.is_empty() {
            out.push_str("  nothing\n");
        }
        for item in &self.removed {
            out.push_str(&format!("  - {}\n", item));
        }
        if !self.skipped.is_empty() {
            out.push_str("\nnot present, skipped:\n");
            for item in &self.skipped {
                out.push_str(&format!("  - {}\n", item));
            }
        }
        out.push_str("\npreserved:\n");
        out.push_str(&format!("  - {} (container runtime)\n", Tool::Docker));
        out.push_str("  - network utilities and other host packages\n");
        out.push_str(&format!(
            "  - anything outside {} and the {} cluster\n",
            settings.bin_dir.display(),
            settings.cluster_name
        ));
        out
    }
}
