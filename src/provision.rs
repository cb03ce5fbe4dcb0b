//! The install pipeline: preflight, tooling, cluster, chart.
//!
//! Every step either finishes or aborts the whole run. The cluster is
//! never reconciled in place: an existing one with the same name is
//! destroyed and created again.

use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};

use crate::{
    config::{ServicePort, Settings},
    docker,
    download::{self, Release},
    exec::{advisory, fatal, Cmd},
    helm,
    host::Host,
    kind,
    kubestuff::{ClusterApi, ClusterConnector, WorkloadStatus},
    preflight,
    probe::{probe, Tool},
    progress::{InstallSummary, Steps},
    topology::{KindCluster, TopologyFile},
};

const STEPS: usize = 10;

const NETWORK_PACKAGES: [&str; 4] = ["curl", "net-tools", "dnsutils", "iputils-ping"];

/// Where the stack should be reachable once installed.
#[derive(Debug, Clone)]
pub struct Request {
    pub address: String,
    pub port: ServicePort,
}

pub async fn provision<H, C>(
    settings: &Settings,
    request: &Request,
    host: &H,
    connector: &C,
) -> anyhow::Result<InstallSummary>
where
    H: Host + ?Sized,
    C: ClusterConnector + ?Sized,
{
    let mut steps = Steps::new(STEPS);

    steps.begin("Checking prerequisites");
    let arch = preflight::check_all(host, settings).await?;

    steps.begin("Updating package index");
    fatal(host, Cmd::new("apt-get").arg("update").privileged())
        .await
        .context("failed to update the package index")?;

    steps.begin("Installing container runtime");
    ensure_docker(host).await?;

    steps.begin("Installing network utilities");
    ensure_network_tools(host).await?;

    steps.begin("Installing kubectl, kind and helm");
    for tool in Tool::BINARIES {
        ensure_binary(host, settings, tool, arch).await?;
    }

    steps.begin("Creating kind cluster");
    let topology = KindCluster::new(request.port.get(), &settings.aux_ports);
    // removed when this function returns or its future is dropped
    let topology_file = TopologyFile::write(&settings.topology_path, &topology)?;
    recreate_cluster(host, settings, topology_file.path()).await?;

    steps.begin("Waiting for nodes to become ready");
    let kubeconfig = kind::kubeconfig(host, &settings.cluster_name)
        .await
        .context("failed to read the cluster kubeconfig")?;
    let cluster = connector
        .connect(&kubeconfig)
        .await
        .context("failed to connect to the new cluster")?;
    cluster
        .wait_nodes_ready(
            topology.node_count(),
            settings.readiness_timeout(),
            settings.readiness_poll(),
        )
        .await?;
    info!("all {} nodes are ready", topology.node_count());

    steps.begin("Adding chart repository");
    helm::add_repo(host, settings).await;

    steps.begin("Installing elchi chart");
    helm::install_chart(host, settings, &request.address, request.port).await?;

    steps.begin("Verifying deployment");
    let workloads = verify(&*cluster, settings).await;

    Ok(InstallSummary {
        address: request.address.clone(),
        port: request.port,
        cluster_name: settings.cluster_name.clone(),
        namespace: settings.namespace.to_string(),
        release: settings.release.clone(),
        context: settings.kube_context(),
        sudo: !host.is_root(),
        workloads,
    })
}

async fn ensure_docker<H: Host + ?Sized>(host: &H) -> anyhow::Result<()> {
    if let Some(found) = probe(host, Tool::Docker).await {
        info!("docker already installed: {}", found);
        return Ok(());
    }

    fatal(
        host,
        Cmd::new("apt-get")
            .args(["install", "-y", "docker.io"])
            .privileged(),
    )
    .await
    .context("failed to install docker")?;
    fatal(
        host,
        Cmd::new("systemctl")
            .args(["enable", "--now", "docker"])
            .privileged(),
    )
    .await
    .context("failed to start docker")?;

    let user = host
        .env("SUDO_USER")
        .or_else(|| host.env("USER"))
        .filter(|u| u != "root");
    if let Some(user) = user {
        let added = advisory(
            host,
            Cmd::new("usermod")
                .args(["-aG", "docker", user.as_str()])
                .privileged(),
        )
        .await;
        if added.is_some() {
            info!("added {} to the docker group, it applies from the next login", user);
        }
    }

    let found = probe(host, Tool::Docker)
        .await
        .ok_or_else(|| anyhow::anyhow!("docker is missing after installation"))?;
    info!("docker installed: {}", found);
    Ok(())
}

async fn ensure_network_tools<H: Host + ?Sized>(host: &H) -> anyhow::Result<()> {
    let missing: Vec<Tool> = Tool::NETWORK
        .into_iter()
        .filter(|t| host.locate(t.program()).is_none())
        .collect();
    if missing.is_empty() {
        info!("network utilities already installed");
        return Ok(());
    }

    info!("missing network utilities: {:?}", missing);
    fatal(
        host,
        Cmd::new("apt-get")
            .args(["install", "-y"])
            .args(NETWORK_PACKAGES)
            .privileged(),
    )
    .await
    .context("failed to install network utilities")?;

    for tool in missing {
        if host.locate(tool.program()).is_none() {
            warn!("{} is still not on PATH", tool);
        }
    }
    Ok(())
}

async fn ensure_binary<H: Host + ?Sized>(
    host: &H,
    settings: &Settings,
    tool: Tool,
    arch: &str,
) -> anyhow::Result<()> {
    if let Some(found) = probe(host, tool).await {
        info!("{} already installed: {}", tool, found);
        return Ok(());
    }

    let release = Release::of(tool, settings, arch)
        .ok_or_else(|| anyhow::anyhow!("no release download known for {}", tool))?;
    let dest = download::install_release(host, settings, &release)
        .await
        .with_context(|| format!("failed to install {}", tool))?;

    match probe(host, tool).await {
        Some(found) => info!("{} installed: {}", tool, found),
        None => warn!(
            "{} installed to {} but it is not on PATH",
            tool,
            dest.display()
        ),
    }
    Ok(())
}

async fn recreate_cluster<H: Host + ?Sized>(
    host: &H,
    settings: &Settings,
    config: &Path,
) -> anyhow::Result<()> {
    let name = settings.cluster_name.as_str();
    if kind::exists(host, name)
        .await
        .context("failed to list kind clusters")?
    {
        warn!("cluster {} already exists, deleting it first", name);
        kind::delete(host, name)
            .await
            .with_context(|| format!("failed to delete existing cluster {}", name))?;
        let leftovers = docker::cluster_containers(host, name)
            .await
            .context("failed to list leftover node containers")?;
        docker::remove_containers(host, &leftovers)
            .await
            .context("failed to remove leftover node containers")?;
    }

    kind::create(host, name, config, settings.node_image.as_deref())
        .await
        .with_context(|| format!("failed to create cluster {}", name))?;
    info!("cluster {} created", name);
    Ok(())
}

async fn verify(cluster: &dyn ClusterApi, settings: &Settings) -> Option<WorkloadStatus> {
    let status = match cluster.workload_status(&settings.namespace).await {
        Ok(status) => status,
        Err(e) => {
            warn!("could not read workload status: {:#}", e);
            return None;
        }
    };

    for pod in &status.pods {
        info!("pod {}: {} (ready: {})", pod.name, pod.phase, pod.ready);
    }
    for service in &status.services {
        info!(
            "service {}: {} {}",
            service.name,
            service.kind,
            service.ports.join(", ")
        );
    }
    let pending = status.not_running().count();
    if pending > 0 {
        warn!(
            "{} pods in {} are not running yet, they may still be pulling images",
            pending, settings.namespace
        );
    }
    Some(status)
}
