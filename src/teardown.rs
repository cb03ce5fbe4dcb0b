//! The uninstall pipeline. Once confirmed it never aborts: every failure
//! is logged and the remaining steps still run, so a half-provisioned host
//! can be cleaned up and a second run finds nothing left to do.

use tracing::{info, warn};

use crate::{
    config::Settings,
    docker,
    exec::{advisory, Cmd},
    host::Host,
    kind,
    probe::Tool,
    progress::{Steps, TeardownReport},
};

const STEPS: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The operator said no. Nothing was touched.
    Declined,
    Finished(TeardownReport),
}

pub async fn teardown<H: Host + ?Sized>(settings: &Settings, host: &H) -> anyhow::Result<Outcome> {
    let question = format!(
        "This deletes the {} cluster, its container images and kubectl, kind and helm from {}. Continue?",
        settings.cluster_name,
        settings.bin_dir.display()
    );
    if !host.confirm(&question)? {
        info!("aborted, nothing was changed");
        return Ok(Outcome::Declined);
    }

    let mut report = TeardownReport::default();
    let mut steps = Steps::new(STEPS);
    let docker_present = host.locate(Tool::Docker.program()).is_some();

    steps.begin("Deleting kind cluster");
    remove_cluster(host, settings, docker_present, &mut report).await;

    steps.begin("Removing container images");
    if docker_present {
        remove_images(host, settings, &mut report).await;
    } else {
        warn!("docker is not installed, skipping images");
        report.skipped("container images", "docker not installed");
    }

    steps.begin("Removing binaries");
    for tool in Tool::BINARIES {
        let path = settings.bin_dir.join(tool.program());
        let item = format!("binary {}", path.display());
        if !host.exists(&path) {
            report.skipped(item, "not installed");
            continue;
        }
        let rm = Cmd::new("rm")
            .arg("-f")
            .arg(path.to_string_lossy())
            .privileged();
        if advisory(host, rm).await.is_some() {
            report.removed(item);
        }
    }

    Ok(Outcome::Finished(report))
}

async fn remove_cluster<H: Host + ?Sized>(
    host: &H,
    settings: &Settings,
    docker_present: bool,
    report: &mut TeardownReport,
) {
    let name = settings.cluster_name.as_str();
    let item = format!("kind cluster {}", name);

    if host.locate(Tool::Kind.program()).is_none() {
        warn!("kind is not installed, skipping cluster deletion");
        report.skipped(item, "kind not installed");
    } else {
        match kind::exists(host, name).await {
            Ok(true) => match kind::delete(host, name).await {
                Ok(()) => report.removed(item),
                Err(e) => warn!("{}", e),
            },
            Ok(false) => report.skipped(item, "no such cluster"),
            Err(e) => warn!("could not list kind clusters: {}", e),
        }
    }

    if !docker_present {
        return;
    }
    // node containers can outlive a cluster that kind no longer lists
    match docker::cluster_containers(host, name).await {
        Ok(ids) if ids.is_empty() => {}
        Ok(ids) => match docker::remove_containers(host, &ids).await {
            Ok(()) => report.removed(format!("{} leftover node containers", ids.len())),
            Err(e) => warn!("{}", e),
        },
        Err(e) => warn!("could not list node containers: {}", e),
    }
}

async fn remove_images<H: Host + ?Sized>(
    host: &H,
    settings: &Settings,
    report: &mut TeardownReport,
) {
    let images = match docker::images(host).await {
        Ok(images) => images,
        Err(e) => {
            warn!("could not list images: {}", e);
            return;
        }
    };

    let matching = docker::matching_images(&images, &settings.image_patterns);
    if matching.is_empty() {
        report.skipped("container images", "none found");
    }
    for image in matching {
        match docker::remove_image(host, image).await {
            Ok(()) => report.removed(format!("image {}", image)),
            Err(e) => warn!("{}", e),
        }
    }

    if let Err(e) = docker::prune_dangling(host).await {
        warn!("{}", e);
    }
}
