//! Checks run before elchi-install changes anything on the host.

use std::{collections::HashMap, path::Path};

use anyhow::Context;
use tracing::{info, warn};

use crate::{config::Settings, host::Host};

const OS_RELEASE: &str = "/etc/os-release";

/// The fields of /etc/os-release we look at.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OsRelease {
    pub id: String,
    pub id_like: Vec<String>,
    pub pretty_name: Option<String>,
}

impl OsRelease {
    pub fn parse(text: &str) -> Self {
        let fields: HashMap<&str, String> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .filter_map(|l| l.split_once('='))
            .map(|(k, v)| (k.trim(), unquote(v.trim())))
            .collect();
        Self {
            id: fields.get("ID").cloned().unwrap_or_default().to_lowercase(),
            id_like: fields
                .get("ID_LIKE")
                .map(|v| v.split_whitespace().map(str::to_lowercase).collect())
                .unwrap_or_default(),
            pretty_name: fields.get("PRETTY_NAME").cloned(),
        }
    }

    pub fn matches(&self, supported: &[String]) -> bool {
        supported
            .iter()
            .any(|s| {
                s.eq_ignore_ascii_case(&self.id)
                    || self.id_like.iter().any(|l| l.eq_ignore_ascii_case(s))
            })
    }

    fn describe(&self) -> &str {
        self.pretty_name.as_deref().unwrap_or(self.id.as_str())
    }
}

fn unquote(value: &str) -> String {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value)
        .to_string()
}

/// Run every check in order, stopping at the first failure.
/// Returns the architecture name used in download urls.
pub async fn check_all<H: Host + ?Sized>(
    host: &H,
    settings: &Settings,
) -> anyhow::Result<&'static str> {
    check_privilege(host)?;
    check_os(host, settings)?;
    let arch = download_arch(std::env::consts::ARCH)?;
    check_disk(host, settings)?;
    check_connectivity(host, settings).await?;
    Ok(arch)
}

pub fn check_privilege<H: Host + ?Sized>(host: &H) -> anyhow::Result<()> {
    if host.is_root() {
        info!("running as root");
        return Ok(());
    }
    anyhow::ensure!(
        host.locate("sudo").is_some(),
        "elchi-install must run as root or with sudo available"
    );
    info!("not running as root, privileged commands go through sudo");
    Ok(())
}

pub fn check_os<H: Host + ?Sized>(host: &H, settings: &Settings) -> anyhow::Result<()> {
    let os = host
        .read_to_string(Path::new(OS_RELEASE))
        .map(|text| OsRelease::parse(&text))
        .context("cannot identify the operating system")?;

    if os.matches(&settings.supported_distros) {
        info!("operating system: {}", os.describe());
        return Ok(());
    }

    warn!(
        "{} is not one of the supported distributions ({})",
        os.describe(),
        settings.supported_distros.join(", ")
    );
    let proceed = host.confirm("Continue on an unsupported distribution?")?;
    anyhow::ensure!(proceed, "unsupported operating system: {}", os.describe());
    warn!("continuing on {} at the operator's request", os.describe());
    Ok(())
}

/// Map a rust target arch onto the names used by kubectl, kind and helm releases.
pub fn download_arch(arch: &str) -> anyhow::Result<&'static str> {
    match arch {
        "x86_64" => Ok("amd64"),
        "aarch64" => Ok("arm64"),
        other => anyhow::bail!("unsupported cpu architecture: {}", other),
    }
}

pub fn check_disk<H: Host + ?Sized>(host: &H, settings: &Settings) -> anyhow::Result<()> {
    let available = host.available_bytes(Path::new("/"))?;
    let required = settings.min_free_disk_bytes();
    anyhow::ensure!(
        available >= required,
        "insufficient disk space under /: {} GiB available, {} GiB required",
        available / GIB,
        settings.min_free_disk_gib
    );
    info!("disk space: {} GiB available", available / GIB);
    Ok(())
}

const GIB: u64 = 1024 * 1024 * 1024;

pub async fn check_connectivity<H: Host + ?Sized>(
    host: &H,
    settings: &Settings,
) -> anyhow::Result<()> {
    host.reachable(&settings.connectivity_url)
        .await
        .context("no internet connectivity")?;
    info!("internet connectivity: ok");
    Ok(())
}
