//! Fetching kubectl, kind and helm release binaries.

use std::{
    io::{Read, Write},
    path::PathBuf,
};

use anyhow::Context;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::{
    config::Settings,
    exec::{fatal, Cmd},
    host::Host,
    probe::Tool,
};

/// Where a tool's release lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    pub tool: Tool,
    pub url: String,
    pub checksum_url: String,
    /// path of the binary inside a .tar.gz release, `None` for a bare binary
    pub archive_member: Option<String>,
}

impl Release {
    pub fn of(tool: Tool, settings: &Settings, arch: &str) -> Option<Self> {
        let (url, checksum_suffix, archive_member) = match tool {
            Tool::Kubectl => (
                format!(
                    "https://dl.k8s.io/release/{}/bin/linux/{}/kubectl",
                    settings.kubectl_version, arch
                ),
                ".sha256",
                None,
            ),
            Tool::Kind => (
                format!(
                    "https://kind.sigs.k8s.io/dl/{}/kind-linux-{}",
                    settings.kind_version, arch
                ),
                ".sha256sum",
                None,
            ),
            Tool::Helm => (
                format!(
                    "https://get.helm.sh/helm-{}-linux-{}.tar.gz",
                    settings.helm_version, arch
                ),
                ".sha256sum",
                Some(format!("linux-{}/helm", arch)),
            ),
            _ => return None,
        };
        Some(Self {
            tool,
            checksum_url: format!("{}{}", url, checksum_suffix),
            url,
            archive_member,
        })
    }
}

/// Outcome of comparing a download against its published digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Match,
    Mismatch { expected: String, actual: String },
    Unavailable(String),
}

/// First token of a `.sha256` / `.sha256sum` file, if it looks like a digest.
pub fn parse_checksum(text: &str) -> Option<String> {
    let digest = text.split_whitespace().next()?;
    (digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit()))
        .then(|| digest.to_ascii_lowercase())
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

pub fn verify(payload: &[u8], checksum_file: anyhow::Result<Vec<u8>>) -> Verification {
    let text = match checksum_file {
        Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        Err(e) => return Verification::Unavailable(format!("{:#}", e)),
    };
    let Some(expected) = parse_checksum(&text) else {
        return Verification::Unavailable("checksum file holds no sha256 digest".to_string());
    };
    let actual = sha256_hex(payload);
    if actual == expected {
        Verification::Match
    } else {
        Verification::Mismatch { expected, actual }
    }
}

/// Pull a single file out of a gzipped tarball.
pub fn extract_member(archive: &[u8], member: &str) -> anyhow::Result<Vec<u8>> {
    let mut archive = tar::Archive::new(GzDecoder::new(archive));
    for entry in archive.entries().context("corrupt release archive")? {
        let mut entry = entry.context("corrupt release archive")?;
        let found = entry.path()?.as_os_str() == member;
        if found {
            let mut contents = Vec::new();
            entry.read_to_end(&mut contents)?;
            return Ok(contents);
        }
    }
    anyhow::bail!("{} not found in release archive", member)
}

/// Download, verify and place `release` into the binary directory.
///
/// A failed download is fatal. A missing or mismatching checksum only warns.
pub async fn install_release<H: Host + ?Sized>(
    host: &H,
    settings: &Settings,
    release: &Release,
) -> anyhow::Result<PathBuf> {
    info!("downloading {}", release.url);
    let payload = host.fetch(&release.url).await?;

    match verify(&payload, host.fetch(&release.checksum_url).await) {
        Verification::Match => info!("{} checksum verified", release.tool),
        Verification::Mismatch { expected, actual } => warn!(
            "{} checksum mismatch: expected {}, got {}",
            release.tool, expected, actual
        ),
        Verification::Unavailable(reason) => {
            warn!("{} checksum not verified: {}", release.tool, reason)
        }
    }

    let binary = match &release.archive_member {
        Some(member) => extract_member(&payload, member)?,
        None => payload,
    };

    let mut staged = tempfile::Builder::new()
        .prefix(&format!("elchi-kind-{}-", release.tool))
        .tempfile()
        .context("failed to stage download")?;
    staged.write_all(&binary)?;
    staged.flush()?;

    let dest = settings.bin_dir.join(release.tool.program());
    fatal(
        host,
        Cmd::new("install")
            .args(["-m", "0755"])
            .arg(staged.path().to_string_lossy())
            .arg(dest.to_string_lossy())
            .privileged(),
    )
    .await
    .with_context(|| format!("failed to install {}", dest.display()))?;

    anyhow::ensure!(
        host.exists(&dest),
        "{} is missing after installation",
        dest.display()
    );
    Ok(dest)
}
