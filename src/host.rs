use std::{
    io::{BufRead, Write},
    path::{Path, PathBuf},
    process::Stdio,
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::exec::{Cmd, CommandError, Output};

/// Everything the pipelines need from the machine they run on.
///
/// Pipelines only touch the host through this trait, so tests can swap in a
/// scripted fake.
#[async_trait]
pub trait Host: Send + Sync {
    /// Run a command to completion and capture its output. Only failing to
    /// start the process is an error, a non-zero exit is reported in
    /// [`Output::status`].
    async fn run(&self, cmd: &Cmd) -> Result<Output, CommandError>;

    /// Resolve a program on PATH.
    fn locate(&self, program: &str) -> Option<PathBuf>;

    fn exists(&self, path: &Path) -> bool;

    fn read_to_string(&self, path: &Path) -> anyhow::Result<String>;

    /// Bytes available to unprivileged users on the filesystem holding `path`.
    fn available_bytes(&self, path: &Path) -> anyhow::Result<u64>;

    fn is_root(&self) -> bool;

    fn env(&self, key: &str) -> Option<String>;

    /// Succeeds when `url` answers at all, whatever the status code.
    async fn reachable(&self, url: &str) -> anyhow::Result<()>;

    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>>;

    /// Ask the operator a yes/no question, defaulting to no.
    fn confirm(&self, question: &str) -> anyhow::Result<bool>;
}

/// The machine this process is running on.
pub struct SystemHost {
    root: bool,
    http: reqwest::Client,
}

impl SystemHost {
    pub fn new() -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(600))
            .build()
            .context("failed to build http client")?;
        Ok(Self {
            root: nix::unistd::Uid::effective().is_root(),
            http,
        })
    }
}

#[async_trait]
impl Host for SystemHost {
    async fn run(&self, cmd: &Cmd) -> Result<Output, CommandError> {
        let mut command = if cmd.privileged && !self.root {
            let mut sudo = Command::new("sudo");
            sudo.arg(&cmd.program);
            sudo
        } else {
            Command::new(&cmd.program)
        };
        command
            .args(&cmd.args)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = command.output().await.map_err(|source| CommandError::Spawn {
            command: cmd.to_string(),
            source,
        })?;
        let output = Output {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };
        debug!("`{}` exited with {:?}", cmd, output.status);
        Ok(output)
    }

    fn locate(&self, program: &str) -> Option<PathBuf> {
        which::which(program).ok()
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }

    fn read_to_string(&self, path: &Path) -> anyhow::Result<String> {
        std::fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
    }

    fn available_bytes(&self, path: &Path) -> anyhow::Result<u64> {
        let stat = nix::sys::statvfs::statvfs(path)
            .with_context(|| format!("statvfs failed for {}", path.display()))?;
        #[allow(clippy::unnecessary_cast)]
        let bytes = (stat.blocks_available() as u64).saturating_mul(stat.fragment_size() as u64);
        Ok(bytes)
    }

    fn is_root(&self) -> bool {
        self.root
    }

    fn env(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }

    async fn reachable(&self, url: &str) -> anyhow::Result<()> {
        let response = self
            .http
            .head(url)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .with_context(|| format!("{} is unreachable", url))?;
        debug!("{} answered {}", url, response.status());
        Ok(())
    }

    async fn fetch(&self, url: &str) -> anyhow::Result<Vec<u8>> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .with_context(|| format!("failed to download {}", url))?
            .bytes()
            .await
            .with_context(|| format!("failed to download {}", url))?;
        Ok(bytes.to_vec())
    }

    fn confirm(&self, question: &str) -> anyhow::Result<bool> {
        let mut stdout = std::io::stdout();
        write!(stdout, "{} [y/N] ", question)?;
        stdout.flush()?;

        let mut answer = String::new();
        let read = std::io::stdin().lock().read_line(&mut answer)?;
        if read == 0 {
            // stdin closed, nobody to ask
            println!();
            return Ok(false);
        }
        Ok(is_yes(&answer))
    }
}

pub fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
