use std::{
    fmt::{Display, Formatter},
    path::PathBuf,
};

use crate::{exec::Cmd, host::Host};

/// Programs the pipelines care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Docker,
    Kubectl,
    Kind,
    Helm,
    Curl,
    Netstat,
    Dig,
    Ping,
}

impl Tool {
    /// Standalone binaries placed in the binary directory by elchi-install.
    pub const BINARIES: [Tool; 3] = [Tool::Kubectl, Tool::Kind, Tool::Helm];

    /// Provided by the apt network utility packages.
    pub const NETWORK: [Tool; 4] = [Tool::Curl, Tool::Netstat, Tool::Dig, Tool::Ping];

    pub fn program(self) -> &'static str {
        match self {
            Tool::Docker => "docker",
            Tool::Kubectl => "kubectl",
            Tool::Kind => "kind",
            Tool::Helm => "helm",
            Tool::Curl => "curl",
            Tool::Netstat => "netstat",
            Tool::Dig => "dig",
            Tool::Ping => "ping",
        }
    }

    /// Only reported for logging, never compared.
    fn version_args(self) -> Option<&'static [&'static str]> {
        match self {
            Tool::Docker => Some(&["--version"]),
            Tool::Kubectl => Some(&["version", "--client"]),
            Tool::Kind => Some(&["version"]),
            Tool::Helm => Some(&["version", "--short"]),
            _ => None,
        }
    }
}

impl Display for Tool {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.program())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    pub path: PathBuf,
    pub version: Option<String>,
}

impl Display for Presence {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.version {
            Some(version) => write!(f, "{} ({})", version, self.path.display()),
            None => write!(f, "{}", self.path.display()),
        }
    }
}

/// Whether `tool` is on PATH, and which version it reports if asked.
pub async fn probe<H: Host + ?Sized>(host: &H, tool: Tool) -> Option<Presence> {
    let path = host.locate(tool.program())?;
    let version = match tool.version_args() {
        Some(args) => host
            .run(&Cmd::new(tool.program()).args(args.iter().copied()))
            .await
            .ok()
            .filter(|out| out.success())
            .and_then(|out| out.first_line().map(str::to_string)),
        None => None,
    };
    Some(Presence { path, version })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    #[tokio::test]
    async fn probes_presence_and_version() {
        let host = FakeHost::new();
        host.with(|s| {
            s.tools.insert("kind".to_string());
            s.tools.insert("dig".to_string());
        });

        let kind = probe(&host, Tool::Kind).await.unwrap();
        assert_eq!(kind.path, PathBuf::from("/usr/local/bin/kind"));
        assert_eq!(kind.version.as_deref(), Some("kind v0.24.0 go1.22.6 linux/amd64"));

        let dig = probe(&host, Tool::Dig).await.unwrap();
        assert_eq!(dig.version, None);
        assert_eq!(dig.to_string(), "/usr/local/bin/dig");

        assert!(probe(&host, Tool::Helm).await.is_none());
        // absent tools are never executed
        assert!(host.commands().iter().all(|c| c.program != "helm"));
    }

    #[tokio::test]
    async fn failing_version_is_not_fatal() {
        let host = FakeHost::new();
        host.with(|s| {
            s.tools.insert("docker".to_string());
        });
        host.fail_on("docker --version");
        let docker = probe(&host, Tool::Docker).await.unwrap();
        assert_eq!(docker.version, None);
    }
}
