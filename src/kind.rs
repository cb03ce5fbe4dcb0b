//! Thin wrapper over the kind CLI.
//!
//! kind talks to the docker daemon, so every call is privileged.

use std::path::Path;

use crate::{
    exec::{fatal, Cmd, CommandError},
    host::Host,
};

pub async fn clusters<H: Host + ?Sized>(host: &H) -> Result<Vec<String>, CommandError> {
    let out = fatal(host, Cmd::new("kind").args(["get", "clusters"]).privileged()).await?;
    Ok(out.lines().map(str::to_string).collect())
}

pub async fn exists<H: Host + ?Sized>(host: &H, name: &str) -> Result<bool, CommandError> {
    Ok(clusters(host).await?.iter().any(|c| c == name))
}

pub async fn delete<H: Host + ?Sized>(host: &H, name: &str) -> Result<(), CommandError> {
    fatal(
        host,
        Cmd::new("kind")
            .args(["delete", "cluster", "--name", name])
            .privileged(),
    )
    .await?;
    Ok(())
}

pub async fn create<H: Host + ?Sized>(
    host: &H,
    name: &str,
    config: &Path,
    image: Option<&str>,
) -> Result<(), CommandError> {
    let mut cmd = Cmd::new("kind")
        .args(["create", "cluster", "--name", name, "--config"])
        .arg(config.to_string_lossy());
    if let Some(image) = image {
        cmd = cmd.args(["--image", image]);
    }
    fatal(host, cmd.privileged()).await?;
    Ok(())
}

/// Admin kubeconfig for the cluster, as yaml.
pub async fn kubeconfig<H: Host + ?Sized>(host: &H, name: &str) -> Result<String, CommandError> {
    let out = fatal(
        host,
        Cmd::new("kind")
            .args(["get", "kubeconfig", "--name", name])
            .privileged(),
    )
    .await?;
    Ok(out.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    #[tokio::test]
    async fn lifecycle() {
        let host = FakeHost::new();
        assert!(!exists(&host, "elchi-cluster").await.unwrap());

        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("kind.yaml");
        std::fs::write(&config, "kind: Cluster\n").unwrap();
        create(&host, "elchi-cluster", &config, Some("kindest/node:v1.31.0"))
            .await
            .unwrap();
        assert!(exists(&host, "elchi-cluster").await.unwrap());
        assert_eq!(host.with(|s| s.topology_seen.clone()).as_deref(), Some("kind: Cluster\n"));

        let create_cmd = host
            .commands()
            .into_iter()
            .find(|c| c.args.first().map(String::as_str) == Some("create"))
            .unwrap();
        assert!(create_cmd.privileged);
        assert_eq!(
            create_cmd.args[create_cmd.args.len() - 2..],
            ["--image".to_string(), "kindest/node:v1.31.0".to_string()]
        );

        delete(&host, "elchi-cluster").await.unwrap();
        assert!(clusters(&host).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_failure_surfaces() {
        let host = FakeHost::new();
        host.fail_on("kind get clusters");
        assert!(exists(&host, "elchi-cluster").await.is_err());
    }
}
