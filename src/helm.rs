use anyhow::Context;
use tracing::{info, warn};

use crate::{
    config::{ServicePort, Settings},
    exec::{advisory, fatal, Cmd},
    host::Host,
};

/// Register the chart repository and refresh its index.
///
/// A repository left over from an earlier run makes `repo add` fail, so a
/// failure is retried once with `--force-update`. Neither step aborts the
/// install; a chart that really is unavailable fails `helm install` later.
pub async fn add_repo<H: Host + ?Sized>(host: &H, settings: &Settings) {
    let add = Cmd::new("helm")
        .args(["repo", "add"])
        .arg(&settings.chart_repo_name)
        .arg(&settings.chart_repo_url)
        .privileged();

    match fatal(host, add.clone()).await {
        Ok(_) => info!("added chart repository {}", settings.chart_repo_url),
        Err(e) => {
            warn!("{}, retrying with --force-update", e);
            if advisory(host, add.arg("--force-update")).await.is_some() {
                info!("updated chart repository {}", settings.chart_repo_url);
            }
        }
    }

    advisory(host, Cmd::new("helm").args(["repo", "update"]).privileged()).await;
}

pub fn install_cmd(settings: &Settings, address: &str, port: ServicePort) -> Cmd {
    let mut cmd = Cmd::new("helm")
        .arg("install")
        .arg(&settings.release)
        .arg(&settings.chart)
        .args(["--namespace", settings.namespace.as_str(), "--create-namespace"])
        .arg("--set")
        .arg(format!("global.mainAddress={}", address))
        .arg("--set")
        .arg(format!("global.port={}", port));
    if let Some(version) = &settings.chart_version {
        cmd = cmd.args(["--version", version.as_str()]);
    }
    cmd.privileged()
}

pub async fn install_chart<H: Host + ?Sized>(
    host: &H,
    settings: &Settings,
    address: &str,
    port: ServicePort,
) -> anyhow::Result<()> {
    fatal(host, install_cmd(settings, address, port))
        .await
        .with_context(|| {
            format!(
                "failed to install chart {} into namespace {}",
                settings.chart, settings.namespace
            )
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeHost;

    #[test]
    fn install_arguments() {
        let settings = Settings::default();
        let port = "8080".parse().unwrap();
        let cmd = install_cmd(&settings, "elchi.example.com", port);
        assert_eq!(
            cmd.to_string(),
            "helm install elchi elchi/elchi-stack --namespace elchi-stack --create-namespace \
             --set global.mainAddress=elchi.example.com --set global.port=8080"
        );

        let pinned = Settings {
            chart_version: Some("1.2.3".to_string()),
            ..Settings::default()
        };
        assert!(install_cmd(&pinned, "a", port)
            .to_string()
            .ends_with("--version 1.2.3"));
    }

    #[tokio::test]
    async fn repo_add_retries_with_force_update() {
        let host = FakeHost::new();
        host.fail_on("helm repo add elchi https://charts.elchi.io");
        add_repo(&host, &Settings::default()).await;

        let rendered: Vec<String> = host.commands().iter().map(|c| c.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "helm repo add elchi https://charts.elchi.io",
                "helm repo add elchi https://charts.elchi.io --force-update",
                "helm repo update",
            ]
        );
    }

    #[tokio::test]
    async fn repo_add_success_does_not_retry() {
        let host = FakeHost::new();
        add_repo(&host, &Settings::default()).await;
        assert!(!host.ran("helm repo add elchi https://charts.elchi.io --force-update"));
        assert!(host.ran("helm repo update"));
    }

    #[tokio::test]
    async fn failed_install_is_fatal() {
        let host = FakeHost::new();
        host.fail_on("helm install");
        let err = install_chart(&host, &Settings::default(), "a", "80".parse().unwrap())
            .await
            .unwrap_err();
        assert!(format!("{err:#}").contains("failed to install chart"));
        assert_eq!(crate::exec::exit_code(&err), 1);
    }
}
