use crate::{
    exec::{fatal, Cmd, CommandError},
    host::Host,
};

/// Label kind puts on every node container it creates.
pub const KIND_CLUSTER_LABEL: &str = "io.x-k8s.kind.cluster";

/// Ids of all containers, running or not, belonging to kind cluster `cluster`.
pub async fn cluster_containers<H: Host + ?Sized>(
    host: &H,
    cluster: &str,
) -> Result<Vec<String>, CommandError> {
    let filter = format!("label={}={}", KIND_CLUSTER_LABEL, cluster);
    let out = fatal(
        host,
        Cmd::new("docker")
            .args(["ps", "-a", "-q", "--filter"])
            .arg(filter)
            .privileged(),
    )
    .await?;
    Ok(out.lines().map(str::to_string).collect())
}

pub async fn remove_containers<H: Host + ?Sized>(
    host: &H,
    ids: &[String],
) -> Result<(), CommandError> {
    if ids.is_empty() {
        return Ok(());
    }
    fatal(
        host,
        Cmd::new("docker")
            .args(["rm", "-f"])
            .args(ids.iter().cloned())
            .privileged(),
    )
    .await?;
    Ok(())
}

/// Every local image as `repository:tag`.
pub async fn images<H: Host + ?Sized>(host: &H) -> Result<Vec<String>, CommandError> {
    let out = fatal(
        host,
        Cmd::new("docker")
            .args(["images", "--format", "{{.Repository}}:{{.Tag}}"])
            .privileged(),
    )
    .await?;
    Ok(out.lines().map(str::to_string).collect())
}

/// The images whose repository contains one of `patterns`. Dangling
/// `<none>` entries are left for `docker image prune`.
pub fn matching_images<'a>(images: &'a [String], patterns: &[String]) -> Vec<&'a str> {
    images
        .iter()
        .map(String::as_str)
        .filter(|image| !image.starts_with("<none>"))
        .filter(|image| {
            let repository = repository(image);
            patterns.iter().any(|p| repository.contains(p.as_str()))
        })
        .collect()
}

/// Strip the tag, keeping registry ports such as `localhost:5000/x` intact.
fn repository(image: &str) -> &str {
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => repo,
        _ => image,
    }
}

pub async fn remove_image<H: Host + ?Sized>(host: &H, image: &str) -> Result<(), CommandError> {
    fatal(
        host,
        Cmd::new("docker").args(["rmi", "-f", image]).privileged(),
    )
    .await?;
    Ok(())
}

pub async fn prune_dangling<H: Host + ?Sized>(host: &H) -> Result<(), CommandError> {
    fatal(
        host,
        Cmd::new("docker").args(["image", "prune", "-f"]).privileged(),
    )
    .await?;
    Ok(())
}
