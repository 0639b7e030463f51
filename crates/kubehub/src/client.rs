//! Kube client construction and resource resolution.

use std::path::Path;

use anyhow::Context;
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    core::{ApiResource, GroupVersion},
    Client, Config,
};
use kwatch_core::ResourceIdentity;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("no usable cluster credentials ({})", .attempts.join("; "))]
    NoCredentials { attempts: Vec<String> },
    #[error("discovering {identity}: {source}")]
    Discovery {
        identity: ResourceIdentity,
        #[source]
        source: kube::Error,
    },
    #[error("resource {0} is not served by the cluster")]
    ResourceNotFound(ResourceIdentity),
}

/// Build a client from the first credential source that works:
/// `$KUBECONFIG`, then `~/.kube/config`, then in-cluster service account.
pub async fn create_client() -> Result<Client, ClientError> {
    let mut attempts = Vec::new();

    if let Some(path) = std::env::var_os("KUBECONFIG").filter(|p| !p.is_empty()) {
        let path = Path::new(&path);
        match client_from_kubeconfig(path).await {
            Ok(client) => {
                info!(source = "KUBECONFIG", path = %path.display(), "kube client ready");
                return Ok(client);
            }
            Err(e) => {
                debug!(path = %path.display(), error = %e, "KUBECONFIG unusable");
                attempts.push(format!("KUBECONFIG {}: {e:#}", path.display()));
            }
        }
    }

    match dirs::home_dir() {
        Some(home) => {
            let path = home.join(".kube").join("config");
            match client_from_kubeconfig(&path).await {
                Ok(client) => {
                    info!(source = "default kubeconfig", path = %path.display(), "kube client ready");
                    return Ok(client);
                }
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "default kubeconfig unusable");
                    attempts.push(format!("{}: {e:#}", path.display()));
                }
            }
        }
        None => attempts.push("default kubeconfig: home directory unknown".to_string()),
    }

    match client_in_cluster() {
        Ok(client) => {
            info!(source = "in-cluster", "kube client ready");
            Ok(client)
        }
        Err(e) => {
            debug!(error = %e, "in-cluster config unusable");
            attempts.push(format!("in-cluster: {e:#}"));
            Err(ClientError::NoCredentials { attempts })
        }
    }
}

/// Client from a single kubeconfig file, using its current context.
pub async fn client_from_kubeconfig(path: &Path) -> anyhow::Result<Client> {
    let kubeconfig = Kubeconfig::read_from(path).context("reading kubeconfig")?;
    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .context("loading kubeconfig context")?;
    Client::try_from(config).context("building client")
}

fn client_in_cluster() -> anyhow::Result<Client> {
    let config = Config::incluster().context("loading in-cluster config")?;
    Client::try_from(config).context("building client")
}

/// Resolve a group/version/resource (plural) triple to its served `ApiResource`.
pub async fn resolve_api_resource(client: &Client, identity: &ResourceIdentity) -> Result<ApiResource, ClientError> {
    let gv = GroupVersion::gv(&identity.group, &identity.version);
    let group = kube::discovery::pinned_group(client, &gv)
        .await
        .map_err(|source| ClientError::Discovery { identity: identity.clone(), source })?;
    group
        .versioned_resources(&identity.version)
        .into_iter()
        .map(|(ar, _caps)| ar)
        .find(|ar| ar.plural == identity.resource)
        .ok_or_else(|| ClientError::ResourceNotFound(identity.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn missing_kubeconfig_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = client_from_kubeconfig(&dir.path().join("nope")).await.err().expect("expected error");
        assert!(format!("{err:#}").contains("reading kubeconfig"));
    }

    #[tokio::test]
    async fn kubeconfig_without_context_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "apiVersion: v1\nkind: Config\nclusters: []\ncontexts: []\nusers: []").unwrap();
        assert!(client_from_kubeconfig(file.path()).await.is_err());
    }

    #[test]
    fn no_credentials_lists_attempts() {
        let err = ClientError::NoCredentials { attempts: vec!["a: x".into(), "b: y".into()] };
        assert_eq!(err.to_string(), "no usable cluster credentials (a: x; b: y)");
    }
}
