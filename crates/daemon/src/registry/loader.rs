//! Building cluster clients from credential files.

use std::sync::Arc;

use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};

use super::RegistryError;
use crate::exec::{ClusterApi, KubeClusterApi};

/// Turns a credential blob into a cluster handle.
#[async_trait]
pub trait ClientLoader: Send + Sync {
    /// Builds a handle for the cluster called `name` from `credential`.
    async fn load(
        &self,
        name: &str,
        credential: &[u8],
    ) -> Result<Arc<dyn ClusterApi>, RegistryError>;
}

/// Loads kubeconfig files into [`KubeClusterApi`] handles.
#[derive(Debug, Default, Clone, Copy)]
pub struct KubeconfigLoader;

#[async_trait]
impl ClientLoader for KubeconfigLoader {
    async fn load(
        &self,
        name: &str,
        credential: &[u8],
    ) -> Result<Arc<dyn ClusterApi>, RegistryError> {
        let text = std::str::from_utf8(credential).map_err(|e| RegistryError::InvalidCredential {
            name: name.to_string(),
            reason: format!("not UTF-8: {e}"),
        })?;

        let kubeconfig = Kubeconfig::from_yaml(text).map_err(|e| RegistryError::InvalidCredential {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| RegistryError::ClientBuild {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let client = Client::try_from(config).map_err(|e| RegistryError::ClientBuild {
            name: name.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Arc::new(KubeClusterApi::new(client)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
- name: test
  cluster:
    server: https://127.0.0.1:6443
    insecure-skip-tls-verify: true
users:
- name: test
  user:
    token: abc123
contexts:
- name: test
  context:
    cluster: test
    user: test
current-context: test
"#;

    fn install_crypto_provider() {
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    }

    #[tokio::test]
    async fn test_loads_valid_kubeconfig() {
        install_crypto_provider();
        let loaded = KubeconfigLoader.load("test", KUBECONFIG.as_bytes()).await;
        assert!(loaded.is_ok(), "expected client, got {:?}", loaded.err());
    }

    #[tokio::test]
    async fn test_rejects_non_utf8() {
        let err = KubeconfigLoader.load("bin", &[0xff, 0xfe, 0x00]).await.err().unwrap();
        assert!(matches!(err, RegistryError::InvalidCredential { ref name, .. } if name == "bin"));
    }

    #[tokio::test]
    async fn test_rejects_malformed_yaml() {
        let err = KubeconfigLoader
            .load("broken", b"clusters: [unterminated")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::InvalidCredential { .. }));
    }
}
