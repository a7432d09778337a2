use std::path::{Path, PathBuf};

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::Deployment,
    authentication::v1::{TokenRequest, TokenRequestSpec},
    core::v1::{ConfigMap, Node, Pod, ServiceAccount},
    storage::v1::StorageClass,
};
use k8s_openapi::serde_json;
use kube::{
    api::{ApiResource, DynamicObject, GroupVersionKind, ListParams, PostParams},
    config::{KubeConfigOptions, Kubeconfig},
    Api, Client, Config,
};

use crate::error::{Error, Result};

/// Read surface over a cluster. Everything above this trait talks to the
/// cluster through it, which keeps cluster logic testable without a server.
#[async_trait]
pub trait K8sConnector: Send + Sync {
    /// API server `gitVersion`.
    async fn server_version(&self) -> Result<String>;

    /// Single dynamic object; `None` when the server answers 404.
    async fn get_dynamic(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>>;

    async fn list_dynamic(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<Vec<DynamicObject>>;

    async fn list_nodes(&self, params: &ListParams) -> Result<Vec<Node>>;

    async fn get_node(&self, name: &str) -> Result<Node>;

    /// `namespace` of `None` lists across all namespaces.
    async fn list_pods(&self, namespace: Option<&str>, params: &ListParams) -> Result<Vec<Pod>>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment>;

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>>;

    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>>;

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>>;

    /// Issues a bound token for a service account.
    async fn create_token(
        &self,
        namespace: &str,
        service_account: &str,
        expiration_seconds: i64,
    ) -> Result<String>;
}

#[derive(Clone)]
pub struct KubeConnector {
    client: Client,
}

impl std::fmt::Debug for KubeConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeConnector").finish_non_exhaustive()
    }
}

impl KubeConnector {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Connects with the config resolved by [`load_config`].
    pub async fn connect(kubeconfig: Option<&Path>) -> Result<Self> {
        let config = load_config(kubeconfig).await?;
        Ok(Self::new(Client::try_from(config)?))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// Kubeconfig lookup order: explicit path, first `KUBECONFIG` entry,
/// `$HOME/.kube/config`.
pub fn kubeconfig_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return Some(path.to_path_buf());
    }
    if let Some(paths) = std::env::var_os("KUBECONFIG") {
        if let Some(first) = std::env::split_paths(&paths).find(|p| !p.as_os_str().is_empty()) {
            return Some(first);
        }
    }
    dirs::home_dir().map(|home| home.join(".kube").join("config"))
}

/// In-cluster config wins, otherwise the kubeconfig from [`kubeconfig_path`].
#[tracing::instrument]
pub async fn load_config(kubeconfig: Option<&Path>) -> Result<Config> {
    match Config::incluster() {
        Ok(config) => return Ok(config),
        Err(e) => tracing::debug!(error = %e, "not running in-cluster"),
    }

    let path = kubeconfig_path(kubeconfig)
        .ok_or_else(|| Error::KubeConfig("unable to determine kubeconfig path".to_string()))?;
    let kubeconfig = Kubeconfig::read_from(&path)
        .map_err(|e| Error::KubeConfig(format!("{}: {e}", path.display())))?;
    Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::KubeConfig(e.to_string()))
}

fn dynamic_api(client: &Client, gvk: &GroupVersionKind, namespace: Option<&str>) -> Api<DynamicObject> {
    let ar = ApiResource::from_gvk(gvk);
    match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &ar),
        None => Api::all_with(client.clone(), &ar),
    }
}

#[async_trait]
impl K8sConnector for KubeConnector {
    #[tracing::instrument(skip(self))]
    async fn server_version(&self) -> Result<String> {
        let info = self.client.apiserver_version().await?;
        Ok(info.git_version)
    }

    #[tracing::instrument(skip(self))]
    async fn get_dynamic(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        let api = dynamic_api(&self.client, gvk, namespace);
        Ok(api.get_opt(name).await?)
    }

    #[tracing::instrument(skip(self, params))]
    async fn list_dynamic(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<Vec<DynamicObject>> {
        let api = dynamic_api(&self.client, gvk, namespace);
        Ok(api.list(params).await?.items)
    }

    #[tracing::instrument(skip(self, params))]
    async fn list_nodes(&self, params: &ListParams) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(params).await?.items)
    }

    #[tracing::instrument(skip(self))]
    async fn get_node(&self, name: &str) -> Result<Node> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.get(name).await?)
    }

    #[tracing::instrument(skip(self, params))]
    async fn list_pods(&self, namespace: Option<&str>, params: &ListParams) -> Result<Vec<Pod>> {
        let api: Api<Pod> = match namespace {
            Some(ns) => Api::namespaced(self.client.clone(), ns),
            None => Api::all(self.client.clone()),
        };
        Ok(api.list(params).await?.items)
    }

    #[tracing::instrument(skip(self))]
    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    #[tracing::instrument(skip(self))]
    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get(name).await?)
    }

    #[tracing::instrument(skip(self))]
    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    #[tracing::instrument(skip(self))]
    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    #[tracing::instrument(skip(self))]
    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>> {
        let api: Api<StorageClass> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    #[tracing::instrument(skip(self))]
    async fn create_token(
        &self,
        namespace: &str,
        service_account: &str,
        expiration_seconds: i64,
    ) -> Result<String> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        let request = TokenRequest {
            spec: TokenRequestSpec {
                expiration_seconds: Some(expiration_seconds),
                ..Default::default()
            },
            ..Default::default()
        };
        let response: TokenRequest = api
            .create_subresource(
                "token",
                service_account,
                &PostParams::default(),
                serde_json::to_vec(&request)?,
            )
            .await?;
        response
            .status
            .map(|s| s.token)
            .ok_or_else(|| Error::missing("TokenRequest", "status.token"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kubeconfig_path_prefers_explicit() {
        let path = kubeconfig_path(Some(Path::new("/tmp/kc"))).unwrap();
        assert_eq!(path, PathBuf::from("/tmp/kc"));
    }
}
