use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::{DaemonSet, ReplicaSet},
    batch::v1::Job,
    core::v1::Pod,
};
use k8s_openapi::NamespaceResourceScope;
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client, Resource as KubeResource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};

use super::deployment::DeploymentResource;
use crate::error::{Error, Result};

/// CRUD over one resource kind. With `dry_run` set nothing is sent to the
/// cluster and the object that would have been sent is returned.
#[async_trait]
pub trait Resource: Send + Sync {
    type Params: Send + Sync;
    type Object: Send;

    async fn create(&self, params: Self::Params, dry_run: bool) -> Result<Self::Object>;
    async fn update(&self, params: Self::Params, dry_run: bool) -> Result<Self::Object>;
    async fn get(&self, params: &Self::Params) -> Result<Self::Object>;
    async fn delete(&self, params: &Self::Params) -> Result<()>;
}

/// Identifies an object by name or carries a full object. The two are
/// mutually exclusive.
#[derive(Debug, Clone)]
pub struct ObjectParams<K> {
    pub name: String,
    pub namespace: String,
    pub object: Option<K>,
}

impl<K> Default for ObjectParams<K> {
    fn default() -> Self {
        Self {
            name: String::new(),
            namespace: String::new(),
            object: None,
        }
    }
}

pub(crate) fn exclusive_error(kind: &str) -> Error {
    let mut chars = kind.chars();
    let field: String = chars
        .next()
        .map(|c| c.to_ascii_uppercase().to_string() + chars.as_str())
        .unwrap_or_default();
    Error::Config(format!(
        "Invalid params. {kind}.Name and {kind}.{field} are mutually exclusive"
    ))
}

impl<K: KubeResource> ObjectParams<K> {
    /// Name and namespace, taken from the object when no name was given.
    pub fn target(&self, kind: &str) -> Result<(String, String)> {
        match (&self.object, self.name.is_empty()) {
            (Some(_), false) => Err(exclusive_error(kind)),
            (Some(obj), true) => Ok((
                obj.meta().name.clone().unwrap_or_default(),
                obj.meta()
                    .namespace
                    .clone()
                    .unwrap_or_else(|| namespace_or_default(&self.namespace)),
            )),
            (None, false) => Ok((self.name.clone(), namespace_or_default(&self.namespace))),
            (None, true) => Err(Error::Config(format!("{kind} name not specified"))),
        }
    }
}

pub(crate) fn namespace_or_default(ns: &str) -> String {
    if ns.is_empty() {
        "default".to_string()
    } else {
        ns.to_string()
    }
}

/// Plain CRUD for kinds that need no params builder.
#[derive(Clone)]
pub struct ObjectResource<K> {
    client: Client,
    kind: &'static str,
    _marker: std::marker::PhantomData<fn() -> K>,
}

impl<K> ObjectResource<K> {
    pub fn new(client: Client, kind: &'static str) -> Self {
        Self {
            client,
            kind,
            _marker: std::marker::PhantomData,
        }
    }
}

#[async_trait]
impl<K> Resource for ObjectResource<K>
where
    K: KubeResource<Scope = NamespaceResourceScope, DynamicType = ()>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static,
{
    type Params = ObjectParams<K>;
    type Object = K;

    #[tracing::instrument(skip_all, fields(kind = self.kind))]
    async fn create(&self, params: ObjectParams<K>, dry_run: bool) -> Result<K> {
        let obj = params
            .object
            .ok_or_else(|| Error::Config(format!("{} object not specified", self.kind)))?;
        if dry_run {
            return Ok(obj);
        }
        let ns = obj
            .meta()
            .namespace
            .clone()
            .unwrap_or_else(|| namespace_or_default(&params.namespace));
        let api: Api<K> = Api::namespaced(self.client.clone(), &ns);
        Ok(api.create(&PostParams::default(), &obj).await?)
    }

    #[tracing::instrument(skip_all, fields(kind = self.kind))]
    async fn update(&self, params: ObjectParams<K>, dry_run: bool) -> Result<K> {
        let obj = params
            .object
            .ok_or_else(|| Error::Config(format!("{} object not specified", self.kind)))?;
        if dry_run {
            return Ok(obj);
        }
        let ns = obj
            .meta()
            .namespace
            .clone()
            .unwrap_or_else(|| namespace_or_default(&params.namespace));
        let api: Api<K> = Api::namespaced(self.client.clone(), &ns);
        Ok(api
            .replace(&obj.name_any(), &PostParams::default(), &obj)
            .await?)
    }

    #[tracing::instrument(skip_all, fields(kind = self.kind))]
    async fn get(&self, params: &ObjectParams<K>) -> Result<K> {
        let (name, ns) = params.target(self.kind)?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &ns);
        Ok(api.get(&name).await?)
    }

    #[tracing::instrument(skip_all, fields(kind = self.kind))]
    async fn delete(&self, params: &ObjectParams<K>) -> Result<()> {
        let (name, ns) = params.target(self.kind)?;
        let api: Api<K> = Api::namespaced(self.client.clone(), &ns);
        api.delete(&name, &DeleteParams::default()).await?;
        Ok(())
    }
}

/// Every supported resource kind on one shared client.
#[derive(Clone)]
pub struct KubernetesRepository {
    pub pod: ObjectResource<Pod>,
    pub deployment: DeploymentResource,
    pub replica_set: ObjectResource<ReplicaSet>,
    pub daemon_set: ObjectResource<DaemonSet>,
    pub job: ObjectResource<Job>,
}

impl KubernetesRepository {
    pub fn new(client: Client) -> Self {
        Self {
            pod: ObjectResource::new(client.clone(), "pod"),
            deployment: DeploymentResource::new(client.clone()),
            replica_set: ObjectResource::new(client.clone(), "replicaSet"),
            daemon_set: ObjectResource::new(client.clone(), "daemonSet"),
            job: ObjectResource::new(client, "job"),
        }
    }
}

#[cfg(test)]
pub(crate) fn offline_client() -> Client {
    let config = kube::Config::new("http://127.0.0.1:1".parse().expect("valid uri"));
    Client::try_from(config).expect("client")
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::serde_json::{self, json};

    fn job(name: &str) -> Job {
        serde_json::from_value(json!({
            "metadata": {"name": name, "namespace": "perf"},
            "spec": {"template": {"spec": {"containers": []}}},
        }))
        .unwrap()
    }

    #[test]
    fn test_target_is_exclusive() {
        let params = ObjectParams {
            name: "a".to_string(),
            object: Some(job("b")),
            ..Default::default()
        };
        let err = params.target("job").unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_target_from_object() {
        let params = ObjectParams {
            object: Some(job("bench")),
            ..Default::default()
        };
        let (name, ns) = params.target("job").unwrap();
        assert_eq!(name, "bench");
        assert_eq!(ns, "perf");
    }

    #[test]
    fn test_target_defaults_namespace() {
        let params: ObjectParams<Job> = ObjectParams {
            name: "bench".to_string(),
            ..Default::default()
        };
        assert_eq!(params.target("job").unwrap().1, "default");
    }

    #[tokio::test]
    async fn test_dry_run_create_returns_object() {
        let repo = KubernetesRepository::new(offline_client());
        let created = repo
            .job
            .create(
                ObjectParams {
                    object: Some(job("bench")),
                    ..Default::default()
                },
                true,
            )
            .await
            .unwrap();
        assert_eq!(created.name_any(), "bench");
    }
}
