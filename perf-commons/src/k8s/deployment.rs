use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{DeleteParams, PostParams};
use kube::{Api, Client};

use super::affinity::AffinityRules;
use super::labels::parse_labels;
use super::resource::{exclusive_error, namespace_or_default, Resource};
use crate::error::{Error, Result};

/// Deployment params. Label fields use the `k1=v1;k2=v2` form and affinity
/// fields the rule syntax of [`super::affinity`].
#[derive(Debug, Clone, Default)]
pub struct DeploymentParams {
    pub name: String,
    pub namespace: String,
    pub replicas: i32,
    pub selector_labels: String,
    pub metadata_labels: String,
    pub affinity: AffinityRules,
    pub node_selector_labels: String,
    pub host_network: bool,
    pub service_account_name: String,
    pub containers: Vec<Container>,
    /// A ready-made object; mutually exclusive with `name`.
    pub deployment: Option<Deployment>,
}

/// An empty string means unset; anything else must parse.
fn labels(field: &str, input: &str) -> Result<Option<BTreeMap<String, String>>> {
    if input.trim().is_empty() {
        return Ok(None);
    }
    parse_labels(input)
        .map(Some)
        .ok_or_else(|| Error::Config(format!("invalid {field} labels: {input:?}")))
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

impl DeploymentParams {
    fn validate(&self) -> Result<()> {
        if !self.name.is_empty() && self.deployment.is_some() {
            return Err(exclusive_error("deployment"));
        }
        Ok(())
    }

    fn target(&self) -> Result<(String, String)> {
        self.validate()?;
        match &self.deployment {
            Some(d) => Ok((
                d.metadata.name.clone().unwrap_or_default(),
                d.metadata
                    .namespace
                    .clone()
                    .unwrap_or_else(|| namespace_or_default(&self.namespace)),
            )),
            None if self.name.is_empty() => {
                Err(Error::Config("deployment name not specified".to_string()))
            }
            None => Ok((self.name.clone(), namespace_or_default(&self.namespace))),
        }
    }

    /// Builds the Deployment object. Fails when any label string is malformed.
    pub fn build(&self) -> Result<Deployment> {
        let mut template = PodSpec::default();
        self.apply_pod_spec(&mut template)?;

        Ok(Deployment {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                namespace: Some(namespace_or_default(&self.namespace)),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(self.replicas),
                selector: LabelSelector {
                    match_labels: labels("selector", &self.selector_labels)?,
                    match_expressions: None,
                },
                template: PodTemplateSpec {
                    metadata: Some(ObjectMeta {
                        labels: labels("metadata", &self.metadata_labels)?,
                        ..Default::default()
                    }),
                    spec: Some(template),
                },
                ..Default::default()
            }),
            status: None,
        })
    }

    fn apply_pod_spec(&self, spec: &mut PodSpec) -> Result<()> {
        spec.node_selector = labels("node selector", &self.node_selector_labels)?;
        spec.affinity = self.affinity.to_affinity();
        spec.containers = self.containers.clone();
        spec.host_network = self.host_network.then_some(true);
        spec.service_account_name = non_empty(&self.service_account_name);
        Ok(())
    }

    /// Overlays replicas and pod spec fields onto a live object.
    pub fn apply_to(&self, deployment: &mut Deployment) -> Result<()> {
        let spec = deployment.spec.get_or_insert_with(Default::default);
        spec.replicas = Some(self.replicas);
        let pod_spec = spec.template.spec.get_or_insert_with(Default::default);
        self.apply_pod_spec(pod_spec)
    }
}

#[derive(Clone)]
pub struct DeploymentResource {
    client: Client,
}

impl DeploymentResource {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl Resource for DeploymentResource {
    type Params = DeploymentParams;
    type Object = Deployment;

    #[tracing::instrument(skip_all, fields(name = %params.name))]
    async fn create(&self, params: DeploymentParams, dry_run: bool) -> Result<Deployment> {
        params.validate()?;
        let deployment = match params.deployment {
            Some(ref d) => d.clone(),
            None => params.build()?,
        };
        if dry_run {
            return Ok(deployment);
        }
        let ns = deployment
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| namespace_or_default(&params.namespace));
        let created = self
            .api(&ns)
            .create(&PostParams::default(), &deployment)
            .await?;
        tracing::info!(namespace = %ns, "deployment created");
        Ok(created)
    }

    #[tracing::instrument(skip_all, fields(name = %params.name))]
    async fn update(&self, params: DeploymentParams, dry_run: bool) -> Result<Deployment> {
        let (name, ns) = params.target()?;
        let deployment = match params.deployment {
            Some(ref d) => d.clone(),
            None => {
                let mut current = self.get(&params).await.map_err(|e| {
                    Error::Config(format!(
                        "invalid operation, deployment {name} not found to update: {e}"
                    ))
                })?;
                params.apply_to(&mut current)?;
                current
            }
        };
        if dry_run {
            return Ok(deployment);
        }
        Ok(self
            .api(&ns)
            .replace(&name, &PostParams::default(), &deployment)
            .await?)
    }

    #[tracing::instrument(skip_all)]
    async fn get(&self, params: &DeploymentParams) -> Result<Deployment> {
        let (name, ns) = params.target()?;
        Ok(self.api(&ns).get(&name).await?)
    }

    #[tracing::instrument(skip_all)]
    async fn delete(&self, params: &DeploymentParams) -> Result<()> {
        let (name, ns) = params.target()?;
        self.api(&ns).delete(&name, &DeleteParams::default()).await?;
        Ok(())
    }
}
