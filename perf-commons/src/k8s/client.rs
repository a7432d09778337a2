use std::{collections::BTreeMap, time::Duration};

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::api::ListParams;
use kube::ResourceExt;

use super::connector::{K8sConnector, KubeConnector};
use super::labels::{join_selectors, selector_string};
use super::waiters::{self, ResourceKind, DEFAULT_POLL_INTERVAL};
use crate::error::{Error, Result};

pub const ZONE_LABEL: &str = "topology.kubernetes.io/zone";
pub const WORKER_SELECTOR: &str = "node-role.kubernetes.io/worker=";
const RUNNING_SELECTOR: &str = "status.phase=Running";

/// Pod lookup options. Only running pods are returned unless `all` is set.
#[derive(Debug, Clone, Default)]
pub struct PodParams {
    pub name: String,
    /// Restrict to pods selected by this deployment.
    pub deployment: String,
    pub all: bool,
    pub label_selector: String,
    pub field_selector: String,
    pub resource_version: String,
}

#[async_trait]
pub trait KClient: Send + Sync {
    async fn get_version(&self) -> Result<String>;

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod>;
    async fn get_pods(&self, namespace: &str, params: &PodParams) -> Result<Vec<Pod>>;

    /// Worker node count per zone.
    async fn get_zones(&self) -> Result<BTreeMap<String, usize>>;
    async fn is_cluster_multi_az(&self) -> Result<bool>;
    async fn get_zone_for_node(&self, node_name: &str) -> Result<String>;

    async fn wait_for_object(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        timeout: Duration,
    ) -> Result<bool>;
}

pub struct K8sClient<C = KubeConnector> {
    connector: C,
    poll_interval: Duration,
}

impl<C: K8sConnector> K8sClient<C> {
    pub fn new(connector: C) -> Self {
        Self {
            connector,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}

fn zone_of(labels: &BTreeMap<String, String>, node: &str) -> Result<String> {
    labels
        .get(ZONE_LABEL)
        .filter(|z| !z.is_empty())
        .cloned()
        .ok_or_else(|| Error::Backend(format!("no zone label on Node: {node}")))
}

#[async_trait]
impl<C: K8sConnector> KClient for K8sClient<C> {
    async fn get_version(&self) -> Result<String> {
        self.connector.server_version().await
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.connector.get_pod(namespace, name).await
    }

    #[tracing::instrument(skip(self))]
    async fn get_pods(&self, namespace: &str, params: &PodParams) -> Result<Vec<Pod>> {
        if !params.name.is_empty() {
            return Ok(vec![self.connector.get_pod(namespace, &params.name).await?]);
        }

        let base = if params.all { "" } else { RUNNING_SELECTOR };
        let field_selector = join_selectors([base, params.field_selector.as_str()]);

        let mut label_selector = params.label_selector.clone();
        if !params.deployment.is_empty() {
            let deployment = self
                .connector
                .get_deployment(namespace, &params.deployment)
                .await?;
            let selector = deployment
                .spec
                .as_ref()
                .map(|s| selector_string(&s.selector))
                .unwrap_or_default();
            label_selector = join_selectors([label_selector.as_str(), selector.as_str()]);
        }

        let mut lp = ListParams::default();
        if !label_selector.is_empty() {
            lp = lp.labels(&label_selector);
        }
        if !field_selector.is_empty() {
            lp = lp.fields(&field_selector);
        }
        if !params.resource_version.is_empty() {
            lp.resource_version = Some(params.resource_version.clone());
        }
        self.connector.list_pods(Some(namespace), &lp).await
    }

    #[tracing::instrument(skip(self))]
    async fn get_zones(&self) -> Result<BTreeMap<String, usize>> {
        let nodes = self
            .connector
            .list_nodes(&ListParams::default().labels(WORKER_SELECTOR))
            .await?;

        let mut zones = BTreeMap::new();
        for node in &nodes {
            let zone = zone_of(node.labels(), &node.name_any())?;
            *zones.entry(zone).or_insert(0) += 1;
        }
        Ok(zones)
    }

    async fn is_cluster_multi_az(&self) -> Result<bool> {
        Ok(self.get_zones().await?.len() > 1)
    }

    async fn get_zone_for_node(&self, node_name: &str) -> Result<String> {
        let node = self.connector.get_node(node_name).await?;
        zone_of(node.labels(), node_name)
    }

    async fn wait_for_object(
        &self,
        namespace: &str,
        kind: ResourceKind,
        name: &str,
        timeout: Duration,
    ) -> Result<bool> {
        waiters::wait_for_object(
            &self.connector,
            kind,
            namespace,
            name,
            timeout,
            self.poll_interval,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::fake::{node, pod, FakeConnector};
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::serde_json::{self, json};

    fn worker(name: &str, zone: &str) -> k8s_openapi::api::core::v1::Node {
        node(
            name,
            &[("node-role.kubernetes.io/worker", ""), (ZONE_LABEL, zone)],
            false,
        )
    }

    #[tokio::test]
    async fn test_get_zones() {
        let client = K8sClient::new(FakeConnector {
            nodes: vec![
                worker("w1", "us-east-1a"),
                worker("w2", "us-east-1a"),
                worker("w3", "us-east-1b"),
                node("m1", &[("node-role.kubernetes.io/master", "")], true),
            ],
            ..Default::default()
        });
        let zones = client.get_zones().await.unwrap();
        assert_eq!(zones["us-east-1a"], 2);
        assert_eq!(zones["us-east-1b"], 1);
        assert!(client.is_cluster_multi_az().await.unwrap());
        assert_eq!(client.get_zone_for_node("w3").await.unwrap(), "us-east-1b");
    }

    #[tokio::test]
    async fn test_get_zones_missing_label() {
        let client = K8sClient::new(FakeConnector {
            nodes: vec![node("w1", &[("node-role.kubernetes.io/worker", "")], false)],
            ..Default::default()
        });
        let err = client.get_zones().await.unwrap_err();
        assert_eq!(err.to_string(), "no zone label on Node: w1");
    }

    #[tokio::test]
    async fn test_get_pods_running_only_by_default() {
        let client = K8sClient::new(FakeConnector {
            pods: vec![
                pod("perf", "a", "w1", "Running", &[("app", "web")]),
                pod("perf", "b", "w1", "Pending", &[("app", "web")]),
                pod("other", "c", "w1", "Running", &[("app", "web")]),
            ],
            ..Default::default()
        });
        let running = client.get_pods("perf", &PodParams::default()).await.unwrap();
        assert_eq!(running.len(), 1);

        let all = client
            .get_pods(
                "perf",
                &PodParams {
                    all: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_get_pods_by_deployment_selector() {
        let deployment: Deployment = serde_json::from_value(json!({
            "metadata": {"name": "web", "namespace": "perf"},
            "spec": {
                "selector": {"matchLabels": {"app": "web"}},
                "template": {"spec": {"containers": []}},
            },
        }))
        .unwrap();
        let client = K8sClient::new(FakeConnector {
            deployments: vec![deployment],
            pods: vec![
                pod("perf", "a", "w1", "Running", &[("app", "web")]),
                pod("perf", "b", "w1", "Running", &[("app", "db")]),
            ],
            ..Default::default()
        });
        let pods = client
            .get_pods(
                "perf",
                &PodParams {
                    deployment: "web".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].name_any(), "a");
    }

    #[tokio::test]
    async fn test_get_pods_by_name() {
        let client = K8sClient::new(FakeConnector {
            pods: vec![pod("perf", "a", "w1", "Pending", &[])],
            ..Default::default()
        });
        let pods = client
            .get_pods(
                "perf",
                &PodParams {
                    name: "a".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(pods.len(), 1);
    }
}
