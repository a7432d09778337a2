//! In-memory connector for unit tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::{
    apps::v1::Deployment,
    core::v1::{ConfigMap, Node, Pod},
    storage::v1::StorageClass,
};
use k8s_openapi::serde_json::{self, Value};
use kube::api::{ApiResource, DynamicObject, GroupVersionKind, ListParams};
use kube::ResourceExt;
use parking_lot::Mutex;

use super::connector::K8sConnector;
use crate::error::{Error, Result};

#[derive(Default)]
pub struct FakeConnector {
    pub version: String,
    pub dynamic: Vec<DynamicObject>,
    pub nodes: Vec<Node>,
    pub pods: Vec<Pod>,
    pub deployments: Vec<Deployment>,
    pub config_maps: Vec<ConfigMap>,
    pub storage_classes: Vec<StorageClass>,
    pub token: String,
    /// Kinds whose lookups fail with a 500.
    pub failing_kinds: Vec<String>,
    /// Number of `get_dynamic` calls, for poll-count assertions.
    pub gets: Mutex<usize>,
}

pub fn not_found(name: &str) -> Error {
    Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{name} not found"),
        reason: "NotFound".to_string(),
        code: 404,
    }))
}

fn server_error() -> Error {
    Error::Kube(kube::Error::Api(kube::core::ErrorResponse {
        status: "Failure".to_string(),
        message: "internal error".to_string(),
        reason: "InternalError".to_string(),
        code: 500,
    }))
}

pub fn dynamic(gvk: &GroupVersionKind, namespace: Option<&str>, name: &str, data: Value) -> DynamicObject {
    let mut obj = DynamicObject::new(name, &ApiResource::from_gvk(gvk)).data(data);
    if let Some(ns) = namespace {
        obj = obj.within(ns);
    }
    obj
}

pub fn node(name: &str, labels: &[(&str, &str)], tainted: bool) -> Node {
    let mut value = serde_json::json!({
        "metadata": {
            "name": name,
            "labels": labels.iter().map(|(k, v)| (k.to_string(), Value::from(*v))).collect::<serde_json::Map<_, _>>(),
        },
        "spec": {},
    });
    if tainted {
        value["spec"]["taints"] =
            serde_json::json!([{"key": "node-role.kubernetes.io/master", "effect": "NoSchedule"}]);
    }
    serde_json::from_value(value).expect("valid node")
}

pub fn pod(namespace: &str, name: &str, node: &str, phase: &str, labels: &[(&str, &str)]) -> Pod {
    serde_json::from_value(serde_json::json!({
        "metadata": {
            "name": name,
            "namespace": namespace,
            "labels": labels.iter().map(|(k, v)| (k.to_string(), Value::from(*v))).collect::<serde_json::Map<_, _>>(),
        },
        "spec": {"nodeName": node, "containers": []},
        "status": {"phase": phase},
    }))
    .expect("valid pod")
}

/// Equality-based selectors only: `k=v`, `k!=v`, `k`.
fn matches_labels(labels: &BTreeMap<String, String>, selector: Option<&str>) -> bool {
    let Some(selector) = selector else {
        return true;
    };
    selector
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .all(|term| {
            if let Some((k, v)) = term.split_once("!=") {
                labels.get(k).map(String::as_str) != Some(v)
            } else if let Some((k, v)) = term.split_once('=') {
                labels.get(k).map(String::as_str) == Some(v)
            } else {
                labels.contains_key(term)
            }
        })
}

fn matches_pod_fields(pod: &Pod, selector: Option<&str>) -> bool {
    let Some(selector) = selector else {
        return true;
    };
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|term| match term.split_once('=') {
            Some(("status.phase", phase)) => {
                pod.status.as_ref().and_then(|s| s.phase.as_deref()) == Some(phase)
            }
            Some(("spec.nodeName", node)) => {
                pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) == Some(node)
            }
            Some(("metadata.name", name)) => pod.metadata.name.as_deref() == Some(name),
            _ => true,
        })
}

fn is_kind(obj: &DynamicObject, gvk: &GroupVersionKind) -> bool {
    obj.types
        .as_ref()
        .is_some_and(|t| t.kind == gvk.kind && t.api_version == gvk.api_version())
}

impl FakeConnector {
    fn check(&self, kind: &str) -> Result<()> {
        if self.failing_kinds.iter().any(|k| k == kind) {
            return Err(server_error());
        }
        Ok(())
    }
}

#[async_trait]
impl K8sConnector for FakeConnector {
    async fn server_version(&self) -> Result<String> {
        Ok(self.version.clone())
    }

    async fn get_dynamic(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>> {
        *self.gets.lock() += 1;
        self.check(&gvk.kind)?;
        Ok(self
            .dynamic
            .iter()
            .find(|o| {
                is_kind(o, gvk)
                    && o.metadata.namespace.as_deref() == namespace
                    && o.name_any() == name
            })
            .cloned())
    }

    async fn list_dynamic(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        params: &ListParams,
    ) -> Result<Vec<DynamicObject>> {
        self.check(&gvk.kind)?;
        Ok(self
            .dynamic
            .iter()
            .filter(|o| is_kind(o, gvk))
            .filter(|o| namespace.is_none() || o.metadata.namespace.as_deref() == namespace)
            .filter(|o| matches_labels(o.labels(), params.label_selector.as_deref()))
            .cloned()
            .collect())
    }

    async fn list_nodes(&self, params: &ListParams) -> Result<Vec<Node>> {
        self.check("Node")?;
        Ok(self
            .nodes
            .iter()
            .filter(|n| matches_labels(n.labels(), params.label_selector.as_deref()))
            .cloned()
            .collect())
    }

    async fn get_node(&self, name: &str) -> Result<Node> {
        self.check("Node")?;
        self.nodes
            .iter()
            .find(|n| n.name_any() == name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn list_pods(&self, namespace: Option<&str>, params: &ListParams) -> Result<Vec<Pod>> {
        self.check("Pod")?;
        Ok(self
            .pods
            .iter()
            .filter(|p| namespace.is_none() || p.metadata.namespace.as_deref() == namespace)
            .filter(|p| matches_labels(p.labels(), params.label_selector.as_deref()))
            .filter(|p| matches_pod_fields(p, params.field_selector.as_deref()))
            .cloned()
            .collect())
    }

    async fn get_pod(&self, namespace: &str, name: &str) -> Result<Pod> {
        self.check("Pod")?;
        self.pods
            .iter()
            .find(|p| p.metadata.namespace.as_deref() == Some(namespace) && p.name_any() == name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn get_deployment(&self, namespace: &str, name: &str) -> Result<Deployment> {
        self.check("Deployment")?;
        self.deployments
            .iter()
            .find(|d| d.metadata.namespace.as_deref() == Some(namespace) && d.name_any() == name)
            .cloned()
            .ok_or_else(|| not_found(name))
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        self.check("ConfigMap")?;
        Ok(self
            .config_maps
            .iter()
            .find(|c| c.metadata.namespace.as_deref() == Some(namespace) && c.name_any() == name)
            .cloned())
    }

    async fn list_storage_classes(&self) -> Result<Vec<StorageClass>> {
        self.check("StorageClass")?;
        Ok(self.storage_classes.clone())
    }

    async fn get_storage_class(&self, name: &str) -> Result<Option<StorageClass>> {
        self.check("StorageClass")?;
        Ok(self
            .storage_classes
            .iter()
            .find(|s| s.name_any() == name)
            .cloned())
    }

    async fn create_token(
        &self,
        _namespace: &str,
        _service_account: &str,
        _expiration_seconds: i64,
    ) -> Result<String> {
        Ok(self.token.clone())
    }
}
