use std::{fmt, str::FromStr, time::Duration};

use k8s_openapi::serde_json::Value;
use kube::api::{DynamicObject, GroupVersionKind};

use super::connector::K8sConnector;
use crate::error::{Error, Result};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Kinds that can be waited on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Deployment,
    ReplicaSet,
    ReplicationController,
    StatefulSet,
    DaemonSet,
    Pod,
    PersistentVolumeClaim,
}

impl ResourceKind {
    pub fn gvk(&self) -> GroupVersionKind {
        let (group, kind) = match self {
            ResourceKind::Deployment => ("apps", "Deployment"),
            ResourceKind::ReplicaSet => ("apps", "ReplicaSet"),
            ResourceKind::StatefulSet => ("apps", "StatefulSet"),
            ResourceKind::DaemonSet => ("apps", "DaemonSet"),
            ResourceKind::ReplicationController => ("", "ReplicationController"),
            ResourceKind::Pod => ("", "Pod"),
            ResourceKind::PersistentVolumeClaim => ("", "PersistentVolumeClaim"),
        };
        GroupVersionKind::gvk(group, "v1", kind)
    }

    /// Readiness as seen in the object status.
    pub fn is_ready(&self, obj: &DynamicObject) -> bool {
        let data = &obj.data;
        let int = |ptr: &str| data.pointer(ptr).and_then(Value::as_i64);
        let phase = || data.pointer("/status/phase").and_then(Value::as_str);

        match self {
            ResourceKind::Deployment
            | ResourceKind::ReplicaSet
            | ResourceKind::ReplicationController
            | ResourceKind::StatefulSet => {
                int("/spec/replicas").unwrap_or(1) == int("/status/readyReplicas").unwrap_or(0)
            }
            ResourceKind::DaemonSet => {
                int("/status/desiredNumberScheduled").unwrap_or(0)
                    == int("/status/numberReady").unwrap_or(0)
            }
            ResourceKind::Pod => phase() == Some("Running"),
            ResourceKind::PersistentVolumeClaim => phase() == Some("Bound"),
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.gvk().kind)
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "deployment" | "deployments" | "deploy" => ResourceKind::Deployment,
            "replicaset" | "replicasets" | "rs" => ResourceKind::ReplicaSet,
            "replicationcontroller" | "replicationcontrollers" | "rc" => {
                ResourceKind::ReplicationController
            }
            "statefulset" | "statefulsets" | "sts" => ResourceKind::StatefulSet,
            "daemonset" | "daemonsets" | "ds" => ResourceKind::DaemonSet,
            "pod" | "pods" | "po" => ResourceKind::Pod,
            "persistentvolumeclaim" | "persistentvolumeclaims" | "pvc" => {
                ResourceKind::PersistentVolumeClaim
            }
            _ => return Err(Error::Config(format!("invalid resource type: {s}"))),
        })
    }
}

/// Polls until the object is ready.
///
/// `Ok(true)` once ready, `Ok(false)` when `timeout` elapses first. A missing
/// object keeps the poll going; any other API error is returned.
#[tracing::instrument(skip(connector))]
pub async fn wait_for_object<C: K8sConnector + ?Sized>(
    connector: &C,
    kind: ResourceKind,
    namespace: &str,
    name: &str,
    timeout: Duration,
    interval: Duration,
) -> Result<bool> {
    let gvk = kind.gvk();
    let poll = async {
        loop {
            if let Some(obj) = connector.get_dynamic(&gvk, Some(namespace), name).await? {
                if kind.is_ready(&obj) {
                    return Ok::<_, Error>(());
                }
            }
            tokio::time::sleep(interval).await;
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(Ok(())) => {
            tracing::debug!("{kind} {namespace}/{name} ready");
            Ok(true)
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            tracing::warn!("timed out waiting for {kind} {namespace}/{name}");
            Ok(false)
        }
    }
}
