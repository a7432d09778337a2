//! OpenShift cluster discovery.
//!
//! [`ClusterMetadataCollector::get_cluster_metadata`] reads the cluster
//! version, node inventory and, on OpenShift, the infrastructure, network
//! and install-config objects, and folds them into one [`ClusterMetadata`].
//! A missing `Infrastructure/cluster` means the cluster is plain Kubernetes;
//! the OpenShift-only fields are then left empty.

use std::{collections::BTreeSet, sync::LazyLock};

use k8s_openapi::serde_json::{self, Value};
use kube::api::{DynamicObject, GroupVersionKind, ListParams};
use kube::ResourceExt;
use regex::Regex;

use crate::error::{Error, Result};
use crate::k8s::client::WORKER_SELECTOR;
use crate::k8s::connector::{K8sConnector, KubeConnector};

mod types;

pub use types::{classify_nodes, ipsec_state, ClusterMetadata};
use types::*;

pub const MONITORING_NAMESPACE: &str = "openshift-monitoring";
pub const PROMETHEUS_NAME: &str = "prometheus-k8s";
/// Lifetime of the Prometheus bearer token, 10h.
pub const TOKEN_EXPIRATION_SECONDS: i64 = 10 * 60 * 60;
const RUNNING: &str = "Running";
const VERSION_LABEL: &str = "app.kubernetes.io/version";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct VersionInfo {
    ocp_version: String,
    ocp_major_version: String,
    k8s_version: String,
}

static MAJOR_VERSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([0-9]\.[0-9]+)-*").expect("valid major version pattern"));

/// Extracts `X.Y` from an OCP release string such as `4.16.3`.
pub fn major_version(version: &str) -> String {
    MAJOR_VERSION
        .find(version)
        .map(|m| m.as_str().to_string())
        .unwrap_or_default()
}

fn nested_str<'a>(obj: &'a DynamicObject, pointer: &str) -> Option<&'a str> {
    obj.data.pointer(pointer).and_then(Value::as_str)
}

/// A metadata query failed; `partial` holds what was collected before it.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct MetadataError {
    pub partial: Box<ClusterMetadata>,
    pub error: Error,
}

pub struct ClusterMetadataCollector<C = KubeConnector> {
    connector: C,
}

impl<C: K8sConnector> ClusterMetadataCollector<C> {
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    async fn require(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<DynamicObject> {
        self.connector
            .get_dynamic(gvk, namespace, name)
            .await?
            .ok_or_else(|| {
                let path = match namespace {
                    Some(ns) => format!("{ns}/{name}"),
                    None => name.to_string(),
                };
                Error::Backend(format!("{} {path} not found", gvk.kind))
            })
    }

    /// Any failing query aborts the whole report. The error carries the
    /// fields gathered up to that point, which callers must not trust as a
    /// complete picture.
    #[tracing::instrument(skip(self))]
    pub async fn get_cluster_metadata(&self) -> std::result::Result<ClusterMetadata, MetadataError> {
        let mut metadata = ClusterMetadata::default();
        match self.collect(&mut metadata).await {
            Ok(()) => Ok(metadata),
            Err(error) => Err(MetadataError {
                partial: Box::new(metadata),
                error,
            }),
        }
    }

    async fn collect(&self, metadata: &mut ClusterMetadata) -> Result<()> {
        let infra = self.infrastructure().await?;
        if let Some(infra) = &infra {
            metadata.cluster_name = infra.status.infrastructure_name.clone();
            metadata.platform = infra.status.platform.clone();
            metadata.region = infra.region();
            metadata.cluster_type = infra.cluster_type();
        }

        let version = self.version_info().await?;
        metadata.ocp_version = version.ocp_version;
        metadata.ocp_major_version = version.ocp_major_version;
        metadata.k8s_version = version.k8s_version;

        let nodes = self.connector.list_nodes(&ListParams::default()).await?;
        classify_nodes(&nodes, metadata);

        if infra.is_none() {
            tracing::info!("no Infrastructure/cluster, skipping OpenShift metadata");
            return Ok(());
        }

        metadata.sdn_type = self.sdn_type().await?;

        let install_config = self.install_config().await?;
        metadata.fips = install_config.fips;
        metadata.publish = install_config.publish.clone();
        metadata.worker_arch = install_config.worker_arch();
        metadata.control_plane_arch = install_config.control_plane.architecture.clone();

        let (ipsec, mode) = self.ipsec().await?;
        metadata.ipsec = ipsec;
        metadata.ipsec_mode = mode;
        Ok(())
    }

    async fn infrastructure(&self) -> Result<Option<Infrastructure>> {
        let Some(obj) = self
            .connector
            .get_dynamic(&infrastructure_gvk(), None, "cluster")
            .await?
        else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_value(obj.data)?))
    }

    async fn version_info(&self) -> Result<VersionInfo> {
        let mut info = VersionInfo {
            k8s_version: self.connector.server_version().await?,
            ..Default::default()
        };
        let Some(obj) = self
            .connector
            .get_dynamic(&cluster_version_gvk(), None, "version")
            .await?
        else {
            return Ok(info);
        };
        let cv: ClusterVersion = serde_json::from_value(obj.data)?;
        if let Some(version) = cv.last_completed() {
            info.ocp_version = version.to_string();
        }
        info.ocp_major_version = major_version(&info.ocp_version);
        Ok(info)
    }

    async fn sdn_type(&self) -> Result<String> {
        let network = self.require(&network_config_gvk(), None, "cluster").await?;
        nested_str(&network, "/status/networkType")
            .map(str::to_string)
            .ok_or_else(|| Error::missing("config.openshift.io/v1 Network cluster", "status.networkType"))
    }

    async fn install_config(&self) -> Result<InstallConfig> {
        let cm = self
            .connector
            .get_config_map("kube-system", "cluster-config-v1")
            .await?
            .ok_or_else(|| Error::Backend("ConfigMap kube-system/cluster-config-v1 not found".to_string()))?;
        let raw = cm
            .data
            .as_ref()
            .and_then(|d| d.get("install-config"))
            .map(String::as_str)
            .unwrap_or_default();
        if raw.trim().is_empty() {
            return Ok(InstallConfig::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    async fn ipsec(&self) -> Result<(bool, String)> {
        let network = self.require(&network_operator_gvk(), None, "cluster").await?;
        Ok(ipsec_state(&network.data))
    }

    /// Prometheus route URL and a bearer token for its service account.
    #[tracing::instrument(skip(self))]
    pub async fn get_prometheus(&self) -> Result<(String, String)> {
        let route = self
            .require(&route_gvk(), Some(MONITORING_NAMESPACE), PROMETHEUS_NAME)
            .await?;
        let host = nested_str(&route, "/spec/host").ok_or_else(|| {
            Error::missing(format!("{MONITORING_NAMESPACE}/{PROMETHEUS_NAME} route"), "spec.host")
        })?;
        let token = self
            .connector
            .create_token(MONITORING_NAMESPACE, PROMETHEUS_NAME, TOKEN_EXPIRATION_SECONDS)
            .await?;
        Ok((format!("https://{host}"), token))
    }

    /// Running pods scheduled on worker nodes.
    pub async fn get_current_pod_count(&self) -> Result<usize> {
        let workers: BTreeSet<String> = self
            .connector
            .list_nodes(&ListParams::default().labels(WORKER_SELECTOR))
            .await?
            .iter()
            .map(|n| n.name_any())
            .collect();
        let pods = self
            .connector
            .list_pods(None, &ListParams::default().fields(&format!("status.phase={RUNNING}")))
            .await?;
        Ok(pods
            .iter()
            .filter(|p| {
                p.spec
                    .as_ref()
                    .and_then(|s| s.node_name.as_ref())
                    .is_some_and(|n| workers.contains(n))
            })
            .count())
    }

    pub async fn get_current_vmi_count(&self) -> Result<usize> {
        let vmis = self
            .connector
            .list_dynamic(&vmi_gvk(), None, &ListParams::default())
            .await?;
        let mut count = 0;
        for vmi in &vmis {
            let phase = nested_str(vmi, "/status/phase").ok_or_else(|| {
                Error::missing(
                    format!(
                        "kubevirt.io/v1/namespaces/{}/virtualmachineinstances/{}",
                        vmi.namespace().unwrap_or_default(),
                        vmi.name_any()
                    ),
                    "status.phase",
                )
            })?;
            if phase == RUNNING {
                count += 1;
            }
        }
        Ok(count)
    }

    pub async fn get_default_ingress_domain(&self) -> Result<String> {
        let controller = self
            .require(&ingress_controller_gvk(), Some("openshift-ingress-operator"), "default")
            .await?;
        nested_str(&controller, "/status/domain")
            .map(str::to_string)
            .ok_or_else(|| {
                Error::missing("openshift-ingress-operator/default IngressController", "status.domain")
            })
    }

    /// Version label of the `openshift-cnv/virt-operator` deployment.
    pub async fn get_ocp_virtualization_version(&self) -> Result<String> {
        let operator = self
            .connector
            .get_deployment("openshift-cnv", "virt-operator")
            .await?;
        operator
            .labels()
            .get(VERSION_LABEL)
            .cloned()
            .ok_or_else(|| Error::missing("openshift-cnv/virt-operator deployment", format!("label {VERSION_LABEL}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::fake::{dynamic, node, pod, FakeConnector};
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::serde_json::json;

    const INSTALL_CONFIG: &str = r#"
apiVersion: v1
baseDomain: perf.example.com
compute:
- architecture: arm64
  name: worker
  replicas: 3
controlPlane:
  architecture: amd64
  name: master
  replicas: 3
fips: true
publish: External
"#;

    fn openshift() -> FakeConnector {
        let install: ConfigMap = serde_json::from_value(json!({
            "metadata": {"name": "cluster-config-v1", "namespace": "kube-system"},
            "data": {"install-config": INSTALL_CONFIG},
        }))
        .unwrap();
        FakeConnector {
            version: "v1.29.5+29c95f3".to_string(),
            dynamic: vec![
                dynamic(
                    &infrastructure_gvk(),
                    None,
                    "cluster",
                    json!({"status": {
                        "infrastructureName": "perf-x8k2l",
                        "platform": "AWS",
                        "platformStatus": {"type": "AWS", "aws": {"region": "eu-west-1"}},
                    }}),
                ),
                dynamic(
                    &cluster_version_gvk(),
                    None,
                    "version",
                    json!({"status": {"history": [
                        {"state": "Partial", "version": "4.16.2"},
                        {"state": "Completed", "version": "4.16.1"},
                        {"state": "Completed", "version": "4.15.9"},
                    ]}}),
                ),
                dynamic(
                    &network_config_gvk(),
                    None,
                    "cluster",
                    json!({"status": {"networkType": "OVNKubernetes"}}),
                ),
                dynamic(
                    &network_operator_gvk(),
                    None,
                    "cluster",
                    json!({"spec": {"defaultNetwork": {"ovnKubernetesConfig": {"ipsecConfig": {"mode": "Full"}}}}}),
                ),
            ],
            nodes: vec![
                node("m0", &[(MASTER_LABEL, ""), (INSTANCE_TYPE_LABEL, "m6i.xlarge")], true),
                node("w0", &[(WORKER_LABEL, ""), (INSTANCE_TYPE_LABEL, "m6g.2xlarge")], false),
                node("w1", &[(WORKER_LABEL, ""), (INSTANCE_TYPE_LABEL, "m6g.2xlarge")], false),
            ],
            config_maps: vec![install],
            ..Default::default()
        }
    }

    #[test]
    fn test_major_version() {
        assert_eq!(major_version("4.16.1"), "4.16");
        assert_eq!(major_version("4.17.0-ec.2"), "4.17");
        assert_eq!(major_version(""), "");
        assert_eq!(major_version("v4.18"), "4.18");
        assert_eq!(major_version("nightly"), "");
    }

    #[tokio::test]
    async fn test_openshift_cluster() {
        let md = ClusterMetadataCollector::new(openshift())
            .get_cluster_metadata()
            .await
            .unwrap();
        assert_eq!(md.cluster_name, "perf-x8k2l");
        assert_eq!(md.platform, "AWS");
        assert_eq!(md.region, "eu-west-1");
        assert_eq!(md.cluster_type, DEFAULT_CLUSTER_TYPE);
        assert_eq!(md.ocp_version, "4.16.1");
        assert_eq!(md.ocp_major_version, "4.16");
        assert_eq!(md.k8s_version, "v1.29.5+29c95f3");
        assert_eq!(md.master_nodes_count, 1);
        assert_eq!(md.worker_nodes_count, 2);
        assert_eq!(md.total_nodes, 3);
        assert_eq!(md.sdn_type, "OVNKubernetes");
        assert!(md.fips);
        assert_eq!(md.publish, "External");
        assert_eq!(md.worker_arch, "arm64");
        assert_eq!(md.control_plane_arch, "amd64");
        assert!(md.ipsec);
        assert_eq!(md.ipsec_mode, "Full");
    }

    #[tokio::test]
    async fn test_plain_kubernetes() {
        let md = ClusterMetadataCollector::new(FakeConnector {
            version: "v1.30.0".to_string(),
            nodes: vec![node("kind-control-plane", &[(CONTROL_PLANE_LABEL, "")], false)],
            ..Default::default()
        })
        .get_cluster_metadata()
        .await
        .unwrap();
        assert_eq!(md.k8s_version, "v1.30.0");
        assert_eq!(md.ocp_version, "");
        assert_eq!(md.master_nodes_count, 1);
        assert_eq!(md.sdn_type, "");
        assert_eq!(md.ipsec_mode, "");
    }

    #[tokio::test]
    async fn test_missing_network_type_aborts() {
        let mut fake = openshift();
        fake.dynamic.retain(|o| {
            o.types.as_ref().map(|t| t.api_version.as_str()) != Some("config.openshift.io/v1")
                || o.types.as_ref().map(|t| t.kind.as_str()) != Some("Network")
        });
        fake.dynamic.push(dynamic(&network_config_gvk(), None, "cluster", json!({"status": {}})));
        let err = ClusterMetadataCollector::new(fake)
            .get_cluster_metadata()
            .await
            .unwrap_err();
        assert!(err.to_string().contains("status.networkType"));
        assert!(matches!(err.error, Error::MissingField { .. }));

        // collected before the network lookup failed
        assert_eq!(err.partial.cluster_name, "perf-x8k2l");
        assert_eq!(err.partial.ocp_version, "4.16.1");
        assert_eq!(err.partial.worker_nodes_count, 2);
        assert_eq!(err.partial.sdn_type, "");
        assert_eq!(err.partial.ipsec_mode, "");
    }

    #[tokio::test]
    async fn test_infrastructure_error_is_surfaced() {
        let mut fake = openshift();
        fake.failing_kinds.push("Infrastructure".to_string());
        let err = ClusterMetadataCollector::new(fake)
            .get_cluster_metadata()
            .await
            .unwrap_err();
        assert_eq!(*err.partial, ClusterMetadata::default());
    }

    #[tokio::test]
    async fn test_get_prometheus() {
        let mut fake = openshift();
        fake.token = "sha256~token".to_string();
        fake.dynamic.push(dynamic(
            &route_gvk(),
            Some(MONITORING_NAMESPACE),
            PROMETHEUS_NAME,
            json!({"spec": {"host": "prometheus-k8s-openshift-monitoring.apps.perf.example.com"}}),
        ));
        let (url, token) = ClusterMetadataCollector::new(fake)
            .get_prometheus()
            .await
            .unwrap();
        assert_eq!(url, "https://prometheus-k8s-openshift-monitoring.apps.perf.example.com");
        assert_eq!(token, "sha256~token");
    }

    #[tokio::test]
    async fn test_current_pod_count() {
        let mut fake = openshift();
        fake.pods = vec![
            pod("a", "p0", "w0", "Running", &[]),
            pod("a", "p1", "w1", "Running", &[]),
            pod("a", "p2", "w1", "Pending", &[]),
            pod("b", "p3", "m0", "Running", &[]),
        ];
        let count = ClusterMetadataCollector::new(fake)
            .get_current_pod_count()
            .await
            .unwrap();
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_current_vmi_count() {
        let mut fake = openshift();
        fake.dynamic.push(dynamic(&vmi_gvk(), Some("vm"), "a", json!({"status": {"phase": "Running"}})));
        fake.dynamic.push(dynamic(&vmi_gvk(), Some("vm"), "b", json!({"status": {"phase": "Scheduling"}})));
        let collector = ClusterMetadataCollector::new(fake);
        assert_eq!(collector.get_current_vmi_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_default_ingress_domain() {
        let mut fake = openshift();
        fake.dynamic.push(dynamic(
            &ingress_controller_gvk(),
            Some("openshift-ingress-operator"),
            "default",
            json!({"status": {"domain": "apps.perf.example.com"}}),
        ));
        let domain = ClusterMetadataCollector::new(fake)
            .get_default_ingress_domain()
            .await
            .unwrap();
        assert_eq!(domain, "apps.perf.example.com");
    }
}
