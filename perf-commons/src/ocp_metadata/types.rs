use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::serde_json::Value;
use kube::api::GroupVersionKind;
use serde::{Deserialize, Serialize};

pub const MASTER_LABEL: &str = "node-role.kubernetes.io/master";
pub const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";
pub const INFRA_LABEL: &str = "node-role.kubernetes.io/infra";
pub const WORKER_LABEL: &str = "node-role.kubernetes.io/worker";
pub const INSTANCE_TYPE_LABEL: &str = "node.kubernetes.io/instance-type";

pub const CLUSTER_TYPE_TAG: &str = "red-hat-clustertype";
pub const DEFAULT_CLUSTER_TYPE: &str = "self-managed";
pub const COMPLETED_UPDATE: &str = "Completed";
pub const IPSEC_DISABLED: &str = "Disabled";
pub const IPSEC_FULL: &str = "Full";

pub fn infrastructure_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("config.openshift.io", "v1", "Infrastructure")
}

pub fn cluster_version_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("config.openshift.io", "v1", "ClusterVersion")
}

pub fn network_config_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("config.openshift.io", "v1", "Network")
}

pub fn network_operator_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("operator.openshift.io", "v1", "Network")
}

pub fn route_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("route.openshift.io", "v1", "Route")
}

pub fn ingress_controller_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("operator.openshift.io", "v1", "IngressController")
}

pub fn vmi_gvk() -> GroupVersionKind {
    GroupVersionKind::gvk("kubevirt.io", "v1", "VirtualMachineInstance")
}

/// Cluster report printed by `ocp-metadata` and attached to benchmark results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterMetadata {
    pub platform: String,
    pub cluster_type: String,
    pub ocp_version: String,
    pub ocp_major_version: String,
    pub k8s_version: String,
    pub master_nodes_type: String,
    pub worker_nodes_type: String,
    pub master_nodes_count: usize,
    pub infra_nodes_type: String,
    pub worker_nodes_count: usize,
    pub infra_nodes_count: usize,
    pub other_nodes_count: usize,
    pub total_nodes: usize,
    pub sdn_type: String,
    pub cluster_name: String,
    pub region: String,
    pub fips: bool,
    pub publish: String,
    pub worker_arch: String,
    pub control_plane_arch: String,
    pub ipsec: bool,
    pub ipsec_mode: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct Infrastructure {
    pub status: InfrastructureStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct InfrastructureStatus {
    pub infrastructure_name: String,
    pub platform: String,
    pub platform_status: BTreeMap<String, Value>,
}

impl Infrastructure {
    /// Region from whichever platform block carries one.
    pub fn region(&self) -> String {
        self.status
            .platform_status
            .values()
            .find_map(|v| v.get("region").and_then(Value::as_str))
            .unwrap_or_default()
            .to_string()
    }

    pub fn cluster_type(&self) -> String {
        self.status
            .platform_status
            .get("aws")
            .and_then(|aws| aws.get("resourceTags"))
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter(|tag| tag.get("key").and_then(Value::as_str) == Some(CLUSTER_TYPE_TAG))
            .filter_map(|tag| tag.get("value").and_then(Value::as_str))
            .last()
            .unwrap_or(DEFAULT_CLUSTER_TYPE)
            .to_string()
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ClusterVersion {
    pub status: ClusterVersionStatus,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct ClusterVersionStatus {
    pub history: Vec<UpdateHistory>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct UpdateHistory {
    pub state: String,
    pub version: String,
}

impl ClusterVersion {
    /// History is newest first, so this is the most recent completed update.
    pub fn last_completed(&self) -> Option<&str> {
        self.status
            .history
            .iter()
            .find(|u| u.state == COMPLETED_UPDATE)
            .map(|u| u.version.as_str())
    }
}

/// The fields of `install-config` the report uses.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub(crate) struct InstallConfig {
    pub fips: bool,
    pub publish: String,
    pub compute: Vec<MachinePool>,
    pub control_plane: MachinePool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct MachinePool {
    pub name: String,
    pub architecture: String,
}

impl InstallConfig {
    pub fn worker_arch(&self) -> String {
        self.compute
            .iter()
            .find(|pool| pool.name == "worker")
            .map(|pool| pool.architecture.clone())
            .unwrap_or_default()
    }
}

/// Counts nodes by role. A master (or control-plane) node is never infra or
/// plain worker, but it also counts as a worker when it carries the worker
/// label and is schedulable (no taints).
pub fn classify_nodes(nodes: &[Node], metadata: &mut ClusterMetadata) {
    metadata.total_nodes = nodes.len();
    for node in nodes {
        let empty = BTreeMap::new();
        let labels = node.metadata.labels.as_ref().unwrap_or(&empty);
        let instance_type = || labels.get(INSTANCE_TYPE_LABEL).cloned().unwrap_or_default();
        let has = |label: &str| labels.contains_key(label);

        if has(MASTER_LABEL) || has(CONTROL_PLANE_LABEL) {
            metadata.master_nodes_count += 1;
            metadata.master_nodes_type = instance_type();
            let untainted = node
                .spec
                .as_ref()
                .and_then(|s| s.taints.as_ref())
                .map_or(true, |t| t.is_empty());
            if has(WORKER_LABEL) && untainted {
                metadata.worker_nodes_count += 1;
            }
        } else if has(INFRA_LABEL) {
            metadata.infra_nodes_count += 1;
            metadata.infra_nodes_type = instance_type();
        } else if has(WORKER_LABEL) {
            metadata.worker_nodes_count += 1;
            metadata.worker_nodes_type = instance_type();
        } else {
            metadata.other_nodes_count += 1;
        }
    }
}

/// IPSec state from the operator `Network` spec.
pub fn ipsec_state(network: &Value) -> (bool, String) {
    let Some(config) = network.pointer("/spec/defaultNetwork/ovnKubernetesConfig/ipsecConfig") else {
        return (false, IPSEC_DISABLED.to_string());
    };
    match config.get("mode").and_then(Value::as_str) {
        Some(IPSEC_DISABLED) => (false, IPSEC_DISABLED.to_string()),
        Some(mode) => (true, mode.to_string()),
        None => (true, IPSEC_FULL.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::fake::node;
    use k8s_openapi::serde_json::json;

    #[test]
    fn test_schedulable_control_plane_counts_as_worker() {
        let nodes = vec![node(
            "cp-0",
            &[(CONTROL_PLANE_LABEL, ""), (WORKER_LABEL, ""), (INSTANCE_TYPE_LABEL, "m5.xlarge")],
            false,
        )];
        let mut md = ClusterMetadata::default();
        classify_nodes(&nodes, &mut md);
        assert_eq!(md.master_nodes_count, 1);
        assert_eq!(md.worker_nodes_count, 1);
        assert_eq!(md.master_nodes_type, "m5.xlarge");
        assert_eq!(md.worker_nodes_type, "");
    }

    #[test]
    fn test_tainted_master_is_not_a_worker() {
        let nodes = vec![node("m-0", &[(MASTER_LABEL, ""), (WORKER_LABEL, "")], true)];
        let mut md = ClusterMetadata::default();
        classify_nodes(&nodes, &mut md);
        assert_eq!(md.master_nodes_count, 1);
        assert_eq!(md.worker_nodes_count, 0);
    }

    #[test]
    fn test_roles() {
        let nodes = vec![
            node("i-0", &[(INFRA_LABEL, ""), (WORKER_LABEL, ""), (INSTANCE_TYPE_LABEL, "r5.large")], false),
            node("w-0", &[(WORKER_LABEL, ""), (INSTANCE_TYPE_LABEL, "m5.2xlarge")], false),
            node("w-1", &[(WORKER_LABEL, ""), (INSTANCE_TYPE_LABEL, "m5.2xlarge")], false),
            node("x-0", &[], false),
        ];
        let mut md = ClusterMetadata::default();
        classify_nodes(&nodes, &mut md);
        assert_eq!(md.total_nodes, 4);
        assert_eq!(md.infra_nodes_count, 1);
        assert_eq!(md.infra_nodes_type, "r5.large");
        assert_eq!(md.worker_nodes_count, 2);
        assert_eq!(md.worker_nodes_type, "m5.2xlarge");
        assert_eq!(md.other_nodes_count, 1);
        assert_eq!(md.master_nodes_count, 0);
    }

    #[test]
    fn test_ipsec_state() {
        let with = |cfg: Value| json!({"spec": {"defaultNetwork": {"ovnKubernetesConfig": cfg}}});

        assert_eq!(
            ipsec_state(&with(json!({"ipsecConfig": {"mode": "Full"}}))),
            (true, "Full".to_string())
        );
        assert_eq!(
            ipsec_state(&with(json!({"ipsecConfig": {"mode": "External"}}))),
            (true, "External".to_string())
        );
        assert_eq!(
            ipsec_state(&with(json!({"ipsecConfig": {"mode": "Disabled"}}))),
            (false, "Disabled".to_string())
        );
        assert_eq!(
            ipsec_state(&with(json!({"ipsecConfig": {}}))),
            (true, "Full".to_string())
        );
        assert_eq!(ipsec_state(&with(json!({}))), (false, "Disabled".to_string()));
    }

    #[test]
    fn test_infrastructure_fields() {
        let infra: Infrastructure = k8s_openapi::serde_json::from_value(json!({
            "status": {
                "infrastructureName": "perf-abc12",
                "platform": "AWS",
                "platformStatus": {
                    "type": "AWS",
                    "aws": {
                        "region": "us-west-2",
                        "resourceTags": [{"key": "red-hat-clustertype", "value": "rosa"}],
                    },
                },
            },
        }))
        .unwrap();
        assert_eq!(infra.region(), "us-west-2");
        assert_eq!(infra.cluster_type(), "rosa");
        assert_eq!(Infrastructure::default().cluster_type(), DEFAULT_CLUSTER_TYPE);
    }

    #[test]
    fn test_serializes_camel_case() {
        let md = ClusterMetadata {
            k8s_version: "v1.30.4".to_string(),
            ..Default::default()
        };
        let value = k8s_openapi::serde_json::to_value(&md).unwrap();
        assert_eq!(value["k8sVersion"], "v1.30.4");
        assert!(value.get("ipsecMode").is_some());
        assert!(value.get("masterNodesCount").is_some());
    }
}
