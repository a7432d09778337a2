pub mod affinity;
pub mod client;
pub mod connector;
pub mod deployment;
pub mod labels;
pub mod resource;
pub mod storage;
pub mod waiters;

#[cfg(test)]
pub(crate) mod fake;

pub use affinity::{parse_affinity_rules, AffinityRuleSet, AffinityRules, LabelExpression, Operator};
pub use client::{K8sClient, KClient, PodParams};
pub use connector::{load_config, K8sConnector, KubeConnector};
pub use deployment::{DeploymentParams, DeploymentResource};
pub use labels::parse_labels;
pub use resource::{KubernetesRepository, ObjectParams, ObjectResource, Resource};
pub use waiters::{wait_for_object, ResourceKind};
