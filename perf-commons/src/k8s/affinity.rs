//! Compact affinity rule strings.
//!
//! A rule string is a `;` separated list of clauses:
//!
//! ```text
//! zone=["a","b"];disk!=["hdd"];gpu=;spot!=
//! ```
//!
//! `key=[...]` is `In`, `key!=[...]` is `NotIn`, `key=` is `Exists` and
//! `key!=` is `DoesNotExist`.

use k8s_openapi::api::core::v1::{
    Affinity, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    PodAffinity, PodAffinityTerm, PodAntiAffinity, PreferredSchedulingTerm,
    WeightedPodAffinityTerm,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, LabelSelectorRequirement};
use k8s_openapi::serde_json;

pub const PREFERRED_WEIGHT: i32 = 100;
pub const HOSTNAME_TOPOLOGY_KEY: &str = "kubernetes.io/hostname";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    In,
    NotIn,
    Exists,
    DoesNotExist,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::In => "In",
            Operator::NotIn => "NotIn",
            Operator::Exists => "Exists",
            Operator::DoesNotExist => "DoesNotExist",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelExpression {
    pub key: String,
    pub operator: Operator,
    pub values: Vec<String>,
}

impl LabelExpression {
    fn values_opt(&self) -> Option<Vec<String>> {
        if self.values.is_empty() {
            None
        } else {
            Some(self.values.clone())
        }
    }

    pub fn to_node_requirement(&self) -> NodeSelectorRequirement {
        NodeSelectorRequirement {
            key: self.key.clone(),
            operator: self.operator.as_str().to_string(),
            values: self.values_opt(),
        }
    }

    pub fn to_label_requirement(&self) -> LabelSelectorRequirement {
        LabelSelectorRequirement {
            key: self.key.clone(),
            operator: self.operator.as_str().to_string(),
            values: self.values_opt(),
        }
    }
}

/// Parses one rule string into expressions, in clause order.
///
/// A clause whose value is not a JSON string array is skipped with a warning.
/// Clauses with no operator are ignored.
pub fn parse_affinity_rules(rules: &str) -> Vec<LabelExpression> {
    let mut expressions = Vec::new();
    for clause in rules.split(';').map(str::trim) {
        if clause.is_empty() {
            continue;
        }

        let (key, value, negated) = if let Some((k, v)) = clause.split_once("!=") {
            (k.trim(), v.trim(), true)
        } else if let Some((k, v)) = clause.split_once('=') {
            (k.trim(), v.trim(), false)
        } else {
            continue;
        };

        let (operator, values) = match (value.is_empty(), negated) {
            (true, false) => (Operator::Exists, Vec::new()),
            (true, true) => (Operator::DoesNotExist, Vec::new()),
            (false, negated) => match serde_json::from_str::<Vec<String>>(value) {
                Ok(values) if negated => (Operator::NotIn, values),
                Ok(values) => (Operator::In, values),
                Err(e) => {
                    tracing::warn!(clause, error = %e, "skipping affinity clause");
                    continue;
                }
            },
        };

        expressions.push(LabelExpression {
            key: key.to_string(),
            operator,
            values,
        });
    }
    expressions
}

/// The six rule strings a workload may carry. Empty strings mean "not set".
#[derive(Debug, Clone, Default)]
pub struct AffinityRules {
    pub node_required: String,
    pub node_preferred: String,
    pub pod_required: String,
    pub pod_preferred: String,
    pub pod_anti_required: String,
    pub pod_anti_preferred: String,
}

/// Parsed buckets. A bucket is `None` when its rule string was empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AffinityRuleSet {
    pub node_required: Option<Vec<LabelExpression>>,
    pub node_preferred: Option<Vec<LabelExpression>>,
    pub pod_required: Option<Vec<LabelExpression>>,
    pub pod_preferred: Option<Vec<LabelExpression>>,
    pub pod_anti_required: Option<Vec<LabelExpression>>,
    pub pod_anti_preferred: Option<Vec<LabelExpression>>,
}

fn bucket(rules: &str) -> Option<Vec<LabelExpression>> {
    if rules.trim().is_empty() {
        None
    } else {
        Some(parse_affinity_rules(rules))
    }
}

impl AffinityRules {
    pub fn parse(&self) -> AffinityRuleSet {
        AffinityRuleSet {
            node_required: bucket(&self.node_required),
            node_preferred: bucket(&self.node_preferred),
            pod_required: bucket(&self.pod_required),
            pod_preferred: bucket(&self.pod_preferred),
            pod_anti_required: bucket(&self.pod_anti_required),
            pod_anti_preferred: bucket(&self.pod_anti_preferred),
        }
    }

    pub fn to_affinity(&self) -> Option<Affinity> {
        self.parse().to_affinity()
    }
}

fn pod_term(expressions: &[LabelExpression]) -> PodAffinityTerm {
    PodAffinityTerm {
        label_selector: Some(LabelSelector {
            match_expressions: Some(
                expressions
                    .iter()
                    .map(LabelExpression::to_label_requirement)
                    .collect(),
            ),
            match_labels: None,
        }),
        topology_key: HOSTNAME_TOPOLOGY_KEY.to_string(),
        ..Default::default()
    }
}

fn node_term(expressions: &[LabelExpression]) -> NodeSelectorTerm {
    NodeSelectorTerm {
        match_expressions: Some(
            expressions
                .iter()
                .map(LabelExpression::to_node_requirement)
                .collect(),
        ),
        match_fields: None,
    }
}

impl AffinityRuleSet {
    /// Builds the pod spec affinity. Required and preferred buckets of the
    /// same kind are both applied. Returns `None` when every bucket is unset.
    pub fn to_affinity(&self) -> Option<Affinity> {
        let node_affinity = match (&self.node_required, &self.node_preferred) {
            (None, None) => None,
            (required, preferred) => Some(NodeAffinity {
                required_during_scheduling_ignored_during_execution: required
                    .as_deref()
                    .map(|exprs| NodeSelector {
                        node_selector_terms: vec![node_term(exprs)],
                    }),
                preferred_during_scheduling_ignored_during_execution: preferred
                    .as_deref()
                    .map(|exprs| {
                        vec![PreferredSchedulingTerm {
                            weight: PREFERRED_WEIGHT,
                            preference: node_term(exprs),
                        }]
                    }),
            }),
        };

        let pod_affinity = match (&self.pod_required, &self.pod_preferred) {
            (None, None) => None,
            (required, preferred) => Some(PodAffinity {
                required_during_scheduling_ignored_during_execution: required
                    .as_deref()
                    .map(|exprs| vec![pod_term(exprs)]),
                preferred_during_scheduling_ignored_during_execution: preferred
                    .as_deref()
                    .map(|exprs| {
                        vec![WeightedPodAffinityTerm {
                            weight: PREFERRED_WEIGHT,
                            pod_affinity_term: pod_term(exprs),
                        }]
                    }),
            }),
        };

        let pod_anti_affinity = match (&self.pod_anti_required, &self.pod_anti_preferred) {
            (None, None) => None,
            (required, preferred) => Some(PodAntiAffinity {
                required_during_scheduling_ignored_during_execution: required
                    .as_deref()
                    .map(|exprs| vec![pod_term(exprs)]),
                preferred_during_scheduling_ignored_during_execution: preferred
                    .as_deref()
                    .map(|exprs| {
                        vec![WeightedPodAffinityTerm {
                            weight: PREFERRED_WEIGHT,
                            pod_affinity_term: pod_term(exprs),
                        }]
                    }),
            }),
        };

        if node_affinity.is_none() && pod_affinity.is_none() && pod_anti_affinity.is_none() {
            return None;
        }

        Some(Affinity {
            node_affinity,
            pod_affinity,
            pod_anti_affinity,
        })
    }
}
