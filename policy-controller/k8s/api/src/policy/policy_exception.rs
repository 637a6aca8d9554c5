use super::MatchResources;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Exempts matching resources from one or more policy rules.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kyverno.io",
    version = "v2",
    kind = "PolicyException",
    namespaced,
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct PolicyExceptionSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<bool>,

    #[serde(rename = "match", default)]
    pub match_resources: MatchResources,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<serde_json::Value>,

    #[serde(default)]
    pub exceptions: Vec<Exception>,
}

/// Names a policy, and optionally some of its rules, that an exception
/// applies to.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Exception {
    pub policy_name: String,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rule_names: Vec<String>,
}

// === impl Exception ===

impl Exception {
    /// Namespaced policies are referenced as `<namespace>/<name>`.
    pub fn targets_namespaced_policy(&self) -> bool {
        self.policy_name.contains('/')
    }

    /// Indicates whether the entry can be projected onto a single generated
    /// admission policy: it must name a cluster policy and at most one rule.
    pub fn is_projectable(&self) -> bool {
        !self.targets_namespaced_policy() && self.rule_names.len() <= 1
    }

    pub fn applies_to(&self, policy: &str, rule: &str) -> bool {
        self.is_projectable()
            && self.policy_name == policy
            && self.rule_names.first().map_or(true, |r| r == rule)
    }
}

// === impl PolicyExceptionSpec ===

impl PolicyExceptionSpec {
    pub fn applies_to(&self, policy: &str, rule: &str) -> bool {
        self.exceptions.iter().any(|e| e.applies_to(policy, rule))
    }

    /// Iterates over the names of the cluster policies this exception can
    /// affect, skipping entries that cannot be projected.
    pub fn projectable_policies(&self) -> impl Iterator<Item = &str> {
        self.exceptions
            .iter()
            .filter(|e| e.is_projectable())
            .map(|e| e.policy_name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exception(policy: &str, rules: &[&str]) -> Exception {
        Exception {
            policy_name: policy.to_string(),
            rule_names: rules.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn applies_to_named_rule() {
        let e = exception("p1", &["r1"]);
        assert!(e.applies_to("p1", "r1"));
        assert!(!e.applies_to("p1", "r2"));
        assert!(!e.applies_to("p2", "r1"));
    }

    #[test]
    fn applies_to_every_rule_without_rule_names() {
        assert!(exception("p1", &[]).applies_to("p1", "anything"));
    }

    #[test]
    fn ignores_namespaced_policies() {
        let e = exception("ns/p1", &["r1"]);
        assert!(!e.is_projectable());
        assert!(!e.applies_to("ns/p1", "r1"));
    }

    #[test]
    fn ignores_multiple_rules() {
        let e = exception("p1", &["r1", "r2"]);
        assert!(!e.is_projectable());
        assert!(!e.applies_to("p1", "r1"));
    }

    #[test]
    fn projectable_policies_skip_ignored_entries() {
        let spec = PolicyExceptionSpec {
            exceptions: vec![
                exception("ns/p1", &[]),
                exception("p2", &["a", "b"]),
                exception("p3", &["a"]),
                exception("p4", &[]),
            ],
            ..Default::default()
        };
        assert_eq!(
            spec.projectable_policies().collect::<Vec<_>>(),
            vec!["p3", "p4"]
        );
    }
}
