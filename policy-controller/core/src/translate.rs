//! Projects CEL validation rules onto native admission objects.

mod kinds;

pub use self::kinds::{KindTable, ResolveKind, ResourceType, SharedKindTable};
use crate::{Eligibility, Error, Generate, Result};
use std::sync::Arc;
use vap_controller_k8s_api::{
    admissionregistration::{MatchResources, NamedRuleWithOperations},
    labels,
    policy::{
        FailurePolicy, MatchResources as PolicyMatch, ResourceDescription, Rule,
        ValidationFailureAction,
    },
    ClusterPolicy, ClusterPolicySpec, ObjectMeta, PolicyException, Resource, ResourceExt,
    ValidatingAdmissionPolicy, ValidatingAdmissionPolicyBinding,
    ValidatingAdmissionPolicyBindingSpec, ValidatingAdmissionPolicySpec,
};

const ADMISSION_POLICY: &str = "ValidatingAdmissionPolicy";
const BINDING: &str = "ValidatingAdmissionPolicyBinding";

const DEFAULT_OPERATIONS: [&str; 2] = ["CREATE", "UPDATE"];

/// Generates admission objects for policies made of a single CEL rule.
pub struct CelTranslator {
    manager: String,
    kinds: Arc<dyn ResolveKind>,
}

// === impl CelTranslator ===

impl CelTranslator {
    pub fn new(manager: impl Into<String>, kinds: Arc<dyn ResolveKind>) -> Self {
        Self {
            manager: manager.into(),
            kinds,
        }
    }

    /// Labels the object as managed by this controller and points its
    /// controller owner reference at the policy.
    fn stamp(&self, kind: &'static str, meta: &mut ObjectMeta, policy: &ClusterPolicy) -> Result<()> {
        let owner = policy
            .controller_owner_ref(&())
            .ok_or_else(|| Error::build(kind, policy.name_any(), "policy has no uid"))?;
        meta.owner_references = Some(vec![owner]);
        meta.labels
            .get_or_insert_with(Default::default)
            .extend(labels::managed_by(&self.manager));
        Ok(())
    }

    /// Builds one admission rule per kind in the description.
    fn resource_rules(&self, desc: &ResourceDescription) -> Result<Vec<NamedRuleWithOperations>> {
        let operations = if desc.operations.is_empty() {
            DEFAULT_OPERATIONS.iter().map(|o| o.to_string()).collect()
        } else {
            desc.operations.clone()
        };
        let names = (!desc.names.is_empty()).then(|| desc.names.clone());

        desc.kinds
            .iter()
            .map(|kind| {
                let (group, version, resource) = if kind == "*" {
                    ("*".to_string(), "*".to_string(), "*".to_string())
                } else {
                    let rt = self.kinds.resolve(kind)?;
                    (rt.group, rt.version, rt.plural)
                };
                Ok(NamedRuleWithOperations {
                    api_groups: Some(vec![group]),
                    api_versions: Some(vec![version]),
                    resources: Some(vec![resource]),
                    operations: Some(operations.clone()),
                    resource_names: names.clone(),
                    scope: Some("*".to_string()),
                })
            })
            .collect()
    }
}

impl Generate for CelTranslator {
    fn can_generate(&self, spec: &ClusterPolicySpec, exceptions: &[PolicyException]) -> Eligibility {
        let rule = match spec.rules.as_slice() {
            [rule] => rule,
            _ => return ineligible("multiple rules are not supported"),
        };
        if rule.cel().is_none() {
            return ineligible("the rule is not a CEL validation");
        }
        if rule.exclude.as_ref().is_some_and(|e| !e.is_empty()) {
            return ineligible("exclude blocks are not supported");
        }

        let matched = &rule.match_resources;
        if matched.has_subject_filters() {
            return ineligible("user info filters are not supported");
        }
        if matched.all.as_ref().is_some_and(|all| all.len() > 1) {
            return ineligible("multiple match.all filters are not supported");
        }
        let mut descriptions = matched.descriptions().peekable();
        if descriptions.peek().is_none() {
            return ineligible("the rule does not match any kinds");
        }
        for desc in descriptions {
            if desc.kinds.is_empty() {
                return ineligible("the rule does not match any kinds");
            }
            if !desc.namespaces.is_empty() {
                return ineligible("namespace filters are not supported");
            }
        }

        // Conditional exceptions cannot be expressed as exclusions.
        if exceptions.iter().any(|e| e.spec.conditions.is_some()) {
            return Eligibility::Ineligible(String::new());
        }

        // Exclusions only carry kinds, names and operations. Exceptions scoped
        // any further would widen to every namespace or not apply at all.
        if let Some(reason) = exceptions
            .iter()
            .find_map(|polex| unprojectable_exception(&polex.spec.match_resources))
        {
            return ineligible(reason);
        }

        Eligibility::Eligible
    }

    fn build_admission_policy(
        &self,
        target: &mut ValidatingAdmissionPolicy,
        policy: &ClusterPolicy,
        exceptions: &[PolicyException],
    ) -> Result<()> {
        let name = policy.name_any();
        let rule = first_rule(ADMISSION_POLICY, policy)?;
        let cel = rule
            .cel()
            .ok_or_else(|| Error::build(ADMISSION_POLICY, &name, "the rule has no CEL block"))?;
        if cel.expressions.is_empty() {
            return Err(Error::build(ADMISSION_POLICY, &name, "no CEL expressions"));
        }

        let mut resource_rules = Vec::new();
        for desc in rule.match_resources.descriptions() {
            resource_rules.extend(self.resource_rules(desc)?);
        }

        let mut exclude_resource_rules = Vec::new();
        for polex in exceptions {
            for desc in polex.spec.match_resources.descriptions() {
                exclude_resource_rules.extend(self.resource_rules(desc)?);
            }
        }

        // Selectors come from the first description. The server defaults
        // absent selectors to the empty selector.
        let first = rule.match_resources.descriptions().next();
        let object_selector = first.and_then(|d| d.selector.clone());
        let namespace_selector = first.and_then(|d| d.namespace_selector.clone());

        self.stamp(ADMISSION_POLICY, &mut target.metadata, policy)?;
        target.spec = Some(ValidatingAdmissionPolicySpec {
            failure_policy: Some(
                match policy.spec.failure_policy.unwrap_or_default() {
                    FailurePolicy::Fail => "Fail",
                    FailurePolicy::Ignore => "Ignore",
                }
                .to_string(),
            ),
            match_constraints: Some(MatchResources {
                resource_rules: Some(resource_rules),
                exclude_resource_rules: (!exclude_resource_rules.is_empty())
                    .then_some(exclude_resource_rules),
                match_policy: Some("Equivalent".to_string()),
                namespace_selector: Some(namespace_selector.unwrap_or_default()),
                object_selector: Some(object_selector.unwrap_or_default()),
            }),
            param_kind: cel.param_kind.clone(),
            validations: Some(cel.expressions.clone()),
            audit_annotations: cel.audit_annotations.clone(),
            variables: cel.variables.clone(),
            match_conditions: None,
        });
        Ok(())
    }

    fn build_binding(
        &self,
        target: &mut ValidatingAdmissionPolicyBinding,
        policy: &ClusterPolicy,
    ) -> Result<()> {
        let rule = first_rule(BINDING, policy)?;
        let validation_actions = match policy.spec.validation_failure_action.unwrap_or_default() {
            ValidationFailureAction::Enforce => vec!["Deny".to_string()],
            ValidationFailureAction::Audit => vec!["Audit".to_string(), "Warn".to_string()],
        };

        self.stamp(BINDING, &mut target.metadata, policy)?;
        target.spec = Some(ValidatingAdmissionPolicyBindingSpec {
            policy_name: Some(policy.name_any()),
            validation_actions: Some(validation_actions),
            param_ref: rule.cel().and_then(|cel| cel.param_ref.clone()),
            match_resources: None,
        });
        Ok(())
    }
}

fn ineligible(reason: &str) -> Eligibility {
    Eligibility::Ineligible(format!("skip generating: {reason}."))
}

/// Returns why an exception's match block cannot become excluded resource
/// rules, if it cannot.
fn unprojectable_exception(matched: &PolicyMatch) -> Option<&'static str> {
    if matched.has_subject_filters() {
        return Some("policy exceptions with user info filters are not supported");
    }
    let mut descriptions = matched.descriptions().peekable();
    if descriptions.peek().is_none() {
        return Some("policy exceptions that do not match any kinds are not supported");
    }
    for desc in descriptions {
        if desc.kinds.is_empty() {
            return Some("policy exceptions that do not match any kinds are not supported");
        }
        if !desc.namespaces.is_empty() {
            return Some("policy exceptions with namespace filters are not supported");
        }
        if desc.selector.is_some() || desc.namespace_selector.is_some() {
            return Some("policy exceptions with label selectors are not supported");
        }
    }
    None
}

fn first_rule<'p>(kind: &'static str, policy: &'p ClusterPolicy) -> Result<&'p Rule> {
    policy
        .spec
        .rules
        .first()
        .ok_or_else(|| Error::build(kind, policy.name_any(), "the policy has no rules"))
}
