use super::MatchResources;
use k8s_openapi::api::admissionregistration::v1 as admissionregistration;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A cluster-wide policy made up of validation rules.
#[derive(Clone, Debug, Default, PartialEq, CustomResource, Deserialize, Serialize, JsonSchema)]
#[kube(
    group = "kyverno.io",
    version = "v1",
    kind = "ClusterPolicy",
    status = "PolicyStatus",
    derive = "Default",
    derive = "PartialEq"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPolicySpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<Rule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_policy: Option<FailurePolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_failure_action: Option<ValidationFailureAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background: Option<bool>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub name: String,

    #[serde(rename = "match", default)]
    pub match_resources: MatchResources,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude: Option<MatchResources>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validate: Option<Validation>,
}

/// The validation body of a rule. Only CEL validations can be projected onto
/// a ValidatingAdmissionPolicy; the pattern-based forms are carried opaquely.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Validation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any_pattern: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deny: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreach: Option<serde_json::Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cel: Option<Cel>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Cel {
    #[serde(default)]
    pub expressions: Vec<admissionregistration::Validation>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_kind: Option<admissionregistration::ParamKind>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub param_ref: Option<admissionregistration::ParamRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_annotations: Option<Vec<admissionregistration::AuditAnnotation>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Vec<admissionregistration::Variable>>,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum FailurePolicy {
    #[default]
    Fail,
    Ignore,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub enum ValidationFailureAction {
    #[serde(alias = "enforce")]
    Enforce,
    #[default]
    #[serde(alias = "audit")]
    Audit,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct PolicyStatus {
    #[serde(rename = "validatingadmissionpolicy", default)]
    pub validating_admission_policy: ValidatingAdmissionPolicyStatus,
}

/// Records whether a ValidatingAdmissionPolicy was generated for the policy
/// and, if not, why.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
pub struct ValidatingAdmissionPolicyStatus {
    #[serde(default)]
    pub generated: bool,

    #[serde(default)]
    pub message: String,
}

// === impl ClusterPolicySpec ===

impl ClusterPolicySpec {
    /// Indicates whether any rule carries a validation body.
    pub fn has_validate(&self) -> bool {
        self.rules.iter().any(|r| r.validate.is_some())
    }
}

// === impl Rule ===

impl Rule {
    pub fn cel(&self) -> Option<&Cel> {
        self.validate.as_ref()?.cel.as_ref()
    }
}
