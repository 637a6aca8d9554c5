use k8s_openapi::api::core::v1::ObjectReference;
use vap_controller_k8s_api::{
    ClusterPolicy, Resource, ValidatingAdmissionPolicy, ValidatingAdmissionPolicyBinding,
};

pub const REASON_POLICY_APPLIED: &str = "PolicyApplied";
pub const ACTION_GENERATE: &str = "Generate";

/// An auditable record of a successful generation.
#[derive(Clone, Debug, PartialEq)]
pub struct AuditEvent {
    /// The policy the event is recorded on.
    pub regarding: ObjectReference,

    /// The derived object the event concerns.
    pub related: Option<ObjectReference>,

    pub reason: &'static str,
    pub action: &'static str,
    pub note: String,
}

/// Records audit events. Failures are the sink's concern and never surface
/// to the reconciler.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, events: Vec<AuditEvent>);
}

// === impl AuditEvent ===

impl AuditEvent {
    /// Builds the events recorded when both derived objects were generated.
    pub fn generated(policy: &ClusterPolicy, admission_policy: &str, binding: &str) -> Vec<Self> {
        let regarding = policy.object_ref(&());
        vec![
            Self {
                regarding: regarding.clone(),
                related: Some(reference::<ValidatingAdmissionPolicy>(admission_policy)),
                reason: REASON_POLICY_APPLIED,
                action: ACTION_GENERATE,
                note: format!("ValidatingAdmissionPolicy {admission_policy} is generated"),
            },
            Self {
                regarding,
                related: Some(reference::<ValidatingAdmissionPolicyBinding>(binding)),
                reason: REASON_POLICY_APPLIED,
                action: ACTION_GENERATE,
                note: format!("ValidatingAdmissionPolicyBinding {binding} is generated"),
            },
        ]
    }
}

fn reference<K>(name: &str) -> ObjectReference
where
    K: Resource<DynamicType = ()>,
{
    ObjectReference {
        api_version: Some(K::api_version(&()).into_owned()),
        kind: Some(K::kind(&()).into_owned()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}
