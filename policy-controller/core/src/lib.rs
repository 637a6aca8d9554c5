//! ValidatingAdmissionPolicy generation.
//!
//! For every `ClusterPolicy` whose rules can be expressed natively, the
//! controller maintains a pair of derived objects: a
//! `ValidatingAdmissionPolicy` sharing the policy's name and a
//! `ValidatingAdmissionPolicyBinding` named `<policy>-binding`. Both carry an
//! owner reference back to the policy.
//!
//! ```text
//! [ ClusterPolicy ] ─┬─> [ ValidatingAdmissionPolicy ]
//!        ^           └─> [ ValidatingAdmissionPolicyBinding ]
//!        │
//! [ PolicyException ]
//! ```
//!
//! Changes to any of these kinds are mapped back to a policy name and pushed
//! onto a [`WorkQueue`]. A fixed set of workers drain the queue, running the
//! [`Reconciler`] for each name, and report the outcome on the policy's
//! `status.validatingadmissionpolicy` block.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod controller;
mod error;
mod events;
pub mod metrics;
pub mod queue;
mod reconcile;
mod status;
mod store;
pub mod translate;


pub use self::{
    controller::{Controller, Reconcile, DEFAULT_MAX_RETRIES, DEFAULT_WORKERS},
    error::{Error, Result},
    events::{AuditEvent, EventSink},
    metrics::ControllerMetrics,
    queue::WorkQueue,
    reconcile::{Outcome, Reconciler, SKIP_GENERATING_MESSAGE},
    status::StatusReporter,
    store::{Objects, Store},
};
use vap_controller_k8s_api::{
    ClusterPolicy, ClusterPolicySpec, PolicyException, ValidatingAdmissionPolicy,
    ValidatingAdmissionPolicyBinding,
};

pub const CONTROLLER_NAME: &str = "validatingadmissionpolicy-generate-controller";

/// A permission the controller must hold to manage a derived object kind.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Capability {
    ManageAdmissionPolicies,
    ManageBindings,
}

/// Checks whether the controller currently holds a capability.
///
/// Permissions may change at any time, so implementations must not cache
/// results across reconciles.
#[async_trait::async_trait]
pub trait CheckCapability: Send + Sync {
    async fn allowed(&self, capability: Capability) -> bool;
}

/// The result of checking whether a policy may be projected onto derived
/// objects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,

    /// The reason may be empty when the policy is excluded by an exception.
    Ineligible(String),
}

/// Translates policies into derived objects.
///
/// Builders mutate the target in place so that they can be applied both to
/// fresh objects and to copies of observed ones.
pub trait Generate: Send + Sync {
    fn can_generate(&self, spec: &ClusterPolicySpec, exceptions: &[PolicyException])
        -> Eligibility;

    fn build_admission_policy(
        &self,
        target: &mut ValidatingAdmissionPolicy,
        policy: &ClusterPolicy,
        exceptions: &[PolicyException],
    ) -> Result<()>;

    fn build_binding(
        &self,
        target: &mut ValidatingAdmissionPolicyBinding,
        policy: &ClusterPolicy,
    ) -> Result<()>;
}

// === impl Capability ===

impl Capability {
    /// Capabilities in the order they are checked.
    pub const ALL: [Self; 2] = [Self::ManageAdmissionPolicies, Self::ManageBindings];

    pub fn group(&self) -> &'static str {
        "admissionregistration.k8s.io"
    }

    pub fn resource(&self) -> &'static str {
        match self {
            Self::ManageAdmissionPolicies => "validatingadmissionpolicies",
            Self::ManageBindings => "validatingadmissionpolicybindings",
        }
    }

    /// The status message recorded when the capability is missing.
    pub fn missing_message(&self) -> &'static str {
        match self {
            Self::ManageAdmissionPolicies => {
                "insufficient permissions to generate ValidatingAdmissionPolicies"
            }
            Self::ManageBindings => {
                "insufficient permissions to generate ValidatingAdmissionPolicyBindings"
            }
        }
    }
}

impl std::fmt::Display for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.resource(), self.group())
    }
}
