pub mod cluster_policy;
pub mod match_resources;
pub mod policy_exception;

pub use self::{
    cluster_policy::{
        Cel, ClusterPolicy, ClusterPolicySpec, FailurePolicy, PolicyStatus, Rule,
        ValidatingAdmissionPolicyStatus, Validation, ValidationFailureAction,
    },
    match_resources::{MatchResources, ResourceDescription, ResourceFilter},
    policy_exception::{Exception, PolicyException, PolicyExceptionSpec},
};
