#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod labels;
pub mod policy;

pub use self::policy::{
    ClusterPolicy, ClusterPolicySpec, PolicyException, PolicyExceptionSpec, PolicyStatus,
};
pub use k8s_openapi::{
    api::admissionregistration::v1::{
        self as admissionregistration, ValidatingAdmissionPolicy, ValidatingAdmissionPolicyBinding,
        ValidatingAdmissionPolicyBindingSpec, ValidatingAdmissionPolicySpec,
    },
    apimachinery::pkg::apis::meta::v1::{LabelSelector, OwnerReference},
};
pub use kube::{
    api::{Api, DeleteParams, ObjectMeta, PostParams},
    Client, Error, Resource, ResourceExt,
};

/// The kind recorded in the owner reference of every generated object.
pub const OWNER_KIND: &str = "ClusterPolicy";

/// Returns the name of the binding generated for the named policy.
///
/// The admission policy itself shares the source policy's name.
pub fn binding_name(policy: &str) -> String {
    format!("{policy}-binding")
}
