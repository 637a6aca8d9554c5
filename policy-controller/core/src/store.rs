use crate::Result;
use vap_controller_k8s_api::{
    ClusterPolicy, PolicyException, ValidatingAdmissionPolicy, ValidatingAdmissionPolicyBinding,
};

/// Reads and writes one kind of cluster-scoped object by name.
///
/// Writes are version-checked: replacing an object whose resource version is
/// stale fails with a conflict.
#[async_trait::async_trait]
pub trait Objects<K>: Send + Sync
where
    K: Send + Sync + 'static,
{
    /// Returns `None` if the object does not exist.
    async fn get(&self, name: &str) -> Result<Option<K>>;

    async fn create(&self, object: &K) -> Result<K>;

    async fn replace(&self, object: &K) -> Result<K>;

    /// Deleting an object that does not exist succeeds.
    async fn delete(&self, name: &str) -> Result<()>;
}

/// The backing store consulted by the reconciler.
#[async_trait::async_trait]
pub trait Store:
    Objects<ValidatingAdmissionPolicy> + Objects<ValidatingAdmissionPolicyBinding>
{
    /// Returns `None` if the policy does not exist.
    async fn get_policy(&self, name: &str) -> Result<Option<ClusterPolicy>>;

    /// Reads the policy from the API server, bypassing any cache. Status is
    /// compared against this copy so that writes made by recent reconciles
    /// are seen before the cache catches up.
    async fn get_latest_policy(&self, name: &str) -> Result<Option<ClusterPolicy>>;

    async fn list_exceptions(&self) -> Result<Vec<PolicyException>>;

    /// Writes the policy's status through the status subresource.
    async fn replace_policy_status(&self, policy: &ClusterPolicy) -> Result<ClusterPolicy>;
}
