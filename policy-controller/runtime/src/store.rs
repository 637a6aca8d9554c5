use crate::{
    core::{Objects, Result, Store},
    index::SharedIndex,
    k8s::{
        Api, ClusterPolicy, Client, DeleteParams, PolicyException, PostParams, Resource,
        ResourceExt, ValidatingAdmissionPolicy, ValidatingAdmissionPolicyBinding,
    },
};
use kube::api::{Patch, PatchParams};
use serde::{de::DeserializeOwned, Serialize};
use std::fmt::Debug;

/// Serves reads from the watch-populated index and sends writes to the API
/// server. Policy reads made for status updates go to the API server.
///
/// Replaces carry the resource version of the object they were built from,
/// so writes against a stale read fail with a conflict and are retried.
#[derive(Clone)]
pub(crate) struct KubeStore {
    client: Client,
    index: SharedIndex,
    field_manager: String,
}

// === impl KubeStore ===

impl KubeStore {
    pub(crate) fn new(client: Client, index: SharedIndex, field_manager: impl Into<String>) -> Self {
        Self {
            client,
            index,
            field_manager: field_manager.into(),
        }
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<DynamicType = ()>,
    {
        Api::all(self.client.clone())
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    async fn create_object<K>(&self, object: &K) -> Result<K>
    where
        K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Serialize,
    {
        let created = self.api::<K>().create(&self.post_params(), object).await?;
        tracing::info!(kind = %K::kind(&()), name = %created.name_any(), "Created");
        Ok(created)
    }

    async fn replace_object<K>(&self, object: &K) -> Result<K>
    where
        K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned + Serialize,
    {
        let name = object.name_any();
        let replaced = self
            .api::<K>()
            .replace(&name, &self.post_params(), object)
            .await?;
        tracing::info!(kind = %K::kind(&()), %name, "Updated");
        Ok(replaced)
    }

    async fn delete_object<K>(&self, name: &str) -> Result<()>
    where
        K: Resource<DynamicType = ()> + Clone + Debug + DeserializeOwned,
    {
        match self.api::<K>().delete(name, &DeleteParams::default()).await {
            Ok(_) => {
                tracing::info!(kind = %K::kind(&()), %name, "Deleted");
                Ok(())
            }
            Err(error) => {
                let error = crate::core::Error::from(error);
                if error.is_not_found() {
                    tracing::debug!(kind = %K::kind(&()), %name, "Already deleted");
                    return Ok(());
                }
                Err(error)
            }
        }
    }
}

#[async_trait::async_trait]
impl Objects<ValidatingAdmissionPolicy> for KubeStore {
    async fn get(&self, name: &str) -> Result<Option<ValidatingAdmissionPolicy>> {
        Ok(self.index.read().admission_policy(name))
    }

    async fn create(&self, vap: &ValidatingAdmissionPolicy) -> Result<ValidatingAdmissionPolicy> {
        self.create_object(vap).await
    }

    async fn replace(&self, vap: &ValidatingAdmissionPolicy) -> Result<ValidatingAdmissionPolicy> {
        self.replace_object(vap).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.delete_object::<ValidatingAdmissionPolicy>(name).await
    }
}

#[async_trait::async_trait]
impl Objects<ValidatingAdmissionPolicyBinding> for KubeStore {
    async fn get(&self, name: &str) -> Result<Option<ValidatingAdmissionPolicyBinding>> {
        Ok(self.index.read().binding(name))
    }

    async fn create(
        &self,
        binding: &ValidatingAdmissionPolicyBinding,
    ) -> Result<ValidatingAdmissionPolicyBinding> {
        self.create_object(binding).await
    }

    async fn replace(
        &self,
        binding: &ValidatingAdmissionPolicyBinding,
    ) -> Result<ValidatingAdmissionPolicyBinding> {
        self.replace_object(binding).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        self.delete_object::<ValidatingAdmissionPolicyBinding>(name)
            .await
    }
}

#[async_trait::async_trait]
impl Store for KubeStore {
    async fn get_policy(&self, name: &str) -> Result<Option<ClusterPolicy>> {
        Ok(self.index.read().policy(name))
    }

    async fn get_latest_policy(&self, name: &str) -> Result<Option<ClusterPolicy>> {
        let policy = self.api::<ClusterPolicy>().get_opt(name).await?;
        Ok(policy)
    }

    async fn list_exceptions(&self) -> Result<Vec<PolicyException>> {
        Ok(self.index.read().exceptions())
    }

    async fn replace_policy_status(&self, policy: &ClusterPolicy) -> Result<ClusterPolicy> {
        let name = policy.name_any();
        let patch = status_patch(policy);
        let params = PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        };
        let updated = self
            .api::<ClusterPolicy>()
            .patch_status(&name, &params, &Patch::Merge(patch))
            .await?;
        Ok(updated)
    }
}

/// Builds a merge patch that only touches the generation status block.
///
/// No resource version is sent: this controller is the only writer of the
/// block, and spec edits racing the write must not cause it to be dropped.
fn status_patch(policy: &ClusterPolicy) -> serde_json::Value {
    let status = policy
        .status
        .as_ref()
        .map(|s| &s.validating_admission_policy);
    serde_json::json!({
        "apiVersion": ClusterPolicy::api_version(&()),
        "kind": ClusterPolicy::kind(&()),
        "metadata": {
            "name": policy.name_any(),
        },
        "status": {
            "validatingadmissionpolicy": status,
        },
    })
}
