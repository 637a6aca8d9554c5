use crate::Store;
use std::sync::Arc;
use vap_controller_k8s_api::{policy::ValidatingAdmissionPolicyStatus, ClusterPolicy, ResourceExt};

/// Records the outcome of generation on a policy's status.
///
/// Reporting is best-effort: failures are logged and never change the
/// outcome of the reconcile that triggered them.
#[derive(Debug)]
pub struct StatusReporter<S> {
    store: Arc<S>,
}

impl<S> Clone for StatusReporter<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: Store> StatusReporter<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Writes `{generated, message}` onto the policy as currently stored by
    /// the API server. The caller's copy is never modified.
    pub async fn report(&self, policy: &ClusterPolicy, generated: bool, message: impl Into<String>) {
        let name = policy.name_any();
        let desired = ValidatingAdmissionPolicyStatus {
            generated,
            message: message.into(),
        };

        let latest = match self.store.get_latest_policy(&name).await {
            Ok(Some(latest)) => latest,
            Ok(None) => {
                tracing::debug!(%name, "Policy no longer exists; skipping status update");
                return;
            }
            Err(error) => {
                tracing::warn!(%name, %error, "Failed to fetch policy for status update");
                return;
            }
        };

        let current = latest
            .status
            .as_ref()
            .map(|s| &s.validating_admission_policy);
        if current == Some(&desired) {
            tracing::trace!(%name, "Status is up to date");
            return;
        }

        let mut updated = latest;
        updated
            .status
            .get_or_insert_with(Default::default)
            .validating_admission_policy = desired;

        match self.store.replace_policy_status(&updated).await {
            Ok(policy) => {
                tracing::debug!(%name, status = ?policy.status, "Updated policy status")
            }
            Err(error) => tracing::warn!(%name, %error, "Failed to update policy status"),
        }
    }
}
