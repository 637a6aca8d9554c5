use crate::{
    core::{Capability, CheckCapability},
    k8s::{Api, Client, PostParams},
};
use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SelfSubjectAccessReview, SelfSubjectAccessReviewSpec,
};

/// The verbs the controller needs on each derived object kind.
const VERBS: [&str; 6] = ["get", "list", "watch", "create", "update", "delete"];

/// Checks capabilities by asking the API server to review the controller's
/// own access.
///
/// Every check issues fresh reviews, so RBAC changes take effect on the next
/// reconcile.
#[derive(Clone)]
pub(crate) struct AccessReview {
    client: Client,
}

impl AccessReview {
    pub(crate) fn new(client: Client) -> Self {
        Self { client }
    }

    async fn review(&self, capability: Capability, verb: &str) -> Result<bool, kube::Error> {
        let api = Api::<SelfSubjectAccessReview>::all(self.client.clone());
        let review = api
            .create(&PostParams::default(), &access_review(capability, verb))
            .await?;
        Ok(review.status.is_some_and(|s| s.allowed))
    }
}

#[async_trait::async_trait]
impl CheckCapability for AccessReview {
    async fn allowed(&self, capability: Capability) -> bool {
        for verb in VERBS {
            match self.review(capability, verb).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(%capability, %verb, "Access denied");
                    return false;
                }
                Err(error) => {
                    tracing::warn!(%capability, %verb, %error, "Failed to review access");
                    return false;
                }
            }
        }
        true
    }
}

fn access_review(capability: Capability, verb: &str) -> SelfSubjectAccessReview {
    SelfSubjectAccessReview {
        metadata: Default::default(),
        spec: SelfSubjectAccessReviewSpec {
            resource_attributes: Some(ResourceAttributes {
                group: Some(capability.group().to_string()),
                resource: Some(capability.resource().to_string()),
                verb: Some(verb.to_string()),
                ..Default::default()
            }),
            non_resource_attributes: None,
        },
        status: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reviews_cluster_scoped_access() {
        let review = access_review(Capability::ManageBindings, "delete");
        let attrs = review.spec.resource_attributes.expect("resource attributes");
        assert_eq!(attrs.group.as_deref(), Some("admissionregistration.k8s.io"));
        assert_eq!(
            attrs.resource.as_deref(),
            Some("validatingadmissionpolicybindings")
        );
        assert_eq!(attrs.verb.as_deref(), Some("delete"));
        assert_eq!(attrs.namespace, None);
        assert_eq!(attrs.name, None);
    }
}
