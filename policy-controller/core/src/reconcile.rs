use crate::{
    AuditEvent, Capability, CheckCapability, Eligibility, Error, EventSink, Generate, Objects,
    Result, StatusReporter, Store,
};
use std::sync::Arc;
use vap_controller_k8s_api::{
    self as k8s, ClusterPolicy, PolicyException, Resource, ResourceExt, ValidatingAdmissionPolicy,
    ValidatingAdmissionPolicyBinding,
};

/// Recorded when a policy is ineligible and no reason was given.
pub const SKIP_GENERATING_MESSAGE: &str = "skip generating: a policy exception is configured.";

/// Drives a single policy's derived objects toward their desired state.
pub struct Reconciler<S> {
    store: Arc<S>,
    capabilities: Arc<dyn CheckCapability>,
    generator: Arc<dyn Generate>,
    events: Arc<dyn EventSink>,
    status: StatusReporter<S>,
}

/// Describes how a reconcile completed successfully.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The policy no longer exists.
    Absent,

    /// The policy has no validation rules; nothing was reported.
    NoValidation,

    /// A capability is missing; derived objects were left untouched.
    MissingCapability(Capability),

    /// The policy cannot be generated; derived objects were removed.
    Ineligible(String),

    /// Both derived objects exist and are up to date.
    Generated,
}

// === impl Reconciler ===

impl<S: Store> Reconciler<S> {
    pub fn new(
        store: Arc<S>,
        capabilities: Arc<dyn CheckCapability>,
        generator: Arc<dyn Generate>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let status = StatusReporter::new(store.clone());
        Self {
            store,
            capabilities,
            generator,
            events,
            status,
        }
    }

    pub async fn reconcile(&self, name: &str) -> Result<Outcome> {
        let policy = match self.store.get_policy(name).await? {
            Some(policy) => policy,
            None => {
                tracing::debug!("Policy not found");
                return Ok(Outcome::Absent);
            }
        };

        let spec = &policy.spec;
        if !spec.has_validate() {
            return Ok(Outcome::NoValidation);
        }

        for capability in Capability::ALL {
            if !self.capabilities.allowed(capability).await {
                tracing::debug!(%capability, "Missing capability");
                self.status
                    .report(&policy, false, capability.missing_message())
                    .await;
                return Ok(Outcome::MissingCapability(capability));
            }
        }

        let admission_policy_name = policy.name_any();
        let binding_name = k8s::binding_name(&admission_policy_name);

        let observed_admission_policy =
            match Objects::<ValidatingAdmissionPolicy>::get(&*self.store, &admission_policy_name)
                .await
            {
                Ok(observed) => observed,
                Err(error) => return Err(self.fail(&policy, error).await),
            };
        let observed_binding =
            match Objects::<ValidatingAdmissionPolicyBinding>::get(&*self.store, &binding_name)
                .await
            {
                Ok(observed) => observed,
                Err(error) => return Err(self.fail(&policy, error).await),
            };

        // Exceptions are matched against the first rule only: a generated
        // admission policy corresponds to a single rule.
        let rule = spec.rules.first().map(|r| r.name.as_str()).unwrap_or_default();
        let exceptions = self.exceptions(&admission_policy_name, rule).await?;

        if let Eligibility::Ineligible(reason) = self.generator.can_generate(spec, &exceptions) {
            let deleted_admission_policy = match observed_admission_policy {
                Some(_) => {
                    Objects::<ValidatingAdmissionPolicy>::delete(
                        &*self.store,
                        &admission_policy_name,
                    )
                    .await
                }
                None => Ok(()),
            };
            let deleted_binding = match observed_binding {
                Some(_) => {
                    Objects::<ValidatingAdmissionPolicyBinding>::delete(&*self.store, &binding_name)
                        .await
                }
                None => Ok(()),
            };
            deleted_admission_policy.and(deleted_binding)?;

            let message = if reason.is_empty() {
                SKIP_GENERATING_MESSAGE.to_string()
            } else {
                reason
            };
            tracing::debug!(%message, "Policy is not eligible for generation");
            self.status.report(&policy, false, message.clone()).await;
            return Ok(Outcome::Ineligible(message));
        }

        let admission_policy = self
            .apply(observed_admission_policy, &admission_policy_name, |target| {
                self.generator
                    .build_admission_policy(target, &policy, &exceptions)
            })
            .await;
        if let Err(error) = admission_policy {
            return Err(self.fail(&policy, error).await);
        }

        let binding = self
            .apply(observed_binding, &binding_name, |target| {
                self.generator.build_binding(target, &policy)
            })
            .await;
        if let Err(error) = binding {
            return Err(self.fail(&policy, error).await);
        }

        self.status.report(&policy, true, "").await;
        self.events
            .publish(AuditEvent::generated(
                &policy,
                &admission_policy_name,
                &binding_name,
            ))
            .await;
        tracing::info!(admission_policy = %admission_policy_name, binding = %binding_name, "Generated");
        Ok(Outcome::Generated)
    }

    /// Lists the exceptions that apply to the given policy rule.
    async fn exceptions(&self, policy: &str, rule: &str) -> Result<Vec<PolicyException>> {
        let exceptions = self.store.list_exceptions().await?;
        Ok(exceptions
            .into_iter()
            .filter(|polex| polex.spec.applies_to(policy, rule))
            .collect())
    }

    /// Creates the object if it has never been stored; otherwise rebuilds a
    /// copy of the observed object and replaces it only if it changed.
    async fn apply<K, F>(&self, observed: Option<K>, name: &str, build: F) -> Result<K>
    where
        S: Objects<K>,
        K: Resource<DynamicType = ()> + Clone + Default + PartialEq + Send + Sync + 'static,
        F: FnOnce(&mut K) -> Result<()> + Send,
    {
        let stored = |o: &K| {
            o.meta()
                .resource_version
                .as_deref()
                .is_some_and(|v| !v.is_empty())
        };
        match observed.filter(stored) {
            None => {
                let mut object = K::default();
                object.meta_mut().name = Some(name.to_string());
                build(&mut object)?;
                tracing::debug!(kind = %K::kind(&()), %name, "Creating");
                Objects::<K>::create(&*self.store, &object).await
            }
            Some(observed) => {
                let mut object = observed.clone();
                build(&mut object)?;
                if object == observed {
                    tracing::trace!(kind = %K::kind(&()), %name, "Up to date");
                    return Ok(observed);
                }
                tracing::debug!(kind = %K::kind(&()), %name, "Updating");
                Objects::<K>::replace(&*self.store, &object).await
            }
        }
    }

    async fn fail(&self, policy: &ClusterPolicy, error: Error) -> Error {
        self.status.report(policy, false, error.to_string()).await;
        error
    }
}

#[async_trait::async_trait]
impl<S: Store + 'static> crate::Reconcile for Reconciler<S> {
    async fn reconcile(&self, key: &str) -> Result<()> {
        let outcome = Reconciler::reconcile(self, key).await?;
        tracing::debug!(?outcome);
        Ok(())
    }
}
