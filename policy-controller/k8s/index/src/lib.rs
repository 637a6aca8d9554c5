//! Watch-driven cache and change intake.
//!
//! The index is fed by four watches and serves two purposes: it answers the
//! reconciler's reads, and it turns every relevant change into a policy name
//! on the shared work queue.
//!
//! ```text
//! [ ClusterPolicy ] ──────────────────────────────────┐
//! [ PolicyException ] ── exceptions[].policyName ─────┤
//! [ ValidatingAdmissionPolicy ] ─── owner ref ────────┼──> WorkQueue<policy>
//! [ ValidatingAdmissionPolicyBinding ] ── owner ref ──┘
//! ```
//!
//! Updates that leave an object's spec unchanged (status writes, resyncs) are
//! absorbed by the index. Dependent objects are only mapped onto policies
//! that are present in the index.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

mod metrics;
mod owners;

#[cfg(test)]
mod tests;

pub use self::{
    metrics::IndexMetrics,
    owners::{controlling_policy, DerivedKind},
};
use self::owners::Owners;
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;
use std::{collections::BTreeSet, sync::Arc};
use vap_controller_core::WorkQueue;
use vap_controller_k8s_api::{
    ClusterPolicy, PolicyException, ResourceExt, ValidatingAdmissionPolicy,
    ValidatingAdmissionPolicyBinding,
};

pub type SharedIndex = Arc<RwLock<Index>>;

#[derive(Debug)]
pub struct Index {
    queue: WorkQueue<String>,
    metrics: IndexMetrics,

    policies: HashMap<String, ClusterPolicy>,
    exceptions: HashMap<ResourceId, PolicyException>,
    admission_policies: HashMap<String, ValidatingAdmissionPolicy>,
    bindings: HashMap<String, ValidatingAdmissionPolicyBinding>,
    owners: Owners,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceId {
    pub namespace: String,
    pub name: String,
}

/// An object generated for a policy.
trait Derived: ResourceExt + Clone {
    const KIND: DerivedKind;

    fn cache(index: &mut Index) -> &mut HashMap<String, Self>;

    fn same_spec(&self, other: &Self) -> bool;
}

// === impl Index ===

impl Index {
    pub fn shared(queue: WorkQueue<String>, metrics: IndexMetrics) -> SharedIndex {
        Arc::new(RwLock::new(Self {
            queue,
            metrics,
            policies: HashMap::new(),
            exceptions: HashMap::new(),
            admission_policies: HashMap::new(),
            bindings: HashMap::new(),
            owners: Owners::default(),
        }))
    }

    pub fn policy(&self, name: &str) -> Option<ClusterPolicy> {
        self.policies.get(name).cloned()
    }

    /// Returns all exceptions, ordered by namespace and name.
    pub fn exceptions(&self) -> Vec<PolicyException> {
        let mut exceptions = self.exceptions.iter().collect::<Vec<_>>();
        exceptions.sort_by(|(a, _), (b, _)| a.cmp(b));
        exceptions.into_iter().map(|(_, e)| e.clone()).collect()
    }

    pub fn admission_policy(&self, name: &str) -> Option<ValidatingAdmissionPolicy> {
        self.admission_policies.get(name).cloned()
    }

    pub fn binding(&self, name: &str) -> Option<ValidatingAdmissionPolicyBinding> {
        self.bindings.get(name).cloned()
    }

    /// Returns the policy that owned a derived object when it was last seen.
    pub fn owner(&self, kind: DerivedKind, name: &str) -> Option<&str> {
        self.owners.get(kind, name)
    }

    fn enqueue(&self, kind: &str, policy: String) {
        tracing::debug!(%kind, %policy, "Enqueueing");
        self.metrics.enqueued(kind);
        self.queue.add(policy);
    }

    /// Enqueues each named policy that is present in the index.
    fn enqueue_known<'p>(&self, kind: &str, policies: impl IntoIterator<Item = &'p str>) {
        let known = policies
            .into_iter()
            .filter(|name| {
                let known = self.policies.contains_key(*name);
                if !known {
                    tracing::trace!(%kind, policy = %name, "Ignoring unknown policy");
                }
                known
            })
            .collect::<BTreeSet<_>>();
        for policy in known {
            self.enqueue(kind, policy.to_string());
        }
    }

    fn apply_derived<K: Derived>(&mut self, object: K) {
        let name = object.name_unchecked();
        let owner = controlling_policy(object.meta());
        let previous_owner = self.owners.set(K::KIND, &name, owner.clone());

        let cache = K::cache(self);
        let unchanged = cache
            .get(&name)
            .is_some_and(|cached| cached.same_spec(&object))
            && previous_owner == owner;
        cache.insert(name.clone(), object);
        let size = cache.len();
        self.metrics.applied(K::KIND.as_str(), size);

        if unchanged {
            tracing::trace!(kind = %K::KIND, %name, "Unchanged");
            return;
        }
        // A re-parented object releases its previous owner as well.
        self.enqueue_known(
            K::KIND.as_str(),
            previous_owner.iter().chain(owner.iter()).map(String::as_str),
        );
    }

    fn delete_derived<K: Derived>(&mut self, name: String) {
        let cache = K::cache(self);
        cache.remove(&name);
        let size = cache.len();
        self.metrics.deleted(K::KIND.as_str(), size);

        if let Some(owner) = self.owners.remove(K::KIND, &name) {
            self.enqueue_known(K::KIND.as_str(), Some(owner.as_str()));
        }
    }
}

impl kubert::index::IndexClusterResource<ClusterPolicy> for Index {
    fn apply(&mut self, policy: ClusterPolicy) {
        let name = policy.name_unchecked();
        let changed = self
            .policies
            .get(&name)
            .map_or(true, |cached| cached.spec != policy.spec);

        // The latest version is always kept so that status reports compare
        // against the most recent status.
        self.policies.insert(name.clone(), policy);
        self.metrics.applied("ClusterPolicy", self.policies.len());

        if changed {
            self.enqueue("ClusterPolicy", name);
        } else {
            tracing::trace!(%name, "Policy spec unchanged");
        }
    }

    fn delete(&mut self, name: String) {
        self.policies.remove(&name);
        self.metrics.deleted("ClusterPolicy", self.policies.len());
        self.enqueue("ClusterPolicy", name);
    }
}

impl kubert::index::IndexNamespacedResource<PolicyException> for Index {
    fn apply(&mut self, polex: PolicyException) {
        let id = ResourceId::new(polex.namespace().unwrap_or_default(), polex.name_unchecked());
        let previous = self.exceptions.get(&id);
        if previous.is_some_and(|p| p.spec == polex.spec) {
            tracing::trace!(namespace = %id.namespace, name = %id.name, "Exception spec unchanged");
            self.exceptions.insert(id, polex);
            return;
        }

        // Retargeted exceptions release the policies they no longer name.
        let targets = previous
            .into_iter()
            .chain(Some(&polex))
            .flat_map(|p| p.spec.projectable_policies())
            .map(str::to_string)
            .collect::<Vec<_>>();
        self.exceptions.insert(id, polex);
        self.metrics.applied("PolicyException", self.exceptions.len());
        self.enqueue_known("PolicyException", targets.iter().map(String::as_str));
    }

    fn delete(&mut self, namespace: String, name: String) {
        let id = ResourceId::new(namespace, name);
        let removed = self.exceptions.remove(&id);
        self.metrics.deleted("PolicyException", self.exceptions.len());
        if let Some(polex) = removed {
            self.enqueue_known("PolicyException", polex.spec.projectable_policies());
        }
    }
}

impl kubert::index::IndexClusterResource<ValidatingAdmissionPolicy> for Index {
    fn apply(&mut self, vap: ValidatingAdmissionPolicy) {
        self.apply_derived(vap)
    }

    fn delete(&mut self, name: String) {
        self.delete_derived::<ValidatingAdmissionPolicy>(name)
    }
}

impl kubert::index::IndexClusterResource<ValidatingAdmissionPolicyBinding> for Index {
    fn apply(&mut self, binding: ValidatingAdmissionPolicyBinding) {
        self.apply_derived(binding)
    }

    fn delete(&mut self, name: String) {
        self.delete_derived::<ValidatingAdmissionPolicyBinding>(name)
    }
}

// === impl ResourceId ===

impl ResourceId {
    pub fn new(namespace: String, name: String) -> Self {
        Self { namespace, name }
    }
}

// === impl Derived ===

impl Derived for ValidatingAdmissionPolicy {
    const KIND: DerivedKind = DerivedKind::AdmissionPolicy;

    fn cache(index: &mut Index) -> &mut HashMap<String, Self> {
        &mut index.admission_policies
    }

    fn same_spec(&self, other: &Self) -> bool {
        self.spec == other.spec
    }
}

impl Derived for ValidatingAdmissionPolicyBinding {
    const KIND: DerivedKind = DerivedKind::Binding;

    fn cache(index: &mut Index) -> &mut HashMap<String, Self> {
        &mut index.bindings
    }

    fn same_spec(&self, other: &Self) -> bool {
        self.spec == other.spec
    }
}
