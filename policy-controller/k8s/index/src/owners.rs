use ahash::AHashMap as HashMap;
use vap_controller_k8s_api::{ClusterPolicy, ObjectMeta, Resource, OWNER_KIND};

/// The kinds of objects generated for a policy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DerivedKind {
    AdmissionPolicy,
    Binding,
}

/// Maps generated objects back to the policy that owns them.
///
/// Delete notifications only carry a name, so the owner observed when the
/// object was last applied is kept until the object is deleted.
#[derive(Debug, Default)]
pub(crate) struct Owners {
    by_derived: HashMap<(DerivedKind, String), String>,
}

// === impl DerivedKind ===

impl DerivedKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AdmissionPolicy => "ValidatingAdmissionPolicy",
            Self::Binding => "ValidatingAdmissionPolicyBinding",
        }
    }
}

impl std::fmt::Display for DerivedKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// === impl Owners ===

impl Owners {
    /// Records the owner of a derived object, returning the previous owner.
    pub(crate) fn set(
        &mut self,
        kind: DerivedKind,
        name: &str,
        owner: Option<String>,
    ) -> Option<String> {
        let key = (kind, name.to_string());
        match owner {
            Some(owner) => self.by_derived.insert(key, owner),
            None => self.by_derived.remove(&key),
        }
    }

    pub(crate) fn remove(&mut self, kind: DerivedKind, name: &str) -> Option<String> {
        self.by_derived.remove(&(kind, name.to_string()))
    }

    pub(crate) fn get(&self, kind: DerivedKind, name: &str) -> Option<&str> {
        self.by_derived
            .get(&(kind, name.to_string()))
            .map(String::as_str)
    }
}

/// Returns the name of the policy that owns an object.
///
/// The object must carry exactly one owner reference, and it must refer to a
/// `ClusterPolicy`.
pub fn controlling_policy(meta: &ObjectMeta) -> Option<String> {
    let group = ClusterPolicy::group(&());
    match meta.owner_references.as_deref()? {
        [owner]
            if owner.kind == OWNER_KIND
                && owner.api_version.split('/').next() == Some(&*group) =>
        {
            Some(owner.name.clone())
        }
        _ => None,
    }
}
