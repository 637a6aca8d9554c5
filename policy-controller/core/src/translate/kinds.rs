use crate::{Error, Result};
use ahash::AHashMap as HashMap;
use parking_lot::RwLock;

/// An API resource that a policy kind refers to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceType {
    pub group: String,
    pub version: String,
    pub kind: String,
    pub plural: String,
}

/// Resolves the kinds written in policy match blocks.
///
/// Kinds may be written as `Kind`, `version/Kind` or `group/version/Kind`.
pub trait ResolveKind: Send + Sync {
    fn resolve(&self, kind: &str) -> Result<ResourceType>;
}

/// Kinds served by the cluster, in discovery order.
#[derive(Clone, Debug, Default)]
pub struct KindTable {
    by_kind: HashMap<String, Vec<ResourceType>>,
}

/// A table that is rebuilt in the background and read by every reconcile.
pub type SharedKindTable = std::sync::Arc<RwLock<KindTable>>;

// === impl KindTable ===

impl KindTable {
    /// Records a served resource. Earlier entries take precedence when a kind
    /// is written without a group.
    pub fn insert(&mut self, resource: ResourceType) {
        let entries = self.by_kind.entry(resource.kind.clone()).or_default();
        if !entries.contains(&resource) {
            entries.push(resource);
        }
    }

    pub fn len(&self) -> usize {
        self.by_kind.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_kind.is_empty()
    }

    fn lookup(&self, group: Option<&str>, version: Option<&str>, kind: &str) -> Option<&ResourceType> {
        self.by_kind.get(kind)?.iter().find(|r| {
            group.map_or(true, |g| r.group == g) && version.map_or(true, |v| r.version == v)
        })
    }
}

impl FromIterator<ResourceType> for KindTable {
    fn from_iter<T: IntoIterator<Item = ResourceType>>(iter: T) -> Self {
        let mut table = Self::default();
        for resource in iter {
            table.insert(resource);
        }
        table
    }
}

impl ResolveKind for KindTable {
    fn resolve(&self, kind: &str) -> Result<ResourceType> {
        let found = match kind.split('/').collect::<Vec<_>>().as_slice() {
            [kind] => self.lookup(None, None, kind),
            [version, kind] => self.lookup(None, Some(version), kind),
            [group, version, kind] => self.lookup(Some(group), Some(version), kind),
            _ => None,
        };
        found
            .cloned()
            .ok_or_else(|| Error::UnknownKind(kind.to_string()))
    }
}

impl ResolveKind for RwLock<KindTable> {
    fn resolve(&self, kind: &str) -> Result<ResourceType> {
        self.read().resolve(kind)
    }
}
