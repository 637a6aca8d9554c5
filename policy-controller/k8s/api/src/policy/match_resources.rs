use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Selects the resources a rule (or an exception) applies to.
///
/// Either the legacy `resources` block is set, or one of the `any`/`all`
/// filter lists.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MatchResources {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub any: Option<Vec<ResourceFilter>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub all: Option<Vec<ResourceFilter>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceDescription>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subjects: Option<Vec<serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_roles: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<ResourceDescription>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subjects: Option<Vec<serde_json::Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_roles: Option<Vec<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResourceDescription {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub names: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub operations: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}

// === impl MatchResources ===

impl MatchResources {
    /// Indicates whether the block filters on anything other than resources,
    /// e.g. requesting users or roles.
    pub fn has_subject_filters(&self) -> bool {
        let top = self.subjects.is_some() || self.roles.is_some() || self.cluster_roles.is_some();
        top || self
            .any
            .iter()
            .chain(self.all.iter())
            .flatten()
            .any(ResourceFilter::has_subject_filters)
    }

    /// Iterates over every resource description in the block.
    pub fn descriptions(&self) -> impl Iterator<Item = &ResourceDescription> {
        self.resources.iter().chain(
            self.any
                .iter()
                .chain(self.all.iter())
                .flatten()
                .filter_map(|f| f.resources.as_ref()),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.descriptions().next().is_none() && !self.has_subject_filters()
    }
}

impl ResourceFilter {
    fn has_subject_filters(&self) -> bool {
        self.subjects.is_some() || self.roles.is_some() || self.cluster_roles.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptions_flatten_any_and_all() {
        let m = MatchResources {
            any: Some(vec![ResourceFilter {
                resources: Some(ResourceDescription {
                    kinds: vec!["Pod".to_string()],
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            all: Some(vec![ResourceFilter::default()]),
            ..Default::default()
        };
        let kinds = m
            .descriptions()
            .flat_map(|d| d.kinds.iter())
            .collect::<Vec<_>>();
        assert_eq!(kinds, vec!["Pod"]);
        assert!(!m.has_subject_filters());
        assert!(!m.is_empty());
    }

    #[test]
    fn roles_are_subject_filters() {
        let m = MatchResources {
            any: Some(vec![ResourceFilter {
                cluster_roles: Some(vec!["admin".to_string()]),
                ..Default::default()
            }]),
            ..Default::default()
        };
        assert!(m.has_subject_filters());
        assert!(MatchResources::default().is_empty());
    }
}
