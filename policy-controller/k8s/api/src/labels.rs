use std::collections::BTreeMap;

pub const MANAGED_BY: &str = "app.kubernetes.io/managed-by";

pub const DEFAULT_MANAGER: &str = "kyverno";

/// Builds the label set stamped onto every generated object.
pub fn managed_by(manager: &str) -> BTreeMap<String, String> {
    Some((MANAGED_BY.to_string(), manager.to_string()))
        .into_iter()
        .collect()
}

/// Builds the label selector used to watch generated objects.
pub fn managed_by_selector(manager: &str) -> String {
    format!("{MANAGED_BY}={manager}")
}
