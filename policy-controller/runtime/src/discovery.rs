use crate::{
    core::translate::{KindTable, ResourceType, SharedKindTable},
    k8s::Client,
};
use anyhow::Result;
use kube::discovery::{ApiResource, Discovery};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::time;

/// Builds the kind table and keeps it fresh in the background.
///
/// The first discovery must succeed. Later failures keep the previous table.
pub(crate) async fn init(client: Client, refresh: time::Duration) -> Result<SharedKindTable> {
    let table = discover(&client).await?;
    tracing::info!(resources = table.len(), "Discovered API resources");
    let table = Arc::new(RwLock::new(table));

    let shared = table.clone();
    tokio::spawn(async move {
        let mut interval = time::interval_at(time::Instant::now() + refresh, refresh);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            match discover(&client).await {
                Ok(table) => {
                    tracing::debug!(resources = table.len(), "Refreshed API resources");
                    *shared.write() = table;
                }
                Err(error) => tracing::warn!(%error, "Failed to refresh API resources"),
            }
        }
    });

    Ok(table)
}

async fn discover(client: &Client) -> Result<KindTable> {
    let discovery = Discovery::new(client.clone()).run().await?;

    // Preferred versions are inserted first so that they win when a kind is
    // written without a version.
    let mut table = KindTable::default();
    for group in discovery.groups() {
        let preferred = group.recommended_resources();
        let all = group
            .versions()
            .flat_map(|version| group.versioned_resources(version));
        for (resource, _) in preferred.into_iter().chain(all) {
            if let Some(resource) = resource_type(&resource) {
                table.insert(resource);
            }
        }
    }
    Ok(table)
}

/// Subresources are not matchable by kind.
fn resource_type(resource: &ApiResource) -> Option<ResourceType> {
    if resource.plural.contains('/') {
        return None;
    }
    Some(ResourceType {
        group: resource.group.clone(),
        version: resource.version.clone(),
        kind: resource.kind.clone(),
        plural: resource.plural.clone(),
    })
}
