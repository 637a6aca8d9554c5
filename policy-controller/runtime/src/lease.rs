use crate::k8s::{Api, ObjectMeta, Resource};
use anyhow::{Context, Result};
use k8s_openapi::api::{apps::v1::Deployment, coordination::v1 as coordv1};
use kube::api::{Patch, PatchParams};
use tokio::{sync::watch, time};

const LEASE_DURATION: time::Duration = time::Duration::from_secs(30);
const LEASE_NAME: &str = "vap-controller-write";
const RENEW_GRACE_PERIOD: time::Duration = time::Duration::from_secs(1);

/// Claims may lapse without a new claim being published, so leadership is
/// re-evaluated at least this often.
const RECHECK_INTERVAL: time::Duration = time::Duration::from_secs(1);

/// Competes for the write lease and reports whether this instance holds it.
pub async fn init(
    client: kube::Client,
    ns: &str,
    deployment_name: &str,
    hostname: &str,
    field_manager: &str,
) -> Result<watch::Receiver<bool>> {
    // Fetch the controller's deployment so that we can use it as an owner
    // reference of the Lease.
    let api = Api::<Deployment>::namespaced(client.clone(), ns);
    let deployment = api.get(deployment_name).await?;
    let owner = deployment
        .controller_owner_ref(&())
        .context("deployment has no uid")?;

    let lease = coordv1::Lease {
        metadata: ObjectMeta {
            name: Some(LEASE_NAME.to_string()),
            namespace: Some(ns.to_string()),
            // Specifying a resource version of "0" means that we will
            // only create the Lease if it does not already exist.
            resource_version: Some("0".to_string()),
            owner_references: Some(vec![owner]),
            labels: Some(crate::k8s::labels::managed_by(field_manager)),
            ..Default::default()
        },
        spec: None,
    };
    let api = Api::<coordv1::Lease>::namespaced(client, ns);
    match api
        .patch(
            LEASE_NAME,
            &PatchParams {
                field_manager: Some(field_manager.to_string()),
                ..Default::default()
            },
            &Patch::Apply(lease),
        )
        .await
    {
        Ok(lease) => tracing::info!(?lease, "Created Lease resource"),
        Err(kube::Error::Api(_)) => tracing::debug!("Lease already exists, no need to create it"),
        Err(error) => {
            return Err(error.into());
        }
    };

    let params = kubert::lease::ClaimParams {
        lease_duration: LEASE_DURATION,
        renew_grace_period: RENEW_GRACE_PERIOD,
    };
    let (claims, _task) = kubert::lease::LeaseManager::init(api, LEASE_NAME)
        .await?
        .spawn(hostname, params)
        .await?;

    let hostname = hostname.to_string();
    Ok(leadership(claims, move |claim| {
        claim.is_current_for(&hostname)
    }))
}

/// Maps a stream of claims onto a leadership flag.
///
/// The flag only changes when leadership changes. The task ends when either
/// side of the bridge is dropped.
fn leadership<T, F>(mut claims: watch::Receiver<T>, is_leader: F) -> watch::Receiver<bool>
where
    T: Send + Sync + 'static,
    F: Fn(&T) -> bool + Send + 'static,
{
    let (tx, rx) = watch::channel(is_leader(&claims.borrow_and_update()));
    tokio::spawn(async move {
        let mut recheck = time::interval(RECHECK_INTERVAL);
        recheck.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                res = claims.changed() => {
                    if res.is_err() {
                        return;
                    }
                }
                _ = recheck.tick() => {}
                _ = tx.closed() => return,
            }

            let leader = is_leader(&claims.borrow_and_update());
            tx.send_if_modified(|current| {
                if *current == leader {
                    return false;
                }
                tracing::info!(leader, "Leadership changed");
                *current = leader;
                true
            });
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn follows_claim_holder() {
        let (claims_tx, claims_rx) = watch::channel("other".to_string());
        let mut leader = leadership(claims_rx, |holder: &String| holder == "me");
        assert!(!*leader.borrow_and_update());

        claims_tx.send("me".to_string()).expect("bridge must be running");
        leader.changed().await.expect("leadership must change");
        assert!(*leader.borrow_and_update());

        // Renewals by the same holder do not publish a change.
        claims_tx.send("me".to_string()).expect("bridge must be running");
        time::sleep(RECHECK_INTERVAL * 2).await;
        assert!(!leader.has_changed().expect("bridge must be running"));

        claims_tx.send("other".to_string()).expect("bridge must be running");
        leader.changed().await.expect("leadership must change");
        assert!(!*leader.borrow_and_update());
    }

    #[tokio::test(start_paused = true)]
    async fn ends_when_claims_end() {
        let (claims_tx, claims_rx) = watch::channel(false);
        let mut leader = leadership(claims_rx, |held: &bool| *held);
        drop(claims_tx);
        assert!(leader.changed().await.is_err());
    }
}
