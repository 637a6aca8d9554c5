use crate::{
    capability::AccessReview,
    core::{
        translate::CelTranslator, Controller, ControllerMetrics, Reconciler, WorkQueue,
        CONTROLLER_NAME, DEFAULT_MAX_RETRIES, DEFAULT_WORKERS,
    },
    discovery,
    events::RecorderSink,
    index::{Index, IndexMetrics},
    k8s::{
        labels, ClusterPolicy, PolicyException, ValidatingAdmissionPolicy,
        ValidatingAdmissionPolicyBinding,
    },
    lease,
    store::KubeStore,
};
use anyhow::{bail, Context, Result};
use clap::Parser;
use kube::runtime::watcher;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::{info_span, Instrument};

#[derive(Debug, Parser)]
#[clap(
    name = "vap-controller",
    about = "Generates ValidatingAdmissionPolicies from ClusterPolicies"
)]
pub struct Args {
    #[clap(
        long,
        default_value = "vap_controller=info,warn",
        env = "VAP_CONTROLLER_LOG"
    )]
    log_level: kubert::LogFilter,

    #[clap(long, default_value = "plain")]
    log_format: kubert::LogFormat,

    #[clap(flatten)]
    client: kubert::ClientArgs,

    #[clap(flatten)]
    admin: kubert::AdminArgs,

    /// The number of policies reconciled concurrently.
    #[clap(long, default_value_t = DEFAULT_WORKERS)]
    workers: usize,

    /// The number of times a failing policy is retried before it is dropped
    /// until its next change.
    #[clap(long, default_value_t = DEFAULT_MAX_RETRIES)]
    max_retries: u32,

    #[clap(long, default_value = "kyverno")]
    controller_namespace: String,

    #[clap(long, default_value = "kyverno-admission-controller")]
    controller_deployment_name: String,

    /// The value of the `app.kubernetes.io/managed-by` label stamped onto
    /// generated objects.
    #[clap(long, default_value = labels::DEFAULT_MANAGER)]
    managed_by_label: String,

    #[clap(long, default_value = "300")]
    discovery_refresh_secs: u64,
}

impl Args {
    #[inline]
    pub async fn parse_and_run() -> Result<()> {
        Self::parse().run().await
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            admin,
            client,
            log_level,
            log_format,
            workers,
            max_retries,
            controller_namespace,
            controller_deployment_name,
            managed_by_label,
            discovery_refresh_secs,
        } = self;

        if workers == 0 {
            bail!("--workers must be at least 1");
        }

        let mut prom = <Registry>::default();
        let controller_prom = prom.sub_registry_with_prefix("vap_controller");
        let queue = WorkQueue::default();
        let controller_metrics = ControllerMetrics::register(controller_prom, &queue);
        let index_metrics = IndexMetrics::register(controller_prom);
        let rt_metrics = kubert::RuntimeMetrics::register(prom.sub_registry_with_prefix("kube"));

        let mut runtime = kubert::Runtime::builder()
            .with_log(log_level, log_format)
            .with_metrics(rt_metrics)
            .with_admin(admin.into_builder().with_prometheus(prom))
            .with_client(client)
            .build()
            .await?;

        let hostname =
            std::env::var("HOSTNAME").context("Failed to fetch `HOSTNAME` environment variable")?;

        let leader = lease::init(
            runtime.client(),
            &controller_namespace,
            &controller_deployment_name,
            &hostname,
            &managed_by_label,
        )
        .await?;

        let kinds = discovery::init(
            runtime.client(),
            Duration::from_secs(discovery_refresh_secs),
        )
        .await?;

        // Every watch feeds the same index, which maps changes onto policy
        // names in the work queue.
        let index = Index::shared(queue.clone(), index_metrics);

        let policies = runtime.watch_all::<ClusterPolicy>(watcher::Config::default());
        tokio::spawn(
            kubert::index::cluster(index.clone(), policies)
                .instrument(info_span!("clusterpolicies")),
        );

        let exceptions = runtime.watch_all::<PolicyException>(watcher::Config::default());
        tokio::spawn(
            kubert::index::namespaced(index.clone(), exceptions)
                .instrument(info_span!("policyexceptions")),
        );

        // Only generated objects are of interest.
        let managed = labels::managed_by_selector(&managed_by_label);
        let admission_policies = runtime.watch_all::<ValidatingAdmissionPolicy>(
            watcher::Config::default().labels(&managed),
        );
        tokio::spawn(
            kubert::index::cluster(index.clone(), admission_policies)
                .instrument(info_span!("validatingadmissionpolicies")),
        );

        let bindings = runtime.watch_all::<ValidatingAdmissionPolicyBinding>(
            watcher::Config::default().labels(&managed),
        );
        tokio::spawn(
            kubert::index::cluster(index.clone(), bindings)
                .instrument(info_span!("validatingadmissionpolicybindings")),
        );

        let client = runtime.client();
        let store = Arc::new(KubeStore::new(client.clone(), index, CONTROLLER_NAME));
        let reconciler = Reconciler::new(
            store,
            Arc::new(AccessReview::new(client.clone())),
            Arc::new(CelTranslator::new(managed_by_label, kinds)),
            Arc::new(RecorderSink::new(client, CONTROLLER_NAME, hostname)),
        );

        let controller = Controller::new(
            queue,
            Arc::new(reconciler),
            max_retries,
            controller_metrics,
        );
        tokio::spawn(
            controller
                .run(workers, leader, runtime.shutdown_handle())
                .instrument(info_span!("controller")),
        );

        // Block the main thread on the shutdown signal. Once it fires, wait
        // for the workers to complete before exiting.
        if runtime.run().await.is_err() {
            bail!("Aborted");
        }

        Ok(())
    }
}
