use crate::{ControllerMetrics, Result, WorkQueue};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, info_span, Instrument};

pub const DEFAULT_WORKERS: usize = 2;
pub const DEFAULT_MAX_RETRIES: u32 = 10;

/// Converges the state for a single queue key.
#[async_trait::async_trait]
pub trait Reconcile: Send + Sync + 'static {
    async fn reconcile(&self, key: &str) -> Result<()>;
}

/// Runs a fixed pool of workers against a shared queue.
pub struct Controller<R> {
    queue: WorkQueue<String>,
    reconciler: Arc<R>,
    max_retries: u32,
    metrics: ControllerMetrics,
}

// === impl Controller ===

impl<R: Reconcile> Controller<R> {
    pub fn new(
        queue: WorkQueue<String>,
        reconciler: Arc<R>,
        max_retries: u32,
        metrics: ControllerMetrics,
    ) -> Self {
        Self {
            queue,
            reconciler,
            max_retries,
            metrics,
        }
    }

    /// Processes keys until `shutdown` is signaled.
    ///
    /// Workers only pull keys while `leader` is true. Once shutdown is
    /// signaled the queue stops accepting keys and each worker exits after
    /// its in-flight reconcile completes.
    pub async fn run(self, workers: usize, leader: watch::Receiver<bool>, shutdown: drain::Watch) {
        let Self {
            queue,
            reconciler,
            max_retries,
            metrics,
        } = self;

        info!(workers, "Starting workers");
        let tasks = (0..workers)
            .map(|id| {
                let worker = Worker {
                    queue: queue.clone(),
                    reconciler: reconciler.clone(),
                    leader: leader.clone(),
                    max_retries,
                    metrics: metrics.clone(),
                };
                tokio::spawn(worker.run().instrument(info_span!("worker", id)))
            })
            .collect::<Vec<_>>();

        let release = shutdown.signaled().await;
        info!("Shutting down workers");
        queue.shut_down();
        for task in tasks {
            if let Err(error) = task.await {
                tracing::error!(%error, "Worker failed");
            }
        }
        drop(release);
    }
}

struct Worker<R> {
    queue: WorkQueue<String>,
    reconciler: Arc<R>,
    leader: watch::Receiver<bool>,
    max_retries: u32,
    metrics: ControllerMetrics,
}

impl<R: Reconcile> Worker<R> {
    async fn run(mut self) {
        loop {
            if !self.wait_for_leadership().await {
                return;
            }

            let key = match self.queue.get().await {
                Some(key) => key,
                None => return,
            };
            self.process(key.clone())
                .instrument(info_span!("reconcile", policy = %key))
                .await;
            self.queue.done(&key);
        }
    }

    /// Returns false if the worker should stop.
    async fn wait_for_leadership(&mut self) -> bool {
        loop {
            let leader = *self.leader.borrow_and_update();
            if leader {
                return true;
            }
            tokio::select! {
                biased;
                _ = self.queue.closed() => return false,
                res = self.leader.changed() => {
                    if res.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    async fn process(&self, key: String) {
        match self.reconciler.reconcile(&key).await {
            Ok(()) => {
                self.metrics.reconciled();
                self.queue.forget(&key);
            }
            Err(error) => {
                self.metrics.failed();
                let requeues = self.queue.num_requeues(&key);
                if requeues < self.max_retries {
                    tracing::info!(%error, requeues, "Reconcile failed; retrying");
                    self.metrics.requeued();
                    self.queue.add_rate_limited(key);
                } else {
                    tracing::warn!(%error, requeues, "Dropping key after too many failures");
                    self.metrics.dropped();
                    self.queue.forget(&key);
                }
            }
        }
    }
}
