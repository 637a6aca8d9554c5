use crate::WorkQueue;
use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct ControllerMetrics {
    reconciles: Family<ReconcileLabels, Counter>,
    requeues: Counter,
    drops: Counter,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct ReconcileLabels {
    result: ReconcileResult,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
enum ReconcileResult {
    Ok,
    Error,
}

// === impl ControllerMetrics ===

impl ControllerMetrics {
    /// Registers the controller's metrics, including the depth of `queue`.
    pub fn register(prom: &mut Registry, queue: &WorkQueue<String>) -> Self {
        let metrics = Self::default();

        prom.register(
            "reconciles",
            "Count of policy reconciles by result",
            metrics.reconciles.clone(),
        );
        prom.register(
            "requeues",
            "Count of policies requeued after a failed reconcile",
            metrics.requeues.clone(),
        );
        prom.register(
            "drops",
            "Count of policies dropped after exhausting their retries",
            metrics.drops.clone(),
        );
        prom.register(
            "queue_depth",
            "Gauge of the number of policies waiting to be reconciled",
            queue.depth(),
        );

        metrics
    }

    pub(crate) fn reconciled(&self) {
        self.reconciles
            .get_or_create(&ReconcileLabels {
                result: ReconcileResult::Ok,
            })
            .inc();
    }

    pub(crate) fn failed(&self) {
        self.reconciles
            .get_or_create(&ReconcileLabels {
                result: ReconcileResult::Error,
            })
            .inc();
    }

    pub(crate) fn requeued(&self) {
        self.requeues.inc();
    }

    pub(crate) fn dropped(&self) {
        self.drops.inc();
    }

    #[cfg(test)]
    pub(crate) fn reconcile_count(&self, ok: bool) -> u64 {
        let result = if ok {
            ReconcileResult::Ok
        } else {
            ReconcileResult::Error
        };
        self.reconciles
            .get_or_create(&ReconcileLabels { result })
            .get()
    }

    #[cfg(test)]
    pub(crate) fn drop_count(&self) -> u64 {
        self.drops.get()
    }
}
