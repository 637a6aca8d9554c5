use prometheus_client::{
    encoding::EncodeLabelSet,
    metrics::{counter::Counter, family::Family, gauge::Gauge},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct IndexMetrics {
    index_size: Family<IndexLabels, Gauge>,
    index_applies: Family<IndexLabels, Counter>,
    index_deletes: Family<IndexLabels, Counter>,
    enqueues: Family<IndexLabels, Counter>,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct IndexLabels {
    kind: String,
}

impl IndexMetrics {
    pub fn register(prom: &mut Registry) -> Self {
        let metrics = Self::default();

        prom.register(
            "index_size",
            "Gauge of the number of resources in the index",
            metrics.index_size.clone(),
        );
        prom.register(
            "index_applies",
            "Count of applies to the index",
            metrics.index_applies.clone(),
        );
        prom.register(
            "index_deletes",
            "Count of deletes to the index",
            metrics.index_deletes.clone(),
        );
        prom.register(
            "enqueues",
            "Count of policies enqueued by changes to a resource kind",
            metrics.enqueues.clone(),
        );

        metrics
    }

    pub(crate) fn applied(&self, kind: &str, size: usize) {
        let labels = IndexLabels {
            kind: kind.to_string(),
        };
        self.index_applies.get_or_create(&labels).inc();
        self.index_size.get_or_create(&labels).set(size as i64);
    }

    pub(crate) fn deleted(&self, kind: &str, size: usize) {
        let labels = IndexLabels {
            kind: kind.to_string(),
        };
        self.index_deletes.get_or_create(&labels).inc();
        self.index_size.get_or_create(&labels).set(size as i64);
    }

    pub(crate) fn enqueued(&self, kind: &str) {
        self.enqueues
            .get_or_create(&IndexLabels {
                kind: kind.to_string(),
            })
            .inc();
    }
}
