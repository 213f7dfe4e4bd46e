use prometheus_client::{
    encoding::{EncodeLabelSet, EncodeLabelValue},
    metrics::{counter::Counter, family::Family},
    registry::Registry,
};

#[derive(Clone, Debug, Default)]
pub struct AdmissionMetrics {
    reviews: Family<Labels, Counter>,
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    /// The sidecar was injected.
    Injected,
    /// The pod does not ask for injection.
    Skipped,
    Denied,
    Errored,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
struct Labels {
    outcome: Outcome,
}

// === impl AdmissionMetrics ===

impl AdmissionMetrics {
    pub fn register(reg: &mut Registry) -> Self {
        let reviews = Family::<Labels, Counter>::default();
        reg.register(
            "reviews",
            "Total number of pod admission reviews by outcome",
            reviews.clone(),
        );
        Self { reviews }
    }

    pub fn observe(&self, outcome: Outcome) {
        self.reviews.get_or_create(&Labels { outcome }).inc();
    }

    #[cfg(test)]
    pub(crate) fn count(&self, outcome: Outcome) -> u64 {
        self.reviews.get_or_create(&Labels { outcome }).get()
    }
}
