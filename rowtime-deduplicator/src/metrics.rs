use std::collections::HashMap;

/// Metrics helper that stamps consistent baseline labels on every metric
/// emitted by a partition.
#[derive(Debug, Clone, Default)]
pub struct MetricsHelper {
    baseline_labels: HashMap<String, String>,
}

impl MetricsHelper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a metrics helper labelled with the partition number
    pub fn with_partition(partition: u32) -> Self {
        Self::new().with_label("partition", &partition.to_string())
    }

    /// Add an additional baseline label
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.baseline_labels
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn counter(&self, name: &'static str) -> CounterHelper {
        CounterHelper {
            name,
            labels: self.baseline_labels.clone(),
        }
    }

    pub fn histogram(&self, name: &'static str) -> HistogramHelper {
        HistogramHelper {
            name,
            labels: self.baseline_labels.clone(),
        }
    }

    pub fn gauge(&self, name: &'static str) -> GaugeHelper {
        GaugeHelper {
            name,
            labels: self.baseline_labels.clone(),
        }
    }
}

fn to_label_pairs(labels: HashMap<String, String>) -> Vec<(String, String)> {
    labels.into_iter().collect()
}

/// Helper for counter metrics
pub struct CounterHelper {
    name: &'static str,
    labels: HashMap<String, String>,
}

impl CounterHelper {
    /// Add a label to this specific metric
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn increment(self, value: u64) {
        metrics::counter!(self.name, &to_label_pairs(self.labels)).increment(value);
    }
}

/// Helper for histogram metrics
pub struct HistogramHelper {
    name: &'static str,
    labels: HashMap<String, String>,
}

impl HistogramHelper {
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn record(self, value: f64) {
        metrics::histogram!(self.name, &to_label_pairs(self.labels)).record(value);
    }
}

/// Helper for gauge metrics
pub struct GaugeHelper {
    name: &'static str,
    labels: HashMap<String, String>,
}

impl GaugeHelper {
    pub fn with_label(mut self, key: &str, value: &str) -> Self {
        self.labels.insert(key.to_string(), value.to_string());
        self
    }

    pub fn set(self, value: f64) {
        metrics::gauge!(self.name, &to_label_pairs(self.labels)).set(value);
    }
}
