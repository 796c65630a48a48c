use opentelemetry::{
    KeyValue,
    metrics::Counter,
};

/// Counters for container lifecycle activity.
pub struct LifecycleMetrics {
    pub transitions: Counter<u64>,
    pub invalid_transitions: Counter<u64>,
}

impl LifecycleMetrics {
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("container_lifecycle");
        Self {
            transitions: meter
                .u64_counter("container_lifecycle.transitions")
                .with_description("Container state transitions applied")
                .build(),
            invalid_transitions: meter
                .u64_counter("container_lifecycle.invalid_transitions")
                .with_description("Events rejected because they are undefined for the current state")
                .build(),
        }
    }

    pub fn record_transition(&self, from: &str, to: &str, event: &str) {
        self.transitions.add(1, &[
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
            KeyValue::new("event", event.to_string()),
        ]);
    }

    pub fn record_invalid(&self, state: &str, event: &str) {
        self.invalid_transitions.add(1, &[
            KeyValue::new("state", state.to_string()),
            KeyValue::new("event", event.to_string()),
        ]);
    }
}

impl Default for LifecycleMetrics {
    fn default() -> Self {
        Self::new()
    }
}
