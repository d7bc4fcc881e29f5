use opentelemetry::metrics::{Counter, Meter};

/// OTel instruments for the dispatch engine. Instruments are cheap handles,
/// so clones share the same underlying series.
#[derive(Clone)]
pub struct Metrics {
    pub messages_scheduled: Counter<u64>,
    pub messages_emitted: Counter<u64>,
    pub messages_dropped: Counter<u64>,
    pub locks_contended: Counter<u64>,
    pub poll_cycles: Counter<u64>,
    pub poll_errors: Counter<u64>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Instruments on the global `herald` meter. They record nothing until a
    /// meter provider is installed.
    pub fn new() -> Self {
        let meter = opentelemetry::global::meter("herald");
        Self::from_meter(&meter)
    }

    /// Instruments on an explicit meter.
    pub fn from_meter(meter: &Meter) -> Self {
        Self {
            messages_scheduled: meter
                .u64_counter("herald.messages.scheduled")
                .with_description("Messages accepted for future delivery")
                .build(),
            messages_emitted: meter
                .u64_counter("herald.messages.emitted")
                .with_description("Messages emitted by this dispatcher")
                .build(),
            messages_dropped: meter
                .u64_counter("herald.messages.dropped")
                .with_description("Due index entries skipped for a missing or incomplete record")
                .build(),
            locks_contended: meter
                .u64_counter("herald.locks.contended")
                .with_description("Due messages skipped because another dispatcher holds the lock")
                .build(),
            poll_cycles: meter
                .u64_counter("herald.poll.cycles")
                .with_description("Completed poll cycles")
                .build(),
            poll_errors: meter
                .u64_counter("herald.poll.errors")
                .with_description("Poll cycles aborted by a store error")
                .build(),
        }
    }

    pub fn record_scheduled(&self) {
        self.messages_scheduled.add(1, &[]);
    }

    pub fn record_emitted(&self) {
        self.messages_emitted.add(1, &[]);
    }

    pub fn record_dropped(&self, count: u64) {
        if count > 0 {
            self.messages_dropped.add(count, &[]);
        }
    }

    pub fn record_contended(&self) {
        self.locks_contended.add(1, &[]);
    }

    pub fn record_cycle(&self) {
        self.poll_cycles.add(1, &[]);
    }

    pub fn record_poll_error(&self) {
        self.poll_errors.add(1, &[]);
    }
}

/// Counters bound to an in-memory exporter, for assertions in tests.
#[cfg(test)]
pub mod test_harness {
    use opentelemetry::metrics::MeterProvider as _;
    use opentelemetry_sdk::metrics::data::{AggregatedMetrics, MetricData, ResourceMetrics};
    use opentelemetry_sdk::metrics::in_memory_exporter::InMemoryMetricExporter;
    use opentelemetry_sdk::metrics::{PeriodicReader, SdkMeterProvider};

    use super::Metrics;

    /// Wires an in-memory exporter to a meter provider and builds `Metrics`
    /// instruments bound to it.
    pub struct MetricTestHarness {
        pub metrics: Metrics,
        pub exporter: InMemoryMetricExporter,
        pub meter_provider: SdkMeterProvider,
    }

    impl Default for MetricTestHarness {
        fn default() -> Self {
            Self::new()
        }
    }

    impl MetricTestHarness {
        pub fn new() -> Self {
            let exporter = InMemoryMetricExporter::default();
            let reader = PeriodicReader::builder(exporter.clone()).build();
            let meter_provider = SdkMeterProvider::builder().with_reader(reader).build();
            let meter = meter_provider.meter("herald-test");
            let metrics = Metrics::from_meter(&meter);
            Self {
                metrics,
                exporter,
                meter_provider,
            }
        }

        /// Current value of a u64 counter, after forcing an export.
        pub fn counter(&self, metric_name: &str) -> Option<u64> {
            self.meter_provider.force_flush().expect("flush failed");
            let metrics = self
                .exporter
                .get_finished_metrics()
                .expect("failed to get finished metrics");
            counter_value_u64(&metrics, metric_name)
        }

        pub fn assert_counter(&self, metric_name: &str, expected: u64) {
            let value = self.counter(metric_name);
            assert_eq!(
                value,
                Some(expected),
                "expected counter {metric_name} = {expected}, got {value:?}"
            );
        }
    }

    /// Latest exported value of a u64 counter.
    fn counter_value_u64(resource_metrics: &[ResourceMetrics], name: &str) -> Option<u64> {
        let mut latest = None;
        for rm in resource_metrics {
            for sm in rm.scope_metrics() {
                for metric in sm.metrics() {
                    if metric.name() == name {
                        if let AggregatedMetrics::U64(MetricData::Sum(sum)) = metric.data() {
                            if let Some(dp) = sum.data_points().next() {
                                latest = Some(dp.value());
                            }
                        }
                    }
                }
            }
        }
        latest
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn counters_accumulate() {
            let h = MetricTestHarness::new();
            h.metrics.record_scheduled();
            h.metrics.record_scheduled();
            h.metrics.record_emitted();
            h.assert_counter("herald.messages.scheduled", 2);
            h.assert_counter("herald.messages.emitted", 1);
        }

        #[test]
        fn dropped_ignores_zero() {
            let h = MetricTestHarness::new();
            h.metrics.record_dropped(0);
            assert_eq!(h.counter("herald.messages.dropped"), None);
            h.metrics.record_dropped(3);
            h.assert_counter("herald.messages.dropped", 3);
        }
    }
}
