/// Prometheus metrics for webhook deliveries.
///
/// Exposed in text format on `/metrics`.
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use prometheus_client::encoding::{EncodeLabelSet, text::encode};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{Histogram, exponential_buckets};
use prometheus_client::registry::Registry;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Global metrics registry instance
pub static METRICS: Lazy<Arc<MetricsCollector>> = Lazy::new(|| Arc::new(MetricsCollector::new()));

/// Labels for delivery counters
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DeliveryLabels {
    /// Event type (e.g. "user.created"), or "unknown" before decoding
    pub event: String,
    /// "applied", "ignored" or "error"
    pub outcome: String,
}

/// Labels for error counters
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    pub event: String,
    pub error_type: String,
    /// "client_error", "conflict" or "server_error"
    pub category: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct EventLabels {
    pub event: String,
}

pub struct MetricsCollector {
    registry: RwLock<Registry>,

    /// Webhook deliveries by event type and outcome
    pub webhook_deliveries_total: Family<DeliveryLabels, Counter>,

    /// Time from receiving the body to answering, by event type
    pub webhook_delivery_duration_seconds: Family<EventLabels, Histogram>,

    /// Deliveries currently being processed
    pub webhook_in_flight: Gauge,

    /// Failed deliveries by event type, error type and fault category
    pub webhook_errors_total: Family<ErrorLabels, Counter>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let webhook_deliveries_total = Family::<DeliveryLabels, Counter>::default();
        registry.register(
            "webhook_deliveries_total",
            "Total number of webhook deliveries",
            webhook_deliveries_total.clone(),
        );

        let webhook_delivery_duration_seconds =
            Family::<EventLabels, Histogram>::new_with_constructor(|| {
                // 1ms .. ~4s
                Histogram::new(exponential_buckets(0.001, 2.5, 10))
            });
        registry.register(
            "webhook_delivery_duration_seconds",
            "Webhook processing latency in seconds",
            webhook_delivery_duration_seconds.clone(),
        );

        let webhook_in_flight = Gauge::default();
        registry.register(
            "webhook_in_flight",
            "Number of webhook deliveries currently being processed",
            webhook_in_flight.clone(),
        );

        let webhook_errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "webhook_errors_total",
            "Total number of failed webhook deliveries by error type",
            webhook_errors_total.clone(),
        );

        Self {
            registry: RwLock::new(registry),
            webhook_deliveries_total,
            webhook_delivery_duration_seconds,
            webhook_in_flight,
            webhook_errors_total,
        }
    }

    /// Encode metrics in Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        let registry = self.registry.read();
        if let Err(error) = encode(&mut buffer, &registry) {
            tracing::warn!(?error, "failed to encode metrics");
        }
        buffer
    }

    pub fn record_delivery(&self, event: &str, outcome: &str, duration: Duration) {
        self.webhook_deliveries_total
            .get_or_create(&DeliveryLabels {
                event: event.to_string(),
                outcome: outcome.to_string(),
            })
            .inc();

        self.webhook_delivery_duration_seconds
            .get_or_create(&EventLabels {
                event: event.to_string(),
            })
            .observe(duration.as_secs_f64());
    }

    pub fn record_error(&self, event: &str, error_type: &str, category: &str, duration: Duration) {
        self.record_delivery(event, "error", duration);
        self.webhook_errors_total
            .get_or_create(&ErrorLabels {
                event: event.to_string(),
                error_type: error_type.to_string(),
                category: category.to_string(),
            })
            .inc();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for one delivery.
///
/// Counts the delivery as in flight until it is resolved; a guard dropped
/// without being resolved is recorded as a server-side error of type
/// "aborted".
pub struct DeliveryMetrics {
    collector: Arc<MetricsCollector>,
    event: String,
    start: Instant,
    completed: bool,
}

impl DeliveryMetrics {
    pub fn start() -> Self {
        Self::with_collector(METRICS.clone())
    }

    pub fn with_collector(collector: Arc<MetricsCollector>) -> Self {
        collector.webhook_in_flight.inc();
        Self {
            collector,
            event: "unknown".to_string(),
            start: Instant::now(),
            completed: false,
        }
    }

    /// Set the event type label once the payload is decoded.
    pub fn set_event(&mut self, event: &str) {
        self.event = event.to_string();
    }

    pub fn success(mut self, outcome: &str) {
        self.collector
            .record_delivery(&self.event, outcome, self.start.elapsed());
        self.finish();
    }

    pub fn error(mut self, error_type: &str, category: &str) {
        self.collector
            .record_error(&self.event, error_type, category, self.start.elapsed());
        self.finish();
    }

    fn finish(&mut self) {
        self.completed = true;
        self.collector.webhook_in_flight.dec();
    }
}

impl Drop for DeliveryMetrics {
    fn drop(&mut self) {
        if !self.completed {
            self.collector.record_error(
                &self.event,
                "aborted",
                "server_error",
                self.start.elapsed(),
            );
            self.collector.webhook_in_flight.dec();
        }
    }
}
