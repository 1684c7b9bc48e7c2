//! Operation instrumentation tests
//!
//! These tests verify that:
//! 1. Every call is counted once and observed once, whatever its outcome
//! 2. Failures close the span with an error status and return the error unchanged
//! 3. Memory is sampled only when the sampler is active
//! 4. Nested operations form one trace and logs inside them carry its ids
//! 5. Cancellation, panics and broken instrumentation are accounted for

use std::convert::Infallible;
use std::fmt;
use std::io::{self, Write};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use logger_redacted::{EcsLayer, LogSink, LoggerConfig, MaskingEngine};
use opentelemetry::trace::{SpanKind, Status, TracerProvider as _};
use opentelemetry::{Context, KeyValue, Value};
use opentelemetry_sdk::export::trace::SpanData;
use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
use opentelemetry_sdk::trace::TracerProvider;
use parking_lot::Mutex;
use telemetry::{
    Instrumentation, MemoryProbe, MemorySampler, MetricRegistry, OtelTraceBridge, TelemetryError, TraceBridge,
};
use tracing_subscriber::layer::SubscriberExt;

const APP: &str = "checkout-svc";

#[derive(Debug, Clone, PartialEq)]
struct ValueError(String);

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reports a footprint that moves by `step` bytes on every reading.
struct SteppingProbe {
    next: AtomicI64,
    step: i64,
}

impl MemoryProbe for SteppingProbe {
    fn current_bytes(&self) -> Option<u64> {
        u64::try_from(self.next.fetch_add(self.step, Ordering::Relaxed)).ok()
    }
}

fn stepping_sampler(step: i64) -> MemorySampler {
    MemorySampler::new(
        true,
        1.0,
        Arc::new(SteppingProbe {
            next: AtomicI64::new(1 << 30),
            step,
        }),
    )
}

struct Harness {
    exporter: InMemorySpanExporter,
    _provider: TracerProvider,
    registry: Arc<MetricRegistry>,
    instrumentation: Instrumentation,
}

impl Harness {
    fn new(sampler: MemorySampler) -> Self {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder().with_simple_exporter(exporter.clone()).build();
        let bridge: Arc<dyn TraceBridge> = Arc::new(OtelTraceBridge::new(provider.tracer("instrumentation-tests")));
        Self::with_bridge(exporter, provider, bridge, sampler)
    }

    fn with_bridge(
        exporter: InMemorySpanExporter,
        provider: TracerProvider,
        bridge: Arc<dyn TraceBridge>,
        sampler: MemorySampler,
    ) -> Self {
        let registry = Arc::new(MetricRegistry::new());
        let instrumentation = Instrumentation::new(Arc::clone(&registry), bridge, sampler, APP);
        Self {
            exporter,
            _provider: provider,
            registry,
            instrumentation,
        }
    }

    fn spans(&self) -> Vec<SpanData> {
        self.exporter.get_finished_spans().unwrap()
    }

    fn count(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.registry.counter(name, labels).unwrap().get()
    }

    fn observations(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.registry.histogram(name, labels).unwrap().count()
    }
}

fn attribute(span: &SpanData, key: &str) -> Option<Value> {
    span.attributes
        .iter()
        .find(|kv| kv.key.as_str() == key)
        .map(|kv| kv.value.clone())
}

#[test]
fn test_counts_and_durations_pair_per_outcome() {
    let h = Harness::new(MemorySampler::disabled());
    let validate = h.instrumentation.business("validate_cart").wrap_blocking(|items: i32| {
        if items < 0 {
            Err(ValueError("negative quantity".to_string()))
        } else {
            Ok(items)
        }
    });

    for items in [1, 2, 3] {
        assert_eq!(validate.call(items), Ok(items));
    }
    for _ in 0..2 {
        assert!(validate.call(-1).is_err());
    }

    let success = [("operation", "validate_cart"), ("app_name", APP), ("status", "success")];
    let error = [("operation", "validate_cart"), ("app_name", APP), ("status", "error")];
    assert_eq!(h.count("business_operations_total", &success), 3);
    assert_eq!(h.count("business_operations_total", &error), 2);
    assert_eq!(h.observations("business_operations_duration_seconds", &success), 3);
    assert_eq!(h.observations("business_operations_duration_seconds", &error), 2);

    let spans = h.spans();
    assert_eq!(spans.len(), 5);
    assert!(spans.iter().all(|span| span.name == "business.validate_cart"));
    assert!(spans.iter().all(|span| span.span_kind == SpanKind::Internal));
}

#[tokio::test]
async fn test_async_error_closes_span_and_returns_error() {
    let h = Harness::new(MemorySampler::disabled());
    let handler = h
        .instrumentation
        .queue_consumer("handle_order")
        .label("topic", "orders")
        .wrap(|payload: String| async move {
            if payload.is_empty() {
                Ok(())
            } else {
                Err(ValueError("x".to_string()))
            }
        });

    let result = handler.call("{\"id\":1}".to_string()).await;
    assert_eq!(result, Err(ValueError("x".to_string())));

    let spans = h.spans();
    assert_eq!(spans.len(), 1);
    let span = &spans[0];
    assert_eq!(span.name, "kafka.consumer.handle_order");
    assert_eq!(span.status, Status::error("x"));
    let exception = span
        .events
        .events
        .iter()
        .find(|event| event.name == "exception")
        .expect("exception event");
    assert!(exception
        .attributes
        .contains(&KeyValue::new("exception.type", "ValueError")));
    assert!(exception.attributes.contains(&KeyValue::new("exception.message", "x")));
    assert_eq!(attribute(span, "messaging.source"), Some(Value::from("orders")));

    assert_eq!(
        h.count(
            "kafka_consumer_errors_total",
            &[("topic", "orders"), ("error_type", "ValueError"), ("app_name", APP)]
        ),
        1
    );
    assert_eq!(
        h.observations(
            "kafka_message_processing_duration_seconds",
            &[("topic", "orders"), ("handler", "handle_order"), ("app_name", APP), ("status", "error")]
        ),
        1
    );
}

#[tokio::test]
async fn test_memory_growth_is_observed_when_sampled() {
    let h = Harness::new(stepping_sampler(4_096));
    h.instrumentation
        .business("build_report")
        .run(async { Ok::<_, Infallible>(()) })
        .await
        .unwrap();

    assert_eq!(
        h.count(
            "business_operations_memory_samples_total",
            &[("operation", "build_report"), ("app_name", APP)]
        ),
        1
    );
    assert_eq!(
        h.observations(
            "business_operations_memory_bytes",
            &[("operation", "build_report"), ("app_name", APP), ("status", "success")]
        ),
        1
    );

    let span = &h.spans()[0];
    assert_eq!(attribute(span, "memory.sampling.enabled"), Some(Value::Bool(true)));
    assert_eq!(attribute(span, "memory.delta_bytes"), Some(Value::I64(4_096)));
    assert_eq!(attribute(span, "memory.delta_ignored"), Some(Value::Bool(false)));
}

#[test]
fn test_shrinking_memory_is_counted_but_not_observed() {
    let h = Harness::new(stepping_sampler(-1_024));
    h.instrumentation
        .business("compact")
        .run_blocking(|| Ok::<_, Infallible>(()))
        .unwrap();

    assert_eq!(
        h.count(
            "business_operations_memory_samples_total",
            &[("operation", "compact"), ("app_name", APP)]
        ),
        1
    );
    assert_eq!(
        h.observations(
            "business_operations_memory_bytes",
            &[("operation", "compact"), ("app_name", APP), ("status", "success")]
        ),
        0
    );
    let span = &h.spans()[0];
    assert_eq!(attribute(span, "memory.delta_ignored"), Some(Value::Bool(true)));
}

#[test]
fn test_memory_untouched_when_sampling_inactive() {
    let h = Harness::new(MemorySampler::new(true, 0.0, Arc::new(SteppingProbe {
        next: AtomicI64::new(0),
        step: 4_096,
    })));
    h.instrumentation
        .business("noop")
        .run_blocking(|| Ok::<_, Infallible>(()))
        .unwrap();

    assert_eq!(
        h.count(
            "business_operations_memory_samples_total",
            &[("operation", "noop"), ("app_name", APP)]
        ),
        0
    );
    let span = &h.spans()[0];
    assert_eq!(attribute(span, "memory.sampling.enabled"), Some(Value::Bool(false)));
    assert_eq!(attribute(span, "memory.delta_bytes"), None);
}

#[tokio::test]
async fn test_nested_operations_share_one_trace() {
    let h = Harness::new(MemorySampler::disabled());
    let instrumentation = h.instrumentation.clone();
    h.instrumentation
        .business("checkout")
        .run(async move {
            instrumentation
                .http_client("get")
                .url("https://inventory.internal/items/7")
                .run(async { Ok::<_, Infallible>(()) })
                .await
        })
        .await
        .unwrap();

    let spans = h.spans();
    assert_eq!(spans.len(), 2);
    let (inner, outer) = (&spans[0], &spans[1]);
    assert_eq!(inner.name, "http.client.get");
    assert_eq!(outer.name, "business.checkout");
    assert_eq!(inner.parent_span_id, outer.span_context.span_id());
    assert_eq!(inner.span_context.trace_id(), outer.span_context.trace_id());
    assert_eq!(inner.span_kind, SpanKind::Client);
}

struct Request {
    url: String,
}

struct Response {
    status: u16,
}

#[tokio::test]
async fn test_http_client_labels_from_url_and_response() {
    let h = Harness::new(MemorySampler::disabled());
    let fetch = h
        .instrumentation
        .http_client("get")
        .wrap(|request: Request| async move {
            if request.url.contains("broken") {
                Err(ValueError("connection reset".to_string()))
            } else {
                Ok(Response { status: 200 })
            }
        })
        .with_url(|request: &Request| Some(request.url.clone()))
        .with_status_code(|response: &Response| response.status);

    let response = fetch
        .call(Request {
            url: "https://api.example.com/users/42?expand=orders".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(response.status, 200);
    assert!(fetch
        .call(Request {
            url: "https://api.example.com/broken/9".to_string(),
        })
        .await
        .is_err());

    assert_eq!(
        h.count(
            "http_outgoing_requests_total",
            &[
                ("method", "GET"),
                ("status_code", "200"),
                ("url_host", "api.example.com"),
                ("url_path", "/users/{id}"),
                ("app_name", APP),
                ("status", "success"),
            ]
        ),
        1
    );
    assert_eq!(
        h.count(
            "http_outgoing_requests_total",
            &[
                ("method", "GET"),
                ("status_code", "exception"),
                ("url_host", "api.example.com"),
                ("url_path", "/broken/{id}"),
                ("app_name", APP),
                ("status", "error"),
            ]
        ),
        1
    );
    assert_eq!(
        h.count(
            "http_outgoing_requests_errors_total",
            &[
                ("method", "GET"),
                ("url_host", "api.example.com"),
                ("url_path", "/broken/{id}"),
                ("error_type", "ValueError"),
                ("app_name", APP),
            ]
        ),
        1
    );
    let span = &h.spans()[0];
    assert_eq!(attribute(span, "http.method"), Some(Value::from("GET")));
    assert_eq!(attribute(span, "http.status_code"), Some(Value::from("200")));
}

#[tokio::test]
async fn test_missing_topic_resolves_to_unknown() {
    let h = Harness::new(MemorySampler::disabled());
    let publish = h
        .instrumentation
        .queue_producer("publish")
        .wrap(|_: Option<String>| async { Ok::<_, Infallible>(()) })
        .with_topic(|topic: &Option<String>| topic.clone());

    publish.call(None).await.unwrap();
    assert_eq!(
        h.count(
            "kafka_messages_produced_total",
            &[("topic", "unknown"), ("app_name", APP), ("status", "success")]
        ),
        1
    );
}

#[tokio::test]
async fn test_dropped_future_is_recorded_as_cancelled() {
    let h = Harness::new(MemorySampler::disabled());
    let publish = h
        .instrumentation
        .queue_producer("publish")
        .label("topic", "payments")
        .wrap(|()| std::future::pending::<Result<(), Infallible>>());

    let timed_out = tokio::time::timeout(Duration::from_millis(20), publish.call(())).await;
    assert!(timed_out.is_err());

    assert_eq!(
        h.count(
            "kafka_producer_errors_total",
            &[("topic", "payments"), ("error_type", "Cancelled"), ("app_name", APP)]
        ),
        1
    );
    assert_eq!(
        h.observations(
            "kafka_producer_duration_seconds",
            &[("topic", "payments"), ("app_name", APP), ("status", "error")]
        ),
        1
    );
    let spans = h.spans();
    assert_eq!(spans.len(), 1);
    assert_eq!(spans[0].status, Status::error("operation cancelled"));
}

#[test]
fn test_panic_is_recorded_and_propagates() {
    let h = Harness::new(MemorySampler::disabled());
    let explode = h
        .instrumentation
        .queue_producer("publish")
        .label("topic", "audit")
        .wrap_blocking(|()| -> Result<(), ValueError> { panic!("serializer exploded") });

    let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| explode.call(())));
    assert!(outcome.is_err());

    assert_eq!(
        h.count(
            "kafka_producer_errors_total",
            &[("topic", "audit"), ("error_type", "Panic"), ("app_name", APP)]
        ),
        1
    );
    assert_eq!(h.spans().len(), 1);
}

struct FailingBridge;

impl TraceBridge for FailingBridge {
    fn start_span(
        &self,
        _parent: &Context,
        _name: String,
        _kind: SpanKind,
        _attributes: Vec<KeyValue>,
    ) -> Result<Context, TelemetryError> {
        Err(TelemetryError::Tracing("collector unavailable".to_string()))
    }
}

#[test]
fn test_broken_instrumentation_never_changes_the_result() {
    let exporter = InMemorySpanExporter::default();
    let provider = TracerProvider::builder().build();
    let h = Harness::with_bridge(exporter, provider, Arc::new(FailingBridge), MemorySampler::disabled());
    h.registry.gauge("business_operations_total", &[]).unwrap().set(1.0);

    let result = h
        .instrumentation
        .business("settle")
        .run_blocking(|| Err::<(), _>(ValueError("ledger closed".to_string())));
    assert_eq!(result, Err(ValueError("ledger closed".to_string())));

    let ok = h.instrumentation.business("settle").run_blocking(|| Ok::<_, ValueError>(7));
    assert_eq!(ok, Ok(7));
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[test]
fn test_logs_inside_operation_carry_its_trace() {
    let h = Harness::new(MemorySampler::disabled());
    let buffer = SharedBuffer::default();
    let sink = Arc::new(LogSink::new(
        &LoggerConfig::default(),
        Arc::new(MaskingEngine::default()),
        buffer.clone(),
    ));
    let subscriber = tracing_subscriber::registry().with(EcsLayer::new(sink));

    tracing::subscriber::with_default(subscriber, || {
        h.instrumentation
            .business("charge_card")
            .run_blocking(|| {
                tracing::info!(customer = "maria@example.com", "charging card 4111 1111 1111 1234");
                Ok::<_, Infallible>(())
            })
            .unwrap();
    });

    let output = String::from_utf8(buffer.0.lock().clone()).unwrap();
    let record: serde_json::Value = serde_json::from_str(output.lines().next().unwrap()).unwrap();
    let span = &h.spans()[0];

    assert_eq!(record["trace_id"], span.span_context.trace_id().to_string());
    assert_eq!(record["span_id"], span.span_context.span_id().to_string());
    assert_eq!(record["message"], "charging card 4111-XXXX-XXXX-1234");
    assert_eq!(record["labels"]["customer"], "mar***@example.com");
}
