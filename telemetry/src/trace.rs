use std::borrow::Cow;

use opentelemetry::global::{self, BoxedTracer};
use opentelemetry::trace::{SpanKind, TraceContextExt, Tracer};
use opentelemetry::{Context, KeyValue};

pub use logger_redacted::CorrelationIds;

use crate::error::Result;

/// Creates child spans under a parent context.
///
/// The returned context carries the new span; attaching it (or polling a
/// future under it) makes the span the ambient parent for nested work.
pub trait TraceBridge: Send + Sync {
    /// # Errors
    ///
    /// Implementations may fail when no span can be created; callers treat
    /// this as an instrumentation failure and carry on.
    fn start_span(&self, parent: &Context, name: String, kind: SpanKind, attributes: Vec<KeyValue>) -> Result<Context>;
}

/// [`TraceBridge`] backed by an OpenTelemetry tracer.
#[derive(Debug, Clone)]
pub struct OtelTraceBridge<T> {
    tracer: T,
}

impl<T> OtelTraceBridge<T> {
    pub fn new(tracer: T) -> Self {
        Self { tracer }
    }
}

impl OtelTraceBridge<BoxedTracer> {
    /// Uses the globally installed tracer provider.
    pub fn global(instrumentation_name: impl Into<Cow<'static, str>>) -> Self {
        Self::new(global::tracer(instrumentation_name))
    }
}

impl<T> TraceBridge for OtelTraceBridge<T>
where
    T: Tracer + Send + Sync,
    T::Span: Send + Sync + 'static,
{
    fn start_span(&self, parent: &Context, name: String, kind: SpanKind, attributes: Vec<KeyValue>) -> Result<Context> {
        let span = self
            .tracer
            .span_builder(name)
            .with_kind(kind)
            .with_attributes(attributes)
            .start_with_context(&self.tracer, parent);
        Ok(parent.with_span(span))
    }
}

/// Trace and span ids of the ambient context, if a valid span is active.
pub fn current_trace_ids() -> Option<CorrelationIds> {
    CorrelationIds::current()
}

/// Trace id of the span carried by `cx`, for exemplars.
pub fn trace_id_of(cx: &Context) -> Option<String> {
    CorrelationIds::from_context(cx).map(|ids| ids.trace_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::TracerProvider as _;
    use opentelemetry_sdk::testing::trace::InMemorySpanExporter;
    use opentelemetry_sdk::trace::TracerProvider;

    #[test]
    fn test_child_span_shares_trace_with_parent() {
        let exporter = InMemorySpanExporter::default();
        let provider = TracerProvider::builder().with_simple_exporter(exporter.clone()).build();
        let bridge = OtelTraceBridge::new(provider.tracer("trace-tests"));

        let parent = bridge
            .start_span(&Context::new(), "parent".to_string(), SpanKind::Server, Vec::new())
            .unwrap();
        let child = bridge
            .start_span(&parent, "child".to_string(), SpanKind::Internal, vec![KeyValue::new("k", "v")])
            .unwrap();

        assert_eq!(trace_id_of(&parent), trace_id_of(&child));
        assert_ne!(
            parent.span().span_context().span_id(),
            child.span().span_context().span_id()
        );

        child.span().end();
        parent.span().end();
        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].name, "child");
        assert_eq!(spans[0].parent_span_id, spans[1].span_context.span_id());
    }

    #[test]
    fn test_no_ids_outside_span() {
        assert!(current_trace_ids().is_none());
        assert!(trace_id_of(&Context::new()).is_none());
    }
}
