use opentelemetry::trace::TraceContextExt;
use opentelemetry::Context;

/// Trace and span identifiers in their W3C hex form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationIds {
    pub trace_id: String,
    pub span_id: String,
}

impl CorrelationIds {
    /// Identifiers of the span carried by `cx`, if it is valid.
    pub fn from_context(cx: &Context) -> Option<Self> {
        let span = cx.span();
        let span_context = span.span_context();
        span_context.is_valid().then(|| Self {
            trace_id: span_context.trace_id().to_string(),
            span_id: span_context.span_id().to_string(),
        })
    }

    pub fn current() -> Option<Self> {
        Self::from_context(&Context::current())
    }
}

/// Where the sink looks up the ambient trace identifiers.
pub trait CorrelationSource: Send + Sync {
    fn correlation_ids(&self) -> Option<CorrelationIds>;
}

/// Reads the OpenTelemetry context attached to the current thread or task.
#[derive(Debug, Default, Clone, Copy)]
pub struct AmbientCorrelation;

impl CorrelationSource for AmbientCorrelation {
    fn correlation_ids(&self) -> Option<CorrelationIds> {
        CorrelationIds::current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::trace::{SpanContext, SpanId, TraceFlags, TraceId, TraceState};

    #[test]
    fn test_no_ids_without_span() {
        assert_eq!(CorrelationIds::from_context(&Context::new()), None);
    }

    #[test]
    fn test_ids_from_remote_span() {
        let span_context = SpanContext::new(
            TraceId::from_hex("4bf92f3577b34da6a3ce929d0e0e4736").unwrap(),
            SpanId::from_hex("00f067aa0ba902b7").unwrap(),
            TraceFlags::SAMPLED,
            true,
            TraceState::default(),
        );
        let cx = Context::new().with_remote_span_context(span_context);
        let _guard = cx.attach();

        let ids = AmbientCorrelation.correlation_ids().unwrap();
        assert_eq!(ids.trace_id, "4bf92f3577b34da6a3ce929d0e0e4736");
        assert_eq!(ids.span_id, "00f067aa0ba902b7");
    }
}
