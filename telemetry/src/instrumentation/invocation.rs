use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashSet;
use lazy_static::lazy_static;
use logger_redacted::short_type_name;
use opentelemetry::trace::{FutureExt as _, Status, TraceContextExt};
use opentelemetry::{Context, KeyValue};

use super::category::{LabelContext, OperationCategory, OperationDescriptor, UNKNOWN};
use super::labels::CallLabels;
use crate::error::{Result, TelemetryError};
use crate::memory::{MemorySample, MemorySampler, MemoryScope};
use crate::metrics::{Exemplar, MetricRegistry};
use crate::trace::{trace_id_of, TraceBridge};

const SUCCESS: &str = "success";
const ERROR: &str = "error";
const EXCEPTION_STATUS_CODE: &str = "exception";

/// Everything an invocation needs that does not change between calls.
pub(crate) struct OperationCore {
    pub(crate) descriptor: OperationDescriptor,
    pub(crate) base: CallLabels,
    pub(crate) registry: Arc<MetricRegistry>,
    pub(crate) bridge: Arc<dyn TraceBridge>,
    pub(crate) sampler: MemorySampler,
    pub(crate) app_name: Arc<str>,
}

lazy_static! {
    static ref FAILED_STEPS: DashSet<&'static str> = DashSet::new();
}

/// True only for the first failure of `step` in this process.
fn first_failure(step: &'static str) -> bool {
    FAILED_STEPS.insert(step)
}

/// Runs one instrumentation step. Errors and panics are swallowed so they
/// never reach the wrapped operation's caller; each step is logged at debug
/// the first time it fails.
pub(crate) fn isolate<T>(step: &'static str, f: impl FnOnce() -> Result<T>) -> Option<T> {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Some(value),
        Ok(Err(err)) => {
            if first_failure(step) {
                tracing::debug!(step, error = %err, "instrumentation step failed");
            }
            None
        }
        Err(_) => {
            if first_failure(step) {
                tracing::debug!(step, "instrumentation step panicked");
            }
            None
        }
    }
}

enum Outcome {
    Success {
        status_code: Option<String>,
    },
    Failure {
        message: String,
        error_type: &'static str,
        status_code: Option<String>,
    },
}

impl Outcome {
    fn status(&self) -> &'static str {
        match self {
            Self::Success { .. } => SUCCESS,
            Self::Failure { .. } => ERROR,
        }
    }

    fn status_code(&self) -> Option<&str> {
        match self {
            Self::Success { status_code } | Self::Failure { status_code, .. } => status_code.as_deref(),
        }
    }
}

/// One in-flight call. Completing it records metrics and closes the span; if
/// it is dropped first (cancellation or a panic unwinding through the call)
/// the drop records the call as failed.
pub(crate) struct Invocation {
    core: Arc<OperationCore>,
    labels: BTreeMap<String, String>,
    span: Option<Context>,
    cx: Context,
    memory: MemoryScope,
    sampled: bool,
    started: Instant,
    done: bool,
}

impl Invocation {
    pub(crate) fn begin(core: Arc<OperationCore>, call: CallLabels) -> Self {
        let started = Instant::now();
        let mut resolved = core.base.clone();
        resolved.merge(call);
        let CallLabels { metric, span: mut attributes } = resolved;

        let sampled = core.sampler.should_sample();
        attributes.push(KeyValue::new("memory.sampling.enabled", sampled));

        let parent = Context::current();
        let span = isolate("open span", || {
            core.bridge.start_span(
                &parent,
                core.descriptor.span_name(),
                core.descriptor.category.span_kind(),
                attributes,
            )
        });
        let cx = span.clone().unwrap_or(parent);

        Self {
            memory: core.sampler.scope(sampled),
            core,
            labels: metric,
            span,
            cx,
            sampled,
            started,
            done: false,
        }
    }

    /// Context the operation runs under: the new span, or the caller's
    /// context when no span could be opened.
    pub(crate) fn context(&self) -> &Context {
        &self.cx
    }

    pub(crate) fn start_memory(&mut self) {
        self.memory.start();
    }

    pub(crate) fn stop_memory(&mut self) {
        self.memory.stop();
    }

    pub(crate) fn finish<T, E: Display>(mut self, result: &std::result::Result<T, E>, status_code: Option<String>) {
        let outcome = match result {
            Ok(_) => Outcome::Success { status_code },
            Err(err) => Outcome::Failure {
                message: err.to_string(),
                error_type: short_type_name::<E>(),
                status_code: Some(EXCEPTION_STATUS_CODE.to_string()),
            },
        };
        self.complete(&outcome);
    }

    fn complete(&mut self, outcome: &Outcome) {
        if self.done {
            return;
        }
        self.done = true;
        self.memory.stop();
        let elapsed = self.started.elapsed().as_secs_f64();
        let sample = self.memory.sample();

        isolate("set span status", || {
            self.set_status(outcome);
            Ok(())
        });
        isolate("record metrics", || self.record_metrics(outcome, elapsed));
        if self.sampled {
            isolate("record memory", || self.record_memory(outcome, sample));
        }
        isolate("close span", || {
            self.close_span(sample);
            Ok(())
        });
    }

    fn set_status(&self, outcome: &Outcome) {
        let Some(cx) = &self.span else {
            return;
        };
        let span = cx.span();
        match outcome {
            Outcome::Success { status_code } => {
                if let (OperationCategory::HttpClient, Some(code)) = (self.core.descriptor.category, status_code) {
                    span.set_attribute(KeyValue::new("http.status_code", code.clone()));
                }
                span.set_status(Status::Ok);
            }
            Outcome::Failure { message, error_type, .. } => {
                span.add_event(
                    "exception",
                    vec![
                        KeyValue::new("exception.type", *error_type),
                        KeyValue::new("exception.message", message.clone()),
                    ],
                );
                span.set_status(Status::error(message.clone()));
            }
        }
    }

    fn label_context<'a>(&'a self, outcome: &'a Outcome) -> LabelContext<'a> {
        LabelContext {
            labels: &self.labels,
            app_name: &self.core.app_name,
            status: outcome.status(),
            error_type: match outcome {
                Outcome::Failure { error_type, .. } => Some(*error_type),
                Outcome::Success { .. } => None,
            },
            status_code: outcome.status_code(),
        }
    }

    fn record_metrics(&self, outcome: &Outcome, elapsed: f64) -> Result<()> {
        let policy = self.core.descriptor.category.policy();
        let registry = &self.core.registry;
        let cx = self.label_context(outcome);

        let total = registry.counter(policy.total.name, &policy.total.resolve(&cx))?;
        let duration = registry.histogram(policy.duration.name, &policy.duration.resolve(&cx))?;
        total.inc();
        match self.span.as_ref().and_then(trace_id_of) {
            Some(trace_id) => duration.observe_with_exemplar(elapsed, Exemplar::for_trace(trace_id, elapsed)),
            None => duration.observe(elapsed),
        }

        if let (Outcome::Failure { .. }, Some(errors)) = (outcome, &policy.errors) {
            registry.counter(errors.name, &errors.resolve(&cx))?.inc();
        }
        Ok(())
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_memory(&self, outcome: &Outcome, sample: MemorySample) -> Result<()> {
        let policy = self.core.descriptor.category.policy();
        let registry = &self.core.registry;
        let cx = self.label_context(outcome);

        registry
            .counter(policy.memory_samples.name, &policy.memory_samples.resolve(&cx))?
            .inc();
        if let Some(growth) = sample.growth() {
            registry
                .histogram(policy.memory_bytes.name, &policy.memory_bytes.resolve(&cx))?
                .observe(growth as f64);
        }
        Ok(())
    }

    fn close_span(&self, sample: MemorySample) {
        let Some(cx) = &self.span else {
            return;
        };
        let span = cx.span();
        if self.sampled {
            match sample.delta() {
                Some(delta) if delta > 0 => {
                    span.set_attribute(KeyValue::new("memory.sampled", true));
                    span.set_attribute(KeyValue::new("memory.delta_bytes", delta));
                    span.set_attribute(KeyValue::new("memory.delta_ignored", false));
                    span.set_attribute(KeyValue::new("memory.delta_available", true));
                }
                Some(delta) => {
                    span.set_attribute(KeyValue::new("memory.sampled", true));
                    span.set_attribute(KeyValue::new("memory.delta_bytes", delta));
                    span.set_attribute(KeyValue::new("memory.delta_ignored", true));
                    span.set_attribute(KeyValue::new("memory.delta_available", true));
                }
                None => {
                    span.set_attribute(KeyValue::new("memory.sampled", true));
                    span.set_attribute(KeyValue::new("memory.delta_available", false));
                }
            }
        }
        span.end();
    }
}

impl Drop for Invocation {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let (message, error_type) = if std::thread::panicking() {
            ("operation panicked", "Panic")
        } else {
            ("operation cancelled", "Cancelled")
        };
        self.complete(&Outcome::Failure {
            message: message.to_string(),
            error_type,
            status_code: Some(EXCEPTION_STATUS_CODE.to_string()),
        });
    }
}

/// Status code reported by an inspector, or `"unknown"` without one.
fn inspect<T>(output: &T, inspector: Option<&StatusInspector<T>>) -> Option<String> {
    let Some(inspector) = inspector else {
        return Some(UNKNOWN.to_string());
    };
    isolate("inspect status code", || Ok::<_, TelemetryError>(inspector(output).to_string()))
        .or_else(|| Some(UNKNOWN.to_string()))
}

pub(crate) type StatusInspector<T> = Arc<dyn Fn(&T) -> u16 + Send + Sync>;

/// Runs a synchronous operation with its span attached to the thread.
pub(crate) fn execute_blocking<T, E, F>(
    core: &Arc<OperationCore>,
    call: CallLabels,
    inspector: Option<&StatusInspector<T>>,
    operation: F,
) -> std::result::Result<T, E>
where
    E: Display,
    F: FnOnce() -> std::result::Result<T, E>,
{
    let mut invocation = Invocation::begin(Arc::clone(core), call);
    let result = {
        let _attached = invocation.context().clone().attach();
        invocation.start_memory();
        let result = operation();
        invocation.stop_memory();
        result
    };
    let status_code = result.as_ref().ok().and_then(|output| inspect(output, inspector));
    invocation.finish(&result, status_code);
    result
}

/// Runs an asynchronous operation with its span as the context of every poll.
pub(crate) async fn execute<T, E, F, Fut>(
    core: &Arc<OperationCore>,
    call: CallLabels,
    inspector: Option<&StatusInspector<T>>,
    operation: F,
) -> std::result::Result<T, E>
where
    E: Display,
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let mut invocation = Invocation::begin(Arc::clone(core), call);
    let cx = invocation.context().clone();
    invocation.start_memory();
    let future = {
        let _attached = cx.clone().attach();
        operation()
    };
    let result = future.with_context(cx).await;
    invocation.stop_memory();
    let status_code = result.as_ref().ok().and_then(|output| inspect(output, inspector));
    invocation.finish(&result, status_code);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetricsError;

    #[test]
    fn test_isolate_swallows_errors_and_panics() {
        let failed: Option<()> = isolate("isolate test error", || {
            Err(MetricsError::InvalidName("bad name".to_string()).into())
        });
        assert!(failed.is_none());

        let panicked: Option<()> = isolate("isolate test panic", || panic!("step exploded"));
        assert!(panicked.is_none());

        assert_eq!(isolate("isolate test ok", || Ok(7)), Some(7));
    }

    #[test]
    fn test_step_failure_is_reported_once() {
        for _ in 0..3 {
            let _: Option<()> = isolate("reported once step", || {
                Err(MetricsError::InvalidName("bad name".to_string()).into())
            });
        }
        assert!(!first_failure("reported once step"));

        assert!(first_failure("fresh step"));
        assert!(!first_failure("fresh step"));
    }
}
