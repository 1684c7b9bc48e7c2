//! Operation instrumentation.
//!
//! Every wrapped call opens a child span of the ambient context, counts the
//! call and observes its duration under the same labels, optionally samples
//! its memory growth, and returns the operation's result unchanged. The five
//! operation categories differ only in span naming and in which metric
//! families they write.

pub mod category;
pub mod labels;

mod invocation;
mod operation;

use std::fmt::{self, Display};
use std::future::Future;
use std::sync::Arc;

use opentelemetry::KeyValue;

pub use category::{OperationCategory, OperationDescriptor, UNKNOWN};
pub use labels::{normalize_path, CallLabels};
pub use operation::{Blocking, Instrumented, Suspending};

pub(crate) use invocation::isolate;

use crate::memory::MemorySampler;
use crate::metrics::MetricRegistry;
use crate::trace::TraceBridge;
use invocation::{execute, execute_blocking, OperationCore};

/// Factory for instrumented operations sharing one registry, trace bridge and
/// memory sampler.
#[derive(Clone)]
pub struct Instrumentation {
    registry: Arc<MetricRegistry>,
    bridge: Arc<dyn TraceBridge>,
    sampler: MemorySampler,
    app_name: Arc<str>,
}

impl fmt::Debug for Instrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumentation")
            .field("app_name", &self.app_name)
            .field("sampler", &self.sampler)
            .finish_non_exhaustive()
    }
}

impl Instrumentation {
    pub fn new(
        registry: Arc<MetricRegistry>,
        bridge: Arc<dyn TraceBridge>,
        sampler: MemorySampler,
        app_name: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            registry,
            bridge,
            sampler,
            app_name: app_name.into(),
        }
    }

    pub fn registry(&self) -> &Arc<MetricRegistry> {
        &self.registry
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn business(&self, operation: impl Into<String>) -> OperationBuilder {
        self.operation(OperationDescriptor::new(OperationCategory::Business, operation))
    }

    /// `method` names the operation and becomes the upper-cased `method` label.
    pub fn http_client(&self, method: impl Into<String>) -> OperationBuilder {
        self.operation(OperationDescriptor::new(OperationCategory::HttpClient, method))
    }

    pub fn queue_producer(&self, operation: impl Into<String>) -> OperationBuilder {
        self.operation(OperationDescriptor::new(OperationCategory::QueueProducer, operation))
    }

    /// `handler` names the operation and fills the `handler` label.
    pub fn queue_consumer(&self, handler: impl Into<String>) -> OperationBuilder {
        self.operation(OperationDescriptor::new(OperationCategory::QueueConsumer, handler))
    }

    pub fn http_server(&self, operation: impl Into<String>) -> OperationBuilder {
        self.operation(OperationDescriptor::new(OperationCategory::HttpServer, operation))
    }

    pub fn operation(&self, descriptor: OperationDescriptor) -> OperationBuilder {
        OperationBuilder {
            instrumentation: self.clone(),
            descriptor,
            base: CallLabels::new(),
        }
    }
}

/// Static configuration of one operation, turned into a wrapper with
/// [`wrap`](Self::wrap) / [`wrap_blocking`](Self::wrap_blocking) or run
/// once with [`run`](Self::run) / [`run_blocking`](Self::run_blocking).
#[derive(Debug)]
#[must_use]
pub struct OperationBuilder {
    instrumentation: Instrumentation,
    descriptor: OperationDescriptor,
    base: CallLabels,
}

impl OperationBuilder {
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.descriptor.labels.insert(key.into(), value.into());
        self
    }

    pub fn attribute(mut self, attribute: KeyValue) -> Self {
        self.base.attribute(attribute);
        self
    }

    /// Static topic; per-call topics go through [`Instrumented::with_topic`].
    pub fn topic(mut self, topic: &str) -> Self {
        self.base.apply_topic(self.descriptor.category, topic);
        self
    }

    /// Static URL; per-call URLs go through [`Instrumented::with_url`].
    pub fn url(mut self, url: &str) -> Self {
        self.base.apply_url(url);
        self
    }

    pub fn wrap<A, T, F>(self, operation: F) -> Instrumented<A, T, F, Suspending> {
        Instrumented::new(self.into_core(), operation)
    }

    pub fn wrap_blocking<A, T, F>(self, operation: F) -> Instrumented<A, T, F, Blocking> {
        Instrumented::new(self.into_core(), operation)
    }

    /// Instruments a single future.
    ///
    /// # Errors
    ///
    /// Returns the future's own error, unchanged.
    pub async fn run<T, E, Fut>(self, future: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let core = self.into_core();
        execute(&core, CallLabels::new(), None, || future).await
    }

    /// Instruments a single synchronous call.
    ///
    /// # Errors
    ///
    /// Returns the closure's own error, unchanged.
    pub fn run_blocking<T, E, F>(self, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: Display,
    {
        let core = self.into_core();
        execute_blocking(&core, CallLabels::new(), None, operation)
    }

    fn into_core(self) -> Arc<OperationCore> {
        let Self {
            instrumentation,
            descriptor,
            base,
        } = self;
        let category = descriptor.category;
        isolate("register metrics", || {
            category.policy().register(&instrumentation.registry)?;
            Ok(())
        });

        let mut labels = CallLabels::new();
        labels.metric = descriptor.metric_labels();
        labels.attribute(KeyValue::new("app.name", instrumentation.app_name.to_string()));
        match category {
            OperationCategory::HttpClient => {
                labels.attribute(KeyValue::new("http.method", descriptor.name.to_uppercase()));
            }
            OperationCategory::QueueProducer | OperationCategory::QueueConsumer => {
                labels.attribute(KeyValue::new("messaging.system", "kafka"));
                labels.attribute(KeyValue::new("messaging.operation", descriptor.name.clone()));
            }
            OperationCategory::Business | OperationCategory::HttpServer => {
                labels.attribute(KeyValue::new("operation.name", descriptor.name.clone()));
            }
        }
        if let Some(topic) = descriptor.labels.get("topic") {
            labels.apply_topic(category, topic);
        }
        labels.merge(base);

        Arc::new(OperationCore {
            descriptor,
            base: labels,
            registry: instrumentation.registry,
            bridge: instrumentation.bridge,
            sampler: instrumentation.sampler,
            app_name: instrumentation.app_name,
        })
    }
}
