use std::collections::BTreeMap;
use std::fmt::{self, Display};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use super::category::OperationCategory;
use super::invocation::{execute, execute_blocking, isolate, OperationCore, StatusInspector};
use super::labels::CallLabels;

/// Strategy marker: the operation is a plain function, called synchronously.
#[derive(Debug, Clone, Copy)]
pub struct Blocking;

/// Strategy marker: the operation returns a future, awaited under the span.
#[derive(Debug, Clone, Copy)]
pub struct Suspending;

type ValueFn<A> = Arc<dyn Fn(&A) -> Option<String> + Send + Sync>;
type LabelsFn<A> = Arc<dyn Fn(&A) -> BTreeMap<String, String> + Send + Sync>;

struct Extractors<A> {
    topic: Option<ValueFn<A>>,
    message_key: Option<ValueFn<A>>,
    url: Option<ValueFn<A>>,
    labels: Option<LabelsFn<A>>,
}

impl<A> Default for Extractors<A> {
    fn default() -> Self {
        Self {
            topic: None,
            message_key: None,
            url: None,
            labels: None,
        }
    }
}

impl<A> Clone for Extractors<A> {
    fn clone(&self) -> Self {
        Self {
            topic: self.topic.clone(),
            message_key: self.message_key.clone(),
            url: self.url.clone(),
            labels: self.labels.clone(),
        }
    }
}

impl<A> Extractors<A> {
    /// Labels derived from the call's arguments. A failing extractor leaves
    /// its labels unresolved.
    fn resolve(&self, category: OperationCategory, args: &A) -> CallLabels {
        let mut call = CallLabels::new();
        if let Some(labels) = extract("extract labels", self.labels.as_ref(), args) {
            call.metric.extend(labels);
        }
        if let Some(url) = extract("extract url", self.url.as_ref(), args).flatten() {
            call.apply_url(&url);
        }
        if let Some(topic) = extract("extract topic", self.topic.as_ref(), args).flatten() {
            call.apply_topic(category, &topic);
        }
        if let Some(key) = extract("extract message key", self.message_key.as_ref(), args).flatten() {
            call.apply_message_key(&key);
        }
        call
    }
}

fn extract<A, V, G>(step: &'static str, extractor: Option<&Arc<G>>, args: &A) -> Option<V>
where
    G: Fn(&A) -> V + ?Sized,
{
    let extractor = extractor?;
    isolate(step, || Ok(extractor(args)))
}

/// An operation wrapped with span, metrics and memory instrumentation.
///
/// `call` has the operation's own signature; the result is returned
/// unchanged whatever happens to the instrumentation.
pub struct Instrumented<A, T, F, S> {
    core: Arc<OperationCore>,
    extractors: Extractors<A>,
    status_code: Option<StatusInspector<T>>,
    operation: F,
    _strategy: PhantomData<fn() -> S>,
}

impl<A, T, F, S> fmt::Debug for Instrumented<A, T, F, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instrumented")
            .field("descriptor", &self.core.descriptor)
            .finish_non_exhaustive()
    }
}

impl<A, T, F: Clone, S> Clone for Instrumented<A, T, F, S> {
    fn clone(&self) -> Self {
        Self {
            core: Arc::clone(&self.core),
            extractors: self.extractors.clone(),
            status_code: self.status_code.clone(),
            operation: self.operation.clone(),
            _strategy: PhantomData,
        }
    }
}

impl<A, T, F, S> Instrumented<A, T, F, S> {
    pub(crate) fn new(core: Arc<OperationCore>, operation: F) -> Self {
        Self {
            core,
            extractors: Extractors::default(),
            status_code: None,
            operation,
            _strategy: PhantomData,
        }
    }

    /// Topic the message is produced to or consumed from.
    #[must_use]
    pub fn with_topic(mut self, topic: impl Fn(&A) -> Option<String> + Send + Sync + 'static) -> Self {
        self.extractors.topic = Some(Arc::new(topic));
        self
    }

    #[must_use]
    pub fn with_message_key(mut self, key: impl Fn(&A) -> Option<String> + Send + Sync + 'static) -> Self {
        self.extractors.message_key = Some(Arc::new(key));
        self
    }

    /// Full URL of an outgoing request, reduced to `url_host` and a
    /// normalized `url_path`.
    #[must_use]
    pub fn with_url(mut self, url: impl Fn(&A) -> Option<String> + Send + Sync + 'static) -> Self {
        self.extractors.url = Some(Arc::new(url));
        self
    }

    /// Extra metric labels; only names the category's metrics carry are used.
    #[must_use]
    pub fn with_labels(
        mut self,
        labels: impl Fn(&A) -> BTreeMap<String, String> + Send + Sync + 'static,
    ) -> Self {
        self.extractors.labels = Some(Arc::new(labels));
        self
    }

    /// Reads the response status of a successful outgoing request.
    #[must_use]
    pub fn with_status_code(mut self, inspector: impl Fn(&T) -> u16 + Send + Sync + 'static) -> Self {
        self.status_code = Some(Arc::new(inspector));
        self
    }

    pub fn descriptor(&self) -> &super::OperationDescriptor {
        &self.core.descriptor
    }
}

impl<A, T, F> Instrumented<A, T, F, Blocking> {
    /// # Errors
    ///
    /// Returns the operation's own error, unchanged.
    pub fn call<E>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Result<T, E>,
        E: Display,
    {
        let call = self.extractors.resolve(self.core.descriptor.category, &args);
        execute_blocking(&self.core, call, self.status_code.as_ref(), || (self.operation)(args))
    }
}

impl<A, T, F> Instrumented<A, T, F, Suspending> {
    /// # Errors
    ///
    /// Returns the operation's own error, unchanged.
    pub async fn call<E, Fut>(&self, args: A) -> Result<T, E>
    where
        F: Fn(A) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let call = self.extractors.resolve(self.core.descriptor.category, &args);
        execute(&self.core, call, self.status_code.as_ref(), || (self.operation)(args)).await
    }
}
