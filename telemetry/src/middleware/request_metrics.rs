use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};
use std::time::Instant;

use axum::extract::MatchedPath;
use axum::http::{Request, Response};
use futures::future::BoxFuture;
use futures::FutureExt as _;
use logger_redacted::short_type_name;
use opentelemetry::trace::{FutureExt as _, SpanKind, Status, TraceContextExt};
use opentelemetry::{Context, KeyValue};
use tower::{Layer, Service};

use super::routes::RouteTemplates;
use crate::error::Result;
use crate::instrumentation::isolate;
use crate::metrics::catalog::{
    register_request_metrics, HTTP_APP_INFO, HTTP_EXCEPTIONS_TOTAL, HTTP_REQUESTS_IN_PROGRESS,
    HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION_SECONDS, HTTP_RESPONSES_TOTAL,
};
use crate::metrics::{Exemplar, Gauge, MetricRegistry};
use crate::propagation::extract_from_headers;
use crate::trace::{trace_id_of, TraceBridge};

const SERVER_ERROR: u16 = 500;

struct MiddlewareState {
    registry: Arc<MetricRegistry>,
    bridge: Arc<dyn TraceBridge>,
    service_name: String,
    routes: RouteTemplates,
}

/// Records request counts, in-flight requests, latency and responses per
/// route template, and opens a server span for every routed request.
#[derive(Clone)]
pub struct RequestMetricsLayer {
    state: Arc<MiddlewareState>,
}

impl fmt::Debug for RequestMetricsLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMetricsLayer")
            .field("service_name", &self.state.service_name)
            .field("routes", &self.state.routes)
            .finish_non_exhaustive()
    }
}

impl RequestMetricsLayer {
    pub fn new(
        registry: Arc<MetricRegistry>,
        bridge: Arc<dyn TraceBridge>,
        service_name: impl Into<String>,
        routes: RouteTemplates,
    ) -> Self {
        let service_name = service_name.into();
        isolate("register request metrics", || {
            register_request_metrics(&registry)?;
            registry
                .gauge(HTTP_APP_INFO, &[("service_name", service_name.as_str())])?
                .set(1.0);
            Ok(())
        });
        Self {
            state: Arc::new(MiddlewareState {
                registry,
                bridge,
                service_name,
                routes,
            }),
        }
    }
}

impl<S> Layer<S> for RequestMetricsLayer {
    type Service = RequestMetrics<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestMetrics {
            inner,
            state: Arc::clone(&self.state),
        }
    }
}

#[derive(Clone)]
pub struct RequestMetrics<S> {
    inner: S,
    state: Arc<MiddlewareState>,
}

impl<S: fmt::Debug> fmt::Debug for RequestMetrics<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMetrics")
            .field("inner", &self.inner)
            .field("service_name", &self.state.service_name)
            .finish_non_exhaustive()
    }
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestMetrics<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: 'static,
    ReqBody: Send + 'static,
    ResBody: 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = BoxFuture<'static, std::result::Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<ReqBody>) -> Self::Future {
        // The clone may not be ready; keep the one that was polled.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        let template = request
            .extensions()
            .get::<MatchedPath>()
            .map(|matched| matched.as_str().to_string())
            .or_else(|| self.state.routes.resolve(request.uri().path()).map(str::to_string));
        let Some(template) = template else {
            tracing::debug!(path = request.uri().path(), "request matches no route, not recorded");
            return Box::pin(inner.call(request));
        };

        let parent = extract_from_headers(request.headers());
        let method = request.method().as_str().to_string();
        let mut tracker = RequestTracker::start(Arc::clone(&self.state), method, template, &parent);
        let cx = tracker.context().clone();

        let future = {
            let _attached = cx.clone().attach();
            inner.call(request)
        };
        Box::pin(async move {
            match AssertUnwindSafe(future.with_context(cx)).catch_unwind().await {
                Ok(Ok(response)) => {
                    tracker.complete(Completion::Response(response.status().as_u16()));
                    Ok(response)
                }
                Ok(Err(err)) => {
                    tracker.complete(Completion::Error(short_type_name::<S::Error>()));
                    Err(err)
                }
                Err(panic) => {
                    tracker.complete(Completion::Panic);
                    std::panic::resume_unwind(panic)
                }
            }
        })
    }
}

enum Completion {
    Response(u16),
    Error(&'static str),
    Panic,
    Cancelled,
}

impl Completion {
    fn status_code(&self) -> u16 {
        match self {
            Self::Response(code) => *code,
            _ => SERVER_ERROR,
        }
    }

    fn exception_type(&self) -> Option<&'static str> {
        match self {
            Self::Response(_) => None,
            Self::Error(error_type) => Some(error_type),
            Self::Panic => Some("Panic"),
            Self::Cancelled => Some("Cancelled"),
        }
    }
}

/// Accounting for one routed request. The in-progress gauge is raised on
/// start and lowered exactly once, on completion or on drop.
struct RequestTracker {
    state: Arc<MiddlewareState>,
    method: String,
    path: String,
    span: Option<Context>,
    cx: Context,
    in_progress: Option<Arc<Gauge>>,
    started: Instant,
    done: bool,
}

impl RequestTracker {
    fn start(state: Arc<MiddlewareState>, method: String, path: String, parent: &Context) -> Self {
        let started = Instant::now();
        let labels = [
            ("method", method.as_str()),
            ("path", path.as_str()),
            ("service_name", state.service_name.as_str()),
        ];
        isolate("count request", || {
            state.registry.counter(HTTP_REQUESTS_TOTAL, &labels)?.inc();
            Ok(())
        });
        let in_progress = isolate("track in-progress request", || {
            let gauge = state.registry.gauge(HTTP_REQUESTS_IN_PROGRESS, &labels)?;
            gauge.inc();
            Ok(gauge)
        });

        let span = isolate("open server span", || {
            state.bridge.start_span(
                parent,
                format!("http.server.{method} {path}"),
                SpanKind::Server,
                vec![
                    KeyValue::new("http.method", method.clone()),
                    KeyValue::new("http.route", path.clone()),
                    KeyValue::new("service.name", state.service_name.clone()),
                ],
            )
        });
        let cx = span.clone().unwrap_or_else(|| parent.clone());

        Self {
            state,
            method,
            path,
            span,
            cx,
            in_progress,
            started,
            done: false,
        }
    }

    fn context(&self) -> &Context {
        &self.cx
    }

    fn complete(&mut self, completion: Completion) {
        if self.done {
            return;
        }
        self.done = true;
        if let Some(gauge) = &self.in_progress {
            gauge.dec();
        }
        let elapsed = self.started.elapsed().as_secs_f64();

        isolate("record response", || self.record(&completion, elapsed));
        isolate("close server span", || {
            self.close_span(&completion);
            Ok(())
        });
    }

    fn record(&self, completion: &Completion, elapsed: f64) -> Result<()> {
        let registry = &self.state.registry;
        let service_name = self.state.service_name.as_str();
        let labels = [
            ("method", self.method.as_str()),
            ("path", self.path.as_str()),
            ("service_name", service_name),
        ];

        let duration = registry.histogram(HTTP_REQUEST_DURATION_SECONDS, &labels)?;
        match self.span.as_ref().and_then(trace_id_of) {
            Some(trace_id) => duration.observe_with_exemplar(elapsed, Exemplar::for_trace(trace_id, elapsed)),
            None => duration.observe(elapsed),
        }

        let status_code = completion.status_code().to_string();
        registry
            .counter(
                HTTP_RESPONSES_TOTAL,
                &[
                    ("method", self.method.as_str()),
                    ("path", self.path.as_str()),
                    ("status_code", status_code.as_str()),
                    ("service_name", service_name),
                ],
            )?
            .inc();

        if let Some(exception_type) = completion.exception_type() {
            registry
                .counter(
                    HTTP_EXCEPTIONS_TOTAL,
                    &[
                        ("method", self.method.as_str()),
                        ("path", self.path.as_str()),
                        ("exception_type", exception_type),
                        ("service_name", service_name),
                    ],
                )?
                .inc();
        }
        Ok(())
    }

    fn close_span(&self, completion: &Completion) {
        let Some(cx) = &self.span else {
            return;
        };
        let span = cx.span();
        let status_code = completion.status_code();
        span.set_attribute(KeyValue::new("http.status_code", i64::from(status_code)));
        if let Some(exception_type) = completion.exception_type() {
            span.add_event("exception", vec![KeyValue::new("exception.type", exception_type)]);
        }
        if status_code >= SERVER_ERROR {
            span.set_status(Status::error(format!("HTTP {status_code}")));
        } else {
            span.set_status(Status::Ok);
        }
        span.end();
    }
}

impl Drop for RequestTracker {
    fn drop(&mut self) {
        let completion = if std::thread::panicking() {
            Completion::Panic
        } else {
            Completion::Cancelled
        };
        self.complete(completion);
    }
}
