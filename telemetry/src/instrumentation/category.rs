use std::collections::BTreeMap;

use opentelemetry::trace::SpanKind;
use serde::{Deserialize, Serialize};

use crate::error::MetricsError;
use crate::metrics::catalog::{DEFAULT_BUCKETS, HTTP_CLIENT_BUCKETS, MEMORY_BUCKETS, PRODUCER_BUCKETS};
use crate::metrics::MetricRegistry;

/// Label value used when a dynamic label cannot be resolved.
pub const UNKNOWN: &str = "unknown";

pub(crate) const APP_NAME: &str = "app_name";
pub(crate) const STATUS: &str = "status";
pub(crate) const ERROR_TYPE: &str = "error_type";
pub(crate) const STATUS_CODE: &str = "status_code";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationCategory {
    Business,
    HttpClient,
    QueueProducer,
    QueueConsumer,
    HttpServer,
}

impl OperationCategory {
    pub fn span_prefix(self) -> &'static str {
        match self {
            Self::Business => "business",
            Self::HttpClient => "http.client",
            Self::QueueProducer => "kafka.producer",
            Self::QueueConsumer => "kafka.consumer",
            Self::HttpServer => "http.server",
        }
    }

    pub fn span_kind(self) -> SpanKind {
        match self {
            Self::Business => SpanKind::Internal,
            Self::HttpClient => SpanKind::Client,
            Self::QueueProducer => SpanKind::Producer,
            Self::QueueConsumer => SpanKind::Consumer,
            Self::HttpServer => SpanKind::Server,
        }
    }

    /// Label that carries the operation name in this category's metrics.
    pub(crate) fn name_label(self) -> Option<&'static str> {
        match self {
            Self::Business | Self::HttpServer => Some("operation"),
            Self::HttpClient => Some("method"),
            Self::QueueConsumer => Some("handler"),
            Self::QueueProducer => None,
        }
    }

    pub(crate) fn policy(self) -> &'static CategoryPolicy {
        match self {
            Self::Business => &BUSINESS,
            Self::HttpClient => &HTTP_CLIENT,
            Self::QueueProducer => &QUEUE_PRODUCER,
            Self::QueueConsumer => &QUEUE_CONSUMER,
            Self::HttpServer => &HTTP_SERVER,
        }
    }
}

/// Identity of a wrapped operation: category, low-cardinality name and
/// static labels.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationDescriptor {
    pub category: OperationCategory,
    pub name: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl OperationDescriptor {
    pub fn new(category: OperationCategory, name: impl Into<String>) -> Self {
        Self {
            category,
            name: name.into(),
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    pub fn span_name(&self) -> String {
        format!("{}.{}", self.category.span_prefix(), self.name)
    }

    /// Static labels plus the label carrying the operation name.
    pub(crate) fn metric_labels(&self) -> BTreeMap<String, String> {
        let mut labels = self.labels.clone();
        if let Some(key) = self.category.name_label() {
            let value = match self.category {
                OperationCategory::HttpClient => self.name.to_uppercase(),
                _ => self.name.clone(),
            };
            labels.insert(key.to_string(), value);
        }
        labels
    }
}

#[derive(Debug)]
pub(crate) struct MetricDef {
    pub(crate) name: &'static str,
    help: &'static str,
    labels: &'static [&'static str],
    buckets: &'static [f64],
}

/// Values available when resolving a metric's labels for one invocation.
pub(crate) struct LabelContext<'a> {
    pub(crate) labels: &'a BTreeMap<String, String>,
    pub(crate) app_name: &'a str,
    pub(crate) status: &'a str,
    pub(crate) error_type: Option<&'a str>,
    pub(crate) status_code: Option<&'a str>,
}

impl MetricDef {
    pub(crate) fn resolve<'a>(&self, cx: &'a LabelContext<'a>) -> Vec<(&'static str, &'a str)> {
        self.labels
            .iter()
            .map(|label| {
                let value = match *label {
                    APP_NAME => Some(cx.app_name),
                    STATUS => Some(cx.status),
                    ERROR_TYPE => cx.error_type,
                    STATUS_CODE => cx.status_code,
                    other => cx.labels.get(other).map(String::as_str),
                };
                (*label, value.unwrap_or(UNKNOWN))
            })
            .collect()
    }

    fn register_counter(&self, registry: &MetricRegistry) -> Result<(), MetricsError> {
        registry.register_counter(self.name, self.help, self.labels)
    }

    fn register_histogram(&self, registry: &MetricRegistry) -> Result<(), MetricsError> {
        registry.register_histogram(self.name, self.help, self.labels, self.buckets)
    }
}

/// Metric names and label schemes of one operation category.
#[derive(Debug)]
pub(crate) struct CategoryPolicy {
    pub(crate) total: MetricDef,
    pub(crate) duration: MetricDef,
    pub(crate) errors: Option<MetricDef>,
    pub(crate) memory_samples: MetricDef,
    pub(crate) memory_bytes: MetricDef,
}

impl CategoryPolicy {
    pub(crate) fn register(&self, registry: &MetricRegistry) -> Result<(), MetricsError> {
        self.total.register_counter(registry)?;
        self.duration.register_histogram(registry)?;
        if let Some(errors) = &self.errors {
            errors.register_counter(registry)?;
        }
        self.memory_samples.register_counter(registry)?;
        self.memory_bytes.register_histogram(registry)
    }
}

const NO_BUCKETS: &[f64] = &[];

static BUSINESS: CategoryPolicy = CategoryPolicy {
    total: MetricDef {
        name: "business_operations_total",
        help: "Total business operations executed",
        labels: &["operation", APP_NAME, STATUS],
        buckets: NO_BUCKETS,
    },
    duration: MetricDef {
        name: "business_operations_duration_seconds",
        help: "Duration of business operations in seconds",
        labels: &["operation", APP_NAME, STATUS],
        buckets: DEFAULT_BUCKETS,
    },
    errors: None,
    memory_samples: MetricDef {
        name: "business_operations_memory_samples_total",
        help: "Business operations sampled for memory usage",
        labels: &["operation", APP_NAME],
        buckets: NO_BUCKETS,
    },
    memory_bytes: MetricDef {
        name: "business_operations_memory_bytes",
        help: "Memory growth of sampled business operations in bytes",
        labels: &["operation", APP_NAME, STATUS],
        buckets: MEMORY_BUCKETS,
    },
};

static HTTP_CLIENT: CategoryPolicy = CategoryPolicy {
    total: MetricDef {
        name: "http_outgoing_requests_total",
        help: "Total outgoing HTTP requests",
        labels: &["method", STATUS_CODE, "url_host", "url_path", APP_NAME, STATUS],
        buckets: NO_BUCKETS,
    },
    duration: MetricDef {
        name: "http_outgoing_requests_duration_seconds",
        help: "Duration of outgoing HTTP requests in seconds",
        labels: &["method", "url_host", "url_path", APP_NAME, STATUS],
        buckets: HTTP_CLIENT_BUCKETS,
    },
    errors: Some(MetricDef {
        name: "http_outgoing_requests_errors_total",
        help: "Outgoing HTTP requests that failed",
        labels: &["method", "url_host", "url_path", ERROR_TYPE, APP_NAME],
        buckets: NO_BUCKETS,
    }),
    memory_samples: MetricDef {
        name: "http_outgoing_requests_memory_samples_total",
        help: "Outgoing HTTP requests sampled for memory usage",
        labels: &["method", "url_host", "url_path", APP_NAME],
        buckets: NO_BUCKETS,
    },
    memory_bytes: MetricDef {
        name: "http_outgoing_requests_memory_bytes",
        help: "Memory growth of sampled outgoing HTTP requests in bytes",
        labels: &["method", "url_host", "url_path", APP_NAME, STATUS],
        buckets: MEMORY_BUCKETS,
    },
};

static QUEUE_PRODUCER: CategoryPolicy = CategoryPolicy {
    total: MetricDef {
        name: "kafka_messages_produced_total",
        help: "Total messages produced",
        labels: &["topic", APP_NAME, STATUS],
        buckets: NO_BUCKETS,
    },
    duration: MetricDef {
        name: "kafka_producer_duration_seconds",
        help: "Duration of message production in seconds",
        labels: &["topic", APP_NAME, STATUS],
        buckets: PRODUCER_BUCKETS,
    },
    errors: Some(MetricDef {
        name: "kafka_producer_errors_total",
        help: "Message productions that failed",
        labels: &["topic", ERROR_TYPE, APP_NAME],
        buckets: NO_BUCKETS,
    }),
    memory_samples: MetricDef {
        name: "kafka_producer_memory_samples_total",
        help: "Message productions sampled for memory usage",
        labels: &["topic", APP_NAME],
        buckets: NO_BUCKETS,
    },
    memory_bytes: MetricDef {
        name: "kafka_producer_memory_bytes",
        help: "Memory growth of sampled message productions in bytes",
        labels: &["topic", APP_NAME, STATUS],
        buckets: MEMORY_BUCKETS,
    },
};

static QUEUE_CONSUMER: CategoryPolicy = CategoryPolicy {
    total: MetricDef {
        name: "kafka_messages_consumed_total",
        help: "Total messages consumed",
        labels: &["topic", "handler", APP_NAME, STATUS],
        buckets: NO_BUCKETS,
    },
    duration: MetricDef {
        name: "kafka_message_processing_duration_seconds",
        help: "Duration of message processing in seconds",
        labels: &["topic", "handler", APP_NAME, STATUS],
        buckets: DEFAULT_BUCKETS,
    },
    errors: Some(MetricDef {
        name: "kafka_consumer_errors_total",
        help: "Message handlers that failed",
        labels: &["topic", ERROR_TYPE, APP_NAME],
        buckets: NO_BUCKETS,
    }),
    memory_samples: MetricDef {
        name: "kafka_consumer_memory_samples_total",
        help: "Message handlers sampled for memory usage",
        labels: &["topic", "handler", APP_NAME],
        buckets: NO_BUCKETS,
    },
    memory_bytes: MetricDef {
        name: "kafka_consumer_memory_bytes",
        help: "Memory growth of sampled message handlers in bytes",
        labels: &["topic", "handler", APP_NAME, STATUS],
        buckets: MEMORY_BUCKETS,
    },
};

static HTTP_SERVER: CategoryPolicy = CategoryPolicy {
    total: MetricDef {
        name: "http_server_operations_total",
        help: "Total server-side operations executed",
        labels: &["operation", APP_NAME, STATUS],
        buckets: NO_BUCKETS,
    },
    duration: MetricDef {
        name: "http_server_operations_duration_seconds",
        help: "Duration of server-side operations in seconds",
        labels: &["operation", APP_NAME, STATUS],
        buckets: DEFAULT_BUCKETS,
    },
    errors: None,
    memory_samples: MetricDef {
        name: "http_server_operations_memory_samples_total",
        help: "Server-side operations sampled for memory usage",
        labels: &["operation", APP_NAME],
        buckets: NO_BUCKETS,
    },
    memory_bytes: MetricDef {
        name: "http_server_operations_memory_bytes",
        help: "Memory growth of sampled server-side operations in bytes",
        labels: &["operation", APP_NAME, STATUS],
        buckets: MEMORY_BUCKETS,
    },
};
