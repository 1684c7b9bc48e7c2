use std::collections::BTreeMap;

use lazy_static::lazy_static;
use opentelemetry::KeyValue;
use regex::Regex;
use url::Url;

use super::category::OperationCategory;

lazy_static! {
    static ref NUMERIC_SEGMENT: Regex = literal(r"^\d+$");
    static ref UUID_SEGMENT: Regex =
        literal(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$");
    static ref OBJECT_ID_SEGMENT: Regex = literal(r"(?i)^[0-9a-f]{24}$");
    static ref HASH_SEGMENT: Regex = literal(r"(?i)^[0-9a-f]{32}$");
}

// Only called with the literal patterns above, which the tests compile.
#[allow(clippy::unwrap_used)]
fn literal(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

/// Metric labels and span attributes resolved for one invocation.
#[derive(Debug, Clone, Default)]
pub struct CallLabels {
    pub(crate) metric: BTreeMap<String, String>,
    pub(crate) span: Vec<KeyValue>,
}

impl CallLabels {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn label(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.metric.insert(key.into(), value.into());
        self
    }

    pub fn attribute(&mut self, attribute: KeyValue) -> &mut Self {
        self.span.push(attribute);
        self
    }

    pub(crate) fn merge(&mut self, other: CallLabels) {
        self.metric.extend(other.metric);
        self.span.extend(other.span);
    }

    /// Sets `url_host`, `url_path` and the `http.*` attributes. Unparsable
    /// URLs leave both labels unresolved.
    pub(crate) fn apply_url(&mut self, raw: &str) {
        let Ok(url) = Url::parse(raw) else {
            tracing::debug!(url = raw, "outgoing request url could not be parsed");
            return;
        };
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{host}:{port}"),
            (Some(host), None) => host.to_string(),
            (None, _) => return,
        };
        let path = normalize_path(url.path());

        let mut without_query = url.clone();
        without_query.set_query(None);
        without_query.set_fragment(None);

        self.label("url_host", host.clone());
        self.label("url_path", path.clone());
        self.attribute(KeyValue::new("http.url", without_query.to_string()));
        self.attribute(KeyValue::new("http.scheme", url.scheme().to_string()));
        self.attribute(KeyValue::new("http.host", host));
        self.attribute(KeyValue::new("http.target", path));
    }

    pub(crate) fn apply_topic(&mut self, category: OperationCategory, topic: &str) {
        self.label("topic", topic);
        let key = match category {
            OperationCategory::QueueConsumer => "messaging.source",
            _ => "messaging.destination",
        };
        self.attribute(KeyValue::new(key, topic.to_string()));
    }

    pub(crate) fn apply_message_key(&mut self, key: &str) {
        self.attribute(KeyValue::new("messaging.kafka.message_key", key.to_string()));
    }
}

/// Replaces identifier-like path segments with placeholders so the path can
/// be used as a low-cardinality label.
pub fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if NUMERIC_SEGMENT.is_match(segment) {
                "{id}"
            } else if UUID_SEGMENT.is_match(segment) {
                "{uuid}"
            } else if OBJECT_ID_SEGMENT.is_match(segment) {
                "{object_id}"
            } else if HASH_SEGMENT.is_match(segment) {
                "{hash}"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}
