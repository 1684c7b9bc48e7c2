use std::sync::Arc;

use dashmap::DashMap;

use super::catalog::DEFAULT_BUCKETS;
use super::exposition;
use super::instruments::{Counter, Gauge, Histogram};
use crate::error::MetricsError;

/// Label pairs sorted by key; the identity of a series within a family.
pub type LabelSet = Vec<(String, String)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum Series {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Histogram(Arc<Histogram>),
}

impl Series {
    fn new(kind: MetricKind, buckets: &Arc<[f64]>) -> Self {
        match kind {
            MetricKind::Counter => Self::Counter(Arc::default()),
            MetricKind::Gauge => Self::Gauge(Arc::default()),
            MetricKind::Histogram => Self::Histogram(Arc::new(Histogram::new(Arc::clone(buckets)))),
        }
    }
}

#[derive(Debug)]
pub(crate) struct MetricFamily {
    pub(crate) name: String,
    pub(crate) help: String,
    pub(crate) kind: MetricKind,
    /// Sorted; `None` for families created by use rather than registration.
    label_names: Option<Vec<String>>,
    buckets: Arc<[f64]>,
    series: DashMap<LabelSet, Series>,
}

impl MetricFamily {
    pub(crate) fn series(&self) -> Vec<(LabelSet, Series)> {
        let mut series: Vec<_> = self
            .series
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        series.sort_by(|a, b| a.0.cmp(&b.0));
        series
    }

    fn check_labels(&self, labels: &LabelSet) -> Result<(), MetricsError> {
        let Some(expected) = &self.label_names else {
            return Ok(());
        };
        let matches = expected.len() == labels.len()
            && expected.iter().zip(labels.iter()).all(|(name, (key, _))| name == key);
        if matches {
            Ok(())
        } else {
            Err(MetricsError::LabelMismatch {
                name: self.name.clone(),
                expected: expected.clone(),
                given: labels.iter().map(|(key, _)| key.clone()).collect(),
            })
        }
    }
}

/// Named, labeled counters, gauges and histograms.
///
/// Families are created on registration or first use. Within a family each
/// distinct label set resolves to one shared accumulator, so handles returned
/// for equal labels always observe the same series.
#[derive(Debug, Default)]
pub struct MetricRegistry {
    families: DashMap<String, Arc<MetricFamily>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Fails on invalid names or when `name` is already known with another
    /// kind or definition.
    pub fn register_counter(&self, name: &str, help: &str, label_names: &[&str]) -> Result<(), MetricsError> {
        self.register(name, help, MetricKind::Counter, Some(label_names), None)
            .map(|_| ())
    }

    /// # Errors
    ///
    /// Fails on invalid names or when `name` is already known with another
    /// kind or definition.
    pub fn register_gauge(&self, name: &str, help: &str, label_names: &[&str]) -> Result<(), MetricsError> {
        self.register(name, help, MetricKind::Gauge, Some(label_names), None)
            .map(|_| ())
    }

    /// # Errors
    ///
    /// Fails on invalid names, invalid buckets, or when `name` is already
    /// known with another kind or definition.
    pub fn register_histogram(
        &self,
        name: &str,
        help: &str,
        label_names: &[&str],
        buckets: &[f64],
    ) -> Result<(), MetricsError> {
        self.register(name, help, MetricKind::Histogram, Some(label_names), Some(buckets))
            .map(|_| ())
    }

    /// # Errors
    ///
    /// Fails on invalid labels or when `name` is not a counter.
    pub fn counter(&self, name: &str, labels: &[(&str, &str)]) -> Result<Arc<Counter>, MetricsError> {
        match self.series(name, MetricKind::Counter, labels)? {
            Series::Counter(counter) => Ok(counter),
            _ => Err(kind_mismatch(name, MetricKind::Counter)),
        }
    }

    /// # Errors
    ///
    /// Fails on invalid labels or when `name` is not a gauge.
    pub fn gauge(&self, name: &str, labels: &[(&str, &str)]) -> Result<Arc<Gauge>, MetricsError> {
        match self.series(name, MetricKind::Gauge, labels)? {
            Series::Gauge(gauge) => Ok(gauge),
            _ => Err(kind_mismatch(name, MetricKind::Gauge)),
        }
    }

    /// # Errors
    ///
    /// Fails on invalid labels or when `name` is not a histogram.
    pub fn histogram(&self, name: &str, labels: &[(&str, &str)]) -> Result<Arc<Histogram>, MetricsError> {
        match self.series(name, MetricKind::Histogram, labels)? {
            Series::Histogram(histogram) => Ok(histogram),
            _ => Err(kind_mismatch(name, MetricKind::Histogram)),
        }
    }

    /// Renders every family in the OpenMetrics text format.
    pub fn export(&self) -> String {
        exposition::render(&self.families())
    }

    pub(crate) fn families(&self) -> Vec<Arc<MetricFamily>> {
        let mut families: Vec<_> = self.families.iter().map(|entry| Arc::clone(entry.value())).collect();
        families.sort_by(|a, b| a.name.cmp(&b.name));
        families
    }

    fn series(&self, name: &str, kind: MetricKind, labels: &[(&str, &str)]) -> Result<Series, MetricsError> {
        let labels = canonical_labels(name, labels)?;
        let family = self.register(name, "", kind, None, None)?;
        family.check_labels(&labels)?;
        let series = family
            .series
            .entry(labels)
            .or_insert_with(|| Series::new(kind, &family.buckets))
            .clone();
        Ok(series)
    }

    fn register(
        &self,
        name: &str,
        help: &str,
        kind: MetricKind,
        label_names: Option<&[&str]>,
        buckets: Option<&[f64]>,
    ) -> Result<Arc<MetricFamily>, MetricsError> {
        let explicit = label_names.is_some();
        if !explicit {
            if let Some(family) = self.families.get(name).map(|entry| Arc::clone(entry.value())) {
                return if family.kind == kind {
                    Ok(family)
                } else {
                    Err(kind_mismatch(name, family.kind))
                };
            }
        }

        validate_name(name)?;
        let label_names = label_names
            .map(|names| {
                let mut names: Vec<String> = names.iter().map(|label| (*label).to_string()).collect();
                names.sort();
                for label in &names {
                    validate_label(name, label)?;
                }
                Ok::<_, MetricsError>(names)
            })
            .transpose()?;
        let buckets = match buckets {
            Some(buckets) => validate_buckets(name, buckets)?,
            None => Arc::from(DEFAULT_BUCKETS),
        };

        let family = self
            .families
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(MetricFamily {
                    name: name.to_string(),
                    help: help.to_string(),
                    kind,
                    label_names: label_names.clone(),
                    buckets: Arc::clone(&buckets),
                    series: DashMap::new(),
                })
            })
            .clone();

        if family.kind != kind {
            return Err(kind_mismatch(name, family.kind));
        }
        // Re-registering the same definition is fine; a different one, or a
        // family that was already created by use, is not.
        if explicit
            && (family.help != help || family.label_names != label_names || *family.buckets != *buckets)
        {
            return Err(MetricsError::DefinitionMismatch(name.to_string()));
        }
        Ok(family)
    }
}

fn kind_mismatch(name: &str, existing: MetricKind) -> MetricsError {
    MetricsError::KindMismatch {
        name: name.to_string(),
        existing: existing.as_str(),
    }
}

fn canonical_labels(name: &str, labels: &[(&str, &str)]) -> Result<LabelSet, MetricsError> {
    let mut canonical: LabelSet = labels
        .iter()
        .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
        .collect();
    canonical.sort_by(|a, b| a.0.cmp(&b.0));
    for pair in canonical.windows(2) {
        if let [(first, _), (second, _)] = pair {
            if first == second {
                return Err(MetricsError::InvalidLabel {
                    name: name.to_string(),
                    label: first.clone(),
                });
            }
        }
    }
    for (key, _) in &canonical {
        validate_label(name, key)?;
    }
    Ok(canonical)
}

fn validate_name(name: &str) -> Result<(), MetricsError> {
    let mut chars = name.chars();
    let valid = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_' || first == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':');
    if valid {
        Ok(())
    } else {
        Err(MetricsError::InvalidName(name.to_string()))
    }
}

fn validate_label(name: &str, label: &str) -> Result<(), MetricsError> {
    let mut chars = label.chars();
    let valid = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && label != "le";
    if valid {
        Ok(())
    } else {
        Err(MetricsError::InvalidLabel {
            name: name.to_string(),
            label: label.to_string(),
        })
    }
}

fn validate_buckets(name: &str, buckets: &[f64]) -> Result<Arc<[f64]>, MetricsError> {
    let finite = buckets.iter().all(|bound| bound.is_finite());
    let increasing = buckets.windows(2).all(|pair| matches!(pair, [a, b] if a < b));
    if buckets.is_empty() || !finite || !increasing {
        return Err(MetricsError::InvalidBuckets(name.to_string()));
    }
    Ok(Arc::from(buckets))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_labels_share_series() {
        let registry = MetricRegistry::new();
        let first = registry.counter("jobs_total", &[("queue", "a"), ("kind", "x")]).unwrap();
        let second = registry.counter("jobs_total", &[("kind", "x"), ("queue", "a")]).unwrap();
        first.inc();
        second.inc_by(2);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.get(), 3);
    }

    #[test]
    fn test_kind_mismatch() {
        let registry = MetricRegistry::new();
        registry.counter("jobs_total", &[]).unwrap();
        assert_eq!(
            registry.gauge("jobs_total", &[]).unwrap_err(),
            MetricsError::KindMismatch {
                name: "jobs_total".to_string(),
                existing: "counter",
            }
        );
    }

    #[test]
    fn test_registered_label_names_are_enforced() {
        let registry = MetricRegistry::new();
        registry.register_counter("jobs_total", "Jobs", &["queue"]).unwrap();
        assert!(registry.counter("jobs_total", &[("queue", "a")]).is_ok());
        assert!(matches!(
            registry.counter("jobs_total", &[("topic", "a")]),
            Err(MetricsError::LabelMismatch { .. })
        ));
    }

    #[test]
    fn test_conflicting_registration_is_rejected() {
        let registry = MetricRegistry::new();
        registry.register_counter("jobs_total", "Jobs", &["queue", "kind"]).unwrap();
        registry.register_counter("jobs_total", "Jobs", &["kind", "queue"]).unwrap();
        assert_eq!(
            registry.register_counter("jobs_total", "Jobs", &["queue"]),
            Err(MetricsError::DefinitionMismatch("jobs_total".to_string()))
        );
        assert_eq!(
            registry.register_counter("jobs_total", "Jobs done", &["queue", "kind"]),
            Err(MetricsError::DefinitionMismatch("jobs_total".to_string()))
        );

        registry.register_histogram("latency", "Latency", &[], &[0.1, 1.0]).unwrap();
        assert_eq!(
            registry.register_histogram("latency", "Latency", &[], &[0.5, 1.0]),
            Err(MetricsError::DefinitionMismatch("latency".to_string()))
        );
    }

    #[test]
    fn test_registration_after_first_use_is_rejected() {
        let registry = MetricRegistry::new();
        registry.counter("retries_total", &[("queue", "mail")]).unwrap().inc();
        assert_eq!(
            registry.register_counter("retries_total", "Retries", &["queue"]),
            Err(MetricsError::DefinitionMismatch("retries_total".to_string()))
        );
        assert_eq!(registry.counter("retries_total", &[("queue", "mail")]).unwrap().get(), 1);
    }

    #[test]
    fn test_invalid_names_and_labels() {
        let registry = MetricRegistry::new();
        assert!(matches!(registry.counter("9lives", &[]), Err(MetricsError::InvalidName(_))));
        assert!(matches!(
            registry.counter("ok_total", &[("bad-label", "x")]),
            Err(MetricsError::InvalidLabel { .. })
        ));
        assert!(matches!(
            registry.counter("ok_total", &[("a", "1"), ("a", "2")]),
            Err(MetricsError::InvalidLabel { .. })
        ));
        assert!(matches!(
            registry.register_histogram("latency", "", &[], &[1.0, 0.5]),
            Err(MetricsError::InvalidBuckets(_))
        ));
    }

    #[test]
    fn test_histogram_uses_registered_buckets() {
        let registry = MetricRegistry::new();
        registry.register_histogram("payload_bytes", "Payload size", &[], &[10.0, 100.0]).unwrap();
        let histogram = registry.histogram("payload_bytes", &[]).unwrap();
        histogram.observe(50.0);
        let snapshot = histogram.snapshot();
        assert_eq!(snapshot.buckets, vec![(10.0, 0), (100.0, 1), (f64::INFINITY, 1)]);
    }
}
