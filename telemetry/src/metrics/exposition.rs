use std::fmt::Write as _;
use std::sync::Arc;

use super::instruments::Exemplar;
use super::registry::{LabelSet, MetricFamily, MetricKind, Series};

pub const OPENMETRICS_CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

pub(crate) fn render(families: &[Arc<MetricFamily>]) -> String {
    let mut out = String::new();
    for family in families {
        render_family(&mut out, family);
    }
    out.push_str("# EOF\n");
    out
}

fn render_family(out: &mut String, family: &MetricFamily) {
    let base = match family.kind {
        MetricKind::Counter => family.name.strip_suffix("_total").unwrap_or(&family.name),
        _ => family.name.as_str(),
    };
    if !family.help.is_empty() {
        let _ = writeln!(out, "# HELP {base} {}", escape_help(&family.help));
    }
    let _ = writeln!(out, "# TYPE {base} {}", family.kind.as_str());

    for (labels, series) in family.series() {
        match series {
            Series::Counter(counter) => {
                let _ = writeln!(out, "{base}_total{} {}", label_block(&labels, None), counter.get());
            }
            Series::Gauge(gauge) => {
                let _ = writeln!(out, "{base}{} {}", label_block(&labels, None), format_float(gauge.get()));
            }
            Series::Histogram(histogram) => {
                let snapshot = histogram.snapshot();
                for ((bound, count), exemplar) in snapshot.buckets.iter().zip(snapshot.exemplars.iter()) {
                    let le = format_float(*bound);
                    let _ = write!(out, "{base}_bucket{} {count}", label_block(&labels, Some(&le)));
                    if let Some(exemplar) = exemplar {
                        out.push_str(&render_exemplar(exemplar));
                    }
                    out.push('\n');
                }
                let _ = writeln!(out, "{base}_count{} {}", label_block(&labels, None), snapshot.count);
                let _ = writeln!(out, "{base}_sum{} {}", label_block(&labels, None), format_float(snapshot.sum));
            }
        }
    }
}

fn render_exemplar(exemplar: &Exemplar) -> String {
    let labels = exemplar
        .labels
        .iter()
        .map(|(key, value)| format!("{key}=\"{}\"", escape_label(value)))
        .collect::<Vec<_>>()
        .join(",");
    format!(
        " # {{{labels}}} {} {}",
        format_float(exemplar.value),
        format_timestamp(exemplar.timestamp)
    )
}

fn label_block(labels: &LabelSet, le: Option<&str>) -> String {
    if labels.is_empty() && le.is_none() {
        return String::new();
    }
    let mut pairs: Vec<String> = labels
        .iter()
        .map(|(key, value)| format!("{key}=\"{}\"", escape_label(value)))
        .collect();
    if let Some(le) = le {
        pairs.push(format!("le=\"{le}\""));
    }
    format!("{{{}}}", pairs.join(","))
}

fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value.is_infinite() {
        let sign = if value.is_sign_positive() { "+" } else { "-" };
        format!("{sign}Inf")
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

fn format_timestamp(seconds: f64) -> String {
    format!("{seconds:.3}")
}

fn escape_label(value: &str) -> String {
    value.replace('\\', r"\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn escape_help(value: &str) -> String {
    value.replace('\\', r"\\").replace('\n', "\\n")
}
