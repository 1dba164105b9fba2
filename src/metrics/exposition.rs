//! Prometheus text exposition.
//!
//! Renders a registry snapshot into the pull-based text format scraped by an
//! external collector. Output is deterministic: families sorted by name,
//! series sorted by label values, histograms expanded into `_bucket`, `_sum`
//! and `_count` lines.

use std::fmt::Write;

use super::registry::{MetricRegistry, MetricSnapshot, SeriesValue};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Render the current state of `registry` as exposition text.
pub fn render(registry: &MetricRegistry) -> String {
    let mut out = String::new();
    for family in registry.snapshot() {
        render_family(&mut out, &family);
    }
    out
}

fn render_family(out: &mut String, family: &MetricSnapshot) {
    if family.series.is_empty() {
        return;
    }
    let _ = writeln!(out, "# TYPE {} {}", family.name, family.kind.as_str());
    for series in &family.series {
        let labels = format_labels(&series.labels);
        match &series.value {
            SeriesValue::Counter(value) => {
                let _ = writeln!(out, "{}{} {}", family.name, labels, value);
            }
            SeriesValue::Gauge(value) => {
                let _ = writeln!(out, "{}{} {}", family.name, labels, value);
            }
            SeriesValue::Histogram(histogram) => {
                for (bound, cumulative) in &histogram.buckets {
                    let labels = format_labels_with_le(&series.labels, *bound);
                    let _ = writeln!(out, "{}_bucket{} {}", family.name, labels, cumulative);
                }
                let _ = writeln!(out, "{}_sum{} {}", family.name, labels, histogram.sum);
                let _ = writeln!(out, "{}_count{} {}", family.name, labels, histogram.count);
            }
        }
    }
}

fn format_labels(labels: &[(String, String)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let body: Vec<String> = labels
        .iter()
        .map(|(key, value)| format!("{}=\"{}\"", key, escape_value(value)))
        .collect();
    format!("{{{}}}", body.join(","))
}

fn format_labels_with_le(labels: &[(String, String)], bound: f64) -> String {
    let le = if bound.is_infinite() {
        "+Inf".to_string()
    } else {
        format!("{}", bound)
    };
    let mut body: Vec<String> = labels
        .iter()
        .map(|(key, value)| format!("{}=\"{}\"", key, escape_value(value)))
        .collect();
    body.push(format!("le=\"{}\"", le));
    format!("{{{}}}", body.join(","))
}

fn escape_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
