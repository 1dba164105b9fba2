//! Process-scoped metric registry.
//!
//! One registry instance owns every metric family and every labeled series.
//! Components receive cloned handles (`Counter`, `Gauge`, `Histogram`) at
//! startup and route all observations through them, so the registry is the
//! single aggregation point. There is no global singleton: whoever builds the
//! application builds the registry and passes it down.
//!
//! Registration is strict (kind and label-key drift are hard errors), while
//! observation is forgiving: a bad label arity at observe time drops the
//! sample with a warning instead of failing the request being measured.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

use super::instruments::{CounterCell, GaugeCell, HistogramCell, HistogramSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    Counter,
    Gauge,
    Histogram,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum MetricError {
    #[error("metric `{name}` is registered as a {existing}, requested as a {requested}")]
    KindMismatch {
        name: String,
        existing: MetricKind,
        requested: MetricKind,
    },
    #[error("metric `{name}` is registered with label keys {existing:?}, requested {requested:?}")]
    LabelKeyMismatch {
        name: String,
        existing: Vec<String>,
        requested: Vec<String>,
    },
    #[error("metric `{name}` takes {expected} label values, got {got}")]
    LabelArityMismatch {
        name: String,
        expected: usize,
        got: usize,
    },
}

#[derive(Debug)]
enum SeriesCell {
    Counter(CounterCell),
    Gauge(GaugeCell),
    Histogram(HistogramCell),
}

/// One named metric: fixed kind, fixed label-key schema, and a concurrent map
/// of labeled series created lazily on first observation.
#[derive(Debug)]
pub struct MetricFamily {
    name: String,
    kind: MetricKind,
    label_keys: Vec<String>,
    bucket_bounds: Vec<f64>,
    series: DashMap<Vec<String>, Arc<SeriesCell>>,
}

impl MetricFamily {
    fn new(name: &str, kind: MetricKind, label_keys: &[&str], bucket_bounds: Vec<f64>) -> Self {
        Self {
            name: name.to_string(),
            kind,
            label_keys: label_keys.iter().map(|k| k.to_string()).collect(),
            bucket_bounds,
            series: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn cell(&self, label_values: &[&str]) -> Result<Arc<SeriesCell>, MetricError> {
        if label_values.len() != self.label_keys.len() {
            return Err(MetricError::LabelArityMismatch {
                name: self.name.clone(),
                expected: self.label_keys.len(),
                got: label_values.len(),
            });
        }
        let key: Vec<String> = label_values.iter().map(|v| v.to_string()).collect();
        let cell = self
            .series
            .entry(key)
            .or_insert_with(|| {
                Arc::new(match self.kind {
                    MetricKind::Counter => SeriesCell::Counter(CounterCell::default()),
                    MetricKind::Gauge => SeriesCell::Gauge(GaugeCell::default()),
                    MetricKind::Histogram => {
                        SeriesCell::Histogram(HistogramCell::new(self.bucket_bounds.len()))
                    }
                })
            })
            .clone();
        Ok(cell)
    }

    fn snapshot(&self) -> MetricSnapshot {
        let mut series: Vec<SeriesSnapshot> = self
            .series
            .iter()
            .map(|entry| {
                let labels = self
                    .label_keys
                    .iter()
                    .cloned()
                    .zip(entry.key().iter().cloned())
                    .collect();
                let value = match entry.value().as_ref() {
                    SeriesCell::Counter(cell) => SeriesValue::Counter(cell.get()),
                    SeriesCell::Gauge(cell) => SeriesValue::Gauge(cell.get()),
                    SeriesCell::Histogram(cell) => {
                        SeriesValue::Histogram(cell.snapshot(&self.bucket_bounds))
                    }
                };
                SeriesSnapshot { labels, value }
            })
            .collect();
        series.sort_by(|a, b| a.labels.cmp(&b.labels));
        MetricSnapshot {
            name: self.name.clone(),
            kind: self.kind,
            series,
        }
    }
}

/// Consistent view of one family at snapshot time.
#[derive(Debug, Clone)]
pub struct MetricSnapshot {
    pub name: String,
    pub kind: MetricKind,
    pub series: Vec<SeriesSnapshot>,
}

#[derive(Debug, Clone)]
pub struct SeriesSnapshot {
    pub labels: Vec<(String, String)>,
    pub value: SeriesValue,
}

#[derive(Debug, Clone)]
pub enum SeriesValue {
    Counter(u64),
    Gauge(f64),
    Histogram(HistogramSnapshot),
}

/// Thread-safe store of metric families, keyed by name.
pub struct MetricRegistry {
    families: DashMap<String, Arc<MetricFamily>>,
}

impl MetricRegistry {
    pub fn new() -> Self {
        Self {
            families: DashMap::new(),
        }
    }

    /// Register a counter or fetch the existing one. Idempotent for matching
    /// kind and label keys.
    pub fn counter(&self, name: &str, label_keys: &[&str]) -> Result<Counter, MetricError> {
        let family = self.register_or_get(name, MetricKind::Counter, label_keys, Vec::new())?;
        Ok(Counter { family })
    }

    pub fn gauge(&self, name: &str, label_keys: &[&str]) -> Result<Gauge, MetricError> {
        let family = self.register_or_get(name, MetricKind::Gauge, label_keys, Vec::new())?;
        Ok(Gauge { family })
    }

    /// Register a histogram with the given bucket upper bounds. Bounds are
    /// sorted and deduplicated; they are fixed by the first registration of
    /// `name` and later registrations reuse them.
    pub fn histogram(
        &self,
        name: &str,
        label_keys: &[&str],
        bucket_bounds: &[f64],
    ) -> Result<Histogram, MetricError> {
        let mut bounds: Vec<f64> = bucket_bounds.iter().copied().filter(|b| b.is_finite()).collect();
        bounds.sort_by(|a, b| a.total_cmp(b));
        bounds.dedup();
        let family = self.register_or_get(name, MetricKind::Histogram, label_keys, bounds)?;
        Ok(Histogram { family })
    }

    fn register_or_get(
        &self,
        name: &str,
        kind: MetricKind,
        label_keys: &[&str],
        bucket_bounds: Vec<f64>,
    ) -> Result<Arc<MetricFamily>, MetricError> {
        let family = self
            .families
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MetricFamily::new(name, kind, label_keys, bucket_bounds)))
            .clone();

        if family.kind != kind {
            return Err(MetricError::KindMismatch {
                name: name.to_string(),
                existing: family.kind,
                requested: kind,
            });
        }
        if family.label_keys != label_keys {
            return Err(MetricError::LabelKeyMismatch {
                name: name.to_string(),
                existing: family.label_keys.clone(),
                requested: label_keys.iter().map(|k| k.to_string()).collect(),
            });
        }
        Ok(family)
    }

    /// Point-in-time view of every series, sorted by metric name and label
    /// values. Each series is read under its own brief critical section, so
    /// a scrape never blocks concurrent observations for long.
    pub fn snapshot(&self) -> Vec<MetricSnapshot> {
        let mut families: Vec<Arc<MetricFamily>> =
            self.families.iter().map(|entry| entry.value().clone()).collect();
        families.sort_by(|a, b| a.name.cmp(&b.name));
        families.iter().map(|family| family.snapshot()).collect()
    }
}

impl Default for MetricRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn warn_dropped(family: &MetricFamily, err: &MetricError) {
    tracing::warn!(metric = family.name(), %err, "dropped observation");
}

/// Handle to a counter family. Cheap to clone, safe to share.
#[derive(Debug, Clone)]
pub struct Counter {
    family: Arc<MetricFamily>,
}

impl Counter {
    pub fn increment(&self, label_values: &[&str], by: u64) {
        match self.family.cell(label_values) {
            Ok(cell) => {
                if let SeriesCell::Counter(counter) = cell.as_ref() {
                    counter.add(by);
                }
            }
            Err(err) => warn_dropped(&self.family, &err),
        }
    }
}

/// Handle to a gauge family.
#[derive(Debug, Clone)]
pub struct Gauge {
    family: Arc<MetricFamily>,
}

impl Gauge {
    pub fn set(&self, label_values: &[&str], value: f64) {
        match self.family.cell(label_values) {
            Ok(cell) => {
                if let SeriesCell::Gauge(gauge) = cell.as_ref() {
                    gauge.set(value);
                }
            }
            Err(err) => warn_dropped(&self.family, &err),
        }
    }

    pub fn add(&self, label_values: &[&str], delta: f64) {
        match self.family.cell(label_values) {
            Ok(cell) => {
                if let SeriesCell::Gauge(gauge) = cell.as_ref() {
                    gauge.add(delta);
                }
            }
            Err(err) => warn_dropped(&self.family, &err),
        }
    }

    pub fn decrement(&self, label_values: &[&str], delta: f64) {
        self.add(label_values, -delta);
    }
}

/// Handle to a histogram family.
#[derive(Debug, Clone)]
pub struct Histogram {
    family: Arc<MetricFamily>,
}

impl Histogram {
    pub fn observe(&self, label_values: &[&str], value: f64) {
        match self.family.cell(label_values) {
            Ok(cell) => {
                if let SeriesCell::Histogram(histogram) = cell.as_ref() {
                    histogram.observe(&self.family.bucket_bounds, value);
                }
            }
            Err(err) => warn_dropped(&self.family, &err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_sums_concurrent_increments() {
        let registry = Arc::new(MetricRegistry::new());
        let counter = registry.counter("jobs_total", &["queue"]).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.increment(&["default"], 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = registry.snapshot();
        let series = &snapshot[0].series[0];
        assert_eq!(series.labels, vec![("queue".into(), "default".into())]);
        match series.value {
            SeriesValue::Counter(v) => assert_eq!(v, 8000),
            _ => panic!("expected counter"),
        }
    }

    #[test]
    fn reregistering_with_same_shape_is_idempotent() {
        let registry = MetricRegistry::new();
        registry.counter("events_total", &["kind"]).unwrap();
        registry.counter("events_total", &["kind"]).unwrap();
        assert_eq!(registry.snapshot().len(), 1);
    }

    #[test]
    fn kind_mismatch_is_rejected() {
        let registry = MetricRegistry::new();
        registry.counter("events_total", &[]).unwrap();
        let err = registry.gauge("events_total", &[]).unwrap_err();
        assert!(matches!(err, MetricError::KindMismatch { .. }));
    }

    #[test]
    fn label_key_mismatch_is_rejected() {
        let registry = MetricRegistry::new();
        registry.counter("events_total", &["kind"]).unwrap();
        let err = registry.counter("events_total", &["type"]).unwrap_err();
        assert!(matches!(err, MetricError::LabelKeyMismatch { .. }));
    }

    #[test]
    fn wrong_arity_observation_is_dropped() {
        let registry = MetricRegistry::new();
        let counter = registry.counter("events_total", &["kind"]).unwrap();
        counter.increment(&["a", "b"], 1);
        assert!(registry.snapshot()[0].series.is_empty());
    }

    #[test]
    fn distinct_label_values_are_distinct_series() {
        let registry = MetricRegistry::new();
        let counter = registry.counter("events_total", &["kind"]).unwrap();
        counter.increment(&["create"], 2);
        counter.increment(&["delete"], 3);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot[0].series.len(), 2);
        // Sorted by label values.
        assert_eq!(snapshot[0].series[0].labels[0].1, "create");
        assert_eq!(snapshot[0].series[1].labels[0].1, "delete");
    }

    #[test]
    fn gauge_supports_set_add_decrement() {
        let registry = MetricRegistry::new();
        let gauge = registry.gauge("connections_active", &[]).unwrap();
        gauge.set(&[], 5.0);
        gauge.add(&[], 2.0);
        gauge.decrement(&[], 3.0);

        match registry.snapshot()[0].series[0].value {
            SeriesValue::Gauge(v) => assert_eq!(v, 4.0),
            _ => panic!("expected gauge"),
        }
    }

    #[test]
    fn histogram_snapshot_is_internally_consistent_under_load() {
        let registry = Arc::new(MetricRegistry::new());
        let histogram = registry
            .histogram("latency_seconds", &["op"], &[0.5, 1.0, 2.0])
            .unwrap();

        let writers: Vec<_> = (0..4)
            .map(|_| {
                let histogram = histogram.clone();
                std::thread::spawn(move || {
                    for _ in 0..250 {
                        histogram.observe(&["read"], 1.0);
                    }
                })
            })
            .collect();

        // Snapshot while writers are running; every view must be consistent.
        for _ in 0..50 {
            for family in registry.snapshot() {
                for series in &family.series {
                    if let SeriesValue::Histogram(h) = &series.value {
                        for pair in h.buckets.windows(2) {
                            assert!(pair[0].1 <= pair[1].1, "buckets must be cumulative");
                        }
                        assert_eq!(h.buckets.last().unwrap().1, h.count);
                        // Every observation is 1.0, so sum tracks count exactly.
                        assert_eq!(h.sum, h.count as f64);
                    }
                }
            }
        }
        for writer in writers {
            writer.join().unwrap();
        }

        let snapshot = registry.snapshot();
        if let SeriesValue::Histogram(h) = &snapshot[0].series[0].value {
            assert_eq!(h.count, 1000);
            assert_eq!(h.buckets, vec![(0.5, 0), (1.0, 1000), (2.0, 1000), (f64::INFINITY, 1000)]);
        } else {
            panic!("expected histogram");
        }
    }

    #[test]
    fn histogram_bounds_are_sorted_and_deduped() {
        let registry = MetricRegistry::new();
        let histogram = registry
            .histogram("latency_seconds", &[], &[2.0, 0.5, 0.5, 1.0])
            .unwrap();
        histogram.observe(&[], 0.7);

        if let SeriesValue::Histogram(h) = &registry.snapshot()[0].series[0].value {
            let bounds: Vec<f64> = h.buckets.iter().map(|(b, _)| *b).collect();
            assert_eq!(bounds, vec![0.5, 1.0, 2.0, f64::INFINITY]);
        } else {
            panic!("expected histogram");
        }
    }
}
