//! Run-wide metrics sink
//!
//! Every virtual user writes into one shared [`MetricsSink`]. Samples are
//! aggregated per metric name according to the statistical kind declared on
//! first use: counters sum, rates count passes over attempts, trends keep an
//! HDR histogram of durations. Aggregation is associative, so the order in
//! which concurrent writers land does not matter.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use hdrhistogram::Histogram;
use parking_lot::{Mutex, RwLock};
use prometheus::{Encoder, Gauge, GaugeVec, Opts, Registry, TextEncoder};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::client::HttpOutcome;
use crate::error::Result;

/// Built-in metric names
pub mod names {
    pub const AUTH_RESPONSE_TIME: &str = "auth_response_time";
    pub const PUBLIC_VIDEOS_RESPONSE_TIME: &str = "public_videos_response_time";
    pub const RANKINGS_RESPONSE_TIME: &str = "rankings_response_time";
    pub const MY_VIDEOS_RESPONSE_TIME: &str = "my_videos_response_time";
    pub const VOTE_RESPONSE_TIME: &str = "vote_response_time";
    pub const VIDEO_UPLOAD_RESPONSE_TIME: &str = "video_upload_response_time";
    pub const VIDEO_DOWNLOAD_RESPONSE_TIME: &str = "video_download_response_time";
    pub const NEW_USER_RESPONSE_TIME: &str = "new_user_response_time";
    pub const DELETE_VIDEO_RESPONSE_TIME: &str = "delete_video_response_time";
    pub const HTTP_REQ_DURATION: &str = "http_req_duration";

    pub const CHECKS: &str = "checks";
    pub const HTTP_REQ_FAILED: &str = "http_req_failed";
    pub const VOTE_SUCCESS_RATE: &str = "vote_success_rate";
    pub const VIDEO_UPLOAD_SUCCESS_RATE: &str = "video_upload_success_rate";
    pub const VIDEO_DOWNLOAD_SUCCESS_RATE: &str = "video_download_success_rate";
    pub const NEW_USER_SUCCESS_RATE: &str = "new_user_success_rate";

    pub const HTTP_REQS: &str = "http_reqs";
    pub const ITERATIONS: &str = "iterations";
    pub const SCENARIO_COUNT: &str = "scenario_count";
    pub const SCENARIO_SKIPPED: &str = "scenario_skipped";
    pub const USERS_CREATED: &str = "users_created";
    pub const VOTES_CAST: &str = "votes_cast";
    pub const VOTES_DUPLICATE: &str = "votes_duplicate";
    pub const VIDEOS_UPLOADED: &str = "videos_uploaded";
    pub const VIDEOS_DELETED: &str = "videos_deleted";
    pub const IDENTITY_UNAUTHENTICATED: &str = "identity_unauthenticated";
    pub const DATA_RECEIVED: &str = "data_received";
}

/// Statistical kind of a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Cumulative sum
    Counter,
    /// Fraction of non-zero samples over all samples
    Rate,
    /// Distribution of durations in milliseconds
    Trend,
}

/// A single write-once observation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSample {
    pub name: String,
    pub kind: MetricKind,
    pub value: f64,
    pub timestamp: DateTime<Utc>,
    pub tags: BTreeMap<String, String>,
}

impl MetricSample {
    pub fn new(name: impl Into<String>, kind: MetricKind, value: f64) -> Self {
        Self {
            name: name.into(),
            kind,
            value,
            timestamp: Utc::now(),
            tags: BTreeMap::new(),
        }
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// 1µs to 1h at 3 significant digits
const TREND_MAX_US: u64 = 3_600_000_000;

enum Aggregate {
    Counter {
        total: f64,
        by_tag: BTreeMap<String, f64>,
    },
    Rate {
        passes: u64,
        total: u64,
        by_tag: BTreeMap<String, (u64, u64)>,
    },
    Trend(Box<Histogram<u64>>),
}

impl Aggregate {
    fn new(kind: MetricKind) -> Option<Self> {
        match kind {
            MetricKind::Counter => Some(Self::Counter {
                total: 0.0,
                by_tag: BTreeMap::new(),
            }),
            MetricKind::Rate => Some(Self::Rate {
                passes: 0,
                total: 0,
                by_tag: BTreeMap::new(),
            }),
            MetricKind::Trend => match Histogram::new_with_bounds(1, TREND_MAX_US, 3) {
                Ok(hist) => Some(Self::Trend(Box::new(hist))),
                Err(e) => {
                    warn!("Failed to create trend histogram: {}", e);
                    None
                }
            },
        }
    }

    fn kind(&self) -> MetricKind {
        match self {
            Self::Counter { .. } => MetricKind::Counter,
            Self::Rate { .. } => MetricKind::Rate,
            Self::Trend(_) => MetricKind::Trend,
        }
    }

    fn add(&mut self, value: f64, tag_key: Option<&str>) {
        match self {
            Self::Counter { total, by_tag } => {
                *total += value;
                if let Some(key) = tag_key {
                    *by_tag.entry(key.to_string()).or_insert(0.0) += value;
                }
            }
            Self::Rate {
                passes,
                total,
                by_tag,
            } => {
                let passed = value != 0.0;
                *total += 1;
                if passed {
                    *passes += 1;
                }
                if let Some(key) = tag_key {
                    let entry = by_tag.entry(key.to_string()).or_insert((0, 0));
                    entry.1 += 1;
                    if passed {
                        entry.0 += 1;
                    }
                }
            }
            Self::Trend(hist) => {
                let micros = (value.max(0.0) * 1000.0).round() as u64;
                hist.saturating_record(micros.clamp(1, TREND_MAX_US));
            }
        }
    }
}

/// Concurrent, append-only metrics aggregation
pub struct MetricsSink {
    prefix: Option<String>,
    series: RwLock<HashMap<String, Arc<Mutex<Aggregate>>>>,
    started_at: DateTime<Utc>,
    start: Instant,
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink {
    pub fn new() -> Self {
        Self {
            prefix: None,
            series: RwLock::new(HashMap::new()),
            started_at: Utc::now(),
            start: Instant::now(),
        }
    }

    /// Sink whose exported names carry `prefix`
    pub fn with_prefix(prefix: Option<String>) -> Self {
        Self {
            prefix: prefix.filter(|p| !p.is_empty()),
            ..Self::new()
        }
    }

    /// Record one observation of `name`.
    ///
    /// The first sample for a name fixes its kind; later samples of a
    /// different kind are dropped with a warning.
    pub fn record(&self, name: &str, kind: MetricKind, value: f64, tags: &[(&str, &str)]) {
        let Some(series) = self.series_for(name, kind) else {
            return;
        };

        let tag_key = (!tags.is_empty()).then(|| {
            tags.iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(",")
        });

        let mut aggregate = series.lock();
        if aggregate.kind() != kind {
            warn!(
                metric = name,
                "Dropping {:?} sample for metric declared as {:?}",
                kind,
                aggregate.kind()
            );
            return;
        }
        aggregate.add(value, tag_key.as_deref());
    }

    /// Record a prepared sample
    pub fn record_sample(&self, sample: &MetricSample) {
        let tags: Vec<(&str, &str)> = sample
            .tags
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        self.record(&sample.name, sample.kind, sample.value, &tags);
    }

    /// Add to a counter
    pub fn add(&self, name: &str, value: f64, tags: &[(&str, &str)]) {
        self.record(name, MetricKind::Counter, value, tags);
    }

    /// Record one pass/fail attempt on a rate
    pub fn rate(&self, name: &str, passed: bool, tags: &[(&str, &str)]) {
        self.record(name, MetricKind::Rate, if passed { 1.0 } else { 0.0 }, tags);
    }

    /// Record a duration on a trend
    pub fn trend(&self, name: &str, duration: Duration, tags: &[(&str, &str)]) {
        self.record(name, MetricKind::Trend, duration.as_secs_f64() * 1000.0, tags);
    }

    /// Record the standard samples of one HTTP call: the endpoint's latency
    /// trend, the global request duration, failure rate and request count.
    ///
    /// `ok` is the caller's verdict; a 409 on a vote may count as ok.
    pub fn record_http(&self, outcome: &HttpOutcome, ok: bool, tags: &[(&str, &str)]) {
        self.record_http_as(outcome.endpoint.trend_name(), outcome, ok, tags);
    }

    /// Like [`record_http`](Self::record_http) but reporting latency into `trend`
    pub fn record_http_as(&self, trend: &str, outcome: &HttpOutcome, ok: bool, tags: &[(&str, &str)]) {
        self.trend(trend, outcome.latency, tags);
        self.trend(names::HTTP_REQ_DURATION, outcome.latency, &[]);
        self.rate(names::HTTP_REQ_FAILED, !ok, &[]);
        self.add(names::HTTP_REQS, 1.0, &[]);
        if outcome.bytes_received > 0 {
            self.add(names::DATA_RECEIVED, outcome.bytes_received as f64, &[]);
        }
    }

    /// Record a named check on the `checks` rate. Failures are logged with
    /// the status code and the scenario that ran the call.
    pub fn check(&self, scenario: &str, check: &str, passed: bool, outcome: &HttpOutcome) -> bool {
        self.rate(names::CHECKS, passed, &[("check", check)]);
        if !passed {
            warn!(
                scenario,
                endpoint = %outcome.endpoint,
                status = %outcome.describe(),
                latency_ms = outcome.latency.as_millis() as u64,
                "Check failed: {}",
                check
            );
        }
        passed
    }

    fn series_for(&self, name: &str, kind: MetricKind) -> Option<Arc<Mutex<Aggregate>>> {
        if let Some(series) = self.series.read().get(name) {
            return Some(series.clone());
        }

        let mut series = self.series.write();
        if let Some(existing) = series.get(name) {
            return Some(existing.clone());
        }
        let created = Arc::new(Mutex::new(Aggregate::new(kind)?));
        series.insert(name.to_string(), created.clone());
        Some(created)
    }

    /// Aggregated view of everything recorded so far
    pub fn snapshot(&self) -> MetricsSnapshot {
        let elapsed_secs = self.start.elapsed().as_secs_f64();
        let mut snapshot = MetricsSnapshot {
            prefix: self.prefix.clone(),
            started_at: self.started_at,
            elapsed_secs,
            counters: BTreeMap::new(),
            rates: BTreeMap::new(),
            trends: BTreeMap::new(),
        };

        let series = self.series.read();
        for (name, aggregate) in series.iter() {
            match &*aggregate.lock() {
                Aggregate::Counter { total, by_tag } => {
                    snapshot.counters.insert(
                        name.clone(),
                        CounterSummary {
                            total: *total,
                            per_second: if elapsed_secs > 0.0 {
                                total / elapsed_secs
                            } else {
                                0.0
                            },
                            by_tag: by_tag.clone(),
                        },
                    );
                }
                Aggregate::Rate {
                    passes,
                    total,
                    by_tag,
                } => {
                    snapshot.rates.insert(
                        name.clone(),
                        RateSummary {
                            passes: *passes,
                            fails: total - passes,
                            total: *total,
                            rate: ratio(*passes, *total),
                            by_tag: by_tag
                                .iter()
                                .map(|(k, (p, t))| {
                                    (
                                        k.clone(),
                                        RateBreakdown {
                                            passes: *p,
                                            total: *t,
                                        },
                                    )
                                })
                                .collect(),
                        },
                    );
                }
                Aggregate::Trend(hist) => {
                    snapshot
                        .trends
                        .insert(name.clone(), TrendSummary::from_histogram(hist));
                }
            }
        }

        snapshot
    }
}

fn ratio(passes: u64, total: u64) -> f64 {
    if total > 0 {
        passes as f64 / total as f64
    } else {
        0.0
    }
}

/// Counter summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterSummary {
    pub total: f64,
    pub per_second: f64,
    pub by_tag: BTreeMap<String, f64>,
}

/// Passes/attempts for one tag value
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateBreakdown {
    pub passes: u64,
    pub total: u64,
}

/// Rate summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateSummary {
    pub passes: u64,
    pub fails: u64,
    pub total: u64,
    pub rate: f64,
    pub by_tag: BTreeMap<String, RateBreakdown>,
}

/// Trend summary, all values in milliseconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrendSummary {
    pub count: u64,
    pub min_ms: f64,
    pub avg_ms: f64,
    pub p50_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl TrendSummary {
    fn from_histogram(hist: &Histogram<u64>) -> Self {
        let ms = |us: u64| us as f64 / 1000.0;
        if hist.is_empty() {
            return Self {
                count: 0,
                min_ms: 0.0,
                avg_ms: 0.0,
                p50_ms: 0.0,
                p90_ms: 0.0,
                p95_ms: 0.0,
                p99_ms: 0.0,
                max_ms: 0.0,
            };
        }
        Self {
            count: hist.len(),
            min_ms: ms(hist.min()),
            avg_ms: hist.mean() / 1000.0,
            p50_ms: ms(hist.value_at_quantile(0.50)),
            p90_ms: ms(hist.value_at_quantile(0.90)),
            p95_ms: ms(hist.value_at_quantile(0.95)),
            p99_ms: ms(hist.value_at_quantile(0.99)),
            max_ms: ms(hist.max()),
        }
    }
}

/// Point-in-time copy of all aggregates
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub prefix: Option<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub counters: BTreeMap<String, CounterSummary>,
    pub rates: BTreeMap<String, RateSummary>,
    pub trends: BTreeMap<String, TrendSummary>,
}

impl MetricsSnapshot {
    pub fn counter(&self, name: &str) -> Option<&CounterSummary> {
        self.counters.get(name)
    }

    pub fn rate(&self, name: &str) -> Option<&RateSummary> {
        self.rates.get(name)
    }

    pub fn trend(&self, name: &str) -> Option<&TrendSummary> {
        self.trends.get(name)
    }

    /// Sum of a counter, 0 when never recorded
    pub fn counter_total(&self, name: &str) -> f64 {
        self.counter(name).map(|c| c.total).unwrap_or(0.0)
    }

    /// Number of samples on a trend, 0 when never recorded
    pub fn trend_count(&self, name: &str) -> u64 {
        self.trend(name).map(|t| t.count).unwrap_or(0)
    }

    /// Name as shown to operators, with the configured prefix applied
    pub fn display_name(&self, name: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}_{}", prefix, name),
            None => name.to_string(),
        }
    }

    /// Render the snapshot in Prometheus text exposition format
    pub fn to_prometheus(&self) -> Result<String> {
        let registry = Registry::new();

        for (name, counter) in &self.counters {
            let gauge = Gauge::with_opts(Opts::new(
                sanitize(&self.display_name(name)),
                format!("Total of counter {}", name),
            ))?;
            gauge.set(counter.total);
            registry.register(Box::new(gauge))?;
        }

        for (name, rate) in &self.rates {
            let gauge = Gauge::with_opts(Opts::new(
                sanitize(&self.display_name(name)),
                format!("Pass ratio of rate {}", name),
            ))?;
            gauge.set(rate.rate);
            registry.register(Box::new(gauge))?;
        }

        for (name, trend) in &self.trends {
            let gauge = GaugeVec::new(
                Opts::new(
                    format!("{}_ms", sanitize(&self.display_name(name))),
                    format!("Distribution of trend {} in milliseconds", name),
                ),
                &["stat"],
            )?;
            for (stat, value) in [
                ("min", trend.min_ms),
                ("avg", trend.avg_ms),
                ("p50", trend.p50_ms),
                ("p90", trend.p90_ms),
                ("p95", trend.p95_ms),
                ("p99", trend.p99_ms),
                ("max", trend.max_ms),
                ("count", trend.count as f64),
            ] {
                gauge.with_label_values(&[stat]).set(value);
            }
            registry.register(Box::new(gauge))?;
        }

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == ':' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_sums_with_tag_breakdown() {
        let sink = MetricsSink::new();
        sink.add(names::SCENARIO_COUNT, 1.0, &[("scenario", "voter")]);
        sink.add(names::SCENARIO_COUNT, 1.0, &[("scenario", "voter")]);
        sink.add(names::SCENARIO_COUNT, 1.0, &[("scenario", "uploader")]);

        let snapshot = sink.snapshot();
        let counter = snapshot.counter(names::SCENARIO_COUNT).unwrap();
        assert_eq!(counter.total, 3.0);
        assert_eq!(counter.by_tag["scenario=voter"], 2.0);
        assert_eq!(counter.by_tag["scenario=uploader"], 1.0);
    }

    #[test]
    fn test_rate_counts_caller_defined_success() {
        let sink = MetricsSink::new();
        for status in [201u16, 409, 500, 201] {
            sink.rate(names::VOTE_SUCCESS_RATE, status == 201 || status == 409, &[]);
        }

        let snapshot = sink.snapshot();
        let rate = snapshot.rate(names::VOTE_SUCCESS_RATE).unwrap();
        assert_eq!(rate.total, 4);
        assert_eq!(rate.passes, 3);
        assert_eq!(rate.fails, 1);
        assert!((rate.rate - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_trend_percentiles() {
        let sink = MetricsSink::new();
        for ms in 1..=100u64 {
            sink.trend(names::AUTH_RESPONSE_TIME, Duration::from_millis(ms), &[]);
        }

        let snapshot = sink.snapshot();
        let trend = snapshot.trend(names::AUTH_RESPONSE_TIME).unwrap();
        assert_eq!(trend.count, 100);
        assert!((trend.p50_ms - 50.0).abs() < 1.0, "p50 was {}", trend.p50_ms);
        assert!((trend.p95_ms - 95.0).abs() < 1.0, "p95 was {}", trend.p95_ms);
        assert!((trend.max_ms - 100.0).abs() < 0.5, "max was {}", trend.max_ms);
        assert!((trend.min_ms - 1.0).abs() < 0.01);
    }

    #[test]
    fn test_kind_mismatch_is_dropped() {
        let sink = MetricsSink::new();
        sink.add("mixed", 1.0, &[]);
        sink.rate("mixed", true, &[]);

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.counter_total("mixed"), 1.0);
        assert!(snapshot.rate("mixed").is_none());
    }

    #[test]
    fn test_record_sample() {
        let sink = MetricsSink::new();
        let sample = MetricSample::new(names::CHECKS, MetricKind::Rate, 1.0)
            .with_tag("check", "login returns token");
        sink.record_sample(&sample);

        let snapshot = sink.snapshot();
        let checks = snapshot.rate(names::CHECKS).unwrap();
        assert_eq!(checks.by_tag["check=login returns token"].passes, 1);
    }

    #[test]
    fn test_concurrent_writers_lose_nothing() {
        let sink = Arc::new(MetricsSink::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sink = sink.clone();
                std::thread::spawn(move || {
                    for i in 0..1000u64 {
                        sink.add(names::HTTP_REQS, 1.0, &[]);
                        sink.rate(names::HTTP_REQ_FAILED, i % 10 == 0, &[]);
                        sink.trend(names::HTTP_REQ_DURATION, Duration::from_millis(i % 50 + 1), &[]);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let snapshot = sink.snapshot();
        assert_eq!(snapshot.counter_total(names::HTTP_REQS), 8000.0);
        assert_eq!(snapshot.rate(names::HTTP_REQ_FAILED).unwrap().total, 8000);
        assert_eq!(snapshot.rate(names::HTTP_REQ_FAILED).unwrap().passes, 800);
        assert_eq!(snapshot.trend_count(names::HTTP_REQ_DURATION), 8000);
    }

    #[test]
    fn test_prometheus_export_uses_prefix() {
        let sink = MetricsSink::with_prefix(Some("anb".to_string()));
        sink.add(names::VOTES_CAST, 2.0, &[]);
        sink.trend(names::VOTE_RESPONSE_TIME, Duration::from_millis(12), &[]);

        let text = sink.snapshot().to_prometheus().unwrap();
        assert!(text.contains("anb_votes_cast 2"));
        assert!(text.contains("anb_vote_response_time_ms{stat=\"p95\"}"));
    }
}
