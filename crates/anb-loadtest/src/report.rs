//! Thresholds and the end-of-run report

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{LoadTestError, Result};
use crate::metrics::{names, MetricsSnapshot};
use crate::profile::LoadStage;

/// Statistic a threshold is evaluated against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdStat {
    Avg,
    Min,
    Max,
    P50,
    P90,
    P95,
    P99,
    /// Pass ratio of a rate
    Rate,
    /// Total of a counter
    Count,
}

impl ThresholdStat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Avg => "avg",
            Self::Min => "min",
            Self::Max => "max",
            Self::P50 => "p50",
            Self::P90 => "p90",
            Self::P95 => "p95",
            Self::P99 => "p99",
            Self::Rate => "rate",
            Self::Count => "count",
        }
    }

    /// Value of this statistic for `metric`, `None` when nothing was recorded
    fn observe(&self, snapshot: &MetricsSnapshot, metric: &str) -> Option<f64> {
        match self {
            Self::Rate => snapshot
                .rate(metric)
                .filter(|r| r.total > 0)
                .map(|r| r.rate),
            Self::Count => snapshot
                .counter(metric)
                .map(|c| c.total)
                .or_else(|| snapshot.rate(metric).map(|r| r.total as f64))
                .or_else(|| snapshot.trend(metric).map(|t| t.count as f64)),
            _ => {
                let trend = snapshot.trend(metric).filter(|t| t.count > 0)?;
                Some(match self {
                    Self::Avg => trend.avg_ms,
                    Self::Min => trend.min_ms,
                    Self::Max => trend.max_ms,
                    Self::P50 => trend.p50_ms,
                    Self::P90 => trend.p90_ms,
                    Self::P95 => trend.p95_ms,
                    _ => trend.p99_ms,
                })
            }
        }
    }
}

impl fmt::Display for ThresholdStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ThresholdStat {
    type Err = LoadTestError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "p50" | "med" => Ok(Self::P50),
            "p90" => Ok(Self::P90),
            "p95" => Ok(Self::P95),
            "p99" => Ok(Self::P99),
            "rate" => Ok(Self::Rate),
            "count" => Ok(Self::Count),
            other => Err(LoadTestError::InvalidThreshold(format!(
                "unknown statistic {:?}",
                other
            ))),
        }
    }
}

/// Direction of a threshold bound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Bound {
    /// Observed value must be strictly below the limit
    Below,
    /// Observed value must be strictly above the limit
    Above,
}

/// Pass/fail criterion on one metric statistic
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Threshold {
    pub metric: String,
    pub stat: ThresholdStat,
    pub bound: Bound,
    pub value: f64,
}

impl Threshold {
    pub fn below(metric: &str, stat: ThresholdStat, value: f64) -> Self {
        Self {
            metric: metric.to_string(),
            stat,
            bound: Bound::Below,
            value,
        }
    }

    pub fn above(metric: &str, stat: ThresholdStat, value: f64) -> Self {
        Self {
            metric: metric.to_string(),
            stat,
            bound: Bound::Above,
            value,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.metric.trim().is_empty() {
            return Err(LoadTestError::InvalidThreshold(
                "threshold metric name is empty".to_string(),
            ));
        }
        if !self.value.is_finite() {
            return Err(LoadTestError::InvalidThreshold(format!(
                "{}: limit {} is not finite",
                self, self.value
            )));
        }
        if self.stat == ThresholdStat::Rate && !(0.0..=1.0).contains(&self.value) {
            return Err(LoadTestError::InvalidThreshold(format!(
                "{}: rate limits must be within [0, 1]",
                self
            )));
        }
        Ok(())
    }

    /// Check this threshold against a snapshot
    pub fn evaluate(&self, snapshot: &MetricsSnapshot) -> ThresholdResult {
        let observed = self.stat.observe(snapshot, &self.metric);
        let verdict = match observed {
            None => Verdict::NotEvaluated,
            Some(v) => {
                let passed = match self.bound {
                    Bound::Below => v < self.value,
                    Bound::Above => v > self.value,
                };
                if passed {
                    Verdict::Passed
                } else {
                    Verdict::Failed
                }
            }
        };
        ThresholdResult {
            threshold: self.to_string(),
            observed,
            verdict,
        }
    }
}

impl fmt::Display for Threshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self.bound {
            Bound::Below => '<',
            Bound::Above => '>',
        };
        write!(f, "{}:{}{}{}", self.metric, self.stat, op, self.value)
    }
}

impl FromStr for Threshold {
    type Err = LoadTestError;

    /// Parses `metric:stat<value` or `metric:stat>value`
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            LoadTestError::InvalidThreshold(format!(
                "expected metric:stat<value or metric:stat>value, got {:?}",
                s
            ))
        };
        let (metric, rest) = s.split_once(':').ok_or_else(invalid)?;
        let (stat, bound, value) = if let Some((stat, value)) = rest.split_once('<') {
            (stat, Bound::Below, value)
        } else if let Some((stat, value)) = rest.split_once('>') {
            (stat, Bound::Above, value)
        } else {
            return Err(invalid());
        };
        let value = value.trim().parse::<f64>().map_err(|_| invalid())?;

        let threshold = Self {
            metric: metric.trim().to_string(),
            stat: stat.parse()?,
            bound,
            value,
        };
        threshold.validate()?;
        Ok(threshold)
    }
}

/// Outcome of one threshold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Passed,
    Failed,
    /// The metric recorded no samples
    NotEvaluated,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThresholdResult {
    pub threshold: String,
    pub observed: Option<f64>,
    pub verdict: Verdict,
}

impl ThresholdResult {
    pub fn failed(&self) -> bool {
        self.verdict == Verdict::Failed
    }
}

/// Evaluate every threshold
pub fn evaluate_thresholds(thresholds: &[Threshold], snapshot: &MetricsSnapshot) -> Vec<ThresholdResult> {
    thresholds.iter().map(|t| t.evaluate(snapshot)).collect()
}

/// Everything a finished run reports
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub base_url: String,
    pub stages: Vec<LoadStage>,
    pub peak_vus: u64,
    /// VUs still running when the graceful stop expired
    pub aborted_vus: u64,
    pub metrics: MetricsSnapshot,
    pub thresholds: Vec<ThresholdResult>,
}

impl RunSummary {
    /// No threshold failed
    pub fn passed(&self) -> bool {
        !self.thresholds.iter().any(ThresholdResult::failed)
    }

    /// Print formatted report
    pub fn print_report(&self) {
        let m = &self.metrics;
        println!("\n╔══════════════════════════════════════════════════════════════════════╗");
        println!("║                     ANB VIDEO API LOAD TEST RESULTS                  ║");
        println!("╠══════════════════════════════════════════════════════════════════════╣");
        println!("║ Target:        {:<54}║", truncate(&self.base_url, 54));
        println!("║ Duration:      {:>10.2} seconds{:<36}║", m.elapsed_secs, "");
        println!("║ Stages:        {:>10}{:<44}║", self.stages.len(), "");
        println!("║ Peak VUs:      {:>10}{:<44}║", self.peak_vus, "");
        println!(
            "║ Iterations:    {:>10}{:<44}║",
            m.counter_total(names::ITERATIONS),
            ""
        );
        if self.aborted_vus > 0 {
            println!("║ Aborted VUs:   {:>10}{:<44}║", self.aborted_vus, "");
        }

        if !m.counters.is_empty() {
            println!("╠══════════════════════════════════════════════════════════════════════╣");
            println!("║ COUNTERS                         total        per second             ║");
            for (name, counter) in &m.counters {
                println!(
                    "║   {:<28} {:>10} {:>14.2}{:<13}║",
                    truncate(&m.display_name(name), 28),
                    counter.total,
                    counter.per_second,
                    ""
                );
                for (tag, total) in &counter.by_tag {
                    println!("║     {:<26} {:>10}{:<28}║", truncate(tag, 26), total, "");
                }
            }
        }

        if !m.rates.is_empty() {
            println!("╠══════════════════════════════════════════════════════════════════════╣");
            println!("║ RATES                            rate       passes / total           ║");
            for (name, rate) in &m.rates {
                println!(
                    "║   {:<28} {:>9.2}% {:>10} / {:<10}{:<3}║",
                    truncate(&m.display_name(name), 28),
                    rate.rate * 100.0,
                    rate.passes,
                    rate.total,
                    ""
                );
            }
        }

        if !m.trends.is_empty() {
            println!("╠══════════════════════════════════════════════════════════════════════╣");
            println!("║ TRENDS (ms)                      p50       p95       max      count  ║");
            for (name, trend) in &m.trends {
                println!(
                    "║   {:<28} {:>9.1} {:>9.1} {:>9.1} {:>9}  ║",
                    truncate(&m.display_name(name), 28),
                    trend.p50_ms,
                    trend.p95_ms,
                    trend.max_ms,
                    trend.count
                );
            }
        }

        if !self.thresholds.is_empty() {
            println!("╠══════════════════════════════════════════════════════════════════════╣");
            println!("║ THRESHOLDS                                                           ║");
            for result in &self.thresholds {
                let status = match result.verdict {
                    Verdict::Passed => "✅ PASS",
                    Verdict::Failed => "❌ FAIL",
                    Verdict::NotEvaluated => "➖ N/A ",
                };
                let observed = result
                    .observed
                    .map(|v| format!("{:.4}", v))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "║   {} {:<40} {:>14}  ║",
                    status,
                    truncate(&result.threshold, 40),
                    observed
                );
            }
        }

        println!("╚══════════════════════════════════════════════════════════════════════╝\n");
        if self.passed() {
            println!("  OVERALL: ✅ ALL THRESHOLDS PASS\n");
        } else {
            println!("  OVERALL: ❌ SOME THRESHOLDS FAILED\n");
        }
    }
}

fn truncate(s: &str, width: usize) -> String {
    if s.chars().count() <= width {
        s.to_string()
    } else {
        s.chars().take(width.saturating_sub(1)).chain(['…']).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSink;
    use std::time::Duration;

    fn snapshot() -> MetricsSnapshot {
        let sink = MetricsSink::new();
        for ms in [100, 200, 300, 400, 2500] {
            sink.trend(names::HTTP_REQ_DURATION, Duration::from_millis(ms), &[]);
        }
        for i in 0..100 {
            sink.rate(names::HTTP_REQ_FAILED, i == 0, &[]);
        }
        sink.add(names::ITERATIONS, 5.0, &[]);
        sink.snapshot()
    }

    #[test]
    fn test_parse_threshold() {
        let t: Threshold = "http_req_duration:p95<2000".parse().unwrap();
        assert_eq!(t, Threshold::below("http_req_duration", ThresholdStat::P95, 2000.0));
        assert_eq!(t.to_string(), "http_req_duration:p95<2000");

        let t: Threshold = "iterations:count>0".parse().unwrap();
        assert_eq!(t.bound, Bound::Above);

        assert!("http_req_duration<2000".parse::<Threshold>().is_err());
        assert!("http_req_duration:p42<2000".parse::<Threshold>().is_err());
        assert!("http_req_failed:rate<1.5".parse::<Threshold>().is_err());
        assert!("http_req_failed:rate<abc".parse::<Threshold>().is_err());
    }

    #[test]
    fn test_evaluate_against_snapshot() {
        let snapshot = snapshot();

        let p95 = Threshold::below(names::HTTP_REQ_DURATION, ThresholdStat::P95, 2000.0);
        assert_eq!(p95.evaluate(&snapshot).verdict, Verdict::Failed);

        let p50 = Threshold::below(names::HTTP_REQ_DURATION, ThresholdStat::P50, 2000.0);
        assert_eq!(p50.evaluate(&snapshot).verdict, Verdict::Passed);

        let failed = Threshold::below(names::HTTP_REQ_FAILED, ThresholdStat::Rate, 0.02);
        let result = failed.evaluate(&snapshot);
        assert_eq!(result.verdict, Verdict::Passed);
        assert!((result.observed.unwrap() - 0.01).abs() < 1e-9);

        let iterations = Threshold::above(names::ITERATIONS, ThresholdStat::Count, 0.0);
        assert_eq!(iterations.evaluate(&snapshot).verdict, Verdict::Passed);
    }

    #[test]
    fn test_missing_metric_is_not_evaluated() {
        let snapshot = MetricsSink::new().snapshot();
        let t = Threshold::below(names::VOTE_RESPONSE_TIME, ThresholdStat::P95, 1000.0);
        let result = t.evaluate(&snapshot);
        assert_eq!(result.verdict, Verdict::NotEvaluated);
        assert!(!result.failed());
    }

    #[test]
    fn test_summary_passes_only_without_failures() {
        let snapshot = snapshot();
        let mut summary = RunSummary {
            base_url: "http://localhost:8080".to_string(),
            stages: Vec::new(),
            peak_vus: 0,
            aborted_vus: 0,
            thresholds: evaluate_thresholds(
                &[Threshold::below(names::HTTP_REQ_DURATION, ThresholdStat::P50, 2000.0)],
                &snapshot,
            ),
            metrics: snapshot.clone(),
        };
        assert!(summary.passed());

        summary.thresholds = evaluate_thresholds(
            &[Threshold::below(names::HTTP_REQ_DURATION, ThresholdStat::Max, 1000.0)],
            &snapshot,
        );
        assert!(!summary.passed());
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("abcdefghij", 5).chars().count(), 5);
    }
}
