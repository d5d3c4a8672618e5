use std::{collections::BTreeMap, time::Duration};

use orderbench_lib::check::{FailureKind, IterationResult};

mod human;
mod json;

pub use self::{human::HumanReporter, json::JsonlReporter};

pub trait Reporter: Send + Sync + 'static {
    fn on_result(&mut self, ev: &RequestResultEvent);
    fn on_tick(&mut self, now: Duration, summary: &Summary);
    fn finish(&mut self, summary: &Summary);
}

#[derive(Debug)]
pub struct RequestResultEvent {
    /// time since the start of the run
    pub elapsed: Duration,
    pub result: IterationResult,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub total: u64,
    pub ok: u64,
    pub http_fail: u64,
    pub other_fail: u64,
}

impl Counters {
    pub fn apply(&mut self, result: &IterationResult) {
        self.total += 1;
        if result.check.passed {
            self.ok += 1;
            return;
        }
        match result.failure {
            Some(FailureKind::HttpStatus) => self.http_fail += 1,
            _ => self.other_fail += 1,
        }
    }

    pub fn failed(&self) -> u64 {
        self.total - self.ok
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckTally {
    pub passed: u64,
    pub failed: u64,
}

impl CheckTally {
    pub fn pass_rate(&self) -> f64 {
        let total = self.passed + self.failed;
        if total == 0 {
            0.
        } else {
            self.passed as f64 / total as f64
        }
    }
}

/// Max amount of latency samples kept for the percentiles.
const MAX_LATENCY_SAMPLES: usize = 100_000;

/// Latency aggregate of a run.
///
/// Count, sum, min and max are exact. Percentiles are computed over
/// a uniform reservoir sample once more than `capacity` latencies were
/// recorded, and are exact below that.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    capacity: usize,
    count: u64,
    sum: Duration,
    min: Duration,
    max: Duration,
    samples: Vec<Duration>,
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self::with_capacity(MAX_LATENCY_SAMPLES)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencySnapshot {
    pub avg: Duration,
    pub min: Duration,
    pub med: Duration,
    pub max: Duration,
    pub p90: Duration,
    pub p95: Duration,
}

impl LatencyStats {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            count: 0,
            sum: Duration::ZERO,
            min: Duration::MAX,
            max: Duration::ZERO,
            samples: Vec::new(),
        }
    }

    pub fn push(&mut self, latency: Duration) {
        self.count += 1;
        self.sum = self.sum.saturating_add(latency);
        self.min = self.min.min(latency);
        self.max = self.max.max(latency);

        if self.samples.len() < self.capacity {
            self.samples.push(latency);
            return;
        }
        // algorithm R: keep each latency with probability capacity / count
        let idx = rand::random_range(0..self.count);
        if let Some(slot) = usize::try_from(idx)
            .ok()
            .and_then(|idx| self.samples.get_mut(idx))
        {
            *slot = latency;
        }
    }

    /// Amount of latencies recorded, including the ones not sampled.
    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn snapshot(&self) -> Option<LatencySnapshot> {
        if self.count == 0 {
            return None;
        }

        let mut sorted = self.samples.clone();
        sorted.sort_unstable();

        let avg_nanos = self.sum.as_nanos() / u128::from(self.count);
        Some(LatencySnapshot {
            avg: Duration::from_nanos(u64::try_from(avg_nanos).unwrap_or(u64::MAX)),
            min: self.min,
            med: nearest_rank(&sorted, 0.5),
            max: self.max,
            p90: nearest_rank(&sorted, 0.9),
            p95: nearest_rank(&sorted, 0.95),
        })
    }
}

fn nearest_rank(sorted: &[Duration], q: f64) -> Duration {
    let rank = (q * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Aggregate statistics of a run, owned by the harness.
#[derive(Debug, Clone, Default)]
pub struct Summary {
    pub vus: usize,
    pub elapsed: Duration,
    pub counters: Counters,
    pub checks: BTreeMap<&'static str, CheckTally>,
    pub latency: LatencyStats,
}

impl Summary {
    pub fn new(vus: usize) -> Self {
        Self {
            vus,
            ..Default::default()
        }
    }

    pub fn record(&mut self, result: &IterationResult) {
        self.counters.apply(result);

        let tally = self.checks.entry(result.check.name).or_default();
        if result.check.passed {
            tally.passed += 1;
        } else {
            tally.failed += 1;
        }

        // latency is only meaningful for requests which got a response
        if result.status.is_some() {
            self.latency.push(result.latency);
        }
    }

    pub fn check_pass_rate(&self) -> f64 {
        let (passed, total) = self
            .checks
            .values()
            .fold((0, 0), |(p, t), c| (p + c.passed, t + c.passed + c.failed));
        if total == 0 {
            0.
        } else {
            passed as f64 / total as f64
        }
    }

    pub fn request_rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs == 0. {
            0.
        } else {
            self.counters.total as f64 / secs
        }
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.
}
