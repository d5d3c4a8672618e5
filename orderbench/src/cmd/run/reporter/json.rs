use std::io::Write;

use orderbench_lib::check::FailureKind;
use rama::telemetry::tracing;

use super::{Counters, Reporter, RequestResultEvent, Summary, millis};

/// Reports as JSON lines: one `event` per result (optional),
/// one `summary` per interval and a `final` summary.
pub struct JsonlReporter<W = std::io::Stdout> {
    interval: std::time::Duration,
    last_tick: std::time::Duration,
    interval_counts: Counters,
    emit_events: bool,
    writer: W,
}

impl JsonlReporter {
    pub fn new(interval: std::time::Duration, emit_events: bool) -> Self {
        Self::with_writer(interval, emit_events, std::io::stdout())
    }
}

impl<W: Write + Send + Sync + 'static> JsonlReporter<W> {
    pub fn with_writer(interval: std::time::Duration, emit_events: bool, writer: W) -> Self {
        Self {
            interval,
            last_tick: std::time::Duration::ZERO,
            interval_counts: Counters::default(),
            emit_events,
            writer,
        }
    }

    #[cfg(test)]
    pub fn into_writer(self) -> W {
        self.writer
    }

    fn emit(&mut self, line: serde_json::Value) {
        if let Err(err) = writeln!(self.writer, "{line}") {
            tracing::debug!("failed to write json report line: {err}");
        }
    }
}

fn counters_json(c: &Counters) -> serde_json::Value {
    serde_json::json!({
        "total": c.total,
        "ok": c.ok,
        "http_fail": c.http_fail,
        "other_fail": c.other_fail,
    })
}

impl<W: Write + Send + Sync + 'static> Reporter for JsonlReporter<W> {
    fn on_result(&mut self, ev: &RequestResultEvent) {
        self.interval_counts.apply(&ev.result);

        if self.emit_events {
            let line = serde_json::json!({
                "type": "event",
                "t_ms": ev.elapsed.as_millis(),
                "check": ev.result.check.name,
                "ok": ev.result.check.passed,
                "latency_ms": millis(ev.result.latency),
                "status": ev.result.status,
                "failure": match ev.result.failure {
                    Some(FailureKind::HttpStatus) => Some("http_status"),
                    Some(FailureKind::Transport) => Some("transport"),
                    None => None,
                },
            });
            self.emit(line);
        }
    }

    fn on_tick(&mut self, now: std::time::Duration, summary: &Summary) {
        if now.saturating_sub(self.last_tick) < self.interval {
            return;
        }
        let interval = now.saturating_sub(self.last_tick);
        self.last_tick = now;

        let line = serde_json::json!({
            "type": "summary",
            "t_ms": now.as_millis(),
            "interval_ms": interval.as_millis(),
            "rps": self.interval_counts.total as f64 / interval.as_secs_f64(),
            "interval": counters_json(&self.interval_counts),
            "total": counters_json(&summary.counters),
        });
        self.emit(line);

        self.interval_counts = Counters::default();
    }

    fn finish(&mut self, summary: &Summary) {
        let checks: serde_json::Map<String, serde_json::Value> = summary
            .checks
            .iter()
            .map(|(name, tally)| {
                (
                    name.to_string(),
                    serde_json::json!({
                        "passed": tally.passed,
                        "failed": tally.failed,
                        "pass_rate": tally.pass_rate(),
                    }),
                )
            })
            .collect();

        let latency = summary.latency.snapshot().map(|l| {
            serde_json::json!({
                "count": summary.latency.count(),
                "avg_ms": millis(l.avg),
                "min_ms": millis(l.min),
                "med_ms": millis(l.med),
                "max_ms": millis(l.max),
                "p90_ms": millis(l.p90),
                "p95_ms": millis(l.p95),
            })
        });

        let line = serde_json::json!({
            "type": "final",
            "vus": summary.vus,
            "duration_ms": summary.elapsed.as_millis(),
            "rps": summary.request_rate(),
            "checks": checks,
            "latency": latency,
            "total": counters_json(&summary.counters),
        });
        self.emit(line);
    }
}
