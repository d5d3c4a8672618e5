use std::io::Write;

use rama::telemetry::tracing;

use super::{Counters, Reporter, RequestResultEvent, Summary, millis};

pub struct HumanReporter<W = std::io::Stdout> {
    interval: std::time::Duration,
    last_tick: std::time::Duration,
    interval_counts: Counters,
    writer: W,
}

impl HumanReporter {
    pub fn new(interval: std::time::Duration) -> Self {
        Self::with_writer(interval, std::io::stdout())
    }
}

impl<W: Write + Send + Sync + 'static> HumanReporter<W> {
    pub fn with_writer(interval: std::time::Duration, writer: W) -> Self {
        Self {
            interval,
            last_tick: std::time::Duration::ZERO,
            interval_counts: Counters::default(),
            writer,
        }
    }

    #[cfg(test)]
    pub fn into_writer(self) -> W {
        self.writer
    }

    fn emit(&mut self, line: std::fmt::Arguments<'_>) {
        if let Err(err) = writeln!(self.writer, "{line}") {
            tracing::debug!("failed to write human report line: {err}");
        }
    }
}

impl<W: Write + Send + Sync + 'static> Reporter for HumanReporter<W> {
    fn on_result(&mut self, ev: &RequestResultEvent) {
        self.interval_counts.apply(&ev.result);
    }

    fn on_tick(&mut self, now: std::time::Duration, summary: &Summary) {
        if now.saturating_sub(self.last_tick) < self.interval {
            return;
        }
        let interval = now.saturating_sub(self.last_tick);
        self.last_tick = now;

        let rps = self.interval_counts.total as f64 / interval.as_secs_f64();
        let counts = self.interval_counts;

        self.emit(format_args!(
            "t={:.1}s rps={:.1} ok={} http_fail={} other_fail={} total_ok={} total_fail={}",
            now.as_secs_f64(),
            rps,
            counts.ok,
            counts.http_fail,
            counts.other_fail,
            summary.counters.ok,
            summary.counters.failed(),
        ));

        self.interval_counts = Counters::default();
    }

    fn finish(&mut self, summary: &Summary) {
        self.emit(format_args!(
            "checks: {:.2}% ✓ {} ✗ {}",
            summary.check_pass_rate() * 100.,
            summary.counters.ok,
            summary.counters.failed(),
        ));
        for (name, tally) in summary.checks.iter() {
            let mark = if tally.failed == 0 { '✓' } else { '✗' };
            self.emit(format_args!(
                "  {mark} {name}: {:.2}% ✓ {} ✗ {}",
                tally.pass_rate() * 100.,
                tally.passed,
                tally.failed,
            ));
        }

        match summary.latency.snapshot() {
            Some(l) => self.emit(format_args!(
                "latency: avg={:.2}ms min={:.2}ms med={:.2}ms max={:.2}ms p(90)={:.2}ms p(95)={:.2}ms",
                millis(l.avg),
                millis(l.min),
                millis(l.med),
                millis(l.max),
                millis(l.p90),
                millis(l.p95),
            )),
            None => self.emit(format_args!("latency: no responses received")),
        }

        self.emit(format_args!(
            "done vus={} duration={:.1}s rps={:.2} ok={} http_fail={} other_fail={} total={}",
            summary.vus,
            summary.elapsed.as_secs_f64(),
            summary.request_rate(),
            summary.counters.ok,
            summary.counters.http_fail,
            summary.counters.other_fail,
            summary.counters.total,
        ));
    }
}
