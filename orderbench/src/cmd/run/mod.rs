use std::{num::NonZeroUsize, sync::Arc};

use rama::{
    Service,
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::{Request, Response},
    telemetry::tracing::{self, Instrument as _},
};

use clap::Args;
use orderbench_lib::{
    check::CheckSink,
    client::new_web_client,
    config::{API_BASE_ENV, ApiBase, RunConfig},
    idempotency::KeyGenerator,
    iteration::OrderIteration,
};
use tokio::time::{Duration, Instant};

pub mod reporter;

use self::reporter::*;

const REPORT_INTERVAL: Duration = Duration::from_secs(1);
/// Upper bound of results buffered between the virtual users and the reporter.
const MAX_RESULT_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, Args)]
/// run the order-entry load test
pub struct RunCommand {
    /// base url of the order-entry api (e.g. http://127.0.0.1:8080)
    #[arg(long, value_name = "URL", env = API_BASE_ENV)]
    api_base: ApiBase,

    /// number of concurrent virtual users
    #[arg(long, default_value_t = 5)]
    vus: usize,

    /// total duration of the run
    #[arg(long, default_value = "30s")]
    duration: humantime::Duration,

    /// pause at the end of each iteration
    #[arg(long, default_value = "1s")]
    pause: humantime::Duration,

    /// timeout of a single order request
    #[arg(long, default_value = "60s")]
    timeout: humantime::Duration,

    /// time in-flight iterations get to finish once the duration elapsed
    #[arg(long, default_value = "30s")]
    graceful_stop: humantime::Duration,

    /// report json lines instead of a human-friendly format
    #[arg(long, default_value_t = false)]
    json: bool,
}

pub async fn exec(guard: ShutdownGuard, args: RunCommand) -> Result<(), BoxError> {
    let cfg = RunConfig::try_new(args.api_base, args.vus, args.duration.into())
        .context("create run config")?
        .with_pause(args.pause.into())
        .with_graceful_stop(args.graceful_stop.into())
        .with_request_timeout(args.timeout.into())
        .context("set request timeout")?;

    tracing::info!(%cfg, "run config ready");

    let client = new_web_client(cfg.request_timeout);
    let iteration =
        Arc::new(OrderIteration::try_new(&cfg, client).context("create order iteration")?);

    tracing::info!(target = %iteration.target(), "start load test");

    let mut reporter: Box<dyn Reporter> = if args.json {
        const EMIT_EVENTS: bool = true;
        Box::new(JsonlReporter::new(REPORT_INTERVAL, EMIT_EVENTS))
    } else {
        Box::new(HumanReporter::new(REPORT_INTERVAL))
    };

    let summary = drive(guard, &cfg, iteration, reporter.as_mut()).await;

    tracing::info!(
        total = summary.counters.total,
        ok = summary.counters.ok,
        failed = summary.counters.failed(),
        "load test finished",
    );

    Ok(())
}

/// Run `cfg.vus` virtual users until the run duration elapsed,
/// feeding every recorded result into the reporter.
///
/// Returns once all virtual users stopped.
pub(crate) async fn drive<S, G>(
    guard: ShutdownGuard,
    cfg: &RunConfig,
    iteration: Arc<OrderIteration<S, G>>,
    reporter: &mut dyn Reporter,
) -> Summary
where
    S: Service<Request, Output = Response, Error = BoxError>,
    G: KeyGenerator,
{
    let start = Instant::now();
    let deadline = start + cfg.duration;
    let hard_deadline = deadline + cfg.graceful_stop;

    let (sink, mut result_rx) = CheckSink::channel(result_buffer_size(cfg.vus));

    for vu in 0..cfg.vus.get() {
        let iteration = iteration.clone();
        let sink = sink.clone();
        let span = tracing::debug_span!("virtual user", vu);
        guard.spawn_task_fn(move |guard| {
            run_virtual_user(guard, vu, iteration, sink, deadline, hard_deadline).instrument(span)
        });
    }
    // the report loop ends once all virtual users dropped their sink
    drop(sink);

    let mut summary = Summary::new(cfg.vus.get());
    let mut ticker = tokio::time::interval_at(start + REPORT_INTERVAL, REPORT_INTERVAL);

    loop {
        tokio::select! {
            maybe_result = result_rx.recv() => {
                let Some(result) = maybe_result else {
                    tracing::debug!("exit report loop: all virtual users stopped");
                    break;
                };

                let ev = RequestResultEvent {
                    elapsed: start.elapsed(),
                    result,
                };
                summary.record(&ev.result);
                reporter.on_result(&ev);
            }

            _ = ticker.tick() => {
                summary.elapsed = start.elapsed();
                reporter.on_tick(summary.elapsed, &summary);
            }
        }
    }

    summary.elapsed = start.elapsed();
    reporter.finish(&summary);

    summary
}

fn result_buffer_size(vus: NonZeroUsize) -> usize {
    vus.get().saturating_mul(8).min(MAX_RESULT_BUFFER)
}

async fn run_virtual_user<S, G>(
    guard: ShutdownGuard,
    vu: usize,
    iteration: Arc<OrderIteration<S, G>>,
    sink: CheckSink,
    deadline: Instant,
    hard_deadline: Instant,
) where
    S: Service<Request, Output = Response, Error = BoxError>,
    G: KeyGenerator,
{
    let mut iterations: u64 = 0;

    while Instant::now() < deadline {
        tokio::select! {
            _ = guard.cancelled() => {
                tracing::debug!(vu, iterations, "exit virtual user: guard shutdown");
                return;
            }

            _ = tokio::time::sleep_until(hard_deadline) => {
                tracing::debug!(vu, iterations, "virtual user interrupted: graceful stop elapsed");
                return;
            }

            _ = iteration.run_once(&sink) => {
                iterations += 1;
            }
        }
    }

    tracing::debug!(vu, iterations, "virtual user done");
}
