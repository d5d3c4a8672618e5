#![cfg_attr(
    not(test),
    warn(clippy::print_stdout, clippy::dbg_macro),
    deny(clippy::unwrap_used, clippy::expect_used)
)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use rama::{
    error::BoxError,
    graceful,
    telemetry::tracing::{self, Instrument as _},
};

#[cfg(target_family = "unix")]
use rama::error::ErrorContext as _;

use clap::{Parser, Subcommand};
use orderbench_lib::utils;
use parking_lot::Mutex;

pub mod cmd;

#[cfg(target_family = "unix")]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[cfg(test)]
pub mod test;

/// CLI arguments for configuring orderbench behavior.
#[derive(Debug, Clone, Parser)]
#[command(name = "orderbench")]
#[command(bin_name = "orderbench")]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    cmds: CliCommands,

    /// debug logging as default instead of Info; use RUST_LOG env for more options
    #[arg(long, short = 'v', default_value_t = false, global = true)]
    pub verbose: bool,

    /// enable pretty logging (format for humans)
    #[arg(long, default_value_t = false, global = true)]
    pub pretty: bool,

    /// write the tracing output to the provided (log) file instead of stderr
    #[arg(long, short = 'o', global = true)]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "SECONDS", default_value_t = 0., global = true)]
    /// the graceful shutdown timeout (<= 0.0 = no timeout)
    pub graceful: f64,

    #[cfg(target_family = "unix")]
    /// Set the limit of max open file descriptors for this process and its children.
    #[arg(long, value_name = "N", default_value_t = 262_144, global = true)]
    pub ulimit: utils::os::rlim_t,
}

#[derive(Debug, Clone, Subcommand)]
enum CliCommands {
    Run(self::cmd::run::RunCommand),
    Mock(self::cmd::mock::MockCommand),
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    utils::telemetry::init_tracing(Some(utils::telemetry::TelemetryConfig {
        verbose: args.verbose,
        pretty: args.pretty,
        output: args.output.as_deref(),
    }))?;

    #[cfg(target_family = "unix")]
    utils::os::raise_nofile(args.ulimit).context("set file descriptor limit")?;

    let base_shutdown_signal = graceful::default_signal();
    if let Err(err) = run_with_args(base_shutdown_signal, args).await {
        eprintln!("🚩 exit with error: {err}");
        std::process::exit(1);
    }

    Ok(())
}

/// Run an orderbench cmd with the given args and block until it finished
/// or the (graceful) shutdown has been initiated.
///
/// The error of a failed cmd is returned once the shutdown completed.
async fn run_with_args<F>(base_shutdown_signal: F, args: Args) -> Result<(), BoxError>
where
    F: Future<Output: Send + 'static> + Send + 'static,
{
    let graceful_timeout = (args.graceful > 0.).then(|| Duration::from_secs_f64(args.graceful));

    let (done_tx, done_rx) = tokio::sync::oneshot::channel::<()>();
    let graceful = graceful::Shutdown::new(new_shutdown_signal(done_rx, base_shutdown_signal));

    let cmd_error: Arc<Mutex<Option<BoxError>>> = Default::default();

    graceful.spawn_task_fn({
        let cmd_error = cmd_error.clone();
        async move |guard| {
            let result = match args.cmds {
                CliCommands::Run(run_args) => self::cmd::run::exec(guard, run_args)
                    .instrument(tracing::debug_span!(
                        "load test",
                        service.name = utils::env::project_name(),
                        otel.kind = "client",
                    ))
                    .await,
                CliCommands::Mock(mock_args) => self::cmd::mock::exec(guard, mock_args)
                    .instrument(tracing::debug_span!(
                        "mock server lifetime",
                        server.service.name = format!("{}-mock", utils::env::project_name()),
                        otel.kind = "server",
                        network.protocol.name = "http",
                    ))
                    .await,
            };
            if let Err(err) = result {
                tracing::error!("cmd exited with an error: {err}");
                *cmd_error.lock() = Some(err);
            }
            let _ = done_tx.send(());
        }
    });

    let delay = match graceful_timeout {
        Some(duration) => graceful.shutdown_with_limit(duration).await?,
        None => graceful.shutdown().await,
    };
    tracing::debug!("gracefully shutdown with a delay of: {delay:?}");

    let cmd_error = cmd_error.lock().take();
    match cmd_error {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn new_shutdown_signal(
    done_rx: tokio::sync::oneshot::Receiver<()>,
    base_shutdown_signal: impl Future<Output: Send + 'static> + Send + 'static,
) -> impl Future + Send + 'static {
    async move {
        tokio::select! {
            _ = base_shutdown_signal => {
                tracing::debug!("default signal triggered: init graceful shutdown");
            }
            _ = done_rx => {
                tracing::debug!("cmd is finished, return control");
            }
        }
    }
}
