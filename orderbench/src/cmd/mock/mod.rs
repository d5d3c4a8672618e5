use std::{collections::HashSet, sync::Arc};

use rama::{
    Layer as _,
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    http::{
        HeaderValue,
        layer::{required_header::AddRequiredResponseHeadersLayer, trace::TraceLayer},
        server::HttpServer,
    },
    net::{address::SocketAddress, socket::Interface, stream::layer::http::BodyLimitLayer},
    rt::Executor,
    tcp::server::TcpListener,
    telemetry::tracing,
};

use clap::Args;
use orderbench_lib::{idempotency::IDEMPOTENCY_KEY_HEADER, utils::env::network_service_identifier};
use tokio::sync::oneshot;

pub mod api;

pub use self::api::MockOrderApi;

/// Orders are tiny, anything above this is rejected.
const MAX_ORDER_BODY_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone, Args)]
/// run a mock order-entry api
pub struct MockCommand {
    /// network interface to bind to
    #[arg(
        long,
        short = 'b',
        value_name = "INTERFACE",
        default_value = "127.0.0.1:0"
    )]
    pub bind: Interface,

    /// ratio of valid orders answered with a 500 (0.0 - 1.0)
    #[arg(long, value_name = "RATIO")]
    pub error_rate: Option<f32>,

    /// delay applied before answering any request (e.g. 25ms)
    #[arg(long, value_name = "DURATION")]
    pub base_latency: Option<humantime::Duration>,
}

pub async fn exec(guard: ShutdownGuard, args: MockCommand) -> Result<(), BoxError> {
    let mut api = MockOrderApi::new();
    if let Some(rate) = args.error_rate {
        tracing::info!(%rate, "inject internal server errors");
        api = api.with_error_rate(rate);
    }
    if let Some(latency) = args.base_latency {
        tracing::info!(%latency, "inject base latency");
        api = api.with_base_latency(latency.into());
    }

    run_mock_server(guard, args.bind, api.clone(), None).await?;

    let submissions = api.submissions();
    let unique_keys = submissions
        .iter()
        .filter_map(|s| s.headers.get(&IDEMPOTENCY_KEY_HEADER))
        .collect::<HashSet<_>>()
        .len();
    let body_bytes: usize = submissions.iter().map(|s| s.body.len()).sum();
    tracing::info!(
        orders = submissions.len(),
        unique_keys,
        body_bytes,
        "mock order-entry api stopped"
    );
    Ok(())
}

/// Serve the mock api on the given interface until the guard is cancelled.
///
/// The bound address is reported over `addr_tx` (if any)
/// as soon as the listener is ready.
pub async fn run_mock_server(
    guard: ShutdownGuard,
    bind: Interface,
    api: MockOrderApi,
    addr_tx: Option<oneshot::Sender<SocketAddress>>,
) -> Result<(), BoxError> {
    let http_svc = (
        TraceLayer::new_for_http(),
        AddRequiredResponseHeadersLayer::new()
            .with_server_header_value(HeaderValue::from_static(network_service_identifier())),
    )
        .into_layer(api);

    let exec = Executor::graceful(guard);
    let http_server = HttpServer::auto(exec.clone()).service(Arc::new(http_svc));

    let tcp_svc = BodyLimitLayer::symmetric(MAX_ORDER_BODY_SIZE).into_layer(http_server);

    let tcp_listener = TcpListener::bind(bind, exec)
        .await
        .context("bind mock order-entry api")?;

    let addr = tcp_listener
        .local_addr()
        .context("get bound address for mock order-entry api")?;

    tracing::info!("mock order-entry api bound to: {addr}");
    if let Some(addr_tx) = addr_tx
        && addr_tx.send(addr.into()).is_err()
    {
        tracing::debug!("mock server address receiver dropped");
    }

    tcp_listener.serve(tcp_svc).await;

    Ok(())
}
