use std::time::Duration;

use clap::Parser as _;
use orderbench_lib::{
    check::CheckSink,
    client::new_web_client,
    config::{ApiBase, RunConfig},
    idempotency::IDEMPOTENCY_KEY_HEADER,
    iteration::OrderIteration,
    order::ORDERS_PATH,
};
use rama::{
    graceful::Shutdown,
    http::header::CONTENT_TYPE,
    net::{address::SocketAddress, socket::Interface},
};

use crate::{
    Args,
    cmd::mock::{MockOrderApi, run_mock_server},
};

struct MockServer {
    api: MockOrderApi,
    addr: SocketAddress,
    _shutdown: Shutdown,
}

impl MockServer {
    async fn spawn() -> Self {
        let shutdown = Shutdown::new(std::future::pending::<()>());
        let api = MockOrderApi::new();

        let (addr_tx, addr_rx) = tokio::sync::oneshot::channel();
        shutdown.spawn_task_fn({
            let api = api.clone();
            async move |guard| {
                run_mock_server(
                    guard,
                    "127.0.0.1:0".parse::<Interface>().unwrap(),
                    api,
                    Some(addr_tx),
                )
                .await
                .unwrap();
            }
        });

        let addr = tokio::time::timeout(Duration::from_secs(30), addr_rx)
            .await
            .unwrap()
            .unwrap();
        assert!(addr.ip_addr.is_loopback());

        Self {
            api,
            addr,
            _shutdown: shutdown,
        }
    }

    fn api_base(&self) -> String {
        format!("http://{}", self.addr)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_one_iteration_sends_exactly_one_order() {
    let server = MockServer::spawn().await;

    let cfg = RunConfig::new_default(ApiBase::try_from_str(&server.api_base()).unwrap())
        .with_pause(Duration::ZERO);
    let iteration =
        OrderIteration::try_new(&cfg, new_web_client(Duration::from_secs(30))).unwrap();

    let (sink, mut rx) = CheckSink::channel(1);
    iteration.run_once(&sink).await;

    let result = rx.recv().await.unwrap();
    assert!(result.check.passed, "result: {result:?}");
    assert_eq!(result.check.name, "status 200");
    assert_eq!(result.status, Some(200));

    let submissions = server.api.submissions();
    assert_eq!(submissions.len(), 1);

    let submission = &submissions[0];
    assert_eq!(
        submission.body,
        r#"{"symbol":"BTCUSDT","side":"buy","price":50000,"qty":0.01}"#
    );
    assert_eq!(submission.headers[CONTENT_TYPE], "application/json");

    let key = submission.headers[&IDEMPOTENCY_KEY_HEADER].to_str().unwrap();
    assert!(!key.is_empty());
    assert!(key.bytes().all(|b| b.is_ascii_alphanumeric()));

    assert_eq!(
        iteration.target().to_string(),
        format!("{}{ORDERS_PATH}", server.api_base())
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_iterations_use_distinct_idempotency_keys() {
    let server = MockServer::spawn().await;

    let cfg = RunConfig::new_default(ApiBase::try_from_str(&server.api_base()).unwrap())
        .with_pause(Duration::ZERO);
    let iteration =
        OrderIteration::try_new(&cfg, new_web_client(Duration::from_secs(30))).unwrap();

    let (sink, mut rx) = CheckSink::channel(8);
    for _ in 0..5 {
        iteration.run_once(&sink).await;
        assert!(rx.recv().await.unwrap().check.passed);
    }

    let keys: std::collections::HashSet<_> = server
        .api
        .submissions()
        .into_iter()
        .map(|s| s.headers[&IDEMPOTENCY_KEY_HEADER].clone())
        .collect();
    assert_eq!(keys.len(), 5);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_unreachable_api_fails_check() {
    // bind and drop a listener to get a port nobody listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let cfg = RunConfig::new_default(
        ApiBase::try_from_str(&format!("http://127.0.0.1:{port}")).unwrap(),
    )
    .with_pause(Duration::ZERO);
    let iteration =
        OrderIteration::try_new(&cfg, new_web_client(Duration::from_secs(30))).unwrap();

    let (sink, mut rx) = CheckSink::channel(1);
    iteration.run_once(&sink).await;

    let result = rx.recv().await.unwrap();
    assert!(!result.check.passed);
    assert_eq!(result.status, None);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_cmd_against_mock_server() {
    let server = MockServer::spawn().await;
    let api_base = server.api_base();

    let args = Args::try_parse_from([
        "orderbench",
        "run",
        "--api-base",
        api_base.as_str(),
        "--vus",
        "2",
        "--duration",
        "1s",
        "--pause",
        "100ms",
        "--json",
    ])
    .unwrap();

    crate::run_with_args(std::future::pending::<()>(), args)
        .await
        .unwrap();

    let submissions = server.api.submissions();
    assert!(submissions.len() >= 2, "submissions: {}", submissions.len());
    assert!(submissions.iter().all(|s| s.body.contains("BTCUSDT")));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_run_cmd_rejects_invalid_config() {
    let args = Args::try_parse_from([
        "orderbench",
        "run",
        "--api-base",
        "http://127.0.0.1:1",
        "--vus",
        "0",
    ])
    .unwrap();

    let err = crate::run_with_args(std::future::pending::<()>(), args)
        .await
        .unwrap_err();
    let msg = err.to_string();
    assert!(
        msg.contains("run config") || msg.contains("virtual user count"),
        "err: {msg}"
    );
}

#[test]
fn test_run_cmd_rejects_invalid_api_base() {
    assert!(Args::try_parse_from(["orderbench", "run", "--api-base", "ftp://host"]).is_err());
    assert!(Args::try_parse_from(["orderbench", "run", "--api-base", "/relative"]).is_err());
}
