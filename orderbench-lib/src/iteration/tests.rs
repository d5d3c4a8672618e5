use std::sync::Arc;

use parking_lot::Mutex;
use rama::http::{
    BodyExtractExt as _, HeaderMap, StatusCode, service::web::response::IntoResponse,
};
use tracing_test::traced_test;

use super::*;
use crate::{check::FailureKind, config::ApiBase, idempotency::SequentialKeyGenerator};

#[derive(Debug)]
struct SeenRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
}

/// Mocked http layer answering every request with a fixed status.
#[derive(Debug, Clone)]
struct StaticStatusApi {
    status: StatusCode,
    seen: Arc<Mutex<Vec<SeenRequest>>>,
}

impl StaticStatusApi {
    fn new(status: StatusCode) -> Self {
        Self {
            status,
            seen: Default::default(),
        }
    }
}

impl Service<Request> for StaticStatusApi {
    type Output = Response;
    type Error = BoxError;

    async fn serve(&self, req: Request) -> Result<Self::Output, Self::Error> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let headers = req.headers().clone();
        let body = req.try_into_string().await?;
        self.seen.lock().push(SeenRequest {
            method,
            uri,
            headers,
            body,
        });
        Ok(self.status.into_response())
    }
}

/// Mocked http layer which never produces a response.
#[derive(Debug, Clone)]
struct UnreachableApi;

impl Service<Request> for UnreachableApi {
    type Output = Response;
    type Error = BoxError;

    async fn serve(&self, _req: Request) -> Result<Self::Output, Self::Error> {
        Err(BoxError::from("connection refused"))
    }
}

fn run_config(api_base: &str) -> RunConfig {
    RunConfig::new_default(ApiBase::try_from_str(api_base).unwrap())
}

fn iteration<S>(client: S) -> OrderIteration<S, SequentialKeyGenerator> {
    OrderIteration::try_new_with_key_generator(
        &run_config("http://localhost:8080"),
        client,
        SequentialKeyGenerator::new(),
    )
    .unwrap()
}

#[test]
fn test_target_uri() {
    let it = iteration(UnreachableApi);
    assert_eq!(
        it.target().to_string(),
        "http://localhost:8080/api/v1/trade/orders"
    );
}

#[tokio::test(flavor = "current_thread")]
async fn test_build_request() {
    let it = iteration(UnreachableApi);

    let (req, key) = it.build_request().unwrap();
    assert_eq!(key.as_str(), "key0");
    assert_eq!(req.method(), Method::POST);
    assert_eq!(
        req.uri().to_string(),
        "http://localhost:8080/api/v1/trade/orders"
    );
    assert_eq!(req.headers()[CONTENT_TYPE], "application/json");
    assert_eq!(req.headers()[&IDEMPOTENCY_KEY_HEADER], "key0");

    let body = req.try_into_string().await.unwrap();
    let payload: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(
        payload,
        serde_json::json!({
            "symbol": "BTCUSDT",
            "side": "buy",
            "price": 50000,
            "qty": 0.01,
        })
    );
}

#[test]
fn test_every_request_gets_a_fresh_key() {
    let it = OrderIteration::try_new(&run_config("http://localhost:8080"), UnreachableApi).unwrap();

    let keys: std::collections::HashSet<_> = (0..1_000)
        .map(|_| it.build_request().unwrap().1)
        .collect();
    assert_eq!(keys.len(), 1_000);
}

#[tokio::test(flavor = "current_thread")]
async fn test_status_200_passes_check() {
    tokio::time::pause();

    let api = StaticStatusApi::new(StatusCode::OK);
    let it = iteration(api.clone());
    let (sink, mut rx) = CheckSink::channel(8);

    for _ in 0..3 {
        it.run_once(&sink).await;
    }

    for _ in 0..3 {
        let result = rx.recv().await.unwrap();
        assert_eq!(result.check.name, "status 200");
        assert!(result.check.passed);
        assert_eq!(result.status, Some(200));
        assert_eq!(result.failure, None);
    }

    let seen = api.seen.lock();
    assert_eq!(seen.len(), 3);
    let keys: Vec<_> = seen
        .iter()
        .map(|req| req.headers[&IDEMPOTENCY_KEY_HEADER].to_str().unwrap().to_owned())
        .collect();
    assert_eq!(keys, ["key0", "key1", "key2"]);
}

#[tokio::test(flavor = "current_thread")]
async fn test_status_500_fails_check_and_still_pauses() {
    tokio::time::pause();

    let api = StaticStatusApi::new(StatusCode::INTERNAL_SERVER_ERROR);
    let it = iteration(api);
    let (sink, mut rx) = CheckSink::channel(8);

    let start = Instant::now();
    it.run_once(&sink).await;
    assert!(start.elapsed() >= it.pause());

    let result = rx.recv().await.unwrap();
    assert!(!result.check.passed);
    assert_eq!(result.status, Some(500));
    assert_eq!(result.failure, Some(FailureKind::HttpStatus));
}

#[tokio::test(flavor = "current_thread")]
#[traced_test]
async fn test_transport_error_fails_check() {
    tokio::time::pause();

    let it = iteration(UnreachableApi);
    let (sink, mut rx) = CheckSink::channel(8);

    let start = Instant::now();
    it.run_once(&sink).await;
    assert!(start.elapsed() >= it.pause());

    let result = rx.recv().await.unwrap();
    assert!(!result.check.passed);
    assert_eq!(result.status, None);
    assert_eq!(result.failure, Some(FailureKind::Transport));

    assert!(logs_contain("order submission failed: connection refused"));
}

#[tokio::test(flavor = "current_thread")]
async fn test_check_is_recorded_before_pause() {
    tokio::time::pause();

    let it = Arc::new(iteration(StaticStatusApi::new(StatusCode::OK)));
    let (sink, mut rx) = CheckSink::channel(8);

    let h = tokio::spawn({
        let it = it.clone();
        async move { it.run_once(&sink).await }
    });

    let result = rx.recv().await.unwrap();
    assert!(result.check.passed);
    assert!(!h.is_finished());

    tokio::time::advance(Duration::from_secs(1)).await;
    h.await.unwrap();
}

#[tokio::test(flavor = "current_thread")]
async fn test_end_to_end_single_iteration_wire_request() {
    let api = StaticStatusApi::new(StatusCode::OK);
    let cfg = run_config("http://localhost:8080").with_pause(Duration::ZERO);
    let it = OrderIteration::try_new(&cfg, api.clone()).unwrap();
    let (sink, mut rx) = CheckSink::channel(1);

    it.run_once(&sink).await;
    assert!(rx.recv().await.unwrap().check.passed);

    let seen = api.seen.lock();
    assert_eq!(seen.len(), 1);

    let req = &seen[0];
    assert_eq!(req.method, Method::POST);
    assert_eq!(
        req.uri.to_string(),
        "http://localhost:8080/api/v1/trade/orders"
    );
    assert_eq!(
        req.body,
        r#"{"symbol":"BTCUSDT","side":"buy","price":50000,"qty":0.01}"#
    );
    assert_eq!(req.headers.len(), 2);
    assert_eq!(req.headers[CONTENT_TYPE], "application/json");
    let key = req.headers[&IDEMPOTENCY_KEY_HEADER].to_str().unwrap();
    assert!(!key.is_empty());
    assert!(key.bytes().all(|b| b.is_ascii_alphanumeric()));
}
