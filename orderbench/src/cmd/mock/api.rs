use std::{collections::VecDeque, convert::Infallible, sync::Arc, time::Duration};

use rama::{
    Service,
    http::{
        BodyExtractExt as _, HeaderMap, Method, Request, Response, StatusCode,
        header::CONTENT_TYPE,
        headers::ContentType,
        service::web::response::{Headers, IntoResponse},
    },
    telemetry::tracing,
};

use moka::sync::Cache;
use orderbench_lib::{
    idempotency::{IDEMPOTENCY_KEY_HEADER, IdempotencyKey, KeyGenerator as _, RandomKeyGenerator},
    order::{ORDERS_PATH, OrderRequest},
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Max amount of idempotency keys remembered by the mock api.
const IDEMPOTENCY_CACHE_CAPACITY: u64 = 100_000;
/// How long a response is replayed for a repeated idempotency key.
const IDEMPOTENCY_CACHE_TTL: Duration = Duration::from_secs(600);
/// Max amount of submissions kept around for inspection (oldest are dropped).
const MAX_RECORDED_SUBMISSIONS: usize = 10_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAccepted {
    pub order_id: String,
    pub status: String,
}

/// An order submission as it arrived on the wire.
#[derive(Debug, Clone)]
pub struct RecordedSubmission {
    pub headers: HeaderMap,
    pub body: String,
}

/// In-memory stand-in for the order-entry api.
///
/// Cheap to clone, all clones share the same cache and records.
#[derive(Debug, Clone)]
pub struct MockOrderApi {
    error_rate: f32,
    base_latency: Duration,
    order_ids: RandomKeyGenerator,
    responses: Cache<IdempotencyKey, OrderAccepted>,
    submissions: Arc<Mutex<VecDeque<RecordedSubmission>>>,
}

impl Default for MockOrderApi {
    fn default() -> Self {
        Self::new()
    }
}

impl MockOrderApi {
    pub fn new() -> Self {
        Self {
            error_rate: 0.,
            base_latency: Duration::ZERO,
            order_ids: RandomKeyGenerator::new().with_len(24),
            responses: Cache::builder()
                .max_capacity(IDEMPOTENCY_CACHE_CAPACITY)
                .time_to_live(IDEMPOTENCY_CACHE_TTL)
                .build(),
            submissions: Default::default(),
        }
    }

    /// Ratio (clamped to `[0, 1]`) of valid orders answered with a 500.
    pub fn with_error_rate(mut self, rate: f32) -> Self {
        self.error_rate = rate.clamp(0., 1.);
        self
    }

    /// Delay applied before answering any request.
    pub fn with_base_latency(mut self, latency: Duration) -> Self {
        self.base_latency = latency;
        self
    }

    /// Order submissions received so far, oldest first.
    pub fn submissions(&self) -> Vec<RecordedSubmission> {
        self.submissions.lock().iter().cloned().collect()
    }

    fn record(&self, submission: RecordedSubmission) {
        let mut submissions = self.submissions.lock();
        if submissions.len() >= MAX_RECORDED_SUBMISSIONS {
            submissions.pop_front();
        }
        submissions.push_back(submission);
    }

    async fn submit_order(&self, req: Request) -> Response {
        let headers = req.headers().clone();
        let body = match req.try_into_string().await {
            Ok(body) => body,
            Err(err) => {
                tracing::debug!("failed to read order body: {err}");
                return error_response(StatusCode::BAD_REQUEST, "unreadable body");
            }
        };

        self.record(RecordedSubmission {
            headers: headers.clone(),
            body: body.clone(),
        });

        let is_json = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        if !is_json {
            return error_response(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "expected application/json",
            );
        }

        let Some(key) = headers
            .get(&IDEMPOTENCY_KEY_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(IdempotencyKey::try_new)
        else {
            return error_response(StatusCode::BAD_REQUEST, "missing or invalid idempotency-key");
        };

        if let Some(accepted) = self.responses.get(&key) {
            tracing::debug!(%key, order.id = %accepted.order_id, "replay cached order response");
            return json_response(StatusCode::OK, &accepted);
        }

        let order: OrderRequest = match serde_json::from_str(&body) {
            Ok(order) => order,
            Err(err) => {
                tracing::debug!(%key, "malformed order payload: {err}");
                return error_response(StatusCode::BAD_REQUEST, "malformed order");
            }
        };
        if let Err(err) = order.validate() {
            tracing::debug!(%key, "invalid order: {err}");
            return error_response(StatusCode::BAD_REQUEST, &err.to_string());
        }

        if self.error_rate > 0. && rand::random::<f32>() < self.error_rate {
            tracing::debug!(%key, "inject internal server error");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "injected failure");
        }

        let accepted = self.responses.get_with(key.clone(), || {
            let accepted = OrderAccepted {
                order_id: self.order_ids.generate().to_string(),
                status: "accepted".to_owned(),
            };
            tracing::debug!(%key, order.id = %accepted.order_id, order.symbol = %order.symbol, "order accepted");
            accepted
        });

        json_response(StatusCode::OK, &accepted)
    }
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response {
    match serde_json::to_string(value) {
        Ok(body) => (status, Headers::single(ContentType::json()), body).into_response(),
        Err(err) => {
            tracing::error!("failed to encode json response: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn error_response(status: StatusCode, reason: &str) -> Response {
    json_response(status, &serde_json::json!({ "error": reason }))
}

impl Service<Request> for MockOrderApi {
    type Output = Response;
    type Error = Infallible;

    async fn serve(&self, req: Request) -> Result<Self::Output, Self::Error> {
        if !self.base_latency.is_zero() {
            tokio::time::sleep(self.base_latency).await;
        }

        Ok(match (req.method(), req.uri().path()) {
            (&Method::POST, ORDERS_PATH) => self.submit_order(req).await,
            (_, ORDERS_PATH) => StatusCode::METHOD_NOT_ALLOWED.into_response(),
            (&Method::GET, "/healthz") => "ok".into_response(),
            _ => StatusCode::NOT_FOUND.into_response(),
        })
    }
}
