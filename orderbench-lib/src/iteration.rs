use std::time::Duration;

use rama::{
    Service,
    error::{BoxError, ErrorContext as _},
    http::{Body, HeaderValue, Method, Request, Response, Uri, header::CONTENT_TYPE},
    telemetry::tracing::{self, Instrument as _},
};
use tokio::time::Instant;

use crate::{
    check::{Check, CheckSink, IterationResult},
    config::RunConfig,
    idempotency::{IDEMPOTENCY_KEY_HEADER, IdempotencyKey, KeyGenerator, RandomKeyGenerator},
    order::OrderRequest,
};

/// One order-entry load iteration.
///
/// Each call to [`OrderIteration::run_once`] submits a single order,
/// records the `status 200` check and pauses. It never loops and never
/// fails: transport errors and unexpected statuses only surface as a
/// failed check. Scheduling (how many virtual users, for how long)
/// is left to whoever drives it.
///
/// The iteration holds no mutable state and can be shared
/// between virtual users (e.g. behind an `Arc`).
#[derive(Debug)]
pub struct OrderIteration<S, G = RandomKeyGenerator> {
    client: S,
    keys: G,
    target: Uri,
    order: OrderRequest,
    body: String,
    check: Check,
    pause: Duration,
}

impl<S> OrderIteration<S, RandomKeyGenerator> {
    pub fn try_new(cfg: &RunConfig, client: S) -> Result<Self, BoxError> {
        Self::try_new_with_key_generator(cfg, client, RandomKeyGenerator::new())
    }
}

impl<S, G> OrderIteration<S, G> {
    pub fn try_new_with_key_generator(
        cfg: &RunConfig,
        client: S,
        keys: G,
    ) -> Result<Self, BoxError> {
        let target = cfg.api_base.orders_uri().context("compute orders uri")?;

        let order = OrderRequest::smoke();
        order.validate().context("validate smoke order")?;
        let body = serde_json::to_string(&order).context("encode order as json")?;

        Ok(Self {
            client,
            keys,
            target,
            order,
            body,
            check: Check::STATUS_200,
            pause: cfg.pause,
        })
    }

    /// Uri every order is submitted to.
    pub fn target(&self) -> &Uri {
        &self.target
    }

    pub fn pause(&self) -> Duration {
        self.pause
    }
}

impl<S, G> OrderIteration<S, G>
where
    G: KeyGenerator,
{
    /// Build the order request, with a freshly minted idempotency key.
    pub fn build_request(&self) -> Result<(Request, IdempotencyKey), BoxError> {
        let key = self.keys.generate();
        let req = Request::builder()
            .method(Method::POST)
            .uri(self.target.clone())
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
            .header(IDEMPOTENCY_KEY_HEADER.clone(), key.to_header_value())
            .body(Body::from(self.body.clone()))
            .context("build order request")?;
        Ok((req, key))
    }
}

impl<S, G> OrderIteration<S, G>
where
    S: Service<Request, Output = Response, Error = BoxError>,
    G: KeyGenerator,
{
    /// Submit one order and evaluate the check, without pausing.
    pub async fn submit(&self) -> IterationResult {
        let (req, key) = match self.build_request() {
            Ok(v) => v,
            Err(err) => {
                tracing::error!("failed to build order request: {err}");
                return IterationResult::from_transport_failure(&self.check, Duration::ZERO);
            }
        };

        let start = Instant::now();
        let result = self
            .client
            .serve(req)
            .instrument(tracing::debug_span!(
                "order submission",
                idempotency.key = %key,
                order.symbol = %self.order.symbol,
                order.side = %self.order.side,
                otel.kind = "client",
                network.protocol.name = "http",
            ))
            .await;
        let latency = start.elapsed();

        match result {
            Ok(resp) => {
                let status = resp.status();
                let result = IterationResult::from_status(&self.check, status, latency);
                if !result.check.passed {
                    tracing::debug!(
                        %status,
                        %key,
                        uri = %self.target,
                        "order submission returned unexpected status",
                    );
                }
                result
            }
            Err(err) => {
                tracing::debug!(
                    %key,
                    uri = %self.target,
                    "order submission failed: {err}",
                );
                IterationResult::from_transport_failure(&self.check, latency)
            }
        }
    }

    /// Run a single iteration: submit, record the check in `sink`, pause.
    pub async fn run_once(&self, sink: &CheckSink) {
        let result = self.submit().await;
        sink.record(result).await;
        tokio::time::sleep(self.pause).await;
    }
}

#[cfg(test)]
mod tests;
