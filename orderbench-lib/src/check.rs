use std::time::Duration;

use rama::{http::StatusCode, telemetry::tracing};
use tokio::sync::mpsc;

/// Named boolean assertion evaluated per response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Check {
    name: &'static str,
    expected: StatusCode,
}

impl Check {
    /// The `status 200` check applied to every order submission.
    pub const STATUS_200: Self = Self::status(StatusCode::OK, "status 200");

    pub const fn status(expected: StatusCode, name: &'static str) -> Self {
        Self { name, expected }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Evaluate the check against the observed status, if any.
    ///
    /// No status (e.g. a connection failure) never passes.
    pub fn evaluate(&self, status: Option<StatusCode>) -> CheckResult {
        CheckResult {
            name: self.name,
            passed: status == Some(self.expected),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CheckResult {
    pub name: &'static str,
    pub passed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// a response was received, but with an unexpected status
    HttpStatus,
    /// no response was received (connect error, timeout, ...)
    Transport,
}

/// Outcome of one load iteration, reported to the harness.
#[derive(Debug, Clone)]
pub struct IterationResult {
    pub check: CheckResult,
    pub status: Option<u16>,
    pub latency: Duration,
    pub failure: Option<FailureKind>,
}

impl IterationResult {
    pub fn from_status(check: &Check, status: StatusCode, latency: Duration) -> Self {
        let check = check.evaluate(Some(status));
        Self {
            failure: (!check.passed).then_some(FailureKind::HttpStatus),
            check,
            status: Some(status.as_u16()),
            latency,
        }
    }

    pub fn from_transport_failure(check: &Check, latency: Duration) -> Self {
        Self {
            check: check.evaluate(None),
            status: None,
            latency,
            failure: Some(FailureKind::Transport),
        }
    }
}

/// Where iterations record their check outcome.
///
/// Cheap to clone, one per virtual user is the intended use.
#[derive(Debug, Clone)]
pub struct CheckSink {
    tx: mpsc::Sender<IterationResult>,
}

impl CheckSink {
    pub fn new(tx: mpsc::Sender<IterationResult>) -> Self {
        Self { tx }
    }

    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<IterationResult>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (Self::new(tx), rx)
    }

    /// Record a result; a closed receiver only drops the result.
    pub async fn record(&self, result: IterationResult) {
        if let Err(err) = self.tx.send(result).await {
            tracing::debug!("failed to record iteration result (receiver closed): {err}");
        }
    }
}
