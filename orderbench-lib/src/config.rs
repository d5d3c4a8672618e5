use std::{fmt, num::NonZeroUsize, str::FromStr, time::Duration};

use rama::{
    error::{BoxError, ErrorContext as _},
    http::Uri,
};

use crate::order::ORDERS_PATH;

/// Environment variable consulted for the base address of the order-entry API.
pub const API_BASE_ENV: &str = "API_BASE";

pub const DEFAULT_VUS: NonZeroUsize = match NonZeroUsize::new(5) {
    Some(n) => n,
    None => unreachable!(),
};
pub const DEFAULT_DURATION: Duration = Duration::from_secs(30);
pub const DEFAULT_PAUSE: Duration = Duration::from_secs(1);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_GRACEFUL_STOP: Duration = Duration::from_secs(30);

/// Validated absolute base address (`http` or `https`) of the order-entry API.
///
/// The input is kept as-is (minus a single trailing slash),
/// so that joining a path is plain concatenation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiBase(String);

impl ApiBase {
    pub fn try_from_str(input: &str) -> Result<Self, BoxError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(BoxError::from("api base is empty"));
        }

        let uri: Uri = input
            .parse()
            .context("parse api base as uri")
            .with_context_field("input", || input.to_owned())?;

        match uri.scheme_str() {
            Some("http" | "https") => (),
            Some(other) => {
                return Err(BoxError::from(format!(
                    "api base '{input}' has unsupported scheme '{other}' (expected http or https)"
                )));
            }
            None => {
                return Err(BoxError::from(format!(
                    "api base '{input}' is not an absolute url"
                )));
            }
        }

        if uri.authority().is_none() {
            return Err(BoxError::from(format!("api base '{input}' has no host")));
        }

        if uri.query().is_some() || input.contains('#') {
            return Err(BoxError::from(format!(
                "api base '{input}' may not contain a query or fragment"
            )));
        }

        Ok(Self(input.strip_suffix('/').unwrap_or(input).to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Append an absolute path (starting with `/`) to this base.
    pub fn join(&self, path: &str) -> Result<Uri, BoxError> {
        debug_assert!(path.starts_with('/'));
        format!("{}{path}", self.0)
            .parse()
            .context("parse joined api uri")
            .with_context_field("path", || path.to_owned())
    }

    pub fn orders_uri(&self) -> Result<Uri, BoxError> {
        self.join(ORDERS_PATH)
    }
}

impl FromStr for ApiBase {
    type Err = BoxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::try_from_str(s)
    }
}

impl fmt::Display for ApiBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Configuration of a single load run.
///
/// Built and validated once before any virtual user starts,
/// immutable afterwards.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// base address of the order-entry api
    pub api_base: ApiBase,
    /// number of concurrent virtual users
    pub vus: NonZeroUsize,
    /// total duration of the run
    pub duration: Duration,
    /// pause at the end of each iteration
    pub pause: Duration,
    /// timeout applied to each order request
    pub request_timeout: Duration,
    /// time in-flight iterations get to complete once the duration elapsed
    pub graceful_stop: Duration,
}

impl RunConfig {
    pub fn try_new(api_base: ApiBase, vus: usize, duration: Duration) -> Result<Self, BoxError> {
        let vus = NonZeroUsize::new(vus)
            .ok_or_else(|| BoxError::from("virtual user count must be positive"))?;
        if duration.is_zero() {
            return Err(BoxError::from("run duration must be positive"));
        }

        Ok(Self {
            api_base,
            vus,
            duration,
            pause: DEFAULT_PAUSE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
        })
    }

    /// Default run (5 virtual users for 30 seconds) against the given api base.
    pub fn new_default(api_base: ApiBase) -> Self {
        Self {
            api_base,
            vus: DEFAULT_VUS,
            duration: DEFAULT_DURATION,
            pause: DEFAULT_PAUSE,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            graceful_stop: DEFAULT_GRACEFUL_STOP,
        }
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Result<Self, BoxError> {
        if timeout.is_zero() {
            return Err(BoxError::from("request timeout must be positive"));
        }
        self.request_timeout = timeout;
        Ok(self)
    }

    pub fn with_graceful_stop(mut self, graceful_stop: Duration) -> Self {
        self.graceful_stop = graceful_stop;
        self
    }
}

impl fmt::Display for RunConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "api_base={} vus={} duration={} pause={} timeout={} graceful_stop={}",
            self.api_base,
            self.vus,
            humantime::format_duration(self.duration),
            humantime::format_duration(self.pause),
            humantime::format_duration(self.request_timeout),
            humantime::format_duration(self.graceful_stop),
        )
    }
}
