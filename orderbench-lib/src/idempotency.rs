use std::fmt;

use rama::http::{HeaderName, HeaderValue};
use rand::distr::{Alphanumeric, SampleString as _};

/// Header carrying the client generated token used by the
/// order-entry api to deduplicate retried submissions.
pub static IDEMPOTENCY_KEY_HEADER: HeaderName = HeaderName::from_static("idempotency-key");

/// Length of keys produced by [`RandomKeyGenerator`].
pub const DEFAULT_KEY_LEN: usize = 16;

/// Non-empty ASCII alphanumeric token, unique per request attempt.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdempotencyKey(String);

impl IdempotencyKey {
    pub fn try_new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        (!value.is_empty() && value.bytes().all(|b| b.is_ascii_alphanumeric()))
            .then_some(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_header_value(&self) -> HeaderValue {
        // alphanumeric ascii is always a valid header value
        HeaderValue::from_str(&self.0).unwrap_or_else(|_| HeaderValue::from_static("invalid"))
    }
}

impl fmt::Display for IdempotencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Capability to mint a fresh [`IdempotencyKey`] for every request attempt.
pub trait KeyGenerator: fmt::Debug + Send + Sync + 'static {
    fn generate(&self) -> IdempotencyKey;
}

/// Default [`KeyGenerator`], backed by the thread local CSPRNG.
#[derive(Debug, Clone)]
pub struct RandomKeyGenerator {
    len: usize,
}

impl RandomKeyGenerator {
    pub fn new() -> Self {
        Self {
            len: DEFAULT_KEY_LEN,
        }
    }

    /// Use keys of the given length (at least one character).
    pub fn with_len(mut self, len: usize) -> Self {
        self.len = len.max(1);
        self
    }
}

impl Default for RandomKeyGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyGenerator for RandomKeyGenerator {
    fn generate(&self) -> IdempotencyKey {
        IdempotencyKey(Alphanumeric.sample_string(&mut rand::rng(), self.len))
    }
}

#[cfg(any(test, feature = "test-utils"))]
pub use self::test_utils::SequentialKeyGenerator;

#[cfg(any(test, feature = "test-utils"))]
mod test_utils {
    use std::sync::atomic::{AtomicU64, Ordering};

    use super::{IdempotencyKey, KeyGenerator};

    /// Deterministic [`KeyGenerator`] producing `key0`, `key1`, ...
    #[derive(Debug, Default)]
    pub struct SequentialKeyGenerator {
        next: AtomicU64,
    }

    impl SequentialKeyGenerator {
        pub fn new() -> Self {
            Self::default()
        }
    }

    impl KeyGenerator for SequentialKeyGenerator {
        fn generate(&self) -> IdempotencyKey {
            let n = self.next.fetch_add(1, Ordering::Relaxed);
            IdempotencyKey(format!("key{n}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_random_keys_are_alphanumeric_and_non_empty() {
        let generator = RandomKeyGenerator::new();
        for _ in 0..100 {
            let key = generator.generate();
            assert_eq!(key.as_str().len(), DEFAULT_KEY_LEN);
            assert!(key.as_str().bytes().all(|b| b.is_ascii_alphanumeric()));
        }
    }

    #[test]
    fn test_random_keys_do_not_collide() {
        const SAMPLES: usize = 10_000;

        let generator = RandomKeyGenerator::new();
        let keys: HashSet<_> = (0..SAMPLES).map(|_| generator.generate()).collect();
        assert_eq!(keys.len(), SAMPLES);
    }

    #[test]
    fn test_random_key_len_is_at_least_one() {
        let key = RandomKeyGenerator::new().with_len(0).generate();
        assert_eq!(key.as_str().len(), 1);
    }

    #[test]
    fn test_sequential_keys() {
        let generator = SequentialKeyGenerator::new();
        assert_eq!(generator.generate().as_str(), "key0");
        assert_eq!(generator.generate().as_str(), "key1");
        assert_eq!(generator.generate().as_str(), "key2");
    }

    #[test]
    fn test_key_try_new() {
        assert!(IdempotencyKey::try_new("abc123XYZ").is_some());
        assert!(IdempotencyKey::try_new("").is_none());
        assert!(IdempotencyKey::try_new("abc-123").is_none());
        assert!(IdempotencyKey::try_new("abc\n123").is_none());
    }

    #[test]
    fn test_key_header_value() {
        let key = IdempotencyKey::try_new("k3y").unwrap();
        assert_eq!(key.to_header_value(), "k3y");
    }
}
