use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::{Result, RpcError};

/// Identifier used to match a reply to the request that caused it.
///
/// Keys are carried *in-band* inside every envelope and are opaque to the
/// transport. A key is never empty; constructing one from an empty string
/// fails with [`RpcError::InvalidArgument`].
///
/// Cloning is cheap (the string is shared).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CorrelationKey(Arc<str>);

impl CorrelationKey {
    // ---

    /// Create a key from an arbitrary string.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::InvalidArgument`] if `key` is empty.
    pub fn new(key: impl AsRef<str>) -> Result<Self> {
        // ---
        let key = key.as_ref();
        if key.is_empty() {
            return Err(RpcError::invalid_argument("correlation key must not be empty"));
        }
        Ok(Self(Arc::from(key)))
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CorrelationKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for CorrelationKey {
    type Error = RpcError;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl TryFrom<String> for CorrelationKey {
    type Error = RpcError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Uuid> for CorrelationKey {
    fn from(uuid: Uuid) -> Self {
        // A hyphenated UUID is never empty.
        Self(Arc::from(uuid.to_string()))
    }
}

/// How a [`KeyGenerator`] produces new correlation keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStrategy {
    /// Process-unique counter, formatted as `"{prefix}.{n}"`.
    ///
    /// Cheap and readable in logs, but a restarted peer can see the same
    /// sequence again.
    Counter,

    /// Random UUID v4 token in the standard 36 character form.
    ///
    /// Stale replies from an earlier session can never match a new request.
    #[default]
    RandomToken,
}

/// Generates correlation keys for outgoing requests.
///
/// Safe to share between tasks: the counter strategy uses an atomic, so two
/// concurrent callers never observe the same value. Uniqueness against keys
/// that are *currently pending* is finally enforced by
/// [`CorrelationTable::register`](crate::CorrelationTable::register), which
/// rejects duplicates.
#[derive(Debug)]
pub struct KeyGenerator {
    strategy: KeyStrategy,
    prefix: Arc<str>,
    next: AtomicU64,
}

impl KeyGenerator {
    /// Create a generator. `prefix` is only used by [`KeyStrategy::Counter`].
    pub fn new(strategy: KeyStrategy, prefix: impl Into<Arc<str>>) -> Self {
        Self {
            strategy,
            prefix: prefix.into(),
            next: AtomicU64::new(1),
        }
    }

    /// Strategy this generator was built with.
    pub fn strategy(&self) -> KeyStrategy {
        self.strategy
    }

    /// Produce the next key.
    pub fn generate(&self) -> CorrelationKey {
        // ---
        match self.strategy {
            KeyStrategy::Counter => {
                let n = self.next.fetch_add(1, Ordering::Relaxed);
                CorrelationKey(Arc::from(format!("{}.{n}", self.prefix)))
            }
            KeyStrategy::RandomToken => CorrelationKey::from(Uuid::new_v4()),
        }
    }
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    #[test]
    fn test_empty_key_rejected() {
        // ---
        let err = CorrelationKey::new("").unwrap_err();
        assert!(matches!(err, RpcError::InvalidArgument(_)));
        assert!(CorrelationKey::try_from(String::new()).is_err());
    }

    #[test]
    fn test_key_roundtrips_text() {
        // ---
        let key = CorrelationKey::try_from("req-7").unwrap();
        assert_eq!(key.as_str(), "req-7");
        assert_eq!(key.to_string(), "req-7");
    }

    #[test]
    fn test_random_token_format() {
        // ---
        let keys = KeyGenerator::new(KeyStrategy::RandomToken, "ignored");
        let id1 = keys.generate();
        let id2 = keys.generate();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), 36); // Standard UUID format
    }

    #[test]
    fn test_counter_is_sequential() {
        // ---
        let keys = KeyGenerator::new(KeyStrategy::Counter, "node-a");
        assert_eq!(keys.generate().as_str(), "node-a.1");
        assert_eq!(keys.generate().as_str(), "node-a.2");
        assert_eq!(keys.strategy(), KeyStrategy::Counter);
    }

    #[test]
    fn test_concurrent_generation_is_unique() {
        // ---
        for strategy in [KeyStrategy::Counter, KeyStrategy::RandomToken] {
            let keys = Arc::new(KeyGenerator::new(strategy, "c"));
            let seen = Arc::new(Mutex::new(HashSet::new()));

            let threads: Vec<_> = (0..8)
                .map(|_| {
                    let keys = keys.clone();
                    let seen = seen.clone();
                    std::thread::spawn(move || {
                        for _ in 0..500 {
                            let key = keys.generate();
                            assert!(seen.lock().unwrap().insert(key), "duplicate key");
                        }
                    })
                })
                .collect();

            for t in threads {
                t.join().unwrap();
            }
            assert_eq!(seen.lock().unwrap().len(), 8 * 500);
        }
    }
}
