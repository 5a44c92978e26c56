//! Single-slot TTL cache.
//!
//! Both the credential store and the subscription resolver cache one value
//! with an expiry and an explicit invalidation entry point. This replaces
//! the ad hoc `value + expiry-timestamp` pairs those components would
//! otherwise each carry.

use std::time::{Duration, Instant};

/// A one-value cache with a fixed time-to-live.
///
/// Expiry is checked on read; nothing refreshes in the background.
#[derive(Debug)]
pub struct TtlCache<T> {
    ttl: Duration,
    slot: Option<(T, Instant)>,
}

impl<T: Clone> TtlCache<T> {
    /// Create an empty cache with the given TTL.
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, slot: None }
    }

    /// Return the cached value if present and not expired.
    pub fn get(&self) -> Option<T> {
        match &self.slot {
            Some((value, expiry)) if Instant::now() < *expiry => Some(value.clone()),
            _ => None,
        }
    }

    /// Store a value, resetting the expiry to now + TTL.
    pub fn set(&mut self, value: T) {
        self.slot = Some((value, Instant::now() + self.ttl));
    }

    /// Drop the cached value.
    pub fn invalidate(&mut self) {
        self.slot = None;
    }

    /// Whether a live value is currently cached.
    pub fn is_fresh(&self) -> bool {
        matches!(&self.slot, Some((_, expiry)) if Instant::now() < *expiry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_cache_misses() {
        let cache: TtlCache<String> = TtlCache::new(Duration::from_secs(60));
        assert!(cache.get().is_none());
        assert!(!cache.is_fresh());
    }

    #[test]
    fn test_set_then_get() {
        let mut cache = TtlCache::new(Duration::from_secs(60));
        cache.set(42u32);
        assert_eq!(cache.get(), Some(42));
        assert!(cache.is_fresh());
    }

    #[test]
    fn test_expired_value_misses() {
        let mut cache = TtlCache::new(Duration::ZERO);
        cache.set("value".to_string());
        assert!(cache.get().is_none());
    }

    #[test]
    fn test_invalidate() {
        let mut cache = TtlCache::new(Duration::from_secs(60));
        cache.set(1u8);
        cache.invalidate();
        assert!(cache.get().is_none());
    }

    #[test]
    fn test_set_resets_expiry() {
        let mut cache = TtlCache::new(Duration::from_secs(60));
        cache.set(1u8);
        cache.set(2u8);
        assert_eq!(cache.get(), Some(2));
    }
}
