//! Stale Data Guard
//!
//! Decides whether a streamed price can be trusted. Evaluation is pure: the
//! caller passes the last tick time and "now", so the same inputs always give
//! the same answer and tests need no sleeping.
//!
//! On staleness the caller falls back to the last historical value from the
//! market-data collaborator instead of blocking on the feed.

use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Check if a tick is too old to trust
///
/// - No tick ever seen: stale
/// - `now - last_tick_at > threshold`: stale
/// - Tick timestamp in the future (clock skew): fresh
#[inline]
pub fn is_stale(last_tick_at: Option<SystemTime>, now: SystemTime, threshold: Duration) -> bool {
    match last_tick_at {
        None => true,
        Some(at) => match now.duration_since(at) {
            Ok(age) => age > threshold,
            Err(_) => false,
        },
    }
}

/// Where a price used in a computation came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    /// Fresh tick from the live feed
    Live,
    /// Last historical close, used because the feed was stale or absent
    Historical,
}

/// Staleness policy with a fixed threshold
#[derive(Debug, Clone, Copy)]
pub struct DataGuard {
    threshold: Duration,
}

impl DataGuard {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> Duration {
        self.threshold
    }

    #[inline]
    pub fn is_stale(&self, last_tick_at: Option<SystemTime>, now: SystemTime) -> bool {
        is_stale(last_tick_at, now, self.threshold)
    }

    /// Pick the live price when fresh, otherwise the historical fallback
    ///
    /// Returns `None` only when neither source has a value.
    pub fn resolve(
        &self,
        live: Option<(f64, SystemTime)>,
        historical: Option<f64>,
        now: SystemTime,
    ) -> Option<(f64, PriceSource)> {
        match live {
            Some((price, at)) if !self.is_stale(Some(at), now) && price.is_finite() => {
                Some((price, PriceSource::Live))
            }
            _ => historical
                .filter(|p| p.is_finite())
                .map(|p| (p, PriceSource::Historical)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000)
    }

    #[test]
    fn test_stale_after_threshold() {
        let t = t0();
        assert!(is_stale(
            Some(t),
            t + Duration::from_secs(61),
            Duration::from_secs(60)
        ));
    }

    #[test]
    fn test_fresh_before_threshold() {
        let t = t0();
        assert!(!is_stale(
            Some(t),
            t + Duration::from_secs(59),
            Duration::from_secs(60)
        ));
    }

    #[test]
    fn test_exact_threshold_is_fresh() {
        let t = t0();
        assert!(!is_stale(
            Some(t),
            t + Duration::from_secs(60),
            Duration::from_secs(60)
        ));
    }

    #[test]
    fn test_never_ticked_is_stale() {
        assert!(is_stale(None, t0(), Duration::from_secs(60)));
    }

    #[test]
    fn test_future_tick_is_fresh() {
        let t = t0();
        assert!(!is_stale(
            Some(t + Duration::from_secs(5)),
            t,
            Duration::from_secs(60)
        ));
    }

    #[test]
    fn test_resolve_prefers_fresh_live_price() {
        let guard = DataGuard::new(Duration::from_secs(60));
        let now = t0();
        let resolved = guard.resolve(Some((101.5, now - Duration::from_secs(1))), Some(99.0), now);
        assert_eq!(resolved, Some((101.5, PriceSource::Live)));
    }

    #[test]
    fn test_resolve_falls_back_when_stale() {
        let guard = DataGuard::new(Duration::from_secs(60));
        let now = t0();
        let resolved = guard.resolve(
            Some((101.5, now - Duration::from_secs(120))),
            Some(99.0),
            now,
        );
        assert_eq!(resolved, Some((99.0, PriceSource::Historical)));
    }

    #[test]
    fn test_resolve_without_any_source() {
        let guard = DataGuard::new(Duration::from_secs(60));
        assert_eq!(guard.resolve(None, None, t0()), None);
        assert_eq!(guard.resolve(None, Some(f64::NAN), t0()), None);
    }
}
