//! Per-bucket accounting of granted requests.
//!
//! A [`Limiter`] remembers when the requests of each bucket were granted.
//! A rate of `N` requests per `T` admits a request only while fewer than `N`
//! grants of the same bucket lie within the last `T`; anything beyond that
//! waits until the oldest grant leaves the interval.

use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::window::Window;
use crate::{BucketKey, ConfigError, Rate, RateLimitError};

const ONE: NonZeroU32 = NonZeroU32::MIN;

/// Number of grants between two sweeps of idle buckets
const RETAIN_EVERY: usize = 1024;

/// Shared rate limiter enforcing several [`Rate`]s at once, per bucket.
///
/// `Limiter` is `Send + Sync`; wrap it in an [`std::sync::Arc`] to share
/// it between adapters.
///
/// # Examples
///
/// ```
/// use reqwest_ratelimiter::{BucketKey, Limiter, Rate};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let limiter = Limiter::new(vec![Rate::new(2, Duration::from_secs(1))?])?;
/// let key = BucketKey::global();
///
/// limiter.acquire(&key, None).await?;
/// limiter.acquire(&key, None).await?;
/// // The third request in the same second would have to wait
/// assert!(limiter.acquire(&key, Some(Duration::ZERO)).await.is_err());
/// # Ok(())
/// # }
/// ```
pub struct Limiter {
    rates: Vec<Rate>,
    buckets: DashMap<BucketKey, Vec<Window>>,
    grants: AtomicUsize,
}

/// Time budget of a single acquire call
struct Deadline {
    started: Instant,
    max_delay: Option<Duration>,
}

impl Deadline {
    fn new(max_delay: Option<Duration>) -> Self {
        Self {
            started: Instant::now(),
            max_delay,
        }
    }

    /// Check that waiting another `wait` stays within `max_delay`
    fn allow(&self, key: &BucketKey, wait: Duration) -> Result<(), RateLimitError> {
        let required = self.started.elapsed() + wait;
        match self.max_delay {
            Some(max_delay) if required > max_delay => {
                log::warn!(
                    "Bucket {key} exhausted: waiting {}ms exceeds max delay of {}ms",
                    required.as_millis(),
                    max_delay.as_millis()
                );
                Err(RateLimitError::CapacityExhausted {
                    key: key.clone(),
                    required,
                })
            }
            _ => Ok(()),
        }
    }
}

impl Limiter {
    /// Create a limiter enforcing all of the given rates
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingRates`] if `rates` is empty.
    pub fn new(rates: Vec<Rate>) -> Result<Self, ConfigError> {
        if rates.is_empty() {
            return Err(ConfigError::MissingRates);
        }

        Ok(Self {
            rates,
            buckets: DashMap::new(),
            grants: AtomicUsize::new(0),
        })
    }

    /// The rates enforced by this limiter, in order
    #[must_use]
    pub fn rates(&self) -> &[Rate] {
        &self.rates
    }

    /// Number of buckets currently tracked
    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no bucket is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Acquire one unit of capacity for `key`, waiting asynchronously.
    ///
    /// With `max_delay` set to `None` this waits as long as needed.
    /// Dropping the returned future cancels the wait.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::CapacityExhausted`] if the wait would
    /// exceed `max_delay`.
    pub async fn acquire(
        &self,
        key: &BucketKey,
        max_delay: Option<Duration>,
    ) -> Result<(), RateLimitError> {
        self.acquire_n(key, ONE, max_delay).await
    }

    /// Acquire `cost` units of capacity for `key`, waiting asynchronously.
    ///
    /// The units are taken from all rates at once, or from none of them.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::CapacityExhausted`] if the wait would
    /// exceed `max_delay`, or [`RateLimitError::InsufficientCapacity`] if
    /// `cost` is larger than the limit of one of the rates.
    pub async fn acquire_n(
        &self,
        key: &BucketKey,
        cost: NonZeroU32,
        max_delay: Option<Duration>,
    ) -> Result<(), RateLimitError> {
        let deadline = Deadline::new(max_delay);
        loop {
            let wait = self.try_acquire(key, cost)?;
            if wait.is_zero() {
                return Ok(());
            }
            deadline.allow(key, wait)?;
            log::debug!("Bucket {key} at capacity, waiting {}ms", wait.as_millis());
            tokio::time::sleep(wait).await;
        }
    }

    /// Acquire one unit of capacity for `key`, blocking the current thread.
    ///
    /// Do not call this from within an async runtime; use
    /// [`Limiter::acquire`] there.
    ///
    /// # Errors
    ///
    /// Returns [`RateLimitError::CapacityExhausted`] if the wait would
    /// exceed `max_delay`.
    pub fn acquire_blocking(
        &self,
        key: &BucketKey,
        max_delay: Option<Duration>,
    ) -> Result<(), RateLimitError> {
        self.acquire_n_blocking(key, ONE, max_delay)
    }

    /// Acquire `cost` units of capacity for `key`, blocking the current thread
    ///
    /// # Errors
    ///
    /// See [`Limiter::acquire_n`].
    pub fn acquire_n_blocking(
        &self,
        key: &BucketKey,
        cost: NonZeroU32,
        max_delay: Option<Duration>,
    ) -> Result<(), RateLimitError> {
        let deadline = Deadline::new(max_delay);
        loop {
            let wait = self.try_acquire(key, cost)?;
            if wait.is_zero() {
                return Ok(());
            }
            deadline.allow(key, wait)?;
            log::debug!("Bucket {key} at capacity, blocking for {}ms", wait.as_millis());
            std::thread::sleep(wait);
        }
    }

    /// Use up the remaining capacity of the first rate for `key`.
    ///
    /// Called when the server reports that a rate limit was hit although
    /// this limiter still had capacity: the next request for `key` then
    /// waits a full interval of that rate. If the server enforces several
    /// limits there is no way to tell which one was hit, so only the first
    /// rate is filled.
    pub fn saturate(&self, key: &BucketKey) {
        let now = Instant::now();
        let filled = self
            .bucket(key)
            .first_mut()
            .map_or(0, |window| window.fill(now));

        if let Some(rate) = self.rates.first() {
            log::info!(
                "Rate limit exceeded for bucket {key}; filled {filled} units of rate {rate}"
            );
        }
    }

    /// Forget buckets without a grant inside any of their intervals.
    ///
    /// This runs on its own every so many grants; call it directly to free
    /// memory right away, e.g. after a crawl over many hosts.
    pub fn retain_recent(&self) {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, windows| !windows.iter_mut().all(|window| window.is_idle(now)));
        self.buckets.shrink_to_fit();
        log::trace!(
            "Dropped {} idle buckets, {} left",
            before.saturating_sub(self.buckets.len()),
            self.buckets.len()
        );
    }

    /// Grant `cost` units if every rate has room for them, otherwise
    /// return how long to wait before trying again
    fn try_acquire(&self, key: &BucketKey, cost: NonZeroU32) -> Result<Duration, RateLimitError> {
        if let Some(rate) = self.rates.iter().find(|rate| cost > rate.limit()) {
            log::warn!("Bucket {key} cannot grant {cost} units for rate {rate}");
            return Err(RateLimitError::InsufficientCapacity {
                key: key.clone(),
                cost: cost.get(),
                capacity: rate.limit().get(),
            });
        }

        let now = Instant::now();
        let mut windows = self.bucket(key);
        let wait = windows
            .iter_mut()
            .map(|window| window.wait(cost.get(), now))
            .max()
            .unwrap_or_default();
        if !wait.is_zero() {
            return Ok(wait);
        }

        for window in windows.iter_mut() {
            window.push(cost.get(), now);
        }
        drop(windows);

        if self.grants.fetch_add(1, Ordering::Relaxed) % RETAIN_EVERY == RETAIN_EVERY - 1 {
            self.retain_recent();
        }
        Ok(Duration::ZERO)
    }

    fn bucket(&self, key: &BucketKey) -> dashmap::mapref::one::RefMut<'_, BucketKey, Vec<Window>> {
        self.buckets
            .entry(key.clone())
            .or_insert_with(|| self.rates.iter().copied().map(Window::new).collect())
    }
}

impl fmt::Debug for Limiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limiter")
            .field("rates", &self.rates)
            .field("buckets", &self.buckets.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::max_in_window;
    use std::sync::Arc;

    fn limiter(limit: u32, interval: Duration) -> Limiter {
        Limiter::new(vec![Rate::new(limit, interval).unwrap()]).unwrap()
    }

    #[test]
    fn test_limiter_requires_rates() {
        assert!(matches!(
            Limiter::new(vec![]),
            Err(ConfigError::MissingRates)
        ));
    }

    #[tokio::test]
    async fn test_burst_is_granted_immediately() {
        let limiter = limiter(5, Duration::from_secs(60));
        let key = BucketKey::global();

        for _ in 0..5 {
            limiter.acquire(&key, Some(Duration::ZERO)).await.unwrap();
        }
        let error = limiter
            .acquire(&key, Some(Duration::ZERO))
            .await
            .unwrap_err();

        let RateLimitError::CapacityExhausted { key, required } = error else {
            panic!("expected exhausted bucket, got {error:?}");
        };
        assert_eq!(key, BucketKey::global());
        // The first grant leaves the window after a full minute
        assert!(required > Duration::from_secs(59), "{required:?}");
        assert!(required <= Duration::from_secs(60), "{required:?}");
    }

    #[tokio::test]
    async fn test_next_request_waits_a_full_interval() {
        let limiter = limiter(2, Duration::from_millis(300));
        let key = BucketKey::global();

        let start = Instant::now();
        for _ in 0..3 {
            limiter.acquire(&key, None).await.unwrap();
        }
        assert!(start.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_rolling_window_is_never_exceeded() {
        let limiter = limiter(5, Duration::from_secs(1));
        let key = BucketKey::global();

        let mut granted = Vec::new();
        for _ in 0..12 {
            limiter.acquire(&key, None).await.unwrap();
            granted.push(Instant::now());
        }

        // Timestamps are taken just after each grant, allow for a little jitter
        let second = Duration::from_millis(990);
        assert!(granted[5].duration_since(granted[0]) >= second);
        assert!(granted[10].duration_since(granted[5]) >= second);
        assert_eq!(max_in_window(&granted, second), 5);
    }

    #[tokio::test]
    async fn test_max_delay_allows_short_waits() {
        let limiter = limiter(1, Duration::from_millis(50));
        let key = BucketKey::global();

        limiter.acquire(&key, None).await.unwrap();
        limiter
            .acquire(&key, Some(Duration::from_millis(500)))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_buckets_are_independent() {
        let limiter = limiter(1, Duration::from_secs(60));

        let a = BucketKey::from("a.example.com");
        let b = BucketKey::from("b.example.com");
        limiter.acquire(&a, Some(Duration::ZERO)).await.unwrap();
        limiter.acquire(&b, Some(Duration::ZERO)).await.unwrap();
        assert!(limiter.acquire(&a, Some(Duration::ZERO)).await.is_err());
    }

    #[tokio::test]
    async fn test_most_restrictive_rate_dominates() {
        let limiter = Limiter::new(vec![
            Rate::new(10, Duration::from_secs(1)).unwrap(),
            Rate::new(3, Duration::from_secs(60)).unwrap(),
        ])
        .unwrap();
        let key = BucketKey::global();

        for _ in 0..3 {
            limiter.acquire(&key, Some(Duration::ZERO)).await.unwrap();
        }
        let error = limiter
            .acquire(&key, Some(Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert!(error.required_wait().unwrap() > Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_refused_request_takes_nothing_from_other_rates() {
        let limiter = Limiter::new(vec![
            Rate::new(3, Duration::from_secs(60)).unwrap(),
            Rate::new(1, Duration::from_millis(100)).unwrap(),
        ])
        .unwrap();
        let key = BucketKey::global();

        limiter.acquire(&key, None).await.unwrap();
        // Refused by the second rate; the first one keeps its two units
        assert!(limiter.acquire(&key, Some(Duration::ZERO)).await.is_err());
        assert!(limiter.acquire(&key, Some(Duration::ZERO)).await.is_err());

        limiter.acquire(&key, None).await.unwrap();
        limiter.acquire(&key, None).await.unwrap();
        assert!(limiter.acquire(&key, Some(Duration::from_secs(1))).await.is_err());
    }

    #[tokio::test]
    async fn test_cost_above_capacity() {
        let limiter = Limiter::new(vec![
            Rate::new(10, Duration::from_secs(1)).unwrap(),
            Rate::new(3, Duration::from_secs(60)).unwrap(),
        ])
        .unwrap();
        let key = BucketKey::global();

        let error = limiter
            .acquire_n(&key, NonZeroU32::new(4).unwrap(), None)
            .await
            .unwrap_err();
        assert_eq!(
            error,
            RateLimitError::InsufficientCapacity {
                key: key.clone(),
                cost: 4,
                capacity: 3,
            }
        );

        // Nothing was taken from the first rate
        for _ in 0..3 {
            limiter.acquire(&key, Some(Duration::ZERO)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_wait_can_be_cancelled() {
        let limiter = Arc::new(limiter(1, Duration::from_millis(300)));
        let key = BucketKey::global();

        limiter.acquire(&key, None).await.unwrap();
        let waiting = tokio::time::timeout(Duration::from_millis(50), limiter.acquire(&key, None));
        assert!(waiting.await.is_err());

        // The cancelled request left no grant behind
        tokio::time::sleep(Duration::from_millis(300)).await;
        limiter.acquire(&key, Some(Duration::ZERO)).await.unwrap();
    }

    #[test]
    fn test_blocking_acquire() {
        let limiter = limiter(1, Duration::from_millis(100));
        let key = BucketKey::global();

        let start = Instant::now();
        limiter.acquire_blocking(&key, None).unwrap();
        limiter.acquire_blocking(&key, None).unwrap();
        assert!(start.elapsed() >= Duration::from_millis(100));

        assert!(matches!(
            limiter.acquire_blocking(&key, Some(Duration::ZERO)),
            Err(RateLimitError::CapacityExhausted { .. })
        ));
    }

    #[tokio::test]
    async fn test_saturate() {
        let limiter = limiter(5, Duration::from_secs(1));
        let key = BucketKey::global();

        limiter.acquire(&key, Some(Duration::ZERO)).await.unwrap();
        let start = Instant::now();
        limiter.saturate(&key);
        assert!(limiter.acquire(&key, Some(Duration::ZERO)).await.is_err());

        limiter.acquire(&key, None).await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_retain_recent_drops_idle_buckets() {
        let limiter = limiter(1, Duration::from_millis(50));

        for host in ["a", "b", "c"] {
            limiter.acquire(&BucketKey::from(host), None).await.unwrap();
        }
        assert_eq!(limiter.len(), 3);

        limiter.retain_recent();
        assert_eq!(limiter.len(), 3);

        tokio::time::sleep(Duration::from_millis(60)).await;
        limiter.acquire(&BucketKey::from("d"), None).await.unwrap();
        limiter.retain_recent();
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test]
    async fn test_idle_buckets_are_swept_periodically() {
        let limiter = limiter(1, Duration::from_millis(20));

        limiter.acquire(&BucketKey::from("stale"), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        for i in 1..RETAIN_EVERY {
            let key = BucketKey::from(format!("key-{i}"));
            limiter.acquire(&key, Some(Duration::ZERO)).await.unwrap();
        }
        assert!(limiter.len() < RETAIN_EVERY);
    }
}
