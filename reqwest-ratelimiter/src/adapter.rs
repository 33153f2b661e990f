//! The rate-limited transport adapter.
//!
//! This module defines [`RateLimitedTransport`], which gates requests through
//! a shared [`Limiter`] before handing them to an inner [`Transport`] or
//! [`BlockingTransport`], and [`TransportBuilder`], which collects the
//! configuration and builds the adapter.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use http::{Method, StatusCode};
use reqwest::{Request, Response, blocking};
use typed_builder::TypedBuilder;
use url::Url;

use crate::response::rate_limited;
use crate::{
    BlockingTransport, BucketKey, BucketStrategy, ConfigError, Limiter, Rate, RateLimitError,
    RateSpec, RequestRate, SendError, Transport,
};

/// Builder for [`RateLimitedTransport`].
///
/// Exactly one source of rates must be set: one or more `per_*`
/// shorthands, an explicit list of [`rates`](TransportBuilder::rates), or a
/// shared [`limiter`](TransportBuilder::limiter).
///
/// ```
/// use reqwest_ratelimiter::TransportBuilder;
/// use std::time::Duration;
///
/// # fn main() -> Result<(), reqwest_ratelimiter::ConfigError> {
/// let transport = TransportBuilder::builder()
///     .per_second(5)
///     .max_delay(Duration::from_secs(2))
///     .build()
///     .transport(reqwest::Client::new())?;
/// # Ok(())
/// # }
/// ```
#[derive(TypedBuilder, Debug, Clone)]
#[builder(field_defaults(default))]
pub struct TransportBuilder {
    /// Maximum requests per second
    #[builder(setter(strip_option))]
    pub(crate) per_second: Option<u32>,

    /// Seconds' worth of `per_second` requests that may be sent back to
    /// back.
    ///
    /// `per_second(5).burst(3)` admits 15 requests in any 3 seconds. Only
    /// applies to `per_second`; unset means 1.
    #[builder(setter(strip_option))]
    pub(crate) burst: Option<u32>,

    /// Maximum requests per minute
    #[builder(setter(strip_option))]
    pub(crate) per_minute: Option<u32>,

    /// Maximum requests per hour
    #[builder(setter(strip_option))]
    pub(crate) per_hour: Option<u32>,

    /// Maximum requests per day
    #[builder(setter(strip_option))]
    pub(crate) per_day: Option<u32>,

    /// Maximum requests per four weeks
    #[builder(setter(strip_option))]
    pub(crate) per_month: Option<u32>,

    /// Explicit rates, all of which must hold at the same time.
    ///
    /// The most restrictive rate determines the effective throughput.
    pub(crate) rates: Vec<Rate>,

    /// An existing limiter to share with other adapters
    #[builder(setter(strip_option))]
    pub(crate) limiter: Option<Arc<Limiter>>,

    /// Maximum time a request may wait for capacity.
    ///
    /// Unset waits as long as needed; `Duration::ZERO` never waits.
    #[builder(setter(strip_option))]
    pub(crate) max_delay: Option<Duration>,

    /// When `true` (the default), a request that cannot get capacity within
    /// `max_delay` fails with [`SendError::RateLimited`]. Otherwise a
    /// synthetic `429 Too Many Requests` response is returned. In neither
    /// case is the request sent.
    #[builder(default = true)]
    pub(crate) raise_when_fail: bool,

    /// How requests are assigned to buckets
    pub(crate) bucket: BucketStrategy,

    /// Response status codes that signal a server-side rate limit.
    ///
    /// When a forwarded request comes back with one of these, the bucket is
    /// filled up so that following requests wait for it to replenish.
    #[builder(default_code = "HashSet::from([StatusCode::TOO_MANY_REQUESTS])")]
    pub(crate) limit_statuses: HashSet<StatusCode>,
}

impl Default for TransportBuilder {
    #[inline]
    fn default() -> Self {
        Self::builder().build()
    }
}

impl TransportBuilder {
    /// Resolve where the rates come from
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ConflictingRates`] if more than one source of
    /// rates is set, [`ConfigError::MissingRates`] if none is and
    /// [`ConfigError::ZeroBurst`] for a burst of zero seconds.
    pub fn rate_spec(&self) -> Result<RateSpec, ConfigError> {
        let per_second = match (self.per_second, self.burst) {
            (_, Some(0)) => return Err(ConfigError::ZeroBurst),
            (Some(per_second), Some(seconds)) if seconds > 1 => {
                Some(RequestRate::PerSecondBurst {
                    per_second,
                    seconds,
                })
            }
            (per_second, _) => per_second.map(RequestRate::PerSecond),
        };

        let shorthand = [
            per_second,
            self.per_minute.map(RequestRate::PerMinute),
            self.per_hour.map(RequestRate::PerHour),
            self.per_day.map(RequestRate::PerDay),
            self.per_month.map(RequestRate::PerMonth),
        ]
        .into_iter()
        .flatten()
        .collect();

        RateSpec::resolve(shorthand, self.rates.clone(), self.limiter.clone())
    }

    /// Wrap `inner` in a [`RateLimitedTransport`].
    ///
    /// # Errors
    ///
    /// Returns an `Err` if the rate configuration is conflicting, missing,
    /// or contains a rate of zero requests.
    pub fn transport<T>(self, inner: T) -> Result<RateLimitedTransport<T>, ConfigError> {
        let limiter = self.rate_spec()?.into_limiter()?;

        Ok(RateLimitedTransport {
            inner,
            limiter,
            bucket: self.bucket,
            max_delay: self.max_delay,
            raise_when_fail: self.raise_when_fail,
            limit_statuses: self.limit_statuses,
        })
    }
}

/// Outcome of [`RateLimitedTransport::dispatch`]
#[derive(Debug)]
pub enum Outcome<R> {
    /// Capacity was granted and the request was sent; this is the inner
    /// transport's response
    Forwarded(R),
    /// No capacity was granted in time; the request was not sent
    RateLimited(RateLimitError),
}

/// Transport adapter that throttles requests before sending them through an
/// inner transport.
///
/// See [`TransportBuilder`] for the available options.
#[derive(Debug, Clone)]
pub struct RateLimitedTransport<T> {
    inner: T,
    limiter: Arc<Limiter>,
    bucket: BucketStrategy,
    max_delay: Option<Duration>,
    raise_when_fail: bool,
    limit_statuses: HashSet<StatusCode>,
}

impl<T> RateLimitedTransport<T> {
    /// The limiter shared by all requests through this adapter
    #[must_use]
    pub const fn limiter(&self) -> &Arc<Limiter> {
        &self.limiter
    }

    /// The wrapped transport
    #[must_use]
    pub const fn inner(&self) -> &T {
        &self.inner
    }

    /// Unwrap the inner transport
    #[must_use]
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// The bucket a request with this method and URL draws from
    #[must_use]
    pub fn bucket_key(&self, method: &Method, url: &Url) -> BucketKey {
        self.bucket.key(method, url)
    }

    /// Fill the bucket if the server signalled a rate limit
    fn observe(&self, key: &BucketKey, status: StatusCode) {
        if self.limit_statuses.contains(&status) {
            self.limiter.saturate(key);
        }
    }

    /// Map an outcome to what the caller sees
    fn settle<R, E>(&self, outcome: Outcome<R>, url: &Url) -> Result<R, SendError<E>>
    where
        R: From<http::Response<Vec<u8>>>,
    {
        match outcome {
            Outcome::Forwarded(response) => Ok(response),
            Outcome::RateLimited(error) if self.raise_when_fail => Err(error.into()),
            Outcome::RateLimited(error) => Ok(rate_limited(url, &error).into()),
        }
    }
}

impl<T: Transport> RateLimitedTransport<T> {
    /// Acquire capacity for `request` and, if granted, forward it unchanged.
    ///
    /// Waits for capacity up to `max_delay` without blocking the thread.
    /// Errors of the inner transport are returned as they are. Dropping
    /// the future while it waits cancels the request; it is never sent.
    ///
    /// # Errors
    ///
    /// Returns the inner transport's error if sending fails.
    pub async fn dispatch(&self, request: Request) -> Result<Outcome<Response>, T::Error> {
        let key = self.bucket_key(request.method(), request.url());
        if let Err(error) = self.limiter.acquire(&key, self.max_delay).await {
            return Ok(Outcome::RateLimited(error));
        }

        log::trace!("Forwarding {} {} (bucket {key})", request.method(), request.url());
        let response = self.inner.send(request).await?;
        self.observe(&key, response.status());
        Ok(Outcome::Forwarded(response))
    }

    /// Send `request` through the rate limiter.
    ///
    /// # Errors
    ///
    /// Returns [`SendError::RateLimited`] if no capacity was granted within
    /// `max_delay` and `raise_when_fail` is set, and [`SendError::Transport`]
    /// if the inner transport fails.
    pub async fn send(&self, request: Request) -> Result<Response, SendError<T::Error>> {
        let url = request.url().clone();
        let outcome = self
            .dispatch(request)
            .await
            .map_err(SendError::Transport)?;
        self.settle(outcome, &url)
    }
}

impl<T: BlockingTransport> RateLimitedTransport<T> {
    /// Blocking version of [`RateLimitedTransport::dispatch`]
    ///
    /// # Errors
    ///
    /// Returns the inner transport's error if sending fails.
    pub fn dispatch_blocking(
        &self,
        request: blocking::Request,
    ) -> Result<Outcome<blocking::Response>, T::Error> {
        let key = self.bucket_key(request.method(), request.url());
        if let Err(error) = self.limiter.acquire_blocking(&key, self.max_delay) {
            return Ok(Outcome::RateLimited(error));
        }

        log::trace!("Forwarding {} {} (bucket {key})", request.method(), request.url());
        let response = self.inner.send(request)?;
        self.observe(&key, response.status());
        Ok(Outcome::Forwarded(response))
    }

    /// Blocking version of [`RateLimitedTransport::send`]
    ///
    /// # Errors
    ///
    /// See [`RateLimitedTransport::send`].
    pub fn send_blocking(
        &self,
        request: blocking::Request,
    ) -> Result<blocking::Response, SendError<T::Error>> {
        let url = request.url().clone();
        let outcome = self
            .dispatch_blocking(request)
            .map_err(SendError::Transport)?;
        self.settle(outcome, &url)
    }
}

#[async_trait]
impl<T: Transport> Transport for RateLimitedTransport<T> {
    type Error = SendError<T::Error>;

    async fn send(&self, request: Request) -> Result<Response, Self::Error> {
        RateLimitedTransport::send(self, request).await
    }
}

impl<T: BlockingTransport> BlockingTransport for RateLimitedTransport<T> {
    type Error = SendError<T::Error>;

    fn send(&self, request: blocking::Request) -> Result<blocking::Response, Self::Error> {
        self.send_blocking(request)
    }
}
