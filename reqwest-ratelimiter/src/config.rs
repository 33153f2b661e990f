use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::{BucketStrategy, ConfigError, Limiter, Rate, RequestRate, TransportBuilder};

/// Where the rates of a [`crate::RateLimitedTransport`] come from.
///
/// Resolved once when the adapter is built; see [`RateSpec::resolve`].
#[derive(Debug, Clone)]
pub enum RateSpec {
    /// One or more `per_*` shorthands, each expanding into one [`Rate`]
    Shorthand(Vec<RequestRate>),
    /// An explicit, ordered list of rates
    Explicit(Vec<Rate>),
    /// An existing limiter shared with other adapters
    Shared(Arc<Limiter>),
}

impl RateSpec {
    /// Pick the single source of rates among the given ones
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ConflictingRates`] if more than one source is
    /// non-empty and [`ConfigError::MissingRates`] if all of them are empty.
    pub fn resolve(
        shorthand: Vec<RequestRate>,
        explicit: Vec<Rate>,
        shared: Option<Arc<Limiter>>,
    ) -> Result<Self, ConfigError> {
        match (shorthand.is_empty(), explicit.is_empty(), shared) {
            (false, true, None) => Ok(Self::Shorthand(shorthand)),
            (true, false, None) => Ok(Self::Explicit(explicit)),
            (true, true, Some(limiter)) => Ok(Self::Shared(limiter)),
            (true, true, None) => Err(ConfigError::MissingRates),
            _ => Err(ConfigError::ConflictingRates),
        }
    }

    /// Build (or reuse) the limiter for this specification
    ///
    /// # Errors
    ///
    /// Returns an error if a shorthand allows zero requests.
    pub fn into_limiter(self) -> Result<Arc<Limiter>, ConfigError> {
        match self {
            Self::Shorthand(shorthand) => {
                let rates = shorthand
                    .into_iter()
                    .map(RequestRate::to_rate)
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Arc::new(Limiter::new(rates)?))
            }
            Self::Explicit(rates) => Ok(Arc::new(Limiter::new(rates)?)),
            Self::Shared(limiter) => Ok(limiter),
        }
    }
}

/// Rate limiting configuration, as read from a TOML file.
///
/// ```toml
/// per_second = 5
/// max_delay = "2s"
/// raise_when_fail = false
/// bucket = "per-host"
/// ```
///
/// or, with explicit rates:
///
/// ```toml
/// rates = ["10/1s", "500/1h"]
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Maximum requests per second
    pub per_second: Option<u32>,
    /// Seconds' worth of `per_second` requests allowed back to back
    pub burst: Option<u32>,
    /// Maximum requests per minute
    pub per_minute: Option<u32>,
    /// Maximum requests per hour
    pub per_hour: Option<u32>,
    /// Maximum requests per day
    pub per_day: Option<u32>,
    /// Maximum requests per four weeks
    pub per_month: Option<u32>,

    /// Explicit rates, e.g. `["5/1s", "100/1m"]`
    #[serde(default)]
    pub rates: Vec<Rate>,

    /// Maximum time to wait for capacity; unset waits indefinitely
    #[serde(default, with = "humantime_serde")]
    pub max_delay: Option<Duration>,

    /// Fail with an error instead of returning a 429 response when the
    /// bucket is exhausted
    #[serde(default = "default_raise_when_fail")]
    pub raise_when_fail: bool,

    /// How requests are assigned to buckets
    #[serde(default)]
    pub bucket: BucketStrategy,

    /// Response status codes that signal a server-side rate limit
    #[serde(default = "default_limit_statuses")]
    pub limit_statuses: Vec<u16>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            per_second: None,
            burst: None,
            per_minute: None,
            per_hour: None,
            per_day: None,
            per_month: None,
            rates: Vec::new(),
            max_delay: None,
            raise_when_fail: default_raise_when_fail(),
            bucket: BucketStrategy::default(),
            limit_statuses: default_limit_statuses(),
        }
    }
}

const fn default_raise_when_fail() -> bool {
    true
}

fn default_limit_statuses() -> Vec<u16> {
    vec![StatusCode::TOO_MANY_REQUESTS.as_u16()]
}

impl RateLimitConfig {
    /// Load the configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is not valid TOML.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        Self::from_str(&contents)
    }

    /// Convert into a [`TransportBuilder`]
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidStatusCode`] for an entry of
    /// `limit_statuses` that is not a valid HTTP status code.
    pub fn into_builder(self) -> Result<TransportBuilder, ConfigError> {
        let limit_statuses = self
            .limit_statuses
            .iter()
            .map(|&code| StatusCode::from_u16(code).map_err(|_| ConfigError::InvalidStatusCode(code)))
            .collect::<Result<HashSet<_>, _>>()?;

        Ok(TransportBuilder {
            per_second: self.per_second,
            burst: self.burst,
            per_minute: self.per_minute,
            per_hour: self.per_hour,
            per_day: self.per_day,
            per_month: self.per_month,
            rates: self.rates,
            limiter: None,
            max_delay: self.max_delay,
            raise_when_fail: self.raise_when_fail,
            bucket: self.bucket,
            limit_statuses,
        })
    }
}

impl FromStr for RateLimitConfig {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(input)?)
    }
}
