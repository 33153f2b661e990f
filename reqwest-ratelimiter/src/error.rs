use std::path::PathBuf;
use std::time::Duration;

use humantime_serde::re::humantime;
use thiserror::Error;

use crate::BucketKey;

/// Errors raised while building a [`crate::RateLimitedTransport`]
///
/// These are always surfaced to the caller; a contradictory or incomplete
/// rate specification is never silently defaulted.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ConfigError {
    /// More than one source of rates was given, e.g. `per_second` together
    /// with an explicit rate list
    #[error(
        "Conflicting rate configuration: use either `per_*` shorthands, an explicit rate list, or a shared limiter"
    )]
    ConflictingRates,

    /// No rate was given at all
    #[error(
        "Missing rate configuration: set a `per_*` shorthand, an explicit rate list, or a shared limiter"
    )]
    MissingRates,

    /// A rate allows zero requests
    #[error("Rate limit must be greater than zero")]
    ZeroLimit,

    /// A rate has an empty interval
    #[error("Rate interval must not be zero")]
    ZeroInterval,

    /// `burst` is zero
    #[error("Burst must be at least one second")]
    ZeroBurst,

    /// A rate string such as `5/1s` could not be parsed
    #[error("Cannot parse rate `{0}`: {1}")]
    InvalidRate(String, String),

    /// A status code in `limit_statuses` is not a valid HTTP status
    #[error("Invalid HTTP status code: {0}")]
    InvalidStatusCode(u16),

    /// The configuration file could not be read
    #[error("Failed to read configuration file `{}`: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    /// The configuration file is not valid TOML for a [`crate::RateLimitConfig`]
    #[error("Failed to parse configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

/// A request could not obtain capacity from its bucket
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RateLimitError {
    /// Acquiring capacity would have taken longer than `max_delay`
    #[error(
        "Bucket `{key}` is exhausted: acquiring would require waiting {}",
        humantime::format_duration(*required)
    )]
    CapacityExhausted {
        /// Bucket the request was drawing from
        key: BucketKey,
        /// Total wait this request would have needed
        required: Duration,
    },

    /// The request costs more than the bucket can ever hold
    #[error("Bucket `{key}` can never grant {cost} units (capacity is {capacity})")]
    InsufficientCapacity {
        /// Bucket the request was drawing from
        key: BucketKey,
        /// Units requested
        cost: u32,
        /// Burst capacity of the smallest matching rate
        capacity: u32,
    },
}

impl RateLimitError {
    /// The bucket the failed request was drawing from
    #[must_use]
    pub const fn key(&self) -> &BucketKey {
        match self {
            Self::CapacityExhausted { key, .. } | Self::InsufficientCapacity { key, .. } => key,
        }
    }

    /// How long the request would have had to wait, if that is known
    #[must_use]
    pub const fn required_wait(&self) -> Option<Duration> {
        match self {
            Self::CapacityExhausted { required, .. } => Some(*required),
            Self::InsufficientCapacity { .. } => None,
        }
    }
}

/// Error returned by [`crate::RateLimitedTransport::send`]
///
/// Errors of the inner transport are kept as they are in
/// [`SendError::Transport`]; the adapter never inspects or rewrites them.
#[derive(Error, Debug)]
pub enum SendError<E> {
    /// The bucket had no capacity in time and `raise_when_fail` is set
    #[error(transparent)]
    RateLimited(#[from] RateLimitError),

    /// The inner transport failed
    #[error(transparent)]
    Transport(E),
}

impl<E> SendError<E> {
    /// Returns the inner transport error, if this is one
    pub fn into_transport(self) -> Option<E> {
        match self {
            Self::Transport(e) => Some(e),
            Self::RateLimited(_) => None,
        }
    }
}
