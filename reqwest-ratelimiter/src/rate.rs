use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Duration;

use humantime_serde::re::humantime;
use serde::{Deserialize, Serialize, Serializer};

use crate::ConfigError;

const MINUTE: Duration = Duration::from_secs(60);
const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);
/// A "month" is four weeks
const MONTH: Duration = Duration::from_secs(4 * 7 * 24 * 60 * 60);

/// At most `limit` requests per `interval`.
///
/// A rate is written as `<limit>/<interval>`, where the interval uses
/// [humantime](https://docs.rs/humantime) syntax:
///
/// ```
/// use reqwest_ratelimiter::Rate;
/// use std::time::Duration;
///
/// let rate: Rate = "100/10m".parse().unwrap();
/// assert_eq!(rate.limit().get(), 100);
/// assert_eq!(rate.interval(), Duration::from_secs(600));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rate {
    limit: NonZeroU32,
    interval: Duration,
}

impl Rate {
    /// Create a new rate
    ///
    /// # Errors
    ///
    /// Returns an error if `limit` or `interval` is zero.
    pub fn new(limit: u32, interval: Duration) -> Result<Self, ConfigError> {
        let limit = NonZeroU32::new(limit).ok_or(ConfigError::ZeroLimit)?;
        if interval.is_zero() {
            return Err(ConfigError::ZeroInterval);
        }
        Ok(Self { limit, interval })
    }

    /// Maximum number of requests per interval
    #[must_use]
    pub const fn limit(&self) -> NonZeroU32 {
        self.limit
    }

    /// Length of the interval
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }
}

impl fmt::Display for Rate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}",
            self.limit,
            humantime::format_duration(self.interval)
        )
    }
}

impl FromStr for Rate {
    type Err = ConfigError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| ConfigError::InvalidRate(input.to_string(), reason.to_string());

        let (limit, interval) = input
            .split_once('/')
            .ok_or_else(|| invalid("expected `<limit>/<interval>`, e.g. `5/1s`"))?;
        let limit = limit
            .trim()
            .parse::<u32>()
            .map_err(|e| invalid(&e.to_string()))?;
        let interval = interval
            .trim()
            .parse::<humantime::Duration>()
            .map_err(|e| invalid(&e.to_string()))?;

        Rate::new(limit, interval.into())
    }
}

impl Serialize for Rate {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Rate {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let string = <String>::deserialize(deserializer)?;
        Self::from_str(&string).map_err(serde::de::Error::custom)
    }
}

/// Shorthand for the most common rate intervals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestRate {
    /// Requests per second
    PerSecond(u32),
    /// Requests per minute
    PerMinute(u32),
    /// Requests per hour
    PerHour(u32),
    /// Requests per day
    PerDay(u32),
    /// Requests per four weeks
    PerMonth(u32),
    /// `per_second` requests per second that may be saved up for `seconds`
    /// seconds and then sent back to back
    PerSecondBurst {
        /// Requests per second
        per_second: u32,
        /// Seconds' worth of requests allowed in one burst
        seconds: u32,
    },
}

impl RequestRate {
    /// Expand the shorthand into a single [`Rate`]
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroLimit`] if the shorthand allows no requests.
    pub fn to_rate(self) -> Result<Rate, ConfigError> {
        let (limit, interval) = match self {
            Self::PerSecond(limit) => (limit, Duration::from_secs(1)),
            Self::PerMinute(limit) => (limit, MINUTE),
            Self::PerHour(limit) => (limit, HOUR),
            Self::PerDay(limit) => (limit, DAY),
            Self::PerMonth(limit) => (limit, MONTH),
            Self::PerSecondBurst {
                per_second,
                seconds,
            } => (
                per_second.saturating_mul(seconds),
                Duration::from_secs(seconds.into()),
            ),
        };
        Rate::new(limit, interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case(RequestRate::PerSecond(5), 5, Duration::from_secs(1))]
    #[case(RequestRate::PerMinute(60), 60, MINUTE)]
    #[case(RequestRate::PerHour(1000), 1000, HOUR)]
    #[case(RequestRate::PerDay(10_000), 10_000, DAY)]
    #[case(RequestRate::PerMonth(1), 1, Duration::from_secs(2_419_200))]
    #[case(RequestRate::PerSecondBurst { per_second: 5, seconds: 3 }, 15, Duration::from_secs(3))]
    fn test_shorthand_expansion(
        #[case] shorthand: RequestRate,
        #[case] limit: u32,
        #[case] interval: Duration,
    ) {
        let rate = shorthand.to_rate().unwrap();
        assert_eq!(rate.limit().get(), limit);
        assert_eq!(rate.interval(), interval);
    }

    #[test]
    fn test_zero_shorthand() {
        assert!(matches!(
            RequestRate::PerMinute(0).to_rate(),
            Err(ConfigError::ZeroLimit)
        ));
    }

    #[rstest]
    #[case("5/1s", 5, Duration::from_secs(1))]
    #[case("100 / 10m", 100, Duration::from_secs(600))]
    #[case("3/250ms", 3, Duration::from_millis(250))]
    fn test_from_str(#[case] input: &str, #[case] limit: u32, #[case] interval: Duration) {
        let rate = Rate::from_str(input).unwrap();
        assert_eq!(rate, Rate::new(limit, interval).unwrap());
    }

    #[rstest]
    #[case("5")]
    #[case("five/1s")]
    #[case("5/soon")]
    #[case("-1/1s")]
    fn test_from_str_invalid(#[case] input: &str) {
        assert!(matches!(
            Rate::from_str(input),
            Err(ConfigError::InvalidRate(s, _)) if s == input
        ));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            Rate::new(0, Duration::from_secs(1)),
            Err(ConfigError::ZeroLimit)
        ));
        assert!(matches!(
            Rate::new(1, Duration::ZERO),
            Err(ConfigError::ZeroInterval)
        ));
    }

    #[test]
    fn test_display_roundtrip() {
        let rate = Rate::new(60, MINUTE).unwrap();
        assert_eq!(rate.to_string(), "60/1m");
        assert_eq!(Rate::from_str(&rate.to_string()).unwrap(), rate);
    }

    #[test]
    fn test_deserialize() {
        #[derive(Deserialize)]
        struct Config {
            rates: Vec<Rate>,
        }

        let config: Config = toml::from_str(r#"rates = ["5/1s", "100/1h"]"#).unwrap();
        assert_eq!(
            config.rates,
            vec![
                Rate::new(5, Duration::from_secs(1)).unwrap(),
                Rate::new(100, HOUR).unwrap(),
            ]
        );
    }
}
