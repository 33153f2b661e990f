use std::fmt;
use std::sync::Arc;

use http::Method;
use serde::{Deserialize, Serialize};
use url::Url;

const GLOBAL_KEY: &str = "global";

/// Identifies which bucket a request consumes capacity from.
///
/// # Examples
///
/// ```
/// use reqwest_ratelimiter::{BucketKey, BucketStrategy};
/// use url::Url;
///
/// let url = Url::parse("https://API.github.com:8443/repos").unwrap();
/// let key = BucketStrategy::PerHost.key(&http::Method::GET, &url);
/// assert_eq!(key, BucketKey::from("api.github.com:8443"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey(String);

impl BucketKey {
    /// The key shared by every request when no per-request strategy is set
    #[must_use]
    pub fn global() -> Self {
        BucketKey(GLOBAL_KEY.to_string())
    }

    /// Get the key as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Get the key as an owned String
    #[must_use]
    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for BucketKey {
    fn from(key: String) -> Self {
        BucketKey(key)
    }
}

impl From<&str> for BucketKey {
    fn from(key: &str) -> Self {
        BucketKey(key.to_string())
    }
}

/// Function mapping an outgoing request to its bucket
pub type KeyFn = Arc<dyn Fn(&Method, &Url) -> BucketKey + Send + Sync>;

/// How requests are assigned to buckets.
///
/// The default, [`BucketStrategy::Global`], sends all requests through one
/// adapter into a single bucket.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BucketStrategy {
    /// One bucket for all requests
    #[default]
    Global,
    /// One bucket per `host[:port]`
    PerHost,
    /// One bucket per `host[:port]` and path
    PerPath,
    /// Caller-defined bucket key
    #[serde(skip)]
    Custom(KeyFn),
}

impl BucketStrategy {
    /// Wrap a closure as a [`BucketStrategy::Custom`] strategy
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&Method, &Url) -> BucketKey + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(f))
    }

    /// Compute the bucket key for a request.
    ///
    /// URLs without a host (e.g. `file://`) fall back to the global key.
    #[must_use]
    pub fn key(&self, method: &Method, url: &Url) -> BucketKey {
        match self {
            Self::Global => BucketKey::global(),
            Self::PerHost => authority(url).map_or_else(BucketKey::global, BucketKey),
            Self::PerPath => authority(url).map_or_else(BucketKey::global, |authority| {
                BucketKey(format!("{authority}{}", url.path()))
            }),
            Self::Custom(f) => f(method, url),
        }
    }
}

impl fmt::Debug for BucketStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Global => write!(f, "Global"),
            Self::PerHost => write!(f, "PerHost"),
            Self::PerPath => write!(f, "PerPath"),
            Self::Custom(_) => write!(f, "Custom(..)"),
        }
    }
}

/// Lower-cased `host[:port]`, the explicit port only if it is not the
/// scheme's default
fn authority(url: &Url) -> Option<String> {
    let host = url.host_str()?.to_lowercase();
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(BucketStrategy::Global, "https://example.com/a", "global")]
    #[case(BucketStrategy::PerHost, "https://example.com/a", "example.com")]
    #[case(BucketStrategy::PerHost, "https://EXAMPLE.com:8080/a", "example.com:8080")]
    #[case(BucketStrategy::PerHost, "https://example.com:443/a", "example.com")]
    #[case(BucketStrategy::PerPath, "https://example.com/a/b?q=1", "example.com/a/b")]
    #[case(BucketStrategy::PerHost, "file:///etc/hosts", "global")]
    fn test_bucket_keys(
        #[case] strategy: BucketStrategy,
        #[case] url: &str,
        #[case] expected: &str,
    ) {
        let url = Url::parse(url).unwrap();
        assert_eq!(
            strategy.key(&Method::GET, &url),
            BucketKey::from(expected)
        );
    }

    #[test]
    fn test_subdomains_get_separate_buckets() {
        let api = Url::parse("https://api.github.com/").unwrap();
        let www = Url::parse("https://www.github.com/").unwrap();

        let strategy = BucketStrategy::PerHost;
        assert_ne!(
            strategy.key(&Method::GET, &api),
            strategy.key(&Method::GET, &www)
        );
    }

    #[test]
    fn test_custom_strategy() {
        let strategy = BucketStrategy::custom(|method, _url| BucketKey::from(method.as_str()));
        let url = Url::parse("https://example.com/").unwrap();

        assert_eq!(strategy.key(&Method::POST, &url).as_str(), "POST");
        assert_eq!(format!("{strategy:?}"), "Custom(..)");
    }

    #[test]
    fn test_strategy_deserialize() {
        #[derive(Deserialize)]
        struct Config {
            bucket: BucketStrategy,
        }

        let config: Config = toml::from_str(r#"bucket = "per-host""#).unwrap();
        assert!(matches!(config.bucket, BucketStrategy::PerHost));

        assert!(toml::from_str::<Config>(r#"bucket = "custom""#).is_err());
    }
}
