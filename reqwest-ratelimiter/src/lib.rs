//! `reqwest-ratelimiter` throttles outgoing HTTP requests on the client side.
//!
//! It wraps a transport, such as a [`reqwest::Client`], and makes every
//! request acquire capacity from a rate limiter before it is sent. Requests
//! wait for capacity up to a configurable maximum delay; past that they fail
//! with an error or get a synthetic `429 Too Many Requests` response,
//! without touching the network.
//!
//! ```
//! use reqwest_ratelimiter::TransportBuilder;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!   let transport = TransportBuilder::builder()
//!       .per_second(5)
//!       .per_hour(1000)
//!       .max_delay(Duration::from_secs(10))
//!       .build()
//!       .transport(reqwest::Client::new())?;
//!
//!   let request = reqwest::Request::new(
//!       reqwest::Method::GET,
//!       "http://localhost:1/".parse()?,
//!   );
//!   // Nothing listens on port 1, so this fails in the inner client
//!   assert!(transport.send(request).await.is_err());
//!   Ok(())
//! }
//! ```
//!
//! Several adapters can draw from the same [`Limiter`], and requests can be
//! spread over independent buckets with a [`BucketStrategy`]. The limits
//! can also be read from a TOML file, see [`RateLimitConfig`].
#![deny(missing_docs)]

mod adapter;
mod config;
mod error;
mod key;
mod limiter;
mod rate;
mod response;
mod transport;
mod window;

#[cfg(test)]
pub(crate) mod test_utils;

pub use adapter::{Outcome, RateLimitedTransport, TransportBuilder};
pub use config::{RateLimitConfig, RateSpec};
pub use error::{ConfigError, RateLimitError, SendError};
pub use key::{BucketKey, BucketStrategy, KeyFn};
pub use limiter::Limiter;
pub use rate::{Rate, RequestRate};
pub use transport::{BlockingTransport, Transport};
