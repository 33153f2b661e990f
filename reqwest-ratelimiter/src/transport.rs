//! The layer that actually turns a request into a response.
//!
//! [`Transport`] is the async seam, [`BlockingTransport`] the blocking one.
//! Both are implemented for the matching reqwest clients, and
//! [`crate::RateLimitedTransport`] implements whichever one its inner
//! transport does, so adapters can be stacked.

use async_trait::async_trait;
use reqwest::{Request, Response, blocking};

/// Sends a request and returns the response
#[async_trait]
pub trait Transport: Send + Sync {
    /// Error returned when the request cannot be sent
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send `request` over the network
    async fn send(&self, request: Request) -> Result<Response, Self::Error>;
}

#[async_trait]
impl Transport for reqwest::Client {
    type Error = reqwest::Error;

    async fn send(&self, request: Request) -> Result<Response, Self::Error> {
        self.execute(request).await
    }
}

/// Blocking counterpart of [`Transport`]
pub trait BlockingTransport {
    /// Error returned when the request cannot be sent
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send `request` over the network, blocking the current thread
    fn send(&self, request: blocking::Request) -> Result<blocking::Response, Self::Error>;
}

impl BlockingTransport for blocking::Client {
    type Error = reqwest::Error;

    fn send(&self, request: blocking::Request) -> Result<blocking::Response, Self::Error> {
        self.execute(request)
    }
}
