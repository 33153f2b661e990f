use std::convert::Infallible;
use std::sync::Mutex;
use std::time::Instant;

use async_trait::async_trait;
use http::{Method, StatusCode};
use reqwest::{Request, Response, Url, blocking};

use crate::{BlockingTransport, Transport};

/// Helper method to build a `GET` request
///
/// # Panic
///
/// This panics on an invalid URL, so it should only be used for testing
pub(crate) fn get(url: &str) -> Request {
    Request::new(
        Method::GET,
        Url::parse(url).expect("Expected valid request URL"),
    )
}

/// Blocking version of [`get`]
pub(crate) fn blocking_get(url: &str) -> blocking::Request {
    blocking::Request::new(
        Method::GET,
        Url::parse(url).expect("Expected valid request URL"),
    )
}

/// Transport which answers every request with a fixed status and records
/// when each request arrived
#[derive(Debug)]
pub(crate) struct Recorder {
    status: StatusCode,
    calls: Mutex<Vec<(Instant, Method, Url)>>,
}

impl Default for Recorder {
    fn default() -> Self {
        Self::with_status(StatusCode::OK)
    }
}

impl Recorder {
    pub(crate) fn with_status(status: StatusCode) -> Self {
        Self {
            status,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn calls(&self) -> Vec<(Instant, Method, Url)> {
        self.calls.lock().unwrap().clone()
    }

    fn respond(&self, method: Method, url: Url) -> http::Response<Vec<u8>> {
        self.calls
            .lock()
            .unwrap()
            .push((Instant::now(), method, url));
        let mut response = http::Response::new(Vec::new());
        *response.status_mut() = self.status;
        response
    }
}

#[async_trait]
impl Transport for Recorder {
    type Error = Infallible;

    async fn send(&self, request: Request) -> Result<Response, Self::Error> {
        let response = self.respond(request.method().clone(), request.url().clone());
        Ok(Response::from(response))
    }
}

/// Blocking counterpart of [`Recorder`]
#[derive(Debug, Default)]
pub(crate) struct BlockingRecorder(Recorder);

impl BlockingRecorder {
    pub(crate) fn count(&self) -> usize {
        self.0.calls().len()
    }
}

impl BlockingTransport for BlockingRecorder {
    type Error = Infallible;

    fn send(&self, request: blocking::Request) -> Result<blocking::Response, Self::Error> {
        let response = self
            .0
            .respond(request.method().clone(), request.url().clone());
        Ok(blocking::Response::from(response))
    }
}

/// Largest number of instants within any span of `interval`
pub(crate) fn max_in_window(times: &[Instant], interval: std::time::Duration) -> usize {
    times
        .iter()
        .map(|start| {
            times
                .iter()
                .filter(|t| **t >= *start && t.duration_since(*start) < interval)
                .count()
        })
        .max()
        .unwrap_or(0)
}
