use http::header::RETRY_AFTER;
use http::{HeaderValue, StatusCode};
use reqwest::ResponseBuilderExt;
use url::Url;

use crate::RateLimitError;

/// Build the response returned in place of a network call when a bucket is
/// exhausted and `raise_when_fail` is off.
///
/// The response has status `429 Too Many Requests`, an empty body, the URL
/// of the request that was not sent and, if known, a `Retry-After` header
/// with the required wait in whole seconds, rounded up.
pub(crate) fn rate_limited(url: &Url, error: &RateLimitError) -> http::Response<Vec<u8>> {
    let mut response = http::Response::builder()
        .url(url.clone())
        .body(Vec::new())
        .unwrap_or_else(|_| http::Response::new(Vec::new()));

    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;
    if let Some(required) = error.required_wait() {
        let seconds = required.as_secs() + u64::from(required.subsec_nanos() > 0);
        response
            .headers_mut()
            .insert(RETRY_AFTER, HeaderValue::from(seconds));
    }
    response
}
