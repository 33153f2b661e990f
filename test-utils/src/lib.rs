//! Test helpers for `reqwest-ratelimiter`: a catch-all wiremock server,
//! requests aimed at it and a URL that refuses connections.
//!
//! Everything is a `macro_rules!` macro expanding to `wiremock`, `http`,
//! `url` and `reqwest` paths, so this crate has no dependencies of its own
//! and the calling test crate supplies them.

/// Start a wiremock server answering every request with `$status`.
///
/// Extra `ResponseTemplate` methods can be chained, e.g.
/// `mock_server!(StatusCode::OK, set_delay(Duration::from_millis(50)))`.
#[macro_export]
macro_rules! mock_server {
    ($status:expr $(, $method:ident ($($arg:expr),*))* $(,)?) => {{
        let server = wiremock::MockServer::start().await;
        let template = wiremock::ResponseTemplate::new(http::StatusCode::from($status))
            $(.$method($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::any())
            .respond_with(template)
            .mount(&server)
            .await;
        server
    }};
}

/// Build a `reqwest::Request` for a path on a mock server
///
/// # Panic
///
/// This panics if the path does not form a valid URL, so it should only be
/// used for testing
#[macro_export]
macro_rules! mock_request {
    ($method:expr, $server:expr, $path:expr $(,)?) => {{
        let url = url::Url::parse(&$server.uri())
            .and_then(|base| base.join($path))
            .expect("Expected valid mock server URL");
        reqwest::Request::new($method, url)
    }};
    ($server:expr, $path:expr $(,)?) => {
        $crate::mock_request!(http::Method::GET, $server, $path)
    };
}

/// Get the URL of a local port that nothing listens on.
///
/// The port is bound and released right away, so connecting to it is
/// refused.
#[macro_export]
macro_rules! unused_port_url {
    () => {{
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        url::Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap()
    }};
}
