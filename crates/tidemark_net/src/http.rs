//! HTTP transport abstraction.
//!
//! The actual HTTP client is abstracted via a trait so different
//! implementations (reqwest, ureq, platform stacks) can be plugged in,
//! and so tests can run against scripted or in-process backends.

use crate::error::{NetError, NetResult};
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::VecDeque;
use std::time::Duration;

/// Well-known header names (lower-cased for lookup).
pub mod headers {
    /// Authoritative server timestamp used as the delta-set high-water mark.
    pub const REQUEST_START: &str = "x-kinvey-request-start";
    /// Protocol version header.
    pub const API_VERSION: &str = "x-kinvey-api-version";
    /// Client application version, forwarded for server-side hooks.
    pub const CLIENT_APP_VERSION: &str = "x-kinvey-client-app-version";
    /// Serialized custom request properties.
    pub const CUSTOM_REQUEST_PROPERTIES: &str = "x-kinvey-custom-request-properties";
}

/// HTTP method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// PUT
    Put,
    /// DELETE
    Delete,
}

impl Method {
    /// Returns the method name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

/// A fully assembled HTTP request.
#[derive(Debug, Clone)]
pub struct Request {
    /// HTTP method.
    pub method: Method,
    /// Absolute URL including query string.
    pub url: String,
    /// Header name/value pairs, canonical casing.
    pub headers: Vec<(String, String)>,
    /// Request body, if any.
    pub body: Option<Vec<u8>>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl Request {
    /// Looks up a header case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// An HTTP response.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: Vec<u8>,
}

impl Response {
    /// Creates a JSON response with the given status.
    #[must_use]
    pub fn json(status: u16, value: &Value) -> Self {
        Self {
            status,
            headers: vec![("Content-Type".into(), "application/json; charset=utf-8".into())],
            body: value.to_string().into_bytes(),
        }
    }

    /// Adds a header.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Looks up a header case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Returns the server's request-start timestamp, if present.
    #[must_use]
    pub fn request_start(&self) -> Option<&str> {
        self.header(headers::REQUEST_START)
    }

    /// Parses the body as JSON.
    pub fn json_body(&self) -> NetResult<Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

/// The transport abstraction.
///
/// Implementations perform one HTTP exchange. Transport-level failures
/// map to [`NetError::Timeout`] / [`NetError::NoResponse`]; any response
/// with a status line is returned as `Ok` and interpreted above this
/// layer.
pub trait HttpClient: Send + Sync {
    /// Sends a request and returns the raw response.
    fn send(&self, request: &Request) -> NetResult<Response>;
}

/// A scripted HTTP client for tests.
///
/// Responses are served from a FIFO queue; every request is recorded for
/// later assertions. An empty queue yields `204 No Content`.
#[derive(Default)]
pub struct MockClient {
    responses: Mutex<VecDeque<NetResult<Response>>>,
    requests: Mutex<Vec<Request>>,
}

impl MockClient {
    /// Creates a new mock client with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a JSON response.
    pub fn push_json(&self, status: u16, value: Value) {
        self.responses
            .lock()
            .push_back(Ok(Response::json(status, &value)));
    }

    /// Queues a prepared response.
    pub fn push_response(&self, response: Response) {
        self.responses.lock().push_back(Ok(response));
    }

    /// Queues a transport error.
    pub fn push_error(&self, error: NetError) {
        self.responses.lock().push_back(Err(error));
    }

    /// Returns a copy of every request seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    /// Returns the number of requests seen so far.
    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

impl HttpClient for MockClient {
    fn send(&self, request: &Request) -> NetResult<Response> {
        self.requests.lock().push(request.clone());
        self.responses.lock().pop_front().unwrap_or_else(|| {
            Ok(Response {
                status: 204,
                headers: Vec::new(),
                body: Vec::new(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(url: &str) -> Request {
        Request {
            method: Method::Get,
            url: url.into(),
            headers: vec![("X-Test".into(), "yes".into())],
            body: None,
            timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn header_lookup_is_case_insensitive() {
        let response = Response::json(200, &json!({}))
            .with_header("X-Kinvey-Request-Start", "2023-01-01T00:00:00.000Z");
        assert_eq!(
            response.request_start(),
            Some("2023-01-01T00:00:00.000Z")
        );
        assert_eq!(response.header("x-kinvey-request-start"), response.request_start());

        let req = request("https://example.com");
        assert_eq!(req.header("x-test"), Some("yes"));
    }

    #[test]
    fn mock_replays_in_order_and_records() {
        let client = MockClient::new();
        client.push_json(200, json!({"n": 1}));
        client.push_json(404, json!({"error": "NotFound"}));

        let first = client.send(&request("https://a")).unwrap();
        assert_eq!(first.status, 200);
        let second = client.send(&request("https://b")).unwrap();
        assert_eq!(second.status, 404);

        let seen = client.requests();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].url, "https://a");
        assert_eq!(seen[1].url, "https://b");
    }

    #[test]
    fn mock_propagates_transport_errors() {
        let client = MockClient::new();
        client.push_error(NetError::Timeout);
        assert!(matches!(
            client.send(&request("https://a")),
            Err(NetError::Timeout)
        ));
    }

    #[test]
    fn exhausted_mock_returns_no_content() {
        let client = MockClient::new();
        let response = client.send(&request("https://a")).unwrap();
        assert_eq!(response.status, 204);
    }
}
