//! Blocking HTTP client abstraction.
//!
//! The core only ever issues HEAD and range GET requests, so the client
//! surface is a single `request` method. Callers can supply their own
//! transport through [`HttpClientProvider`]; the default is reqwest's
//! blocking client.

use std::time::Duration;

use crate::error::{S3liteError, S3liteResult};

/// Response from one blocking HTTP exchange
#[derive(Debug)]
pub struct HttpResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers as received
    pub headers: Vec<(String, String)>,
    /// Full response body
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// Blocking request executor the core issues HEAD and range GETs through
pub trait HttpClient: Send {
    /// Execute one request and return the full response
    fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
    ) -> S3liteResult<HttpResponse>;
}

/// Callback constructing the session's HTTP client
pub type HttpClientProvider = Box<dyn FnOnce() -> S3liteResult<Box<dyn HttpClient>> + Send>;

/// Default client backed by reqwest's blocking API
pub struct ReqwestClient {
    inner: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Build a client with the given request timeout
    pub fn new(timeout: Duration) -> S3liteResult<Self> {
        let inner = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { inner })
    }
}

impl HttpClient for ReqwestClient {
    fn request(
        &self,
        method: &str,
        url: &str,
        headers: &[(String, String)],
    ) -> S3liteResult<HttpResponse> {
        let mut request = match method {
            "GET" => self.inner.get(url),
            "HEAD" => self.inner.head(url),
            other => {
                return Err(S3liteError::Transport(format!(
                    "unsupported HTTP method: {other}"
                )));
            }
        };

        for (name, value) in headers {
            // reqwest derives Host from the URL; the signed value is identical
            if name.eq_ignore_ascii_case("host") {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.send()?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes()?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}
