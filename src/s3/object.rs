//! Object URL resolution and version pinning.
//!
//! A session binds to exactly one object version at open time: a signed
//! HEAD discovers the current `x-amz-version-id` and the object length,
//! and both stay fixed for the life of the session even if the object
//! is overwritten by other clients.

use chrono::Utc;
use tracing::debug;
use url::Url;

use crate::error::{S3liteError, S3liteResult};
use crate::s3::constants::{HEADER_AMZ_VERSION_ID, NULL_VERSION_ID, UNSIGNED_PAYLOAD};
use crate::s3::credentials::CredentialsProvider;
use crate::s3::http::HttpClient;
use crate::s3::sigv4;

/// Parsed S3-style object URL
#[derive(Debug, Clone)]
pub struct ObjectUrl {
    /// `http` or `https`
    pub scheme: String,
    /// Host, including a non-default port
    pub host: String,
    /// Object key path, always starting with `/`
    pub path: String,
}

impl ObjectUrl {
    /// Split a URL into the parts that participate in signing
    pub fn parse(raw: &str) -> S3liteResult<Self> {
        let url =
            Url::parse(raw).map_err(|e| S3liteError::InvalidUrl(format!("{raw}: {e}")))?;

        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(S3liteError::InvalidUrl(format!(
                    "unsupported scheme: {other}"
                )));
            }
        }

        let host = url
            .host_str()
            .ok_or_else(|| S3liteError::InvalidUrl(format!("{raw}: missing host")))?;
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Ok(Self {
            scheme: url.scheme().to_string(),
            host,
            path: url.path().to_string(),
        })
    }

    /// The bare request URL, with no query string
    pub fn base(&self) -> String {
        format!("{}://{}{}", self.scheme, self.host, self.path)
    }
}

/// Immutable description of the pinned object version.
///
/// Once resolved, the version id is never renegotiated; every byte the
/// engine reads comes from `[0, length)` of this exact version.
#[derive(Debug, Clone)]
pub struct ObjectBinding {
    /// Location of the object
    pub url: ObjectUrl,
    /// Version id pinned at session open
    pub version_id: String,
    /// Total object length in bytes
    pub length: u64,
}

impl ObjectBinding {
    /// Pin the current object version with a signed HEAD.
    ///
    /// Fails with [`S3liteError::VersioningNotEnabled`] when the bucket
    /// does not return a usable version id.
    pub fn resolve(
        url: ObjectUrl,
        credentials: &CredentialsProvider,
        http: &dyn HttpClient,
    ) -> S3liteResult<Self> {
        let creds = credentials()?;
        let target = url.base();
        let headers = sigv4::sign_request(
            Utc::now(),
            &creds,
            "HEAD",
            &url.host,
            &url.path,
            &[],
            &[],
            UNSIGNED_PAYLOAD,
        );

        let response = http.request("HEAD", &target, &headers)?;
        if response.status != 200 {
            return Err(S3liteError::HttpStatus {
                status: response.status,
                method: "HEAD",
                url: target,
            });
        }

        let version_id = match response.header(HEADER_AMZ_VERSION_ID) {
            Some(id) if !id.is_empty() && id != NULL_VERSION_ID => id.to_string(),
            _ => return Err(S3liteError::VersioningNotEnabled),
        };

        let length = response
            .header("content-length")
            .and_then(|value| value.parse::<u64>().ok())
            .ok_or_else(|| {
                S3liteError::Transport("HEAD response has no parseable Content-Length".to_string())
            })?;

        debug!(version_id = %version_id, length, url = %target, "pinned object version");

        Ok(Self {
            url,
            version_id,
            length,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::http::HttpResponse;
    use std::sync::Mutex;

    /// Test double replaying canned responses and recording requests
    struct StubClient {
        responses: Mutex<Vec<HttpResponse>>,
        requests: Mutex<Vec<(String, String)>>,
    }

    impl StubClient {
        fn new(responses: Vec<HttpResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpClient for StubClient {
        fn request(
            &self,
            method: &str,
            url: &str,
            _headers: &[(String, String)],
        ) -> S3liteResult<HttpResponse> {
            self.requests
                .lock()
                .unwrap()
                .push((method.to_string(), url.to_string()));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(S3liteError::Transport("no canned response".to_string()));
            }
            Ok(responses.remove(0))
        }
    }

    fn static_credentials() -> CredentialsProvider {
        Box::new(|| {
            Ok(crate::s3::credentials::Credentials {
                region: "us-east-1".to_string(),
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: None,
            })
        })
    }

    fn head_response(version: Option<&str>, length: &str) -> HttpResponse {
        let mut headers = vec![("content-length".to_string(), length.to_string())];
        if let Some(version) = version {
            headers.push(("x-amz-version-id".to_string(), version.to_string()));
        }
        HttpResponse {
            status: 200,
            headers,
            body: Vec::new(),
        }
    }

    #[test]
    fn test_parse_splits_scheme_host_path() {
        let url = ObjectUrl::parse("https://bucket.s3.eu-west-2.amazonaws.com/key/db.sqlite3")
            .unwrap();
        assert_eq!(url.scheme, "https");
        assert_eq!(url.host, "bucket.s3.eu-west-2.amazonaws.com");
        assert_eq!(url.path, "/key/db.sqlite3");
        assert_eq!(
            url.base(),
            "https://bucket.s3.eu-west-2.amazonaws.com/key/db.sqlite3"
        );
    }

    #[test]
    fn test_parse_keeps_explicit_port() {
        let url = ObjectUrl::parse("http://127.0.0.1:9000/bucket/db").unwrap();
        assert_eq!(url.host, "127.0.0.1:9000");
    }

    #[test]
    fn test_parse_rejects_non_http_schemes() {
        assert!(matches!(
            ObjectUrl::parse("ftp://example.com/db"),
            Err(S3liteError::InvalidUrl(_))
        ));
        assert!(matches!(
            ObjectUrl::parse("not a url"),
            Err(S3liteError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_resolve_pins_version_and_length() {
        let client = StubClient::new(vec![head_response(Some("3sL4kqtJlcpXroDTDmJ"), "8192")]);
        let url = ObjectUrl::parse("https://example.com/bucket/db").unwrap();

        let binding = ObjectBinding::resolve(url, &static_credentials(), &client).unwrap();
        assert_eq!(binding.version_id, "3sL4kqtJlcpXroDTDmJ");
        assert_eq!(binding.length, 8192);

        let requests = client.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].0, "HEAD");
        assert_eq!(requests[0].1, "https://example.com/bucket/db");
    }

    #[test]
    fn test_resolve_rejects_unversioned_bucket() {
        let client = StubClient::new(vec![head_response(None, "8192")]);
        let url = ObjectUrl::parse("https://example.com/bucket/db").unwrap();

        assert!(matches!(
            ObjectBinding::resolve(url, &static_credentials(), &client),
            Err(S3liteError::VersioningNotEnabled)
        ));
    }

    #[test]
    fn test_resolve_rejects_null_version_sentinel() {
        let client = StubClient::new(vec![head_response(Some("null"), "8192")]);
        let url = ObjectUrl::parse("https://example.com/bucket/db").unwrap();

        assert!(matches!(
            ObjectBinding::resolve(url, &static_credentials(), &client),
            Err(S3liteError::VersioningNotEnabled)
        ));
    }

    #[test]
    fn test_resolve_surfaces_http_status() {
        let client = StubClient::new(vec![HttpResponse {
            status: 403,
            headers: Vec::new(),
            body: Vec::new(),
        }]);
        let url = ObjectUrl::parse("https://example.com/bucket/db").unwrap();

        match ObjectBinding::resolve(url, &static_credentials(), &client) {
            Err(S3liteError::HttpStatus { status, method, .. }) => {
                assert_eq!(status, 403);
                assert_eq!(method, "HEAD");
            }
            other => panic!("expected HttpStatus error, got {other:?}"),
        }
    }

    #[test]
    fn test_resolve_requires_content_length() {
        let client = StubClient::new(vec![HttpResponse {
            status: 200,
            headers: vec![("x-amz-version-id".to_string(), "v1".to_string())],
            body: Vec::new(),
        }]);
        let url = ObjectUrl::parse("https://example.com/bucket/db").unwrap();

        assert!(matches!(
            ObjectBinding::resolve(url, &static_credentials(), &client),
            Err(S3liteError::Transport(_))
        ));
    }
}
