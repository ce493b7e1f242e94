//! Version-pinned range reads.
//!
//! Every read fetches exactly the requested byte interval from the
//! object version pinned at session open. Credentials are fetched
//! fresh for each request so rotation is observed mid-session.

use chrono::Utc;
use tracing::trace;

use crate::error::{S3liteError, S3liteResult};
use crate::s3::constants::{QUERY_VERSION_ID, UNSIGNED_PAYLOAD};
use crate::s3::credentials::CredentialsProvider;
use crate::s3::http::HttpClient;
use crate::s3::object::ObjectBinding;
use crate::s3::sigv4;

/// Issues signed range GETs against one pinned object version
pub struct RangeReader {
    binding: ObjectBinding,
    credentials: CredentialsProvider,
    http: Box<dyn HttpClient>,
}

impl RangeReader {
    pub fn new(
        binding: ObjectBinding,
        credentials: CredentialsProvider,
        http: Box<dyn HttpClient>,
    ) -> Self {
        Self {
            binding,
            credentials,
            http,
        }
    }

    /// The binding this reader is pinned to
    pub fn binding(&self) -> &ObjectBinding {
        &self.binding
    }

    /// Fetch exactly `length` bytes starting at `offset`.
    ///
    /// `length` must be at least one byte: `bytes=a-b` ranges are
    /// inclusive and cannot express an empty interval. Anything other
    /// than a 206 whose body is exactly `length` bytes is an error:
    /// serving a misaligned range would hand the engine a page from the
    /// wrong part of the file.
    pub fn read(&self, offset: u64, length: u64) -> S3liteResult<Vec<u8>> {
        if length == 0 {
            return Err(S3liteError::Transport(format!(
                "zero-length range read requested at offset {offset}"
            )));
        }

        let creds = (self.credentials)()?;
        let url = &self.binding.url;
        let query = vec![(
            QUERY_VERSION_ID.to_string(),
            self.binding.version_id.clone(),
        )];
        let end = offset + length - 1;
        let range = vec![("range".to_string(), format!("bytes={offset}-{end}"))];

        let headers = sigv4::sign_request(
            Utc::now(),
            &creds,
            "GET",
            &url.host,
            &url.path,
            &query,
            &range,
            UNSIGNED_PAYLOAD,
        );
        let target = format!("{}?{}", url.base(), sigv4::canonical_query(&query));

        let response = self.http.request("GET", &target, &headers)?;
        match response.status {
            206 => {}
            200 => {
                return Err(S3liteError::Transport(
                    "server ignored the range request and returned the full object".to_string(),
                ));
            }
            status => {
                return Err(S3liteError::HttpStatus {
                    status,
                    method: "GET",
                    url: target,
                });
            }
        }

        if response.body.len() as u64 != length {
            return Err(S3liteError::Transport(format!(
                "range response carried {} bytes, expected {length}",
                response.body.len()
            )));
        }

        trace!(offset, length, "range read");
        Ok(response.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::s3::credentials::Credentials;
    use crate::s3::http::HttpResponse;
    use crate::s3::object::ObjectUrl;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    struct StubClient {
        responses: Mutex<Vec<HttpResponse>>,
        requests: Mutex<Vec<(String, String, Vec<(String, String)>)>>,
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
            headers: &[(String, String)],
        ) -> S3liteResult<HttpResponse> {
            self.requests.lock().unwrap().push((
                method.to_string(),
                url.to_string(),
                headers.to_vec(),
            ));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(S3liteError::Transport("no canned response".to_string()));
            }
            Ok(responses.remove(0))
        }
    }

    fn binding() -> ObjectBinding {
        ObjectBinding {
            url: ObjectUrl::parse("https://example.com/bucket/db").unwrap(),
            version_id: "v-abc123".to_string(),
            length: 4096,
        }
    }

    fn counting_credentials(counter: Arc<AtomicUsize>) -> CredentialsProvider {
        Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(Credentials {
                region: "us-east-1".to_string(),
                access_key_id: "AKIDEXAMPLE".to_string(),
                secret_access_key: "secret".to_string(),
                session_token: None,
            })
        })
    }

    fn partial_content(body: Vec<u8>) -> HttpResponse {
        HttpResponse {
            status: 206,
            headers: Vec::new(),
            body,
        }
    }

    #[test]
    fn test_read_requests_the_exact_byte_interval() {
        let counter = Arc::new(AtomicUsize::new(0));
        let client = StubClient::new(vec![partial_content(vec![7u8; 100])]);
        let reader = RangeReader::new(
            binding(),
            counting_credentials(Arc::clone(&counter)),
            Box::new(client),
        );

        let bytes = reader.read(0, 100).unwrap();
        assert_eq!(bytes, vec![7u8; 100]);
        assert_eq!(counter.load(Ordering::SeqCst), 1, "one fetch per request");
    }

    #[test]
    fn test_read_sends_version_and_range() {
        let stub = Arc::new(StubClient::new(vec![partial_content(vec![0u8; 10])]));

        struct Shared(Arc<StubClient>);
        impl HttpClient for Shared {
            fn request(
                &self,
                method: &str,
                url: &str,
                headers: &[(String, String)],
            ) -> S3liteResult<HttpResponse> {
                self.0.request(method, url, headers)
            }
        }

        let reader = RangeReader::new(
            binding(),
            counting_credentials(Arc::new(AtomicUsize::new(0))),
            Box::new(Shared(Arc::clone(&stub))),
        );
        reader.read(4, 10).unwrap();

        let requests = stub.requests.lock().unwrap();
        let (method, url, headers) = &requests[0];
        assert_eq!(method, "GET");
        assert_eq!(url, "https://example.com/bucket/db?versionId=v-abc123");
        let range = headers
            .iter()
            .find(|(name, _)| name == "range")
            .map(|(_, value)| value.as_str());
        assert_eq!(range, Some("bytes=4-13"));
        assert!(
            headers.iter().any(|(name, _)| name == "authorization"),
            "range GETs must be signed"
        );
    }

    #[test]
    fn test_read_refetches_credentials_per_request() {
        let counter = Arc::new(AtomicUsize::new(0));
        let client = StubClient::new(vec![
            partial_content(vec![0u8; 8]),
            partial_content(vec![0u8; 8]),
        ]);
        let reader = RangeReader::new(
            binding(),
            counting_credentials(Arc::clone(&counter)),
            Box::new(client),
        );

        reader.read(0, 8).unwrap();
        reader.read(8, 8).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 2, "credentials never cached");
    }

    #[test]
    fn test_read_rejects_zero_length() {
        let counter = Arc::new(AtomicUsize::new(0));
        let client = StubClient::new(Vec::new());
        let reader = RangeReader::new(
            binding(),
            counting_credentials(Arc::clone(&counter)),
            Box::new(client),
        );

        match reader.read(128, 0) {
            Err(S3liteError::Transport(message)) => {
                assert!(message.contains("zero-length"), "message was: {message}")
            }
            other => panic!("expected Transport error, got {other:?}"),
        }
        assert_eq!(
            counter.load(Ordering::SeqCst),
            0,
            "an empty interval must be refused before anything is signed or sent"
        );
    }

    #[test]
    fn test_read_rejects_unranged_200() {
        let client = StubClient::new(vec![HttpResponse {
            status: 200,
            headers: Vec::new(),
            body: vec![0u8; 4096],
        }]);
        let reader = RangeReader::new(
            binding(),
            counting_credentials(Arc::new(AtomicUsize::new(0))),
            Box::new(client),
        );

        assert!(matches!(
            reader.read(0, 100),
            Err(S3liteError::Transport(_))
        ));
    }

    #[test]
    fn test_read_rejects_length_mismatch() {
        let client = StubClient::new(vec![partial_content(vec![0u8; 90])]);
        let reader = RangeReader::new(
            binding(),
            counting_credentials(Arc::new(AtomicUsize::new(0))),
            Box::new(client),
        );

        assert!(matches!(
            reader.read(0, 100),
            Err(S3liteError::Transport(_))
        ));
    }

    #[test]
    fn test_read_surfaces_http_status() {
        let client = StubClient::new(vec![HttpResponse {
            status: 416,
            headers: Vec::new(),
            body: Vec::new(),
        }]);
        let reader = RangeReader::new(
            binding(),
            counting_credentials(Arc::new(AtomicUsize::new(0))),
            Box::new(client),
        );

        match reader.read(0, 100) {
            Err(S3liteError::HttpStatus { status, method, .. }) => {
                assert_eq!(status, 416);
                assert_eq!(method, "GET");
            }
            other => panic!("expected HttpStatus error, got {other:?}"),
        }
    }
}
