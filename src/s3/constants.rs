//! S3 wire-protocol constants
//!
//! Literals shared by the signer, the object binding and the range
//! reader: header names, signing scheme identifiers and defaults.

/// Service name used in the SigV4 credential scope
pub const S3_SERVICE: &str = "s3";

/// Signing algorithm identifier
pub const SIGV4_ALGORITHM: &str = "AWS4-HMAC-SHA256";

/// Body hash literal for unsigned-payload GET/HEAD requests
pub const UNSIGNED_PAYLOAD: &str = "UNSIGNED-PAYLOAD";

/// Timestamp format required by `x-amz-date` (e.g. `20130524T000000Z`)
pub const AMZ_DATE_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Request timestamp header
pub const HEADER_AMZ_DATE: &str = "x-amz-date";

/// Body hash header
pub const HEADER_AMZ_CONTENT_SHA256: &str = "x-amz-content-sha256";

/// Session token header, sent only for temporary credentials
pub const HEADER_AMZ_SECURITY_TOKEN: &str = "x-amz-security-token";

/// Response header carrying the object version id
pub const HEADER_AMZ_VERSION_ID: &str = "x-amz-version-id";

/// Query parameter pinning a request to one object version
pub const QUERY_VERSION_ID: &str = "versionId";

/// Version id value S3 reports for objects in unversioned buckets
pub const NULL_VERSION_ID: &str = "null";

/// Default timeout for HTTP requests (30 seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
