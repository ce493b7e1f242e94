//! S3 object access
//!
//! Everything needed to read byte ranges out of one versioned object:
//! SigV4 request signing, version pinning via a signed HEAD, and the
//! range reader the VFS delegates page reads to.

pub mod constants;
pub mod credentials;
pub mod http;
pub mod object;
pub mod range;
pub mod sigv4;

pub use constants::*;
pub use credentials::{env_credentials, Credentials, CredentialsProvider};
pub use http::{HttpClient, HttpClientProvider, HttpResponse, ReqwestClient};
pub use object::{ObjectBinding, ObjectUrl};
pub use range::RangeReader;
