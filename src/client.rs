use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{
    CONTENT_LENGTH, CONTENT_TYPE, ETAG, HeaderMap, HeaderName, HeaderValue, LAST_MODIFIED,
    USER_AGENT,
};

use crate::error::MirrorError;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Upstream headers carried into the transfer sidecar.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHeaders {
    pub content_type: Option<String>,
    pub content_length: Option<String>,
    pub last_modified: Option<String>,
    pub etag: Option<String>,
}

pub struct RemoteResponse {
    pub status: u16,
    pub headers: ResponseHeaders,
    pub body: Box<dyn Read + Send>,
}

impl RemoteResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Read-only view of the upstream archive. A non-2xx status is returned as a
/// response, not an error; `Err` means the request itself failed.
pub trait ArchiveClient: Send + Sync {
    fn get(&self, url: &str) -> Result<RemoteResponse, MirrorError>;
}

#[derive(Clone)]
pub struct HttpArchiveClient {
    client: Client,
}

impl HttpArchiveClient {
    pub fn with_timeout(timeout: Duration) -> Result<Self, MirrorError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("icon-mirror/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MirrorError::Http(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|err| MirrorError::Http(err.to_string()))?;
        Ok(Self { client })
    }
}

impl ArchiveClient for HttpArchiveClient {
    fn get(&self, url: &str) -> Result<RemoteResponse, MirrorError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| MirrorError::Http(format!("{url}: {err}")))?;
        let status = response.status().as_u16();
        let headers = extract_headers(response.headers());
        Ok(RemoteResponse {
            status,
            headers,
            body: Box::new(response),
        })
    }
}

fn extract_headers(headers: &HeaderMap) -> ResponseHeaders {
    let get = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(|value| value.to_string())
    };
    ResponseHeaders {
        content_type: get(CONTENT_TYPE),
        content_length: get(CONTENT_LENGTH),
        last_modified: get(LAST_MODIFIED),
        etag: get(ETAG),
    }
}
