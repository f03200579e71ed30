//! HTTP transport abstraction for the CDN client.
//!
//! The [`CdnTransport`] trait narrows the wire surface to the two
//! request shapes the engine needs (HEAD and ranged GET), which allows
//! dependency injection and recording mocks in tests. The production
//! implementation wraps `reqwest` with the client-certificate identity
//! and fixed header set the CDN expects.
//!
//! The trait uses `Pin<Box<dyn Future>>` methods so it stays
//! dyn-compatible (`Arc<dyn CdnTransport>`).

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use futures_util::StreamExt;

use super::error::{FetchError, FetchResult};
use super::CdnConfig;

/// Response header carrying the resolved content id.
pub const CONTENT_ID_HEADER: &str = "X-Nintendo-Content-ID";

/// Boxed future type for dyn-compatible async methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Streaming response body.
pub type ByteStream = Pin<Box<dyn Stream<Item = FetchResult<Bytes>> + Send>>;

/// Distilled HEAD response.
#[derive(Debug, Clone, Default)]
pub struct HeadResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    /// Value of [`CONTENT_ID_HEADER`], when present.
    pub content_id: Option<String>,
    pub accept_ranges: bool,
}

/// Distilled GET response with a streaming body.
pub struct GetResponse {
    pub status: u16,
    pub content_length: Option<u64>,
    /// Whether the server answered with a `Content-Range` header.
    pub has_content_range: bool,
    pub body: ByteStream,
}

/// Minimal wire interface to the CDN.
pub trait CdnTransport: Send + Sync {
    /// Perform a HEAD request.
    fn head<'a>(&'a self, url: &'a str) -> BoxFuture<'a, FetchResult<HeadResponse>>;

    /// Perform a GET request, optionally resuming from `range_start`
    /// via a `Range: bytes={start}-` header.
    fn get<'a>(
        &'a self,
        url: &'a str,
        range_start: Option<u64>,
    ) -> BoxFuture<'a, FetchResult<GetResponse>>;
}

/// Production transport backed by `reqwest`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// Build a transport from the CDN configuration.
    ///
    /// Installs the client-certificate identity (when configured), the
    /// firmware/environment user agent, and the fixed header set.
    ///
    /// # Errors
    ///
    /// Fails if the certificate cannot be read or the client cannot be
    /// constructed.
    pub fn new(config: &CdnConfig) -> FetchResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::ACCEPT_ENCODING,
            reqwest::header::HeaderValue::from_static("gzip, deflate"),
        );

        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(config.timeout)
            .user_agent(config.user_agent())
            .default_headers(headers);

        if let Some(pem_path) = &config.client_cert_pem {
            let pem = std::fs::read(pem_path).map_err(|e| FetchError::Io {
                path: pem_path.clone(),
                source: e,
            })?;
            let identity = reqwest::Identity::from_pem(&pem).map_err(|e| FetchError::Http {
                url: pem_path.display().to_string(),
                reason: format!("invalid client certificate: {e}"),
            })?;
            builder = builder.identity(identity);
        }

        let client = builder.build().map_err(|e| FetchError::Http {
            url: config.base_url.clone(),
            reason: format!("failed to build HTTP client: {e}"),
        })?;

        Ok(Self { client })
    }
}

impl ReqwestTransport {
    fn head_of(response: &reqwest::Response) -> HeadResponse {
        let headers = response.headers();
        HeadResponse {
            status: response.status().as_u16(),
            content_length: headers
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok()),
            content_id: headers
                .get(CONTENT_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_lowercase),
            accept_ranges: headers
                .get(reqwest::header::ACCEPT_RANGES)
                .and_then(|v| v.to_str().ok())
                .map(|v| v == "bytes")
                .unwrap_or(false),
        }
    }
}

impl CdnTransport for ReqwestTransport {
    fn head<'a>(&'a self, url: &'a str) -> BoxFuture<'a, FetchResult<HeadResponse>> {
        Box::pin(async move {
            let response =
                self.client
                    .head(url)
                    .send()
                    .await
                    .map_err(|e| FetchError::Http {
                        url: url.to_string(),
                        reason: e.to_string(),
                    })?;
            Ok(Self::head_of(&response))
        })
    }

    fn get<'a>(
        &'a self,
        url: &'a str,
        range_start: Option<u64>,
    ) -> BoxFuture<'a, FetchResult<GetResponse>> {
        Box::pin(async move {
            let mut request = self.client.get(url);
            if let Some(start) = range_start {
                request = request.header(reqwest::header::RANGE, format!("bytes={start}-"));
            }
            let response = request.send().await.map_err(|e| FetchError::Http {
                url: url.to_string(),
                reason: e.to_string(),
            })?;

            let status = response.status().as_u16();
            let content_length = response
                .headers()
                .get(reqwest::header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok());
            let has_content_range = response
                .headers()
                .contains_key(reqwest::header::CONTENT_RANGE);

            let url_owned = url.to_string();
            let body: ByteStream = Box::pin(response.bytes_stream().map(move |chunk| {
                chunk.map_err(|e| FetchError::Http {
                    url: url_owned.clone(),
                    reason: format!("read error: {e}"),
                })
            }));

            Ok(GetResponse {
                status,
                content_length,
                has_content_range,
                body,
            })
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    /// One recorded request issued against the mock transport.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub(crate) enum RecordedRequest {
        Head { url: String },
        Get { url: String, range_start: Option<u64> },
    }

    /// In-memory transport serving canned blobs and recording traffic.
    pub(crate) struct MockTransport {
        /// url -> body bytes served by GET.
        pub blobs: HashMap<String, Vec<u8>>,
        /// url -> content id answered by HEAD.
        pub content_ids: HashMap<String, String>,
        /// Requests observed, in order.
        pub requests: Arc<Mutex<Vec<RecordedRequest>>>,
        /// Status override for every response (e.g. 403).
        pub force_status: Option<u16>,
        /// When set, GET ignores Range headers and answers 200 with
        /// the full body, mimicking a non-range-capable server.
        pub ignore_ranges: bool,
        /// Chunk size used when streaming bodies.
        pub chunk_size: usize,
        /// When set, GET declares the full Content-Length but streams
        /// only this many bytes, mimicking a dropped connection.
        pub truncate_after: Option<usize>,
    }

    impl MockTransport {
        pub(crate) fn new() -> Self {
            Self {
                blobs: HashMap::new(),
                content_ids: HashMap::new(),
                requests: Arc::new(Mutex::new(Vec::new())),
                force_status: None,
                ignore_ranges: false,
                chunk_size: 1024,
                truncate_after: None,
            }
        }

        pub(crate) fn recorded(&self) -> Vec<RecordedRequest> {
            self.requests.lock().clone()
        }
    }

    impl CdnTransport for MockTransport {
        fn head<'a>(&'a self, url: &'a str) -> BoxFuture<'a, FetchResult<HeadResponse>> {
            self.requests.lock().push(RecordedRequest::Head {
                url: url.to_string(),
            });
            let response = if let Some(status) = self.force_status {
                HeadResponse {
                    status,
                    ..Default::default()
                }
            } else {
                HeadResponse {
                    status: 200,
                    content_length: self.blobs.get(url).map(|b| b.len() as u64),
                    content_id: self.content_ids.get(url).cloned(),
                    accept_ranges: true,
                }
            };
            Box::pin(async move { Ok(response) })
        }

        fn get<'a>(
            &'a self,
            url: &'a str,
            range_start: Option<u64>,
        ) -> BoxFuture<'a, FetchResult<GetResponse>> {
            self.requests.lock().push(RecordedRequest::Get {
                url: url.to_string(),
                range_start,
            });

            if let Some(status) = self.force_status {
                return Box::pin(async move {
                    Ok(GetResponse {
                        status,
                        content_length: None,
                        has_content_range: false,
                        body: Box::pin(futures::stream::empty()),
                    })
                });
            }

            let blob = self.blobs.get(url).cloned().unwrap_or_default();
            let total = blob.len() as u64;
            let (status, has_content_range, body_bytes) = match range_start {
                Some(start) if !self.ignore_ranges => {
                    if start > total {
                        (416, false, Vec::new())
                    } else {
                        (206, true, blob[start as usize..].to_vec())
                    }
                }
                _ => (200, false, blob),
            };

            let content_length = Some(body_bytes.len() as u64);
            let body_bytes = match self.truncate_after {
                Some(limit) if body_bytes.len() > limit => body_bytes[..limit].to_vec(),
                _ => body_bytes,
            };
            let chunks: Vec<FetchResult<Bytes>> = body_bytes
                .chunks(self.chunk_size)
                .map(|c| Ok(Bytes::copy_from_slice(c)))
                .collect();

            Box::pin(async move {
                Ok(GetResponse {
                    status,
                    content_length,
                    has_content_range,
                    body: Box::pin(futures::stream::iter(chunks)),
                })
            })
        }
    }
}
