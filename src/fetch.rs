//! Out-of-band content fetching, behind a narrow seam.
//!
//! When no loader matches a URL, the broker fetches its content and inspects
//! the mime type to decide whether a content handler can interpret it. How
//! bytes are obtained (network, disk cache) is the embedder's concern.

use async_trait::async_trait;
use url::Url;

use crate::error::BrokerResult;

/// A fetched response: the final URL, its content type, and the raw payload.
#[derive(Debug, Clone)]
pub struct UrlResponse {
    pub url: Url,
    pub mime_type: String,
    pub body: Vec<u8>,
}

/// Fetches a URL's content out of band. Supplied by the embedder.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> BrokerResult<UrlResponse>;
}
