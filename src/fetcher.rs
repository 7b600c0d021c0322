//! Remote Content Fetcher
//!
//! Downloads markdown from a (normalized) URL. One GET, bounded timeout,
//! no retries. Failures are classified so the user gets a specific reason.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::ExternalFailure;

/// Default fetch timeout
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

/// Source of remote markdown
#[async_trait]
pub trait RemoteFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<String, ExternalFailure>;
}

/// HTTP implementation backed by reqwest
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
    timeout_secs: u64,
    max_bytes: u64,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64, max_bytes: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(concat!("mdpdf-bot/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            timeout_secs,
            max_bytes,
        })
    }

    /// Same as `new` but with a sub-second timeout (tests)
    pub fn with_timeout(timeout: Duration, max_bytes: u64) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            timeout_secs: timeout.as_secs().max(1),
            max_bytes,
        })
    }

    fn classify(&self, err: &reqwest::Error) -> ExternalFailure {
        ExternalFailure::from_reqwest(err, self.timeout_secs)
    }
}

#[async_trait]
impl RemoteFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String, ExternalFailure> {
        info!("Fetching remote content: {}", url);

        let response = self.client.get(url).send().await.map_err(|e| {
            warn!("Fetch of {} failed: {}", url, e);
            self.classify(&e)
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Fetch of {} returned HTTP {}", url, status);
            return Err(ExternalFailure::HttpStatus {
                status: status.as_u16(),
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(ExternalFailure::Other(format!(
                    "content is {} bytes, limit is {}",
                    len, self.max_bytes
                )));
            }
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| self.classify(&e))?;
            if (body.len() + chunk.len()) as u64 > self.max_bytes {
                return Err(ExternalFailure::Other(format!(
                    "content exceeds {} bytes",
                    self.max_bytes
                )));
            }
            body.extend_from_slice(&chunk);
        }

        debug!("Fetched {} bytes from {}", body.len(), url);
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}
