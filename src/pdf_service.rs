//! PDF Service Client
//!
//! The markdown renderer is a separate HTTP service: the raw document is
//! POSTed as `text/plain` and a 2xx response body is the PDF file.

use async_trait::async_trait;
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::ExternalFailure;

/// Default render timeout
pub const DEFAULT_RENDER_TIMEOUT_SECS: u64 = 30;

/// Markdown-to-PDF renderer
#[async_trait]
pub trait PdfBackend: Send + Sync {
    async fn render(&self, markdown: &str) -> Result<Vec<u8>, ExternalFailure>;
}

/// Client for the external PDF service
#[derive(Clone)]
pub struct HttpPdfBackend {
    client: Client,
    endpoint: String,
    timeout_secs: u64,
}

impl HttpPdfBackend {
    pub fn new(endpoint: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        Self::with_timeout(endpoint, Duration::from_secs(timeout_secs))
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            timeout_secs: timeout.as_secs().max(1),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl PdfBackend for HttpPdfBackend {
    async fn render(&self, markdown: &str) -> Result<Vec<u8>, ExternalFailure> {
        let start = Instant::now();
        debug!(
            "Calling PDF service: endpoint={}, bytes={}",
            self.endpoint,
            markdown.len()
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(markdown.to_string())
            .send()
            .await
            .map_err(|e| {
                warn!("PDF service request failed: {}", e);
                ExternalFailure::from_reqwest(&e, self.timeout_secs)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "PDF service error {}: {}",
                status,
                body.chars().take(200).collect::<String>()
            );
            return Err(ExternalFailure::HttpStatus {
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ExternalFailure::from_reqwest(&e, self.timeout_secs))?;

        info!(
            "PDF rendered: {} bytes in {}ms",
            bytes.len(),
            start.elapsed().as_millis()
        );
        Ok(bytes.to_vec())
    }
}
