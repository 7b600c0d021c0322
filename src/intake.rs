//! Content Intake
//!
//! Applies the submission rules on top of the session store:
//! - typed text is appended verbatim
//! - a message that is a single URL is normalized, fetched and appended
//! - uploads must be `.md`/`.txt`, within the size limit, and valid UTF-8
//!
//! Nothing is appended unless the user has an active session, and a fetch
//! or download that completes after `/cancel` is discarded.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{BotError, BotResult, ExternalFailure, TransientError, UserError};
use crate::fetcher::RemoteFetcher;
use crate::session::{Fragment, FragmentOrigin, SessionStore};
use crate::url_rewrite;

/// Upload extensions accepted as markdown
pub const ACCEPTED_EXTENSIONS: &[&str] = &[".md", ".txt"];

/// Default upload size limit (1 MiB)
pub const DEFAULT_MAX_UPLOAD_BYTES: u64 = 1024 * 1024;

/// Outcome of an accepted submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub fragment_count: usize,
    pub origin: FragmentOrigin,
    pub bytes: usize,
    /// URL actually fetched, after normalization
    pub fetched_from: Option<String>,
}

/// Check a file name against the accepted extensions (case-insensitive)
pub fn is_supported_file(name: &str) -> bool {
    let lower = name.to_lowercase();
    ACCEPTED_EXTENSIONS.iter().any(|ext| lower.ends_with(ext))
}

pub struct Intake {
    sessions: Arc<SessionStore>,
    fetcher: Arc<dyn RemoteFetcher>,
    max_upload_bytes: u64,
}

impl Intake {
    pub fn new(
        sessions: Arc<SessionStore>,
        fetcher: Arc<dyn RemoteFetcher>,
        max_upload_bytes: u64,
    ) -> Self {
        Self {
            sessions,
            fetcher,
            max_upload_bytes,
        }
    }

    /// A plain text message: markdown, or a message starting with a URL
    /// (only the URL is used)
    pub async fn submit_text(&self, user_id: i64, text: &str) -> BotResult<Accepted> {
        if let Some(url) = url_rewrite::leading_url(text) {
            return self.submit_url(user_id, url).await;
        }

        let count = self
            .sessions
            .append(user_id, Fragment::new(FragmentOrigin::TypedText, text))
            .await?;

        Ok(Accepted {
            fragment_count: count,
            origin: FragmentOrigin::TypedText,
            bytes: text.len(),
            fetched_from: None,
        })
    }

    /// Fetch a URL into the session
    pub async fn submit_url(&self, user_id: i64, url: &str) -> BotResult<Accepted> {
        let generation = self
            .sessions
            .generation(user_id)
            .await
            .ok_or(UserError::NotStarted)?;

        let target = url_rewrite::normalize(url);
        let content = self
            .fetcher
            .fetch(&target)
            .await
            .map_err(TransientError::fetch)?;

        let bytes = content.len();
        let count = self
            .sessions
            .append_if_current(
                user_id,
                generation,
                Fragment::new(FragmentOrigin::FetchedUrl, content),
            )
            .await?;

        info!(
            "URL fragment accepted: user={}, url={}, bytes={}",
            user_id, target, bytes
        );

        Ok(Accepted {
            fragment_count: count,
            origin: FragmentOrigin::FetchedUrl,
            bytes,
            fetched_from: Some(target),
        })
    }

    /// Validate an upload before downloading it. Returns the session generation.
    pub async fn precheck_file(&self, user_id: i64, name: &str, size: u64) -> BotResult<u64> {
        let generation = self
            .sessions
            .generation(user_id)
            .await
            .ok_or(UserError::NotStarted)?;

        if !is_supported_file(name) {
            return Err(UserError::UnsupportedFileType {
                name: name.to_string(),
            }
            .into());
        }

        if size > self.max_upload_bytes {
            return Err(UserError::FileTooLarge {
                size,
                max: self.max_upload_bytes,
            }
            .into());
        }

        Ok(generation)
    }

    /// Validate, download and append an uploaded file
    pub async fn submit_file<F>(
        &self,
        user_id: i64,
        name: &str,
        size: u64,
        download: F,
    ) -> BotResult<Accepted>
    where
        F: Future<Output = anyhow::Result<Vec<u8>>>,
    {
        let generation = self.precheck_file(user_id, name, size).await?;

        let bytes = download.await.map_err(|e| {
            BotError::from(TransientError::fetch(ExternalFailure::Other(format!(
                "download failed: {}",
                e
            ))))
        })?;

        if bytes.len() as u64 > self.max_upload_bytes {
            return Err(UserError::FileTooLarge {
                size: bytes.len() as u64,
                max: self.max_upload_bytes,
            }
            .into());
        }

        let content = String::from_utf8(bytes).map_err(|_| UserError::NotUtf8 {
            name: name.to_string(),
        })?;

        let len = content.len();
        let count = self
            .sessions
            .append_if_current(
                user_id,
                generation,
                Fragment::new(FragmentOrigin::UploadedFile, content),
            )
            .await?;

        debug!("File fragment accepted: user={}, name={}, bytes={}", user_id, name, len);

        Ok(Accepted {
            fragment_count: count,
            origin: FragmentOrigin::UploadedFile,
            bytes: len,
            fetched_from: None,
        })
    }
}
