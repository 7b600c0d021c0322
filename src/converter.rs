//! Conversion Orchestrator
//!
//! `/convert` pipeline:
//!
//! ```text
//! session ──► non-empty? ──► quota ──► join fragments ──► PDF service
//!                                                            │
//!          ┌──────────── success ────────────────────────────┤
//!          ▼                                                 ▼ failure
//!   deliver file, increment quota,                  keep session + quota,
//!   clear session, log success                      log failure
//! ```
//!
//! Conversions for one user are serialized so two concurrent `/convert`
//! calls cannot both pass the quota check. Rejections before the PDF
//! service is called are not logged. A PDF rendered for a session that was
//! cancelled or restarted meanwhile is dropped: not delivered, not charged,
//! logged as a failure.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::error::{BotError, BotResult, TransientError, UserError};
use crate::pdf_service::PdfBackend;
use crate::quota::QuotaLedger;
use crate::session::{SessionSnapshot, SessionStore};
use crate::usage::{UsageRecord, UsageSender};

/// File name the PDF is delivered under
pub const OUTPUT_FILE_NAME: &str = "markdown_converted.pdf";

/// Delivery of the finished PDF back to the user
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn deliver_pdf(&self, pdf: &Path, fragment_count: usize) -> anyhow::Result<()>;
}

/// Who asked for the conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: i64,
    pub username: Option<String>,
    pub first_name: String,
}

impl UserIdentity {
    pub fn new(id: i64, username: Option<String>, first_name: impl Into<String>) -> Self {
        Self {
            id,
            username,
            first_name: first_name.into(),
        }
    }
}

/// Summary of a successful conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversionReport {
    pub fragment_count: usize,
    pub input_length: usize,
    pub pdf_bytes: usize,
}

pub struct Converter {
    sessions: Arc<SessionStore>,
    quota: Arc<QuotaLedger>,
    backend: Arc<dyn PdfBackend>,
    usage: UsageSender,
    user_locks: Mutex<HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl Converter {
    pub fn new(
        sessions: Arc<SessionStore>,
        quota: Arc<QuotaLedger>,
        backend: Arc<dyn PdfBackend>,
        usage: UsageSender,
    ) -> Self {
        Self {
            sessions,
            quota,
            backend,
            usage,
            user_locks: Mutex::new(HashMap::new()),
        }
    }

    fn user_lock(&self, user_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        Arc::clone(self.user_locks.lock().entry(user_id).or_default())
    }

    /// Drop locks nobody is holding or waiting on
    pub fn prune_locks(&self) -> usize {
        let mut locks = self.user_locks.lock();
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    /// Rejections `convert` would return before calling the PDF service.
    /// Lets the caller skip the progress message for requests that go nowhere.
    pub async fn precheck(&self, user_id: i64) -> BotResult<()> {
        self.ready_snapshot(user_id).await?;
        self.quota.check_quota(user_id)?;
        Ok(())
    }

    async fn ready_snapshot(&self, user_id: i64) -> BotResult<SessionSnapshot> {
        let snapshot = self
            .sessions
            .snapshot(user_id)
            .await
            .ok_or(UserError::NoSession)?;
        if snapshot.is_empty() {
            return Err(UserError::EmptySession.into());
        }
        Ok(snapshot)
    }

    /// Convert the user's session to PDF and deliver it
    pub async fn convert(&self, user: &UserIdentity, outbox: &dyn Outbox) -> BotResult<ConversionReport> {
        let lock = self.user_lock(user.id);
        let _guard = lock.lock().await;

        let snapshot = self.ready_snapshot(user.id).await?;
        self.quota.check_quota(user.id)?;
        let is_premium = self.quota.is_premium(user.id);

        let document = snapshot.document();
        let start = Instant::now();
        info!(
            "Converting for user {}: {} fragments, {} bytes",
            user.id,
            snapshot.fragments.len(),
            document.len()
        );

        let outcome = self
            .render_and_deliver(user.id, &snapshot, &document, outbox)
            .await;

        match outcome {
            Ok(pdf_bytes) => {
                self.quota.increment_quota(user.id);
                if !self.sessions.clear_if_current(user.id, snapshot.generation).await {
                    warn!("Session for user {} changed during conversion", user.id);
                }
                self.emit(user, &snapshot, &document, is_premium, None);

                info!(
                    "Conversion succeeded for user {} in {}ms ({} bytes PDF)",
                    user.id,
                    start.elapsed().as_millis(),
                    pdf_bytes
                );

                Ok(ConversionReport {
                    fragment_count: snapshot.fragments.len(),
                    input_length: document.len(),
                    pdf_bytes,
                })
            }
            Err(err @ BotError::Cancelled) => {
                info!("Discarding PDF for user {}: session cancelled during render", user.id);
                self.emit(user, &snapshot, &document, is_premium, Some(err.to_string()));
                Err(err)
            }
            Err(err @ BotError::Transient(_)) => {
                warn!("Conversion failed for user {}: {}", user.id, err);
                self.emit(user, &snapshot, &document, is_premium, Some(err.to_string()));
                Err(err)
            }
            Err(err) => {
                error!("Conversion aborted for user {}: {}", user.id, err);
                self.sessions.clear_if_current(user.id, snapshot.generation).await;
                self.emit(user, &snapshot, &document, is_premium, Some(err.to_string()));
                Err(err)
            }
        }
    }

    /// Render, stage the PDF in a temp file and hand it to the outbox.
    /// Nothing is delivered if the session was cancelled or restarted while
    /// rendering. The temp file is removed when this returns, on every path.
    async fn render_and_deliver(
        &self,
        user_id: i64,
        snapshot: &SessionSnapshot,
        document: &str,
        outbox: &dyn Outbox,
    ) -> BotResult<usize> {
        let pdf = self
            .backend
            .render(document)
            .await
            .map_err(TransientError::render)?;

        if self.sessions.generation(user_id).await != Some(snapshot.generation) {
            return Err(BotError::Cancelled);
        }

        let staged = tempfile::Builder::new()
            .prefix("mdpdf_")
            .suffix(".pdf")
            .tempfile()
            .map_err(|e| BotError::fatal(format!("creating temp file: {}", e)))?;

        tokio::fs::write(staged.path(), &pdf)
            .await
            .map_err(|e| BotError::fatal(format!("writing temp file: {}", e)))?;

        outbox
            .deliver_pdf(staged.path(), snapshot.fragments.len())
            .await
            .map_err(|e| BotError::fatal(format!("delivery failed: {:#}", e)))?;

        Ok(pdf.len())
    }

    fn emit(
        &self,
        user: &UserIdentity,
        snapshot: &SessionSnapshot,
        document: &str,
        is_premium: bool,
        error: Option<String>,
    ) {
        let record = UsageRecord {
            timestamp: chrono::Utc::now().timestamp(),
            user_id: user.id,
            username: user.username.clone(),
            first_name: user.first_name.clone(),
            source: snapshot.source_tag().to_string(),
            input_length: document.len(),
            fragment_count: snapshot.fragments.len(),
            success: error.is_none(),
            error: error.unwrap_or_default(),
            is_premium,
        };

        if self.usage.send(record).is_err() {
            warn!("Usage recorder is gone; dropping record for user {}", user.id);
        }
    }
}
