//! Markdown to PDF Telegram Bot
//!
//! Collects markdown from chat messages, uploaded files and URLs, and turns
//! it into a PDF through an external conversion service.
//!
//! # Features
//!
//! - **Sessions**: per-user Idle / AwaitingContent state with ordered fragments
//! - **Intake**: typed text, `.md`/`.txt` uploads, URLs (GitHub, Gist, GitLab, Bitbucket rewritten to raw)
//! - **Quotas**: daily and rolling hourly limits, premium bypass
//! - **Usage Log**: SQLite audit trail with timestamped backups
//!
//! # Architecture
//!
//! ```text
//! Telegram ──► Dispatcher ──► Intake ──► SessionStore
//!                  │             └── RemoteFetcher (reqwest)
//!                  │
//!                  └── /convert ──► Converter ──► QuotaLedger
//!                                      ├── PdfBackend (HTTP service)
//!                                      ├── Outbox (send document)
//!                                      └── usage channel ──► UsageStore (SQLite)
//! ```

pub mod config;
pub mod converter;
pub mod error;
pub mod fetcher;
pub mod intake;
pub mod pdf_service;
pub mod quota;
pub mod replies;
pub mod session;
pub mod telegram;
pub mod url_rewrite;
pub mod usage;


pub use config::Config;
pub use converter::{ConversionReport, Converter, Outbox, UserIdentity, OUTPUT_FILE_NAME};
pub use error::{BotError, BotResult, ExternalFailure, QuotaError, Stage, TransientError, UserError};
pub use fetcher::{HttpFetcher, RemoteFetcher};
pub use intake::{Accepted, Intake};
pub use pdf_service::{HttpPdfBackend, PdfBackend};
pub use quota::{QuotaConfig, QuotaLedger, QuotaRecord, QuotaStatus};
pub use session::{Fragment, FragmentOrigin, SessionSnapshot, SessionState, SessionStore};
pub use usage::{UsageRecord, UsageSender, UsageStats, UsageStore};
