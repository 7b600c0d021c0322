//! Error Types
//!
//! Closed taxonomy of everything that can go wrong while handling a user
//! event. Variants carry structured detail; the Telegram layer turns them
//! into reply text.

use std::fmt;
use thiserror::Error;

/// Top-level error for a single user event
#[derive(Debug, Error)]
pub enum BotError {
    #[error(transparent)]
    User(#[from] UserError),

    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error(transparent)]
    Transient(#[from] TransientError),

    /// The session was cancelled or restarted while the PDF was rendering
    #[error("Conversion discarded: session cancelled")]
    Cancelled,

    #[error("Unexpected failure: {0}")]
    Fatal(String),
}

impl BotError {
    pub fn fatal(detail: impl fmt::Display) -> Self {
        Self::Fatal(detail.to_string())
    }

    /// Short machine-friendly tag used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::User(_) => "user",
            Self::Quota(_) => "quota",
            Self::Transient(_) => "transient",
            Self::Cancelled => "cancelled",
            Self::Fatal(_) => "fatal",
        }
    }
}

/// Bad input from the user; nothing was mutated
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UserError {
    #[error("No active session")]
    NoSession,

    #[error("Session has no content")]
    EmptySession,

    #[error("Submission received outside of a session")]
    NotStarted,

    #[error("Unsupported file type: {name}")]
    UnsupportedFileType { name: String },

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("File is not valid UTF-8 text: {name}")]
    NotUtf8 { name: String },

    #[error("Command requires administrator rights")]
    NotAdmin,

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Free-tier limits reached
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QuotaError {
    #[error("Hourly limit of {limit} conversions reached, next slot in {minutes_remaining} min")]
    HourlyExceeded { limit: u32, minutes_remaining: i64 },

    #[error("Daily limit of {limit} conversions reached")]
    DailyExceeded { limit: u32 },
}

/// Which external call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetch,
    Render,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Render => "render",
        }
    }
}

/// Classification of a failed HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExternalFailure {
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("connection failed: {0}")]
    Connection(String),

    #[error("HTTP status {status}")]
    HttpStatus { status: u16 },

    #[error("{0}")]
    Other(String),
}

impl ExternalFailure {
    /// Classify a reqwest error; `timeout_secs` is the budget that was applied
    pub fn from_reqwest(err: &reqwest::Error, timeout_secs: u64) -> Self {
        if err.is_timeout() {
            Self::Timeout { secs: timeout_secs }
        } else if err.is_connect() {
            Self::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            Self::HttpStatus {
                status: status.as_u16(),
            }
        } else {
            Self::Other(err.to_string())
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// A network call to a collaborator failed; the user may retry
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{} failed: {failure}", stage.as_str())]
pub struct TransientError {
    pub stage: Stage,
    pub failure: ExternalFailure,
}

impl TransientError {
    pub fn fetch(failure: ExternalFailure) -> Self {
        Self {
            stage: Stage::Fetch,
            failure,
        }
    }

    pub fn render(failure: ExternalFailure) -> Self {
        Self {
            stage: Stage::Render,
            failure,
        }
    }
}

pub type BotResult<T> = std::result::Result<T, BotError>;
