//! Session Store
//!
//! Per-user buffer of submitted markdown fragments.
//!
//! A user with no entry is `Idle`. `/start` creates an entry
//! (`AwaitingContent`) with a fresh generation number; `/cancel`, a
//! successful conversion or the idle sweep remove it. Operations that
//! started under an older generation (a slow fetch, a conversion) use the
//! `*_if_current` methods so they cannot touch a session that was cancelled
//! or restarted in the meantime.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::error::UserError;

/// Characters shown in the `/status` preview
const PREVIEW_CHARS: usize = 100;

/// What the user is allowed to do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingContent,
}

/// Where a fragment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentOrigin {
    TypedText,
    UploadedFile,
    FetchedUrl,
}

impl FragmentOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TypedText => "text",
            Self::UploadedFile => "file",
            Self::FetchedUrl => "url",
        }
    }
}

/// One submitted piece of content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub origin: FragmentOrigin,
    pub content: String,
}

impl Fragment {
    pub fn new(origin: FragmentOrigin, content: impl Into<String>) -> Self {
        Self {
            origin,
            content: content.into(),
        }
    }
}

#[derive(Debug)]
struct Session {
    generation: u64,
    fragments: Vec<Fragment>,
    last_activity: Instant,
}

/// Read-only copy of a session taken for conversion or display
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    pub generation: u64,
    pub fragments: Vec<Fragment>,
}

impl SessionSnapshot {
    /// Fragments joined by a blank line, in submission order
    pub fn document(&self) -> String {
        self.fragments
            .iter()
            .map(|f| f.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    pub fn total_chars(&self) -> usize {
        self.fragments.iter().map(|f| f.content.chars().count()).sum()
    }

    /// Origin tag for the usage log: the shared origin, or "mixed"
    pub fn source_tag(&self) -> &'static str {
        let mut origins = self.fragments.iter().map(|f| f.origin);
        match origins.next() {
            None => "none",
            Some(first) if origins.all(|o| o == first) => first.as_str(),
            Some(_) => "mixed",
        }
    }

    /// Start of the first fragment, UTF-8 safe
    pub fn preview(&self) -> String {
        let Some(first) = self.fragments.first() else {
            return String::new();
        };
        let mut preview: String = first.content.chars().take(PREVIEW_CHARS).collect();
        if first.content.chars().count() > PREVIEW_CHARS {
            preview.push_str("...");
        }
        preview
    }
}

/// Process-wide session map
pub struct SessionStore {
    sessions: RwLock<HashMap<i64, Session>>,
    next_generation: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Begin (or restart) a session, discarding any previous buffer
    pub async fn start(&self, user_id: i64) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let mut sessions = self.sessions.write().await;
        let previous = sessions.insert(
            user_id,
            Session {
                generation,
                fragments: Vec::new(),
                last_activity: Instant::now(),
            },
        );
        info!(
            "Session started: user={}, generation={}, discarded={}",
            user_id,
            generation,
            previous.map(|s| s.fragments.len()).unwrap_or(0)
        );
        generation
    }

    /// Drop the session unconditionally. Returns whether one existed.
    pub async fn cancel(&self, user_id: i64) -> bool {
        let removed = self.sessions.write().await.remove(&user_id).is_some();
        if removed {
            info!("Session cancelled: user={}", user_id);
        }
        removed
    }

    pub async fn state(&self, user_id: i64) -> SessionState {
        if self.sessions.read().await.contains_key(&user_id) {
            SessionState::AwaitingContent
        } else {
            SessionState::Idle
        }
    }

    pub async fn generation(&self, user_id: i64) -> Option<u64> {
        self.sessions.read().await.get(&user_id).map(|s| s.generation)
    }

    /// Append to the active session. Returns the new fragment count.
    pub async fn append(&self, user_id: i64, fragment: Fragment) -> Result<usize, UserError> {
        let mut sessions = self.sessions.write().await;
        let session = sessions.get_mut(&user_id).ok_or(UserError::NotStarted)?;
        Ok(Self::push(user_id, session, fragment))
    }

    /// Append only if the session is still the one identified by `generation`
    pub async fn append_if_current(
        &self,
        user_id: i64,
        generation: u64,
        fragment: Fragment,
    ) -> Result<usize, UserError> {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(&user_id) {
            Some(session) if session.generation == generation => {
                Ok(Self::push(user_id, session, fragment))
            }
            _ => {
                debug!(
                    "Discarding stale fragment for user {} (generation {})",
                    user_id, generation
                );
                Err(UserError::NotStarted)
            }
        }
    }

    fn push(user_id: i64, session: &mut Session, fragment: Fragment) -> usize {
        debug!(
            "Fragment appended: user={}, origin={}, bytes={}",
            user_id,
            fragment.origin.as_str(),
            fragment.content.len()
        );
        session.fragments.push(fragment);
        session.last_activity = Instant::now();
        session.fragments.len()
    }

    pub async fn snapshot(&self, user_id: i64) -> Option<SessionSnapshot> {
        self.sessions
            .read()
            .await
            .get(&user_id)
            .map(|s| SessionSnapshot {
                generation: s.generation,
                fragments: s.fragments.clone(),
            })
    }

    /// Remove the session only if it has not been restarted since `generation`
    pub async fn clear_if_current(&self, user_id: i64, generation: u64) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&user_id) {
            Some(s) if s.generation == generation => {
                sessions.remove(&user_id);
                true
            }
            _ => false,
        }
    }

    /// Remove sessions with no activity for `max_idle`
    pub async fn purge_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.last_activity.elapsed() < max_idle);
        let purged = before - sessions.len();
        if purged > 0 {
            info!("Purged {} idle sessions", purged);
        }
        purged
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}
