//! Conversion Orchestrator Integration Tests
//!
//! Drives `Converter` end to end with an in-process PDF backend and outbox.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use mdpdf_bot::{
    BotError, Converter, ExternalFailure, Fragment, FragmentOrigin, Outbox, PdfBackend,
    QuotaConfig, QuotaError, QuotaLedger, SessionState, SessionStore, UsageRecord, UserError,
    UserIdentity,
};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;

type Hook = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// Backend returning a fixed result and recording every document it sees
struct FakeBackend {
    result: Result<Vec<u8>, ExternalFailure>,
    documents: Mutex<Vec<String>>,
    during_render: Option<Hook>,
}

impl FakeBackend {
    fn ok() -> Self {
        Self {
            result: Ok(b"%PDF-1.7 fake".to_vec()),
            documents: Mutex::new(Vec::new()),
            during_render: None,
        }
    }

    fn failing(failure: ExternalFailure) -> Self {
        Self {
            result: Err(failure),
            ..Self::ok()
        }
    }

    fn calls(&self) -> usize {
        self.documents.lock().len()
    }
}

#[async_trait]
impl PdfBackend for FakeBackend {
    async fn render(&self, markdown: &str) -> Result<Vec<u8>, ExternalFailure> {
        self.documents.lock().push(markdown.to_string());
        if let Some(hook) = &self.during_render {
            hook().await;
        }
        self.result.clone()
    }
}

/// Outbox that reads the staged PDF back, or fails on demand
#[derive(Default)]
struct FakeOutbox {
    fail: bool,
    delivered: Mutex<Vec<(Vec<u8>, usize)>>,
}

#[async_trait]
impl Outbox for FakeOutbox {
    async fn deliver_pdf(&self, pdf: &Path, fragment_count: usize) -> anyhow::Result<()> {
        if self.fail {
            anyhow::bail!("chat not found");
        }
        let bytes = tokio::fs::read(pdf).await?;
        self.delivered.lock().push((bytes, fragment_count));
        Ok(())
    }
}

struct Harness {
    sessions: Arc<SessionStore>,
    quota: Arc<QuotaLedger>,
    backend: Arc<FakeBackend>,
    converter: Converter,
    records: mpsc::UnboundedReceiver<UsageRecord>,
}

impl Harness {
    fn new(backend: FakeBackend) -> Self {
        Self::with_sessions(Arc::new(SessionStore::new()), backend)
    }

    fn with_sessions(sessions: Arc<SessionStore>, backend: FakeBackend) -> Self {
        let quota = Arc::new(QuotaLedger::new(QuotaConfig::default()));
        let backend = Arc::new(backend);
        let (tx, rx) = mpsc::unbounded_channel();
        let converter = Converter::new(
            Arc::clone(&sessions),
            Arc::clone(&quota),
            Arc::clone(&backend) as Arc<dyn PdfBackend>,
            tx,
        );
        Self {
            sessions,
            quota,
            backend,
            converter,
            records: rx,
        }
    }

    async fn fill(&self, user_id: i64, fragments: &[&str]) {
        self.sessions.start(user_id).await;
        for text in fragments {
            self.sessions
                .append(user_id, Fragment::new(FragmentOrigin::TypedText, *text))
                .await
                .unwrap();
        }
    }

    fn drain_records(&mut self) -> Vec<UsageRecord> {
        let mut out = Vec::new();
        while let Ok(record) = self.records.try_recv() {
            out.push(record);
        }
        out
    }
}

fn alice() -> UserIdentity {
    UserIdentity::new(42, Some("alice".to_string()), "Alice")
}

#[tokio::test]
async fn test_two_fragments_convert_successfully() {
    let mut h = Harness::new(FakeBackend::ok());
    let outbox = FakeOutbox::default();
    h.fill(42, &["# Title", "body"]).await;

    let report = h.converter.convert(&alice(), &outbox).await.unwrap();
    assert_eq!(report.fragment_count, 2);
    assert_eq!(report.input_length, "# Title\n\nbody".len());

    assert_eq!(h.backend.documents.lock().clone(), vec!["# Title\n\nbody".to_string()]);
    assert_eq!(
        outbox.delivered.lock().clone(),
        vec![(b"%PDF-1.7 fake".to_vec(), 2)]
    );

    assert_eq!(h.sessions.state(42).await, SessionState::Idle);
    assert_eq!(h.quota.record(42).unwrap().hourly_count, 1);

    let records = h.drain_records();
    assert_eq!(records.len(), 1);
    let rec = &records[0];
    assert!(rec.success);
    assert_eq!(rec.input_length, 13);
    assert_eq!(rec.fragment_count, 2);
    assert_eq!(rec.source, "text");
    assert_eq!(rec.username.as_deref(), Some("alice"));
    assert!(rec.error.is_empty());
}

#[tokio::test]
async fn test_hourly_limit_blocks_before_render() {
    let mut h = Harness::new(FakeBackend::ok());
    let outbox = FakeOutbox::default();

    for _ in 0..3 {
        h.fill(42, &["doc"]).await;
        h.converter.convert(&alice(), &outbox).await.unwrap();
    }
    assert_eq!(h.drain_records().len(), 3);

    h.fill(42, &["fourth"]).await;
    let err = h.converter.convert(&alice(), &outbox).await.unwrap_err();
    match err {
        BotError::Quota(QuotaError::HourlyExceeded {
            limit,
            minutes_remaining,
        }) => {
            assert_eq!(limit, 3);
            assert!((1..=60).contains(&minutes_remaining));
        }
        other => panic!("Expected hourly limit, got {:?}", other),
    }

    assert_eq!(h.backend.calls(), 3);
    assert!(h.drain_records().is_empty());
    // Rejected content stays for a later retry
    assert_eq!(h.sessions.snapshot(42).await.unwrap().fragments.len(), 1);
}

#[tokio::test]
async fn test_render_timeout_keeps_session_and_quota() {
    let mut h = Harness::new(FakeBackend::failing(ExternalFailure::Timeout { secs: 30 }));
    let outbox = FakeOutbox::default();
    h.fill(42, &["# Keep me"]).await;

    let err = h.converter.convert(&alice(), &outbox).await.unwrap_err();
    match &err {
        BotError::Transient(t) => assert!(t.failure.is_timeout()),
        other => panic!("Expected transient error, got {:?}", other),
    }

    assert_eq!(h.sessions.state(42).await, SessionState::AwaitingContent);
    assert_eq!(h.sessions.snapshot(42).await.unwrap().fragments.len(), 1);
    assert_eq!(h.quota.status(42).hourly_used, 0);
    assert!(outbox.delivered.lock().is_empty());

    let records = h.drain_records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert!(records[0].error.contains("timed out"));
}

#[tokio::test]
async fn test_delivery_failure_clears_session() {
    let mut h = Harness::new(FakeBackend::ok());
    let outbox = FakeOutbox {
        fail: true,
        ..Default::default()
    };
    h.fill(42, &["# Lost"]).await;

    let err = h.converter.convert(&alice(), &outbox).await.unwrap_err();
    assert!(matches!(err, BotError::Fatal(_)));
    assert_eq!(h.sessions.state(42).await, SessionState::Idle);
    assert_eq!(h.quota.status(42).hourly_used, 0);

    let records = h.drain_records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert!(records[0].error.contains("delivery failed"));
}

#[tokio::test]
async fn test_rejections_without_content() {
    let mut h = Harness::new(FakeBackend::ok());
    let outbox = FakeOutbox::default();

    let err = h.converter.convert(&alice(), &outbox).await.unwrap_err();
    assert!(matches!(err, BotError::User(UserError::NoSession)));

    h.sessions.start(42).await;
    let err = h.converter.convert(&alice(), &outbox).await.unwrap_err();
    assert!(matches!(err, BotError::User(UserError::EmptySession)));

    assert_eq!(h.backend.calls(), 0);
    assert!(h.drain_records().is_empty());
}

#[tokio::test]
async fn test_premium_bypasses_limits() {
    let mut h = Harness::new(FakeBackend::ok());
    let outbox = FakeOutbox::default();
    h.quota.set_premium(42, true);

    for _ in 0..5 {
        h.fill(42, &["doc"]).await;
        h.converter.convert(&alice(), &outbox).await.unwrap();
    }

    let records = h.drain_records();
    assert_eq!(records.len(), 5);
    assert!(records.iter().all(|r| r.success && r.is_premium));
}

/// Backend whose render runs `during` against the shared session store
fn backend_with_hook<F>(sessions: &Arc<SessionStore>, during: F) -> FakeBackend
where
    F: Fn(Arc<SessionStore>) -> BoxFuture<'static, ()> + Send + Sync + 'static,
{
    let hook_sessions = Arc::clone(sessions);
    FakeBackend {
        during_render: Some(Box::new(move || during(Arc::clone(&hook_sessions)))),
        ..FakeBackend::ok()
    }
}

#[tokio::test]
async fn test_restart_during_render_keeps_new_session() {
    let sessions = Arc::new(SessionStore::new());
    let backend = backend_with_hook(&sessions, |sessions| {
        Box::pin(async move {
            sessions.cancel(42).await;
            sessions.start(42).await;
            sessions
                .append(42, Fragment::new(FragmentOrigin::TypedText, "fresh"))
                .await
                .unwrap();
        })
    });
    let mut h = Harness::with_sessions(sessions, backend);
    let outbox = FakeOutbox::default();
    h.fill(42, &["old"]).await;

    let err = h.converter.convert(&alice(), &outbox).await.unwrap_err();
    assert!(matches!(err, BotError::Cancelled));

    let snapshot = h.sessions.snapshot(42).await.unwrap();
    assert_eq!(snapshot.fragments.len(), 1);
    assert_eq!(snapshot.fragments[0].content, "fresh");
    assert!(outbox.delivered.lock().is_empty());
    assert_eq!(h.quota.status(42).hourly_used, 0);
    assert_eq!(h.drain_records().len(), 1);
}

#[tokio::test]
async fn test_cancel_during_render_discards_pdf() {
    let sessions = Arc::new(SessionStore::new());
    let backend = backend_with_hook(&sessions, |sessions| {
        Box::pin(async move {
            sessions.cancel(42).await;
        })
    });
    let mut h = Harness::with_sessions(sessions, backend);
    let outbox = FakeOutbox::default();
    h.fill(42, &["# Draft"]).await;

    let err = h.converter.convert(&alice(), &outbox).await.unwrap_err();
    assert!(matches!(err, BotError::Cancelled));

    assert_eq!(h.backend.calls(), 1);
    assert!(outbox.delivered.lock().is_empty());
    assert_eq!(h.quota.status(42).hourly_used, 0);
    assert_eq!(h.sessions.state(42).await, SessionState::Idle);

    let records = h.drain_records();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert!(records[0].error.contains("cancelled"));
}

#[tokio::test]
async fn test_precheck_matches_convert_rejections() {
    let mut h = Harness::new(FakeBackend::ok());
    let outbox = FakeOutbox::default();

    let err = h.converter.precheck(42).await.unwrap_err();
    assert!(matches!(err, BotError::User(UserError::NoSession)));

    h.sessions.start(42).await;
    let err = h.converter.precheck(42).await.unwrap_err();
    assert!(matches!(err, BotError::User(UserError::EmptySession)));

    for _ in 0..3 {
        h.fill(42, &["doc"]).await;
        h.converter.precheck(42).await.unwrap();
        h.converter.convert(&alice(), &outbox).await.unwrap();
    }

    h.fill(42, &["fourth"]).await;
    let err = h.converter.precheck(42).await.unwrap_err();
    assert!(matches!(
        err,
        BotError::Quota(QuotaError::HourlyExceeded { .. })
    ));

    // Checking never renders, charges or logs
    assert_eq!(h.backend.calls(), 3);
    assert_eq!(h.quota.status(42).hourly_used, 3);
    assert_eq!(h.drain_records().len(), 3);
}

#[tokio::test]
async fn test_concurrent_converts_are_serialized() {
    let mut h = Harness::new(FakeBackend::ok());
    let outbox = FakeOutbox::default();
    h.fill(42, &["once"]).await;

    let user = alice();
    let (a, b) = tokio::join!(
        h.converter.convert(&user, &outbox),
        h.converter.convert(&user, &outbox)
    );

    let successes = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
    assert_eq!(successes, 1);
    assert_eq!(h.backend.calls(), 1);
    assert_eq!(h.quota.status(42).hourly_used, 1);
    assert_eq!(h.drain_records().len(), 1);
}
