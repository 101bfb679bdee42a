//! End-to-end session lifecycle test suite.
//!
//! Exercises the public API the way a host framework would: engine
//! lifecycle, data operations, flash messages, the security policy
//! pipeline, and per-backend write guarantees.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use vestibule::{
    FileStore, MemoryStore, PolicyOutcome, PolicyPipeline, RequestContext, RestartReason,
    SecretString, SecurityConfig, Session, SessionConfig, SessionData, SessionError,
    SessionStatus, SessionStore, WriteGuarantee,
};

fn test_config() -> SessionConfig {
    SessionConfig {
        secret_key: SecretString::new("integration-test-secret-key-0123456789"),
        ..Default::default()
    }
}

async fn started(store: Arc<dyn SessionStore>) -> Session {
    let mut session = Session::new(store, test_config()).unwrap();
    session.start().await.unwrap();
    session
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn start_twice_is_active_with_same_id() {
    let mut session = started(Arc::new(MemoryStore::new())).await;
    let first_id = session.id().unwrap().to_owned();

    session.start().await.unwrap();

    assert_eq!(session.status(), SessionStatus::Active);
    assert_eq!(session.id().unwrap(), first_id);
}

#[tokio::test]
async fn destroy_then_read_returns_default() {
    let mut session = started(Arc::new(MemoryStore::new())).await;
    session.set("k", "v").await.unwrap();

    session.destroy().await.unwrap();

    assert!(!session.is_started());
    assert_eq!(session.get("k"), Err(SessionError::NotStarted));

    // A restarted session is empty: the default comes back for any key
    session.start().await.unwrap();
    assert_eq!(
        session.get_or("k", json!("default")).unwrap(),
        json!("default")
    );
}

#[tokio::test]
async fn regenerate_changes_id_keeps_data() {
    let mut session = started(Arc::new(MemoryStore::new())).await;
    session.set("a", 1).await.unwrap();
    session.set("b", 2).await.unwrap();
    let before = session.all().unwrap();
    let old_id = session.id().unwrap().to_owned();

    let new_id = session.regenerate_id(true).await.unwrap();

    assert_ne!(new_id, old_id);
    assert_eq!(session.all().unwrap(), before);
}

#[tokio::test]
async fn set_get_until_removed() {
    let mut session = started(Arc::new(MemoryStore::new())).await;

    session.set("k", "v").await.unwrap();
    assert_eq!(session.get("k").unwrap(), Some(&json!("v")));
    assert!(session.has("k").unwrap());

    session.remove("k").await.unwrap();
    assert!(!session.has("k").unwrap());

    session.set("k", "v").await.unwrap();
    session.clear().await.unwrap();
    assert!(!session.has("k").unwrap());
}

// =============================================================================
// Flash messages
// =============================================================================

#[tokio::test]
async fn flash_consume_once_roundtrip() {
    let mut session = started(Arc::new(MemoryStore::new())).await;

    session.flash().add("success", "A").await.unwrap();
    session.flash().add("success", "B").await.unwrap();

    assert_eq!(session.flash().get("success").unwrap(), vec!["A", "B"]);
    assert_eq!(
        session.flash().consume("success").await.unwrap(),
        vec!["A", "B"]
    );
    assert!(session.flash().get("success").unwrap().is_empty());
}

#[tokio::test]
async fn flash_survives_regeneration() {
    let mut session = started(Arc::new(MemoryStore::new())).await;
    session.flash().add("notice", "kept").await.unwrap();

    session.regenerate_id(true).await.unwrap();

    assert_eq!(session.flash().consume("notice").await.unwrap(), vec!["kept"]);
}

// =============================================================================
// Security policy pipeline
// =============================================================================

#[tokio::test]
async fn binding_mismatch_destroys_and_restarts() {
    let pipeline = PolicyPipeline::default();
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
    let mut session = started(store.clone()).await;
    let now = Utc::now();

    let ctx1 = RequestContext::new().with_binding_signal("sig1");
    pipeline.run_at(&mut session, &ctx1, now).await.unwrap();
    session.set("user_id", 7).await.unwrap();
    let old_id = session.id().unwrap().to_owned();

    let ctx2 = RequestContext::new().with_binding_signal("sig2");
    let outcome = pipeline
        .run_at(&mut session, &ctx2, now + Duration::seconds(1))
        .await
        .unwrap();

    assert_eq!(
        outcome,
        PolicyOutcome::Restarted(RestartReason::BindingMismatch)
    );
    assert!(session.is_started());
    assert_ne!(session.id().unwrap(), old_id);
    assert!(session.all().unwrap().is_empty());
    // The hijacked record is gone from the backend too
    assert!(store.load(&old_id).await.unwrap().is_none());
}

#[tokio::test]
async fn idle_timeout_expires_only_past_the_boundary() {
    let config = SecurityConfig {
        idle_timeout: Some(Duration::seconds(1800)),
        regeneration_interval: None,
        bind_client_signal: false,
    };
    let pipeline = PolicyPipeline::from_config(&config);
    let mut session = started(Arc::new(MemoryStore::new())).await;
    let t0 = Utc::now();
    let ctx = RequestContext::new();

    pipeline.run_at(&mut session, &ctx, t0).await.unwrap();
    session.set("cart", "full").await.unwrap();

    let outcome = pipeline
        .run_at(&mut session, &ctx, t0 + Duration::seconds(1799))
        .await
        .unwrap();
    assert_eq!(outcome, PolicyOutcome::Continue);
    assert!(session.has("cart").unwrap());

    // Rewind the stamp and cross the boundary
    let mut metadata = session.security_metadata().unwrap().unwrap();
    metadata.last_activity = t0;
    session.store_security_metadata(&metadata).await.unwrap();

    let outcome = pipeline
        .run_at(&mut session, &ctx, t0 + Duration::seconds(1801))
        .await
        .unwrap();
    assert_eq!(outcome, PolicyOutcome::Restarted(RestartReason::IdleTimeout));
    assert!(!session.has("cart").unwrap());
}

#[tokio::test]
async fn rotation_happens_only_past_the_interval() {
    let config = SecurityConfig {
        idle_timeout: None,
        regeneration_interval: Some(Duration::seconds(300)),
        bind_client_signal: false,
    };
    let pipeline = PolicyPipeline::from_config(&config);
    let mut session = started(Arc::new(MemoryStore::new())).await;
    let t0 = Utc::now();
    let ctx = RequestContext::new();

    pipeline.run_at(&mut session, &ctx, t0).await.unwrap();
    let original_id = session.id().unwrap().to_owned();

    pipeline
        .run_at(&mut session, &ctx, t0 + Duration::seconds(100))
        .await
        .unwrap();
    assert_eq!(session.id().unwrap(), original_id);

    pipeline
        .run_at(&mut session, &ctx, t0 + Duration::seconds(301))
        .await
        .unwrap();
    assert_ne!(session.id().unwrap(), original_id);

    let metadata = session.security_metadata().unwrap().unwrap();
    assert_eq!(metadata.last_regenerated, t0 + Duration::seconds(301));
}

// =============================================================================
// Backend write guarantees
// =============================================================================

#[tokio::test]
async fn memory_store_keeps_concurrent_distinct_key_writes() {
    let store = Arc::new(MemoryStore::new());
    assert_eq!(store.write_guarantee(), WriteGuarantee::AtomicPerKey);

    // Two engines share one session ID, as two in-flight requests would
    let mut first = Session::new(store.clone(), test_config()).unwrap();
    first.start().await.unwrap();
    let id = first.id().unwrap().to_owned();

    let mut second = Session::new(store.clone(), test_config()).unwrap();
    second.bind_incoming_id(id.clone()).unwrap();
    second.start().await.unwrap();

    let (a, b) = tokio::join!(first.set("from_first", 1), second.set("from_second", 2));
    a.unwrap();
    b.unwrap();

    // AtomicPerKey: both writes are observable afterwards
    let persisted = store.load(&id).await.unwrap().unwrap();
    assert_eq!(persisted.get("from_first"), Some(&json!(1)));
    assert_eq!(persisted.get("from_second"), Some(&json!(2)));
}

#[tokio::test]
async fn file_store_declares_last_writer_wins() {
    let dir = std::env::temp_dir().join(format!(
        "vestibule_e2e_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    let store = Arc::new(FileStore::new(&dir).unwrap());

    // The file backend rewrites the whole record per write, so it only
    // promises last-writer-wins; callers must not assume more.
    assert_eq!(store.write_guarantee(), WriteGuarantee::LastWriterWins);

    let mut session = Session::new(store.clone(), test_config()).unwrap();
    session.start().await.unwrap();
    session.set("k", "v").await.unwrap();
    let id = session.id().unwrap().to_owned();

    let persisted = store.load(&id).await.unwrap().unwrap();
    assert_eq!(persisted.get("k"), Some(&json!("v")));

    let _ = std::fs::remove_dir_all(&dir);
}

// =============================================================================
// Backend faults
// =============================================================================

/// Delegates to a [`MemoryStore`] until `failing` is flipped, then reports
/// every operation as unavailable.
struct SwitchableStore {
    inner: MemoryStore,
    failing: AtomicBool,
}

impl SwitchableStore {
    fn new() -> Self {
        Self {
            inner: MemoryStore::new(),
            failing: AtomicBool::new(false),
        }
    }

    fn check(&self) -> Result<(), SessionError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(SessionError::BackendUnavailable(
                "connection reset".to_owned(),
            ));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SessionStore for SwitchableStore {
    async fn load(&self, session_id: &str) -> Result<Option<SessionData>, SessionError> {
        self.check()?;
        self.inner.load(session_id).await
    }

    async fn save(
        &self,
        session_id: &str,
        data: &SessionData,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        self.check()?;
        self.inner.save(session_id, data, ttl).await
    }

    async fn put_key(
        &self,
        session_id: &str,
        key: &str,
        value: Value,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        self.check()?;
        self.inner.put_key(session_id, key, value, ttl).await
    }

    async fn delete_key(
        &self,
        session_id: &str,
        key: &str,
        ttl: Duration,
    ) -> Result<(), SessionError> {
        self.check()?;
        self.inner.delete_key(session_id, key, ttl).await
    }

    async fn delete(&self, session_id: &str) -> Result<bool, SessionError> {
        self.check()?;
        self.inner.delete(session_id).await
    }

    async fn migrate(
        &self,
        old_id: &str,
        new_id: &str,
        data: &SessionData,
        ttl: Duration,
        delete_old: bool,
    ) -> Result<(), SessionError> {
        self.check()?;
        self.inner
            .migrate(old_id, new_id, data, ttl, delete_old)
            .await
    }

    fn write_guarantee(&self) -> WriteGuarantee {
        self.inner.write_guarantee()
    }
}

#[tokio::test]
async fn backend_fault_surfaces_unchanged_from_data_ops() {
    let store = Arc::new(SwitchableStore::new());
    let mut session = Session::new(store.clone(), test_config()).unwrap();
    session.start().await.unwrap();
    session.set("k", "v").await.unwrap();

    store.failing.store(true, Ordering::SeqCst);

    assert!(matches!(
        session.set("k2", 1).await,
        Err(SessionError::BackendUnavailable(_))
    ));
    assert!(matches!(
        session.remove("k2").await,
        Err(SessionError::BackendUnavailable(_))
    ));
    assert!(matches!(
        session.clear().await,
        Err(SessionError::BackendUnavailable(_))
    ));
    assert!(matches!(
        session.regenerate_id(true).await,
        Err(SessionError::BackendUnavailable(_))
    ));
    assert!(matches!(
        session.flash().add("notice", "x").await,
        Err(SessionError::BackendUnavailable(_))
    ));

    // A fault is never treated as an absent record
    store.failing.store(false, Ordering::SeqCst);
    let id = session.id().unwrap().to_owned();
    let persisted = store.load(&id).await.unwrap().unwrap();
    assert_eq!(persisted.get("k"), Some(&json!("v")));
}

#[tokio::test]
async fn backend_fault_is_never_folded_into_a_restart() {
    let config = SecurityConfig {
        idle_timeout: None,
        regeneration_interval: None,
        bind_client_signal: false,
    };
    let pipeline = PolicyPipeline::from_config(&config);
    let store = Arc::new(SwitchableStore::new());
    let mut session = Session::new(store.clone(), test_config()).unwrap();
    session.start().await.unwrap();
    let t0 = Utc::now();
    pipeline
        .run_at(&mut session, &RequestContext::new(), t0)
        .await
        .unwrap();

    store.failing.store(true, Ordering::SeqCst);

    let result = pipeline
        .run_at(&mut session, &RequestContext::new(), t0 + Duration::seconds(60))
        .await;
    assert!(matches!(result, Err(SessionError::BackendUnavailable(_))));
    // The session is not destroyed or replaced on a fault
    assert!(session.is_started());
}

// =============================================================================
// Cross-backend behavior
// =============================================================================

#[tokio::test]
async fn file_store_session_roundtrip() {
    let dir = std::env::temp_dir().join(format!(
        "vestibule_e2e_rt_{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    ));
    let store: Arc<dyn SessionStore> = Arc::new(FileStore::new(&dir).unwrap());

    let mut first = Session::new(store.clone(), test_config()).unwrap();
    first.start().await.unwrap();
    first.set("user_id", 7).await.unwrap();
    first.flash().add("notice", "hello").await.unwrap();
    let id = first.id().unwrap().to_owned();

    let mut second = Session::new(store, test_config()).unwrap();
    second.bind_incoming_id(id).unwrap();
    second.start().await.unwrap();

    assert_eq!(second.get("user_id").unwrap(), Some(&json!(7)));
    assert_eq!(second.flash().consume("notice").await.unwrap(), vec!["hello"]);

    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn pipeline_over_full_request_cycle() {
    let store: Arc<dyn SessionStore> = Arc::new(MemoryStore::new());
    let pipeline = PolicyPipeline::default();
    let ctx = RequestContext::new().with_binding_signal("Mozilla/5.0");

    // Request 1: fresh session, pipeline initializes metadata
    let mut session = started(store.clone()).await;
    pipeline.run(&mut session, &ctx).await.unwrap();
    session.set("user_id", 7).await.unwrap();
    let id = session.id().unwrap().to_owned();
    let csrf = session.csrf_token().unwrap().unwrap();

    // Request 2: same client comes back, everything holds
    let mut session = Session::new(store, test_config()).unwrap();
    session.bind_incoming_id(id).unwrap();
    session.start().await.unwrap();
    let outcome = pipeline.run(&mut session, &ctx).await.unwrap();

    assert_eq!(outcome, PolicyOutcome::Continue);
    assert_eq!(session.get("user_id").unwrap(), Some(&json!(7)));
    assert_eq!(session.csrf_token().unwrap().unwrap(), csrf);
}
