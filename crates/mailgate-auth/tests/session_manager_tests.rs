//! End-to-end tests for the session manager.
//!
//! These drive the reconciliation task through a scripted identity provider
//! and token exchange, checking the resulting session, credential store,
//! navigation history and published events.

use async_trait::async_trait;
use jsonwebtoken::{encode, EncodingKey, Header};
use mailgate_auth::{
    complete_redirect, AuthError, AuthResult, BearerToken, CredentialRecord, CredentialStore,
    FederatedIdentity, FileCredentialStore, GuardDecision, HistoryNavigator, IdentityAssertion,
    IdentityEvent, IdentityListener, IdentityProvider, IdentityProviderAdapter, IntegrationKind,
    IntegrationLinker, MemoryCredentialStore, Phase, Route, SessionHandle, SessionManager,
    TokenExchangeClient,
};
use mailgate_events::{DetachHandle, Event, EventBus, MemoryEventBus, Subscription};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

// =============================================================================
// Scripted collaborators
// =============================================================================

fn signed_in(id: &str, email: &str) -> IdentityEvent {
    IdentityEvent::SignedIn {
        identity: FederatedIdentity::new(id).with_email(email),
        assertion: IdentityAssertion::new(format!("id-{}", id), email),
    }
}

/// Identity provider whose state is set by the test.
struct ScriptedProvider {
    listener: Arc<Mutex<Option<IdentityListener>>>,
    current: Mutex<IdentityEvent>,
    sign_in_error: Mutex<Option<AuthError>>,
    fail_sign_out: AtomicBool,
    hang_sign_out: AtomicBool,
    sign_out_calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(initial: IdentityEvent) -> Arc<Self> {
        Arc::new(Self {
            listener: Arc::new(Mutex::new(None)),
            current: Mutex::new(initial),
            sign_in_error: Mutex::new(None),
            fail_sign_out: AtomicBool::new(false),
            hang_sign_out: AtomicBool::new(false),
            sign_out_calls: AtomicUsize::new(0),
        })
    }

    fn emit(&self, event: IdentityEvent) {
        *self.current.lock() = event.clone();
        if let Some(listener) = self.listener.lock().as_ref() {
            listener(event);
        }
    }

    fn is_attached(&self) -> bool {
        self.listener.lock().is_some()
    }

    fn finish_sign_in(&self, id: &str, email: &str) -> AuthResult<IdentityAssertion> {
        if let Some(error) = self.sign_in_error.lock().clone() {
            return Err(error);
        }
        let event = signed_in(id, email);
        let assertion = match &event {
            IdentityEvent::SignedIn { assertion, .. } => assertion.clone(),
            IdentityEvent::SignedOut => unreachable!(),
        };
        self.emit(event);
        Ok(assertion)
    }
}

#[async_trait]
impl IdentityProviderAdapter for ScriptedProvider {
    async fn sign_in_with_provider(
        &self,
        provider: IdentityProvider,
    ) -> AuthResult<IdentityAssertion> {
        let id = format!("{}-user", provider.as_str());
        self.finish_sign_in(&id, "oauth@x.com")
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        _password: &str,
    ) -> AuthResult<IdentityAssertion> {
        self.finish_sign_in("password-user", email)
    }

    async fn sign_up_with_password(
        &self,
        email: &str,
        _password: &str,
    ) -> AuthResult<IdentityAssertion> {
        self.finish_sign_in("new-user", email)
    }

    async fn sign_out(&self) -> AuthResult<()> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_sign_out.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AuthError::ProviderSignOutFailed("network down".to_string()));
        }
        self.emit(IdentityEvent::SignedOut);
        Ok(())
    }

    fn on_identity_changed(&self, listener: IdentityListener) -> DetachHandle {
        listener(self.current.lock().clone());
        *self.listener.lock() = Some(listener);

        let slot = self.listener.clone();
        DetachHandle::new(move || {
            slot.lock().take();
        })
    }
}

/// Token exchange that records calls and can be held open.
#[derive(Default)]
struct ScriptedExchange {
    calls: Mutex<Vec<String>>,
    tokens: Mutex<HashMap<String, String>>,
    rejected: Mutex<HashSet<String>>,
    gate: Option<Arc<Semaphore>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedExchange {
    fn gated() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let exchange = Self {
            gate: Some(gate.clone()),
            ..Self::default()
        };
        (Arc::new(exchange), gate)
    }

    fn respond(&self, id_token: &str, access_token: &str) {
        self.tokens
            .lock()
            .insert(id_token.to_string(), access_token.to_string());
    }

    fn reject(&self, id_token: &str) {
        self.rejected.lock().insert(id_token.to_string());
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl TokenExchangeClient for ScriptedExchange {
    async fn exchange(&self, assertion: &IdentityAssertion) -> AuthResult<BearerToken> {
        self.calls.lock().push(assertion.id_token.clone());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .expect("gate should stay open")
                .forget();
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.rejected.lock().contains(&assertion.id_token) {
            return Err(AuthError::ExchangeRejected("invalid signature".to_string()));
        }
        let token = self
            .tokens
            .lock()
            .get(&assertion.id_token)
            .cloned()
            .unwrap_or_else(|| format!("T-{}", assertion.id_token));
        Ok(BearerToken::new(token))
    }
}

/// Linker that remembers the session phase at the time it was called.
struct RecordingLinker {
    session: SessionHandle,
    links: Mutex<Vec<(IntegrationKind, String, Phase)>>,
}

#[async_trait]
impl IntegrationLinker for RecordingLinker {
    async fn link(&self, kind: IntegrationKind, user_email: &str) -> AuthResult<()> {
        self.links
            .lock()
            .push((kind, user_email.to_string(), self.session.phase()));
        Ok(())
    }
}

// =============================================================================
// Fixture
// =============================================================================

struct TestFixture {
    store: Arc<dyn CredentialStore>,
    provider: Arc<ScriptedProvider>,
    exchange: Arc<ScriptedExchange>,
    navigator: Arc<HistoryNavigator>,
    bus: Arc<MemoryEventBus>,
}

impl TestFixture {
    fn new(initial: IdentityEvent) -> Self {
        Self {
            store: Arc::new(MemoryCredentialStore::new()),
            provider: ScriptedProvider::new(initial),
            exchange: Arc::new(ScriptedExchange::default()),
            navigator: Arc::new(HistoryNavigator::new()),
            bus: Arc::new(MemoryEventBus::new()),
        }
    }

    fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = store;
        self
    }

    fn with_exchange(mut self, exchange: Arc<ScriptedExchange>) -> Self {
        self.exchange = exchange;
        self
    }

    fn start(&self) -> SessionManager {
        SessionManager::builder(
            self.store.clone(),
            self.provider.clone(),
            self.exchange.clone(),
        )
        .navigator(self.navigator.clone())
        .events(self.bus.clone())
        .start()
    }

    async fn session_events(&self) -> Subscription {
        self.bus
            .subscribe("session.#")
            .await
            .expect("subscription should succeed")
    }
}

fn stored_record(token: &str, email: &str) -> Arc<dyn CredentialStore> {
    Arc::new(MemoryCredentialStore::with_record(CredentialRecord::new(
        BearerToken::new(token),
        Some(email.to_string()),
    )))
}

/// Wait until every command sent so far has been processed.
async fn settle(handle: &SessionHandle) {
    let acted = handle
        .invalidate(&BearerToken::new("never-issued"))
        .await
        .expect("session should be running");
    assert!(!acted);
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached in time");
}

fn event_types(events: &[Event]) -> Vec<String> {
    events.iter().map(|e| e.event_type.clone()).collect()
}

fn redirect_token(email: &str) -> String {
    encode(
        &Header::default(),
        &serde_json::json!({ "sub": email, "exp": 4_102_444_800_i64 }),
        &EncodingKey::from_secret(b"backend-secret"),
    )
    .expect("token should encode")
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test]
async fn test_new_identity_is_exchanged_once() {
    let fixture = TestFixture::new(signed_in("u1", "a@x.com"));
    fixture.exchange.respond("id-u1", "T1");
    let mut events = fixture.session_events().await;

    let manager = fixture.start();
    let session = manager
        .handle()
        .wait_for_phase(Phase::Authenticated)
        .await
        .unwrap();

    assert_eq!(fixture.exchange.calls(), vec!["id-u1".to_string()]);
    assert_eq!(session.bearer_token, Some(BearerToken::new("T1")));
    assert_eq!(session.user_email.as_deref(), Some("a@x.com"));
    assert_eq!(
        session.federated_identity.map(|i| i.id),
        Some("u1".to_string())
    );
    assert_eq!(
        fixture.store.get().unwrap(),
        Some(CredentialRecord::new(
            BearerToken::new("T1"),
            Some("a@x.com".to_string())
        ))
    );

    settle(&manager.handle()).await;
    let types = event_types(&events.drain());
    assert!(types.contains(&"phase.changed".to_string()));
    assert!(types.contains(&"exchange.succeeded".to_string()));
}

#[tokio::test]
async fn test_no_identity_no_token_is_unauthenticated() {
    let fixture = TestFixture::new(IdentityEvent::SignedOut);
    let manager = fixture.start();

    let session = manager.handle().wait_until_settled().await.unwrap();

    assert_eq!(session.phase, Phase::Unauthenticated);
    assert!(fixture.exchange.calls().is_empty());
    assert!(fixture.navigator.history().is_empty());
}

#[tokio::test]
async fn test_stored_token_skips_exchange_and_keeps_email() {
    let fixture = TestFixture::new(signed_in("u1", "other@x.com"))
        .with_store(stored_record("T0", "b@x.com"));
    let manager = fixture.start();
    let handle = manager.handle();

    assert_eq!(handle.phase(), Phase::Authenticated);
    settle(&handle).await;

    let session = handle.current();
    assert!(fixture.exchange.calls().is_empty());
    assert_eq!(session.phase, Phase::Authenticated);
    assert_eq!(session.bearer_token, Some(BearerToken::new("T0")));
    assert_eq!(session.user_email.as_deref(), Some("b@x.com"));
    assert_eq!(
        session.federated_identity.map(|i| i.id),
        Some("u1".to_string())
    );
}

#[tokio::test]
async fn test_bearer_only_session_survives_signed_out_provider() {
    let fixture = TestFixture::new(IdentityEvent::SignedOut)
        .with_store(stored_record("T0", "b@x.com"));
    let manager = fixture.start();
    let handle = manager.handle();
    settle(&handle).await;

    assert_eq!(handle.phase(), Phase::Authenticated);
    assert!(fixture.store.get().unwrap().is_some());
}

#[tokio::test]
async fn test_exchange_failure_leaves_unauthenticated() {
    let fixture = TestFixture::new(signed_in("u1", "a@x.com"));
    fixture.exchange.reject("id-u1");
    let mut events = fixture.session_events().await;

    let manager = fixture.start();
    let session = manager.handle().wait_until_settled().await.unwrap();

    assert_eq!(session.phase, Phase::Unauthenticated);
    assert!(session.federated_identity.is_none());
    assert!(session.last_error.is_some());
    assert!(fixture.store.load().unwrap().is_empty());

    settle(&manager.handle()).await;
    let failed: Vec<Event> = events
        .drain()
        .into_iter()
        .filter(|e| e.event_type == "exchange.failed")
        .collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].payload["error_code"], "EXCHANGE_REJECTED");
}

#[tokio::test]
async fn test_second_identity_waits_for_pending_exchange() {
    let (exchange, gate) = ScriptedExchange::gated();
    let fixture = TestFixture::new(IdentityEvent::SignedOut).with_exchange(exchange);
    let mut events = fixture.session_events().await;
    let manager = fixture.start();
    let handle = manager.handle();
    handle.wait_until_settled().await.unwrap();

    fixture.provider.emit(signed_in("u1", "a@x.com"));
    let exchange = fixture.exchange.clone();
    eventually(|| exchange.calls().len() == 1).await;

    fixture.provider.emit(signed_in("u2", "b@x.com"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(fixture.exchange.calls().len(), 1);
    assert_eq!(handle.phase(), Phase::Unauthenticated);

    gate.add_permits(2);
    let session = handle.wait_for_phase(Phase::Authenticated).await.unwrap();

    assert_eq!(
        fixture.exchange.calls(),
        vec!["id-u1".to_string(), "id-u2".to_string()]
    );
    assert_eq!(fixture.exchange.max_in_flight.load(Ordering::SeqCst), 1);
    assert_eq!(session.bearer_token, Some(BearerToken::new("T-id-u2")));
    assert_eq!(session.user_email.as_deref(), Some("b@x.com"));

    settle(&handle).await;
    let types = event_types(&events.drain());
    assert!(types.contains(&"exchange.discarded".to_string()));
}

#[tokio::test]
async fn test_superseded_identity_events_are_dropped() {
    let (exchange, gate) = ScriptedExchange::gated();
    let fixture = TestFixture::new(IdentityEvent::SignedOut).with_exchange(exchange);
    let manager = fixture.start();
    let handle = manager.handle();
    handle.wait_until_settled().await.unwrap();

    fixture.provider.emit(signed_in("u1", "a@x.com"));
    let exchange = fixture.exchange.clone();
    eventually(|| exchange.calls().len() == 1).await;

    fixture.provider.emit(signed_in("u2", "b@x.com"));
    fixture.provider.emit(signed_in("u3", "c@x.com"));
    gate.add_permits(3);

    let session = handle.wait_for_phase(Phase::Authenticated).await.unwrap();
    assert_eq!(
        fixture.exchange.calls(),
        vec!["id-u1".to_string(), "id-u3".to_string()]
    );
    assert_eq!(session.user_email.as_deref(), Some("c@x.com"));
    assert_eq!(fixture.exchange.max_in_flight.load(Ordering::SeqCst), 1);
}

// =============================================================================
// Login and logout
// =============================================================================

#[tokio::test]
async fn test_login_then_reload_restores_session() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credentials.json");

    let fixture = TestFixture::new(IdentityEvent::SignedOut)
        .with_store(Arc::new(FileCredentialStore::new(&path)));
    let manager = fixture.start();
    let handle = manager.handle();
    handle.wait_until_settled().await.unwrap();

    handle
        .login(BearerToken::new("T9"), "c@x.com")
        .await
        .unwrap();
    assert_eq!(handle.phase(), Phase::Authenticated);
    assert_eq!(fixture.navigator.current(), Some(Route::Dashboard));
    manager.shutdown().await;

    let reloaded = TestFixture::new(IdentityEvent::SignedOut)
        .with_store(Arc::new(FileCredentialStore::new(&path)));
    let manager = reloaded.start();
    let handle = manager.handle();

    assert_eq!(handle.phase(), Phase::Authenticated);
    settle(&handle).await;

    let session = handle.current();
    assert_eq!(session.phase, Phase::Authenticated);
    assert_eq!(session.user_email.as_deref(), Some("c@x.com"));
    assert_eq!(session.bearer_token, Some(BearerToken::new("T9")));
}

#[tokio::test]
async fn test_logout_succeeds_when_provider_sign_out_fails() {
    let fixture = TestFixture::new(signed_in("u1", "a@x.com"))
        .with_store(stored_record("T1", "a@x.com"));
    fixture.provider.fail_sign_out.store(true, Ordering::SeqCst);
    let mut events = fixture.session_events().await;
    let manager = fixture.start();
    let handle = manager.handle();
    settle(&handle).await;

    handle.logout().await.unwrap();

    let session = handle.current();
    assert_eq!(session.phase, Phase::Unauthenticated);
    assert!(!session.has_credentials());
    assert!(fixture.store.load().unwrap().is_empty());
    assert_eq!(fixture.navigator.current(), Some(Route::SignIn));
    let provider = fixture.provider.clone();
    eventually(|| provider.sign_out_calls.load(Ordering::SeqCst) == 1).await;

    let logouts: Vec<Event> = events
        .drain()
        .into_iter()
        .filter(|e| e.event_type == "logout")
        .collect();
    assert_eq!(logouts.len(), 1);
    assert_eq!(logouts[0].payload["reason"], "user_requested");
}

#[tokio::test]
async fn test_logout_does_not_wait_for_provider_sign_out() {
    let fixture = TestFixture::new(IdentityEvent::SignedOut)
        .with_store(stored_record("T1", "a@x.com"));
    fixture.provider.hang_sign_out.store(true, Ordering::SeqCst);
    let manager = fixture.start();
    let handle = manager.handle();
    settle(&handle).await;
    assert_eq!(handle.phase(), Phase::Authenticated);

    let result = tokio::time::timeout(Duration::from_secs(2), handle.logout()).await;
    assert!(matches!(result, Ok(Ok(()))), "logout waited on provider sign-out");

    assert_eq!(handle.phase(), Phase::Unauthenticated);
    assert!(fixture.store.load().unwrap().is_empty());
    assert_eq!(fixture.navigator.current(), Some(Route::SignIn));

    let provider = fixture.provider.clone();
    eventually(|| provider.sign_out_calls.load(Ordering::SeqCst) == 1).await;

    // The session keeps serving commands while the sign-out is stuck.
    handle
        .login(BearerToken::new("T2"), "a@x.com")
        .await
        .unwrap();
    assert_eq!(handle.phase(), Phase::Authenticated);
}

#[tokio::test]
async fn test_logout_with_working_provider() {
    let fixture = TestFixture::new(signed_in("u1", "a@x.com"));
    let manager = fixture.start();
    let handle = manager.handle();
    handle.wait_for_phase(Phase::Authenticated).await.unwrap();

    handle.logout().await.unwrap();
    settle(&handle).await;

    assert_eq!(handle.phase(), Phase::Unauthenticated);
    assert!(fixture.store.get().unwrap().is_none());
    assert_eq!(fixture.navigator.count(&Route::SignIn), 1);
}

// =============================================================================
// Redirects
// =============================================================================

#[tokio::test]
async fn test_malformed_redirect_token_is_not_fatal() {
    let fixture = TestFixture::new(IdentityEvent::SignedOut);
    let mut events = fixture.session_events().await;
    let manager = fixture.start();
    let handle = manager.handle();
    handle.wait_until_settled().await.unwrap();

    let result = handle.login_from_redirect("BADTOKEN").await;
    assert!(matches!(result, Err(AuthError::MalformedRedirectToken(_))));
    settle(&handle).await;

    let session = handle.current();
    assert_eq!(session.phase, Phase::Unauthenticated);
    assert!(session.last_error.is_some());
    assert!(fixture.store.load().unwrap().is_empty());
    assert!(fixture.navigator.history().is_empty());

    let types = event_types(&events.drain());
    assert!(types.contains(&"redirect.rejected".to_string()));
}

#[tokio::test]
async fn test_redirect_links_integration_after_authentication() {
    let fixture = TestFixture::new(IdentityEvent::SignedOut);
    let manager = fixture.start();
    let handle = manager.handle();
    handle.wait_until_settled().await.unwrap();

    let linker = RecordingLinker {
        session: handle.clone(),
        links: Mutex::new(Vec::new()),
    };
    let token = redirect_token("d@x.com");
    let url = format!(
        "http://localhost:3000/login?token={}&integration=gmail",
        token
    );

    let outcome = complete_redirect(&handle, &url, &linker)
        .await
        .unwrap()
        .expect("redirect carried a token");

    assert_eq!(outcome.user_email, "d@x.com");
    assert_eq!(outcome.linked, Some(IntegrationKind::Gmail));
    assert_eq!(
        *linker.links.lock(),
        vec![(
            IntegrationKind::Gmail,
            "d@x.com".to_string(),
            Phase::Authenticated
        )]
    );
    assert_eq!(
        fixture.store.get().unwrap(),
        Some(CredentialRecord::new(
            BearerToken::new(token),
            Some("d@x.com".to_string())
        ))
    );
    assert_eq!(fixture.navigator.current(), Some(Route::Dashboard));
}

#[tokio::test]
async fn test_bad_redirect_never_links() {
    let fixture = TestFixture::new(IdentityEvent::SignedOut);
    let manager = fixture.start();
    let handle = manager.handle();
    handle.wait_until_settled().await.unwrap();

    let linker = RecordingLinker {
        session: handle.clone(),
        links: Mutex::new(Vec::new()),
    };
    let result = complete_redirect(
        &handle,
        "http://localhost:3000/login?token=BADTOKEN&integration=calendar",
        &linker,
    )
    .await;

    assert!(matches!(result, Err(AuthError::MalformedRedirectToken(_))));
    assert!(linker.links.lock().is_empty());
    assert_eq!(handle.phase(), Phase::Unauthenticated);
}

#[tokio::test]
async fn test_redirect_does_not_link_after_session_ends() {
    let fixture = TestFixture::new(IdentityEvent::SignedOut);
    let manager = fixture.start();
    let handle = manager.handle();
    handle.wait_until_settled().await.unwrap();

    let linker = RecordingLinker {
        session: handle.clone(),
        links: Mutex::new(Vec::new()),
    };
    let url = format!(
        "http://localhost:3000/login?token={}&integration=gmail",
        redirect_token("d@x.com")
    );

    // Poll the redirect once so its login is queued, then log out behind it.
    let redirect = complete_redirect(&handle, &url, &linker);
    tokio::pin!(redirect);
    tokio::select! {
        biased;
        _ = &mut redirect => panic!("redirect finished before its login was processed"),
        _ = std::future::ready(()) => {}
    }
    handle.logout().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(2), redirect)
        .await
        .expect("redirect should not hang once the session has ended");
    assert!(matches!(result, Err(AuthError::Unauthorized(_))));
    assert!(linker.links.lock().is_empty());
    assert_eq!(handle.phase(), Phase::Unauthenticated);
}

#[tokio::test]
async fn test_redirect_without_token_does_nothing() {
    let fixture = TestFixture::new(IdentityEvent::SignedOut);
    let manager = fixture.start();
    let handle = manager.handle();

    let linker = RecordingLinker {
        session: handle.clone(),
        links: Mutex::new(Vec::new()),
    };
    let outcome = complete_redirect(&handle, "http://localhost:3000/login", &linker)
        .await
        .unwrap();

    assert_eq!(outcome, None);
    assert!(linker.links.lock().is_empty());
}

// =============================================================================
// Invalidation
// =============================================================================

#[tokio::test]
async fn test_concurrent_unauthorized_invalidates_once() {
    let fixture = TestFixture::new(IdentityEvent::SignedOut)
        .with_store(stored_record("T1", "a@x.com"));
    let mut events = fixture.session_events().await;
    let manager = fixture.start();
    let handle = manager.handle();
    settle(&handle).await;

    let token = BearerToken::new("T1");
    let (first, second) = tokio::join!(handle.invalidate(&token), handle.invalidate(&token));
    let acted = [first.unwrap(), second.unwrap()];

    assert_eq!(acted.iter().filter(|a| **a).count(), 1);
    let session = handle.current();
    assert_eq!(session.phase, Phase::Unauthenticated);
    assert_eq!(
        session.last_error.as_deref(),
        Some("Your session has expired. Please sign in again.")
    );
    assert!(fixture.store.load().unwrap().is_empty());
    assert_eq!(fixture.navigator.count(&Route::SignIn), 1);

    let provider = fixture.provider.clone();
    eventually(|| provider.sign_out_calls.load(Ordering::SeqCst) == 1).await;

    settle(&handle).await;
    let logouts: Vec<Event> = events
        .drain()
        .into_iter()
        .filter(|e| e.event_type == "logout")
        .collect();
    assert_eq!(logouts.len(), 1);
    assert_eq!(logouts[0].payload["reason"], "unauthorized");
}

#[tokio::test]
async fn test_unauthorized_for_replaced_token_is_ignored() {
    let fixture = TestFixture::new(IdentityEvent::SignedOut)
        .with_store(stored_record("T1", "a@x.com"));
    let manager = fixture.start();
    let handle = manager.handle();

    handle
        .login(BearerToken::new("T2"), "a@x.com")
        .await
        .unwrap();
    let acted = handle.invalidate(&BearerToken::new("T1")).await.unwrap();

    assert!(!acted);
    assert_eq!(handle.phase(), Phase::Authenticated);
    assert_eq!(fixture.store.bearer_token(), Some(BearerToken::new("T2")));
}

// =============================================================================
// Route guard
// =============================================================================

#[tokio::test]
async fn test_route_guard_follows_phase() {
    let (exchange, gate) = ScriptedExchange::gated();
    let fixture = TestFixture::new(signed_in("u1", "a@x.com")).with_exchange(exchange);
    let manager = fixture.start();
    let handle = manager.handle();
    let mut guard = handle.route_guard();

    let exchange = fixture.exchange.clone();
    eventually(|| exchange.calls().len() == 1).await;
    assert_eq!(handle.phase(), Phase::Initializing);
    assert_eq!(guard.decide(&Route::Dashboard), GuardDecision::Loading);
    assert_eq!(
        guard.decide(&Route::SignIn),
        GuardDecision::Render(Route::SignIn)
    );

    gate.add_permits(1);
    assert_eq!(
        guard.next_decision(&Route::Dashboard).await,
        Some(GuardDecision::Render(Route::Dashboard))
    );

    handle
        .invalidate(&BearerToken::new("T-id-u1"))
        .await
        .unwrap();
    assert_eq!(
        guard.next_decision(&Route::Dashboard).await,
        Some(GuardDecision::Redirect(Route::SignIn))
    );
}

// =============================================================================
// Provider sign-in surface
// =============================================================================

#[tokio::test]
async fn test_provider_sign_in_failure_is_recorded() {
    let fixture = TestFixture::new(IdentityEvent::SignedOut);
    *fixture.provider.sign_in_error.lock() =
        Some(AuthError::ProviderSignInFailed("popup closed by user".to_string()));
    let mut events = fixture.session_events().await;
    let manager = fixture.start();
    let handle = manager.handle();
    handle.wait_until_settled().await.unwrap();

    let result = handle.sign_in_with_provider(IdentityProvider::Google).await;
    assert!(matches!(result, Err(AuthError::ProviderSignInFailed(_))));
    settle(&handle).await;

    let session = handle.current();
    assert_eq!(session.phase, Phase::Unauthenticated);
    assert!(session
        .last_error
        .as_deref()
        .unwrap_or_default()
        .contains("popup closed"));

    let failures: Vec<Event> = events
        .drain()
        .into_iter()
        .filter(|e| e.event_type == "sign_in.failed")
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].payload["method"], "google");
}

#[tokio::test]
async fn test_sign_in_failure_keeps_bearer_session() {
    let fixture = TestFixture::new(IdentityEvent::SignedOut)
        .with_store(stored_record("T1", "a@x.com"));
    *fixture.provider.sign_in_error.lock() =
        Some(AuthError::ExchangeUnreachable("provider offline".to_string()));
    let manager = fixture.start();
    let handle = manager.handle();

    let result = handle.sign_in_with_password("a@x.com", "hunter2").await;
    assert!(matches!(result, Err(AuthError::ProviderSignInFailed(_))));
    settle(&handle).await;

    assert_eq!(handle.phase(), Phase::Authenticated);
    assert!(fixture.store.get().unwrap().is_some());
}

#[tokio::test]
async fn test_password_sign_up_converges_through_exchange() {
    let fixture = TestFixture::new(IdentityEvent::SignedOut);
    let manager = fixture.start();
    let handle = manager.handle();
    handle.wait_until_settled().await.unwrap();

    let assertion = handle
        .sign_up_with_password("new@x.com", "correct horse")
        .await
        .unwrap();
    assert_eq!(assertion.email, "new@x.com");

    let session = handle.wait_for_phase(Phase::Authenticated).await.unwrap();
    assert_eq!(session.user_email.as_deref(), Some("new@x.com"));
    assert_eq!(fixture.exchange.calls(), vec!["id-new-user".to_string()]);
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn test_shutdown_detaches_and_closes_handles() {
    let fixture = TestFixture::new(IdentityEvent::SignedOut);
    let manager = fixture.start();
    let handle = manager.handle();
    handle.wait_until_settled().await.unwrap();
    let mut guard = handle.route_guard();
    assert!(fixture.provider.is_attached());

    manager.shutdown().await;

    assert!(!fixture.provider.is_attached());
    assert_eq!(
        handle.login(BearerToken::new("T1"), "a@x.com").await,
        Err(AuthError::SessionClosed)
    );
    assert_eq!(guard.next_decision(&Route::Dashboard).await, None);
}

#[tokio::test]
async fn test_sign_in_failure_after_shutdown_keeps_provider_error() {
    let fixture = TestFixture::new(IdentityEvent::SignedOut);
    *fixture.provider.sign_in_error.lock() =
        Some(AuthError::ProviderSignInFailed("popup closed by user".to_string()));
    let manager = fixture.start();
    let handle = manager.handle();
    handle.wait_until_settled().await.unwrap();

    manager.shutdown().await;

    let result = handle.sign_in_with_provider(IdentityProvider::GitHub).await;
    match result {
        Err(AuthError::ProviderSignInFailed(reason)) => {
            assert_eq!(reason, "popup closed by user")
        }
        Err(other) => panic!("expected ProviderSignInFailed, got {}", other),
        Ok(_) => panic!("sign-in should fail"),
    }
}
