//! Session manager
//!
//! The single source of truth for the session phase. Provider identity
//! events, explicit login/logout and 401 invalidations all become commands
//! on one queue, processed strictly in arrival order by a background task.
//! The task is the only writer of the credential store.
//!
//! # Example
//!
//! ```rust,ignore
//! use mailgate_auth::{SessionManager, MemoryCredentialStore};
//! use std::sync::Arc;
//!
//! let manager = SessionManager::builder(
//!     Arc::new(MemoryCredentialStore::new()),
//!     provider,
//!     exchange,
//! )
//! .navigator(navigator)
//! .start();
//!
//! let session = manager.handle().wait_until_settled().await?;
//! ```

use crate::claims::decode_redirect_token;
use crate::config::SessionConfig;
use crate::error::{AuthError, AuthResult};
use crate::exchange::TokenExchangeClient;
use crate::guard::RouteGuard;
use crate::provider::{IdentityEvent, IdentityProvider, IdentityProviderAdapter};
use crate::routes::{Navigator, Route};
use crate::session::{
    BearerToken, CredentialRecord, FederatedIdentity, IdentityAssertion, Phase, Session,
};
use crate::store::CredentialStore;
use mailgate_events::{DetachHandle, EventBus, NavigationEvent, SessionEvent, SignOutReason};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Work items for the reconciliation task.
enum Command {
    Identity(IdentityEvent),
    Login {
        token: BearerToken,
        email: String,
        reply: oneshot::Sender<AuthResult<()>>,
    },
    Logout {
        reply: oneshot::Sender<()>,
    },
    Unauthorized {
        token: BearerToken,
        reply: oneshot::Sender<bool>,
    },
    RecordFailure {
        error: AuthError,
        event: SessionEvent,
    },
    Shutdown,
}

/// Builder for [`SessionManager`].
pub struct SessionManagerBuilder {
    store: Arc<dyn CredentialStore>,
    provider: Arc<dyn IdentityProviderAdapter>,
    exchange: Arc<dyn TokenExchangeClient>,
    navigator: Option<Arc<dyn Navigator>>,
    events: Option<Arc<dyn EventBus>>,
    config: SessionConfig,
}

impl SessionManagerBuilder {
    /// Route navigation side effects to `navigator`.
    pub fn navigator(mut self, navigator: Arc<dyn Navigator>) -> Self {
        self.navigator = Some(navigator);
        self
    }

    /// Publish session events on `events`.
    pub fn events(mut self, events: Arc<dyn EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Use `config` instead of the defaults.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Rehydrate from the store, attach to the provider and spawn the
    /// reconciliation task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(self) -> SessionManager {
        let record = match self.store.get() {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "Failed to read stored credentials; starting signed out");
                None
            }
        };
        let session = Session::rehydrate(record);
        debug!(phase = %session.phase, "Session rehydrated");

        let (commands, receiver) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(session.clone());

        let listener_tx = commands.clone();
        let detach = self.provider.on_identity_changed(Box::new(move |event: IdentityEvent| {
            if listener_tx.send(Command::Identity(event)).is_err() {
                debug!("Identity event dropped; session manager stopped");
            }
        }));

        let reconciler = Reconciler {
            session,
            state: state_tx,
            store: self.store,
            provider: self.provider.clone(),
            exchange: self.exchange,
            navigator: self.navigator,
            events: self.events,
            config: self.config.clone(),
            commands: receiver,
            backlog: VecDeque::new(),
        };
        let task = tokio::spawn(reconciler.run());

        SessionManager {
            handle: SessionHandle {
                commands,
                state: state_rx,
                provider: self.provider,
                config: self.config,
            },
            detach: Some(detach),
            task: Some(task),
        }
    }
}

/// Owner of the reconciliation task.
///
/// Dropping the manager detaches it from the provider and stops the task
/// once queued commands are processed.
pub struct SessionManager {
    handle: SessionHandle,
    detach: Option<DetachHandle>,
    task: Option<JoinHandle<()>>,
}

impl SessionManager {
    /// Start building a manager over its three collaborators.
    pub fn builder(
        store: Arc<dyn CredentialStore>,
        provider: Arc<dyn IdentityProviderAdapter>,
        exchange: Arc<dyn TokenExchangeClient>,
    ) -> SessionManagerBuilder {
        SessionManagerBuilder {
            store,
            provider,
            exchange,
            navigator: None,
            events: None,
            config: SessionConfig::default(),
        }
    }

    /// A cloneable handle for components.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Detach from the provider and stop the reconciliation task.
    ///
    /// Commands already queued are processed first. Later calls through any
    /// handle fail with [`AuthError::SessionClosed`].
    pub async fn shutdown(mut self) {
        if let Some(detach) = self.detach.take() {
            detach.detach();
        }
        let _ = self.handle.commands.send(Command::Shutdown);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "Session task ended abnormally");
            }
        }
        info!("Session manager stopped");
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach.detach();
        }
        if self.task.is_some() {
            let _ = self.handle.commands.send(Command::Shutdown);
        }
    }
}

/// Cloneable access to the session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<Session>,
    provider: Arc<dyn IdentityProviderAdapter>,
    config: SessionConfig,
}

impl SessionHandle {
    /// Snapshot of the current session.
    pub fn current(&self) -> Session {
        self.state.borrow().clone()
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.state.borrow().phase
    }

    /// Current bearer token, if any.
    pub fn bearer_token(&self) -> Option<BearerToken> {
        self.state.borrow().bearer_token.clone()
    }

    /// Subscribe to session changes.
    pub fn subscribe(&self) -> watch::Receiver<Session> {
        self.state.clone()
    }

    /// A route guard following this session.
    pub fn route_guard(&self) -> RouteGuard {
        RouteGuard::new(self.subscribe(), self.config.sign_in_route.clone())
    }

    /// Wait until the first reconciliation pass is over.
    pub async fn wait_until_settled(&self) -> AuthResult<Session> {
        self.wait_until(|s| s.phase.is_settled()).await
    }

    /// Wait until the session reaches `phase`.
    pub async fn wait_for_phase(&self, phase: Phase) -> AuthResult<Session> {
        self.wait_until(|s| s.phase == phase).await
    }

    async fn wait_until(&self, predicate: impl FnMut(&Session) -> bool) -> AuthResult<Session> {
        let mut state = self.subscribe();
        let session = state
            .wait_for(predicate)
            .await
            .map_err(|_| AuthError::SessionClosed)?;
        Ok(session.clone())
    }

    /// Accept a bearer token delivered out-of-band.
    ///
    /// Persists it, authenticates the session and navigates home.
    pub async fn login(&self, token: BearerToken, email: impl Into<String>) -> AuthResult<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Login {
            token,
            email: email.into(),
            reply,
        })?;
        response.await.map_err(|_| AuthError::SessionClosed)?
    }

    /// Log in with a token delivered by a backend redirect.
    ///
    /// The email comes from the token's subject claim; the signature is not
    /// checked. A token that cannot be decoded is reported and leaves the
    /// session untouched. Returns the email on success.
    pub async fn login_from_redirect(&self, token: &str) -> AuthResult<String> {
        let claims = match decode_redirect_token(token) {
            Ok(claims) => claims,
            Err(e) => {
                warn!(error = %e, "Rejected redirect token");
                self.send(Command::RecordFailure {
                    event: SessionEvent::RedirectRejected {
                        message: e.to_string(),
                    },
                    error: e.clone(),
                })?;
                return Err(e);
            }
        };

        let email = claims.email().to_string();
        self.login(BearerToken::new(token.trim()), email.clone()).await?;
        Ok(email)
    }

    /// End the session.
    ///
    /// Returns once credentials are cleared locally. The provider sign-out
    /// runs afterwards in the background and its failure is only logged.
    pub async fn logout(&self) -> AuthResult<()> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Logout { reply })?;
        response.await.map_err(|_| AuthError::SessionClosed)
    }

    /// Open a provider sign-in flow.
    ///
    /// On success the session converges through the provider's identity
    /// event; the assertion is returned for callers that want the email.
    pub async fn sign_in_with_provider(
        &self,
        provider: IdentityProvider,
    ) -> AuthResult<IdentityAssertion> {
        let result = self.provider.sign_in_with_provider(provider).await;
        self.settle_sign_in(provider.as_str(), result)
    }

    /// Sign in with email and password.
    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> AuthResult<IdentityAssertion> {
        let result = self.provider.sign_in_with_password(email, password).await;
        self.settle_sign_in("password", result)
    }

    /// Create an account with email and password.
    pub async fn sign_up_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> AuthResult<IdentityAssertion> {
        let result = self.provider.sign_up_with_password(email, password).await;
        self.settle_sign_in("sign_up", result)
    }

    /// Invalidate the session because the backend rejected `token`.
    ///
    /// Only acts while `token` is still the session's bearer token, so any
    /// number of concurrent 401s for it clear the session once. Returns
    /// whether this call performed the invalidation.
    pub async fn invalidate(&self, token: &BearerToken) -> AuthResult<bool> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Unauthorized {
            token: token.clone(),
            reply,
        })?;
        response.await.map_err(|_| AuthError::SessionClosed)
    }

    fn settle_sign_in(
        &self,
        method: &str,
        result: AuthResult<IdentityAssertion>,
    ) -> AuthResult<IdentityAssertion> {
        let error = match result {
            Ok(assertion) => {
                debug!(method, email = %assertion.email, "Provider sign-in succeeded");
                return Ok(assertion);
            }
            Err(AuthError::ProviderSignInFailed(reason)) => AuthError::ProviderSignInFailed(reason),
            Err(other) => AuthError::ProviderSignInFailed(other.to_string()),
        };

        warn!(method, error = %error, "Provider sign-in failed");
        let recorded = self.send(Command::RecordFailure {
            event: SessionEvent::SignInFailed {
                method: method.to_string(),
                message: error.to_string(),
            },
            error: error.clone(),
        });
        if recorded.is_err() {
            debug!(method, "Sign-in failure not recorded; session manager stopped");
        }
        Err(error)
    }

    fn send(&self, command: Command) -> AuthResult<()> {
        self.commands
            .send(command)
            .map_err(|_| AuthError::SessionClosed)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("phase", &self.phase())
            .field("config", &self.config)
            .finish()
    }
}

/// State owned by the reconciliation task.
struct Reconciler {
    session: Session,
    state: watch::Sender<Session>,
    store: Arc<dyn CredentialStore>,
    provider: Arc<dyn IdentityProviderAdapter>,
    exchange: Arc<dyn TokenExchangeClient>,
    navigator: Option<Arc<dyn Navigator>>,
    events: Option<Arc<dyn EventBus>>,
    config: SessionConfig,
    commands: mpsc::UnboundedReceiver<Command>,
    backlog: VecDeque<Command>,
}

impl Reconciler {
    async fn run(mut self) {
        debug!("Session task started");
        while let Some(command) = self.next_command().await {
            match command {
                Command::Identity(event) => self.on_identity(event).await,
                Command::Login {
                    token,
                    email,
                    reply,
                } => {
                    let result = self.on_login(token, email).await;
                    let _ = reply.send(result);
                }
                Command::Logout { reply } => {
                    self.on_logout().await;
                    let _ = reply.send(());
                }
                Command::Unauthorized { token, reply } => {
                    let invalidated = self.on_unauthorized(&token).await;
                    let _ = reply.send(invalidated);
                }
                Command::RecordFailure { error, event } => {
                    self.on_failure(&error, event).await;
                }
                Command::Shutdown => break,
            }
        }
        debug!("Session task finished");
    }

    async fn next_command(&mut self) -> Option<Command> {
        match self.backlog.pop_front() {
            Some(command) => Some(command),
            None => self.commands.recv().await,
        }
    }

    /// Move every command already sent into the backlog.
    fn fill_backlog(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.backlog.push_back(command);
        }
    }

    /// Whether the next queued command is another identity event.
    fn is_superseded(&mut self) -> bool {
        self.fill_backlog();
        matches!(self.backlog.front(), Some(Command::Identity(_)))
    }

    /// Whether a differing identity event has been queued since `event`.
    fn is_stale(&mut self, event: &IdentityEvent) -> bool {
        self.fill_backlog();
        self.backlog.iter().any(|command| match command {
            Command::Identity(newer) => !newer.same_identity(event),
            _ => false,
        })
    }

    async fn on_identity(&mut self, event: IdentityEvent) {
        if self.is_superseded() {
            debug!("Identity event superseded by a newer one");
            return;
        }

        let (identity, assertion) = match event {
            IdentityEvent::SignedOut => {
                self.session.federated_identity = None;
                let phase = self.session.derived_phase();
                self.transition(phase).await;
                return;
            }
            IdentityEvent::SignedIn {
                identity,
                assertion,
            } => (identity, assertion),
        };

        if self.session.bearer_token.is_some() {
            debug!(identity_id = %identity.id, "Bearer token present; skipping exchange");
            if self.session.user_email.is_none() {
                self.session.user_email = identity.email.clone();
            }
            self.session.federated_identity = Some(identity);
            self.transition(Phase::Authenticated).await;
            return;
        }

        self.exchange_identity(identity, assertion).await;
    }

    async fn exchange_identity(&mut self, identity: FederatedIdentity, assertion: IdentityAssertion) {
        debug!(identity_id = %identity.id, "Exchanging identity assertion");
        let result = self.exchange.exchange(&assertion).await;

        let event = IdentityEvent::SignedIn {
            identity: identity.clone(),
            assertion: assertion.clone(),
        };
        if self.is_stale(&event) {
            info!(identity_id = %identity.id, "Discarding stale exchange result");
            self.publish(SessionEvent::ExchangeDiscarded {
                identity_id: identity.id,
            })
            .await;
            return;
        }

        match result {
            Ok(token) => {
                let email = assertion.email;
                let record = CredentialRecord::new(token.clone(), Some(email.clone()));
                if let Err(e) = self.store.set(&record) {
                    error!(error = %e, "Failed to persist exchanged credentials");
                }

                info!(identity_id = %identity.id, email = %email, "Token exchange succeeded");
                let identity_id = identity.id.clone();
                self.session.bearer_token = Some(token);
                self.session.user_email = Some(email.clone());
                self.session.federated_identity = Some(identity);
                self.session.last_error = None;
                self.transition(Phase::Authenticated).await;
                self.publish(SessionEvent::TokenExchanged {
                    identity_id,
                    user_email: email,
                })
                .await;
            }
            Err(e) => {
                warn!(identity_id = %identity.id, error = %e, "Token exchange failed");
                if let Err(e) = self.store.clear() {
                    error!(error = %e, "Failed to clear stored credentials");
                }

                self.session.clear_credentials();
                self.session.last_error = Some(e.user_message());
                self.transition(Phase::Unauthenticated).await;
                self.publish(SessionEvent::ExchangeFailed {
                    identity_id: identity.id,
                    error_code: e.error_code().to_string(),
                    message: e.to_string(),
                })
                .await;
            }
        }
    }

    async fn on_login(&mut self, token: BearerToken, email: String) -> AuthResult<()> {
        let record = CredentialRecord::new(token.clone(), Some(email.clone()));
        if let Err(e) = self.store.set(&record) {
            error!(error = %e, "Failed to persist login credentials");
            return Err(e);
        }

        info!(email = %email, "Logged in with bearer token");
        self.session.bearer_token = Some(token);
        self.session.user_email = Some(email.clone());
        self.session.last_error = None;
        self.transition(Phase::Authenticated).await;
        self.publish(SessionEvent::LoggedIn { user_email: email }).await;

        let home = self.config.home_route.clone();
        self.navigate(&home).await;
        Ok(())
    }

    async fn on_logout(&mut self) {
        if let Err(e) = self.store.clear() {
            error!(error = %e, "Failed to clear stored credentials");
        }

        info!("Logged out");
        self.session.clear_credentials();
        self.session.last_error = None;
        self.transition(Phase::Unauthenticated).await;
        self.publish(SessionEvent::LoggedOut {
            reason: SignOutReason::UserRequested,
        })
        .await;

        let sign_in = self.config.sign_in_route.clone();
        self.navigate(&sign_in).await;
        self.sign_out_provider("logout");
    }

    async fn on_unauthorized(&mut self, token: &BearerToken) -> bool {
        if self.session.bearer_token.as_ref() != Some(token) {
            debug!("Ignoring 401 for a token that is no longer current");
            return false;
        }

        info!("Bearer token rejected by backend; signing out");
        if let Err(e) = self.store.clear() {
            error!(error = %e, "Failed to clear stored credentials");
        }

        self.session.clear_credentials();
        self.session.last_error =
            Some(AuthError::Unauthorized("bearer token rejected".to_string()).user_message());
        self.transition(Phase::Unauthenticated).await;
        self.publish(SessionEvent::LoggedOut {
            reason: SignOutReason::Unauthorized,
        })
        .await;

        let sign_in = self.config.sign_in_route.clone();
        self.navigate(&sign_in).await;
        self.sign_out_provider("unauthorized");
        true
    }

    /// Sign out of the provider without holding up the queue.
    fn sign_out_provider(&self, cause: &'static str) {
        let provider = self.provider.clone();
        tokio::spawn(async move {
            if let Err(e) = provider.sign_out().await {
                warn!(cause, error = %e, "Provider sign-out failed");
            }
        });
    }

    async fn on_failure(&mut self, error: &AuthError, event: SessionEvent) {
        self.session.last_error = Some(error.user_message());
        self.state.send_replace(self.session.clone());
        self.publish(event).await;
    }

    /// Set the phase and notify subscribers.
    async fn transition(&mut self, to: Phase) {
        let from = self.session.phase;
        self.session.phase = to;
        self.state.send_replace(self.session.clone());

        if from != to {
            debug!(%from, %to, "Session phase changed");
            self.publish(SessionEvent::PhaseChanged {
                from,
                to,
                user_email: self.session.user_email.clone(),
            })
            .await;
        }
    }

    async fn navigate(&self, route: &Route) {
        if let Some(navigator) = &self.navigator {
            navigator.navigate(route);
        }
        if let Some(events) = &self.events {
            let event = NavigationEvent::Redirected { to: route.path() }.to_event();
            if let Err(e) = events.publish(event).await {
                warn!(error = %e, "Failed to publish navigation event");
            }
        }
    }

    async fn publish(&self, event: SessionEvent) {
        if let Some(events) = &self.events {
            if let Err(e) = events.publish(event.to_event()).await {
                warn!(error = %e, event_type = event.event_type(), "Failed to publish session event");
            }
        }
    }
}
