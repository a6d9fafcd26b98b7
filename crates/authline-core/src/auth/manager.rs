//! Session state machine.
//!
//! `SessionManager` owns the authentication state, the credential and the
//! user profile. Operations validate the current state, dispatch their
//! network call and return immediately. Results, together with refresh
//! deadlines, arrive on an internal completion channel that the owner drains
//! with [`SessionManager::next_completion`] or
//! [`SessionManager::poll_completions`], so every state change happens on the
//! owner's task, one at a time.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::permissions::PermissionSink;
use super::scheduler::{RefreshDue, RefreshScheduler};
use super::state::{AuthState, SessionEvent};
use super::storage::TokenStorage;
use crate::api::{ApiError, AuthApi, HttpClient, LoginResult};
use crate::models::{Credential, UserProfile};

/// Capacity of the session event channel.
/// Observers that fall further behind than this skip ahead (see `broadcast`).
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Result of background work, delivered back to the owner
#[derive(Debug)]
enum Completion {
    Login { epoch: u64, result: Result<LoginResult, ApiError> },
    AutoLogin { epoch: u64, result: Result<LoginResult, ApiError> },
    Refresh { epoch: u64, result: Result<LoginResult, ApiError> },
    Logout(Result<(), ApiError>),
    RefreshDue(RefreshDue),
}

impl From<RefreshDue> for Completion {
    fn from(due: RefreshDue) -> Self {
        Completion::RefreshDue(due)
    }
}

/// Credential and profile of an authenticated session, always valid together
#[derive(Debug, Clone)]
struct ActiveSession {
    credential: Credential,
    user: UserProfile,
}

/// Builder wiring the collaborators of a [`SessionManager`]
#[derive(Default)]
pub struct SessionManagerBuilder {
    api: Option<AuthApi>,
    storage: Option<Arc<dyn TokenStorage>>,
    permissions: Option<Arc<dyn PermissionSink>>,
}

impl SessionManagerBuilder {
    pub fn auth_api(mut self, api: AuthApi) -> Self {
        self.api = Some(api);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn TokenStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn permissions(mut self, permissions: Arc<dyn PermissionSink>) -> Self {
        self.permissions = Some(permissions);
        self
    }

    /// Build the manager. Must be called inside a tokio runtime.
    pub fn build(self) -> SessionManager {
        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        SessionManager {
            api: self.api,
            storage: self.storage,
            permissions: self.permissions,
            state: AuthState::Initializing,
            error_message: None,
            session: None,
            epoch: 0,
            scheduler: RefreshScheduler::new(completion_tx.clone()),
            completion_tx,
            completion_rx,
            events,
        }
    }
}

pub struct SessionManager {
    api: Option<AuthApi>,
    storage: Option<Arc<dyn TokenStorage>>,
    permissions: Option<Arc<dyn PermissionSink>>,

    state: AuthState,
    error_message: Option<String>,
    session: Option<ActiveSession>,
    /// Bumped whenever the session is cleared; completions from an older epoch are dropped
    epoch: u64,
    scheduler: RefreshScheduler<Completion>,

    completion_tx: mpsc::UnboundedSender<Completion>,
    completion_rx: mpsc::UnboundedReceiver<Completion>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionManager {
    pub fn builder() -> SessionManagerBuilder {
        SessionManagerBuilder::default()
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn state(&self) -> AuthState {
        self.state
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.state == AuthState::Authenticated
    }

    pub fn user(&self) -> Option<&UserProfile> {
        self.session.as_ref().map(|s| &s.user)
    }

    pub fn username(&self) -> Option<&str> {
        self.user().map(|u| u.username.as_str())
    }

    pub fn display_name(&self) -> Option<&str> {
        self.user().map(|u| u.display_name.as_str())
    }

    pub fn email(&self) -> Option<&str> {
        self.user().map(|u| u.email.as_str())
    }

    pub fn roles(&self) -> &[String] {
        self.user().map(|u| u.roles.as_slice()).unwrap_or(&[])
    }

    pub fn access_token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.credential.access_token.as_str())
    }

    /// Register an observer for session events raised from now on
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Log in with a username and password.
    /// Ignored unless the manager is `Unauthenticated` or `Error`.
    pub fn login(&mut self, username: &str, password: &str) {
        if !matches!(self.state, AuthState::Unauthenticated | AuthState::Error) {
            warn!(state = %self.state, "login() called in invalid state");
            return;
        }

        let Some(api) = self.api.as_ref() else {
            self.fail_login("Session manager not initialized".to_string());
            return;
        };

        self.error_message = None;
        let request = api.login(username, password);
        self.set_state(AuthState::LoggingIn);

        let epoch = self.epoch;
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = request.await;
            let _ = tx.send(Completion::Login { epoch, result });
        });
    }

    /// Log out locally, telling the auth service on a best-effort basis.
    /// Ignored unless the manager is `Authenticated`.
    pub fn logout(&mut self) {
        if self.state != AuthState::Authenticated {
            warn!(state = %self.state, "logout() called in invalid state");
            return;
        }

        info!(username = self.username().unwrap_or_default(), "Logging out");

        if let Some(api) = self.api.as_ref() {
            let request = api.logout();
            let tx = self.completion_tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(Completion::Logout(request.await));
            });
        }

        self.clear_session();
        self.set_state(AuthState::Unauthenticated);
        self.emit(SessionEvent::LoggedOut);
    }

    /// Resume a persisted session using the stored refresh token
    pub fn try_auto_login(&mut self) {
        if !matches!(self.state, AuthState::Initializing | AuthState::Unauthenticated) {
            warn!(state = %self.state, "try_auto_login() called in invalid state");
            return;
        }

        let (Some(storage), Some(api)) = (self.storage.as_ref(), self.api.as_ref()) else {
            self.set_state(AuthState::Unauthenticated);
            return;
        };

        if !storage.has_stored_tokens() {
            debug!("No stored session");
            self.set_state(AuthState::Unauthenticated);
            return;
        }

        let stored = storage.load_tokens();
        if stored.refresh_token.is_empty() {
            self.set_state(AuthState::Unauthenticated);
            return;
        }

        info!("Attempting auto-login with stored token");
        let request = api.refresh(&stored.refresh_token);
        self.set_state(AuthState::AutoLoggingIn);

        let epoch = self.epoch;
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = request.await;
            let _ = tx.send(Completion::AutoLogin { epoch, result });
        });
    }

    // =========================================================================
    // Completion processing
    // =========================================================================

    /// Wait for the next completion and apply it
    pub async fn next_completion(&mut self) {
        // The manager holds a sender, so the channel never closes
        if let Some(completion) = self.completion_rx.recv().await {
            self.handle_completion(completion);
        }
    }

    /// Apply every completion that is already available. Returns how many ran.
    pub fn poll_completions(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.handle_completion(completion);
            processed += 1;
        }
        processed
    }

    fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Login { epoch, result } if epoch == self.epoch => match result {
                Ok(result) => {
                    self.apply_login_result(result);
                    self.emit(SessionEvent::LoginSucceeded);
                    info!(username = self.username().unwrap_or_default(), "Login succeeded");
                }
                Err(e) => {
                    warn!(error = %e, status = e.http_status(), "Login failed");
                    self.fail_login(e.to_string());
                }
            },
            Completion::AutoLogin { epoch, result } if epoch == self.epoch => match result {
                Ok(result) => {
                    self.apply_login_result(result);
                    info!(username = self.username().unwrap_or_default(), "Auto-login succeeded");
                }
                Err(e) => {
                    warn!(error = %e, "Auto-login failed");
                    if let Some(storage) = self.storage.as_ref() {
                        storage.clear_all();
                    }
                    self.set_state(AuthState::Unauthenticated);
                }
            },
            Completion::Refresh { epoch, result } if epoch == self.epoch => match result {
                Ok(result) => {
                    self.apply_login_result(result);
                    info!("Token refreshed successfully");
                }
                Err(e) => {
                    error!(error = %e, "Token refresh failed, session expired");
                    self.clear_session();
                    self.set_state(AuthState::Unauthenticated);
                    self.emit(SessionEvent::SessionExpired);
                }
            },
            Completion::Login { .. } | Completion::AutoLogin { .. } | Completion::Refresh { .. } => {
                debug!("Discarding result from a cleared session");
            }
            Completion::Logout(result) => {
                if let Err(e) = result {
                    debug!(error = %e, "Remote logout failed, ignored");
                }
            }
            Completion::RefreshDue(due) => self.on_refresh_due(due),
        }
    }

    fn on_refresh_due(&mut self, due: RefreshDue) {
        if !self.scheduler.accept(due) {
            return;
        }
        if self.state != AuthState::Authenticated {
            return;
        }
        let (Some(api), Some(session)) = (self.api.as_ref(), self.session.as_ref()) else {
            return;
        };

        debug!("Token refresh deadline reached");
        let request = api.refresh(&session.credential.refresh_token);
        let epoch = self.epoch;
        let tx = self.completion_tx.clone();
        tokio::spawn(async move {
            let result = request.await;
            let _ = tx.send(Completion::Refresh { epoch, result });
        });
    }

    // =========================================================================
    // State helpers
    // =========================================================================

    fn emit(&self, event: SessionEvent) {
        // No receivers is fine: nobody is observing yet
        let _ = self.events.send(event);
    }

    fn set_state(&mut self, state: AuthState) {
        if self.state == state {
            return;
        }
        debug!(from = %self.state, to = %state, "Auth state changed");
        self.state = state;
        self.emit(SessionEvent::StateChanged(state));
    }

    /// Install a freshly acquired credential and profile
    fn apply_login_result(&mut self, result: LoginResult) {
        let LoginResult { credential, user } = result;

        if let Some(storage) = self.storage.as_ref() {
            storage.save_tokens(&credential);
            storage.save_user_session(&user);
        }
        if let Some(permissions) = self.permissions.as_ref() {
            permissions.load_from_session(&user.roles, &user.permissions);
        }

        self.emit(SessionEvent::BearerTokenChanged(Some(credential.access_token.clone())));
        self.scheduler.arm(credential.expires_in_seconds);

        self.session = Some(ActiveSession {
            credential,
            user: user.clone(),
        });
        self.emit(SessionEvent::UserChanged(Some(user)));
        self.set_state(AuthState::Authenticated);
    }

    fn fail_login(&mut self, message: String) {
        self.error_message = Some(message.clone());
        self.set_state(AuthState::Error);
        self.emit(SessionEvent::LoginFailed(message));
    }

    fn clear_session(&mut self) {
        self.scheduler.disarm();
        self.session = None;
        self.error_message = None;
        self.epoch = self.epoch.wrapping_add(1);

        if let Some(storage) = self.storage.as_ref() {
            storage.clear_all();
        }
        if let Some(permissions) = self.permissions.as_ref() {
            permissions.clear();
        }

        self.emit(SessionEvent::BearerTokenChanged(None));
        self.emit(SessionEvent::UserChanged(None));
    }
}

/// Keep `client`'s bearer token in step with a session's token changes.
///
/// This is the one-way link from the session layer to a request engine; the
/// engine never refers back to the session. The task ends when the session
/// manager is dropped.
pub fn bind_bearer_token(client: HttpClient, mut events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::BearerTokenChanged(Some(token))) => client.set_bearer_token(&token),
                Ok(SessionEvent::BearerTokenChanged(None)) => client.clear_bearer_token(),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Bearer token binding lagged behind session events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}
