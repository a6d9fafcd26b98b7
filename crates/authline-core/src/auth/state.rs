use crate::models::UserProfile;

/// Authentication state of the session manager
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AuthState {
    #[default]
    Initializing,
    Unauthenticated,
    AutoLoggingIn,
    LoggingIn,
    Authenticated,
    Error,
}

impl AuthState {
    /// An authentication attempt is outstanding
    pub fn is_busy(&self) -> bool {
        matches!(self, AuthState::LoggingIn | AuthState::AutoLoggingIn)
    }
}

impl std::fmt::Display for AuthState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthState::Initializing => write!(f, "Initializing"),
            AuthState::Unauthenticated => write!(f, "Unauthenticated"),
            AuthState::AutoLoggingIn => write!(f, "AutoLoggingIn"),
            AuthState::LoggingIn => write!(f, "LoggingIn"),
            AuthState::Authenticated => write!(f, "Authenticated"),
            AuthState::Error => write!(f, "Error"),
        }
    }
}

/// Notifications raised by the session manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    StateChanged(AuthState),
    /// Current profile, `None` once the session is cleared
    UserChanged(Option<UserProfile>),
    LoginSucceeded,
    LoginFailed(String),
    LoggedOut,
    /// A scheduled refresh failed and the session was terminated
    SessionExpired,
    /// New access token, `None` when it was cleared
    BearerTokenChanged(Option<String>),
}
