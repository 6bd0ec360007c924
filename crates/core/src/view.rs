// Panel view types
//
// Everything the presentation layer reads: the session state tag, the key
// collection, the transient message and which signed-out form to show.

use serde::Serialize;

use crate::api_key::ApiKey;

/// Where the controller believes the session stands.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Before the first check.
    #[default]
    Unknown,
    /// No token, or the token was rejected.
    LoggedOut,
    /// Valid session with zero keys.
    LoggedInEmpty,
    /// Valid session with at least one key.
    LoggedInWithKeys,
}

impl SessionState {
    pub fn is_logged_in(&self) -> bool {
        matches!(
            self,
            SessionState::LoggedInEmpty | SessionState::LoggedInWithKeys
        )
    }

    /// Logged-in state matching the size of a key collection.
    pub fn for_keys(keys: &[ApiKey]) -> Self {
        if keys.is_empty() {
            SessionState::LoggedInEmpty
        } else {
            SessionState::LoggedInWithKeys
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Unknown => write!(f, "unknown"),
            SessionState::LoggedOut => write!(f, "logged out"),
            SessionState::LoggedInEmpty => write!(f, "logged in (no keys)"),
            SessionState::LoggedInWithKeys => write!(f, "logged in"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Success,
    Error,
    #[default]
    None,
}

/// Outcome text of the most recent action. Overwritten, never accumulated.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct UiMessage {
    pub kind: MessageKind,
    pub content: String,
}

impl UiMessage {
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Success,
            content: content.into(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self {
            kind: MessageKind::Error,
            content: content.into(),
        }
    }

    pub fn none() -> Self {
        Self::default()
    }

    pub fn is_error(&self) -> bool {
        self.kind == MessageKind::Error
    }
}

/// Signed-out form the panel presents.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthForm {
    #[default]
    Login,
    Register,
    ResetPassword,
}

/// Immutable snapshot handed to the presentation layer.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, Default)]
pub struct PanelView {
    pub state: SessionState,
    pub keys: Vec<ApiKey>,
    pub message: UiMessage,
    pub form: AuthForm,
}
