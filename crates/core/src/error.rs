// Error types for gateway calls and token persistence

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Message shown when the gateway gives no usable detail
pub const GENERIC_ERROR: &str = "An error occurred";

/// Errors surfaced by a [`Gateway`](crate::traits::Gateway) implementation
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    /// The gateway rejected the bearer credential (401/403)
    #[error("Unauthorized ({status}): {}", .detail.as_deref().unwrap_or("session invalid"))]
    Unauthorized { status: u16, detail: Option<String> },

    /// Any other non-success response
    #[error("API error ({status}): {}", .detail.as_deref().unwrap_or(GENERIC_ERROR))]
    Api { status: u16, detail: Option<String> },

    /// Connection, TLS or IO failure before a response arrived
    #[error("Transport error: {0}")]
    Transport(String),

    /// A success response whose body could not be decoded
    #[error("Invalid response body: {0}")]
    Decode(String),

    /// An authenticated call was attempted without a stored token
    #[error("Not signed in")]
    MissingToken,

    /// The gateway accepted the call but the token could not be persisted
    #[error("Token storage error: {0}")]
    Storage(String),
}

impl GatewayError {
    /// Create an API error from a status and optional server detail
    pub fn api(status: u16, detail: Option<String>) -> Self {
        GatewayError::Api { status, detail }
    }

    /// Create a transport error
    pub fn transport(msg: impl Into<String>) -> Self {
        GatewayError::Transport(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        GatewayError::Decode(msg.into())
    }

    /// Create a token storage error
    pub fn storage(err: &SessionError) -> Self {
        GatewayError::Storage(err.to_string())
    }

    /// True when the error means the session itself is no longer valid.
    ///
    /// A missing token counts: there is no session to keep.
    pub fn is_session_invalid(&self) -> bool {
        matches!(
            self,
            GatewayError::Unauthorized { .. } | GatewayError::MissingToken
        )
    }

    /// Server-provided detail, if the gateway sent one
    pub fn detail(&self) -> Option<&str> {
        match self {
            GatewayError::Unauthorized { detail, .. } | GatewayError::Api { detail, .. } => {
                detail.as_deref().filter(|d| !d.trim().is_empty())
            }
            _ => None,
        }
    }

    /// Text for the panel's error message: server detail, else a generic message
    pub fn user_message(&self) -> String {
        self.detail()
            .map(str::to_string)
            .unwrap_or_else(|| GENERIC_ERROR.to_string())
    }
}

/// Errors from loading or saving the persisted token
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Token storage IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Token storage is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}
