// Core traits for pluggable backends
//
// These traits keep the controller independent of how the gateway is reached
// and where the token is persisted:
// - HTTP implementation for production (keypanel-gateway)
// - Scripted, in-memory implementations for tests
// - File-backed token persistence for the CLI

use async_trait::async_trait;

use crate::api_key::{ApiKey, KeyListing};
use crate::error::{Result, SessionError};

// ============================================================================
// Gateway - The remote auth/key service
// ============================================================================

/// One operation per remote capability of the auth gateway.
///
/// Implementations must:
/// - attach the Session Store's token as a bearer credential on the key
///   operations (list/generate/renew/revoke)
/// - store the token into the Session Store when `login` succeeds, and leave
///   it untouched when it fails; a token that was accepted but could not be
///   persisted is reported as [`GatewayError::Storage`](crate::error::GatewayError::Storage)
/// - report "no keys provisioned" as [`KeyListing::NoKeys`], never as an error
/// - never retry
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Create an account. Does not sign in.
    async fn register(&self, email: &str, password: &str) -> Result<()>;

    /// Exchange credentials for a bearer token and persist it.
    async fn login(&self, email: &str, password: &str) -> Result<String>;

    /// Ask the gateway to email a reset token.
    async fn request_password_reset(&self, email: &str) -> Result<()>;

    /// Set a new password using an emailed reset token.
    async fn confirm_password_reset(&self, token: &str, new_password: &str) -> Result<()>;

    /// Confirm an email address using an emailed verification token.
    async fn verify_email(&self, token: &str) -> Result<()>;

    /// Fetch the authoritative key collection.
    async fn list_api_keys(&self) -> Result<KeyListing>;

    /// Issue a new key.
    async fn generate_api_key(&self) -> Result<ApiKey>;

    /// Extend a key's expiry. The new expiry is only observable via a list.
    async fn renew_api_key(&self, id: i64) -> Result<()>;

    /// Delete a key.
    async fn revoke_api_key(&self, id: i64) -> Result<()>;
}

// ============================================================================
// TokenPersistence - Where the token survives restarts
// ============================================================================

/// Client-local persistent storage for the bearer token.
pub trait TokenPersistence: Send + Sync {
    /// Load the stored token, if any
    fn load(&self) -> std::result::Result<Option<String>, SessionError>;

    /// Replace the stored token
    fn save(&self, token: &str) -> std::result::Result<(), SessionError>;

    /// Remove the stored token. Clearing an absent token is not an error.
    fn clear(&self) -> std::result::Result<(), SessionError>;
}
