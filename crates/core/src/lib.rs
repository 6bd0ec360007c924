// Account panel core
//
// This crate holds the client-side session and API-key lifecycle logic of the
// account panel, independent of transport and persistence.
//
// Key design decisions:
// - The Session Store is the single owner of the bearer token and is shared
//   by handle (Arc) with the gateway and the controller
// - The gateway is a trait so the controller can run against HTTP or a
//   scripted double
// - "No keys provisioned" is a distinct success outcome from "session invalid"
// - generate/revoke update the collection locally; renew re-fetches it
// - Duplicate in-flight actions are refused and stale results are dropped

pub mod api_key;
pub mod controller;
pub mod error;
pub mod persistence;
pub mod session_store;
pub mod traits;
pub mod view;

// In-memory implementations for examples and testing
pub mod memory;

// Re-exports for convenience
pub use api_key::{ApiKey, KeyListing};
pub use controller::{Action, ActionOutcome, PanelController};
pub use error::{GatewayError, Result, SessionError, GENERIC_ERROR};
pub use persistence::{FileTokenStore, MemoryTokenStore};
pub use session_store::SessionStore;
pub use traits::{Gateway, TokenPersistence};
pub use view::{AuthForm, MessageKind, PanelView, SessionState, UiMessage};
