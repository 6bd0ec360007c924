// Session/Key Controller
//
// Owns the panel state machine: decides whether the stored token is still a
// valid session, holds the key collection and reconciles it with the gateway.
//
// Reconciliation rules:
// - startup without a token goes straight to LoggedOut, no network call
// - a list that comes back empty (200 with [] or 404) is a valid session with
//   zero keys and never clears the token
// - only a rejected credential (401/403) clears the token
// - generate appends and revoke filters locally; renew always re-fetches
//
// Actions take `&self` so several can be in flight at once on one task. The
// state lock is never held across an await. Identical actions already in
// flight are refused. Results that belong to an older session (epoch) are
// dropped, and so is a listing that was overtaken by a newer fetch or by a
// key mutation applied while it was in flight.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::api_key::ApiKey;
use crate::error::{GatewayError, SessionError};
use crate::session_store::SessionStore;
use crate::traits::Gateway;
use crate::view::{AuthForm, PanelView, SessionState, UiMessage};

pub const MSG_REGISTERED: &str = "Registration successful! Check your email to verify.";
pub const MSG_RESET_REQUESTED: &str = "Password reset instructions sent to your email";
pub const MSG_RESET_CONFIRMED: &str = "Password successfully reset";
pub const MSG_EMAIL_VERIFIED: &str = "Your email has been verified!";
pub const MSG_VERIFY_FAILED: &str = "Invalid or expired token.";
pub const MSG_KEY_GENERATED: &str = "API key generated";
pub const MSG_KEY_RENEWED: &str = "API key renewed";
pub const MSG_KEY_REVOKED: &str = "API key revoked";
pub const MSG_SESSION_EXPIRED: &str = "Your session has expired. Please sign in again.";
pub const MSG_SIGN_IN_REQUIRED: &str = "You must be signed in to manage API keys";
pub const MSG_TOKEN_NOT_SAVED: &str = "Signed in, but the session could not be saved";
pub const MSG_TOKEN_NOT_CLEARED: &str = "Signed out, but the stored session could not be removed";

/// An action, as far as in-flight deduplication is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Reconcile,
    Login,
    Register,
    RequestPasswordReset,
    ConfirmPasswordReset,
    VerifyEmail,
    Generate,
    Renew(i64),
    Revoke(i64),
}

/// What happened to an action's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The result was applied to the panel state.
    Applied,
    /// The gateway reported an error; it is in the panel message.
    Failed,
    /// The same action was already in flight; nothing was sent.
    Duplicate,
    /// The result arrived after a newer session or fetch and was dropped.
    Stale,
    /// Refused locally (e.g. not signed in); nothing was sent.
    Rejected,
}

/// How a key fetch should treat its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SyncMode {
    /// Startup or explicit refresh: a rejected token logs out quietly and the
    /// current message is left alone.
    Quiet,
    /// Right after login: clear the message, announce an immediate rejection.
    AfterLogin,
    /// Right after a renew: report success on the fresh collection.
    AfterRenew,
}

struct Inner {
    view: PanelView,
    /// Bumped on every token set/clear transition.
    epoch: u64,
    /// Bumped on every list fetch issued.
    fetch_seq: u64,
    /// Bumped whenever generate, renew or revoke is applied.
    mutation_seq: u64,
    in_flight: HashSet<Action>,
}

/// Client-side session and API-key lifecycle controller.
pub struct PanelController {
    gateway: Arc<dyn Gateway>,
    session: Arc<SessionStore>,
    inner: Mutex<Inner>,
    view_tx: watch::Sender<PanelView>,
}

/// Removes an action from the in-flight set when the action finishes.
struct InFlight<'a> {
    controller: &'a PanelController,
    action: Action,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.controller.inner.lock().in_flight.remove(&self.action);
    }
}

impl PanelController {
    pub fn new(gateway: Arc<dyn Gateway>, session: Arc<SessionStore>) -> Self {
        let view = PanelView::default();
        let (view_tx, _) = watch::channel(view.clone());
        Self {
            gateway,
            session,
            inner: Mutex::new(Inner {
                view,
                epoch: 0,
                fetch_seq: 0,
                mutation_seq: 0,
                in_flight: HashSet::new(),
            }),
            view_tx,
        }
    }

    /// Snapshot of the current panel state.
    pub fn view(&self) -> PanelView {
        self.inner.lock().view.clone()
    }

    pub fn state(&self) -> SessionState {
        self.inner.lock().view.state
    }

    pub fn keys(&self) -> Vec<ApiKey> {
        self.inner.lock().view.keys.clone()
    }

    pub fn message(&self) -> UiMessage {
        self.inner.lock().view.message.clone()
    }

    /// Receive a fresh view after every state change.
    pub fn subscribe(&self) -> watch::Receiver<PanelView> {
        self.view_tx.subscribe()
    }

    /// Whether `action` is currently in flight.
    pub fn is_in_flight(&self, action: Action) -> bool {
        self.inner.lock().in_flight.contains(&action)
    }

    // ------------------------------------------------------------------------
    // Session
    // ------------------------------------------------------------------------

    /// Decide the session state from the stored token.
    ///
    /// Without a token this resolves to LoggedOut without touching the network.
    pub async fn init(&self) -> ActionOutcome {
        let Some(_guard) = self.begin(Action::Reconcile) else {
            return ActionOutcome::Duplicate;
        };
        self.sync_keys(SyncMode::Quiet).await
    }

    /// Re-run the startup reconciliation on demand.
    pub async fn refresh(&self) -> ActionOutcome {
        self.init().await
    }

    pub async fn login(&self, email: &str, password: &str) -> ActionOutcome {
        let Some(_guard) = self.begin(Action::Login) else {
            return ActionOutcome::Duplicate;
        };

        let unsaved = match self.gateway.login(email, password).await {
            Ok(_) => None,
            // Signed in for this process only
            Err(GatewayError::Storage(reason)) if self.session.has_token() => Some(reason),
            Err(e) => {
                tracing::info!(error = %e, "login failed");
                self.update(|inner| inner.view.message = UiMessage::error(e.user_message()));
                return ActionOutcome::Failed;
            }
        };

        tracing::info!("login succeeded, reconciling keys");
        self.update(|inner| {
            inner.epoch += 1;
        });
        let outcome = self.sync_keys(SyncMode::AfterLogin).await;

        match unsaved {
            Some(reason) if outcome == ActionOutcome::Applied => {
                tracing::warn!(%reason, "session token was not persisted");
                self.update(|inner| {
                    inner.view.message =
                        UiMessage::error(format!("{}: {}", MSG_TOKEN_NOT_SAVED, reason))
                });
                ActionOutcome::Failed
            }
            _ => outcome,
        }
    }

    /// Forget the token and everything fetched with it.
    ///
    /// A token that could not be removed from persistence is reported as an
    /// error message, since the next process would pick it up again.
    pub fn logout(&self) -> ActionOutcome {
        let cleared = self.session.clear();
        self.update(|inner| {
            inner.epoch += 1;
            inner.view = PanelView {
                state: SessionState::LoggedOut,
                ..PanelView::default()
            };
            if let Err(e) = &cleared {
                inner.view.message = not_cleared(e);
            }
        });
        tracing::info!(clear_failed = cleared.is_err(), "logged out");
        match cleared {
            Ok(()) => ActionOutcome::Applied,
            Err(_) => ActionOutcome::Failed,
        }
    }

    /// Switch the signed-out form. Clears the message.
    pub fn show_form(&self, form: AuthForm) {
        self.update(|inner| {
            inner.view.form = form;
            inner.view.message = UiMessage::none();
        });
    }

    // ------------------------------------------------------------------------
    // Account
    // ------------------------------------------------------------------------

    /// Create an account. Success leads back to the login form, not signed in.
    pub async fn register(&self, email: &str, password: &str) -> ActionOutcome {
        let Some(_guard) = self.begin(Action::Register) else {
            return ActionOutcome::Duplicate;
        };

        let result = self.gateway.register(email, password).await;
        self.update(|inner| match result {
            Ok(()) => {
                inner.view.message = UiMessage::success(MSG_REGISTERED);
                inner.view.form = AuthForm::Login;
                ActionOutcome::Applied
            }
            Err(e) => {
                inner.view.message = UiMessage::error(e.user_message());
                ActionOutcome::Failed
            }
        })
    }

    pub async fn request_password_reset(&self, email: &str) -> ActionOutcome {
        let Some(_guard) = self.begin(Action::RequestPasswordReset) else {
            return ActionOutcome::Duplicate;
        };

        let result = self.gateway.request_password_reset(email).await;
        self.update(|inner| match result {
            Ok(()) => {
                inner.view.message = UiMessage::success(MSG_RESET_REQUESTED);
                ActionOutcome::Applied
            }
            Err(e) => {
                inner.view.message = UiMessage::error(e.user_message());
                ActionOutcome::Failed
            }
        })
    }

    pub async fn confirm_password_reset(&self, token: &str, new_password: &str) -> ActionOutcome {
        let Some(_guard) = self.begin(Action::ConfirmPasswordReset) else {
            return ActionOutcome::Duplicate;
        };

        let result = self
            .gateway
            .confirm_password_reset(token, new_password)
            .await;
        self.update(|inner| match result {
            Ok(()) => {
                inner.view.message = UiMessage::success(MSG_RESET_CONFIRMED);
                inner.view.form = AuthForm::Login;
                ActionOutcome::Applied
            }
            Err(e) => {
                inner.view.message = UiMessage::error(e.user_message());
                ActionOutcome::Failed
            }
        })
    }

    pub async fn verify_email(&self, token: &str) -> ActionOutcome {
        if token.trim().is_empty() {
            self.update(|inner| inner.view.message = UiMessage::error(MSG_VERIFY_FAILED));
            return ActionOutcome::Rejected;
        }
        let Some(_guard) = self.begin(Action::VerifyEmail) else {
            return ActionOutcome::Duplicate;
        };

        let result = self.gateway.verify_email(token).await;
        self.update(|inner| match result {
            Ok(()) => {
                inner.view.message = UiMessage::success(MSG_EMAIL_VERIFIED);
                ActionOutcome::Applied
            }
            Err(e) => {
                let text = e.detail().unwrap_or(MSG_VERIFY_FAILED).to_string();
                inner.view.message = UiMessage::error(text);
                ActionOutcome::Failed
            }
        })
    }

    // ------------------------------------------------------------------------
    // API keys
    // ------------------------------------------------------------------------

    /// Issue a new key and append it to the collection.
    pub async fn generate(&self) -> ActionOutcome {
        let Some(_guard) = self.begin(Action::Generate) else {
            return ActionOutcome::Duplicate;
        };
        let Some(epoch) = self.require_session() else {
            return ActionOutcome::Rejected;
        };

        let result = self.gateway.generate_api_key().await;
        self.update(|inner| {
            if inner.epoch != epoch {
                tracing::warn!("dropping generate result from an earlier session");
                return ActionOutcome::Stale;
            }
            match result {
                Ok(key) => {
                    tracing::info!(key_id = key.id, "api key generated");
                    upsert(&mut inner.view.keys, key);
                    inner.mutation_seq += 1;
                    inner.view.state = SessionState::LoggedInWithKeys;
                    inner.view.message = UiMessage::success(MSG_KEY_GENERATED);
                    ActionOutcome::Applied
                }
                Err(e) => self.fail_key_action(inner, e),
            }
        })
    }

    /// Extend a key's expiry, then replace the collection with a fresh list.
    pub async fn renew(&self, id: i64) -> ActionOutcome {
        let Some(_guard) = self.begin(Action::Renew(id)) else {
            return ActionOutcome::Duplicate;
        };
        let Some(epoch) = self.require_session() else {
            return ActionOutcome::Rejected;
        };

        let result = self.gateway.renew_api_key(id).await;
        let renewed = self.update(|inner| {
            if inner.epoch != epoch {
                tracing::warn!(key_id = id, "dropping renew result from an earlier session");
                return Err(ActionOutcome::Stale);
            }
            match result {
                Ok(()) => {
                    inner.mutation_seq += 1;
                    Ok(())
                }
                Err(e) => Err(self.fail_key_action(inner, e)),
            }
        });

        match renewed {
            Ok(()) => {
                tracing::info!(key_id = id, "api key renewed, re-fetching collection");
                self.sync_keys(SyncMode::AfterRenew).await
            }
            Err(outcome) => outcome,
        }
    }

    /// Delete a key and drop it from the collection.
    pub async fn revoke(&self, id: i64) -> ActionOutcome {
        let Some(_guard) = self.begin(Action::Revoke(id)) else {
            return ActionOutcome::Duplicate;
        };
        let Some(epoch) = self.require_session() else {
            return ActionOutcome::Rejected;
        };

        let result = self.gateway.revoke_api_key(id).await;
        self.update(|inner| {
            if inner.epoch != epoch {
                tracing::warn!(key_id = id, "dropping revoke result from an earlier session");
                return ActionOutcome::Stale;
            }
            match result {
                Ok(()) => {
                    tracing::info!(key_id = id, "api key revoked");
                    inner.view.keys.retain(|k| k.id != id);
                    inner.mutation_seq += 1;
                    inner.view.state = SessionState::for_keys(&inner.view.keys);
                    inner.view.message = UiMessage::success(MSG_KEY_REVOKED);
                    ActionOutcome::Applied
                }
                Err(e) => self.fail_key_action(inner, e),
            }
        })
    }

    // ------------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------------

    /// Replace the key collection with the gateway's, or resolve the session.
    async fn sync_keys(&self, mode: SyncMode) -> ActionOutcome {
        if !self.session.has_token() {
            tracing::debug!("no stored token, logged out without a network call");
            self.update(|inner| {
                inner.view.state = SessionState::LoggedOut;
                inner.view.keys.clear();
            });
            return ActionOutcome::Applied;
        }

        let (epoch, seq, mutations) = self.update(|inner| {
            inner.fetch_seq += 1;
            (inner.epoch, inner.fetch_seq, inner.mutation_seq)
        });

        let result = self.gateway.list_api_keys().await;

        self.update(|inner| {
            let overtaken = inner.fetch_seq != seq || inner.mutation_seq != mutations;
            if inner.epoch != epoch || overtaken {
                tracing::warn!(seq, latest = inner.fetch_seq, "dropping stale key listing");
                return ActionOutcome::Stale;
            }
            match result {
                Ok(listing) => {
                    let keys = listing.into_keys();
                    inner.view.state = SessionState::for_keys(&keys);
                    tracing::info!(count = keys.len(), state = %inner.view.state, "keys reconciled");
                    inner.view.keys = keys;
                    match mode {
                        SyncMode::Quiet => {}
                        SyncMode::AfterLogin => inner.view.message = UiMessage::none(),
                        SyncMode::AfterRenew => {
                            inner.view.message = UiMessage::success(MSG_KEY_RENEWED)
                        }
                    }
                    ActionOutcome::Applied
                }
                Err(e) if e.is_session_invalid() => match self.force_logout(inner, &e) {
                    Err(clear_err) => {
                        inner.view.message = not_cleared(&clear_err);
                        ActionOutcome::Failed
                    }
                    Ok(()) if mode == SyncMode::Quiet => ActionOutcome::Applied,
                    Ok(()) => {
                        inner.view.message = UiMessage::error(MSG_SESSION_EXPIRED);
                        ActionOutcome::Failed
                    }
                },
                Err(e) => {
                    tracing::warn!(error = %e, "key listing failed, keeping session");
                    inner.view.message = UiMessage::error(e.user_message());
                    ActionOutcome::Failed
                }
            }
        })
    }

    /// Key actions are only defined for a signed-in session. Returns the
    /// epoch the action belongs to.
    fn require_session(&self) -> Option<u64> {
        self.update(|inner| {
            if inner.view.state.is_logged_in() {
                return Some(inner.epoch);
            }
            // An unresolved session keeps the error that left it unresolved
            let keep = inner.view.state == SessionState::Unknown && inner.view.message.is_error();
            if !keep {
                inner.view.message = UiMessage::error(MSG_SIGN_IN_REQUIRED);
            }
            None
        })
    }

    fn fail_key_action(&self, inner: &mut Inner, err: GatewayError) -> ActionOutcome {
        if err.is_session_invalid() {
            inner.view.message = match self.force_logout(inner, &err) {
                Ok(()) => UiMessage::error(MSG_SESSION_EXPIRED),
                Err(clear_err) => not_cleared(&clear_err),
            };
        } else {
            inner.view.message = UiMessage::error(err.user_message());
        }
        ActionOutcome::Failed
    }

    /// Drop the rejected session. The view is logged out even when the
    /// persisted token could not be removed; that failure is returned.
    fn force_logout(&self, inner: &mut Inner, cause: &GatewayError) -> Result<(), SessionError> {
        tracing::warn!(error = %cause, "session rejected by gateway, clearing token");
        let cleared = self.session.clear();
        inner.epoch += 1;
        inner.view.state = SessionState::LoggedOut;
        inner.view.keys.clear();
        inner.view.form = AuthForm::Login;
        cleared
    }

    fn begin(&self, action: Action) -> Option<InFlight<'_>> {
        let mut inner = self.inner.lock();
        if !inner.in_flight.insert(action) {
            tracing::debug!(?action, "action already in flight, ignoring");
            return None;
        }
        Some(InFlight {
            controller: self,
            action,
        })
    }

    /// Mutate state under the lock and publish the resulting view.
    fn update<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.inner.lock();
        let out = f(&mut *inner);
        self.view_tx.send_if_modified(|view| {
            if *view == inner.view {
                false
            } else {
                *view = inner.view.clone();
                true
            }
        });
        out
    }
}

fn not_cleared(err: &SessionError) -> UiMessage {
    UiMessage::error(format!("{}: {}", MSG_TOKEN_NOT_CLEARED, err))
}

/// Append a key, replacing any entry with the same id.
fn upsert(keys: &mut Vec<ApiKey>, key: ApiKey) {
    match keys.iter_mut().find(|k| k.id == key.id) {
        Some(existing) => *existing = key,
        None => keys.push(key),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api_key::KeyListing;
    use crate::memory::{sample_key, GatewayCall, ScriptedGateway};
    use crate::view::MessageKind;

    fn unauthorized() -> GatewayError {
        GatewayError::Unauthorized {
            status: 401,
            detail: Some("Could not validate credentials".to_string()),
        }
    }

    /// Token persistence that loads a token but refuses to write.
    struct ReadOnlyTokenStore {
        token: Option<String>,
    }

    impl crate::traits::TokenPersistence for ReadOnlyTokenStore {
        fn load(&self) -> std::result::Result<Option<String>, SessionError> {
            Ok(self.token.clone())
        }

        fn save(&self, _token: &str) -> std::result::Result<(), SessionError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into())
        }

        fn clear(&self) -> std::result::Result<(), SessionError> {
            Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only").into())
        }
    }

    fn setup_read_only(
        token: Option<&str>,
    ) -> (Arc<SessionStore>, Arc<ScriptedGateway>, PanelController) {
        let store = ReadOnlyTokenStore {
            token: token.map(str::to_string),
        };
        let session = Arc::new(SessionStore::open(store).unwrap());
        let gateway = Arc::new(ScriptedGateway::new(session.clone()));
        let controller = PanelController::new(gateway.clone(), session.clone());
        (session, gateway, controller)
    }

    fn setup(token: Option<&str>) -> (Arc<SessionStore>, Arc<ScriptedGateway>, PanelController) {
        let session = Arc::new(match token {
            Some(t) => SessionStore::with_token(t),
            None => SessionStore::in_memory(),
        });
        let gateway = Arc::new(ScriptedGateway::new(session.clone()));
        let controller = PanelController::new(gateway.clone(), session.clone());
        (session, gateway, controller)
    }

    async fn signed_in_with(keys: Vec<ApiKey>) -> (Arc<SessionStore>, Arc<ScriptedGateway>, PanelController) {
        let (session, gateway, controller) = setup(Some("tok"));
        gateway.script_list(Ok(KeyListing::Keys(keys)));
        assert_eq!(controller.init().await, ActionOutcome::Applied);
        (session, gateway, controller)
    }

    // ========================================================================
    // Startup reconciliation
    // ========================================================================

    #[tokio::test]
    async fn test_init_without_token_makes_no_calls() {
        let (_session, gateway, controller) = setup(None);

        assert_eq!(controller.state(), SessionState::Unknown);
        assert_eq!(controller.init().await, ActionOutcome::Applied);

        assert_eq!(controller.state(), SessionState::LoggedOut);
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_init_with_keys() {
        let (session, gateway, controller) = setup(Some("tok"));
        gateway.script_list(Ok(KeyListing::Keys(vec![sample_key(1), sample_key(2)])));

        controller.init().await;

        assert_eq!(controller.state(), SessionState::LoggedInWithKeys);
        let ids: Vec<i64> = controller.keys().iter().map(|k| k.id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert_eq!(session.token(), Some("tok".to_string()));
    }

    #[tokio::test]
    async fn test_init_empty_list_keeps_token() {
        let (session, gateway, controller) = setup(Some("tok"));
        gateway.script_list(Ok(KeyListing::Keys(vec![])));

        controller.init().await;

        assert_eq!(controller.state(), SessionState::LoggedInEmpty);
        assert_eq!(session.token(), Some("tok".to_string()));
    }

    #[tokio::test]
    async fn test_init_no_keys_signal_keeps_token() {
        let (session, gateway, controller) = setup(Some("tok"));
        gateway.script_list(Ok(KeyListing::NoKeys));

        controller.init().await;

        assert_eq!(controller.state(), SessionState::LoggedInEmpty);
        assert!(controller.keys().is_empty());
        assert_eq!(session.token(), Some("tok".to_string()));
    }

    #[tokio::test]
    async fn test_init_rejected_token_logs_out() {
        let (session, gateway, controller) = setup(Some("expired"));
        gateway.script_list(Err(unauthorized()));

        controller.init().await;

        assert_eq!(controller.state(), SessionState::LoggedOut);
        assert!(!session.has_token());
        // Startup logs out quietly
        assert_eq!(controller.message().kind, MessageKind::None);
    }

    #[tokio::test]
    async fn test_init_transient_failure_keeps_token_and_state() {
        let (session, gateway, controller) = setup(Some("tok"));
        gateway.script_list(Err(GatewayError::transport("connection refused")));

        assert_eq!(controller.init().await, ActionOutcome::Failed);

        assert_eq!(controller.state(), SessionState::Unknown);
        assert!(session.has_token());
        assert_eq!(controller.message(), UiMessage::error("An error occurred"));
    }

    #[tokio::test]
    async fn test_init_server_error_is_not_logout() {
        let (session, gateway, controller) = setup(Some("tok"));
        gateway.script_list(Err(GatewayError::api(500, None)));

        controller.init().await;

        assert!(session.has_token());
        assert_ne!(controller.state(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let (_session, gateway, controller) = setup(Some("tok"));
        gateway
            .script_list(Ok(KeyListing::Keys(vec![sample_key(1)])))
            .script_list(Ok(KeyListing::Keys(vec![sample_key(1)])));

        controller.init().await;
        let first = controller.view();
        controller.refresh().await;
        let second = controller.view();

        assert_eq!(first, second);
        assert_eq!(gateway.count(&GatewayCall::ListApiKeys), 2);
    }

    // ========================================================================
    // Login / register / reset / verify
    // ========================================================================

    #[tokio::test]
    async fn test_login_success_reconciles() {
        let (session, gateway, controller) = setup(None);
        controller.init().await;
        gateway
            .script_login(Ok("fresh".to_string()))
            .script_list(Ok(KeyListing::NoKeys));

        let outcome = controller.login("a@example.com", "pw").await;

        assert_eq!(outcome, ActionOutcome::Applied);
        assert_eq!(session.token(), Some("fresh".to_string()));
        assert_eq!(controller.state(), SessionState::LoggedInEmpty);
        assert_eq!(
            gateway.calls(),
            vec![
                GatewayCall::Login {
                    email: "a@example.com".to_string()
                },
                GatewayCall::ListApiKeys
            ]
        );
    }

    #[tokio::test]
    async fn test_login_failure_keeps_state_and_reports_detail() {
        let (session, gateway, controller) = setup(None);
        controller.init().await;
        gateway.script_login(Err(GatewayError::Unauthorized {
            status: 401,
            detail: Some("Invalid credentials".to_string()),
        }));

        let outcome = controller.login("a@example.com", "wrong").await;

        assert_eq!(outcome, ActionOutcome::Failed);
        assert_eq!(controller.state(), SessionState::LoggedOut);
        assert!(!session.has_token());
        assert_eq!(controller.message(), UiMessage::error("Invalid credentials"));
        assert_eq!(gateway.count(&GatewayCall::ListApiKeys), 0);
    }

    #[tokio::test]
    async fn test_login_failure_without_detail_is_generic() {
        let (_session, gateway, controller) = setup(None);
        gateway.script_login(Err(GatewayError::transport("dns")));

        controller.login("a@example.com", "pw").await;

        assert_eq!(controller.message(), UiMessage::error("An error occurred"));
    }

    #[tokio::test]
    async fn test_register_success_shows_login_form() {
        let (session, gateway, controller) = setup(None);
        controller.init().await;
        controller.show_form(AuthForm::Register);
        gateway.script_register(Ok(()));

        let outcome = controller.register("new@example.com", "pw").await;

        assert_eq!(outcome, ActionOutcome::Applied);
        let view = controller.view();
        assert_eq!(view.form, AuthForm::Login);
        assert_eq!(view.state, SessionState::LoggedOut);
        assert_eq!(view.message, UiMessage::success(MSG_REGISTERED));
        assert!(!session.has_token());
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let (_session, gateway, controller) = setup(None);
        gateway.script_register(Err(GatewayError::api(
            400,
            Some("Email already registered".to_string()),
        )));

        assert_eq!(
            controller.register("dup@example.com", "pw").await,
            ActionOutcome::Failed
        );
        assert_eq!(
            controller.message(),
            UiMessage::error("Email already registered")
        );
    }

    #[tokio::test]
    async fn test_password_reset_request_only_touches_message() {
        let (_session, gateway, controller) = setup(None);
        controller.init().await;
        gateway
            .script_request_reset(Ok(()))
            .script_request_reset(Err(GatewayError::api(404, Some("Email not found".into()))));

        controller.request_password_reset("a@example.com").await;
        assert_eq!(controller.message(), UiMessage::success(MSG_RESET_REQUESTED));
        assert_eq!(controller.state(), SessionState::LoggedOut);

        controller.request_password_reset("nobody@example.com").await;
        assert_eq!(controller.message(), UiMessage::error("Email not found"));
        assert_eq!(controller.state(), SessionState::LoggedOut);
    }

    #[tokio::test]
    async fn test_confirm_password_reset() {
        let (_session, gateway, controller) = setup(None);
        controller.show_form(AuthForm::ResetPassword);
        gateway
            .script_confirm_reset(Err(GatewayError::api(400, Some("Invalid token".into()))))
            .script_confirm_reset(Ok(()));

        controller.confirm_password_reset("bad", "pw2").await;
        assert_eq!(controller.message(), UiMessage::error("Invalid token"));
        assert_eq!(controller.view().form, AuthForm::ResetPassword);

        controller.confirm_password_reset("good", "pw2").await;
        assert_eq!(controller.message(), UiMessage::success(MSG_RESET_CONFIRMED));
        assert_eq!(controller.view().form, AuthForm::Login);
    }

    #[tokio::test]
    async fn test_verify_email() {
        let (_session, gateway, controller) = setup(None);
        gateway
            .script_verify_email(Ok(()))
            .script_verify_email(Err(GatewayError::api(400, None)));

        assert_eq!(controller.verify_email("t1").await, ActionOutcome::Applied);
        assert_eq!(controller.message(), UiMessage::success(MSG_EMAIL_VERIFIED));

        assert_eq!(controller.verify_email("t2").await, ActionOutcome::Failed);
        assert_eq!(controller.message(), UiMessage::error(MSG_VERIFY_FAILED));
    }

    #[tokio::test]
    async fn test_verify_email_without_token_makes_no_call() {
        let (_session, gateway, controller) = setup(None);

        assert_eq!(controller.verify_email("  ").await, ActionOutcome::Rejected);
        assert_eq!(controller.message(), UiMessage::error(MSG_VERIFY_FAILED));
        assert_eq!(gateway.call_count(), 0);
    }

    #[tokio::test]
    async fn test_logout_clears_everything() {
        let (session, _gateway, controller) = signed_in_with(vec![sample_key(1)]).await;

        controller.logout();

        let view = controller.view();
        assert_eq!(view.state, SessionState::LoggedOut);
        assert!(view.keys.is_empty());
        assert!(!session.has_token());
    }

    // ========================================================================
    // Key actions
    // ========================================================================

    #[tokio::test]
    async fn test_generate_from_empty() {
        let (_session, gateway, controller) = signed_in_with(vec![]).await;
        assert_eq!(controller.state(), SessionState::LoggedInEmpty);
        gateway.script_generate(Ok(sample_key(9)));

        assert_eq!(controller.generate().await, ActionOutcome::Applied);

        assert_eq!(controller.state(), SessionState::LoggedInWithKeys);
        let keys = controller.keys();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].id, 9);
        // Optimistic append, no re-fetch
        assert_eq!(gateway.count(&GatewayCall::ListApiKeys), 1);
    }

    #[tokio::test]
    async fn test_generate_appends_in_order() {
        let (_session, gateway, controller) = signed_in_with(vec![sample_key(1)]).await;
        gateway.script_generate(Ok(sample_key(2)));

        controller.generate().await;

        let ids: Vec<i64> = controller.keys().iter().map(|k| k.id).collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_generate_failure_keeps_collection() {
        let (_session, gateway, controller) = signed_in_with(vec![sample_key(1)]).await;
        gateway.script_generate(Err(GatewayError::api(500, None)));

        assert_eq!(controller.generate().await, ActionOutcome::Failed);

        assert_eq!(controller.keys(), vec![sample_key(1)]);
        assert_eq!(controller.state(), SessionState::LoggedInWithKeys);
        assert!(controller.message().is_error());
    }

    #[tokio::test]
    async fn test_key_actions_require_session() {
        let (_session, gateway, controller) = setup(None);
        controller.init().await;

        assert_eq!(controller.generate().await, ActionOutcome::Rejected);
        assert_eq!(controller.renew(1).await, ActionOutcome::Rejected);
        assert_eq!(controller.revoke(1).await, ActionOutcome::Rejected);

        assert_eq!(gateway.call_count(), 0);
        assert_eq!(controller.message(), UiMessage::error(MSG_SIGN_IN_REQUIRED));
    }

    #[tokio::test]
    async fn test_renew_refetches_authoritative_list() {
        let (_session, gateway, controller) =
            signed_in_with(vec![sample_key(1), sample_key(2)]).await;

        let mut renewed = sample_key(1);
        renewed.expires_at = renewed.expires_at.map(|e| e + chrono::Duration::days(30));
        gateway
            .script_renew(Ok(()))
            .script_list(Ok(KeyListing::Keys(vec![renewed.clone(), sample_key(2)])));

        assert_eq!(controller.renew(1).await, ActionOutcome::Applied);

        assert_eq!(controller.keys(), vec![renewed, sample_key(2)]);
        assert_eq!(controller.message(), UiMessage::success(MSG_KEY_RENEWED));
        assert_eq!(
            gateway.calls()[1..],
            [GatewayCall::RenewApiKey(1), GatewayCall::ListApiKeys]
        );
    }

    #[tokio::test]
    async fn test_renew_failure_does_not_refetch() {
        let (_session, gateway, controller) = signed_in_with(vec![sample_key(1)]).await;
        gateway.script_renew(Err(GatewayError::api(404, Some("API key not found".into()))));

        assert_eq!(controller.renew(1).await, ActionOutcome::Failed);

        assert_eq!(controller.keys(), vec![sample_key(1)]);
        assert_eq!(controller.message(), UiMessage::error("API key not found"));
        assert_eq!(gateway.count(&GatewayCall::ListApiKeys), 1);
    }

    #[tokio::test]
    async fn test_revoke_last_key_becomes_empty() {
        let (_session, gateway, controller) = signed_in_with(vec![sample_key(4)]).await;
        gateway.script_revoke(Ok(()));

        assert_eq!(controller.revoke(4).await, ActionOutcome::Applied);

        assert_eq!(controller.state(), SessionState::LoggedInEmpty);
        assert!(controller.keys().is_empty());
        assert_eq!(gateway.count(&GatewayCall::ListApiKeys), 1);
    }

    #[tokio::test]
    async fn test_revoke_failure_keeps_collection() {
        let (_session, gateway, controller) =
            signed_in_with(vec![sample_key(1), sample_key(2)]).await;
        gateway.script_revoke(Err(GatewayError::transport("reset by peer")));

        assert_eq!(controller.revoke(2).await, ActionOutcome::Failed);
        assert_eq!(controller.keys().len(), 2);
    }

    #[tokio::test]
    async fn test_key_action_with_rejected_session_logs_out() {
        let (session, gateway, controller) = signed_in_with(vec![sample_key(1)]).await;
        gateway.script_revoke(Err(unauthorized()));

        assert_eq!(controller.revoke(1).await, ActionOutcome::Failed);

        assert_eq!(controller.state(), SessionState::LoggedOut);
        assert!(!session.has_token());
        assert_eq!(controller.message(), UiMessage::error(MSG_SESSION_EXPIRED));
    }

    // ========================================================================
    // Hardening: duplicates and stale results
    // ========================================================================

    #[tokio::test]
    async fn test_concurrent_generate_is_deduplicated() {
        let (_session, gateway, controller) = signed_in_with(vec![]).await;
        let gate = gateway.gated_generate(Ok(sample_key(1)));

        let first = controller.generate();
        let second = async {
            tokio::task::yield_now().await;
            let outcome = controller.generate().await;
            gate.notify_one();
            outcome
        };
        let (first, second) = tokio::join!(first, second);

        assert_eq!(first, ActionOutcome::Applied);
        assert_eq!(second, ActionOutcome::Duplicate);
        assert_eq!(gateway.count(&GatewayCall::GenerateApiKey), 1);
        assert_eq!(controller.keys().len(), 1);
        assert!(!controller.is_in_flight(Action::Generate));
    }

    #[tokio::test]
    async fn test_renew_of_different_keys_not_deduplicated() {
        let (_session, gateway, controller) =
            signed_in_with(vec![sample_key(1), sample_key(2)]).await;
        gateway
            .script_renew(Ok(()))
            .script_list(Ok(KeyListing::Keys(vec![sample_key(1), sample_key(2)])))
            .script_renew(Ok(()))
            .script_list(Ok(KeyListing::Keys(vec![sample_key(1), sample_key(2)])));

        let (a, b) = tokio::join!(controller.renew(1), controller.renew(2));

        assert_ne!(a, ActionOutcome::Duplicate);
        assert_ne!(b, ActionOutcome::Duplicate);
        assert_eq!(gateway.count(&GatewayCall::RenewApiKey(1)), 1);
        assert_eq!(gateway.count(&GatewayCall::RenewApiKey(2)), 1);
    }

    #[tokio::test]
    async fn test_generate_result_after_logout_is_dropped() {
        let (_session, gateway, controller) = signed_in_with(vec![]).await;
        let gate = gateway.gated_generate(Ok(sample_key(1)));

        let generate = controller.generate();
        let logout = async {
            tokio::task::yield_now().await;
            controller.logout();
            gate.notify_one();
        };
        let (outcome, ()) = tokio::join!(generate, logout);

        assert_eq!(outcome, ActionOutcome::Stale);
        assert_eq!(controller.state(), SessionState::LoggedOut);
        assert!(controller.keys().is_empty());
    }

    #[tokio::test]
    async fn test_older_listing_is_dropped_for_newer_one() {
        let (_session, gateway, controller) = signed_in_with(vec![sample_key(1)]).await;

        // A refresh is held in flight while a renew issues a newer fetch.
        let held = gateway.gated_list(Ok(KeyListing::Keys(vec![sample_key(1)])));
        let mut renewed = sample_key(1);
        renewed.expires_at = None;
        gateway
            .script_renew(Ok(()))
            .script_list(Ok(KeyListing::Keys(vec![renewed.clone()])));

        let refresh = controller.refresh();
        let renew = async {
            tokio::task::yield_now().await;
            let outcome = controller.renew(1).await;
            held.notify_one();
            outcome
        };
        let (refresh, renew) = tokio::join!(refresh, renew);

        assert_eq!(renew, ActionOutcome::Applied);
        assert_eq!(refresh, ActionOutcome::Stale);
        assert_eq!(controller.keys(), vec![renewed]);
    }

    #[tokio::test]
    async fn test_listing_issued_before_revoke_is_dropped() {
        let (_session, gateway, controller) = signed_in_with(vec![sample_key(1)]).await;

        // The held listing was taken before the revoke landed.
        let held = gateway.gated_list(Ok(KeyListing::Keys(vec![sample_key(1)])));
        gateway.script_revoke(Ok(()));

        let refresh = controller.refresh();
        let revoke = async {
            tokio::task::yield_now().await;
            let outcome = controller.revoke(1).await;
            held.notify_one();
            outcome
        };
        let (refresh, revoke) = tokio::join!(refresh, revoke);

        assert_eq!(revoke, ActionOutcome::Applied);
        assert_eq!(refresh, ActionOutcome::Stale);
        assert!(controller.keys().is_empty());
        assert_eq!(controller.state(), SessionState::LoggedInEmpty);
    }

    #[tokio::test]
    async fn test_listing_issued_before_generate_is_dropped() {
        let (_session, gateway, controller) = signed_in_with(vec![]).await;

        let held = gateway.gated_list(Ok(KeyListing::NoKeys));
        gateway.script_generate(Ok(sample_key(2)));

        let refresh = controller.refresh();
        let generate = async {
            tokio::task::yield_now().await;
            let outcome = controller.generate().await;
            held.notify_one();
            outcome
        };
        let (refresh, generate) = tokio::join!(refresh, generate);

        assert_eq!(generate, ActionOutcome::Applied);
        assert_eq!(refresh, ActionOutcome::Stale);
        assert_eq!(controller.keys(), vec![sample_key(2)]);
    }

    #[tokio::test]
    async fn test_key_action_after_failed_reconcile_keeps_error() {
        let (_session, gateway, controller) = setup(Some("tok"));
        gateway.script_list(Err(GatewayError::api(503, Some("gateway unavailable".into()))));
        controller.init().await;
        assert_eq!(controller.state(), SessionState::Unknown);

        assert_eq!(controller.generate().await, ActionOutcome::Rejected);

        assert_eq!(controller.message(), UiMessage::error("gateway unavailable"));
        assert_eq!(gateway.count(&GatewayCall::GenerateApiKey), 0);
    }

    // ========================================================================
    // Token persistence failures
    // ========================================================================

    #[tokio::test]
    async fn test_logout_reports_token_that_could_not_be_removed() {
        let (session, gateway, controller) = setup_read_only(Some("tok"));
        gateway.script_list(Ok(KeyListing::Keys(vec![sample_key(1)])));
        controller.init().await;

        assert_eq!(controller.logout(), ActionOutcome::Failed);

        let view = controller.view();
        assert_eq!(view.state, SessionState::LoggedOut);
        assert!(view.keys.is_empty());
        assert!(view.message.is_error());
        assert!(view.message.content.starts_with(MSG_TOKEN_NOT_CLEARED));
        assert!(!session.has_token());
    }

    #[tokio::test]
    async fn test_forced_logout_reports_token_that_could_not_be_removed() {
        let (_session, gateway, controller) = setup_read_only(Some("expired"));
        gateway.script_list(Err(unauthorized()));

        assert_eq!(controller.init().await, ActionOutcome::Failed);

        assert_eq!(controller.state(), SessionState::LoggedOut);
        assert!(controller.message().content.starts_with(MSG_TOKEN_NOT_CLEARED));
    }

    #[tokio::test]
    async fn test_login_reports_token_that_could_not_be_saved() {
        let (session, gateway, controller) = setup_read_only(None);
        controller.init().await;
        gateway
            .script_login(Ok("fresh".to_string()))
            .script_list(Ok(KeyListing::NoKeys));

        assert_eq!(controller.login("a@example.com", "pw").await, ActionOutcome::Failed);

        // Signed in for this process, but told the session will not survive
        assert_eq!(controller.state(), SessionState::LoggedInEmpty);
        assert_eq!(session.token(), Some("fresh".to_string()));
        assert!(controller.message().is_error());
        assert!(controller.message().content.starts_with(MSG_TOKEN_NOT_SAVED));
    }

    #[tokio::test]
    async fn test_subscribers_see_state_changes() {
        let (_session, gateway, controller) = setup(Some("tok"));
        let mut rx = controller.subscribe();
        gateway.script_list(Ok(KeyListing::Keys(vec![sample_key(3)])));

        controller.init().await;

        assert!(rx.has_changed().unwrap());
        let view = rx.borrow_and_update().clone();
        assert_eq!(view.state, SessionState::LoggedInWithKeys);
        assert_eq!(view.keys.len(), 1);
    }

    #[test]
    fn test_upsert_replaces_same_id() {
        let mut keys = vec![sample_key(1), sample_key(2)];
        let mut replacement = sample_key(1);
        replacement.key = "rotated".to_string();

        upsert(&mut keys, replacement);

        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].key, "rotated");
    }
}
