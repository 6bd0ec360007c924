// In-memory implementations for examples and testing
//
// ScriptedGateway plays back queued responses per operation and records every
// call that would have reached the network. A response can be gated behind a
// `Notify` so tests can hold a call in flight and interleave other actions.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::api_key::{ApiKey, KeyListing};
use crate::error::{GatewayError, Result};
use crate::session_store::SessionStore;
use crate::traits::Gateway;

/// A call observed by [`ScriptedGateway`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCall {
    Register { email: String },
    Login { email: String },
    RequestPasswordReset { email: String },
    ConfirmPasswordReset { token: String },
    VerifyEmail { token: String },
    ListApiKeys,
    GenerateApiKey,
    RenewApiKey(i64),
    RevokeApiKey(i64),
}

struct Step<T> {
    result: Result<T>,
    gate: Option<Arc<Notify>>,
}

#[derive(Default)]
struct Script {
    register: VecDeque<Step<()>>,
    login: VecDeque<Step<String>>,
    request_reset: VecDeque<Step<()>>,
    confirm_reset: VecDeque<Step<()>>,
    verify_email: VecDeque<Step<()>>,
    list: VecDeque<Step<KeyListing>>,
    generate: VecDeque<Step<ApiKey>>,
    renew: VecDeque<Step<()>>,
    revoke: VecDeque<Step<()>>,
}

// ============================================================================
// ScriptedGateway
// ============================================================================

/// Gateway double that replays scripted responses in FIFO order per operation.
///
/// Unscripted calls fail with a 500 so a missing script shows up as an error
/// message rather than a hang.
pub struct ScriptedGateway {
    session: Arc<SessionStore>,
    script: Mutex<Script>,
    calls: Mutex<Vec<GatewayCall>>,
}

impl ScriptedGateway {
    pub fn new(session: Arc<SessionStore>) -> Self {
        Self {
            session,
            script: Mutex::new(Script::default()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn script_register(&self, result: Result<()>) -> &Self {
        self.script.lock().register.push_back(ready(result));
        self
    }

    pub fn script_login(&self, result: Result<String>) -> &Self {
        self.script.lock().login.push_back(ready(result));
        self
    }

    pub fn script_request_reset(&self, result: Result<()>) -> &Self {
        self.script.lock().request_reset.push_back(ready(result));
        self
    }

    pub fn script_confirm_reset(&self, result: Result<()>) -> &Self {
        self.script.lock().confirm_reset.push_back(ready(result));
        self
    }

    pub fn script_verify_email(&self, result: Result<()>) -> &Self {
        self.script.lock().verify_email.push_back(ready(result));
        self
    }

    pub fn script_list(&self, result: Result<KeyListing>) -> &Self {
        self.script.lock().list.push_back(ready(result));
        self
    }

    pub fn script_generate(&self, result: Result<ApiKey>) -> &Self {
        self.script.lock().generate.push_back(ready(result));
        self
    }

    pub fn script_renew(&self, result: Result<()>) -> &Self {
        self.script.lock().renew.push_back(ready(result));
        self
    }

    pub fn script_revoke(&self, result: Result<()>) -> &Self {
        self.script.lock().revoke.push_back(ready(result));
        self
    }

    /// Queue a login response that is held until the returned gate is notified.
    pub fn gated_login(&self, result: Result<String>) -> Arc<Notify> {
        let (step, gate) = gated(result);
        self.script.lock().login.push_back(step);
        gate
    }

    /// Queue a list response that is held until the returned gate is notified.
    pub fn gated_list(&self, result: Result<KeyListing>) -> Arc<Notify> {
        let (step, gate) = gated(result);
        self.script.lock().list.push_back(step);
        gate
    }

    /// Queue a generate response that is held until the returned gate is notified.
    pub fn gated_generate(&self, result: Result<ApiKey>) -> Arc<Notify> {
        let (step, gate) = gated(result);
        self.script.lock().generate.push_back(step);
        gate
    }

    /// Queue a renew response that is held until the returned gate is notified.
    pub fn gated_renew(&self, result: Result<()>) -> Arc<Notify> {
        let (step, gate) = gated(result);
        self.script.lock().renew.push_back(step);
        gate
    }

    /// Every call that reached the (simulated) network, in order.
    pub fn calls(&self) -> Vec<GatewayCall> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of recorded calls equal to `call`.
    pub fn count(&self, call: &GatewayCall) -> usize {
        self.calls.lock().iter().filter(|c| *c == call).count()
    }

    fn record(&self, call: GatewayCall) {
        tracing::debug!(?call, "scripted gateway call");
        self.calls.lock().push(call);
    }

    fn require_token(&self) -> Result<()> {
        if self.session.has_token() {
            Ok(())
        } else {
            Err(GatewayError::MissingToken)
        }
    }
}

fn ready<T>(result: Result<T>) -> Step<T> {
    Step { result, gate: None }
}

fn gated<T>(result: Result<T>) -> (Step<T>, Arc<Notify>) {
    let gate = Arc::new(Notify::new());
    (
        Step {
            result,
            gate: Some(gate.clone()),
        },
        gate,
    )
}

async fn play<T>(step: Option<Step<T>>, op: &str) -> Result<T> {
    let Some(step) = step else {
        return Err(GatewayError::api(500, Some(format!("unscripted {op} call"))));
    };
    if let Some(gate) = step.gate {
        gate.notified().await;
    }
    step.result
}

#[async_trait]
impl Gateway for ScriptedGateway {
    async fn register(&self, email: &str, _password: &str) -> Result<()> {
        self.record(GatewayCall::Register {
            email: email.to_string(),
        });
        let step = self.script.lock().register.pop_front();
        play(step, "register").await
    }

    async fn login(&self, email: &str, _password: &str) -> Result<String> {
        self.record(GatewayCall::Login {
            email: email.to_string(),
        });
        let step = self.script.lock().login.pop_front();
        let token = play(step, "login").await?;
        self.session
            .set_token(token.clone())
            .map_err(|e| GatewayError::storage(&e))?;
        Ok(token)
    }

    async fn request_password_reset(&self, email: &str) -> Result<()> {
        self.record(GatewayCall::RequestPasswordReset {
            email: email.to_string(),
        });
        let step = self.script.lock().request_reset.pop_front();
        play(step, "password reset request").await
    }

    async fn confirm_password_reset(&self, token: &str, _new_password: &str) -> Result<()> {
        self.record(GatewayCall::ConfirmPasswordReset {
            token: token.to_string(),
        });
        let step = self.script.lock().confirm_reset.pop_front();
        play(step, "password reset confirm").await
    }

    async fn verify_email(&self, token: &str) -> Result<()> {
        self.record(GatewayCall::VerifyEmail {
            token: token.to_string(),
        });
        let step = self.script.lock().verify_email.pop_front();
        play(step, "verify email").await
    }

    async fn list_api_keys(&self) -> Result<KeyListing> {
        self.require_token()?;
        self.record(GatewayCall::ListApiKeys);
        let step = self.script.lock().list.pop_front();
        play(step, "list keys").await
    }

    async fn generate_api_key(&self) -> Result<ApiKey> {
        self.require_token()?;
        self.record(GatewayCall::GenerateApiKey);
        let step = self.script.lock().generate.pop_front();
        play(step, "generate key").await
    }

    async fn renew_api_key(&self, id: i64) -> Result<()> {
        self.require_token()?;
        self.record(GatewayCall::RenewApiKey(id));
        let step = self.script.lock().renew.pop_front();
        play(step, "renew key").await
    }

    async fn revoke_api_key(&self, id: i64) -> Result<()> {
        self.require_token()?;
        self.record(GatewayCall::RevokeApiKey(id));
        let step = self.script.lock().revoke.pop_front();
        play(step, "revoke key").await
    }
}

/// A deterministic key for tests: created 2025-01-01 plus `id` days, valid for 30 days.
pub fn sample_key(id: i64) -> ApiKey {
    let created_at = Utc
        .with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
        + Duration::days(id);
    ApiKey {
        id,
        key: format!("fk_live_{:08}", id),
        created_at,
        expires_at: Some(created_at + Duration::days(30)),
    }
}
