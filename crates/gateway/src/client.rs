// HTTP client for the auth gateway
//
// Decision: Bearer token is read from the Session Store on every key call,
// never cached on the client
// Decision: 404 on the key listing means "no keys yet", not an error

use std::sync::Arc;

use async_trait::async_trait;
use keypanel_core::{ApiKey, Gateway, GatewayError, KeyListing, Result, SessionStore};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::GatewayConfig;
use crate::detail::extract_detail;

#[derive(Debug, Serialize)]
struct Credentials<'a> {
    email: &'a str,
    password: &'a str,
}

#[derive(Debug, Serialize)]
struct EmailRequest<'a> {
    email: &'a str,
}

#[derive(Debug, Serialize)]
struct ResetConfirmRequest<'a> {
    token: &'a str,
    new_password: &'a str,
}

#[derive(Debug, Serialize)]
struct TokenRequest<'a> {
    token: &'a str,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct ApiKeyListResponse {
    #[serde(default)]
    api_keys: Vec<ApiKey>,
}

/// Gateway implementation over HTTP.
pub struct HttpGateway {
    base_url: String,
    http: reqwest::Client,
    session: Arc<SessionStore>,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig, session: Arc<SessionStore>) -> Self {
        Self::with_client(config, session, reqwest::Client::new())
    }

    /// Use a preconfigured reqwest client (proxies, custom TLS, ...)
    pub fn with_client(
        config: &GatewayConfig,
        session: Arc<SessionStore>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            session,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Attach the stored token. Key calls are only defined for a session.
    fn with_auth(&self, req: RequestBuilder) -> Result<RequestBuilder> {
        let token = self.session.token().ok_or(GatewayError::MissingToken)?;
        Ok(req.bearer_auth(token))
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let response = req.send().await.map_err(transport_error)?;
        tracing::debug!(
            url = %response.url(),
            status = response.status().as_u16(),
            "gateway response"
        );
        Ok(response)
    }

    async fn expect_ok(&self, req: RequestBuilder) -> Result<()> {
        let response = self.send(req).await?;
        check_status(response).await?;
        Ok(())
    }

    async fn expect_json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let response = self.send(req).await?;
        let response = check_status(response).await?;
        decode(response).await
    }
}

/// Map non-success statuses onto the gateway error taxonomy.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let detail = extract_detail(&body);

    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(GatewayError::Unauthorized {
            status: status.as_u16(),
            detail,
        });
    }
    Err(GatewayError::api(status.as_u16(), detail))
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    let bytes = response.bytes().await.map_err(transport_error)?;
    serde_json::from_slice(&bytes).map_err(|e| GatewayError::decode(e.to_string()))
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_decode() {
        GatewayError::decode(err.to_string())
    } else {
        GatewayError::transport(err.to_string())
    }
}

#[async_trait]
impl Gateway for HttpGateway {
    async fn register(&self, email: &str, password: &str) -> Result<()> {
        tracing::debug!("POST /auth/register");
        let req = self
            .http
            .post(self.url("/auth/register"))
            .json(&Credentials { email, password });
        self.expect_ok(req).await
    }

    async fn login(&self, email: &str, password: &str) -> Result<String> {
        tracing::debug!("POST /auth/login");
        let req = self
            .http
            .post(self.url("/auth/login"))
            .json(&Credentials { email, password });
        let body: TokenResponse = self.expect_json(req).await?;
        if body.access_token.is_empty() {
            return Err(GatewayError::decode("empty access_token in login response"));
        }

        // The in-memory token is set even when persisting fails
        self.session
            .set_token(body.access_token.clone())
            .map_err(|e| GatewayError::storage(&e))?;
        Ok(body.access_token)
    }

    async fn request_password_reset(&self, email: &str) -> Result<()> {
        tracing::debug!("POST /auth/password-reset/request");
        let req = self
            .http
            .post(self.url("/auth/password-reset/request"))
            .json(&EmailRequest { email });
        self.expect_ok(req).await
    }

    async fn confirm_password_reset(&self, token: &str, new_password: &str) -> Result<()> {
        tracing::debug!("POST /auth/password-reset/confirm");
        let req = self
            .http
            .post(self.url("/auth/password-reset/confirm"))
            .json(&ResetConfirmRequest {
                token,
                new_password,
            });
        self.expect_ok(req).await
    }

    async fn verify_email(&self, token: &str) -> Result<()> {
        tracing::debug!("POST /auth/verify-email");
        let req = self
            .http
            .post(self.url("/auth/verify-email"))
            .json(&TokenRequest { token });
        self.expect_ok(req).await
    }

    async fn list_api_keys(&self) -> Result<KeyListing> {
        tracing::debug!("GET /auth/apikeys");
        let req = self.with_auth(self.http.get(self.url("/auth/apikeys")))?;
        let response = self.send(req).await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(KeyListing::NoKeys);
        }

        let response = check_status(response).await?;
        let body: ApiKeyListResponse = decode(response).await?;
        Ok(KeyListing::Keys(body.api_keys))
    }

    async fn generate_api_key(&self) -> Result<ApiKey> {
        tracing::debug!("POST /auth/apikeys");
        let req = self.with_auth(
            self.http
                .post(self.url("/auth/apikeys"))
                .json(&serde_json::json!({})),
        )?;
        self.expect_json(req).await
    }

    async fn renew_api_key(&self, id: i64) -> Result<()> {
        tracing::debug!(key_id = id, "POST /auth/apikeys/:id/renew");
        let req = self.with_auth(
            self.http
                .post(self.url(&format!("/auth/apikeys/{}/renew", id)))
                .json(&serde_json::json!({})),
        )?;
        self.expect_ok(req).await
    }

    async fn revoke_api_key(&self, id: i64) -> Result<()> {
        tracing::debug!(key_id = id, "DELETE /auth/apikeys/:id");
        let req = self.with_auth(self.http.delete(self.url(&format!("/auth/apikeys/{}", id))))?;
        self.expect_ok(req).await
    }
}
