// Gateway configuration loaded from environment variables.
// Decision: Keep the API_GATEWAY_URL name the web panel used
// Decision: Default to the local gateway for development

/// Default base URL of the auth gateway
pub const DEFAULT_BASE_URL: &str = "http://localhost:8000";

/// Where the auth gateway lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    /// Base URL, without a trailing slash
    pub base_url: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl GatewayConfig {
    pub fn new(base_url: impl AsRef<str>) -> Self {
        Self {
            base_url: base_url.as_ref().trim_end_matches('/').to_string(),
        }
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        match std::env::var("API_GATEWAY_URL") {
            Ok(url) if !url.trim().is_empty() => Self::new(url.trim()),
            _ => Self::default(),
        }
    }
}
