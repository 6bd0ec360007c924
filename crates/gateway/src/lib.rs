// Auth gateway HTTP client
//
// Implements keypanel_core::Gateway against the remote auth/gateway service.

pub mod client;
pub mod config;
pub mod detail;

pub use client::HttpGateway;
pub use config::{GatewayConfig, DEFAULT_BASE_URL};
pub use detail::extract_detail;
