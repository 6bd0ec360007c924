// API key domain types
//
// These types represent a self-service API key as the gateway reports it.
// Used by the controller, the HTTP gateway and the CLI.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// API key - a server-issued credential owned by the signed-in user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKey {
    /// Server-assigned identifier, unique and immutable.
    pub id: i64,
    /// The secret itself. Revealed in full at creation and list time.
    pub key: String,
    /// Timestamp when the key was issued.
    #[serde(deserialize_with = "timestamp::required")]
    pub created_at: DateTime<Utc>,
    /// Timestamp after which the gateway rejects the key.
    #[serde(default, deserialize_with = "timestamp::optional")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    /// Whether the key has expired at `now`. Keys without an expiry never do.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }

    /// The secret with everything after the first `visible` characters masked.
    pub fn masked(&self, visible: usize) -> String {
        let prefix: String = self.key.chars().take(visible).collect();
        format!("{}******", prefix)
    }
}

/// Outcome of a successful list call.
///
/// `NoKeys` is the gateway telling us "valid session, nothing provisioned
/// yet" and must never be treated like a rejected session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyListing {
    /// The authoritative collection, in server order (may be empty).
    Keys(Vec<ApiKey>),
    /// No keys provisioned for this (authenticated) user.
    NoKeys,
}

impl KeyListing {
    /// Flatten into the collection the controller holds.
    pub fn into_keys(self) -> Vec<ApiKey> {
        match self {
            KeyListing::Keys(keys) => keys,
            KeyListing::NoKeys => Vec::new(),
        }
    }
}

/// Gateway timestamps come either as RFC 3339 or as naive ISO 8601 without an
/// offset (ORM output). Naive values are taken as UTC.
pub(crate) mod timestamp {
    use super::*;

    const NAIVE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
            return Some(dt.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, NAIVE_FORMAT)
            .ok()
            .map(|naive| naive.and_utc())
    }

    pub fn required<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}")))
    }

    pub fn optional<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(raw) => parse(&raw)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp: {raw}"))),
        }
    }
}
