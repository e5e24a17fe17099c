//! Encrypted storage for OAuth tokens.
//!
//! One row per (owner, provider). Tokens are written only by the OAuth broker
//! and read by the connection validator and the export adapter registry.
//!
//! ```text
//! OAuthBroker ──upsert──▶ TokenStore ◀──get── ConnectionValidator
//!                              ▲
//!                              └──────get── AdapterRegistry
//! ```

use crate::secret::Secret;
use chrono::{DateTime, Utc};
use serde::Serialize;

mod encryption;
mod storage;

pub use encryption::{parse_key, Cipher, Sealed};
pub use storage::TokenStore;

/// OAuth token pair for one owner and provider.
#[derive(Clone, Debug, Serialize)]
pub struct OAuthToken {
    pub access_token: Secret<String>,
    pub refresh_token: Option<Secret<String>>,
    /// `None` means the token does not expire.
    pub expires_at: Option<DateTime<Utc>>,
}

impl OAuthToken {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(expires_at) if expires_at <= now)
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }
}
