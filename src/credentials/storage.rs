//! Encrypted OAuth token storage using SQLite.

use super::{Cipher, OAuthToken, Sealed};
use crate::db;
use crate::oauth::OAuthProvider;
use crate::secret::Secret;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// Token storage backed by SQLite.
///
/// # Schema
/// ```sql
/// CREATE TABLE oauth_tokens (
///     id INTEGER PRIMARY KEY,
///     owner_id TEXT NOT NULL,
///     provider TEXT NOT NULL,
///     access_token TEXT NOT NULL,       -- Encrypted
///     access_token_nonce TEXT NOT NULL,
///     refresh_token TEXT,               -- Encrypted (optional)
///     refresh_token_nonce TEXT,
///     expires_at TEXT,                  -- RFC 3339, NULL = non-expiring
///     created_at TEXT NOT NULL,
///     updated_at TEXT NOT NULL,
///     UNIQUE(owner_id, provider)
/// );
/// ```
///
/// The `UNIQUE(owner_id, provider)` constraint plus `ON CONFLICT DO UPDATE`
/// keeps at most one live token per pair, however often the consent flow runs.
pub struct TokenStore {
    conn: Mutex<Connection>,
    cipher: Cipher,
}

impl TokenStore {
    /// Creates or opens a token store.
    ///
    /// # Arguments
    /// * `db_path` - Path to SQLite database file
    /// * `cipher` - Cipher built from the master key
    pub fn new<P: AsRef<Path>>(db_path: P, cipher: Cipher) -> Result<Self> {
        let conn = db::open(db_path)?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS oauth_tokens (
                id INTEGER PRIMARY KEY,
                owner_id TEXT NOT NULL,
                provider TEXT NOT NULL,
                access_token TEXT NOT NULL,
                access_token_nonce TEXT NOT NULL,
                refresh_token TEXT,
                refresh_token_nonce TEXT,
                expires_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                UNIQUE(owner_id, provider)
            );
            CREATE INDEX IF NOT EXISTS idx_tokens_owner ON oauth_tokens(owner_id);
            "#,
        )
        .context("Failed to create oauth_tokens table")?;

        Ok(Self {
            conn: Mutex::new(conn),
            cipher,
        })
    }

    /// Stores a token for an owner and provider, replacing any existing one.
    pub fn upsert(&self, owner_id: &str, provider: OAuthProvider, token: &OAuthToken) -> Result<()> {
        let access = self
            .cipher
            .seal(token.access_token.expose())
            .context("Failed to encrypt access token")?;

        let refresh = token
            .refresh_token
            .as_ref()
            .map(|t| self.cipher.seal(t.expose()))
            .transpose()
            .context("Failed to encrypt refresh token")?;
        let (refresh_ciphertext, refresh_nonce) = match refresh {
            Some(sealed) => (Some(sealed.ciphertext), Some(sealed.nonce)),
            None => (None, None),
        };

        let expires_at = token.expires_at.map(|dt| dt.to_rfc3339());
        let now = Utc::now().to_rfc3339();

        db::lock(&self.conn)?
            .execute(
                r#"
                INSERT INTO oauth_tokens (
                    owner_id, provider,
                    access_token, access_token_nonce,
                    refresh_token, refresh_token_nonce,
                    expires_at, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                ON CONFLICT(owner_id, provider) DO UPDATE SET
                    access_token = excluded.access_token,
                    access_token_nonce = excluded.access_token_nonce,
                    refresh_token = excluded.refresh_token,
                    refresh_token_nonce = excluded.refresh_token_nonce,
                    expires_at = excluded.expires_at,
                    updated_at = excluded.updated_at
                "#,
                params![
                    owner_id,
                    provider.as_str(),
                    access.ciphertext,
                    access.nonce,
                    refresh_ciphertext,
                    refresh_nonce,
                    expires_at,
                    now,
                ],
            )
            .context("Failed to store OAuth token")?;

        Ok(())
    }

    /// Returns the token for an owner and provider, if one is stored.
    pub fn get(&self, owner_id: &str, provider: OAuthProvider) -> Result<Option<OAuthToken>> {
        let conn = db::lock(&self.conn)?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT access_token, access_token_nonce,
                       refresh_token, refresh_token_nonce,
                       expires_at
                FROM oauth_tokens
                WHERE owner_id = ?1 AND provider = ?2
                "#,
            )
            .context("Failed to prepare query")?;

        let mut rows = stmt
            .query(params![owner_id, provider.as_str()])
            .context("Failed to execute query")?;

        let Some(row) = rows.next().context("Failed to read row")? else {
            return Ok(None);
        };

        let access_token = self
            .cipher
            .open(&Sealed {
                ciphertext: row.get(0)?,
                nonce: row.get(1)?,
            })
            .context("Failed to decrypt access token")?;

        let refresh_ciphertext: Option<String> = row.get(2)?;
        let refresh_nonce: Option<String> = row.get(3)?;
        let refresh_token = match (refresh_ciphertext, refresh_nonce) {
            (Some(ciphertext), Some(nonce)) => Some(
                self.cipher
                    .open(&Sealed { ciphertext, nonce })
                    .context("Failed to decrypt refresh token")?,
            ),
            _ => None,
        };

        let expires_at: Option<String> = row.get(4)?;
        let expires_at = expires_at
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|dt| dt.with_timezone(&Utc)))
            .transpose()
            .context("Failed to parse expires_at timestamp")?;

        Ok(Some(OAuthToken {
            access_token: Secret::new(access_token),
            refresh_token: refresh_token.map(Secret::new),
            expires_at,
        }))
    }

    /// Deletes the token for an owner and provider. Returns whether a row existed.
    pub fn delete(&self, owner_id: &str, provider: OAuthProvider) -> Result<bool> {
        let rows_affected = db::lock(&self.conn)?
            .execute(
                "DELETE FROM oauth_tokens WHERE owner_id = ?1 AND provider = ?2",
                params![owner_id, provider.as_str()],
            )
            .context("Failed to delete OAuth token")?;

        Ok(rows_affected > 0)
    }

    /// Lists the providers an owner currently holds tokens for.
    pub fn list_by_owner(&self, owner_id: &str) -> Result<Vec<String>> {
        let conn = db::lock(&self.conn)?;
        let mut stmt = conn
            .prepare("SELECT provider FROM oauth_tokens WHERE owner_id = ?1 ORDER BY provider")
            .context("Failed to prepare query")?;

        let providers = stmt
            .query_map(params![owner_id], |row| row.get(0))
            .context("Failed to execute query")?
            .collect::<Result<Vec<String>, _>>()
            .context("Failed to read results")?;

        Ok(providers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn create_test_store() -> TokenStore {
        let cipher = Cipher::from_bytes(&[0u8; 32]).unwrap();
        TokenStore::new(":memory:", cipher).expect("Failed to create test store")
    }

    fn create_test_token(access: &str) -> OAuthToken {
        OAuthToken {
            access_token: Secret::from(access),
            refresh_token: Some(Secret::from("refresh-token-67890")),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        }
    }

    #[test]
    fn test_upsert_and_get() {
        let store = create_test_store();
        store
            .upsert("user1", OAuthProvider::GoogleDrive, &create_test_token("access-1"))
            .expect("Failed to store");

        let token = store
            .get("user1", OAuthProvider::GoogleDrive)
            .expect("Failed to get")
            .expect("Token not found");

        assert_eq!(token.access_token.expose(), "access-1");
        assert_eq!(
            token.refresh_token.as_ref().map(|t| t.expose().as_str()),
            Some("refresh-token-67890")
        );
        assert!(token.expires_at.is_some());
    }

    #[test]
    fn test_get_nonexistent() {
        let store = create_test_store();
        assert!(store.get("user1", OAuthProvider::OneDrive).unwrap().is_none());
    }

    #[test]
    fn test_repeated_upsert_keeps_single_row() {
        let store = create_test_store();

        for i in 0..5 {
            store
                .upsert(
                    "user1",
                    OAuthProvider::GoogleDrive,
                    &create_test_token(&format!("access-{}", i)),
                )
                .unwrap();
        }

        assert_eq!(store.list_by_owner("user1").unwrap(), vec!["google_drive"]);
        let token = store.get("user1", OAuthProvider::GoogleDrive).unwrap().unwrap();
        assert_eq!(token.access_token.expose(), "access-4");
    }

    #[test]
    fn test_tokens_are_scoped_by_owner_and_provider() {
        let store = create_test_store();
        store
            .upsert("user1", OAuthProvider::GoogleDrive, &create_test_token("a"))
            .unwrap();
        store
            .upsert("user1", OAuthProvider::OneDrive, &create_test_token("b"))
            .unwrap();
        store
            .upsert("user2", OAuthProvider::GoogleDrive, &create_test_token("c"))
            .unwrap();

        assert_eq!(
            store.list_by_owner("user1").unwrap(),
            vec!["google_drive", "onedrive"]
        );
        assert_eq!(store.list_by_owner("user2").unwrap(), vec!["google_drive"]);
        assert!(store.list_by_owner("user3").unwrap().is_empty());
    }

    #[test]
    fn test_token_without_refresh_or_expiry() {
        let store = create_test_store();
        let token = OAuthToken {
            access_token: Secret::from("access-only"),
            refresh_token: None,
            expires_at: None,
        };
        store.upsert("user1", OAuthProvider::OneDrive, &token).unwrap();

        let stored = store.get("user1", OAuthProvider::OneDrive).unwrap().unwrap();
        assert_eq!(stored.access_token.expose(), "access-only");
        assert!(stored.refresh_token.is_none());
        assert!(stored.expires_at.is_none());
    }

    #[test]
    fn test_delete() {
        let store = create_test_store();
        store
            .upsert("user1", OAuthProvider::GoogleDrive, &create_test_token("a"))
            .unwrap();

        assert!(store.delete("user1", OAuthProvider::GoogleDrive).unwrap());
        assert!(store.get("user1", OAuthProvider::GoogleDrive).unwrap().is_none());
        assert!(!store.delete("user1", OAuthProvider::GoogleDrive).unwrap());
    }
}
