//! AES-256-GCM sealing for values stored at rest.
//!
//! Used for OAuth tokens and for destination config blobs. Every call to
//! [`Cipher::seal`] draws a fresh random nonce.

use aes_gcm::{
    aead::{Aead, AeadCore, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use anyhow::{anyhow, Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

/// Size of the encryption key in bytes (256 bits)
const KEY_SIZE: usize = 32;

/// Size of the nonce in bytes (96 bits, standard for GCM)
const NONCE_SIZE: usize = 12;

/// Base64-encoded ciphertext plus the nonce needed to open it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sealed {
    pub ciphertext: String,
    pub nonce: String,
}

/// Decodes a base64 master key and checks it is exactly 32 bytes.
pub fn parse_key(key_base64: &str) -> Result<Vec<u8>> {
    let key_bytes = BASE64
        .decode(key_base64.trim())
        .context("Failed to decode base64 encryption key")?;

    if key_bytes.len() != KEY_SIZE {
        return Err(anyhow!(
            "Encryption key must be {} bytes (256 bits), got {} bytes",
            KEY_SIZE,
            key_bytes.len()
        ));
    }

    Ok(key_bytes)
}

/// Symmetric cipher shared by the stores. Cheap to clone.
#[derive(Clone)]
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl Cipher {
    /// Builds a cipher from a base64-encoded 32-byte master key.
    pub fn from_base64_key(key_base64: &str) -> Result<Self> {
        let key = parse_key(key_base64).context("Invalid encryption key")?;
        Self::from_bytes(&key)
    }

    pub fn from_bytes(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(anyhow!("Encryption key must be {} bytes", KEY_SIZE));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| anyhow!("Failed to create cipher: {}", e))?;
        Ok(Self { cipher })
    }

    /// Encrypts `plaintext` under a new random nonce.
    pub fn seal(&self, plaintext: &str) -> Result<Sealed> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|e| anyhow!("Encryption failed: {}", e))?;

        Ok(Sealed {
            ciphertext: BASE64.encode(ciphertext),
            nonce: BASE64.encode(nonce),
        })
    }

    /// Decrypts a value produced by [`Cipher::seal`]. Fails on a wrong key,
    /// a mismatched nonce or tampered ciphertext.
    pub fn open(&self, sealed: &Sealed) -> Result<String> {
        let ciphertext = BASE64
            .decode(&sealed.ciphertext)
            .context("Failed to decode ciphertext")?;
        let nonce_bytes = BASE64.decode(&sealed.nonce).context("Failed to decode nonce")?;

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(anyhow!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            ));
        }

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|e| anyhow!("Decryption failed (wrong key or corrupted data): {}", e))?;

        String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> Cipher {
        Cipher::from_bytes(&[7u8; 32]).unwrap()
    }

    #[test]
    fn test_key_validation() {
        assert!(parse_key(&BASE64.encode([0u8; 32])).is_ok());
        assert!(parse_key(&BASE64.encode([0u8; 16])).is_err());
        assert!(parse_key(&BASE64.encode([0u8; 64])).is_err());
        assert!(parse_key("not-valid-base64!@#$").is_err());
    }

    #[test]
    fn test_seal_then_open() {
        let cipher = test_cipher();
        let sealed = cipher.seal(r#"{"password":"pw"}"#).unwrap();

        assert!(!sealed.ciphertext.contains("password"));
        assert_eq!(cipher.open(&sealed).unwrap(), r#"{"password":"pw"}"#);
    }

    #[test]
    fn test_nonce_differs_per_seal() {
        let cipher = test_cipher();
        let a = cipher.seal("same").unwrap();
        let b = cipher.seal("same").unwrap();

        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn test_wrong_key_fails() {
        let sealed = test_cipher().seal("secret").unwrap();
        let other = Cipher::from_bytes(&[1u8; 32]).unwrap();
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = test_cipher();
        let mut sealed = cipher.seal("secret").unwrap();
        sealed.ciphertext.push('X');
        assert!(cipher.open(&sealed).is_err());
    }
}
