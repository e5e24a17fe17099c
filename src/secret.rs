//! Redacting wrapper for credential material.
//!
//! Any value wrapped in [`Secret`] prints and serializes as `[REDACTED]`.
//! The only way to read it is [`Secret::expose`], so a new sensitive field is
//! protected by its type rather than by matching field names before logging.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

const REDACTED: &str = "[REDACTED]";

/// A value that must never reach logs, audit details or API responses.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Secret<T>(T);

impl<T> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Borrows the wrapped value. Call sites should pass it straight to the
    /// transport or cipher that needs it.
    pub fn expose(&self) -> &T {
        &self.0
    }

    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> From<T> for Secret<T> {
    fn from(value: T) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret<String> {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl<T> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", REDACTED)
    }
}

impl<T> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(REDACTED)
    }
}

impl<T> Serialize for Secret<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Secret<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Secret)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Serialize)]
    struct Login {
        user: String,
        password: Secret<String>,
    }

    #[test]
    fn test_serialize_redacts_value() {
        let login = Login {
            user: "alice".to_string(),
            password: Secret::from("hunter2"),
        };

        let json = serde_json::to_string(&login).unwrap();
        assert!(json.contains("\"user\":\"alice\""));
        assert!(json.contains("\"password\":\"[REDACTED]\""));
        assert!(!json.contains("hunter2"));
    }

    #[test]
    fn test_debug_and_display_redact_value() {
        let secret: Secret<String> = Secret::from("top-secret");
        assert_eq!(format!("{:?}", secret), "Secret([REDACTED])");
        assert_eq!(secret.to_string(), "[REDACTED]");
    }

    #[test]
    fn test_deserialize_keeps_value() {
        let secret: Secret<String> = serde_json::from_str("\"abc\"").unwrap();
        assert_eq!(secret.expose(), "abc");
    }
}
