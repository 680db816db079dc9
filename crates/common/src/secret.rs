//! Secret wrapper for bearer tokens and other sensitive strings
//!
//! The wrapped value never appears in `Debug`/`Display` output, so a
//! `Credential` can be logged with `?credential` without leaking tokens.
//! Serialization passes through to the inner value because the credential
//! file has to hold the real token text.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize;

/// Sensitive value - redacted in Debug/Display/logs
pub struct Secret<T: Zeroize>(T);

impl<T: Zeroize> Secret<T> {
    /// Create a new secret value
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value (use sparingly)
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl From<String> for Secret<String> {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Secret<String> {
    fn from(value: &str) -> Self {
        Self::new(value.to_owned())
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Zeroize + PartialEq> PartialEq for Secret<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl<T: Zeroize + Eq> Eq for Secret<T> {}

impl<T: Zeroize + Serialize> Serialize for Secret<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de, T: Zeroize + Deserialize<'de>> Deserialize<'de> for Secret<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        T::deserialize(deserializer).map(Secret::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_redacts_debug_and_display() {
        let secret = Secret::new(String::from("eyJhbGciOi.token"));
        assert_eq!(format!("{secret:?}"), "[REDACTED]");
        assert_eq!(format!("{secret}"), "[REDACTED]");
    }

    #[test]
    fn test_secret_exposes_value() {
        let secret: Secret<String> = "refresh-123".into();
        assert_eq!(secret.expose(), "refresh-123");
    }

    #[test]
    fn test_secret_serializes_inner_value() {
        let secret: Secret<String> = "A1".into();
        assert_eq!(serde_json::to_string(&secret).unwrap(), "\"A1\"");

        let parsed: Secret<String> = serde_json::from_str("\"R1\"").unwrap();
        assert_eq!(parsed.expose(), "R1");
    }

    #[test]
    fn test_secret_equality_compares_inner_values() {
        let a: Secret<String> = "same".into();
        let b: Secret<String> = "same".into();
        let c: Secret<String> = "other".into();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
