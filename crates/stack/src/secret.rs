//! Write-only secret values.
//!
//! A [`Secret`] can be handed to a provider but never read back into the
//! declared graph: `Debug` and `Display` print a redaction marker, `Serialize`
//! writes the same marker, and there is deliberately no `Deserialize` impl, so
//! persisted state can never round-trip a plaintext value into a resource.
//! Consumers that genuinely need the plaintext (a provider adapter sending it
//! to the cloud API) call [`Secret::expose`].

use secrecy::{ExposeSecret, SecretString};
use serde::{Serialize, Serializer};

/// What a secret looks like in every serialized or printed form.
pub const REDACTED: &str = "[secret]";

/// A secret configuration value.
#[derive(Clone)]
pub struct Secret(SecretString);

impl Secret {
    /// Wraps a plaintext value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(SecretString::from(value.into()))
    }

    /// Returns the plaintext.
    ///
    /// Only provider adapters should call this, and only to send the value to
    /// the service that stores it.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }

    /// Returns `true` if the plaintext is empty.
    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Secret({REDACTED})")
    }
}

impl std::fmt::Display for Secret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(REDACTED)
    }
}

impl Serialize for Secret {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REDACTED)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_and_display_redact() {
        let secret = Secret::new("ghp_plaintext");
        assert_eq!(format!("{secret:?}"), "Secret([secret])");
        assert_eq!(secret.to_string(), "[secret]");
    }

    #[test]
    fn serializes_as_marker() {
        let secret = Secret::new("ghp_plaintext");
        let json = serde_json::to_string(&secret).unwrap();
        assert_eq!(json, "\"[secret]\"");
        assert!(!json.contains("ghp_plaintext"));
    }

    #[test]
    fn expose_returns_plaintext() {
        assert_eq!(Secret::from("abc").expose(), "abc");
        assert!(Secret::from("").is_empty());
    }
}
