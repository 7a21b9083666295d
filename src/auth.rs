//! Authorization strategies for the dial handshake.
//!
//! The gateway authenticates each channel at WebSocket upgrade time via an
//! `Authorization` header. Token acquisition lives behind [`AuthProvider`] so
//! callers can plug in static tokens, Basic credentials, or a refreshing
//! bearer source without the client caring which.

use crate::error::Result;

/// Acquires an authorization header value (e.g. `"Basic ..."` or `"Bearer ..."`).
///
/// An empty value or an error means no `Authorization` header is sent.
pub trait AuthProvider: Send + Sync {
    /// Produce the current header value.
    fn authorization_value(&self) -> Result<String>;
}

/// [`AuthProvider`] backed by a pre-specified token value.
#[derive(Debug, Clone)]
pub struct StaticAuth {
    /// The literal header value to present.
    pub value: String,
}

impl StaticAuth {
    /// Create a provider for a fixed header value.
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
        }
    }
}

impl AuthProvider for StaticAuth {
    fn authorization_value(&self) -> Result<String> {
        Ok(self.value.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_auth_returns_value() {
        let auth = StaticAuth::new("Bearer abc123");
        assert_eq!(auth.authorization_value().unwrap(), "Bearer abc123");
    }

    #[test]
    fn static_auth_empty_value() {
        let auth = StaticAuth::new("");
        assert_eq!(auth.authorization_value().unwrap(), "");
    }
}
