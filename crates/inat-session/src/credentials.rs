//! Credential lookup.
//!
//! A [`CredentialStore`] maps `(service, account)` pairs to secret strings.
//! The session only ever sees the resulting [`AccessToken`].

use std::collections::HashMap;
use std::sync::RwLock;

use crate::error::CredentialError;

/// Service name credentials are stored under.
pub const SERVICE_NAME: &str = "inaturalist";

/// Opaque API access token. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken(String);

impl AccessToken {
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// `Authorization` header value.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.0)
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Secret storage keyed by service and account name.
pub trait CredentialStore: Send + Sync {
    /// Look up a secret. `Ok(None)` when nothing is stored.
    fn get(&self, service: &str, account: &str) -> Result<Option<String>, CredentialError>;

    /// Store a secret.
    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), CredentialError>;
}

/// Read-only store backed by `INAT_<ACCOUNT>` environment variables.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvCredentials;

impl EnvCredentials {
    fn var_name(account: &str) -> String {
        format!("INAT_{}", account.to_uppercase())
    }
}

impl CredentialStore for EnvCredentials {
    fn get(&self, _service: &str, account: &str) -> Result<Option<String>, CredentialError> {
        Ok(std::env::var(Self::var_name(account)).ok().filter(|v| !v.is_empty()))
    }

    fn set(&self, _service: &str, _account: &str, _secret: &str) -> Result<(), CredentialError> {
        Err(CredentialError::ReadOnly)
    }
}

/// In-process store, mainly for tests and embedding applications.
#[derive(Debug, Default)]
pub struct MemoryCredentials {
    secrets: RwLock<HashMap<(String, String), String>>,
}

impl MemoryCredentials {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentials {
    fn get(&self, service: &str, account: &str) -> Result<Option<String>, CredentialError> {
        let secrets =
            self.secrets.read().map_err(|e| CredentialError::Unavailable(e.to_string()))?;
        Ok(secrets.get(&(service.to_owned(), account.to_owned())).cloned())
    }

    fn set(&self, service: &str, account: &str, secret: &str) -> Result<(), CredentialError> {
        let mut secrets =
            self.secrets.write().map_err(|e| CredentialError::Unavailable(e.to_string()))?;
        secrets.insert((service.to_owned(), account.to_owned()), secret.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_token_debug_redacted() {
        let token = AccessToken::new("super-secret");
        assert!(!format!("{token:?}").contains("super-secret"));
        assert_eq!(token.bearer(), "Bearer super-secret");
    }

    #[test]
    fn test_memory_store_roundtrip() {
        let store = MemoryCredentials::new();
        assert_eq!(store.get(SERVICE_NAME, "username").unwrap(), None);
        store.set(SERVICE_NAME, "username", "naturalist").unwrap();
        assert_eq!(store.get(SERVICE_NAME, "username").unwrap().as_deref(), Some("naturalist"));
        assert_eq!(store.get("other", "username").unwrap(), None);
    }

    #[test]
    fn test_env_store_is_read_only() {
        assert_eq!(EnvCredentials.set(SERVICE_NAME, "username", "x"), Err(CredentialError::ReadOnly));
        assert_eq!(EnvCredentials::var_name("app_secret"), "INAT_APP_SECRET");
    }
}
