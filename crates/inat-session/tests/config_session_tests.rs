//! Configuration and session construction tests.

use std::time::Duration;

use inat_session::credentials::{CredentialStore, MemoryCredentials, SERVICE_NAME};
use inat_session::{
    AccessToken, CacheBackendConfig, ClientError, ClientSession, ConfigError, Expiration,
    RateLimitConfig, SessionConfig,
};

// =============================================================================
// Config Behavior Tests
// =============================================================================

#[test]
fn test_config_default_uses_public_api() {
    let config = SessionConfig::default();
    assert_eq!(config.base_url, "https://api.inaturalist.org/v1");
    assert!(matches!(config.cache_backend, CacheBackendConfig::Sqlite { .. }));
    assert_eq!(config.cache_expiration, Expiration::After(Duration::from_secs(1800)));
    assert_eq!(config.rate_limit, RateLimitConfig::default());
    assert!(config.caching_active());
}

#[test]
fn test_default_rate_limits() {
    let limits = RateLimitConfig::default();
    assert_eq!(limits.per_second, 1);
    assert_eq!(limits.burst, 5);
    assert_eq!(limits.per_minute, 60);
    assert_eq!(limits.per_day, 10_000);
    assert!(limits.per_host);
}

#[test]
fn test_credentials_loaded_from_store() {
    let store = MemoryCredentials::new();
    store.set(SERVICE_NAME, "access_token", "abc123").unwrap();

    let config = SessionConfig::default().with_credentials_from(&store);
    assert_eq!(config.credentials, Some(AccessToken::new("abc123")));

    let config = SessionConfig::default().with_credentials_from(&MemoryCredentials::new());
    assert!(config.credentials.is_none());
}

#[test]
fn test_config_debug_hides_token() {
    let config = SessionConfig::default().with_credentials(AccessToken::new("super-secret"));
    assert!(!format!("{config:?}").contains("super-secret"));
}

// =============================================================================
// Session Construction Tests
// =============================================================================

#[test]
fn test_session_creation_succeeds() {
    let session = ClientSession::new(SessionConfig::for_testing("http://127.0.0.1:1"));
    assert!(session.is_ok());
}

#[test]
fn test_session_rejects_zero_per_minute() {
    let config = SessionConfig::for_testing("http://127.0.0.1:1")
        .with_rate_limit(RateLimitConfig { per_minute: 0, ..RateLimitConfig::default() });
    let err = ClientSession::new(config).unwrap_err();
    assert!(matches!(err, ClientError::Config(ConfigError::ZeroRate { field: "per_minute" })));
}

#[test]
fn test_session_rejects_invalid_user_agent() {
    let config = SessionConfig::for_testing("http://127.0.0.1:1").with_user_agent("a\r\nb");
    let err = ClientSession::new(config).unwrap_err();
    assert!(matches!(err, ClientError::Config(ConfigError::InvalidHeader { .. })));
}

#[test]
fn test_session_rejects_relative_base_url() {
    let config = SessionConfig::for_testing("/v1");
    assert!(matches!(
        ClientSession::new(config),
        Err(ClientError::Config(ConfigError::InvalidBaseUrl { .. }))
    ));
}

#[test]
fn test_session_clones_share_state() {
    let session = ClientSession::new(
        SessionConfig::for_testing("http://127.0.0.1:1")
            .enable_client_session()
            .with_rate_limit(RateLimitConfig::per_second(1, 1)),
    )
    .unwrap();
    let cloned = session.clone();

    assert!(session.rate_budget().try_acquire("127.0.0.1").is_ok());
    assert!(cloned.rate_budget().try_acquire("127.0.0.1").is_err());
}

#[test]
fn test_refresh_params_through_session() {
    let session = ClientSession::new(SessionConfig::for_testing("http://127.0.0.1:1")).unwrap();
    let first = session.refresh_params("observations");
    let second = session.refresh_params("observations");
    assert!(first.refresh && second.refresh);
    assert_eq!(first.v, None);
    assert_eq!(second.v, Some(1));
}
