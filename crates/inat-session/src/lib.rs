//! iNaturalist client session
//!
//! A cached, rate-limited HTTP session for the iNaturalist API. Every request
//! goes through one [`ClientSession`], which serves fresh responses from a
//! local cache and otherwise waits for rate budget before calling the API.
//!
//! # Features
//!
//! - **Cached**: memory (moka) or SQLite backends, per-URL expiration rules
//! - **Rate-limited**: per-host token buckets for second, minute and day windows
//! - **Async-first**: built on Tokio; sessions are cheap to clone and share
//! - **Paginated**: page- and ID-based pagination with streaming
//!
//! # Example
//!
//! ```no_run
//! use inat_session::{ApiRequest, ClientSession, SessionConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = ClientSession::new(SessionConfig::from_env()?)?;
//!
//!     let request = ApiRequest::get(session.v1_url("taxa")).param("q", "Bubo");
//!     let response = session.request(request).await?;
//!     let taxa: serde_json::Value = response.json()?;
//!     println!("{}", taxa["total_results"]);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod paginator;
pub mod paths;
pub mod ratelimit;
pub mod request;
pub mod response;
pub mod session;

pub use config::{CacheBackendConfig, DryRun, Expiration, RateLimitConfig, SessionConfig};
pub use credentials::AccessToken;
pub use error::{CacheError, ClientError, ClientResult, ConfigError, FailureKind};
pub use paginator::{IdPaginator, PaginationMethod, Paginator};
pub use request::ApiRequest;
pub use response::ApiResponse;
pub use session::ClientSession;
