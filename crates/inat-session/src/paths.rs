//! Platform-specific storage locations.

use std::path::PathBuf;

/// Application directory name under the platform cache dir.
pub const APP_NAME: &str = "inaturalist";

/// Cache directory, e.g. `~/.cache/inaturalist` on Linux.
///
/// Falls back to `./.cache/inaturalist` when the platform has no cache dir.
#[must_use]
pub fn cache_dir() -> PathBuf {
    dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache")).join(APP_NAME)
}

/// Default SQLite response cache file.
#[must_use]
pub fn cache_file() -> PathBuf {
    cache_dir().join("api_requests.db")
}
