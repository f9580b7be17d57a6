//! Cache key normalization.
//!
//! A key covers the method, the URL without its query, and the query
//! parameters sorted by name then value. Headers never contribute, so
//! `Authorization` does not split the cache per user.

use md5::{Digest, Md5};
use reqwest::Method;
use url::Url;

/// Query parameters dropped before keying.
pub const IGNORED_PARAMETERS: &[&str] = &["access_token"];

/// Normalized request identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    method: String,
    url: String,
    params: Vec<(String, String)>,
    digest: String,
}

impl CacheKey {
    /// Build a key from a request URL that already carries its query string.
    #[must_use]
    pub fn new(method: &Method, url: &Url) -> Self {
        let mut base = url.clone();
        base.set_query(None);
        base.set_fragment(None);

        let mut params: Vec<(String, String)> = url
            .query_pairs()
            .filter(|(k, _)| !IGNORED_PARAMETERS.iter().any(|ignored| k == ignored))
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        params.sort();

        let method = method.as_str().to_uppercase();
        let url = base.to_string();
        let digest = digest(&method, &url, &params);
        Self { method, url, params, digest }
    }

    /// Build a key from a URL string and separate parameters.
    pub fn from_parts(
        method: &Method,
        url: &str,
        params: &[(String, String)],
    ) -> Result<Self, url::ParseError> {
        let mut url = Url::parse(url)?;
        if !params.is_empty() {
            url.query_pairs_mut().extend_pairs(params);
        }
        Ok(Self::new(method, &url))
    }

    /// Hex digest used as the storage key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.digest
    }

    #[must_use]
    pub fn method(&self) -> &str {
        &self.method
    }

    /// URL without query or fragment.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Sorted, filtered query parameters.
    #[must_use]
    pub fn params(&self) -> &[(String, String)] {
        &self.params
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.digest)
    }
}

fn digest(method: &str, url: &str, params: &[(String, String)]) -> String {
    let mut hasher = Md5::new();
    update_field(&mut hasher, method);
    update_field(&mut hasher, url);
    for (k, v) in params {
        update_field(&mut hasher, k);
        update_field(&mut hasher, v);
    }
    format!("{:x}", hasher.finalize())
}

/// Length-prefixed, so no field content can imitate a separator.
fn update_field(hasher: &mut Md5, field: &str) {
    hasher.update((field.len() as u64).to_le_bytes());
    hasher.update(field.as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(method: Method, url: &str) -> CacheKey {
        CacheKey::new(&method, &Url::parse(url).unwrap())
    }

    #[test]
    fn test_param_order_independent() {
        let a = key(Method::GET, "https://api.inaturalist.org/v1/taxa?a=1&b=2");
        let b = key(Method::GET, "https://api.inaturalist.org/v1/taxa?b=2&a=1");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), b.as_str());
    }

    #[test]
    fn test_method_distinguishes() {
        let get = key(Method::GET, "https://api.inaturalist.org/v1/taxa");
        let head = key(Method::HEAD, "https://api.inaturalist.org/v1/taxa");
        assert_ne!(get.as_str(), head.as_str());
    }

    #[test]
    fn test_host_case_insensitive_path_case_sensitive() {
        let a = key(Method::GET, "https://API.iNaturalist.org/v1/taxa");
        let b = key(Method::GET, "https://api.inaturalist.org/v1/taxa");
        let c = key(Method::GET, "https://api.inaturalist.org/v1/Taxa");
        assert_eq!(a, b);
        assert_ne!(b, c);
    }

    #[test]
    fn test_access_token_ignored() {
        let a = key(Method::GET, "https://api.inaturalist.org/v1/users/me?access_token=abc");
        let b = key(Method::GET, "https://api.inaturalist.org/v1/users/me");
        assert_eq!(a, b);
    }

    #[test]
    fn test_param_values_distinguish() {
        let a = key(Method::GET, "https://api.inaturalist.org/v1/taxa?q=owl");
        let b = key(Method::GET, "https://api.inaturalist.org/v1/taxa?q=hawk");
        assert_ne!(a, b);
    }

    #[test]
    fn test_from_parts_matches_query_string() {
        let parts = CacheKey::from_parts(
            &Method::GET,
            "https://api.inaturalist.org/v1/taxa",
            &[("per_page".into(), "10".into()), ("q".into(), "owl".into())],
        )
        .unwrap();
        let inline = key(Method::GET, "https://api.inaturalist.org/v1/taxa?q=owl&per_page=10");
        assert_eq!(parts, inline);
        assert_eq!(parts.params().len(), 2);
        assert_eq!(parts.url(), "https://api.inaturalist.org/v1/taxa");
    }

    #[test]
    fn test_separator_in_value_does_not_collide() {
        let url = "https://api.inaturalist.org/v1/taxa";
        let joined = CacheKey::from_parts(&Method::GET, url, &[("a".into(), "1&b=2".into())])
            .unwrap();
        let split = CacheKey::from_parts(
            &Method::GET,
            url,
            &[("a".into(), "1".into()), ("b".into(), "2".into())],
        )
        .unwrap();
        assert_ne!(joined.as_str(), split.as_str());

        let eq = CacheKey::from_parts(&Method::GET, url, &[("a=1".into(), "".into())]).unwrap();
        let plain = CacheKey::from_parts(&Method::GET, url, &[("a".into(), "1".into())]).unwrap();
        assert_ne!(eq.as_str(), plain.as_str());
    }
}
