//! Property-based tests for cache key normalization.

use std::collections::BTreeMap;

use proptest::prelude::*;
use reqwest::Method;

use inat_session::cache::CacheKey;

const BASE_URL: &str = "https://api.inaturalist.org/v1/observations";

/// Distinct parameter names with arbitrary values.
fn arb_params() -> impl Strategy<Value = Vec<(String, String)>> {
    proptest::collection::btree_map("[a-z_]{1,12}", "[A-Za-z0-9 ,.&=|-]{0,20}", 0..8)
        .prop_map(|map: BTreeMap<String, String>| map.into_iter().collect())
}

fn key(method: &Method, params: &[(String, String)]) -> CacheKey {
    CacheKey::from_parts(method, BASE_URL, params).expect("valid URL")
}

proptest! {
    /// Parameter order never changes the key.
    #[test]
    fn key_is_order_independent(
        (params, shuffled) in arb_params()
            .prop_flat_map(|p| (Just(p.clone()), Just(p).prop_shuffle()))
    ) {
        prop_assert_eq!(key(&Method::GET, &params), key(&Method::GET, &shuffled));
    }

    /// An access token in the query string never changes the key.
    #[test]
    fn access_token_is_ignored(params in arb_params(), token in "[A-Za-z0-9]{8,32}") {
        prop_assume!(!params.iter().any(|(k, _)| k == "access_token"));
        let mut with_token = params.clone();
        with_token.push(("access_token".to_string(), token));
        prop_assert_eq!(key(&Method::GET, &params), key(&Method::GET, &with_token));
    }

    /// Changing any parameter value changes the key.
    #[test]
    fn different_values_differ(params in arb_params(), extra in "[A-Za-z0-9]{1,10}") {
        prop_assume!(!params.is_empty() && params[0].0 != "access_token");
        let mut changed = params.clone();
        changed[0].1.push_str(&extra);
        prop_assert_ne!(key(&Method::GET, &params), key(&Method::GET, &changed));
    }

    /// Distinct parameter sets never share a digest, even when values
    /// contain query separators.
    #[test]
    fn distinct_params_have_distinct_digests(a in arb_params(), b in arb_params()) {
        prop_assume!(a != b);
        prop_assume!(!a.iter().chain(&b).any(|(k, _)| k == "access_token"));
        let (key_a, key_b) = (key(&Method::GET, &a), key(&Method::GET, &b));
        prop_assert_ne!(key_a.as_str(), key_b.as_str());
    }

    /// The method is part of the key.
    #[test]
    fn method_is_part_of_key(params in arb_params()) {
        prop_assert_ne!(key(&Method::GET, &params), key(&Method::HEAD, &params));
    }
}

#[test]
fn key_digest_is_stable_hex() {
    let k = key(&Method::GET, &[("q".to_string(), "owl".to_string())]);
    assert_eq!(k.as_str().len(), 32);
    assert!(k.as_str().chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(k.as_str(), key(&Method::GET, &[("q".to_string(), "owl".to_string())]).as_str());
}

#[test]
fn host_case_is_normalized() {
    let lower = CacheKey::from_parts(&Method::GET, BASE_URL, &[]).unwrap();
    let upper =
        CacheKey::from_parts(&Method::GET, "https://API.iNaturalist.org/v1/observations", &[])
            .unwrap();
    assert_eq!(lower, upper);
}
