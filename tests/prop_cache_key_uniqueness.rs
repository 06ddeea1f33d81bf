//! Property-based tests for cache-key construction
//!
//! Distinct request shapes must never share a cache slot: a 206 entry
//! shadowing a 200 entry, or one query variant shadowing another, would
//! serve wrong bytes straight out of the cache.

use blobedge::models::cache_key;
use proptest::prelude::*;

/// Request paths as they reach the router: no raw '?' or '#', which the
/// HTTP request line reserves for the query split and never transmits
fn path_strategy() -> impl Strategy<Value = String> {
    "/[a-z0-9/._-]{0,32}"
}

fn query_strategy() -> impl Strategy<Value = Option<String>> {
    proptest::option::of("[a-z0-9=&]{1,16}")
}

fn range_strategy() -> impl Strategy<Value = Option<String>> {
    proptest::option::of((0u64..10_000, proptest::option::of(10_000u64..20_000)).prop_map(
        |(start, end)| match end {
            Some(end) => format!("{}-{}", start, end),
            None => format!("{}-", start),
        },
    ))
}

proptest! {
    /// The key is a pure function of its components
    #[test]
    fn key_is_deterministic(
        hash in "[0-9a-f]{64}",
        path in path_strategy(),
        query in query_strategy(),
        range in range_strategy(),
    ) {
        let a = cache_key(&hash, &path, query.as_deref(), range.as_deref());
        let b = cache_key(&hash, &path, query.as_deref(), range.as_deref());
        prop_assert_eq!(a, b);
    }

    /// Distinct component tuples yield distinct keys
    #[test]
    fn distinct_requests_get_distinct_keys(
        hash_a in "[0-9a-f]{64}",
        hash_b in "[0-9a-f]{64}",
        path_a in path_strategy(),
        path_b in path_strategy(),
        query_a in query_strategy(),
        query_b in query_strategy(),
        range_a in range_strategy(),
        range_b in range_strategy(),
    ) {
        let a = cache_key(&hash_a, &path_a, query_a.as_deref(), range_a.as_deref());
        let b = cache_key(&hash_b, &path_b, query_b.as_deref(), range_b.as_deref());

        let same_tuple = hash_a == hash_b
            && path_a == path_b
            && query_a == query_b
            && range_a == range_b;
        prop_assert_eq!(a == b, same_tuple);
    }

    /// A ranged request never collides with the full-object request for
    /// the same hash and path
    #[test]
    fn ranged_key_never_shadows_full_key(
        hash in "[0-9a-f]{64}",
        path in path_strategy(),
        query in query_strategy(),
        range in range_strategy().prop_filter("need a range", Option::is_some),
    ) {
        let full = cache_key(&hash, &path, query.as_deref(), None);
        let ranged = cache_key(&hash, &path, query.as_deref(), range.as_deref());
        prop_assert_ne!(full, ranged);
    }
}
