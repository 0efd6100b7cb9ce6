//! Canonical request keys
//!
//! Logically identical requests must collide to the same key regardless of
//! query-parameter order or JSON object key order. The key is built from the
//! method, the normalized URL, the normalized body and a configurable set of
//! headers. Long keys are condensed to a readable prefix plus a 64-bit hash.

use std::collections::BTreeMap;
use std::fmt::{self, Write as _};

use serde_json::Value;
use url::Url;
use waypoint_domain::constants::{CACHE_KEY_MAX_LEN, CACHE_KEY_PREFIX_LEN};
use waypoint_domain::HttpMethod;

// Fixed seeds keep fingerprints stable for the lifetime of the process and
// across instances.
const HASH_SEEDS: (u64, u64, u64, u64) =
    (0x243f_6a88_85a3_08d3, 0x1319_8a2e_0370_7344, 0xa409_3822_299f_31d0, 0x082e_fa98_ec4e_6c89);

/// Identity of a request for caching and deduplication
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub method: HttpMethod,
    /// Normalized path component, used for resource-scoped invalidation
    pub path: String,
    /// Canonical string, condensed when long
    pub fingerprint: String,
}

impl CacheKey {
    /// Derive the canonical key for a request
    ///
    /// Only headers named in `vary_headers` (case-insensitive) participate.
    pub fn derive(
        method: HttpMethod,
        url: &str,
        body: Option<&Value>,
        headers: &BTreeMap<String, String>,
        vary_headers: &[String],
    ) -> Self {
        let (path, normalized_url) = normalize_url(url);

        let mut canonical = format!("{} {}", method.as_str(), normalized_url);

        if let Some(body) = body {
            canonical.push('|');
            write_canonical_json(body, &mut canonical);
        }

        let mut varying: Vec<(String, &str)> = headers
            .iter()
            .map(|(name, value)| (name.to_ascii_lowercase(), value.as_str()))
            .filter(|(name, _)| vary_headers.iter().any(|v| v.eq_ignore_ascii_case(name)))
            .collect();
        varying.sort();
        for (name, value) in varying {
            let _ = write!(canonical, "|{name}={value}");
        }

        Self { method, path, fingerprint: condense(canonical) }
    }

    /// Whether this key belongs to the resource at `resource_path`
    ///
    /// Related means one path is a segment-wise prefix of the other, so a
    /// mutation of `/items/7` relates to `/items/7`, `/items/7/notes` and the
    /// `/items` collection.
    pub fn is_related_to(&self, resource_path: &str) -> bool {
        paths_related(&self.path, resource_path)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fingerprint)
    }
}

/// Path component of a URL, normalized the same way as in [`CacheKey`]
pub fn resource_path(url: &str) -> String {
    normalize_url(url).0
}

/// Segment-wise prefix relation in either direction
pub fn paths_related(a: &str, b: &str) -> bool {
    let left: Vec<&str> = a.split('/').filter(|s| !s.is_empty()).collect();
    let right: Vec<&str> = b.split('/').filter(|s| !s.is_empty()).collect();
    if left.is_empty() || right.is_empty() {
        return left.is_empty() && right.is_empty();
    }
    left.iter().zip(right.iter()).all(|(l, r)| l == r)
}

fn normalize_url(raw: &str) -> (String, String) {
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_fragment(None);
            let sorted = sorted_query(url.query());
            url.set_query(sorted.as_deref());
            let path = trim_trailing_slash(url.path());
            (path, url.to_string())
        }
        // Relative URLs (`/profile?b=2&a=1`) are normalized by hand.
        Err(_) => {
            let without_fragment = raw.split('#').next().unwrap_or_default();
            let (path, query) = match without_fragment.split_once('?') {
                Some((path, query)) => (path, Some(query)),
                None => (without_fragment, None),
            };
            let path = trim_trailing_slash(path);
            let normalized = match sorted_query(query) {
                Some(query) => format!("{path}?{query}"),
                None => path.clone(),
            };
            (path, normalized)
        }
    }
}

fn trim_trailing_slash(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

fn sorted_query(query: Option<&str>) -> Option<String> {
    let query = query.filter(|q| !q.is_empty())?;
    let mut pairs: Vec<(String, String)> = url::form_urlencoded::parse(query.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    for (k, v) in &pairs {
        serializer.append_pair(k, v);
    }
    Some(serializer.finish())
}

/// Serialize JSON with object keys sorted at every depth
fn write_canonical_json(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(inner) = map.get(key) {
                    write_canonical_json(inner, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical_json(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

fn condense(canonical: String) -> String {
    if canonical.len() <= CACHE_KEY_MAX_LEN {
        return canonical;
    }
    let state = ahash::RandomState::with_seeds(HASH_SEEDS.0, HASH_SEEDS.1, HASH_SEEDS.2, HASH_SEEDS.3);
    let digest = state.hash_one(canonical.as_str());
    let mut cut = CACHE_KEY_PREFIX_LEN.min(canonical.len());
    while !canonical.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}#{digest:016x}", &canonical[..cut])
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn vary() -> Vec<String> {
        vec!["accept".to_string()]
    }

    #[test]
    fn test_query_order_does_not_matter() {
        let a = CacheKey::derive(
            HttpMethod::Get,
            "https://api.example.com/items?b=2&a=1",
            None,
            &BTreeMap::new(),
            &vary(),
        );
        let b = CacheKey::derive(
            HttpMethod::Get,
            "https://api.example.com/items?a=1&b=2",
            None,
            &BTreeMap::new(),
            &vary(),
        );
        assert_eq!(a, b);
        assert_eq!(a.path, "/items");
    }

    #[test]
    fn test_relative_urls_are_normalized() {
        let a = CacheKey::derive(HttpMethod::Get, "/items/?z=1&y=2#top", None, &BTreeMap::new(), &[]);
        let b = CacheKey::derive(HttpMethod::Get, "/items?y=2&z=1", None, &BTreeMap::new(), &[]);
        assert_eq!(a, b);
        assert_eq!(a.fingerprint, "GET /items?y=2&z=1");
    }

    #[test]
    fn test_nested_body_key_order_does_not_matter() {
        let first = json!({ "b": { "y": 1, "x": [ { "q": 1, "p": 2 } ] }, "a": "v" });
        let second = json!({ "a": "v", "b": { "x": [ { "p": 2, "q": 1 } ], "y": 1 } });
        let a = CacheKey::derive(HttpMethod::Get, "/search", Some(&first), &BTreeMap::new(), &[]);
        let b = CacheKey::derive(HttpMethod::Get, "/search", Some(&second), &BTreeMap::new(), &[]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_array_order_matters() {
        let a = CacheKey::derive(HttpMethod::Get, "/s", Some(&json!([1, 2])), &BTreeMap::new(), &[]);
        let b = CacheKey::derive(HttpMethod::Get, "/s", Some(&json!([2, 1])), &BTreeMap::new(), &[]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_only_vary_headers_participate() {
        let mut with_auth = BTreeMap::new();
        with_auth.insert("authorization".to_string(), "Bearer one".to_string());
        let mut other_auth = BTreeMap::new();
        other_auth.insert("authorization".to_string(), "Bearer two".to_string());
        let a = CacheKey::derive(HttpMethod::Get, "/me", None, &with_auth, &vary());
        let b = CacheKey::derive(HttpMethod::Get, "/me", None, &other_auth, &vary());
        assert_eq!(a, b);

        let mut accept = BTreeMap::new();
        accept.insert("Accept".to_string(), "text/csv".to_string());
        let c = CacheKey::derive(HttpMethod::Get, "/me", None, &accept, &vary());
        assert_ne!(a, c);
    }

    #[test]
    fn test_long_keys_are_condensed() {
        let long_query: String = (0..60).map(|i| format!("k{i}=v{i}&")).collect();
        let url = format!("https://api.example.com/reports?{long_query}");
        let key = CacheKey::derive(HttpMethod::Get, &url, None, &BTreeMap::new(), &[]);
        assert!(key.fingerprint.len() <= CACHE_KEY_PREFIX_LEN + 17);
        assert!(key.fingerprint.starts_with("GET https://api.example.com/reports"));
        assert!(key.fingerprint.contains('#'));

        let again = CacheKey::derive(HttpMethod::Get, &url, None, &BTreeMap::new(), &[]);
        assert_eq!(key, again);
    }

    #[test]
    fn test_paths_related() {
        assert!(paths_related("/resource/123", "/resource/123"));
        assert!(paths_related("/resource/123/notes", "/resource/123"));
        assert!(paths_related("/resource", "/resource/123"));
        assert!(!paths_related("/resource/1234", "/resource/123"));
        assert!(!paths_related("/res", "/resource"));
        assert!(!paths_related("/other", "/resource/123"));
    }
}
