use sha2::{Digest, Sha256};

/// Derive the cache key for a request.
///
/// Query parameters are sorted first, so `?a=1&b=2` and `?b=2&a=1` share
/// an entry.
pub fn cache_key(base_url: &str, path: &str, query: &[(String, String)]) -> String {
    let mut params: Vec<&(String, String)> = query.iter().collect();
    params.sort();

    let mut hasher = Sha256::new();
    hasher.update(base_url.trim_end_matches('/').as_bytes());
    hasher.update(b"\n");
    hasher.update(path.as_bytes());
    hasher.update(b"\n");
    for (i, (name, value)) in params.iter().enumerate() {
        if i > 0 {
            hasher.update(b"&");
        }
        hasher.update(name.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
    }
    hex::encode(hasher.finalize())
}
