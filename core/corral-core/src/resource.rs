//! Resource identifier derivation.
//!
//! Leases are keyed by a normalized identifier derived deterministically from
//! the target path: a sanitized form for readability plus an md5 digest of
//! the normalized path so distinct resources never collide even after
//! sanitization. The same resource always maps to the same id.

use once_cell::sync::Lazy;
use regex::Regex;

static PATH_SANITIZER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9./_-]+").expect("static pattern"));

/// Digest length kept short for readable lock listings; 48 bits is plenty
/// for a per-deployment resource namespace.
const DIGEST_HEX_LEN: usize = 12;

/// Normalize a raw resource path for consistent hashing and comparison.
///
/// Strips surrounding whitespace and leading `./` segments, collapses
/// repeated slashes, and trims trailing slashes except for root `/`.
pub fn normalize_path(raw: &str) -> String {
    let mut path = raw.trim();
    while let Some(rest) = path.strip_prefix("./") {
        path = rest;
    }

    let mut normalized = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if !last_was_slash {
                normalized.push('/');
            }
            last_was_slash = true;
        } else {
            normalized.push(ch);
            last_was_slash = false;
        }
    }

    let trimmed = normalized.trim_end_matches('/');
    if trimmed.is_empty() {
        if normalized.starts_with('/') {
            "/".to_string()
        } else {
            String::new()
        }
    } else {
        trimmed.to_string()
    }
}

/// Derives the lease key for a resource path.
///
/// Format: `<sanitized-path>#<digest>`. The digest covers the normalized
/// path, so `auth.py` and `./auth.py` share a key while `a/b` and `a_b`
/// do not, despite sanitizing to the same prefix.
pub fn resource_id(raw: &str) -> String {
    let normalized = normalize_path(raw);
    let digest = format!("{:x}", md5::compute(normalized.as_bytes()));
    let sanitized = PATH_SANITIZER.replace_all(&normalized, "_");
    format!("{}#{}", sanitized, &digest[..DIGEST_HEX_LEN])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_path_maps_to_same_id() {
        assert_eq!(resource_id("src/auth.py"), resource_id("src/auth.py"));
    }

    #[test]
    fn normalization_unifies_spellings() {
        assert_eq!(resource_id("./src/auth.py"), resource_id("src/auth.py"));
        assert_eq!(resource_id("src//auth.py"), resource_id("src/auth.py"));
        assert_eq!(resource_id("src/auth.py/"), resource_id("src/auth.py"));
    }

    #[test]
    fn distinct_paths_never_collide_after_sanitization() {
        // Both sanitize to "a_b" but the digest disambiguates.
        let left = resource_id("a b");
        let right = resource_id("a_b");
        assert_ne!(left, right);
        assert!(left.starts_with("a_b#"));
        assert!(right.starts_with("a_b#"));
    }

    #[test]
    fn root_and_empty_paths_are_stable() {
        assert_eq!(normalize_path("///"), "/");
        assert_eq!(normalize_path("   "), "");
        assert_eq!(resource_id("/"), resource_id("//"));
    }

    #[test]
    fn id_keeps_readable_path_prefix() {
        let id = resource_id("tests/test_auth.py");
        assert!(id.starts_with("tests/test_auth.py#"));
        assert_eq!(id.len(), "tests/test_auth.py#".len() + 12);
    }
}
