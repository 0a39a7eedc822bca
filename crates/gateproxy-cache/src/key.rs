//! Cache key derivation.

use std::fmt;

use sha2::{Digest, Sha256};

/// A namespaced cache key: `<namespace>:<hex sha256>`.
///
/// The digest covers the identity token and the request payload. The token
/// is length-prefixed so that moving bytes across the token/payload
/// boundary always changes the digest. No per-process salt is mixed in, so
/// keys are stable across restarts and shared between gateway instances.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    pub fn derive(namespace: &str, identity_token: &str, payload: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update((identity_token.len() as u64).to_be_bytes());
        hasher.update(identity_token.as_bytes());
        hasher.update(payload);
        let digest = hex::encode(hasher.finalize());
        Self(format!("{namespace}:{digest}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hex digest without the namespace prefix.
    pub fn digest(&self) -> &str {
        self.0.rsplit_once(':').map_or(&self.0, |(_, d)| d)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_inputs_same_key() {
        let a = CacheKey::derive("ns", "token", b"{ me { id } }");
        let b = CacheKey::derive("ns", "token", b"{ me { id } }");
        assert_eq!(a, b);
    }

    #[test]
    fn test_key_shape() {
        let key = CacheKey::derive("gql_cache", "token", b"payload");
        assert!(key.as_str().starts_with("gql_cache:"));
        assert_eq!(key.digest().len(), 64);
        assert!(key.digest().chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_either_input_changes_key() {
        let base = CacheKey::derive("ns", "token-1", b"query");
        assert_ne!(base, CacheKey::derive("ns", "token-2", b"query"));
        assert_ne!(base, CacheKey::derive("ns", "token-1", b"query2"));
        assert_ne!(base, CacheKey::derive("other", "token-1", b"query"));
    }

    #[test]
    fn test_boundary_shift_changes_key() {
        let a = CacheKey::derive("ns", "ab", b"c");
        let b = CacheKey::derive("ns", "a", b"bc");
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_inputs_are_valid() {
        let key = CacheKey::derive("ns", "", b"");
        assert_eq!(key.digest().len(), 64);
    }
}
