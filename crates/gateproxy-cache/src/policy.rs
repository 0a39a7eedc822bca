//! Which requests may be served from cache.

/// Decides whether a request payload is a read that may be cached.
pub trait RequestClassifier: Send + Sync {
    fn is_cacheable(&self, payload: &[u8]) -> bool;
}

/// Keyword heuristic for GraphQL payloads.
///
/// Lowercases the payload and looks for operation markers: anything
/// mentioning `mutation` is a write; otherwise `query` or a selection brace
/// marks a read. Everything else is not cached.
///
/// This is best-effort. A query whose text merely contains the word
/// "mutation" (say, in a string argument) is never cached, and a payload
/// with a brace but no real operation is. A parser-backed classifier can
/// replace it without touching the cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordClassifier;

impl RequestClassifier for KeywordClassifier {
    fn is_cacheable(&self, payload: &[u8]) -> bool {
        let text = String::from_utf8_lossy(payload).to_lowercase();
        if text.contains("mutation") {
            return false;
        }
        text.contains("query") || text.contains('{')
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queries_are_cacheable() {
        let classifier = KeywordClassifier;
        assert!(classifier.is_cacheable(br#"{"query":"{ me { id } }"}"#));
        assert!(classifier.is_cacheable(b"QUERY Me { me { id } }"));
        assert!(classifier.is_cacheable(b"{ viewer { name } }"));
    }

    #[test]
    fn test_mutations_are_not_cacheable() {
        let classifier = KeywordClassifier;
        assert!(!classifier.is_cacheable(
            br#"{"query":"mutation { deleteUser(id: 1) { id } }"}"#
        ));
        assert!(!classifier.is_cacheable(b"Mutation Rename { rename }"));
    }

    #[test]
    fn test_unrecognized_payloads_are_not_cacheable() {
        let classifier = KeywordClassifier;
        assert!(!classifier.is_cacheable(b""));
        assert!(!classifier.is_cacheable(b"ping"));
    }
}
