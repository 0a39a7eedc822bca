//! Bearer token verification.
//!
//! Tokens are JWTs signed with RS256 by a key published in the
//! [`KeyDirectory`]. Verification proceeds in a fixed order and stops at the
//! first failure:
//!
//! 1. Structure: three base64url segments with a JSON header
//! 2. Algorithm: the header must declare `RS256`, nothing else is accepted
//! 3. Key id: the header must carry a non-empty `kid`
//! 4. Key resolution through the directory (one refetch on a miss)
//! 5. Public key decoding from PEM
//! 6. Signature
//! 7. Temporal claims: `exp` required and not past, `nbf` not in the future
//!
//! The algorithm and `kid` checks read the raw header before any key lookup,
//! so a token declaring `none` or an HMAC algorithm never reaches the
//! directory.

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

use crate::directory::KeyDirectory;

const PINNED_ALGORITHM: &str = "RS256";

// ============================================================================
// Error Types
// ============================================================================

/// Reasons a token is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VerifyError {
    /// The token is not a well-formed JWT, or its claims are unusable.
    #[error("Malformed token: {message}")]
    Malformed {
        /// What was wrong with the token.
        message: String,
    },

    /// The header declares an algorithm other than RS256.
    #[error("Unexpected signing algorithm: {alg}")]
    AlgorithmMismatch {
        /// The declared algorithm.
        alg: String,
    },

    /// The header has no `kid`.
    #[error("Token header has no key id")]
    MissingKeyId,

    /// No signing key with this id exists, even after a refetch.
    #[error("Signing key unavailable: {kid}")]
    KeyUnavailable {
        /// The key id the token referenced.
        kid: String,
    },

    /// The key exists but its PEM body is not an RSA public key.
    #[error("Malformed public key for {kid}: {message}")]
    MalformedPublicKey {
        /// The key id.
        kid: String,
        /// Parser error.
        message: String,
    },

    #[error("Invalid signature")]
    SignatureInvalid,

    #[error("Token expired")]
    Expired,

    #[error("Token not yet valid")]
    NotYetValid,
}

impl VerifyError {
    /// Creates a new `Malformed` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Short stable label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "malformed",
            Self::AlgorithmMismatch { .. } => "algorithm_mismatch",
            Self::MissingKeyId => "missing_kid",
            Self::KeyUnavailable { .. } => "key_unavailable",
            Self::MalformedPublicKey { .. } => "malformed_key",
            Self::SignatureInvalid => "signature_invalid",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
        }
    }
}

impl From<jsonwebtoken::errors::Error> for VerifyError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;

        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::ImmatureSignature => Self::NotYetValid,
            ErrorKind::InvalidSignature => Self::SignatureInvalid,
            _ => Self::malformed(err.to_string()),
        }
    }
}

// ============================================================================
// Identity
// ============================================================================

/// Identity extracted from a verified token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedIdentity {
    /// The `sub` claim.
    pub subject: Option<String>,
    /// First entry of the `aud` claim.
    pub audience: Option<String>,
    /// The custom `purpose` claim. Carried through, never enforced.
    pub purpose: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawHeader {
    alg: String,
    #[serde(default)]
    kid: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Audience {
    One(String),
    Many(Vec<String>),
}

impl Audience {
    fn first(self) -> Option<String> {
        match self {
            Self::One(aud) => Some(aud),
            Self::Many(auds) => auds.into_iter().next(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IdentityClaims {
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    aud: Option<Audience>,
    #[serde(default)]
    purpose: Option<String>,
}

// ============================================================================
// Verifier
// ============================================================================

/// Verifier configuration.
#[derive(Debug, Clone, Default)]
pub struct VerifierConfig {
    /// Leeway applied to `exp` and `nbf` (default: none).
    pub clock_skew: Duration,
}

impl VerifierConfig {
    #[must_use]
    pub fn with_clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }
}

/// Verifies RS256 bearer tokens against a key directory.
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    directory: KeyDirectory,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(directory: KeyDirectory, config: VerifierConfig) -> Self {
        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.leeway = config.clock_skew.as_secs();
        validation.set_required_spec_claims(&["exp"]);

        Self {
            directory,
            validation,
        }
    }

    pub fn directory(&self) -> &KeyDirectory {
        &self.directory
    }

    /// Verifies `token` and returns the identity it carries.
    pub async fn verify(&self, token: &str) -> Result<ParsedIdentity, VerifyError> {
        let header = read_header(token)?;

        if header.alg != PINNED_ALGORITHM {
            return Err(VerifyError::AlgorithmMismatch { alg: header.alg });
        }

        let kid = match header.kid {
            Some(kid) if !kid.is_empty() => kid,
            _ => return Err(VerifyError::MissingKeyId),
        };

        let key = self
            .directory
            .find_key_by_id(&kid)
            .await
            .map_err(|e| VerifyError::KeyUnavailable { kid: e.kid })?;

        let decoding_key = DecodingKey::from_rsa_pem(key.pem_body.as_bytes()).map_err(|e| {
            VerifyError::MalformedPublicKey {
                kid: kid.clone(),
                message: e.to_string(),
            }
        })?;

        let data = decode::<IdentityClaims>(token, &decoding_key, &self.validation)?;
        let claims = data.claims;

        Ok(ParsedIdentity {
            subject: claims.sub,
            audience: claims.aud.and_then(Audience::first),
            purpose: claims.purpose,
        })
    }
}

fn read_header(token: &str) -> Result<RawHeader, VerifyError> {
    let mut segments = token.split('.');
    let (Some(header), Some(_), Some(_), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(VerifyError::malformed("expected three segments"));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(header)
        .map_err(|e| VerifyError::malformed(format!("header is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| VerifyError::malformed(format!("header is not valid JSON: {e}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::directory::DirectoryConfig;
    use crate::keys::SigningKey;
    use crate::testutil::{
        StaticKeyFetcher, claims, key_pair_a, key_pair_b, now_secs, sign_token, unsigned_token,
    };

    async fn verifier_with(keys: Vec<SigningKey>) -> (TokenVerifier, Arc<StaticKeyFetcher>) {
        let fetcher = Arc::new(StaticKeyFetcher::new(keys));
        let directory = KeyDirectory::connect(fetcher.clone(), DirectoryConfig::default())
            .await
            .unwrap();
        (
            TokenVerifier::new(directory, VerifierConfig::default()),
            fetcher,
        )
    }

    #[tokio::test]
    async fn test_valid_token_yields_identity() {
        let (verifier, fetcher) = verifier_with(vec![key_pair_a().signing_key("A")]).await;
        let token = sign_token(key_pair_a(), Some("A"), &claims("user-1", "access", 3600));

        let identity = verifier.verify(&token).await.unwrap();

        assert_eq!(identity.subject.as_deref(), Some("user-1"));
        assert_eq!(identity.audience.as_deref(), Some("gateway"));
        assert_eq!(identity.purpose.as_deref(), Some("access"));
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_string_audience_is_accepted() {
        let (verifier, _) = verifier_with(vec![key_pair_a().signing_key("A")]).await;
        let token = sign_token(
            key_pair_a(),
            Some("A"),
            &json!({ "sub": "u", "aud": "single", "exp": now_secs() + 60 }),
        );

        let identity = verifier.verify(&token).await.unwrap();
        assert_eq!(identity.audience.as_deref(), Some("single"));
        assert_eq!(identity.purpose, None);
    }

    #[tokio::test]
    async fn test_rejects_other_algorithms_before_lookup() {
        let (verifier, fetcher) = verifier_with(vec![key_pair_a().signing_key("A")]).await;
        let body = claims("user-1", "access", 3600);

        for alg in ["HS256", "none", "RS384", "ES256", "rs256"] {
            let token = unsigned_token(&json!({ "alg": alg, "kid": "A" }), &body);
            let err = verifier.verify(&token).await.unwrap_err();
            assert_eq!(err, VerifyError::AlgorithmMismatch { alg: alg.into() });
        }
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_kid_skips_lookup() {
        let (verifier, fetcher) = verifier_with(vec![key_pair_a().signing_key("A")]).await;
        let body = claims("user-1", "access", 3600);

        let no_kid = sign_token(key_pair_a(), None, &body);
        assert_eq!(
            verifier.verify(&no_kid).await.unwrap_err(),
            VerifyError::MissingKeyId
        );

        let empty_kid = sign_token(key_pair_a(), Some(""), &body);
        assert_eq!(
            verifier.verify(&empty_kid).await.unwrap_err(),
            VerifyError::MissingKeyId
        );
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_kid_is_key_unavailable_after_one_refetch() {
        let (verifier, fetcher) = verifier_with(vec![key_pair_a().signing_key("A")]).await;
        let token = sign_token(key_pair_b(), Some("B"), &claims("user-1", "access", 3600));

        let err = verifier.verify(&token).await.unwrap_err();

        assert_eq!(err, VerifyError::KeyUnavailable { kid: "B".into() });
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_garbage_pem_is_malformed_key() {
        let (verifier, _) = verifier_with(vec![SigningKey::new("A", "not a pem")]).await;
        let token = sign_token(key_pair_a(), Some("A"), &claims("user-1", "access", 3600));

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::MalformedPublicKey { kid, .. } if kid == "A"));
    }

    #[tokio::test]
    async fn test_wrong_key_is_signature_invalid() {
        // "A" is published with B's public key.
        let (verifier, _) = verifier_with(vec![key_pair_b().signing_key("A")]).await;
        let token = sign_token(key_pair_a(), Some("A"), &claims("user-1", "access", 3600));

        let err = verifier.verify(&token).await.unwrap_err();
        assert_eq!(err, VerifyError::SignatureInvalid);
    }

    #[tokio::test]
    async fn test_expired_token() {
        let (verifier, _) = verifier_with(vec![key_pair_a().signing_key("A")]).await;
        let token = sign_token(key_pair_a(), Some("A"), &claims("user-1", "access", -120));

        assert_eq!(verifier.verify(&token).await.unwrap_err(), VerifyError::Expired);
    }

    #[tokio::test]
    async fn test_future_nbf_is_not_yet_valid() {
        let (verifier, _) = verifier_with(vec![key_pair_a().signing_key("A")]).await;
        let token = sign_token(
            key_pair_a(),
            Some("A"),
            &json!({ "sub": "u", "exp": now_secs() + 3600, "nbf": now_secs() + 600 }),
        );

        assert_eq!(
            verifier.verify(&token).await.unwrap_err(),
            VerifyError::NotYetValid
        );
    }

    #[tokio::test]
    async fn test_clock_skew_tolerates_recent_expiry() {
        let fetcher = Arc::new(StaticKeyFetcher::new(vec![key_pair_a().signing_key("A")]));
        let directory = KeyDirectory::connect(fetcher, DirectoryConfig::default())
            .await
            .unwrap();
        let verifier = TokenVerifier::new(
            directory,
            VerifierConfig::default().with_clock_skew(Duration::from_secs(300)),
        );
        let token = sign_token(key_pair_a(), Some("A"), &claims("user-1", "access", -60));

        assert!(verifier.verify(&token).await.is_ok());
    }

    #[tokio::test]
    async fn test_missing_exp_is_malformed() {
        let (verifier, _) = verifier_with(vec![key_pair_a().signing_key("A")]).await;
        let token = sign_token(key_pair_a(), Some("A"), &json!({ "sub": "u" }));

        let err = verifier.verify(&token).await.unwrap_err();
        assert!(matches!(err, VerifyError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_structural_garbage_is_malformed() {
        let (verifier, fetcher) = verifier_with(vec![key_pair_a().signing_key("A")]).await;

        for token in ["", "abc", "a.b", "a.b.c.d", "!!!.e30.sig"] {
            let err = verifier.verify(token).await.unwrap_err();
            assert!(
                matches!(err, VerifyError::Malformed { .. }),
                "{token:?} gave {err:?}"
            );
        }
        assert_eq!(fetcher.calls(), 1);
    }

    #[test]
    fn test_reason_labels_are_distinct() {
        let errors = [
            VerifyError::malformed("x"),
            VerifyError::AlgorithmMismatch { alg: "x".into() },
            VerifyError::MissingKeyId,
            VerifyError::KeyUnavailable { kid: "x".into() },
            VerifyError::MalformedPublicKey {
                kid: "x".into(),
                message: "x".into(),
            },
            VerifyError::SignatureInvalid,
            VerifyError::Expired,
            VerifyError::NotYetValid,
        ];
        let labels: std::collections::HashSet<_> = errors.iter().map(VerifyError::reason).collect();
        assert_eq!(labels.len(), errors.len());
    }
}
