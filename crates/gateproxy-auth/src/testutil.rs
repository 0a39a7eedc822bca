//! Helpers for tests: RSA key pairs, token signing and an in-memory fetcher.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use rand::rngs::OsRng;
use rsa::RsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use serde_json::{Value, json};

use crate::keys::{KeyFetchError, KeyFetcher, SigningKey};

/// An RSA key pair with PEM encodings on both sides.
pub struct TestKeyPair {
    pub private_pem: String,
    pub public_pem: String,
}

impl TestKeyPair {
    /// Generates a fresh 2048-bit pair.
    pub fn generate() -> Self {
        let private_key = RsaPrivateKey::new(&mut OsRng, 2048).expect("generate RSA key");
        let private_pem = private_key
            .to_pkcs8_pem(LineEnding::LF)
            .expect("encode private key")
            .to_string();
        let public_pem = private_key
            .to_public_key()
            .to_public_key_pem(LineEnding::LF)
            .expect("encode public key");
        Self {
            private_pem,
            public_pem,
        }
    }

    /// Returns a directory entry publishing this pair's public half as `kid`.
    pub fn signing_key(&self, kid: &str) -> SigningKey {
        SigningKey::new(kid, self.public_pem.clone())
    }

    pub fn encoding_key(&self) -> EncodingKey {
        EncodingKey::from_rsa_pem(self.private_pem.as_bytes()).expect("valid private key")
    }
}

/// Process-wide key pair "A", generated once.
pub fn key_pair_a() -> &'static TestKeyPair {
    static PAIR: OnceLock<TestKeyPair> = OnceLock::new();
    PAIR.get_or_init(TestKeyPair::generate)
}

/// Process-wide key pair "B", generated once.
pub fn key_pair_b() -> &'static TestKeyPair {
    static PAIR: OnceLock<TestKeyPair> = OnceLock::new();
    PAIR.get_or_init(TestKeyPair::generate)
}

/// Current Unix time in seconds.
pub fn now_secs() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

/// Standard claims: subject, audience, purpose and an expiry `expires_in` from now.
pub fn claims(subject: &str, purpose: &str, expires_in: i64) -> Value {
    json!({
        "sub": subject,
        "aud": ["gateway"],
        "purpose": purpose,
        "iat": now_secs(),
        "exp": now_secs() + expires_in,
    })
}

/// Signs `claims` with RS256 using `pair`, tagging the header with `kid`.
pub fn sign_token(pair: &TestKeyPair, kid: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    encode(&header, claims, &pair.encoding_key()).expect("sign token")
}

/// Builds a token with an arbitrary header. The signature segment is junk.
pub fn unsigned_token(header: &Value, claims: &Value) -> String {
    use base64::Engine;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    format!(
        "{}.{}.{}",
        URL_SAFE_NO_PAD.encode(header.to_string()),
        URL_SAFE_NO_PAD.encode(claims.to_string()),
        URL_SAFE_NO_PAD.encode(b"signature"),
    )
}

/// In-memory key fetcher that counts its calls.
#[derive(Default)]
pub struct StaticKeyFetcher {
    keys: Mutex<Vec<SigningKey>>,
    failing: AtomicBool,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticKeyFetcher {
    pub fn new(keys: Vec<SigningKey>) -> Self {
        Self {
            keys: Mutex::new(keys),
            ..Default::default()
        }
    }

    /// A fetcher whose every call fails.
    pub fn failing() -> Self {
        let fetcher = Self::default();
        fetcher.set_failing(true);
        fetcher
    }

    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn set_keys(&self, keys: Vec<SigningKey>) {
        *self.keys.lock().expect("keys lock") = keys;
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of `fetch_keys` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KeyFetcher for StaticKeyFetcher {
    async fn fetch_keys(&self) -> Result<Vec<SigningKey>, KeyFetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(KeyFetchError::Transport("authority unavailable".into()));
        }
        Ok(self.keys.lock().expect("keys lock").clone())
    }
}
