//! Signed-token (JWT) resolver.
//!
//! Second strategy in the chain. Credentials that do not have the
//! three-segment shape of a signed token fall through silently; a
//! well-formed token with a bad signature is a hard failure for the
//! request, since it indicates a security event rather than an absent
//! credential. A verified payload without an embedded `consumer`
//! object falls through without attaching an identity.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use axum::http::request::Parts;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use thiserror::Error;
use tracing::trace;

use gantry_core::{looks_like_signed_token, Consumer};

use super::{IdentityResolver, Resolution};
use crate::error::HttpError;

/// Errors from loading the verification key.
#[derive(Debug, Error)]
pub enum KeyError {
    #[error("failed to read verification key {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("verification key is not a supported PEM public key (RSA, EC, or Ed25519)")]
    UnsupportedKey,
}

/// Claims payload: only the embedded consumer object is interpreted;
/// registered claims (`exp` and friends) are handled by the verifier.
#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    consumer: Option<Consumer>,
}

/// Verifies bearer credentials against a configured public key and
/// extracts the embedded consumer identity.
pub struct SignedTokenResolver {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for SignedTokenResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedTokenResolver")
            .field("validation", &self.validation)
            .finish_non_exhaustive()
    }
}

impl SignedTokenResolver {
    /// Builds a resolver from PEM-encoded public key material. The key
    /// family (RSA, EC, Ed25519) is detected by attempting each parser
    /// in turn, and the accepted algorithm set follows the family.
    ///
    /// # Errors
    ///
    /// [`KeyError::UnsupportedKey`] when the PEM parses as none of the
    /// supported families.
    pub fn from_pem(pem: &[u8]) -> Result<Self, KeyError> {
        let (key, algorithms) = if let Ok(key) = DecodingKey::from_rsa_pem(pem) {
            (key, vec![Algorithm::RS256, Algorithm::RS384, Algorithm::RS512])
        } else if let Ok(key) = DecodingKey::from_ec_pem(pem) {
            (key, vec![Algorithm::ES256, Algorithm::ES384])
        } else if let Ok(key) = DecodingKey::from_ed_pem(pem) {
            (key, vec![Algorithm::EdDSA])
        } else {
            return Err(KeyError::UnsupportedKey);
        };

        let mut validation = Validation::new(algorithms[0]);
        validation.algorithms = algorithms;
        // Tokens are not required to carry registered claims; `exp` is
        // still enforced when present.
        validation.required_spec_claims.clear();
        validation.validate_aud = false;

        Ok(Self { key, validation })
    }

    /// Reads the key material from a file and builds the resolver.
    ///
    /// # Errors
    ///
    /// [`KeyError::Io`] when the file cannot be read, otherwise as
    /// [`Self::from_pem`].
    pub fn from_pem_file(path: &Path) -> Result<Self, KeyError> {
        let pem = std::fs::read(path).map_err(|source| KeyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pem(&pem)
    }
}

#[async_trait]
impl IdentityResolver for SignedTokenResolver {
    fn name(&self) -> &'static str {
        "signed-token"
    }

    async fn resolve(&self, _parts: &Parts, token: Option<&str>) -> Result<Resolution, HttpError> {
        let Some(token) = token else {
            trace!("no bearer token found");
            return Ok(Resolution::Skip);
        };
        if !looks_like_signed_token(token) {
            trace!("not a signed token");
            return Ok(Resolution::Skip);
        }
        let data = jsonwebtoken::decode::<Claims>(token, &self.key, &self.validation)
            .map_err(HttpError::signature_invalid)?;
        match data.claims.consumer {
            Some(consumer) => Ok(Resolution::Attached(consumer)),
            None => {
                trace!("verified token carries no consumer payload");
                Ok(Resolution::Skip)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::LazyLock;

    use axum::body::Body;
    use axum::http::Request;
    use jsonwebtoken::{EncodingKey, Header};
    use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
    use rsa::{RsaPrivateKey, RsaPublicKey};
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    /// One keypair per test binary; RSA generation is too slow to
    /// repeat per test.
    static TEST_KEYS: LazyLock<(String, String)> = LazyLock::new(|| {
        let mut rng = rand::thread_rng();
        let private = RsaPrivateKey::new(&mut rng, 2048).expect("rsa keygen");
        let public = RsaPublicKey::from(&private);
        let private_pem = private
            .to_pkcs8_pem(LineEnding::LF)
            .expect("private pem")
            .to_string();
        let public_pem = public.to_public_key_pem(LineEnding::LF).expect("public pem");
        (private_pem, public_pem)
    });

    fn resolver() -> SignedTokenResolver {
        SignedTokenResolver::from_pem(TEST_KEYS.1.as_bytes()).unwrap()
    }

    fn sign(claims: &serde_json::Value) -> String {
        let key = EncodingKey::from_rsa_pem(TEST_KEYS.0.as_bytes()).unwrap();
        jsonwebtoken::encode(&Header::new(Algorithm::RS256), claims, &key).unwrap()
    }

    fn parts() -> Parts {
        Request::builder()
            .uri("/x")
            .body(Body::empty())
            .unwrap()
            .into_parts()
            .0
    }

    #[test]
    fn malformed_pem_is_rejected() {
        let err = SignedTokenResolver::from_pem(b"not a key").unwrap_err();
        assert!(matches!(err, KeyError::UnsupportedKey));
    }

    #[test]
    fn missing_key_file_is_io_error() {
        let err =
            SignedTokenResolver::from_pem_file(Path::new("/nonexistent/key.pem")).unwrap_err();
        assert!(matches!(err, KeyError::Io { .. }));
    }

    #[tokio::test]
    async fn valid_token_attaches_embedded_consumer() {
        let token = sign(&json!({
            "consumer": {
                "id": "u-1",
                "roles": ["reader"],
                "attr": { "name": "Ada", "type": "user" }
            }
        }));
        let resolution = resolver().resolve(&parts(), Some(&token)).await.unwrap();
        match resolution {
            Resolution::Attached(consumer) => {
                assert_eq!(consumer.id, "u-1");
                assert_eq!(consumer.attr.name, "Ada");
            }
            Resolution::Skip => panic!("expected an attached identity"),
        }
    }

    #[tokio::test]
    async fn token_without_consumer_skips() {
        let token = sign(&json!({ "sub": "someone" }));
        let resolution = resolver().resolve(&parts(), Some(&token)).await.unwrap();
        assert!(matches!(resolution, Resolution::Skip));
    }

    #[tokio::test]
    async fn non_jws_shape_never_hard_fails() {
        let resolution = resolver()
            .resolve(&parts(), Some("just-an-opaque-token"))
            .await
            .unwrap();
        assert!(matches!(resolution, Resolution::Skip));
    }

    #[tokio::test]
    async fn tampered_token_is_a_hard_failure() {
        let token = sign(&json!({ "consumer": null }));
        // Corrupt the signature segment.
        let mut segments: Vec<&str> = token.split('.').collect();
        let tampered_sig = "AAAA".to_string() + segments[2];
        segments[2] = &tampered_sig;
        let tampered = segments.join(".");

        let err = resolver()
            .resolve(&parts(), Some(&tampered))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureInvalid);
    }

    #[tokio::test]
    async fn expired_token_is_a_hard_failure() {
        let token = sign(&json!({ "consumer": null, "exp": 1 }));
        let err = resolver().resolve(&parts(), Some(&token)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SignatureInvalid);
    }

    #[tokio::test]
    async fn missing_token_skips() {
        let resolution = resolver().resolve(&parts(), None).await.unwrap();
        assert!(matches!(resolution, Resolution::Skip));
    }
}
