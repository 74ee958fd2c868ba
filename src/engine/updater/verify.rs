//! Manifest Authentication
//!
//! Verifies the detached JWS over an update manifest against the embedded
//! root keys, then checks that the manifest is the one the signature vouches
//! for. Every failure here is terminal for the update request at hand.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::{BigUint, Pkcs1v15Sign, RsaPublicKey};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use super::jws::{CompactJws, RsaJwk};
use super::request::{UpdateManifest, UpdateRequest};
use super::root_keys::RootKeyRegistry;

pub const SHA256_SIZE: usize = 32;
pub const RSA3072_SIZE: usize = 384;
/// Decoded outer header, which embeds the whole signing-key JWS
pub const MAX_HEADER_SIZE: usize = 1400;
pub const MAX_PAYLOAD_SIZE: usize = 64;
pub const MAX_JWK_HEADER_SIZE: usize = 64;
pub const MAX_JWK_PAYLOAD_SIZE: usize = 700;

/// Scratch size that fits RSA-3072 roots and signing keys
pub const DEFAULT_SCRATCH_SIZE: usize = 4096;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Malformed signature envelope: {0}")]
    Malformed(String),

    #[error("Unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Unknown root key: {key_id}")]
    UnknownKey { key_id: String },

    #[error("Invalid public key {key_id}: {reason}")]
    InvalidKey { key_id: String, reason: String },

    #[error("Signature verification failed for key {key_id}")]
    BadSignature { key_id: String },

    #[error("Manifest digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch { expected: String, actual: String },

    #[error("Verification scratch too small: need {needed} bytes, have {available}")]
    BufferTooSmall { needed: usize, available: usize },
}

#[derive(Deserialize)]
struct ManifestClaims {
    sha256: Option<String>,
}

/// An update request whose manifest has passed authentication.
///
/// Only [`ManifestAuthenticator::authenticate_request`] can build one, which
/// is what lets the state machine demand proof of authentication before an
/// update is accepted.
#[derive(Debug, Clone)]
pub struct AuthenticatedUpdate {
    request: UpdateRequest,
    manifest: UpdateManifest,
    root_key_id: String,
}

impl AuthenticatedUpdate {
    pub fn request(&self) -> &UpdateRequest {
        &self.request
    }

    pub fn manifest(&self) -> &UpdateManifest {
        &self.manifest
    }

    pub fn root_key_id(&self) -> &str {
        &self.root_key_id
    }

    pub fn into_parts(self) -> (UpdateRequest, UpdateManifest) {
        (self.request, self.manifest)
    }
}

/// Verifies manifests against a fixed root key registry
#[derive(Debug, Clone)]
pub struct ManifestAuthenticator {
    registry: RootKeyRegistry,
    scratch_size: usize,
}

impl ManifestAuthenticator {
    /// Build an authenticator, rejecting a scratch budget that cannot hold
    /// the largest supported key and header.
    pub fn new(registry: RootKeyRegistry, scratch_size: usize) -> Result<Self, AuthError> {
        let needed = Self::required_scratch(&registry);
        if scratch_size < needed {
            return Err(AuthError::BufferTooSmall {
                needed,
                available: scratch_size,
            });
        }
        Ok(Self {
            registry,
            scratch_size,
        })
    }

    /// Smallest scratch that can verify a chained envelope for this registry
    pub fn required_scratch(registry: &RootKeyRegistry) -> usize {
        let signature = registry.largest_modulus_len().max(RSA3072_SIZE);
        MAX_HEADER_SIZE
            + MAX_PAYLOAD_SIZE
            + signature
            + MAX_JWK_HEADER_SIZE
            + MAX_JWK_PAYLOAD_SIZE
            + signature
            + 2 * SHA256_SIZE
    }

    pub fn registry(&self) -> &RootKeyRegistry {
        &self.registry
    }

    pub fn scratch_size(&self) -> usize {
        self.scratch_size
    }

    /// Authenticate `manifest` against a compact JWS `envelope`.
    ///
    /// Returns the id of the root key the envelope chained to.
    pub fn authenticate(&self, manifest: &[u8], envelope: &[u8]) -> Result<String, AuthError> {
        let envelope = std::str::from_utf8(envelope)
            .map_err(|_| AuthError::Malformed("envelope is not UTF-8".to_string()))?;
        let jws = CompactJws::parse(envelope)?;
        jws.ensure_rs256()?;

        let signing_jwk = match &jws.header.sjwk {
            Some(sjwk) => {
                let inner = CompactJws::parse(sjwk)?;
                inner.ensure_rs256()?;
                self.check_scratch(jws.decoded_len() + inner.decoded_len())?;
                Some(inner)
            }
            None => {
                self.check_scratch(jws.decoded_len())?;
                None
            }
        };

        // Step 1: resolve the root and, for chained envelopes, the signing key
        let (root_key_id, signing_key, signing_key_id) = match signing_jwk {
            Some(inner) => {
                let root_id = inner
                    .header
                    .kid
                    .clone()
                    .ok_or_else(|| AuthError::Malformed("signing key JWS has no kid".to_string()))?;
                let root = self.root_public_key(&root_id)?;
                verify_rs256(&root, inner.signing_input(), &inner.signature, &root_id)?;
                debug!(key_id = %root_id, "Signing key verified against root");

                let jwk: RsaJwk = serde_json::from_slice(&inner.payload)
                    .map_err(|e| AuthError::Malformed(format!("signing key JWK: {}", e)))?;
                let signing_id = jwk.kid.clone().unwrap_or_else(|| root_id.clone());
                if jwk.kty != "RSA" {
                    return Err(AuthError::InvalidKey {
                        key_id: signing_id,
                        reason: format!("unsupported key type {}", jwk.kty),
                    });
                }
                let key = public_key(&signing_id, &jwk.modulus()?, &jwk.exponent()?)?;
                (root_id, key, signing_id)
            }
            None => {
                let root_id = jws
                    .header
                    .kid
                    .clone()
                    .ok_or_else(|| AuthError::Malformed("header has neither sjwk nor kid".to_string()))?;
                let root = self.root_public_key(&root_id)?;
                (root_id.clone(), root, root_id)
            }
        };

        // Step 2: the envelope itself
        verify_rs256(&signing_key, jws.signing_input(), &jws.signature, &signing_key_id)?;

        // Step 3: the manifest must be the one the verified payload names
        let claims: ManifestClaims = serde_json::from_slice(&jws.payload)
            .map_err(|e| AuthError::Malformed(format!("payload: {}", e)))?;
        let expected = claims
            .sha256
            .ok_or_else(|| AuthError::Malformed("payload has no sha256 claim".to_string()))?;
        let expected_digest = STANDARD
            .decode(expected.as_bytes())
            .map_err(|e| AuthError::Malformed(format!("sha256 claim is not base64: {}", e)))?;
        let digest = Sha256::digest(manifest);
        if expected_digest.as_slice() != digest.as_slice() {
            let actual = STANDARD.encode(digest);
            warn!(expected = %expected, actual = %actual, "Manifest digest mismatch");
            return Err(AuthError::DigestMismatch { expected, actual });
        }

        debug!(key_id = %root_key_id, "Manifest authenticated");
        Ok(root_key_id)
    }

    /// Authenticate a request and wrap it as proof for the state machine
    pub fn authenticate_request(&self, request: UpdateRequest) -> Result<AuthenticatedUpdate, AuthError> {
        let root_key_id = self.authenticate(request.manifest.as_bytes(), request.signature.as_bytes())?;
        let manifest = UpdateManifest::parse(&request.manifest)
            .map_err(|e| AuthError::Malformed(format!("manifest: {}", e)))?;
        Ok(AuthenticatedUpdate {
            request,
            manifest,
            root_key_id,
        })
    }

    fn root_public_key(&self, key_id: &str) -> Result<RsaPublicKey, AuthError> {
        let Some(root) = self.registry.find(key_id) else {
            warn!(key_id = %key_id, "Signature references unknown root key");
            return Err(AuthError::UnknownKey {
                key_id: key_id.to_string(),
            });
        };
        public_key(&root.id, &root.modulus, &root.exponent)
    }

    fn check_scratch(&self, needed: usize) -> Result<(), AuthError> {
        let needed = needed + 2 * SHA256_SIZE;
        if needed > self.scratch_size {
            return Err(AuthError::BufferTooSmall {
                needed,
                available: self.scratch_size,
            });
        }
        Ok(())
    }
}

fn public_key(key_id: &str, modulus: &[u8], exponent: &[u8]) -> Result<RsaPublicKey, AuthError> {
    RsaPublicKey::new(BigUint::from_bytes_be(modulus), BigUint::from_bytes_be(exponent)).map_err(|e| {
        AuthError::InvalidKey {
            key_id: key_id.to_string(),
            reason: e.to_string(),
        }
    })
}

fn verify_rs256(key: &RsaPublicKey, signed: &[u8], signature: &[u8], key_id: &str) -> Result<(), AuthError> {
    let digest = Sha256::digest(signed);
    key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, signature)
        .map_err(|_| {
            warn!(key_id = %key_id, "RS256 signature rejected");
            AuthError::BadSignature {
                key_id: key_id.to_string(),
            }
        })
}
