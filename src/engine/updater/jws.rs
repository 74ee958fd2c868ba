//! JWS Compact Envelope
//!
//! Parses the `header.payload.signature` form used for manifest signatures.
//! Segments are base64url; padding is tolerated on input.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use serde::{Deserialize, Serialize};

use super::verify::AuthError;

/// The only algorithm accepted for manifests and signing keys
pub const ALG_RS256: &str = "RS256";

const SEGMENT_DECODER: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Protected header of a compact JWS
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwsHeader {
    pub alg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
    /// Nested JWS carrying the signing key, itself signed by a root key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sjwk: Option<String>,
}

/// RSA public key in JWK form, as carried in the `sjwk` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RsaJwk {
    pub kty: String,
    pub n: String,
    pub e: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alg: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kid: Option<String>,
}

impl RsaJwk {
    pub fn modulus(&self) -> Result<Vec<u8>, AuthError> {
        decode_segment(&self.n, "jwk modulus")
    }

    pub fn exponent(&self) -> Result<Vec<u8>, AuthError> {
        decode_segment(&self.e, "jwk exponent")
    }
}

/// A parsed compact JWS, borrowing the original envelope text
#[derive(Debug, Clone)]
pub struct CompactJws<'a> {
    pub header: JwsHeader,
    pub payload: Vec<u8>,
    pub signature: Vec<u8>,
    header_len: usize,
    signing_input: &'a str,
}

impl<'a> CompactJws<'a> {
    pub fn parse(envelope: &'a str) -> Result<Self, AuthError> {
        let envelope = envelope.trim();
        let mut parts = envelope.split('.');
        let (Some(header_b64), Some(payload_b64), Some(signature_b64), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(AuthError::Malformed(
                "envelope must have exactly three segments".to_string(),
            ));
        };

        let header_bytes = decode_segment(header_b64, "header")?;
        let header: JwsHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| AuthError::Malformed(format!("header: {}", e)))?;
        let payload = decode_segment(payload_b64, "payload")?;
        let signature = decode_segment(signature_b64, "signature")?;

        if signature.is_empty() {
            return Err(AuthError::Malformed("empty signature segment".to_string()));
        }

        let signing_input = &envelope[..header_b64.len() + 1 + payload_b64.len()];

        Ok(Self {
            header,
            payload,
            signature,
            header_len: header_bytes.len(),
            signing_input,
        })
    }

    /// `base64url(header) "." base64url(payload)`, the region covered by the signature
    pub fn signing_input(&self) -> &'a [u8] {
        self.signing_input.as_bytes()
    }

    /// Bytes needed to hold every decoded section
    pub fn decoded_len(&self) -> usize {
        self.header_len + self.payload.len() + self.signature.len()
    }

    pub fn ensure_rs256(&self) -> Result<(), AuthError> {
        if self.header.alg == ALG_RS256 {
            Ok(())
        } else {
            Err(AuthError::UnsupportedAlgorithm(self.header.alg.clone()))
        }
    }
}

/// Key id and signed region recovered from a signature envelope
///
/// `key_id` is the root the envelope chains to: the `kid` of the nested
/// `sjwk` when present, otherwise the outer header `kid`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSignature {
    pub key_id: String,
    pub signed_bytes: Vec<u8>,
}

impl ManifestSignature {
    pub fn from_envelope(envelope: &str) -> Result<Self, AuthError> {
        let jws = CompactJws::parse(envelope)?;
        let key_id = match &jws.header.sjwk {
            Some(sjwk) => CompactJws::parse(sjwk)?.header.kid,
            None => jws.header.kid.clone(),
        }
        .ok_or_else(|| AuthError::Malformed("no key id in signature header".to_string()))?;

        Ok(Self {
            key_id,
            signed_bytes: jws.signing_input().to_vec(),
        })
    }
}

pub fn encode_segment(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode_segment(segment: &str, what: &str) -> Result<Vec<u8>, AuthError> {
    SEGMENT_DECODER
        .decode(segment)
        .map_err(|e| AuthError::Malformed(format!("{} is not base64url: {}", what, e)))
}
