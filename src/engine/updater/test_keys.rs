//! Throwaway RSA keys and envelope builders for unit tests

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

use super::jws::{encode_segment, JwsHeader, RsaJwk, ALG_RS256};
use super::request::{UpdateRequest, Workflow, WorkflowAction};
use super::root_keys::RootKey;

fn generate(slot: &'static OnceLock<RsaPrivateKey>) -> &'static RsaPrivateKey {
    slot.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
}

pub fn root_a() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    generate(&KEY)
}

pub fn root_b() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    generate(&KEY)
}

pub fn signing_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    generate(&KEY)
}

pub fn root_key(id: &str, key: &RsaPrivateKey) -> RootKey {
    RootKey::new(id, key.n().to_bytes_be(), key.e().to_bytes_be())
}

pub fn sign_compact(header: &JwsHeader, payload: &[u8], key: &RsaPrivateKey) -> String {
    let signing_input = format!(
        "{}.{}",
        encode_segment(serde_json::to_string(header).unwrap().as_bytes()),
        encode_segment(payload)
    );
    let digest = Sha256::digest(signing_input.as_bytes());
    let signature = key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest).unwrap();
    format!("{}.{}", signing_input, encode_segment(&signature))
}

fn manifest_claims(manifest: &str) -> Vec<u8> {
    serde_json::json!({ "sha256": STANDARD.encode(Sha256::digest(manifest.as_bytes())) })
        .to_string()
        .into_bytes()
}

/// Envelope signed directly by a root key
pub fn direct_envelope(manifest: &str, root_id: &str, root: &RsaPrivateKey) -> String {
    let header = JwsHeader {
        alg: ALG_RS256.to_string(),
        kid: Some(root_id.to_string()),
        sjwk: None,
    };
    sign_compact(&header, &manifest_claims(manifest), root)
}

/// Envelope signed by a signing key whose JWK is signed by `root`
pub fn chained_envelope(
    manifest: &str,
    root_id: &str,
    root: &RsaPrivateKey,
    signing_id: &str,
    signer: &RsaPrivateKey,
) -> String {
    let jwk = RsaJwk {
        kty: "RSA".to_string(),
        n: encode_segment(&signer.n().to_bytes_be()),
        e: encode_segment(&signer.e().to_bytes_be()),
        alg: Some(ALG_RS256.to_string()),
        kid: Some(signing_id.to_string()),
    };
    let sjwk = sign_compact(
        &JwsHeader {
            alg: ALG_RS256.to_string(),
            kid: Some(root_id.to_string()),
            sjwk: None,
        },
        serde_json::to_string(&jwk).unwrap().as_bytes(),
        root,
    );
    let header = JwsHeader {
        alg: ALG_RS256.to_string(),
        kid: None,
        sjwk: Some(sjwk),
    };
    sign_compact(&header, &manifest_claims(manifest), signer)
}

pub fn sample_manifest(version: &str) -> String {
    serde_json::json!({
        "manifestVersion": "4",
        "updateId": { "provider": "ADU-E2E-Tests", "name": "Linux-E2E-Update", "version": version },
        "compatibility": [{ "manufacturer": "PC", "model": "Linux-E2E" }],
        "instructions": { "steps": [{ "handler": "microsoft/swupdate:1", "files": ["f1"] }] },
        "files": { "f1": { "fileName": "update.swu", "sizeInBytes": 1024, "hashes": { "sha256": "AAAA" } } },
        "createdDateTime": "2022-07-07T03:02:48Z"
    })
    .to_string()
}

/// A version 1.1 deployment request chained to `root`
pub fn sample_request(workflow_id: &str, root_id: &str, root: &RsaPrivateKey) -> UpdateRequest {
    let manifest = sample_manifest("1.1");
    let signature = chained_envelope(&manifest, root_id, root, "SIGN.1", signing_key());
    UpdateRequest {
        workflow: Workflow {
            action: WorkflowAction::ApplyDeployment,
            id: workflow_id.to_string(),
            retry_timestamp: None,
        },
        manifest,
        signature,
        file_urls: Default::default(),
    }
}

/// Writable-properties patch delivering `request`
pub fn deployment_patch(version: u32, request: &UpdateRequest) -> Vec<u8> {
    serde_json::json!({
        "deviceUpdate": {
            "__t": "c",
            "service": {
                "workflow": request.workflow,
                "updateManifest": request.manifest,
                "updateManifestSignature": request.signature,
                "fileUrls": request.file_urls,
            }
        },
        "$version": version
    })
    .to_string()
    .into_bytes()
}

/// Full properties document, as returned to a properties request
pub fn full_document(version: u32, request: &UpdateRequest) -> Vec<u8> {
    let desired: serde_json::Value = serde_json::from_slice(&deployment_patch(version, request)).unwrap();
    serde_json::json!({ "desired": desired, "reported": { "$version": 1 } })
        .to_string()
        .into_bytes()
}
