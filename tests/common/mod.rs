#![allow(dead_code)]

use adu_agent::engine::agent::DeviceAgent;
use adu_agent::engine::config::AgentConfig;
use adu_agent::engine::transport::memory::pair;
use adu_agent::engine::transport::{MemoryHub, MemoryTransport};
use adu_agent::engine::updater::jws::{encode_segment, JwsHeader, RsaJwk, ALG_RS256};
use adu_agent::engine::updater::root_keys::{RootKey, RootKeyRegistry};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

pub const TEST_ROOT_ID: &str = "TEST.000001.R";

pub fn root_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
}

pub fn signing_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
}

/// Built-in production roots plus the test root
pub fn registry() -> RootKeyRegistry {
    let key = root_key();
    let mut keys: Vec<RootKey> = RootKeyRegistry::builtin().iter().cloned().collect();
    keys.push(RootKey::new(TEST_ROOT_ID, key.n().to_bytes_be(), key.e().to_bytes_be()));
    RootKeyRegistry::new(keys)
}

fn sign_compact(header: &JwsHeader, payload: &[u8], key: &RsaPrivateKey) -> String {
    let signing_input = format!(
        "{}.{}",
        encode_segment(serde_json::to_string(header).unwrap().as_bytes()),
        encode_segment(payload)
    );
    let digest = Sha256::digest(signing_input.as_bytes());
    let signature = key.sign(Pkcs1v15Sign::new::<Sha256>(), &digest).unwrap();
    format!("{}.{}", signing_input, encode_segment(&signature))
}

/// Envelope over `manifest`, signed by the signing key whose JWK names `root_id`
pub fn sign_manifest(manifest: &str, root_id: &str) -> String {
    let signer = signing_key();
    let jwk = RsaJwk {
        kty: "RSA".to_string(),
        n: encode_segment(&signer.n().to_bytes_be()),
        e: encode_segment(&signer.e().to_bytes_be()),
        alg: Some(ALG_RS256.to_string()),
        kid: Some("SIGN.TEST".to_string()),
    };
    let sjwk = sign_compact(
        &JwsHeader {
            alg: ALG_RS256.to_string(),
            kid: Some(root_id.to_string()),
            sjwk: None,
        },
        serde_json::to_string(&jwk).unwrap().as_bytes(),
        root_key(),
    );
    let claims = serde_json::json!({ "sha256": STANDARD.encode(Sha256::digest(manifest.as_bytes())) });
    sign_compact(
        &JwsHeader {
            alg: ALG_RS256.to_string(),
            kid: None,
            sjwk: Some(sjwk),
        },
        claims.to_string().as_bytes(),
        signer,
    )
}

pub fn manifest(version: &str) -> String {
    serde_json::json!({
        "manifestVersion": "4",
        "updateId": { "provider": "ADU-E2E-Tests", "name": "Linux-E2E-Update", "version": version },
        "compatibility": [{ "manufacturer": "PC", "model": "Linux-E2E" }],
        "instructions": { "steps": [{ "handler": "microsoft/swupdate:1", "files": ["f1"] }] },
        "files": { "f1": { "fileName": "update.swu", "sizeInBytes": 2048, "hashes": { "sha256": "AAAA" } } },
        "createdDateTime": "2022-07-07T03:02:48Z"
    })
    .to_string()
}

/// Full properties document offering `manifest` with `signature`
pub fn twin(version: u32, workflow_id: &str, manifest: &str, signature: &str) -> Vec<u8> {
    serde_json::json!({
        "desired": {
            "thermostat": { "target": [20, { "nested": [[], {}] }] },
            "deviceUpdate": {
                "__t": "c",
                "service": {
                    "workflow": { "action": 3, "id": workflow_id },
                    "updateManifest": manifest,
                    "updateManifestSignature": signature,
                    "fileUrls": { "f1": "http://example.test/update.swu" }
                }
            },
            "$version": version
        },
        "reported": { "$version": 1 }
    })
    .to_string()
    .into_bytes()
}

pub fn agent() -> (DeviceAgent<MemoryTransport>, MemoryHub) {
    let (transport, hub) = pair();
    let config = AgentConfig::default_for_device("PC", "Linux-E2E");
    let agent = DeviceAgent::new(config, transport, registry()).unwrap();
    (agent, hub)
}

pub fn json(bytes: &[u8]) -> serde_json::Value {
    serde_json::from_slice(bytes).unwrap()
}
