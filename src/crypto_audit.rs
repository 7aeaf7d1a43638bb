//! Envelope encryption for at-rest payloads, plus an HMAC-signed
//! append-only audit log.
//!
//! Styled after [`crate::db::core::graphdb::GraphDB::verify_integrity`]'s
//! "walk everything, collect findings, report" shape: audit
//! verification returns every tampered record it finds rather than
//! stopping at the first one.

use crate::engine::EngineTransaction;
use crate::key_schema;
use crate::types::{Result, SombraError};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Supplies the 32-byte data-encryption key. Implementations can read
/// it from an env var, a KMS call, or a fixed test key; this crate
/// never picks a default key for production use, per the out-of-scope
/// declaration around key management.
pub trait KeySource: Send + Sync {
    fn data_key(&self) -> [u8; 32];
    fn signing_key(&self) -> [u8; 32];
}

/// A `KeySource` backed by two keys held in memory, for embedding
/// contexts that manage keys outside this crate.
pub struct StaticKeySource {
    data_key: [u8; 32],
    signing_key: [u8; 32],
}

impl StaticKeySource {
    pub fn new(data_key: [u8; 32], signing_key: [u8; 32]) -> Self {
        Self { data_key, signing_key }
    }
}

impl KeySource for StaticKeySource {
    fn data_key(&self) -> [u8; 32] {
        self.data_key
    }
    fn signing_key(&self) -> [u8; 32] {
        self.signing_key
    }
}

const NONCE_LEN: usize = 12;

/// Encrypts `plaintext` with a fresh random nonce, returning
/// `nonce || ciphertext`.
pub fn encrypt(keys: &dyn KeySource, plaintext: &[u8]) -> Result<Vec<u8>> {
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&keys.data_key()));
    let mut nonce_bytes = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| SombraError::Internal("envelope encryption failed".into()))?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypts a `nonce || ciphertext` blob produced by [`encrypt`].
pub fn decrypt(keys: &dyn KeySource, blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_LEN {
        return Err(SombraError::Corruption("encrypted payload shorter than nonce"));
    }
    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = ChaCha20Poly1305::new(Key::from_slice(&keys.data_key()));
    let nonce = Nonce::from_slice(nonce_bytes);
    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| SombraError::Corruption("envelope decryption failed: payload tampered or wrong key"))
}

#[derive(Clone, Debug, PartialEq)]
pub struct AuditRecord {
    pub seq: u64,
    pub actor: String,
    pub action: String,
    pub target_key: Vec<u8>,
}

impl AuditRecord {
    fn signable_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&(self.actor.len() as u32).to_be_bytes());
        out.extend_from_slice(self.actor.as_bytes());
        out.extend_from_slice(&(self.action.len() as u32).to_be_bytes());
        out.extend_from_slice(self.action.as_bytes());
        out.extend_from_slice(&(self.target_key.len() as u32).to_be_bytes());
        out.extend_from_slice(&self.target_key);
        out
    }

    fn encode(&self, signing_key: &[u8; 32]) -> Vec<u8> {
        let body = self.signable_bytes();
        let mut mac = HmacSha256::new_from_slice(signing_key).expect("hmac accepts any key length");
        mac.update(&body);
        let tag = mac.finalize().into_bytes();
        let mut out = Vec::with_capacity(body.len() + tag.len());
        out.extend_from_slice(&body);
        out.extend_from_slice(&tag);
        out
    }

    fn decode(seq: u64, bytes: &[u8]) -> Result<(Self, Vec<u8>)> {
        if bytes.len() < 32 {
            return Err(SombraError::Corruption("audit record shorter than its HMAC tag"));
        }
        let (body, tag) = bytes.split_at(bytes.len() - 32);
        let mut cursor = 0;
        let stored_seq = u64::from_be_bytes(body.get(0..8).ok_or(SombraError::Corruption("truncated audit seq"))?.try_into().unwrap());
        if stored_seq != seq {
            return Err(SombraError::Corruption("audit record sequence mismatch"));
        }
        cursor += 8;
        let actor_len = u32::from_be_bytes(body[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        let actor = String::from_utf8(body[cursor..cursor + actor_len].to_vec()).map_err(|_| SombraError::Corruption("non-utf8 audit actor"))?;
        cursor += actor_len;
        let action_len = u32::from_be_bytes(body[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        let action = String::from_utf8(body[cursor..cursor + action_len].to_vec()).map_err(|_| SombraError::Corruption("non-utf8 audit action"))?;
        cursor += action_len;
        let key_len = u32::from_be_bytes(body[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        let target_key = body[cursor..cursor + key_len].to_vec();
        Ok((AuditRecord { seq, actor, action, target_key }, tag.to_vec()))
    }
}

fn next_audit_seq(txn: &mut EngineTransaction<'_>) -> Result<u64> {
    const COUNTER_KEY: &[u8] = b"meta:audit_seq";
    let current = match txn.get(COUNTER_KEY)? {
        Some(bytes) if bytes.len() == 8 => u64::from_be_bytes(bytes.try_into().unwrap()),
        _ => 0,
    };
    let next = current + 1;
    txn.put(COUNTER_KEY, next.to_be_bytes().to_vec())?;
    Ok(next)
}

/// Appends a signed audit record, returning its sequence number.
pub fn append_audit(keys: &dyn KeySource, actor: &str, action: &str, target_key: &[u8], txn: &mut EngineTransaction<'_>) -> Result<u64> {
    let seq = next_audit_seq(txn)?;
    let record = AuditRecord { seq, actor: actor.to_string(), action: action.to_string(), target_key: target_key.to_vec() };
    let encoded = record.encode(&keys.signing_key());
    txn.put(&key_schema::audit_key(seq), encoded)?;
    Ok(seq)
}

#[derive(Clone, Debug)]
pub struct AuditFinding {
    pub seq: u64,
    pub problem: String,
}

/// Walks every audit record in `[1, upto_seq]`, recomputing each HMAC
/// and collecting every mismatch rather than stopping at the first
/// tampered record.
pub fn verify_audit_log(keys: &dyn KeySource, upto_seq: u64, txn: &EngineTransaction<'_>) -> Result<Vec<AuditFinding>> {
    let mut findings = Vec::new();
    for seq in 1..=upto_seq {
        let key = key_schema::audit_key(seq);
        let Some(bytes) = txn.get(&key)? else {
            continue;
        };
        match AuditRecord::decode(seq, &bytes) {
            Ok((record, stored_tag)) => {
                let mut mac = HmacSha256::new_from_slice(&keys.signing_key()).expect("hmac accepts any key length");
                mac.update(&record.signable_bytes());
                if mac.verify_slice(&stored_tag).is_err() {
                    findings.push(AuditFinding { seq, problem: "HMAC tag mismatch: record was modified after signing".into() });
                }
            }
            Err(e) => findings.push(AuditFinding { seq, problem: e.to_string() }),
        }
    }
    Ok(findings)
}
