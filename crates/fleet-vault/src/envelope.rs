//! Envelope encryption of credential maps
//!
//! Two AEAD layers: the master key encrypts a freshly generated 256-bit data
//! key (DEK), and the DEK encrypts the JSON-serialized credential map. Each
//! layer uses its own random 96-bit nonce, prepended to the ciphertext.
//! Rotating the master key would require re-wrapping all DEKs; the envelope
//! carries `version` and `key_id` so a rotation pass can find its targets.

use crate::{Result, VaultError};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use fleet_core::{CredentialEnvelope, CredentialMap, KmsState};
use rand::RngCore;
use uuid::Uuid;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const ENVELOPE_VERSION: u32 = 1;
const KMS_PROVIDER: &str = "local-aead";

/// Credential vault holding the master key
pub struct Vault {
    cipher: Aes256Gcm,
    key_id: String,
}

impl Vault {
    /// Create a vault from raw 256-bit master key material
    pub fn new(master_key: [u8; KEY_LEN], key_id: impl Into<String>) -> Self {
        let key = Key::<Aes256Gcm>::from_slice(&master_key);
        Self {
            cipher: Aes256Gcm::new(key),
            key_id: key_id.into(),
        }
    }

    /// Create a vault from a base64-encoded master key
    pub fn from_base64(encoded: &str, key_id: impl Into<String>) -> Result<Self> {
        let bytes = BASE64.decode(encoded.trim())?;
        let master: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| VaultError::MasterKey("master key must be 32 bytes".to_string()))?;
        Ok(Self::new(master, key_id))
    }

    /// Load the persisted master key
    pub fn from_kms_state(state: &KmsState) -> Result<Self> {
        Self::from_base64(&state.master_key_b64, state.key_id.clone())
    }

    /// Generate a fresh master key, returning the vault and the state to
    /// persist so the key survives restarts
    pub fn generate() -> (Self, KmsState) {
        let mut master = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut master);
        let key_id = format!("mk-{}", Uuid::new_v4());
        let state = KmsState {
            key_id: key_id.clone(),
            master_key_b64: BASE64.encode(master),
        };
        (Self::new(master, key_id), state)
    }

    /// Identifier of the master key this vault wraps with
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    fn seal(cipher: &Aes256Gcm, plaintext: &[u8]) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| VaultError::Encrypt(e.to_string()))?;

        let mut blob = nonce_bytes.to_vec();
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    fn open(cipher: &Aes256Gcm, encoded: &str) -> Result<Vec<u8>> {
        let blob = BASE64.decode(encoded)?;
        if blob.len() < NONCE_LEN {
            return Err(VaultError::Decrypt("ciphertext too short".to_string()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| VaultError::Decrypt(e.to_string()))
    }

    /// Wrap a credential map into an envelope.
    ///
    /// A fresh DEK is generated per call; the same map wrapped twice yields
    /// different envelopes.
    pub fn wrap_credentials(&self, credentials: &CredentialMap) -> Result<CredentialEnvelope> {
        let mut dek = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut dek);
        let dek_cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&dek));

        let plaintext = serde_json::to_vec(credentials)?;
        let payload = Self::seal(&dek_cipher, &plaintext)?;
        let wrapped_dek = Self::seal(&self.cipher, &dek)?;

        Ok(CredentialEnvelope {
            version: ENVELOPE_VERSION,
            kms_provider: KMS_PROVIDER.to_string(),
            key_id: self.key_id.clone(),
            wrapped_dek,
            payload,
            encrypted_at: Utc::now(),
        })
    }

    /// Unwrap an envelope back into the credential map.
    ///
    /// Fails closed: any tag mismatch on either layer raises a hard error
    /// with no partial output.
    pub fn unwrap(&self, envelope: &CredentialEnvelope) -> Result<CredentialMap> {
        let dek_bytes = Self::open(&self.cipher, &envelope.wrapped_dek)?;
        let dek: [u8; KEY_LEN] = dek_bytes
            .try_into()
            .map_err(|_| VaultError::Decrypt("unwrapped data key has wrong length".to_string()))?;
        let dek_cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&dek));

        let plaintext = Self::open(&dek_cipher, &envelope.payload)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn sample_credentials() -> CredentialMap {
        let mut map = HashMap::new();
        map.insert("SSH_HOST".to_string(), "10.0.0.4".to_string());
        map.insert("SSH_USER".to_string(), "ops".to_string());
        map.insert(
            "SSH_PRIVATE_KEY".to_string(),
            "-----BEGIN TEST KEY-----abc".to_string(),
        );
        map
    }

    #[test]
    fn roundtrip() {
        let (vault, _) = Vault::generate();
        let creds = sample_credentials();
        let envelope = vault.wrap_credentials(&creds).unwrap();
        let unwrapped = vault.unwrap(&envelope).unwrap();
        assert_eq!(unwrapped, creds);
    }

    #[test]
    fn wrap_is_randomized() {
        let (vault, _) = Vault::generate();
        let creds = sample_credentials();
        let a = vault.wrap_credentials(&creds).unwrap();
        let b = vault.wrap_credentials(&creds).unwrap();
        // Fresh DEK and nonces per wrap
        assert_ne!(a.payload, b.payload);
        assert_ne!(a.wrapped_dek, b.wrapped_dek);
    }

    #[test]
    fn envelope_never_contains_plaintext() {
        let (vault, _) = Vault::generate();
        let envelope = vault.wrap_credentials(&sample_credentials()).unwrap();
        let serialized = serde_json::to_string(&envelope).unwrap();
        assert!(!serialized.contains("BEGIN TEST KEY"));
        assert!(!serialized.contains("10.0.0.4"));
    }

    #[test]
    fn tampered_payload_fails_closed() {
        let (vault, _) = Vault::generate();
        let mut envelope = vault.wrap_credentials(&sample_credentials()).unwrap();

        let mut blob = BASE64.decode(&envelope.payload).unwrap();
        // Flip one byte anywhere in nonce, ciphertext, or tag
        for index in [0, NONCE_LEN, blob.len() - 1] {
            let mut tampered = blob.clone();
            tampered[index] ^= 0xff;
            envelope.payload = BASE64.encode(&tampered);
            assert!(
                vault.unwrap(&envelope).is_err(),
                "flipping byte {} must fail",
                index
            );
        }
        // Restore and verify the envelope still decrypts
        envelope.payload = BASE64.encode(&blob);
        assert!(vault.unwrap(&envelope).is_ok());
    }

    #[test]
    fn tampered_wrapped_dek_fails_closed() {
        let (vault, _) = Vault::generate();
        let mut envelope = vault.wrap_credentials(&sample_credentials()).unwrap();

        let mut blob = BASE64.decode(&envelope.wrapped_dek).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        envelope.wrapped_dek = BASE64.encode(&blob);
        assert!(vault.unwrap(&envelope).is_err());
    }

    #[test]
    fn wrong_master_key_cannot_unwrap() {
        let (vault_a, _) = Vault::generate();
        let (vault_b, _) = Vault::generate();
        let envelope = vault_a.wrap_credentials(&sample_credentials()).unwrap();
        assert!(vault_b.unwrap(&envelope).is_err());
    }

    #[test]
    fn master_key_survives_kms_state() {
        let (vault, state) = Vault::generate();
        let envelope = vault.wrap_credentials(&sample_credentials()).unwrap();

        let reloaded = Vault::from_kms_state(&state).unwrap();
        assert_eq!(reloaded.unwrap(&envelope).unwrap(), sample_credentials());
    }

    #[test]
    fn rejects_short_master_key() {
        let encoded = BASE64.encode([0u8; 16]);
        assert!(Vault::from_base64(&encoded, "mk-short").is_err());
    }

    #[test]
    fn empty_map_roundtrips() {
        let (vault, _) = Vault::generate();
        let creds = CredentialMap::new();
        let envelope = vault.wrap_credentials(&creds).unwrap();
        assert_eq!(vault.unwrap(&envelope).unwrap(), creds);
    }
}
