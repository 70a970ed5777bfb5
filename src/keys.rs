//! Envelope-encryption key hierarchy.
//!
//! One server master key wraps a per-user data-encryption key (DEK); each
//! stored image is encrypted with a key derived deterministically from the
//! owner's DEK and the image id. Compromise of blob storage alone never
//! exposes plaintext, and re-encrypting the same image re-derives the same
//! object key.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hkdf::Hkdf;
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;
use zeroize::ZeroizeOnDrop;

use crate::error::{PipelineError, PipelineResult};

/// Key length for AES-256
pub const KEY_LEN: usize = 32;

/// Nonce length for AES-GCM
pub const NONCE_LEN: usize = 12;

/// HKDF context strings. Versioned so a future scheme change cannot collide
/// with keys derived under the current one.
mod contexts {
    /// Master key derived from the operator-supplied secret
    pub const MASTER: &[u8] = b"pixvault:master:v1";

    /// Per-image object keys derived from a user DEK
    pub const OBJECT: &[u8] = b"pixvault:object:v1";
}

/// Secret key wrapper with automatic zeroization
#[derive(Clone, ZeroizeOnDrop)]
pub struct DataKey {
    #[zeroize(skip)]
    inner: Secret<[u8; KEY_LEN]>,
}

impl DataKey {
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self {
            inner: Secret::new(bytes),
        }
    }

    /// Expose the key bytes (use with caution)
    pub fn expose(&self) -> &[u8; KEY_LEN] {
        self.inner.expose_secret()
    }

    /// Generate a random key
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self::new(bytes)
    }
}

/// Derive a key using HKDF-SHA256
fn derive_key(ikm: &[u8], salt: &[u8], info: &[u8]) -> PipelineResult<DataKey> {
    let hk = Hkdf::<Sha256>::new(Some(salt), ikm);
    let mut okm = [0u8; KEY_LEN];

    hk.expand(info, &mut okm)
        .map_err(|e| PipelineError::Key(format!("key derivation failed: {}", e)))?;

    Ok(DataKey::new(okm))
}

fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    nonce
}

/// Holds the master key for the process lifetime and performs every key
/// operation the pipeline needs. Stateless given the master key: safe to
/// share across worker threads without locking.
pub struct KeyManager {
    master: DataKey,
}

impl KeyManager {
    /// Build from the operator-supplied master secret. Any secret of at
    /// least 16 bytes is accepted; the working master key is derived from it,
    /// never used raw.
    pub fn new(master_secret: &[u8]) -> PipelineResult<Self> {
        if master_secret.len() < 16 {
            return Err(PipelineError::Key(format!(
                "master secret too short: {} bytes (minimum 16)",
                master_secret.len()
            )));
        }

        let master = derive_key(master_secret, b"", contexts::MASTER)?;
        Ok(Self { master })
    }

    /// Generate a fresh per-user DEK. Called once at owner provisioning; the
    /// plaintext DEK only ever exists wrapped after this returns.
    pub fn generate_dek(&self) -> DataKey {
        DataKey::generate()
    }

    /// Encrypt a DEK under the master key. Returns base64(nonce || ciphertext),
    /// the only form in which a DEK is ever persisted.
    pub fn wrap(&self, dek: &DataKey) -> PipelineResult<String> {
        let cipher = Aes256Gcm::new_from_slice(self.master.expose())
            .map_err(|e| PipelineError::Key(format!("cipher init failed: {}", e)))?;

        let nonce_bytes = generate_nonce();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, dek.expose().as_slice())
            .map_err(|e| PipelineError::Key(format!("DEK wrap failed: {}", e)))?;

        let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        framed.extend_from_slice(&nonce_bytes);
        framed.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(framed))
    }

    /// Decrypt a wrapped DEK. Failure here is fatal and operator-visible: it
    /// means the master key is absent/rotated or the stored ciphertext was
    /// tampered with.
    pub fn unwrap(&self, wrapped: &str) -> PipelineResult<DataKey> {
        let result = self.try_unwrap(wrapped);
        if let Err(ref e) = result {
            tracing::error!(
                target: "pixvault::alert",
                error = %e,
                "DEK unwrap failed; possible master-key misconfiguration or tampering"
            );
        }
        result
    }

    fn try_unwrap(&self, wrapped: &str) -> PipelineResult<DataKey> {
        let framed = BASE64
            .decode(wrapped)
            .map_err(|e| PipelineError::Key(format!("malformed wrapped DEK: {}", e)))?;

        if framed.len() < NONCE_LEN + 16 {
            return Err(PipelineError::Key("wrapped DEK too short".into()));
        }

        let cipher = Aes256Gcm::new_from_slice(self.master.expose())
            .map_err(|e| PipelineError::Key(format!("cipher init failed: {}", e)))?;

        let nonce = Nonce::from_slice(&framed[..NONCE_LEN]);
        let plaintext = cipher
            .decrypt(nonce, &framed[NONCE_LEN..])
            .map_err(|_| PipelineError::Key("DEK unwrap authentication failed".into()))?;

        let bytes: [u8; KEY_LEN] = plaintext
            .as_slice()
            .try_into()
            .map_err(|_| PipelineError::Key("unwrapped DEK has wrong length".into()))?;

        Ok(DataKey::new(bytes))
    }

    /// Derive the encryption key for one image. Deterministic: the same
    /// (DEK, image id) pair always yields the same key, so re-running the
    /// encryption stage is idempotent.
    pub fn derive_object_key(&self, dek: &DataKey, image_id: i64) -> PipelineResult<DataKey> {
        derive_key(dek.expose(), &image_id.to_be_bytes(), contexts::OBJECT)
    }

    /// Encrypt an image payload with its object key. Output is nonce || ct.
    pub fn encrypt(&self, plaintext: &[u8], key: &DataKey) -> PipelineResult<Vec<u8>> {
        let cipher = Aes256Gcm::new_from_slice(key.expose())
            .map_err(|e| PipelineError::Key(format!("cipher init failed: {}", e)))?;

        let nonce_bytes = generate_nonce();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| PipelineError::Key(format!("encrypt failed: {}", e)))?;

        let mut framed = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        framed.extend_from_slice(&nonce_bytes);
        framed.extend_from_slice(&ciphertext);
        Ok(framed)
    }

    /// Decrypt an image payload.
    pub fn decrypt(&self, data: &[u8], key: &DataKey) -> PipelineResult<Vec<u8>> {
        if data.len() < NONCE_LEN + 16 {
            return Err(PipelineError::Key("ciphertext too short".into()));
        }

        let cipher = Aes256Gcm::new_from_slice(key.expose())
            .map_err(|e| PipelineError::Key(format!("cipher init failed: {}", e)))?;

        let nonce = Nonce::from_slice(&data[..NONCE_LEN]);
        cipher
            .decrypt(nonce, &data[NONCE_LEN..])
            .map_err(|_| PipelineError::Key("decrypt authentication failed".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> KeyManager {
        KeyManager::new(b"test-master-secret-32-bytes-long!").unwrap()
    }

    #[test]
    fn test_short_master_secret_rejected() {
        assert!(KeyManager::new(b"too-short").is_err());
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let km = manager();
        let dek = km.generate_dek();

        let wrapped = km.wrap(&dek).unwrap();
        let unwrapped = km.unwrap(&wrapped).unwrap();

        assert_eq!(dek.expose(), unwrapped.expose());
    }

    #[test]
    fn test_rotated_master_fails_unwrap() {
        let km = manager();
        let dek = km.generate_dek();
        let wrapped = km.wrap(&dek).unwrap();

        let rotated = KeyManager::new(b"a-different-master-secret-here!!").unwrap();
        assert!(rotated.unwrap(&wrapped).is_err());
    }

    #[test]
    fn test_tampered_wrap_fails() {
        let km = manager();
        let wrapped = km.wrap(&km.generate_dek()).unwrap();

        let mut framed = BASE64.decode(&wrapped).unwrap();
        let last = framed.len() - 1;
        framed[last] ^= 0x01;
        let tampered = BASE64.encode(framed);

        assert!(km.unwrap(&tampered).is_err());
        assert!(km.unwrap("not base64 at all").is_err());
    }

    #[test]
    fn test_object_key_derivation_deterministic() {
        let km = manager();
        let dek = km.generate_dek();

        let k1 = km.derive_object_key(&dek, 42).unwrap();
        let k2 = km.derive_object_key(&dek, 42).unwrap();
        assert_eq!(k1.expose(), k2.expose());

        // Different images get different keys
        let k3 = km.derive_object_key(&dek, 43).unwrap();
        assert_ne!(k1.expose(), k3.expose());

        // Different DEKs get different keys for the same image
        let other = km.generate_dek();
        let k4 = km.derive_object_key(&other, 42).unwrap();
        assert_ne!(k1.expose(), k4.expose());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let km = manager();
        let dek = km.generate_dek();
        let key = km.derive_object_key(&dek, 7).unwrap();

        let plaintext = b"raw photo bytes";
        let ciphertext = km.encrypt(plaintext, &key).unwrap();
        assert_ne!(&ciphertext[NONCE_LEN..], plaintext.as_slice());

        let decrypted = km.decrypt(&ciphertext, &key).unwrap();
        assert_eq!(decrypted.as_slice(), plaintext.as_slice());
    }

    #[test]
    fn test_wrong_object_key_fails() {
        let km = manager();
        let dek = km.generate_dek();
        let key = km.derive_object_key(&dek, 7).unwrap();
        let other = km.derive_object_key(&dek, 8).unwrap();

        let ciphertext = km.encrypt(b"payload", &key).unwrap();
        assert!(km.decrypt(&ciphertext, &other).is_err());
    }
}
