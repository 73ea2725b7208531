//! Symmetric crypto helper: AES-256-GCM payload encryption and PBKDF2 key
//! derivation.
//!
//! Wire format: ciphertext and IV are carried separately as base64; a fresh
//! random 12-byte nonce is generated per encryption and never reused. Key
//! material travels as base64-encoded raw bytes.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, Key, KeyInit, Nonce};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;
use thiserror::Error;

use ledgerbook_core::errors::Error;
use ledgerbook_core::secrets::{CipherText, SecretCipher};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const PBKDF2_ITERATIONS: u32 = 100_000;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed")]
    EncryptFailed,

    /// Key, IV, or ciphertext mismatch. The AEAD gives no more detail.
    #[error("Decryption failed: key, IV, or ciphertext mismatch")]
    DecryptFailed,

    #[error("Invalid key material: {0}")]
    InvalidKey(String),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Decrypted payload is not valid UTF-8")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Derive a 256-bit key from a password: PBKDF2-HMAC-SHA256 with a
/// caller-supplied salt.
pub fn derive_key(password: &str, salt: &[u8]) -> [u8; KEY_LEN] {
    let mut key = [0_u8; KEY_LEN];
    pbkdf2::pbkdf2_hmac::<sha2::Sha256>(password.as_bytes(), salt, PBKDF2_ITERATIONS, &mut key);
    key
}

/// AES-256-GCM cipher over string payloads.
#[derive(Clone)]
pub struct PayloadCipher {
    key: [u8; KEY_LEN],
}

impl PayloadCipher {
    pub fn new(key: [u8; KEY_LEN]) -> Self {
        Self { key }
    }

    /// Import base64-encoded raw key material.
    pub fn from_base64(key_base64: &str) -> Result<Self, CryptoError> {
        let bytes = BASE64.decode(key_base64)?;
        let key: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CryptoError::InvalidKey(format!("expected {KEY_LEN} key bytes")))?;
        Ok(Self::new(key))
    }

    pub fn from_password(password: &str, salt: &[u8]) -> Self {
        Self::new(derive_key(password, salt))
    }

    /// Export the raw key material as base64, for session storage.
    pub fn key_base64(&self) -> String {
        BASE64.encode(self.key)
    }

    pub fn encrypt_str(&self, plaintext: &str) -> Result<CipherText, CryptoError> {
        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let mut nonce_bytes = [0_u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);

        let ciphertext = cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptFailed)?;

        Ok(CipherText {
            encrypted: BASE64.encode(ciphertext),
            iv: BASE64.encode(nonce_bytes),
        })
    }

    pub fn decrypt_str(&self, encrypted: &str, iv: &str) -> Result<String, CryptoError> {
        let ciphertext = BASE64.decode(encrypted)?;
        let nonce_bytes = BASE64.decode(iv)?;
        if nonce_bytes.len() != NONCE_LEN {
            return Err(CryptoError::DecryptFailed);
        }

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.key));
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| CryptoError::DecryptFailed)?;
        Ok(String::from_utf8(plaintext)?)
    }
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.write_str("PayloadCipher")
    }
}

impl SecretCipher for PayloadCipher {
    fn encrypt(&self, plaintext: &str) -> ledgerbook_core::Result<CipherText> {
        self.encrypt_str(plaintext)
            .map_err(|err| Error::crypto(err.to_string()))
    }

    fn decrypt(&self, encrypted: &str, iv: &str) -> ledgerbook_core::Result<String> {
        self.decrypt_str(encrypted, iv)
            .map_err(|err| Error::crypto(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> PayloadCipher {
        PayloadCipher::from_password("correct horse battery staple", b"user-salt")
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = cipher();
        let sealed = cipher.encrypt_str("Main Checking").expect("encrypt");
        let opened = cipher
            .decrypt_str(&sealed.encrypted, &sealed.iv)
            .expect("decrypt");
        assert_eq!(opened, "Main Checking");
    }

    #[test]
    fn every_encryption_uses_a_fresh_nonce() {
        let cipher = cipher();
        let first = cipher.encrypt_str("same input").expect("encrypt");
        let second = cipher.encrypt_str("same input").expect("encrypt");
        assert_ne!(first.iv, second.iv);
        assert_ne!(first.encrypted, second.encrypted);
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let sealed = cipher().encrypt_str("secret").expect("encrypt");
        let other = PayloadCipher::from_password("wrong password", b"user-salt");
        let err = other
            .decrypt_str(&sealed.encrypted, &sealed.iv)
            .expect_err("wrong key");
        assert!(matches!(err, CryptoError::DecryptFailed));
    }

    #[test]
    fn tampered_ciphertext_fails_authentication() {
        let cipher = cipher();
        let sealed = cipher.encrypt_str("secret").expect("encrypt");
        let mut bytes = BASE64.decode(&sealed.encrypted).expect("decode");
        bytes[0] ^= 0x01;
        let tampered = BASE64.encode(bytes);

        let err = cipher
            .decrypt_str(&tampered, &sealed.iv)
            .expect_err("tampered payload");
        assert!(matches!(err, CryptoError::DecryptFailed));
    }

    #[test]
    fn key_derivation_is_deterministic_per_password_and_salt() {
        let first = derive_key("password", b"salt-a");
        let second = derive_key("password", b"salt-a");
        let other_salt = derive_key("password", b"salt-b");
        assert_eq!(first, second);
        assert_ne!(first, other_salt);
    }

    #[test]
    fn keys_round_trip_through_base64() {
        let cipher = cipher();
        let exported = cipher.key_base64();
        let imported = PayloadCipher::from_base64(&exported).expect("import");

        let sealed = cipher.encrypt_str("shared").expect("encrypt");
        assert_eq!(
            imported
                .decrypt_str(&sealed.encrypted, &sealed.iv)
                .expect("decrypt with imported key"),
            "shared"
        );

        assert!(PayloadCipher::from_base64("dG9vLXNob3J0").is_err());
    }

    #[test]
    fn secret_cipher_trait_degrades_to_core_errors() {
        let cipher = cipher();
        let err = SecretCipher::decrypt(&cipher, "bm90LXJlYWw=", "bm9uY2U=").expect_err("bad iv");
        assert!(matches!(err, Error::Crypto(_)));
    }
}
