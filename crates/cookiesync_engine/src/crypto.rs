//! Protection of the API token at rest using AES-256-GCM.
//!
//! The stored form is base64 of `nonce (12 bytes) || ciphertext || tag (16 bytes)`.

use crate::error::{SyncError, SyncResult};
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

const HKDF_SALT: &[u8] = b"cookiesync-credential-salt";
const HKDF_INFO: &[u8] = b"cookiesync-token-key-v1";

/// Key material derived from the credential secret. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
struct CredentialKey {
    bytes: [u8; KEY_SIZE],
}

impl CredentialKey {
    fn derive(secret: &[u8]) -> SyncResult<Self> {
        let hk = Hkdf::<Sha256>::new(Some(HKDF_SALT), secret);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(HKDF_INFO, &mut bytes)
            .map_err(|_| SyncError::Configuration("credential key derivation failed".into()))?;
        Ok(Self { bytes })
    }
}

/// Encrypts and decrypts the API token stored in the settings bucket.
pub struct CredentialCipher {
    cipher: Aes256Gcm,
}

impl CredentialCipher {
    /// Creates a cipher whose key is derived from `secret` with HKDF-SHA256.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the secret is empty.
    pub fn from_secret(secret: &str) -> SyncResult<Self> {
        if secret.is_empty() {
            return Err(SyncError::Configuration("credential secret is empty".into()));
        }
        let key = CredentialKey::derive(secret.as_bytes())?;
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&key.bytes));
        Ok(Self { cipher })
    }

    /// Encrypts a plaintext token into its stored form.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the token is empty or encryption fails.
    pub fn encrypt_token(&self, token: &str) -> SyncResult<String> {
        if token.is_empty() {
            return Err(SyncError::Configuration("auth token is empty".into()));
        }
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, token.as_bytes())
            .map_err(|_| SyncError::Configuration("auth token encryption failed".into()))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend(ciphertext);
        Ok(BASE64.encode(sealed))
    }

    /// Decrypts a stored token.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the value is not valid base64, was
    /// produced with another secret, or decrypts to an empty token.
    pub fn decrypt_token(&self, stored: &str) -> SyncResult<String> {
        let failed = || SyncError::Configuration("auth token decryption failed, check settings".into());

        let sealed = BASE64.decode(stored.trim()).map_err(|_| failed())?;
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(failed());
        }
        let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);
        let mut plaintext = self
            .cipher
            .decrypt(nonce, &sealed[NONCE_SIZE..])
            .map_err(|_| failed())?;

        let token = String::from_utf8(plaintext.clone()).map_err(|_| failed());
        plaintext.zeroize();
        let token = token?;
        if token.is_empty() {
            return Err(SyncError::Configuration("decrypted auth token is empty".into()));
        }
        Ok(token)
    }
}

impl fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialCipher")
            .field("cipher", &"Aes256Gcm")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let cipher = CredentialCipher::from_secret("secret").unwrap();
        let stored = cipher.encrypt_token("api-token-123").unwrap();
        assert!(!stored.contains("api-token-123"));
        assert_eq!(cipher.decrypt_token(&stored).unwrap(), "api-token-123");
    }

    #[test]
    fn nonce_is_random() {
        let cipher = CredentialCipher::from_secret("secret").unwrap();
        let a = cipher.encrypt_token("t").unwrap();
        let b = cipher.encrypt_token("t").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_secret_is_configuration_error() {
        let stored = CredentialCipher::from_secret("one")
            .unwrap()
            .encrypt_token("t")
            .unwrap();
        let err = CredentialCipher::from_secret("two")
            .unwrap()
            .decrypt_token(&stored)
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn garbage_is_rejected() {
        let cipher = CredentialCipher::from_secret("secret").unwrap();
        assert!(cipher.decrypt_token("not base64!").is_err());
        assert!(cipher.decrypt_token(&BASE64.encode([0u8; 8])).is_err());
        assert!(cipher.encrypt_token("").is_err());
        assert!(CredentialCipher::from_secret("").is_err());
    }
}
