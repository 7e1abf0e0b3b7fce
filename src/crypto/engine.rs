use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Helper to create an HMAC instance, resolving trait ambiguity.
fn new_hmac(key: &[u8]) -> Result<HmacSha256, AppError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| AppError::Crypto(format!("HMAC init failed: {e}")))
}

/// Handles AES-256-GCM encryption for stored tokens and HMAC signing for
/// OAuth state parameters.
pub struct CryptoEngine {
    cipher: Aes256Gcm,
    hmac_key: Vec<u8>,
}

impl CryptoEngine {
    /// Create a new CryptoEngine from base64-encoded keys.
    pub fn new(master_key_b64: &str, hmac_secret_b64: &str) -> Result<Self, AppError> {
        let master_key = base64::engine::general_purpose::STANDARD
            .decode(master_key_b64)
            .map_err(|e| AppError::Crypto(format!("Invalid MASTER_KEY base64: {e}")))?;

        if master_key.len() != 32 {
            return Err(AppError::Crypto(format!(
                "MASTER_KEY must be 32 bytes, got {}",
                master_key.len()
            )));
        }

        let hmac_key = base64::engine::general_purpose::STANDARD
            .decode(hmac_secret_b64)
            .map_err(|e| AppError::Crypto(format!("Invalid HMAC_SECRET base64: {e}")))?;

        if hmac_key.len() < 32 {
            return Err(AppError::Crypto(format!(
                "HMAC_SECRET must be at least 32 bytes, got {}",
                hmac_key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(&master_key)
            .map_err(|e| AppError::Crypto(format!("Failed to init AES cipher: {e}")))?;

        Ok(Self { cipher, hmac_key })
    }

    /// Encrypt plaintext using AES-256-GCM. Returns base64(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, AppError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| AppError::Crypto(format!("Encryption failed: {e}")))?;

        let mut combined = nonce_bytes.to_vec();
        combined.extend_from_slice(&ciphertext);

        Ok(base64::engine::general_purpose::STANDARD.encode(&combined))
    }

    /// Decrypt base64(nonce || ciphertext) back to plaintext.
    pub fn decrypt(&self, encrypted_b64: &str) -> Result<String, AppError> {
        let combined = base64::engine::general_purpose::STANDARD
            .decode(encrypted_b64)
            .map_err(|e| AppError::Crypto(format!("Invalid base64: {e}")))?;

        if combined.len() < NONCE_LEN {
            return Err(AppError::Crypto("Ciphertext too short".into()));
        }

        let (nonce_bytes, ciphertext) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| AppError::Crypto(format!("Decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| AppError::Crypto(format!("Invalid UTF-8 after decrypt: {e}")))
    }

    /// Sign a payload with HMAC-SHA256. Returns base64url(hmac || payload).
    pub fn sign(&self, payload: &[u8]) -> Result<String, AppError> {
        let mut mac = new_hmac(&self.hmac_key)?;
        mac.update(payload);
        let signature = mac.finalize().into_bytes();

        let mut combined = signature.to_vec();
        combined.extend_from_slice(payload);

        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&combined))
    }

    /// Verify a value produced by [`CryptoEngine::sign`] and return its payload.
    pub fn verify(&self, signed: &str) -> Result<Vec<u8>, AppError> {
        let combined = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signed)
            .map_err(|_| AppError::MalformedState("not base64url".into()))?;

        if combined.len() <= SIGNATURE_LEN {
            return Err(AppError::MalformedState("too short".into()));
        }

        let (signature, payload) = combined.split_at(SIGNATURE_LEN);

        let mut mac = new_hmac(&self.hmac_key)?;
        mac.update(payload);
        mac.verify_slice(signature)
            .map_err(|_| AppError::MalformedState("signature mismatch".into()))?;

        Ok(payload.to_vec())
    }

    /// Constant-time comparison of two shared secrets.
    pub fn secrets_match(&self, provided: &str, expected: &str) -> bool {
        if expected.is_empty() {
            return false;
        }
        let Ok(mut mac) = new_hmac(&self.hmac_key) else {
            return false;
        };
        mac.update(expected.as_bytes());
        let expected_tag = mac.finalize().into_bytes();

        let Ok(mut mac) = new_hmac(&self.hmac_key) else {
            return false;
        };
        mac.update(provided.as_bytes());
        mac.verify_slice(&expected_tag).is_ok()
    }
}
