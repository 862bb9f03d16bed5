//! Credential cipher.
//!
//! Data-source passwords are stored as `Base64(IV || ciphertext)` using
//! AES-256-CBC with PKCS#7 padding. The layout is shared with records written
//! by earlier deployments, so it must not change.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use zeroize::Zeroizing;

use common::errors::{AppError, AppResult};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

const KEY_LEN: usize = 32;
const IV_LEN: usize = 16;
const BLOCK_LEN: usize = 16;

/// Symmetric cipher for stored credentials.
#[derive(Clone)]
pub struct CredentialCipher {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl CredentialCipher {
    /// Derives the key from `secret`: its UTF-8 bytes copied into a zeroed
    /// 32-byte buffer, truncated when longer.
    pub fn new(secret: &str) -> Self {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        let bytes = secret.as_bytes();
        let len = bytes.len().min(KEY_LEN);
        key[..len].copy_from_slice(&bytes[..len]);
        Self { key }
    }

    /// Encrypts with a fresh random IV.
    pub fn encrypt(&self, plaintext: &str) -> AppResult<String> {
        let iv: [u8; IV_LEN] = rand::random();
        let ciphertext = Aes256CbcEnc::new_from_slices(self.key.as_slice(), &iv)
            .map_err(|e| AppError::Crypto(format!("cipher init failed: {e}")))?
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

        let mut blob = Vec::with_capacity(IV_LEN + ciphertext.len());
        blob.extend_from_slice(&iv);
        blob.extend_from_slice(&ciphertext);
        Ok(STANDARD.encode(blob))
    }

    /// Reverses [`encrypt`](Self::encrypt). Any malformed input is a
    /// `Crypto` error.
    pub fn decrypt(&self, encoded: &str) -> AppResult<Zeroizing<String>> {
        let blob = STANDARD
            .decode(encoded.trim())
            .map_err(|_| AppError::Crypto("credential is not valid base64".into()))?;

        if blob.len() < IV_LEN + BLOCK_LEN || (blob.len() - IV_LEN) % BLOCK_LEN != 0 {
            return Err(AppError::Crypto("credential has an invalid length".into()));
        }
        let (iv, ciphertext) = blob.split_at(IV_LEN);

        let plaintext = Aes256CbcDec::new_from_slices(self.key.as_slice(), iv)
            .map_err(|e| AppError::Crypto(format!("cipher init failed: {e}")))?
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| AppError::Crypto("credential could not be decrypted".into()))?;

        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .map_err(|_| AppError::Crypto("decrypted credential is not UTF-8".into()))
    }
}

impl std::fmt::Debug for CredentialCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialCipher").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn cipher() -> CredentialCipher {
        CredentialCipher::new("unit-test-secret")
    }

    #[test]
    fn test_round_trip() {
        let c = cipher();
        let long = "x".repeat(100);
        for plaintext in ["", "s3cret!", "пароль-密码-🔑", long.as_str()] {
            let blob = c.encrypt(plaintext).unwrap();
            assert_eq!(c.decrypt(&blob).unwrap().as_str(), plaintext);
        }
    }

    #[test]
    fn test_random_iv_per_encryption() {
        let c = cipher();
        let a = c.encrypt("same").unwrap();
        let b = c.encrypt("same").unwrap();
        assert_ne!(a, b);
        assert_eq!(c.decrypt(&a).unwrap().as_str(), c.decrypt(&b).unwrap().as_str());
    }

    #[test]
    fn test_blob_layout_is_iv_then_blocks() {
        let blob = STANDARD.decode(cipher().encrypt("abc").unwrap()).unwrap();
        assert_eq!(blob.len(), IV_LEN + BLOCK_LEN);
    }

    #[test]
    fn test_key_is_truncated_to_32_bytes() {
        let long = "k".repeat(40);
        let blob = CredentialCipher::new(&long).encrypt("pw").unwrap();
        let same_prefix = CredentialCipher::new(&"k".repeat(32));
        assert_eq!(same_prefix.decrypt(&blob).unwrap().as_str(), "pw");
    }

    #[test]
    fn test_malformed_input_is_rejected() {
        let c = cipher();
        assert!(matches!(c.decrypt("not base64!!"), Err(AppError::Crypto(_))));
        assert!(matches!(c.decrypt(&STANDARD.encode([0u8; 8])), Err(AppError::Crypto(_))));
        assert!(matches!(c.decrypt(&STANDARD.encode([0u8; 40])), Err(AppError::Crypto(_))));

        let blob = c.encrypt("secret").unwrap();
        let other = CredentialCipher::new("another-secret");
        // A wrong key almost always breaks the padding; it must never panic.
        let _ = other.decrypt(&blob);
    }

    #[test]
    fn test_debug_hides_key() {
        assert_eq!(format!("{:?}", cipher()), "CredentialCipher { .. }");
    }
}
