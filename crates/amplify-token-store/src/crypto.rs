//! AES-128-CBC codec for persisted token stores.
//!
//! The on-disk format is the hex encoding of
//! `AES-128-CBC(key, iv = 0^16, PKCS#7(utf8 json))`.
//!
//! # Security Notes
//!
//! - [`FILE_STORE_KEY`] is compiled into the binary and the IV is fixed, so
//!   a plain file store only obfuscates its contents. Real protection comes
//!   from the secure store, whose key is random and held by the OS keychain.
//! - Random key material is generated with `ring`'s system CSPRNG.

use aes::Aes128;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::{Result, TokenStoreError};

/// Length of an AES-128 key in bytes.
pub const KEY_LEN: usize = 16;

/// Built-in key used by the plain file store.
pub const FILE_STORE_KEY: [u8; KEY_LEN] = *b"amplify-auth-sdk";

/// The CBC initialization vector. Always zero for this format.
const IV: [u8; 16] = [0u8; 16];

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Encrypt `plaintext` and return the hex-encoded ciphertext.
pub fn encrypt_to_hex(plaintext: &[u8], key: &[u8; KEY_LEN]) -> String {
    let ciphertext =
        Aes128CbcEnc::new(&(*key).into(), &IV.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext);

    tracing::trace!(
        plaintext_len = plaintext.len(),
        ciphertext_len = ciphertext.len(),
        "encrypted token store payload"
    );

    hex::encode(ciphertext)
}

/// Decode and decrypt a hex-encoded ciphertext.
///
/// # Errors
///
/// Returns [`TokenStoreError::DecryptionFailed`] if the input is not hex, is
/// not a whole number of blocks, or fails padding validation (wrong key).
pub fn decrypt_from_hex(encoded: &str, key: &[u8; KEY_LEN]) -> Result<Vec<u8>> {
    let ciphertext =
        hex::decode(encoded.trim()).map_err(|e| TokenStoreError::DecryptionFailed {
            reason: format!("payload is not hex: {e}"),
        })?;

    let plaintext = Aes128CbcDec::new(&(*key).into(), &IV.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| TokenStoreError::DecryptionFailed {
            reason: "bad padding, wrong key or corrupted data".into(),
        })?;

    tracing::trace!(
        ciphertext_len = ciphertext.len(),
        plaintext_len = plaintext.len(),
        "decrypted token store payload"
    );

    Ok(plaintext)
}

/// Generate `len` cryptographically secure random bytes.
///
/// # Errors
///
/// Returns [`TokenStoreError::Internal`] if the system CSPRNG fails.
pub fn random_bytes(len: usize) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut buf = vec![0u8; len];
    rng.fill(&mut buf)
        .map_err(|_| TokenStoreError::Internal("failed to generate random bytes".into()))?;
    Ok(buf)
}

/// Generate a fresh random AES-128 key.
pub fn random_key() -> Result<[u8; KEY_LEN]> {
    let bytes = random_bytes(KEY_LEN)?;
    let mut key = [0u8; KEY_LEN];
    key.copy_from_slice(&bytes);
    Ok(key)
}
