//! AES-256-GCM block encryption.
//!
//! Every block is sealed independently under the object key with a fresh
//! 16-byte IV. The IV travels after the tag so a block can be opened
//! without any side channel:
//!
//! ```text
//! | ciphertext (len = plaintext len) | tag (16) | iv (16) |
//! ```

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Nonce};
use cipherpart_protocol::{BLOCK_OVERHEAD, IV_LEN, KEY_LEN};
use rand::RngCore;

use crate::CryptoError;

/// AES-256-GCM with a 16-byte nonce.
type BlockCipher = AesGcm<Aes256, U16>;

/// Encrypts one block. Output is `plaintext.len() + 32` bytes.
pub fn encrypt_block(key: &[u8; KEY_LEN], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = BlockCipher::new(key.into());

    let mut iv = [0u8; IV_LEN];
    rand::thread_rng().fill_bytes(&mut iv);

    let mut sealed = cipher
        .encrypt(Nonce::<U16>::from_slice(&iv), plaintext)
        .map_err(|_| CryptoError::Failure("AES-GCM seal failed".into()))?;
    sealed.extend_from_slice(&iv);
    Ok(sealed)
}

/// Decrypts one block produced by [`encrypt_block`].
///
/// Fails closed: a tag mismatch yields no plaintext at all.
pub fn decrypt_block(key: &[u8; KEY_LEN], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if (sealed.len() as u64) < BLOCK_OVERHEAD {
        return Err(CryptoError::CiphertextTooShort { len: sealed.len() });
    }
    let (body, iv) = sealed.split_at(sealed.len() - IV_LEN);

    let cipher = BlockCipher::new(key.into());
    cipher
        .decrypt(Nonce::<U16>::from_slice(iv), body)
        .map_err(|_| CryptoError::TagMismatch)
}
