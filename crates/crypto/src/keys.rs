//! Account key material.
//!
//! A single 32-byte seed is the root of everything the account signs or
//! derives. The Ed25519 signing key and every child key are HKDF-SHA256
//! expansions of the seed under distinct labels.

use std::fmt;

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;

use crate::CryptoError;

const SIGNING_LABEL: &str = "cipherpart/signing";

/// Seed-derived account keys.
#[derive(Clone)]
pub struct AccountKeys {
    seed: [u8; 32],
    signing: SigningKey,
}

impl fmt::Debug for AccountKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKeys")
            .field("public_key", &hex::encode(self.public_key()))
            .finish_non_exhaustive()
    }
}

impl AccountKeys {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing = SigningKey::from_bytes(&expand(&seed, SIGNING_LABEL));
        Self { seed, signing }
    }

    /// Generates a fresh random seed.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut seed);
        Self::from_seed(seed)
    }

    /// Parses a 64-character hex seed.
    pub fn from_hex(seed_hex: &str) -> Result<Self, CryptoError> {
        let bytes =
            hex::decode(seed_hex.trim()).map_err(|e| CryptoError::InvalidSeed(e.to_string()))?;
        let seed: [u8; 32] = bytes
            .try_into()
            .map_err(|b: Vec<u8>| {
                CryptoError::InvalidSeed(format!("expected 32 bytes, got {}", b.len()))
            })?;
        Ok(Self::from_seed(seed))
    }

    pub fn seed_hex(&self) -> String {
        hex::encode(self.seed)
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }

    /// Derives the 32-byte child key for `path`.
    pub fn derive(&self, path: &str) -> [u8; 32] {
        expand(&self.seed, path)
    }
}

/// Verifies an Ed25519 signature produced by [`AccountKeys::sign`].
pub fn verify(public_key: &[u8], message: &[u8], signature: &[u8]) -> bool {
    let Ok(pk) = <[u8; 32]>::try_from(public_key) else {
        return false;
    };
    let Ok(sig) = <[u8; 64]>::try_from(signature) else {
        return false;
    };
    let Ok(vk) = VerifyingKey::from_bytes(&pk) else {
        return false;
    };
    vk.verify(message, &Signature::from_bytes(&sig)).is_ok()
}

fn expand(seed: &[u8; 32], label: &str) -> [u8; 32] {
    let hk = Hkdf::<Sha256>::new(None, seed);
    let mut okm = [0u8; 32];
    // 32 bytes is far below the 255 * 32 HKDF-SHA256 output limit.
    let _ = hk.expand(label.as_bytes(), &mut okm);
    okm
}
