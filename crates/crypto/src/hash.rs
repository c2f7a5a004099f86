use sha3::{Digest, Keccak256};

/// Keccak-256 digest of `data` (the pre-standard SHA-3 padding).
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    hasher.finalize().into()
}
