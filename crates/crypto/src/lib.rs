//! Cryptographic collaborators of the transfer pipelines.
//!
//! - [`block`]: AES-256-GCM over one block, laid out as
//!   `ciphertext || tag (16) || iv (16)`.
//! - [`keys`]: the account seed, its Ed25519 signing key and HKDF child keys.
//! - [`middleware`]: the [`CryptoMiddleware`] seam the pipelines call through,
//!   and [`LocalCrypto`], which runs block crypto on the blocking pool.

pub mod block;
pub mod error;
pub mod hash;
pub mod keys;
pub mod middleware;

pub use block::{decrypt_block, encrypt_block};
pub use error::CryptoError;
pub use hash::keccak256;
pub use keys::AccountKeys;
pub use middleware::{CryptoFuture, CryptoMiddleware, LocalCrypto};
