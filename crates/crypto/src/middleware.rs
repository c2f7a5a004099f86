//! Crypto middleware seam.
//!
//! The pipelines never touch key material directly; they call through
//! [`CryptoMiddleware`], which an embedding application may back with a
//! hardware wallet, a remote signer, or [`LocalCrypto`].

use std::sync::Arc;

use bytes::Bytes;
use cipherpart_protocol::KEY_LEN;
use futures_util::future::BoxFuture;

use crate::block::{decrypt_block, encrypt_block};
use crate::{AccountKeys, CryptoError};

/// Boxed future returned by every middleware call.
pub type CryptoFuture<'a, T> = BoxFuture<'a, Result<T, CryptoError>>;

/// Crypto capability shared by every session of an account.
pub trait CryptoMiddleware: Send + Sync {
    /// Seals one block under `key`.
    fn encrypt(&self, key: [u8; KEY_LEN], plaintext: Bytes) -> CryptoFuture<'_, Vec<u8>>;

    /// Opens one block sealed under `key`.
    fn decrypt(&self, key: [u8; KEY_LEN], sealed: Bytes) -> CryptoFuture<'_, Vec<u8>>;

    /// Signs a request payload hash with the account key.
    fn sign(&self, payload: Vec<u8>) -> CryptoFuture<'_, Vec<u8>>;

    /// Derives a child key for `path`.
    fn derive(&self, path: String) -> CryptoFuture<'_, [u8; 32]>;

    /// Returns the account public key.
    fn public_key(&self) -> CryptoFuture<'_, Vec<u8>>;
}

/// In-process middleware backed by [`AccountKeys`].
///
/// Block encryption and decryption run on tokio's blocking pool, so a
/// crypto stage with concurrency above one really runs in parallel.
#[derive(Clone)]
pub struct LocalCrypto {
    keys: Arc<AccountKeys>,
}

impl LocalCrypto {
    pub fn new(keys: AccountKeys) -> Self {
        Self {
            keys: Arc::new(keys),
        }
    }

    pub fn keys(&self) -> &AccountKeys {
        &self.keys
    }
}

impl CryptoMiddleware for LocalCrypto {
    fn encrypt(&self, key: [u8; KEY_LEN], plaintext: Bytes) -> CryptoFuture<'_, Vec<u8>> {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || encrypt_block(&key, &plaintext))
                .await
                .map_err(|e| CryptoError::Failure(format!("encrypt task failed: {e}")))?
        })
    }

    fn decrypt(&self, key: [u8; KEY_LEN], sealed: Bytes) -> CryptoFuture<'_, Vec<u8>> {
        Box::pin(async move {
            tokio::task::spawn_blocking(move || decrypt_block(&key, &sealed))
                .await
                .map_err(|e| CryptoError::Failure(format!("decrypt task failed: {e}")))?
        })
    }

    fn sign(&self, payload: Vec<u8>) -> CryptoFuture<'_, Vec<u8>> {
        Box::pin(async move { Ok(self.keys.sign(&payload).to_vec()) })
    }

    fn derive(&self, path: String) -> CryptoFuture<'_, [u8; 32]> {
        Box::pin(async move { Ok(self.keys.derive(&path)) })
    }

    fn public_key(&self) -> CryptoFuture<'_, Vec<u8>> {
        Box::pin(async move { Ok(self.keys.public_key().to_vec()) })
    }
}
