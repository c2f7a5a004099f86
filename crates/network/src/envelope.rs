//! Signed request envelopes.
//!
//! The text fields of a request are JSON-encoded into `requestBody`, hashed
//! with Keccak-256, and the hash is signed by the account key. The form
//! carries `requestBody`, `signature`, `publicKey` and `hash` (all hex
//! except the body) plus any binary attachments, which are not covered by
//! the hash.

use bytes::Bytes;
use cipherpart_crypto::{CryptoMiddleware, keccak256, keys};
use serde::Serialize;

use crate::{FormData, NetworkError};

/// The four envelope fields of a signed request.
#[derive(Debug, Clone, PartialEq)]
pub struct SignedEnvelope {
    pub request_body: String,
    pub signature: String,
    pub public_key: String,
    pub hash: String,
}

impl SignedEnvelope {
    /// Signs `fields` with the account behind `crypto`.
    pub async fn sign<T: Serialize + ?Sized>(
        crypto: &dyn CryptoMiddleware,
        fields: &T,
    ) -> Result<Self, NetworkError> {
        let request_body = serde_json::to_string(fields)?;
        let hash = keccak256(request_body.as_bytes());
        let signature = crypto.sign(hash.to_vec()).await?;
        let public_key = crypto.public_key().await?;
        Ok(Self {
            request_body,
            signature: hex::encode(signature),
            public_key: hex::encode(public_key),
            hash: hex::encode(hash),
        })
    }

    pub fn into_form(self) -> FormData {
        FormData::new()
            .text("requestBody", self.request_body)
            .text("signature", self.signature)
            .text("publicKey", self.public_key)
            .text("hash", self.hash)
    }
}

/// Builds a signed multipart form with binary `files` (`name`, `data`).
pub async fn signed_form<T: Serialize + ?Sized>(
    crypto: &dyn CryptoMiddleware,
    fields: &T,
    files: Vec<(&str, Bytes)>,
) -> Result<FormData, NetworkError> {
    let mut form = SignedEnvelope::sign(crypto, fields).await?.into_form();
    for (name, data) in files {
        form = form.file(name, name, data);
    }
    Ok(form)
}

/// Checks hash and signature of a signed form and returns its fields.
pub fn verify_envelope(form: &FormData) -> Result<serde_json::Value, NetworkError> {
    let field = |name: &str| {
        form.get_text(name)
            .ok_or_else(|| NetworkError::InvalidEnvelope(format!("missing {name}")))
    };
    let body = field("requestBody")?;
    let hash =
        hex::decode(field("hash")?).map_err(|e| NetworkError::InvalidEnvelope(e.to_string()))?;
    let signature =
        hex::decode(field("signature")?).map_err(|e| NetworkError::InvalidEnvelope(e.to_string()))?;
    let public_key =
        hex::decode(field("publicKey")?).map_err(|e| NetworkError::InvalidEnvelope(e.to_string()))?;

    if hash != keccak256(body.as_bytes()) {
        return Err(NetworkError::InvalidEnvelope("hash does not match body".into()));
    }
    if !keys::verify(&public_key, &hash, &signature) {
        return Err(NetworkError::InvalidEnvelope("bad signature".into()));
    }
    Ok(serde_json::from_str(body)?)
}
