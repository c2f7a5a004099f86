//! Network middleware seam.
//!
//! Two verbs are enough for the whole storage node API: `GET` with optional
//! headers (used for `Range`) and multipart `POST`. Implementations return
//! the status and raw body; mapping the body is left to the caller.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use serde::de::DeserializeOwned;

use crate::NetworkError;

/// Boxed future returned by every middleware call.
pub type NetworkFuture<'a, T> = BoxFuture<'a, Result<T, NetworkError>>;

/// HTTP capability shared by every session of a client.
pub trait NetworkMiddleware: Send + Sync {
    fn get(
        &self,
        url: String,
        headers: Vec<(String, String)>,
    ) -> NetworkFuture<'_, NetworkResponse>;

    fn post(&self, url: String, form: FormData) -> NetworkFuture<'_, NetworkResponse>;
}

/// One field of a multipart form.
#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
    Text(String),
    File { file_name: String, data: Bytes },
}

/// Multipart form body, fields kept in insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FormData {
    parts: Vec<(String, FormPart)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parts.push((name.into(), FormPart::Text(value.into())));
        self
    }

    pub fn file(
        mut self,
        name: impl Into<String>,
        file_name: impl Into<String>,
        data: Bytes,
    ) -> Self {
        self.parts.push((
            name.into(),
            FormPart::File {
                file_name: file_name.into(),
                data,
            },
        ));
        self
    }

    pub fn parts(&self) -> &[(String, FormPart)] {
        &self.parts
    }

    /// First text field called `name`.
    pub fn get_text(&self, name: &str) -> Option<&str> {
        self.parts.iter().find_map(|(n, p)| match p {
            FormPart::Text(v) if n == name => Some(v.as_str()),
            _ => None,
        })
    }

    /// First file field called `name`.
    pub fn get_file(&self, name: &str) -> Option<&Bytes> {
        self.parts.iter().find_map(|(n, p)| match p {
            FormPart::File { data, .. } if n == name => Some(data),
            _ => None,
        })
    }
}

/// Status and body of a completed request.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkResponse {
    pub status: u16,
    pub body: Bytes,
}

impl NetworkResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Turns a non-2xx response into [`NetworkError::Status`].
    pub fn error_for_status(self) -> Result<Self, NetworkError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(NetworkError::Status {
                status: self.status,
                body: String::from_utf8_lossy(&self.body).into_owned(),
            })
        }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, NetworkError> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}
