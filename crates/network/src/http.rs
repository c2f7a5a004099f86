//! `reqwest` implementation of [`NetworkMiddleware`].

use std::time::Duration;

use reqwest::multipart::{Form, Part};
use tracing::trace;

use crate::{FormData, FormPart, NetworkError, NetworkFuture, NetworkMiddleware, NetworkResponse};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// HTTP transport backed by a shared [`reqwest::Client`].
#[derive(Debug, Clone)]
pub struct HttpNetwork {
    client: reqwest::Client,
}

impl HttpNetwork {
    /// Builds a client with [`DEFAULT_TIMEOUT`].
    pub fn new() -> Result<Self, NetworkError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// Wraps an existing client, keeping its pool and settings.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn finish(response: reqwest::Response) -> Result<NetworkResponse, NetworkError> {
        let status = response.status().as_u16();
        let body = response.bytes().await?;
        Ok(NetworkResponse { status, body })
    }
}

fn to_multipart(form: FormData) -> Form {
    form.parts()
        .iter()
        .cloned()
        .fold(Form::new(), |acc, (name, part)| match part {
            FormPart::Text(value) => acc.text(name, value),
            FormPart::File { file_name, data } => {
                let len = data.len() as u64;
                let part = Part::stream_with_length(reqwest::Body::from(data), len)
                    .file_name(file_name);
                acc.part(name, part)
            }
        })
}

impl NetworkMiddleware for HttpNetwork {
    fn get(
        &self,
        url: String,
        headers: Vec<(String, String)>,
    ) -> NetworkFuture<'_, NetworkResponse> {
        Box::pin(async move {
            trace!(%url, "GET");
            let mut request = self.client.get(&url);
            for (name, value) in headers {
                request = request.header(name, value);
            }
            Self::finish(request.send().await?).await
        })
    }

    fn post(&self, url: String, form: FormData) -> NetworkFuture<'_, NetworkResponse> {
        Box::pin(async move {
            trace!(%url, fields = form.parts().len(), "POST");
            let response = self.client.post(&url).multipart(to_multipart(form)).send().await?;
            Self::finish(response).await
        })
    }
}
