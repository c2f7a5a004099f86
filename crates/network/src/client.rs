//! Typed storage node client.
//!
//! One method per storage node call. Every request is wrapped in a signed
//! envelope; every non-2xx answer becomes [`NetworkError::Status`].

use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use cipherpart_crypto::CryptoMiddleware;
use cipherpart_protocol::constants::{
    DOWNLOAD_PATH, FILE_SUFFIX, INIT_UPLOAD_PATH, METADATA_SUFFIX, UPLOAD_PATH, UPLOAD_STATUS_PATH,
};
use cipherpart_protocol::messages::{
    DownloadRequest, DownloadResponse, InitUploadRequest, UploadPartRequest, UploadStatusRequest,
    UploadStatusResponse,
};
use cipherpart_protocol::sizing::range_header;
use cipherpart_protocol::{FileHandle, FileMetadata};
use tracing::debug;

use crate::{NetworkError, NetworkMiddleware, signed_form};

/// Client for one storage node, shared by every session talking to it.
#[derive(Clone)]
pub struct StorageClient {
    endpoint: String,
    network: Arc<dyn NetworkMiddleware>,
    crypto: Arc<dyn CryptoMiddleware>,
}

impl std::fmt::Debug for StorageClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageClient")
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl StorageClient {
    pub fn new(
        endpoint: impl Into<String>,
        network: Arc<dyn NetworkMiddleware>,
        crypto: Arc<dyn CryptoMiddleware>,
    ) -> Self {
        let endpoint = endpoint.into().trim_end_matches('/').to_string();
        Self {
            endpoint,
            network,
            crypto,
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn crypto(&self) -> &Arc<dyn CryptoMiddleware> {
        &self.crypto
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.endpoint)
    }

    /// `GET {endpoint}/`. Fails on transport errors and non-2xx answers.
    pub async fn probe(&self) -> Result<(), NetworkError> {
        self.network
            .get(self.url("/"), Vec::new())
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Registers the object and uploads its encrypted metadata record.
    pub async fn init_upload(
        &self,
        handle: &FileHandle,
        metadata: &FileMetadata,
    ) -> Result<(), NetworkError> {
        let layout = metadata.layout();
        let sealed = self
            .crypto
            .encrypt(*handle.key(), Bytes::from(metadata.to_bytes()?))
            .await?;
        let fields = InitUploadRequest {
            file_handle: handle.location_hex(),
            file_size_in_byte: layout.size_on_disk,
            end_index: layout.parts,
        };
        let form = signed_form(
            self.crypto.as_ref(),
            &fields,
            vec![("metadata", Bytes::from(sealed))],
        )
        .await?;

        debug!(
            location = %fields.file_handle,
            size_on_disk = layout.size_on_disk,
            parts = layout.parts,
            "init upload"
        );
        self.network
            .post(self.url(INIT_UPLOAD_PATH), form)
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// Uploads the 0-based `part`; the wire carries it 1-based.
    pub async fn upload_part(
        &self,
        handle: &FileHandle,
        part: u64,
        end_index: u64,
        data: Bytes,
    ) -> Result<(), NetworkError> {
        let fields = UploadPartRequest {
            file_handle: handle.location_hex(),
            part_index: part + 1,
            end_index,
        };
        let len = data.len();
        let form = signed_form(self.crypto.as_ref(), &fields, vec![("chunkData", data)]).await?;
        self.network
            .post(self.url(UPLOAD_PATH), form)
            .await?
            .error_for_status()?;
        debug!(part, bytes = len, "part uploaded");
        Ok(())
    }

    /// Polls the node's view of the upload.
    pub async fn upload_status(
        &self,
        handle: &FileHandle,
    ) -> Result<UploadStatusResponse, NetworkError> {
        let fields = UploadStatusRequest {
            file_handle: handle.location_hex(),
        };
        let form = signed_form(self.crypto.as_ref(), &fields, Vec::new()).await?;
        self.network
            .post(self.url(UPLOAD_STATUS_PATH), form)
            .await?
            .error_for_status()?
            .json()
    }

    /// Finalizes the upload, failing if the node reports missing parts.
    pub async fn finalize_upload(&self, handle: &FileHandle) -> Result<(), NetworkError> {
        let status = self.upload_status(handle).await?;
        if !status.is_complete() {
            return Err(NetworkError::InvalidResponse(format!(
                "node is missing parts {:?}",
                status.missing_indexes
            )));
        }
        debug!(status = %status.status, "upload finalized");
        Ok(())
    }

    /// Resolves the short-lived download URL of the object at `handle`.
    pub async fn resolve_download(&self, handle: &FileHandle) -> Result<String, NetworkError> {
        let fields = DownloadRequest {
            file_id: handle.location_hex(),
        };
        let form = signed_form(self.crypto.as_ref(), &fields, Vec::new()).await?;
        let resp: DownloadResponse = self
            .network
            .post(self.url(DOWNLOAD_PATH), form)
            .await?
            .error_for_status()?
            .json()?;
        if resp.file_download_url.is_empty() {
            return Err(NetworkError::InvalidResponse("empty download URL".into()));
        }
        Ok(resp.file_download_url.trim_end_matches('/').to_string())
    }

    /// Fetches and decrypts the metadata record behind `download_url`.
    pub async fn fetch_metadata(
        &self,
        download_url: &str,
        handle: &FileHandle,
    ) -> Result<FileMetadata, NetworkError> {
        let resp = self
            .network
            .get(format!("{download_url}{METADATA_SUFFIX}"), Vec::new())
            .await?
            .error_for_status()?;
        let plain = self.crypto.decrypt(*handle.key(), resp.body).await?;
        Ok(FileMetadata::from_bytes(&plain)?)
    }

    /// Fetches the ciphertext bytes in `span` (end exclusive).
    ///
    /// The response must hold exactly `span.end - span.start` bytes.
    pub async fn fetch_range(
        &self,
        download_url: &str,
        span: Range<u64>,
    ) -> Result<Bytes, NetworkError> {
        let headers = vec![("Range".to_string(), range_header(&span))];
        let resp = self
            .network
            .get(format!("{download_url}{FILE_SUFFIX}"), headers)
            .await?
            .error_for_status()?;
        let expected = span.end - span.start;
        if resp.body.len() as u64 != expected {
            return Err(NetworkError::InvalidResponse(format!(
                "range {}..{} returned {} bytes, expected {expected}",
                span.start,
                span.end,
                resp.body.len()
            )));
        }
        Ok(resp.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FormData, NetworkFuture, NetworkResponse, verify_envelope};
    use cipherpart_crypto::{AccountKeys, LocalCrypto, decrypt_block, encrypt_block};
    use std::sync::Mutex;

    #[derive(Debug, Clone)]
    enum Call {
        Get(String, Vec<(String, String)>),
        Post(String, FormData),
    }

    /// Records every call and answers from a fixed reply.
    struct MockNetwork {
        calls: Mutex<Vec<Call>>,
        reply: NetworkResponse,
    }

    impl MockNetwork {
        fn new(status: u16, body: &'static str) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                reply: NetworkResponse::new(status, body),
            })
        }

        fn with_body(status: u16, body: Vec<u8>) -> Arc<Self> {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                reply: NetworkResponse::new(status, body),
            })
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl NetworkMiddleware for MockNetwork {
        fn get(
            &self,
            url: String,
            headers: Vec<(String, String)>,
        ) -> NetworkFuture<'_, NetworkResponse> {
            self.calls.lock().unwrap().push(Call::Get(url, headers));
            let reply = self.reply.clone();
            Box::pin(async move { Ok(reply) })
        }

        fn post(&self, url: String, form: FormData) -> NetworkFuture<'_, NetworkResponse> {
            self.calls.lock().unwrap().push(Call::Post(url, form));
            let reply = self.reply.clone();
            Box::pin(async move { Ok(reply) })
        }
    }

    fn client(net: Arc<MockNetwork>) -> StorageClient {
        let crypto = Arc::new(LocalCrypto::new(AccountKeys::generate()));
        StorageClient::new("http://node:8080/", net, crypto)
    }

    #[tokio::test]
    async fn probe_hits_root() {
        let net = MockNetwork::new(200, "");
        client(net.clone()).probe().await.unwrap();
        match &net.calls()[0] {
            Call::Get(url, headers) => {
                assert_eq!(url, "http://node:8080/");
                assert!(headers.is_empty());
            }
            other => panic!("unexpected call {other:?}"),
        }
    }

    #[tokio::test]
    async fn probe_fails_on_error_status() {
        let net = MockNetwork::new(502, "bad gateway");
        let err = client(net).probe().await.unwrap_err();
        assert!(matches!(err, NetworkError::Status { status: 502, .. }));
    }

    #[tokio::test]
    async fn init_upload_sends_signed_sizes_and_sealed_metadata() {
        let net = MockNetwork::new(200, "{}");
        let handle = FileHandle::generate();
        let meta = FileMetadata::new("report.pdf", 10_000_000, "application/pdf");
        client(net.clone()).init_upload(&handle, &meta).await.unwrap();

        let Call::Post(url, form) = &net.calls()[0] else {
            panic!("expected POST");
        };
        assert_eq!(url, "http://node:8080/api/v1/init-upload");
        let fields = verify_envelope(form).unwrap();
        assert_eq!(fields["fileHandle"], handle.location_hex());
        assert_eq!(fields["fileSizeInByte"], 10_004_896);
        assert_eq!(fields["endIndex"], 2);

        let sealed = form.get_file("metadata").unwrap();
        let plain = decrypt_block(handle.key(), sealed).unwrap();
        assert_eq!(FileMetadata::from_bytes(&plain).unwrap(), meta);
    }

    #[tokio::test]
    async fn upload_part_is_one_based() {
        let net = MockNetwork::new(200, "{}");
        let handle = FileHandle::generate();
        client(net.clone())
            .upload_part(&handle, 0, 2, Bytes::from_static(b"sealed"))
            .await
            .unwrap();

        let Call::Post(url, form) = &net.calls()[0] else {
            panic!("expected POST");
        };
        assert_eq!(url, "http://node:8080/api/v1/upload");
        let fields = verify_envelope(form).unwrap();
        assert_eq!(fields["partIndex"], 1);
        assert_eq!(fields["endIndex"], 2);
        assert_eq!(form.get_file("chunkData").unwrap().as_ref(), b"sealed");
    }

    #[tokio::test]
    async fn finalize_rejects_missing_parts() {
        let net = MockNetwork::new(200, r#"{"status":"incomplete","missingIndexes":[2]}"#);
        let err = client(net)
            .finalize_upload(&FileHandle::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::InvalidResponse(_)));

        let net = MockNetwork::new(200, r#"{"status":"File is uploaded"}"#);
        client(net)
            .finalize_upload(&FileHandle::generate())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn resolve_download_reads_url() {
        let net = MockNetwork::new(200, r#"{"fileDownloadUrl":"http://cdn/obj/"}"#);
        let handle = FileHandle::generate();
        let url = client(net.clone()).resolve_download(&handle).await.unwrap();
        assert_eq!(url, "http://cdn/obj");

        let Call::Post(_, form) = &net.calls()[0] else {
            panic!("expected POST");
        };
        assert_eq!(verify_envelope(form).unwrap()["fileID"], handle.location_hex());
    }

    #[tokio::test]
    async fn fetch_metadata_decrypts() {
        let handle = FileHandle::generate();
        let meta = FileMetadata::new("a.txt", 3, "text/plain");
        let sealed = encrypt_block(handle.key(), &meta.to_bytes().unwrap()).unwrap();
        let net = MockNetwork::with_body(200, sealed);

        let got = client(net.clone())
            .fetch_metadata("http://cdn/obj", &handle)
            .await
            .unwrap();
        assert_eq!(got, meta);
        let Call::Get(url, _) = &net.calls()[0] else {
            panic!("expected GET");
        };
        assert_eq!(url, "http://cdn/obj/metadata");
    }

    #[tokio::test]
    async fn fetch_metadata_with_wrong_key_is_crypto_error() {
        let sealed = encrypt_block(&[1u8; 32], b"{}").unwrap();
        let net = MockNetwork::with_body(200, sealed);
        let err = client(net)
            .fetch_metadata("http://cdn/obj", &FileHandle::generate())
            .await
            .unwrap_err();
        assert!(matches!(err, NetworkError::Crypto(_)));
    }

    #[tokio::test]
    async fn fetch_range_sends_inclusive_header_and_checks_length() {
        let net = MockNetwork::new(206, "abcd");
        let c = client(net.clone());
        let body = c.fetch_range("http://cdn/obj", 10..14).await.unwrap();
        assert_eq!(body.as_ref(), b"abcd");
        let Call::Get(url, headers) = &net.calls()[0] else {
            panic!("expected GET");
        };
        assert_eq!(url, "http://cdn/obj/file");
        assert_eq!(headers[0], ("Range".to_string(), "bytes=10-13".to_string()));

        let err = c.fetch_range("http://cdn/obj", 0..5).await.unwrap_err();
        assert!(matches!(err, NetworkError::InvalidResponse(_)));
    }
}
