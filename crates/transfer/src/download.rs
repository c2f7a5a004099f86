//! Download pipeline.
//!
//! ```text
//! fetch stage -> (part, sealed) -> decrypt stage -> plaintext -> DownloadStream
//! network queue                    crypto queue
//! ```
//!
//! Each part is fetched with one ranged GET. Its ordered commit hands the
//! bytes to the decrypt stage and then waits until every block of the part
//! has committed, so cross-part byte order follows from the global block
//! index. Sentinels close both queues once every part is accounted for.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use cipherpart_crypto::CryptoMiddleware;
use cipherpart_network::StorageClient;
use cipherpart_protocol::constants::BLOCK_SIZE_ON_DISK;
use cipherpart_protocol::sizing::{self, Layout};
use cipherpart_protocol::{FileHandle, FileMetadata};
use cipherpart_queue::{OrderedQueue, RetryAction, retry};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex as AsyncMutex, OnceCell, mpsc};
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::chunked::split_blocks;
use crate::config::DownloadConfig;
use crate::progress::{ProgressSnapshot, TransferEvent};
use crate::types::{SessionCore, TransferKind, TransferState};

type PartSender = mpsc::Sender<(u64, Bytes)>;

/// Fetches, decrypts and re-emits a stored object in byte order.
pub struct Download {
    core: Arc<SessionCore>,
    client: StorageClient,
    handle: FileHandle,
    config: DownloadConfig,
    metadata: OnceLock<FileMetadata>,
    stream: OnceCell<Result<DownloadStream, TransferError>>,
}

impl Download {
    pub fn new(client: StorageClient, handle: FileHandle, config: DownloadConfig) -> Self {
        Self {
            core: Arc::new(SessionCore::new(TransferKind::Download)),
            client,
            handle,
            config,
            metadata: OnceLock::new(),
            stream: OnceCell::new(),
        }
    }

    /// Parses a 128-hex-character handle.
    pub fn from_hex(
        client: StorageClient,
        handle: &str,
        config: DownloadConfig,
    ) -> Result<Self, TransferError> {
        let handle: FileHandle = handle.parse()?;
        Ok(Self::new(client, handle, config))
    }

    pub fn id(&self) -> &str {
        self.core.id()
    }

    pub fn handle(&self) -> &FileHandle {
        &self.handle
    }

    /// The decrypted metadata record, known once [`start`](Self::start)
    /// has succeeded.
    pub fn metadata(&self) -> Option<&FileMetadata> {
        self.metadata.get()
    }

    /// Resolves the download URL, fetches the metadata and starts the
    /// pipeline.
    ///
    /// Idempotent: later calls return a handle to the same stream (or the
    /// same error).
    pub async fn start(&self) -> Result<DownloadStream, TransferError> {
        self.stream.get_or_init(|| self.begin()).await.clone()
    }

    async fn begin(&self) -> Result<DownloadStream, TransferError> {
        if self.core.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        self.core.mark_started();

        let (url, metadata) = match self.handshake().await {
            Ok(found) => found,
            Err(e) => {
                self.core.fail(e.clone());
                return Err(e);
            }
        };
        if self.core.is_halted() {
            return Err(self.core.halt_error());
        }

        let layout = metadata.layout();
        self.core.set_layout(&layout);
        info!(
            session = %self.core.id(),
            location = %self.handle.location_hex(),
            name = %metadata.name,
            size = layout.size,
            parts = layout.parts,
            "download starting"
        );
        let _ = self.metadata.set(metadata);

        let (out_tx, out_rx) = mpsc::channel(self.config.output_buffer.max(1));
        let pipeline = Arc::new(Pipeline {
            core: Arc::clone(&self.core),
            client: self.client.clone(),
            crypto: Arc::clone(self.client.crypto()),
            handle: self.handle.clone(),
            url,
            layout,
            config: self.config.clone(),
        });
        pipeline.spawn(out_tx);

        Ok(DownloadStream {
            rx: Arc::new(AsyncMutex::new(out_rx)),
            core: Arc::clone(&self.core),
        })
    }

    async fn handshake(&self) -> Result<(String, FileMetadata), TransferError> {
        let url = self
            .client
            .resolve_download(&self.handle)
            .await
            .map_err(TransferError::connectivity)?;
        let metadata = self
            .client
            .fetch_metadata(&url, &self.handle)
            .await
            .map_err(TransferError::connectivity)?;
        Ok((url, metadata))
    }

    /// Resolves once both queues have closed, or on the first fatal error.
    ///
    /// The stream ends before this resolves.
    pub async fn result(&self) -> Result<(), TransferError> {
        self.core.result().await
    }

    pub fn pause(&self) {
        self.core.pause();
    }

    pub fn unpause(&self) {
        self.core.unpause();
    }

    pub fn is_paused(&self) -> bool {
        self.core.is_paused()
    }

    /// Stops scheduling new fetches and blocks. Calls already in flight
    /// finish and their results are discarded.
    pub fn cancel(&self) {
        self.core.cancel();
    }

    pub fn state(&self) -> TransferState {
        self.core.state()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.core.snapshot()
    }

    /// Takes the event receiver. Can only be called once.
    pub fn take_events(&self) -> Option<mpsc::Receiver<TransferEvent>> {
        self.core.take_events()
    }

    /// Writes the whole plaintext into `writer` and waits for the result.
    pub async fn write_to<W>(&self, mut writer: W) -> Result<FileMetadata, TransferError>
    where
        W: AsyncWrite + Unpin,
    {
        let stream = self.start().await?;
        while let Some(chunk) = stream.next().await? {
            if let Err(e) = writer.write_all(&chunk).await {
                let err = TransferError::from(e);
                self.core.fail(err.clone());
                return Err(err);
            }
        }
        writer.flush().await?;
        self.result().await?;
        self.metadata
            .get()
            .cloned()
            .ok_or_else(|| TransferError::Metadata("metadata missing after start".into()))
    }
}

/// Read side of a download. Clones share the same stream.
#[derive(Clone)]
pub struct DownloadStream {
    rx: Arc<AsyncMutex<mpsc::Receiver<Bytes>>>,
    core: Arc<SessionCore>,
}

impl DownloadStream {
    /// Next plaintext block in byte order, `Ok(None)` at the end.
    ///
    /// After a failure or cancel, buffered blocks are still returned and
    /// the terminal error follows them.
    pub async fn next(&self) -> Result<Option<Bytes>, TransferError> {
        let mut rx = self.rx.lock().await;
        match rx.recv().await {
            Some(chunk) => Ok(Some(chunk)),
            None if self.core.is_halted() => Err(self.core.halt_error()),
            None => Ok(None),
        }
    }

    /// Reads the rest of the stream into memory.
    pub async fn collect(&self) -> Result<Vec<u8>, TransferError> {
        let mut out = Vec::new();
        while let Some(chunk) = self.next().await? {
            out.extend_from_slice(&chunk);
        }
        Ok(out)
    }
}

struct Pipeline {
    core: Arc<SessionCore>,
    client: StorageClient,
    crypto: Arc<dyn CryptoMiddleware>,
    handle: FileHandle,
    url: String,
    layout: Layout,
    config: DownloadConfig,
}

impl Pipeline {
    fn spawn(self: Arc<Self>, out: mpsc::Sender<Bytes>) {
        let network_q = OrderedQueue::new("download-network", self.config.network);
        let crypto_q = OrderedQueue::new("download-crypto", self.config.crypto);
        let (fetched_tx, fetched_rx) = mpsc::channel(1);

        tokio::spawn(Arc::clone(&self).fetch_stage(
            network_q.clone(),
            crypto_q.clone(),
            fetched_tx,
        ));
        tokio::spawn(self.decrypt_stage(crypto_q, network_q, fetched_rx, out));
    }

    async fn fetch_stage(
        self: Arc<Self>,
        queue: OrderedQueue,
        crypto_q: OrderedQueue,
        fetched: PartSender,
    ) {
        for part in 0..self.layout.parts {
            if self.core.is_halted() {
                return;
            }
            if let Some(prev) = part.checked_sub(1) {
                if self
                    .core
                    .unless_halted(queue.wait_for_work_started(prev))
                    .await
                    .is_none()
                {
                    return;
                }
            }
            tokio::spawn(Arc::clone(&self).fetch_part(
                queue.clone(),
                crypto_q.clone(),
                part,
                fetched.clone(),
            ));
        }

        let closer = queue.clone();
        queue
            .add(self.layout.parts, |_| async {}, move |(), _| async move {
                closer.close();
                drop(fetched);
            })
            .await;
        debug!(parts = self.layout.parts, "network stage closed");
    }

    async fn fetch_part(
        self: Arc<Self>,
        queue: OrderedQueue,
        crypto_q: OrderedQueue,
        part: u64,
        fetched: PartSender,
    ) {
        let this = &*self;
        queue
            .add(
                part,
                move |_| this.fetch(part),
                move |data, _| this.deliver(data, part, fetched, crypto_q),
            )
            .await;
    }

    async fn fetch(&self, part: u64) -> Result<Bytes, TransferError> {
        self.core.checkpoint().await?;
        let span = sizing::part_span_on_disk(part, self.layout.size);
        let fetched = match &self.config.retry {
            Some(policy) => {
                retry(
                    policy,
                    move |_| self.client.fetch_range(&self.url, span.clone()),
                    move |err, attempt| {
                        if self.core.is_halted() || !err.is_transient() {
                            return RetryAction::Stop;
                        }
                        warn!(part, attempt, error = %err, "part fetch failed");
                        RetryAction::Retry
                    },
                )
                .await
            }
            None => self.client.fetch_range(&self.url, span.clone()).await,
        };
        let data = fetched.map_err(TransferError::transport)?;
        debug!(part, bytes = data.len(), "part fetched");
        Ok(data)
    }

    /// Hands a fetched part to the decrypt stage and waits for its last
    /// block to commit.
    async fn deliver(
        &self,
        data: Result<Bytes, TransferError>,
        part: u64,
        fetched: PartSender,
        crypto_q: OrderedQueue,
    ) {
        let data = match data {
            Ok(data) => data,
            Err(e) => return self.core.fail(e),
        };
        if self.core.is_halted() {
            return;
        }
        match self.core.unless_halted(fetched.send((part, data))).await {
            Some(Ok(())) => {}
            _ => return,
        }
        if let Some(last) = sizing::last_block_of_part(part, self.layout.size) {
            if self
                .core
                .unless_halted(crypto_q.wait_for_commit(last))
                .await
                .is_none()
            {
                return;
            }
        }
        self.core.advance(0, 0, 1);
        debug!(part, "part committed");
    }

    async fn decrypt_stage(
        self: Arc<Self>,
        queue: OrderedQueue,
        network_q: OrderedQueue,
        mut fetched: mpsc::Receiver<(u64, Bytes)>,
        out: mpsc::Sender<Bytes>,
    ) {
        let size = self.layout.size;
        loop {
            let (part, data) = match self.core.unless_halted(fetched.recv()).await {
                Some(Some(next)) => next,
                Some(None) => break,
                None => return,
            };

            let blocks: Vec<Bytes> = split_blocks(&data, BLOCK_SIZE_ON_DISK as usize).collect();
            let expected = sizing::blocks_in_part(part, size);
            if blocks.len() as u64 != expected {
                return self.core.fail(TransferError::Protocol(format!(
                    "part {part} holds {} blocks, expected {expected}",
                    blocks.len()
                )));
            }

            let first = sizing::first_block_of_part(part);
            for (local, block) in blocks.into_iter().enumerate() {
                tokio::spawn(Arc::clone(&self).open_block(
                    queue.clone(),
                    first + local as u64,
                    block,
                    out.clone(),
                ));
            }
        }

        if self.core.is_halted() {
            return;
        }
        let closer = queue.clone();
        queue
            .add(self.layout.blocks, |_| async {}, move |(), _| async move {
                closer.close();
            })
            .await;
        // Ends the stream before the result resolves.
        drop(out);
        debug!(blocks = self.layout.blocks, "crypto stage closed");

        if self.core.unless_halted(network_q.closed()).await.is_some() {
            self.core.finish();
        }
    }

    async fn open_block(
        self: Arc<Self>,
        queue: OrderedQueue,
        index: u64,
        block: Bytes,
        out: mpsc::Sender<Bytes>,
    ) {
        let this = &*self;
        queue
            .add(
                index,
                move |_| this.decrypt(block),
                move |plain, _| this.emit_block(plain, out),
            )
            .await;
    }

    async fn decrypt(&self, block: Bytes) -> Result<Vec<u8>, TransferError> {
        self.core.checkpoint().await?;
        Ok(self.crypto.decrypt(*self.handle.key(), block).await?)
    }

    async fn emit_block(&self, plain: Result<Vec<u8>, TransferError>, out: mpsc::Sender<Bytes>) {
        let plain = match plain {
            Ok(plain) => plain,
            Err(e) => return self.core.fail(e),
        };
        if self.core.is_halted() {
            return;
        }
        let len = plain.len() as u64;
        if let Some(Ok(())) = self.core.unless_halted(out.send(Bytes::from(plain))).await {
            self.core.advance(len, 1, 0);
        }
    }
}
