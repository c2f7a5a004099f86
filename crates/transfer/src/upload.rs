//! Upload pipeline.
//!
//! ```text
//! UploadSink -> assemble -> (part, plaintext) -> encrypt stage -> (part, sealed) -> send stage
//!                                                 crypto queue                     network queue
//! ```
//!
//! The crypto stage submits every block of a part at its global block index;
//! ordered commits copy each sealed block into the part buffer and hand the
//! finished buffer on when its last block lands. The send stage posts parts
//! with retry. Once input ends, a sentinel past the last index closes each
//! queue; the network sentinel also finalizes the upload.

use std::sync::{Arc, Mutex, OnceLock};

use bytes::Bytes;
use cipherpart_crypto::CryptoMiddleware;
use cipherpart_network::StorageClient;
use cipherpart_protocol::constants::{BLOCK_SIZE, BLOCK_SIZE_ON_DISK, PART_SIZE};
use cipherpart_protocol::sizing::{self, Layout};
use cipherpart_protocol::{FileHandle, FileMetadata};
use cipherpart_queue::{OrderedQueue, RetryAction, retry};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{OnceCell, mpsc};
use tracing::{debug, info, warn};

use crate::TransferError;
use crate::chunked::{PartAccumulator, split_blocks};
use crate::config::UploadConfig;
use crate::progress::{ProgressSnapshot, TransferEvent};
use crate::types::{SessionCore, TransferKind, TransferState, lock};

type PartBuffer = Arc<Mutex<Vec<u8>>>;
type PartSender = mpsc::Sender<(u64, Bytes)>;

/// Encrypts a plaintext stream of known length and stores it as parts on a
/// storage node.
pub struct Upload {
    core: Arc<SessionCore>,
    client: StorageClient,
    metadata: FileMetadata,
    config: UploadConfig,
    handle: OnceLock<FileHandle>,
    sink: OnceCell<Result<UploadSink, TransferError>>,
}

impl Upload {
    pub fn new(client: StorageClient, metadata: FileMetadata, config: UploadConfig) -> Self {
        let core = Arc::new(SessionCore::new(TransferKind::Upload));
        core.set_layout(&metadata.layout());
        Self {
            core,
            client,
            metadata,
            config,
            handle: OnceLock::new(),
            sink: OnceCell::new(),
        }
    }

    /// Uses `handle` instead of generating a fresh one.
    pub fn with_handle(mut self, handle: FileHandle) -> Self {
        self.handle = OnceLock::from(handle);
        self
    }

    /// The object's handle, generated on first use.
    pub fn handle(&self) -> &FileHandle {
        self.handle.get_or_init(FileHandle::generate)
    }

    pub fn id(&self) -> &str {
        self.core.id()
    }

    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    pub fn layout(&self) -> Layout {
        self.metadata.layout()
    }

    /// Probes the node, registers the object and starts the pipeline.
    ///
    /// Idempotent: later calls return the same sink (or the same error)
    /// without repeating the handshake.
    pub async fn start(&self) -> Result<UploadSink, TransferError> {
        self.sink.get_or_init(|| self.begin()).await.clone()
    }

    async fn begin(&self) -> Result<UploadSink, TransferError> {
        if self.core.is_cancelled() {
            return Err(TransferError::Cancelled);
        }
        self.core.mark_started();

        let handle = self.handle().clone();
        let layout = self.metadata.layout();
        info!(
            session = %self.core.id(),
            location = %handle.location_hex(),
            size = layout.size,
            parts = layout.parts,
            "upload starting"
        );

        if let Err(e) = self.handshake(&handle).await {
            self.core.fail(e.clone());
            return Err(e);
        }
        if self.core.is_halted() {
            return Err(self.core.halt_error());
        }

        let (tx, rx) = mpsc::channel(self.config.write_buffer.max(1));
        let pipeline = Arc::new(Pipeline {
            core: Arc::clone(&self.core),
            client: self.client.clone(),
            crypto: Arc::clone(self.client.crypto()),
            handle,
            layout,
            config: self.config.clone(),
        });
        pipeline.spawn(rx);

        Ok(UploadSink {
            tx: Arc::new(Mutex::new(Some(tx))),
            core: Arc::clone(&self.core),
        })
    }

    async fn handshake(&self, handle: &FileHandle) -> Result<(), TransferError> {
        self.client
            .probe()
            .await
            .map_err(TransferError::connectivity)?;
        self.client
            .init_upload(handle, &self.metadata)
            .await
            .map_err(TransferError::connectivity)
    }

    /// Resolves once both queues have closed, or on the first fatal error.
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

    /// Stops scheduling new blocks and parts. Calls already in flight
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

    /// Pumps `reader` through the session and waits for the result.
    pub async fn upload_reader<R>(&self, mut reader: R) -> Result<FileHandle, TransferError>
    where
        R: AsyncRead + Unpin,
    {
        let sink = self.start().await?;
        let mut buf = vec![0u8; BLOCK_SIZE as usize];
        loop {
            let n = match reader.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => {
                    let err = TransferError::from(e);
                    self.core.fail(err.clone());
                    return Err(err);
                }
            };
            if n == 0 {
                break;
            }
            sink.write(Bytes::copy_from_slice(&buf[..n])).await?;
        }
        sink.close();
        self.result().await?;
        Ok(self.handle().clone())
    }
}

/// Write side of an upload. Clones share the same stream.
#[derive(Clone)]
pub struct UploadSink {
    tx: Arc<Mutex<Option<mpsc::Sender<Bytes>>>>,
    core: Arc<SessionCore>,
}

impl UploadSink {
    /// Appends `data` to the object. Waits while the pipeline is saturated.
    pub async fn write(&self, data: impl Into<Bytes>) -> Result<(), TransferError> {
        if self.core.is_halted() {
            return Err(self.core.halt_error());
        }
        let data = data.into();
        if data.is_empty() {
            return Ok(());
        }
        let tx = lock(&self.tx).clone();
        let Some(tx) = tx else {
            return Err(TransferError::Protocol("write after close".into()));
        };
        tx.send(data).await.map_err(|_| self.core.halt_error())
    }

    /// Ends the input. The written length is checked against the declared
    /// size once the pipeline drains it.
    pub fn close(&self) {
        lock(&self.tx).take();
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.tx).is_none()
    }
}

struct Pipeline {
    core: Arc<SessionCore>,
    client: StorageClient,
    crypto: Arc<dyn CryptoMiddleware>,
    handle: FileHandle,
    layout: Layout,
    config: UploadConfig,
}

impl Pipeline {
    fn spawn(self: Arc<Self>, input: mpsc::Receiver<Bytes>) {
        let crypto_q = OrderedQueue::new("upload-crypto", self.config.crypto);
        let network_q = OrderedQueue::new("upload-network", self.config.network);
        let (parts_tx, parts_rx) = mpsc::channel(1);
        let (sealed_tx, sealed_rx) = mpsc::channel(1);

        tokio::spawn(Arc::clone(&self).assemble(input, parts_tx));
        tokio::spawn(Arc::clone(&self).encrypt_stage(crypto_q.clone(), parts_rx, sealed_tx));
        tokio::spawn(self.send_stage(network_q, crypto_q, sealed_rx));
    }

    /// Re-chunks sink writes into `PART_SIZE` parts.
    async fn assemble(self: Arc<Self>, mut input: mpsc::Receiver<Bytes>, parts: PartSender) {
        let expected = self.layout.size;
        let mut acc = PartAccumulator::new(PART_SIZE as usize);
        let mut written = 0u64;
        loop {
            let data = match self.core.unless_halted(input.recv()).await {
                Some(Some(data)) => data,
                Some(None) => break,
                None => return,
            };
            written += data.len() as u64;
            if written > expected {
                self.core.fail(TransferError::SizeMismatch {
                    expected,
                    actual: written,
                });
                return;
            }
            for part in acc.push(&data) {
                if parts.send(part).await.is_err() {
                    return;
                }
            }
        }

        if written != expected {
            self.core.fail(TransferError::SizeMismatch {
                expected,
                actual: written,
            });
            return;
        }
        if let Some(part) = acc.finish() {
            let _ = parts.send(part).await;
        }
        debug!(bytes = written, "input complete");
    }

    async fn encrypt_stage(
        self: Arc<Self>,
        queue: OrderedQueue,
        mut parts: mpsc::Receiver<(u64, Bytes)>,
        sealed: PartSender,
    ) {
        let size = self.layout.size;
        loop {
            let (part, data) = match self.core.unless_halted(parts.recv()).await {
                Some(Some(next)) => next,
                Some(None) => break,
                None => return,
            };

            // One part waits for admission at a time.
            let previous = part
                .checked_sub(1)
                .and_then(|p| sizing::last_block_of_part(p, size));
            if let Some(prev) = previous {
                if self
                    .core
                    .unless_halted(queue.wait_for_work_started(prev))
                    .await
                    .is_none()
                {
                    return;
                }
            }

            let len = data.len() as u64;
            let blocks = sizing::number_of_blocks(len);
            let first = sizing::first_block_of_part(part);
            let sealed_len = sizing::size_on_disk(len) as usize;
            let buffer: PartBuffer = Arc::new(Mutex::new(vec![0; sealed_len]));
            debug!(part, blocks, "encrypting part");

            for (local, block) in split_blocks(&data, BLOCK_SIZE as usize).enumerate() {
                let local = local as u64;
                let finish = (local + 1 == blocks).then(|| (part, sealed.clone()));
                tokio::spawn(Arc::clone(&self).seal_block(
                    queue.clone(),
                    first + local,
                    (local * BLOCK_SIZE_ON_DISK) as usize,
                    block,
                    Arc::clone(&buffer),
                    finish,
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
        debug!(blocks = self.layout.blocks, "crypto stage closed");
    }

    async fn seal_block(
        self: Arc<Self>,
        queue: OrderedQueue,
        index: u64,
        offset: usize,
        block: Bytes,
        buffer: PartBuffer,
        finish: Option<(u64, PartSender)>,
    ) {
        let this = &*self;
        queue
            .add(
                index,
                move |_| this.encrypt(block),
                move |sealed, index| this.store_block(sealed, index, offset, buffer, finish),
            )
            .await;
    }

    async fn encrypt(&self, block: Bytes) -> Result<Vec<u8>, TransferError> {
        self.core.checkpoint().await?;
        Ok(self.crypto.encrypt(*self.handle.key(), block).await?)
    }

    async fn store_block(
        &self,
        sealed: Result<Vec<u8>, TransferError>,
        index: u64,
        offset: usize,
        buffer: PartBuffer,
        finish: Option<(u64, PartSender)>,
    ) {
        let sealed = match sealed {
            Ok(sealed) => sealed,
            Err(e) => return self.core.fail(e),
        };
        if self.core.is_halted() {
            return;
        }

        let stored = {
            let mut buf = lock(&buffer);
            match buf.get_mut(offset..offset + sealed.len()) {
                Some(slot) => {
                    slot.copy_from_slice(&sealed);
                    true
                }
                None => false,
            }
        };
        if !stored {
            return self.core.fail(TransferError::Protocol(format!(
                "sealed block {index} overflows its part"
            )));
        }
        self.core.advance(0, 1, 0);

        if let Some((part, sealed_tx)) = finish {
            let data = Bytes::from(std::mem::take(&mut *lock(&buffer)));
            debug!(part, bytes = data.len(), "part sealed");
            let _ = self.core.unless_halted(sealed_tx.send((part, data))).await;
        }
    }

    async fn send_stage(
        self: Arc<Self>,
        queue: OrderedQueue,
        crypto_q: OrderedQueue,
        mut sealed: mpsc::Receiver<(u64, Bytes)>,
    ) {
        loop {
            let (part, data) = match self.core.unless_halted(sealed.recv()).await {
                Some(Some(next)) => next,
                Some(None) => break,
                None => return,
            };
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
            tokio::spawn(Arc::clone(&self).send_part(queue.clone(), part, data));
        }

        if self.core.is_halted() {
            return;
        }
        let this = &*self;
        let closer = queue.clone();
        let finalized = queue
            .add(self.layout.parts, |_| async {}, move |(), _| async move {
                let result = this.finalize().await;
                closer.close();
                result
            })
            .await;
        match finalized {
            Some(Ok(())) => {}
            Some(Err(e)) => return self.core.fail(e),
            None => return,
        }

        if self.core.unless_halted(crypto_q.closed()).await.is_some() {
            self.core.finish();
        }
    }

    async fn send_part(self: Arc<Self>, queue: OrderedQueue, part: u64, data: Bytes) {
        let this = &*self;
        queue
            .add(
                part,
                move |_| this.upload_part(part, data),
                move |sent, _| this.commit_part(sent, part),
            )
            .await;
    }

    async fn upload_part(&self, part: u64, data: Bytes) -> Result<(), TransferError> {
        self.core.checkpoint().await?;

        let span = sizing::part_span_on_disk(part, self.layout.size);
        if data.len() as u64 != span.end - span.start {
            return Err(TransferError::Protocol(format!(
                "part {part} sealed to {} bytes, expected {}",
                data.len(),
                span.end - span.start
            )));
        }

        let end_index = self.layout.parts;
        retry(
            &self.config.retry,
            move |_| {
                self.client
                    .upload_part(&self.handle, part, end_index, data.clone())
            },
            move |err, attempt| {
                if self.core.is_halted() || !err.is_transient() {
                    return RetryAction::Stop;
                }
                warn!(part, attempt, error = %err, "part upload failed");
                RetryAction::Retry
            },
        )
        .await
        .map_err(TransferError::transport)
    }

    async fn commit_part(&self, sent: Result<(), TransferError>, part: u64) {
        if let Err(e) = sent {
            return self.core.fail(e);
        }
        if self.core.is_halted() {
            return;
        }
        let bytes = sizing::part_plaintext_len(part, self.layout.size);
        self.core.advance(bytes, 0, 1);
        debug!(part, bytes, "part committed");
    }

    async fn finalize(&self) -> Result<(), TransferError> {
        self.core.checkpoint().await?;
        self.client
            .finalize_upload(&self.handle)
            .await
            .map_err(TransferError::transport)?;
        info!(
            session = %self.core.id(),
            location = %self.handle.location_hex(),
            parts = self.layout.parts,
            "upload finalized"
        );
        Ok(())
    }
}
