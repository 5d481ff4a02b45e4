use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::{BufMut, Bytes, BytesMut};
use md5::{Digest, Md5};
use parking_lot::Mutex;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use super::pool;

/// Ceiling on chunk uploads in flight; one admission permit per buffer.
pub const MAX_CONCURRENT_CHUNKS: usize = 4;

// Attempts per chunk; each one assigns a fresh file id.
const UPLOAD_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(50);

/// Errors surfaced by the chunked upload pipeline.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The `offset` query value was not a non-negative integer.
    #[error("invalid 'offset': '{0}'")]
    InvalidOffset(String),

    /// A positive offset cannot be combined with append.
    #[error("cannot set offset when op=append")]
    OffsetWithAppend,

    /// Reading the input stream failed.
    #[error("read error: {0}")]
    Io(#[from] std::io::Error),

    /// The chunk store reported a failure.
    #[error("chunk store error: {0}")]
    Store(String),
}

/// How a request body is cut into chunks and where the first one lands.
#[derive(Clone, Debug)]
pub struct UploadOptions {
    /// Bytes read per chunk.
    pub chunk_size: usize,
    /// A first chunk smaller than this is returned inline instead of being
    /// uploaded. Zero disables inlining.
    pub inline_threshold: usize,
    /// Absolute offset of the first byte.
    pub start_offset: i64,
    /// Whether the caller is appending to existing content.
    pub is_append: bool,
}

impl UploadOptions {
    #[must_use]
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            inline_threshold: 0,
            start_offset: 0,
            is_append: false,
        }
    }

    /// Applies the recognized request query options: an absolute `offset`
    /// and the append flag.
    ///
    /// # Errors
    ///
    /// [`UploadError::InvalidOffset`] when the offset string is not a
    /// non-negative integer, [`UploadError::OffsetWithAppend`] when a
    /// positive offset is combined with append.
    pub fn with_query(mut self, offset: Option<&str>, is_append: bool) -> Result<Self, UploadError> {
        self.is_append = is_append;
        if let Some(raw) = offset {
            let parsed: i64 = raw.parse().map_err(|_| UploadError::InvalidOffset(raw.to_owned()))?;
            if parsed < 0 {
                return Err(UploadError::InvalidOffset(raw.to_owned()));
            }
            if is_append && parsed > 0 {
                return Err(UploadError::OffsetWithAppend);
            }
            self.start_offset = parsed;
        }
        Ok(self)
    }
}

/// A fresh upload destination for one chunk attempt.
#[derive(Clone, Debug)]
pub struct ChunkAssignment {
    pub file_id: String,
    pub upload_url: String,
}

/// What the store reports back for one uploaded chunk.
#[derive(Clone, Copy, Debug)]
pub struct UploadResult {
    pub size: u64,
}

/// Descriptor of one uploaded chunk.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileChunk {
    pub file_id: String,
    pub offset: i64,
    pub size: u64,
    pub modified_ts_ns: i64,
}

/// The pieces of a finished upload.
#[derive(Debug)]
pub struct ChunkUpload {
    /// Uploaded chunks, sorted by starting offset. Empty when the content
    /// was inlined.
    pub chunks: Vec<FileChunk>,
    /// MD5 over every byte read from the stream.
    pub md5: [u8; 16],
    /// Offset one past the last byte read.
    pub end_offset: i64,
    /// The whole body, when it fit under the inline threshold.
    pub small_content: Option<Bytes>,
}

/// The seam to the volume servers: assigns destinations, uploads chunk
/// bytes, and deletes chunks that must not outlive a failed request.
pub trait ChunkStore: Send + Sync + 'static {
    /// Assigns a fresh file id and upload location for one chunk attempt.
    fn assign(&self) -> impl Future<Output = Result<ChunkAssignment, UploadError>> + Send;

    /// Uploads one chunk's bytes to the assigned location.
    fn upload(
        &self,
        assignment: &ChunkAssignment,
        data: &[u8],
    ) -> impl Future<Output = Result<UploadResult, UploadError>> + Send;

    /// Best-effort removal of chunks left behind by a failed upload.
    fn delete(&self, chunks: Vec<FileChunk>) -> impl Future<Output = ()> + Send;
}

/// Reads the stream chunk by chunk and uploads the chunks through at most
/// [`MAX_CONCURRENT_CHUNKS`] concurrent workers.
///
/// Offsets are assigned sequentially by the read loop before dispatch, so
/// the returned chunk list is deterministic however the workers finish. The
/// first worker error stops the read loop, outstanding workers are awaited,
/// every chunk uploaded so far is deleted again, and that first error is
/// returned.
///
/// # Errors
///
/// The first read or store error encountered, after compensation.
pub async fn stream_to_chunks<R, S>(
    store: Arc<S>,
    mut reader: R,
    options: &UploadOptions,
) -> Result<ChunkUpload, UploadError>
where
    R: AsyncRead + Unpin,
    S: ChunkStore,
{
    let mut md5 = Md5::new();
    let mut chunk_offset = options.start_offset;
    let mut small_content = None;

    let admission = Arc::new(Semaphore::new(MAX_CONCURRENT_CHUNKS));
    let chunks: Arc<Mutex<Vec<FileChunk>>> = Arc::new(Mutex::new(Vec::new()));
    let first_error: Arc<Mutex<Option<UploadError>>> = Arc::new(Mutex::new(None));
    let mut workers: Vec<JoinHandle<()>> = Vec::new();

    loop {
        let permit = admission
            .clone()
            .acquire_owned()
            .await
            .expect("admission semaphore is never closed");

        // A failed chunk means the whole request fails; stop reading early.
        if first_error.lock().is_some() {
            drop(permit);
            break;
        }

        let mut buffer = pool::acquire(options.chunk_size);
        let data_size = match read_chunk(&mut reader, &mut buffer, options.chunk_size).await {
            Ok(0) => {
                pool::release(buffer);
                drop(permit);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                pool::release(buffer);
                drop(permit);
                let mut slot = first_error.lock();
                if slot.is_none() {
                    *slot = Some(UploadError::Io(e));
                }
                break;
            }
        };
        md5.update(&buffer[..]);

        // A short first chunk is carried inline instead of uploaded, unless
        // the write starts mid-file.
        if chunk_offset == 0 && !options.is_append && data_size < options.inline_threshold {
            chunk_offset += data_size as i64;
            small_content = Some(Bytes::copy_from_slice(&buffer[..]));
            pool::release(buffer);
            drop(permit);
            break;
        }

        let store = Arc::clone(&store);
        let chunks = Arc::clone(&chunks);
        let first_error = Arc::clone(&first_error);
        let offset = chunk_offset;
        workers.push(tokio::spawn(async move {
            match upload_chunk(store.as_ref(), &buffer[..], offset).await {
                Ok(Some(chunk)) => {
                    tracing::debug!(
                        file_id = %chunk.file_id,
                        offset,
                        size = chunk.size,
                        "uploaded chunk"
                    );
                    chunks.lock().push(chunk);
                }
                Ok(None) => {}
                Err(e) => {
                    let mut slot = first_error.lock();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                }
            }
            pool::release(buffer);
            drop(permit);
        }));

        chunk_offset += data_size as i64;

        // A short read means the stream is exhausted.
        if data_size < options.chunk_size {
            break;
        }
    }

    for worker in workers {
        if worker.await.is_err() {
            tracing::error!("chunk upload worker panicked");
        }
    }

    let error = first_error.lock().take();
    if let Some(error) = error {
        let uploaded = std::mem::take(&mut *chunks.lock());
        tracing::error!(%error, purged = uploaded.len(), "upload failed, deleting uncommitted chunks");
        store.delete(uploaded).await;
        return Err(error);
    }

    let mut chunks = std::mem::take(&mut *chunks.lock());
    chunks.sort_by_key(|chunk| chunk.offset);

    Ok(ChunkUpload {
        chunks,
        md5: md5.finalize().into(),
        end_offset: chunk_offset,
        small_content,
    })
}

/// Fills `buffer` with up to `chunk_size` bytes; a return below
/// `chunk_size` means the stream ended.
async fn read_chunk<R>(reader: &mut R, buffer: &mut BytesMut, chunk_size: usize) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    while buffer.len() < chunk_size {
        let remaining = chunk_size - buffer.len();
        let mut window = (&mut *buffer).limit(remaining);
        let n = reader.read_buf(&mut window).await?;
        if n == 0 {
            break;
        }
    }
    Ok(buffer.len())
}

/// Uploads one chunk, retrying with a fresh file id per attempt. A store
/// that reports zero bytes written produces no chunk; the stream ended
/// exactly on the previous chunk border.
async fn upload_chunk<S>(store: &S, data: &[u8], offset: i64) -> Result<Option<FileChunk>, UploadError>
where
    S: ChunkStore,
{
    let mut delay = RETRY_BASE_DELAY;
    let mut last_error = None;

    for attempt in 0..UPLOAD_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(delay).await;
            delay *= 2;
        }
        let assignment = match store.assign().await {
            Ok(assignment) => assignment,
            Err(e) => {
                tracing::debug!(error = %e, "chunk assignment failed, retrying");
                last_error = Some(e);
                continue;
            }
        };
        match store.upload(&assignment, data).await {
            Ok(result) => {
                if result.size == 0 {
                    return Ok(None);
                }
                return Ok(Some(FileChunk {
                    file_id: assignment.file_id,
                    offset,
                    size: result.size,
                    modified_ts_ns: unix_nanos(),
                }));
            }
            Err(e) => {
                tracing::debug!(file_id = %assignment.file_id, error = %e, "chunk upload failed, retrying");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.expect("every failed attempt records an error"))
}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
}
