//! Chunked upload fan-out.
//!
//! [`stream_to_chunks`] cuts an async byte stream into fixed-size chunks and
//! uploads them through a bounded pool of concurrent workers, while a single
//! read loop assigns offsets and accumulates an MD5 over everything it has
//! seen. Per-chunk storage I/O goes through the caller's [`ChunkStore`].
//!
//! The contract on failure: the first error wins, the read loop stops, every
//! outstanding worker is awaited, and chunks that were already uploaded are
//! deleted again so a failed request leaves nothing behind.

mod chunker;
mod pool;

pub use chunker::{
    ChunkAssignment, ChunkStore, ChunkUpload, FileChunk, MAX_CONCURRENT_CHUNKS, UploadError,
    UploadOptions, UploadResult, stream_to_chunks,
};
