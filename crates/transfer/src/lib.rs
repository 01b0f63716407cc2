//! Streamed document transfer primitives: chunk sources, save sinks,
//! id-addressed host streams and per-direction session bookkeeping.

mod chunked;
mod policy;
mod progress;
mod streams;
mod types;

pub use chunked::{
    ChunkSource, LocalChunkSource, LocalSaveSink, SaveSink, TransferFuture, Utf8StreamDecoder,
    normalize_chunk_size,
};
pub use policy::{SizeDecision, SizePolicy};
pub use progress::ThroughputMeter;
pub use streams::{
    HandleChunkSource, HandleSaveSink, LaunchStreamPort, LaunchStreamRegistry, SaveStreamPort,
    SaveStreamRegistry,
};
pub use types::{
    ChunkRead, LaunchFileArg, SaveStreamStart, SessionSnapshot, SessionToken, StreamStart,
    TransferKind, TransferPhase, TransferSession,
};

/// Default raw read size per chunk: 256 KiB.
pub const DEFAULT_READ_CHUNK_BYTES: usize = 256 * 1024;

/// Smallest read size a source will honour: 4 KiB.
pub const MIN_READ_CHUNK_BYTES: usize = 4 * 1024;

/// Files at or above this size need confirmation: 50 MiB.
pub const DEFAULT_SOFT_LIMIT_BYTES: u64 = 50 * 1024 * 1024;

/// Files at or above this size are refused: 1 GiB.
pub const DEFAULT_HARD_LIMIT_BYTES: u64 = 1024 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("stream not found: {0}")]
    StreamNotFound(String),

    #[error("stream cancelled: {0}")]
    StreamCancelled(String),

    #[error("stream closed")]
    StreamClosed,

    #[error("invalid path: {0}")]
    InvalidPath(String),
}
