//! Id-addressed read and write streams.
//!
//! The host side owns open files in a registry keyed by a random stream id;
//! the editor side talks to it through [`LaunchStreamPort`] and
//! [`SaveStreamPort`] and sees ordinary [`ChunkSource`]/[`SaveSink`] handles.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;

use crate::chunked::{ChunkSource, LocalChunkSource, LocalSaveSink, SaveSink, TransferFuture};
use crate::types::{ChunkRead, SaveStreamStart, StreamStart};
use crate::{DEFAULT_READ_CHUNK_BYTES, TransferError};

/// Host-side read streams.
pub trait LaunchStreamPort: Send + Sync {
    fn start<'a>(&'a self, file_path: &'a str) -> TransferFuture<'a, StreamStart>;

    fn read<'a>(&'a self, stream_id: &'a str, max_bytes: usize) -> TransferFuture<'a, ChunkRead>;

    fn cancel<'a>(&'a self, stream_id: &'a str) -> TransferFuture<'a, ()>;

    /// Releases the stream. Unknown or already-closed ids succeed.
    fn close<'a>(&'a self, stream_id: &'a str) -> TransferFuture<'a, ()>;
}

/// Host-side write streams.
pub trait SaveStreamPort: Send + Sync {
    fn start<'a>(&'a self, file_path: &'a str) -> TransferFuture<'a, SaveStreamStart>;

    /// Appends `text`; returns the stream's total bytes written so far.
    fn write<'a>(&'a self, stream_id: &'a str, text: &'a str) -> TransferFuture<'a, u64>;

    fn finish<'a>(&'a self, stream_id: &'a str) -> TransferFuture<'a, u64>;

    /// Discards the stream. Unknown ids succeed.
    fn cancel<'a>(&'a self, stream_id: &'a str) -> TransferFuture<'a, ()>;
}

fn new_stream_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

// ---------------------------------------------------------------------------
// LaunchStreamRegistry
// ---------------------------------------------------------------------------

struct ReadStream {
    source: LocalChunkSource,
    cancelled: bool,
}

/// In-process [`LaunchStreamPort`] over local files.
#[derive(Default)]
pub struct LaunchStreamRegistry {
    streams: Mutex<HashMap<String, ReadStream>>,
}

impl LaunchStreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open_count(&self) -> usize {
        self.streams.lock().await.len()
    }
}

impl LaunchStreamPort for LaunchStreamRegistry {
    fn start<'a>(&'a self, file_path: &'a str) -> TransferFuture<'a, StreamStart> {
        Box::pin(async move {
            let source = LocalChunkSource::open(file_path, DEFAULT_READ_CHUNK_BYTES).await?;
            let stream_id = new_stream_id();
            let start = StreamStart {
                stream_id: stream_id.clone(),
                file_path: file_path.to_string(),
                file_size_bytes: source.total_bytes().unwrap_or(0),
            };
            self.streams.lock().await.insert(
                stream_id,
                ReadStream {
                    source,
                    cancelled: false,
                },
            );
            tracing::debug!(stream_id = %start.stream_id, path = file_path, "opened read stream");
            Ok(start)
        })
    }

    fn read<'a>(&'a self, stream_id: &'a str, max_bytes: usize) -> TransferFuture<'a, ChunkRead> {
        Box::pin(async move {
            let mut streams = self.streams.lock().await;
            let stream = streams
                .get_mut(stream_id)
                .ok_or_else(|| TransferError::StreamNotFound(stream_id.to_string()))?;
            if stream.cancelled {
                return Err(TransferError::StreamCancelled(stream_id.to_string()));
            }
            stream.source.read_up_to(max_bytes).await
        })
    }

    fn cancel<'a>(&'a self, stream_id: &'a str) -> TransferFuture<'a, ()> {
        Box::pin(async move {
            if let Some(stream) = self.streams.lock().await.get_mut(stream_id) {
                stream.cancelled = true;
            }
            Ok(())
        })
    }

    fn close<'a>(&'a self, stream_id: &'a str) -> TransferFuture<'a, ()> {
        Box::pin(async move {
            let removed = self.streams.lock().await.remove(stream_id);
            if let Some(mut stream) = removed {
                stream.source.close().await?;
                tracing::debug!(stream_id, "closed read stream");
            }
            Ok(())
        })
    }
}

/// [`ChunkSource`] reading through a [`LaunchStreamPort`].
pub struct HandleChunkSource {
    port: Arc<dyn LaunchStreamPort>,
    stream_id: String,
    file_path: String,
    file_size_bytes: u64,
    max_bytes: usize,
    closed: bool,
}

impl HandleChunkSource {
    /// Opens a stream on `port` for `file_path`.
    pub async fn start(
        port: Arc<dyn LaunchStreamPort>,
        file_path: &str,
        max_bytes: usize,
    ) -> Result<Self, TransferError> {
        let start = port.start(file_path).await?;
        Ok(Self {
            port,
            stream_id: start.stream_id,
            file_path: start.file_path,
            file_size_bytes: start.file_size_bytes,
            max_bytes,
            closed: false,
        })
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn file_size_bytes(&self) -> u64 {
        self.file_size_bytes
    }
}

impl ChunkSource for HandleChunkSource {
    fn next_chunk(&mut self) -> TransferFuture<'_, ChunkRead> {
        Box::pin(async move {
            if self.closed {
                return Err(TransferError::StreamClosed);
            }
            self.port.read(&self.stream_id, self.max_bytes).await
        })
    }

    fn cancel(&mut self) -> TransferFuture<'_, ()> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            self.port.cancel(&self.stream_id).await
        })
    }

    fn close(&mut self) -> TransferFuture<'_, ()> {
        Box::pin(async move {
            if self.closed {
                return Ok(());
            }
            self.closed = true;
            self.port.close(&self.stream_id).await
        })
    }

    fn describe(&self) -> &str {
        &self.file_path
    }
}

// ---------------------------------------------------------------------------
// SaveStreamRegistry
// ---------------------------------------------------------------------------

/// In-process [`SaveStreamPort`] over local files.
#[derive(Default)]
pub struct SaveStreamRegistry {
    streams: Mutex<HashMap<String, LocalSaveSink>>,
}

impl SaveStreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn open_count(&self) -> usize {
        self.streams.lock().await.len()
    }
}

impl SaveStreamPort for SaveStreamRegistry {
    fn start<'a>(&'a self, file_path: &'a str) -> TransferFuture<'a, SaveStreamStart> {
        Box::pin(async move {
            let sink = LocalSaveSink::create(file_path).await?;
            let stream_id = new_stream_id();
            self.streams.lock().await.insert(stream_id.clone(), sink);
            tracing::debug!(stream_id = %stream_id, path = file_path, "opened save stream");
            Ok(SaveStreamStart {
                stream_id,
                file_path: file_path.to_string(),
            })
        })
    }

    fn write<'a>(&'a self, stream_id: &'a str, text: &'a str) -> TransferFuture<'a, u64> {
        Box::pin(async move {
            let mut streams = self.streams.lock().await;
            let sink = streams
                .get_mut(stream_id)
                .ok_or_else(|| TransferError::StreamNotFound(stream_id.to_string()))?;
            sink.write(text).await
        })
    }

    fn finish<'a>(&'a self, stream_id: &'a str) -> TransferFuture<'a, u64> {
        Box::pin(async move {
            let removed = self.streams.lock().await.remove(stream_id);
            let mut sink =
                removed.ok_or_else(|| TransferError::StreamNotFound(stream_id.to_string()))?;
            sink.finish().await
        })
    }

    fn cancel<'a>(&'a self, stream_id: &'a str) -> TransferFuture<'a, ()> {
        Box::pin(async move {
            let removed = self.streams.lock().await.remove(stream_id);
            match removed {
                Some(mut sink) => sink.cancel().await,
                None => Ok(()),
            }
        })
    }
}

/// [`SaveSink`] writing through a [`SaveStreamPort`].
pub struct HandleSaveSink {
    port: Arc<dyn SaveStreamPort>,
    stream_id: String,
    done: bool,
}

impl HandleSaveSink {
    pub async fn start(port: Arc<dyn SaveStreamPort>, file_path: &str) -> Result<Self, TransferError> {
        let start = port.start(file_path).await?;
        Ok(Self {
            port,
            stream_id: start.stream_id,
            done: false,
        })
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }
}

impl SaveSink for HandleSaveSink {
    fn write<'a>(&'a mut self, text: &'a str) -> TransferFuture<'a, u64> {
        Box::pin(async move {
            if self.done {
                return Err(TransferError::StreamClosed);
            }
            self.port.write(&self.stream_id, text).await
        })
    }

    fn finish(&mut self) -> TransferFuture<'_, u64> {
        Box::pin(async move {
            if self.done {
                return Err(TransferError::StreamClosed);
            }
            self.done = true;
            self.port.finish(&self.stream_id).await
        })
    }

    fn cancel(&mut self) -> TransferFuture<'_, ()> {
        Box::pin(async move {
            if self.done {
                return Ok(());
            }
            self.done = true;
            self.port.cancel(&self.stream_id).await
        })
    }
}
