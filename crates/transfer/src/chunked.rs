use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};

use crate::types::ChunkRead;
use crate::{DEFAULT_READ_CHUNK_BYTES, MIN_READ_CHUNK_BYTES, TransferError};

/// Boxed future returned by source and sink methods.
pub type TransferFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransferError>> + Send + 'a>>;

/// Clamps a requested read size: zero means the default, anything else is
/// raised to the minimum.
pub fn normalize_chunk_size(requested: usize) -> usize {
    match requested {
        0 => DEFAULT_READ_CHUNK_BYTES,
        n => n.max(MIN_READ_CHUNK_BYTES),
    }
}

// ---------------------------------------------------------------------------
// Utf8StreamDecoder
// ---------------------------------------------------------------------------

/// Incremental UTF-8 decoder.
///
/// A code point split across two reads is carried to the next call. Invalid
/// sequences become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    carry: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes `bytes`, holding back an incomplete trailing sequence.
    pub fn decode(&mut self, bytes: &[u8]) -> String {
        let mut pending = std::mem::take(&mut self.carry);
        pending.extend_from_slice(bytes);

        let mut out = String::with_capacity(pending.len());
        let mut rest = pending.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, tail) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &tail[bad..];
                        }
                        None => {
                            self.carry.extend_from_slice(tail);
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Flushes a truncated tail at end of stream.
    pub fn finish(&mut self) -> String {
        let carry = std::mem::take(&mut self.carry);
        String::from_utf8_lossy(&carry).into_owned()
    }

    pub fn has_pending(&self) -> bool {
        !self.carry.is_empty()
    }
}

// ---------------------------------------------------------------------------
// ChunkSource
// ---------------------------------------------------------------------------

/// Pull-based producer of decoded text chunks.
pub trait ChunkSource: Send {
    /// Reads the next chunk. Returns [`ChunkRead::Eof`] once exhausted.
    fn next_chunk(&mut self) -> TransferFuture<'_, ChunkRead>;

    /// Interrupts the producer. Sources with nothing to interrupt keep the
    /// default.
    fn cancel(&mut self) -> TransferFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    /// Releases the underlying resource. Safe to call more than once.
    fn close(&mut self) -> TransferFuture<'_, ()>;

    /// Path or label used in logs.
    fn describe(&self) -> &str;
}

/// Reads a file on the local filesystem.
pub struct LocalChunkSource {
    path: String,
    file: Option<File>,
    chunk_size: usize,
    buf: Vec<u8>,
    decoder: Utf8StreamDecoder,
    bytes_read: u64,
    total: Option<u64>,
    exhausted: bool,
}

impl LocalChunkSource {
    /// Opens `path` for reading in chunks of `chunk_size` bytes (normalized).
    pub async fn open(path: impl AsRef<Path>, chunk_size: usize) -> Result<Self, TransferError> {
        let path = path.as_ref();
        let file = File::open(path).await?;
        let total = file.metadata().await.ok().map(|m| m.len());
        Ok(Self {
            path: path.to_string_lossy().into_owned(),
            file: Some(file),
            chunk_size: normalize_chunk_size(chunk_size),
            buf: Vec::new(),
            decoder: Utf8StreamDecoder::new(),
            bytes_read: 0,
            total,
            exhausted: false,
        })
    }

    pub fn total_bytes(&self) -> Option<u64> {
        self.total
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Reads up to `max_bytes` raw bytes and returns whatever decodes.
    ///
    /// Reads that yield only a partial code point are retried so a
    /// [`ChunkRead::Chunk`] never carries empty text.
    pub async fn read_up_to(&mut self, max_bytes: usize) -> Result<ChunkRead, TransferError> {
        let max_bytes = normalize_chunk_size(max_bytes);
        if self.buf.len() < max_bytes {
            self.buf.resize(max_bytes, 0);
        }

        loop {
            if self.exhausted {
                return Ok(ChunkRead::Eof {
                    bytes_read_total: self.bytes_read,
                    total_bytes: self.total,
                });
            }
            let Some(file) = self.file.as_mut() else {
                return Err(TransferError::StreamClosed);
            };

            let n = file.read(&mut self.buf[..max_bytes]).await?;
            if n == 0 {
                self.exhausted = true;
                let tail = self.decoder.finish();
                if !tail.is_empty() {
                    return Ok(self.chunk(tail));
                }
                continue;
            }

            self.bytes_read += n as u64;
            let text = self.decoder.decode(&self.buf[..n]);
            if !text.is_empty() {
                return Ok(self.chunk(text));
            }
        }
    }

    fn chunk(&self, text: String) -> ChunkRead {
        ChunkRead::Chunk {
            text,
            bytes_read_total: self.bytes_read,
            total_bytes: self.total,
        }
    }
}

impl ChunkSource for LocalChunkSource {
    fn next_chunk(&mut self) -> TransferFuture<'_, ChunkRead> {
        Box::pin(async move {
            let size = self.chunk_size;
            self.read_up_to(size).await
        })
    }

    fn close(&mut self) -> TransferFuture<'_, ()> {
        Box::pin(async move {
            if self.file.take().is_some() {
                tracing::debug!(path = %self.path, bytes = self.bytes_read, "closed chunk source");
            }
            Ok(())
        })
    }

    fn describe(&self) -> &str {
        &self.path
    }
}

// ---------------------------------------------------------------------------
// SaveSink
// ---------------------------------------------------------------------------

/// Push-based consumer of text slices.
///
/// Nothing is visible at the destination until [`finish`](Self::finish)
/// succeeds; [`cancel`](Self::cancel) discards everything written.
pub trait SaveSink: Send {
    /// Writes `text`; returns the total bytes written so far.
    fn write<'a>(&'a mut self, text: &'a str) -> TransferFuture<'a, u64>;

    /// Commits the write; returns the total byte count.
    fn finish(&mut self) -> TransferFuture<'_, u64>;

    /// Discards the write.
    fn cancel(&mut self) -> TransferFuture<'_, ()>;
}

/// Writes to a temporary sibling and renames it over the target on finish.
pub struct LocalSaveSink {
    target: PathBuf,
    temp: PathBuf,
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
}

impl LocalSaveSink {
    pub async fn create(target: impl AsRef<Path>) -> Result<Self, TransferError> {
        let target = target.as_ref().to_path_buf();
        let temp = temp_sibling(&target)?;
        let file = File::create(&temp).await?;
        Ok(Self {
            target,
            temp,
            writer: Some(BufWriter::new(file)),
            bytes_written: 0,
        })
    }

    pub fn temp_path(&self) -> &Path {
        &self.temp
    }
}

fn temp_sibling(target: &Path) -> Result<PathBuf, TransferError> {
    let name = target
        .file_name()
        .ok_or_else(|| TransferError::InvalidPath(target.display().to_string()))?;
    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(name);
    temp_name.push(format!(".{}.wisty-tmp", uuid::Uuid::new_v4().simple()));
    Ok(target.with_file_name(temp_name))
}

impl SaveSink for LocalSaveSink {
    fn write<'a>(&'a mut self, text: &'a str) -> TransferFuture<'a, u64> {
        Box::pin(async move {
            let writer = self.writer.as_mut().ok_or(TransferError::StreamClosed)?;
            writer.write_all(text.as_bytes()).await?;
            self.bytes_written += text.len() as u64;
            Ok(self.bytes_written)
        })
    }

    fn finish(&mut self) -> TransferFuture<'_, u64> {
        Box::pin(async move {
            let mut writer = self.writer.take().ok_or(TransferError::StreamClosed)?;
            let committed = async {
                writer.flush().await?;
                writer.get_ref().sync_all().await?;
                drop(writer);
                tokio::fs::rename(&self.temp, &self.target).await
            }
            .await;
            if let Err(e) = committed {
                let _ = tokio::fs::remove_file(&self.temp).await;
                return Err(e.into());
            }
            tracing::debug!(
                path = %self.target.display(),
                bytes = self.bytes_written,
                "committed save"
            );
            Ok(self.bytes_written)
        })
    }

    fn cancel(&mut self) -> TransferFuture<'_, ()> {
        Box::pin(async move {
            if self.writer.take().is_none() {
                return Ok(());
            }
            match tokio::fs::remove_file(&self.temp).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }
}
