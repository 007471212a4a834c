//! Finite, non-restartable content streams
//!
//! A [`FileContentStream`] owns its source metadata and yields the
//! file's bytes as a lazy sequence of [`FileChunk`]s. Streams cannot
//! be restarted; consuming code drains them exactly once. Dropping a
//! stream releases its resources, so every exit path is covered.

use async_trait::async_trait;

use starsync_core::domain::{FileChunk, FileMetadata};

use crate::error::FsError;
use crate::hash;

/// Producer side of a content stream
///
/// Implementations yield chunks in order and return `None` when the
/// sequence is exhausted.
#[async_trait]
pub trait ChunkSource: Send {
    /// Produces the next chunk, or `None` at end of stream
    async fn next_chunk(&mut self) -> Result<Option<FileChunk>, FsError>;
}

/// A finite stream of content chunks with owned metadata
pub struct FileContentStream {
    metadata: FileMetadata,
    source: Option<Box<dyn ChunkSource>>,
}

impl FileContentStream {
    /// Wraps a chunk source with its file metadata
    pub fn new(metadata: FileMetadata, source: Box<dyn ChunkSource>) -> Self {
        Self {
            metadata,
            source: Some(source),
        }
    }

    /// Builds a stream over an in-memory byte buffer
    ///
    /// An empty buffer still yields exactly one (empty) chunk.
    pub fn from_bytes(metadata: FileMetadata, bytes: Vec<u8>, chunk_size: usize) -> Self {
        Self::new(metadata, Box::new(BytesSource::new(bytes, chunk_size)))
    }

    /// Builds a zero-length stream (delete tombstones, directories)
    pub fn empty(metadata: FileMetadata) -> Self {
        Self::new(metadata, Box::new(BytesSource::new(Vec::new(), 1)))
    }

    /// Metadata of the file this stream carries
    pub fn metadata(&self) -> &FileMetadata {
        &self.metadata
    }

    /// Yields the next chunk; `None` once exhausted or closed
    pub async fn next_chunk(&mut self) -> Result<Option<FileChunk>, FsError> {
        match self.source.as_mut() {
            Some(source) => {
                let chunk = source.next_chunk().await?;
                if chunk.is_none() {
                    self.close();
                }
                Ok(chunk)
            }
            None => Ok(None),
        }
    }

    /// Releases the stream's resources; idempotent
    pub fn close(&mut self) {
        self.source = None;
    }

    /// Decomposes the stream into metadata and source
    ///
    /// Used by wrappers that interpose on the chunk sequence (progress
    /// instrumentation) and rebuild the stream around the same source.
    pub fn into_parts(self) -> (FileMetadata, Option<Box<dyn ChunkSource>>) {
        (self.metadata, self.source)
    }

    /// Consumes the stream into a contiguous byte buffer
    ///
    /// Each chunk's hash is verified while draining.
    ///
    /// # Errors
    /// Fails with `INVALID_OPERATION` on a chunk hash mismatch; the
    /// stream is closed regardless of outcome.
    pub async fn drain(mut self) -> Result<Vec<u8>, FsError> {
        let mut buffer = Vec::with_capacity(self.metadata.size_bytes as usize);
        while let Some(chunk) = self.next_chunk().await? {
            if hash::digest_bytes(&chunk.data) != chunk.chunk_hash {
                self.close();
                return Err(FsError::InvalidOperation(format!(
                    "chunk {} of {} failed hash verification for {}",
                    chunk.chunk_index, chunk.total_chunks, self.metadata.path
                )));
            }
            buffer.extend_from_slice(&chunk.data);
        }
        Ok(buffer)
    }
}

impl std::fmt::Debug for FileContentStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileContentStream")
            .field("path", &self.metadata.path)
            .field("open", &self.source.is_some())
            .finish()
    }
}

// ============================================================================
// BytesSource
// ============================================================================

/// Chunk source over an owned byte buffer
struct BytesSource {
    bytes: Vec<u8>,
    chunk_size: usize,
    next_index: u32,
    total_chunks: u32,
}

impl BytesSource {
    fn new(bytes: Vec<u8>, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        let total_chunks = (bytes.len().div_ceil(chunk_size)).max(1) as u32;
        Self {
            bytes,
            chunk_size,
            next_index: 0,
            total_chunks,
        }
    }
}

#[async_trait]
impl ChunkSource for BytesSource {
    async fn next_chunk(&mut self) -> Result<Option<FileChunk>, FsError> {
        if self.next_index >= self.total_chunks {
            return Ok(None);
        }

        let start = self.next_index as usize * self.chunk_size;
        let end = (start + self.chunk_size).min(self.bytes.len());
        let data = self.bytes[start..end].to_vec();
        let chunk = FileChunk {
            chunk_hash: hash::digest_bytes(&data),
            chunk_index: self.next_index,
            total_chunks: self.total_chunks,
            data,
        };
        self.next_index += 1;
        Ok(Some(chunk))
    }
}
