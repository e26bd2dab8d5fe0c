//! Backing stores for collection streams
//!
//! A [`BackingStore`] is a byte sink that supports the three operations the
//! framing needs beyond appending: dropping trailing bytes, patching bytes in
//! place and handing the finished bytes over as a [`Payload`].

use std::io::{self, Read};
use std::path::Path;

use bytes::{Bytes, BytesMut};
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{Level, enabled, trace};

use crate::protocol::frame::FRAME_PREFIX_LEN;

pub trait BackingStore: Send {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Shrink the store to `len` bytes
    fn truncate(&mut self, len: u64) -> io::Result<()>;

    /// Overwrite already written bytes starting at `offset`
    fn overwrite(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()>;

    fn len(&self) -> u64;

    /// Hand the written bytes over for transmission
    fn finish(self: Box<Self>) -> io::Result<Payload>;
}

/// Growable in-memory buffer used directly or as a disk staging area
pub trait StagingBuffer: Send + 'static {
    fn with_capacity(capacity: usize) -> Self;

    fn extend(&mut self, bytes: &[u8]);

    fn len(&self) -> usize;

    fn truncate(&mut self, len: usize);

    fn as_slice(&self) -> &[u8];

    fn as_mut_slice(&mut self) -> &mut [u8];

    fn clear(&mut self);

    fn into_bytes(self) -> Bytes;

    /// Capacity reserved up front
    fn initial_capacity() -> usize;
}

impl StagingBuffer for Vec<u8> {
    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }

    fn extend(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn truncate(&mut self, len: usize) {
        Vec::truncate(self, len);
    }

    fn as_slice(&self) -> &[u8] {
        self
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        self
    }

    fn clear(&mut self) {
        Vec::clear(self);
    }

    fn into_bytes(self) -> Bytes {
        Bytes::from(self)
    }

    fn initial_capacity() -> usize {
        4 * 1024
    }
}

impl StagingBuffer for BytesMut {
    fn with_capacity(capacity: usize) -> Self {
        BytesMut::with_capacity(capacity)
    }

    fn extend(&mut self, bytes: &[u8]) {
        self.extend_from_slice(bytes);
    }

    fn len(&self) -> usize {
        BytesMut::len(self)
    }

    fn truncate(&mut self, len: usize) {
        BytesMut::truncate(self, len);
    }

    fn as_slice(&self) -> &[u8] {
        self
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        self
    }

    fn clear(&mut self) {
        BytesMut::clear(self);
    }

    fn into_bytes(self) -> Bytes {
        self.freeze()
    }

    fn initial_capacity() -> usize {
        256 * 1024
    }
}

/// Finished frame, ready to be written to a transport
pub enum Payload {
    Buffer(Bytes),

    File {
        /// Deleted when the payload is dropped
        file: NamedTempFile,
        len: u64,

        /// Stream the file straight into the writer instead of reading it first
        streaming: bool,
    },
}

impl Payload {
    pub fn len(&self) -> u64 {
        match self {
            Payload::Buffer(bytes) => bytes.len() as u64,
            Payload::File { len, .. } => *len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn path(&self) -> Option<&Path> {
        match self {
            Payload::Buffer(_) => None,
            Payload::File { file, .. } => Some(file.path()),
        }
    }

    /// Materialize the whole frame in memory
    pub fn to_bytes(&self) -> io::Result<Bytes> {
        match self {
            Payload::Buffer(bytes) => Ok(bytes.clone()),
            Payload::File { file, len, .. } => {
                let mut bytes = Vec::with_capacity(*len as usize);
                file.reopen()?.take(*len).read_to_end(&mut bytes)?;
                Ok(Bytes::from(bytes))
            }
        }
    }

    /// Write the frame into `writer`
    ///
    /// File payloads with `streaming` set are streamed to the writer through
    /// a small copy buffer instead of being read whole. This is still a
    /// user-space copy, not sendfile. With TRACE logging on the payload has
    /// to be dumped, so the file is read into memory first.
    pub async fn write_to<W>(self, writer: &mut W) -> io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let dump = enabled!(Level::TRACE);

        if let Payload::File {
            file,
            len,
            streaming: true,
        } = &self
            && !dump
        {
            let mut source = tokio::fs::File::from_std(file.reopen()?).take(*len);
            let copied = tokio::io::copy(&mut source, writer).await?;
            if copied != *len {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("collation file shrank to {copied} of {len} bytes"),
                ));
            }
            writer.flush().await?;
            return Ok(());
        }

        let bytes = self.to_bytes()?;
        if dump && bytes.len() >= FRAME_PREFIX_LEN {
            trace!(
                payload = %String::from_utf8_lossy(&bytes[FRAME_PREFIX_LEN..]),
                "outgoing frame"
            );
        }
        writer.write_all(&bytes).await?;
        writer.flush().await
    }
}

impl std::fmt::Debug for Payload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Payload::Buffer(bytes) => f.debug_tuple("Buffer").field(&bytes.len()).finish(),
            Payload::File { file, len, streaming } => f
                .debug_struct("File")
                .field("path", &file.path())
                .field("len", len)
                .field("streaming", streaming)
                .finish(),
        }
    }
}
