use std::io;

use super::store::{BackingStore, Payload, StagingBuffer};

/// Keeps the whole frame in a single in-memory buffer
///
/// `MemoryStore<Vec<u8>>` is the plain heap variant; `MemoryStore<BytesMut>`
/// reserves a large buffer up front and freezes it without copying.
pub struct MemoryStore<B> {
    buffer: B,
}

impl<B: StagingBuffer> MemoryStore<B> {
    pub fn new() -> Self {
        Self {
            buffer: B::with_capacity(B::initial_capacity()),
        }
    }
}

impl<B: StagingBuffer> Default for MemoryStore<B> {
    fn default() -> Self {
        Self::new()
    }
}

fn out_of_range(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, format!("{what} out of range"))
}

impl<B: StagingBuffer> BackingStore for MemoryStore<B> {
    fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.buffer.extend(bytes);
        Ok(())
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        if len > self.len() {
            return Err(out_of_range("truncate length"));
        }
        self.buffer.truncate(len as usize);
        Ok(())
    }

    fn overwrite(&mut self, offset: u64, bytes: &[u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + bytes.len();
        let target = self
            .buffer
            .as_mut_slice()
            .get_mut(start..end)
            .ok_or_else(|| out_of_range("overwrite"))?;
        target.copy_from_slice(bytes);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn finish(self: Box<Self>) -> io::Result<Payload> {
        Ok(Payload::Buffer(self.buffer.into_bytes()))
    }
}
