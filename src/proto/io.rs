//! Fixed-capacity read staging.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Capacity of every connection's read buffer. A message that still is not
/// complete once the buffer fills is a protocol error, not a reason to grow.
pub(crate) const BUFFER_SIZE: usize = 4096;

/// A bounded staging buffer between a socket and the incremental parser.
///
/// Consumed prefixes are shifted out so the unparsed tail always starts at
/// offset zero, which keeps the parser oblivious to earlier messages.
pub(crate) struct BoundedBuf {
    data: Box<[u8]>,
    len: usize,
}

impl BoundedBuf {
    pub(crate) fn new() -> BoundedBuf {
        BoundedBuf {
            data: vec![0; BUFFER_SIZE].into_boxed_slice(),
            len: 0,
        }
    }

    /// The unparsed bytes read so far.
    pub(crate) fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub(crate) fn is_full(&self) -> bool {
        self.len == BUFFER_SIZE
    }

    /// Drops a parsed prefix, preserving the tail.
    pub(crate) fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.len);
        if n == self.len {
            // common case: the buffer held exactly one complete message
            self.len = 0;
        } else {
            self.data.copy_within(n..self.len, 0);
            self.len -= n;
        }
    }

    /// Reads once from `io` into the free tail. Returns the number of bytes
    /// read; zero means the remote closed the connection.
    pub(crate) async fn read_from<R>(&mut self, io: &mut R) -> io::Result<usize>
    where
        R: AsyncRead + Unpin,
    {
        debug_assert!(!self.is_full());
        let n = io.read(&mut self.data[self.len..]).await?;
        self.len += n;
        Ok(n)
    }
}
