//! Sliding window over the raw (compressed) file.
//!
//! The window holds up to two I/O chunks. Invariants:
//!
//! * `window[0]` corresponds to the file position `start`, and `start` is always a multiple
//! of the chunk size;
//! * the consumption cursor never moves past the valid bytes;
//! * before a request for `n <= chunk_size` bytes is answered, a cursor that has crossed into
//! the second half slides the second half to the front and tops the window up. Afterwards
//! the cursor is in the first half, so at least `chunk_size` bytes fit behind it and any
//! block up to `chunk_size` bytes can be completed without an extra seek.

use std::io::{self, Read, Seek, SeekFrom};

use crate::error::Error;

/// Double-chunk raw window. See the [module documentation](index.html).
pub struct RawWindow {
    buffer: Vec<u8>,
    chunk_size: usize,
    start: u64,
    pos: usize,
}

impl RawWindow {
    /// Allocates a window of `2 * chunk_size` bytes.
    pub fn new(chunk_size: usize) -> Result<Self, Error> {
        if chunk_size == 0 {
            return Err(Error::InvalidInput("I/O chunk size must be positive".to_string()));
        }
        let mut buffer = Vec::new();
        chunk_size.checked_mul(2)
            .ok_or(Error::OutOfMemory)
            .and_then(|capacity| buffer.try_reserve_exact(capacity)
                .map_err(|_| Error::OutOfMemory))?;
        Ok(RawWindow {
            buffer,
            chunk_size,
            start: 0,
            pos: 0,
        })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// File position of the consumption cursor.
    pub fn position(&self) -> u64 {
        self.start + self.pos as u64
    }

    /// File position of the first byte in the window.
    pub fn start(&self) -> u64 {
        self.start
    }

    /// File position just after the last byte in the window.
    pub fn end(&self) -> u64 {
        self.start + self.buffer.len() as u64
    }

    /// Unconsumed bytes in the window.
    pub fn available(&self) -> &[u8] {
        self.buffer.get(self.pos..).unwrap_or(&[])
    }

    /// Marks `n` bytes as consumed. `n` must not exceed the available length.
    pub fn consume(&mut self, n: usize) {
        debug_assert!(n <= self.available().len());
        self.pos += n;
    }

    /// Discards the window and reloads it from the chunk that contains `file_pos`.
    /// The cursor is placed at `file_pos`.
    pub fn load<R: Read + Seek>(&mut self, stream: &mut R, file_pos: u64) -> Result<(), Error> {
        let chunk_size = self.chunk_size as u64;
        let aligned = file_pos / chunk_size * chunk_size;
        stream.seek(SeekFrom::Start(aligned))?;
        self.buffer.clear();
        self.start = aligned;
        self.pos = (file_pos - aligned) as usize;
        self.top_up(stream)?;
        Ok(())
    }

    /// Makes sure that at least `n` unconsumed bytes are in the window, reading from
    /// `stream` if needed. Returns `false` if the stream ends earlier.
    ///
    /// `n` must not exceed the chunk size.
    pub fn ensure<R: Read>(&mut self, stream: &mut R, n: usize) -> Result<bool, Error> {
        debug_assert!(n <= self.chunk_size);
        if self.available().len() >= n {
            return Ok(true);
        }
        if self.pos >= self.chunk_size {
            self.slide();
        }
        self.top_up(stream)?;
        Ok(self.available().len() >= n)
    }

    /// Moves the second half of the window to the front.
    fn slide(&mut self) {
        debug_assert!(self.pos >= self.chunk_size && self.buffer.len() >= self.chunk_size);
        let len = self.buffer.len();
        self.buffer.copy_within(self.chunk_size..len, 0);
        self.buffer.truncate(len - self.chunk_size);
        self.start += self.chunk_size as u64;
        self.pos -= self.chunk_size;
    }

    /// Reads until the window is full or the stream ends.
    fn top_up<R: Read>(&mut self, stream: &mut R) -> io::Result<()> {
        let capacity = 2 * self.chunk_size;
        while self.buffer.len() < capacity {
            let filled = self.buffer.len();
            self.buffer.resize(capacity, 0);
            match stream.read(&mut self.buffer[filled..]) {
                Ok(0) => {
                    self.buffer.truncate(filled);
                    break;
                },
                Ok(n) => self.buffer.truncate(filled + n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => self.buffer.truncate(filled),
                Err(e) => {
                    self.buffer.truncate(filled);
                    return Err(e);
                },
            }
        }
        Ok(())
    }
}
