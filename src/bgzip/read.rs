//! Streaming bgzip decompressor with random access by virtual offsets.

use std::io::{self, Read, Seek};
use std::fs::File;
use std::path::Path;

use flate2::{Decompress, FlushDecompress, Status};
use byteorder::{LittleEndian, ByteOrder};

use crate::error::Error;
use crate::index::VirtualOffset;
use super::window::RawWindow;
use super::{MAX_BLOCK_SIZE, DEFAULT_IO_CHUNK_SIZE, HEADER_SIZE, FOOTER_SIZE};
use super::{analyze_header, analyze_extra_fields, analyze_footer};

fn truncated(what: &str) -> Error {
    Error::Truncated(io::Error::new(io::ErrorKind::UnexpectedEof,
        format!("Failed to read {}", what)))
}

/// Decompresses a bgzip stream one block at a time.
///
/// At most one decompressed block is kept in memory. Raw data is read through a
/// [RawWindow](../window/struct.RawWindow.html) of two I/O chunks, and the stream is only
/// seeked by [seek](#method.seek).
///
/// All slices returned by the stream are invalidated by the next read or seek.
///
/// Any decoding error is fatal: afterwards every read returns an error until a successful
/// [seek](#method.seek).
pub struct BamStream<R: Read + Seek> {
    stream: R,
    window: RawWindow,
    decompressor: Decompress,
    block: Vec<u8>,
    block_offset: u64,
    next_block_offset: u64,
    contents_offset: usize,
    bytes_in: u64,
    bytes_out: u64,
    failed: Option<String>,
}

impl BamStream<File> {
    /// Opens a stream from a file with the default I/O chunk size.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let file = File::open(path)?;
        BamStream::new(file, DEFAULT_IO_CHUNK_SIZE)
    }
}

impl<R: Read + Seek> BamStream<R> {
    /// Creates a stream positioned at the start of `stream`. `io_chunk_size` must be at least
    /// [MAX_BLOCK_SIZE](../constant.MAX_BLOCK_SIZE.html).
    pub fn new(mut stream: R, io_chunk_size: usize) -> Result<Self, Error> {
        if io_chunk_size < MAX_BLOCK_SIZE {
            return Err(Error::InvalidInput(format!("I/O chunk size {} is smaller than {}",
                io_chunk_size, MAX_BLOCK_SIZE)));
        }
        let mut window = RawWindow::new(io_chunk_size)?;
        let mut block = Vec::new();
        block.try_reserve_exact(MAX_BLOCK_SIZE).map_err(|_| Error::OutOfMemory)?;
        window.load(&mut stream, 0)?;
        Ok(BamStream {
            stream, window, block,
            decompressor: Decompress::new(false),
            block_offset: 0,
            next_block_offset: 0,
            contents_offset: 0,
            bytes_in: 0,
            bytes_out: 0,
            failed: None,
        })
    }

    /// Decompresses the next block. Returns `false` if the stream ended exactly at a block
    /// boundary. Unread data of the previous block is dropped.
    ///
    /// Empty blocks (for example the end-of-file marker) are decompressed as usual, so the
    /// function can return `true` without producing any data.
    pub fn fill(&mut self) -> Result<bool, Error> {
        self.check_failed()?;
        match self.decode_block() {
            Err(e) => Err(self.fail(e)),
            res => res,
        }
    }

    /// Returns `true` if an earlier error stopped the stream.
    pub fn is_failed(&self) -> bool {
        self.failed.is_some()
    }

    fn check_failed(&self) -> Result<(), Error> {
        match &self.failed {
            Some(msg) => Err(Error::corrupted(format!("Stream stopped after an error: {}", msg))),
            None => Ok(()),
        }
    }

    fn fail(&mut self, e: Error) -> Error {
        self.failed = Some(e.to_string());
        e
    }

    fn decode_block(&mut self) -> Result<bool, Error> {
        self.block.clear();
        self.contents_offset = 0;
        self.block_offset = self.window.position();
        self.next_block_offset = self.block_offset;

        if !self.window.ensure(&mut self.stream, HEADER_SIZE)? {
            return if self.window.available().is_empty() {
                Ok(false)
            } else {
                Err(truncated("bgzip block header"))
            };
        }
        let extra_len = analyze_header(self.window.available())? as usize;
        if !self.window.ensure(&mut self.stream, HEADER_SIZE + extra_len)? {
            return Err(truncated("bgzip block header"));
        }
        let block_size = analyze_extra_fields(
            &self.window.available()[HEADER_SIZE..HEADER_SIZE + extra_len])? as usize + 1;
        if block_size < HEADER_SIZE + extra_len + FOOTER_SIZE {
            return Err(Error::corrupted(format!("bgzip block size {} is too small", block_size)));
        }
        if !self.window.ensure(&mut self.stream, block_size)? {
            return Err(truncated("bgzip block"));
        }

        let raw = &self.window.available()[..block_size];
        self.decompressor.reset(false);
        let status = self.decompressor.decompress_vec(
            &raw[HEADER_SIZE + extra_len..block_size - FOOTER_SIZE],
            &mut self.block, FlushDecompress::Finish);
        self.bytes_in += self.decompressor.total_in();
        self.bytes_out += self.decompressor.total_out();
        match status {
            Ok(Status::StreamEnd) => {},
            Ok(_) => return Err(Error::corrupted(format!(
                "bgzip block at {} does not end its deflate stream", self.block_offset))),
            Err(e) => return Err(Error::corrupted(format!(
                "Failed to decompress bgzip block at {}: {}", self.block_offset, e))),
        }

        let (exp_crc32, exp_size) = analyze_footer(&raw[block_size - FOOTER_SIZE..]);
        if exp_size as usize != self.block.len() {
            return Err(Error::corrupted(format!(
                "bgzip block at {}: uncompressed size does not match: expected {}, observed {}",
                self.block_offset, exp_size, self.block.len())));
        }
        let obs_crc32 = crc32fast::hash(&self.block);
        if obs_crc32 != exp_crc32 {
            return Err(Error::corrupted(format!(
                "bgzip block at {}: CRC does not match: expected {}, observed {}",
                self.block_offset, exp_crc32, obs_crc32)));
        }

        self.window.consume(block_size);
        self.next_block_offset = self.block_offset + block_size as u64;
        Ok(true)
    }

    /// Copies decompressed bytes into `buf`, decompressing new blocks as needed.
    /// Returns the number of copied bytes, which is smaller than `buf.len()` only if the
    /// stream has ended.
    pub fn read_up_to(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        self.check_failed()?;
        let mut copied = 0;
        while copied < buf.len() {
            if self.contents_offset >= self.block.len() && !self.fill()? {
                break;
            }
            let available = &self.block[self.contents_offset..];
            let n = available.len().min(buf.len() - copied);
            buf[copied..copied + n].copy_from_slice(&available[..n]);
            copied += n;
            self.contents_offset += n;
        }
        Ok(copied)
    }

    /// Reads the next length-prefixed BAM record into `record` (without the 4-byte length).
    /// Returns `false` if the stream has no more data.
    pub fn read_record_into(&mut self, record: &mut Vec<u8>) -> Result<bool, Error> {
        self.check_failed()?;
        self.read_record(record).map_err(|e| self.fail(e))
    }

    fn read_record(&mut self, record: &mut Vec<u8>) -> Result<bool, Error> {
        let mut size_buf = [0_u8; 4];
        match self.read_up_to(&mut size_buf)? {
            0 => return Ok(false),
            4 => {},
            _ => return Err(truncated("record size")),
        }
        let size = LittleEndian::read_i32(&size_buf);
        if size < 0 {
            return Err(Error::corrupted(format!("Negative record size ({})", size)));
        }
        let size = size as usize;
        record.clear();
        record.try_reserve(size).map_err(|_| Error::OutOfMemory)?;
        record.resize(size, 0);
        if self.read_up_to(record)? < size {
            return Err(truncated("record"));
        }
        Ok(true)
    }

    /// Moves to the virtual offset `offset`: loads the raw window around the block, decompresses
    /// it and checks that the offset inside the block is valid.
    ///
    /// Offset `(c, 0)` is accepted if there is a (possibly empty) block at `c` or the file
    /// ends exactly at `c`; other offsets must point inside the decompressed block.
    /// Offsets past the end of the file return
    /// [InvalidPosition](../../error/enum.Error.html#variant.InvalidPosition).
    ///
    /// A successful seek clears an earlier failure, a failed seek leaves the stream stopped.
    pub fn seek(&mut self, offset: VirtualOffset) -> Result<(), Error> {
        log::debug!("Seek to {}", offset);
        self.failed = None;
        if let Err(e) = self.window.load(&mut self.stream, offset.block_offset()) {
            return Err(self.fail(e));
        }
        if self.window.position() > self.window.end() {
            self.block.clear();
            self.contents_offset = 0;
            return Err(self.fail(Error::InvalidPosition(offset)));
        }
        self.fill()?;
        let contents_offset = offset.contents_offset() as usize;
        if contents_offset > 0 && contents_offset >= self.block.len() {
            return Err(self.fail(Error::InvalidPosition(offset)));
        }
        self.contents_offset = contents_offset;
        Ok(())
    }

    /// Returns the virtual offset of the next unread byte. If the current block is fully
    /// read, returns the start of the next block.
    pub fn tell(&self) -> VirtualOffset {
        if self.contents_offset >= self.block.len() {
            VirtualOffset::new(self.next_block_offset, 0)
        } else {
            VirtualOffset::new(self.block_offset, self.contents_offset as u16)
        }
    }

    /// Total number of compressed bytes consumed by the decompressor.
    pub fn bytes_in(&self) -> u64 {
        self.bytes_in
    }

    /// Total number of decompressed bytes produced.
    pub fn bytes_out(&self) -> u64 {
        self.bytes_out
    }

    pub fn io_chunk_size(&self) -> usize {
        self.window.chunk_size()
    }

    /// Consumes the stream and returns the inner reader.
    pub fn take_stream(self) -> R {
        self.stream
    }
}

impl<R: Read + Seek> Read for BamStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.contents_offset >= self.block.len() {
            if !self.fill().map_err(Into::<io::Error>::into)? {
                return Ok(0);
            }
        }
        let available = &self.block[self.contents_offset..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.contents_offset += n;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Cursor, Write};
    use flate2::Compression;
    use flate2::write::DeflateEncoder;
    use byteorder::WriteBytesExt;

    fn write_block(out: &mut Vec<u8>, contents: &[u8]) {
        let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(contents).unwrap();
        let compressed = encoder.finish().unwrap();
        out.extend_from_slice(&[31, 139, 8, 4, 0, 0, 0, 0, 0, 255, 6, 0, 66, 67, 2, 0]);
        out.write_u16::<LittleEndian>((compressed.len() + 25) as u16).unwrap();
        out.extend_from_slice(&compressed);
        out.write_u32::<LittleEndian>(crc32fast::hash(contents)).unwrap();
        out.write_u32::<LittleEndian>(contents.len() as u32).unwrap();
    }

    fn contents(len: usize, seed: usize) -> Vec<u8> {
        (0..len).map(|i| ((i * 31 + seed * 17) % 253) as u8).collect()
    }

    #[test]
    fn sequential_read() {
        let mut data = Vec::new();
        write_block(&mut data, &contents(1000, 1));
        write_block(&mut data, &contents(500, 2));
        write_block(&mut data, &[]);
        let mut stream = BamStream::new(Cursor::new(data), MAX_BLOCK_SIZE).unwrap();
        let mut buf = vec![0; 2000];
        assert_eq!(stream.read_up_to(&mut buf).unwrap(), 1500);
        assert_eq!(&buf[..1000], &contents(1000, 1)[..]);
        assert_eq!(&buf[1000..1500], &contents(500, 2)[..]);
        assert_eq!(stream.bytes_out(), 1500);
        assert_eq!(stream.read_up_to(&mut buf).unwrap(), 0);
    }

    #[test]
    fn tell_and_seek() {
        let mut data = Vec::new();
        write_block(&mut data, &contents(100, 1));
        let second = data.len() as u64;
        write_block(&mut data, &contents(100, 2));
        let mut stream = BamStream::new(Cursor::new(data), MAX_BLOCK_SIZE).unwrap();
        assert_eq!(stream.tell(), VirtualOffset::new(0, 0));

        let mut buf = [0; 60];
        stream.read_up_to(&mut buf).unwrap();
        assert_eq!(stream.tell(), VirtualOffset::new(0, 60));
        stream.read_up_to(&mut buf[..40]).unwrap();
        assert_eq!(stream.tell(), VirtualOffset::new(second, 0));
        stream.read_up_to(&mut buf[..10]).unwrap();
        assert_eq!(stream.tell(), VirtualOffset::new(second, 10));

        stream.seek(VirtualOffset::new(0, 95)).unwrap();
        assert_eq!(stream.read_up_to(&mut buf[..10]).unwrap(), 10);
        let mut expected = contents(100, 1)[95..].to_vec();
        expected.extend_from_slice(&contents(100, 2)[..5]);
        assert_eq!(&buf[..10], &expected[..]);

        match stream.seek(VirtualOffset::new(second, 100)) {
            Err(Error::InvalidPosition(offset)) =>
                assert_eq!(offset, VirtualOffset::new(second, 100)),
            _ => panic!("Expected InvalidPosition"),
        }
    }

    #[test]
    fn truncated_block() {
        let mut data = Vec::new();
        write_block(&mut data, &contents(100, 1));
        let full_len = data.len();
        write_block(&mut data, &contents(100, 2));
        data.truncate(full_len + 20);
        let mut stream = BamStream::new(Cursor::new(data), MAX_BLOCK_SIZE).unwrap();
        let mut buf = [0; 200];
        match stream.read_up_to(&mut buf) {
            Err(Error::Truncated(_)) => {},
            other => panic!("Expected truncated error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn crc_mismatch() {
        let mut data = Vec::new();
        write_block(&mut data, &contents(100, 1));
        let len = data.len();
        data[len - 8] ^= 0xff;
        let mut stream = BamStream::new(Cursor::new(data), MAX_BLOCK_SIZE).unwrap();
        assert!(stream.fill().unwrap_err().is_corrupt_data());
    }

    #[test]
    fn corrupted_block_stops_stream() {
        let mut data = Vec::new();
        write_block(&mut data, &contents(100, 1));
        let second = data.len() as u64;
        write_block(&mut data, &contents(100, 2));
        let len = data.len();
        data[len - 8] ^= 0xff;
        let mut stream = BamStream::new(Cursor::new(data), MAX_BLOCK_SIZE).unwrap();

        let mut buf = [0; 150];
        assert!(stream.read_up_to(&mut buf).unwrap_err().is_corrupt_data());
        assert!(stream.is_failed());
        assert!(stream.read_up_to(&mut buf[..10]).is_err());
        assert!(stream.fill().is_err());
        let mut record = Vec::new();
        assert!(stream.read_record_into(&mut record).is_err());

        stream.seek(VirtualOffset::new(0, 20)).unwrap();
        assert!(!stream.is_failed());
        assert_eq!(stream.read_up_to(&mut buf[..80]).unwrap(), 80);
        assert_eq!(&buf[..80], &contents(100, 1)[20..]);
        assert_eq!(stream.tell(), VirtualOffset::new(second, 0));
        assert!(stream.read_up_to(&mut buf[..1]).is_err());
    }

    #[test]
    fn seek_past_end_of_file() {
        let mut data = Vec::new();
        write_block(&mut data, &contents(100, 1));
        let file_len = data.len() as u64;
        let mut stream = BamStream::new(Cursor::new(data), MAX_BLOCK_SIZE).unwrap();

        match stream.seek(VirtualOffset::new(file_len + 5000, 0)) {
            Err(Error::InvalidPosition(offset)) =>
                assert_eq!(offset, VirtualOffset::new(file_len + 5000, 0)),
            _ => panic!("Expected InvalidPosition"),
        }
        assert!(stream.is_failed());
        let mut buf = [0; 10];
        assert!(stream.read_up_to(&mut buf).is_err());

        stream.seek(VirtualOffset::new(file_len, 0)).unwrap();
        assert_eq!(stream.read_up_to(&mut buf).unwrap(), 0);
        stream.seek(VirtualOffset::new(0, 0)).unwrap();
        assert_eq!(stream.read_up_to(&mut buf).unwrap(), 10);
        assert_eq!(&buf[..], &contents(100, 1)[..10]);
    }

    #[test]
    fn small_chunk_size() {
        assert!(BamStream::new(Cursor::new(Vec::new()), 1000).is_err());
    }

    #[test]
    fn records() {
        let mut contents = Vec::new();
        for len in [3_i32, 0, 5].iter() {
            contents.write_i32::<LittleEndian>(*len).unwrap();
            contents.extend(std::iter::repeat(*len as u8).take(*len as usize));
        }
        contents.write_i32::<LittleEndian>(10).unwrap();
        contents.push(1);
        let mut data = Vec::new();
        write_block(&mut data, &contents[..6]);
        write_block(&mut data, &contents[6..]);

        let mut stream = BamStream::new(Cursor::new(data), MAX_BLOCK_SIZE).unwrap();
        let mut record = Vec::new();
        assert!(stream.read_record_into(&mut record).unwrap());
        assert_eq!(record, vec![3, 3, 3]);
        assert!(stream.read_record_into(&mut record).unwrap());
        assert!(record.is_empty());
        assert!(stream.read_record_into(&mut record).unwrap());
        assert_eq!(record, vec![5; 5]);
        match stream.read_record_into(&mut record) {
            Err(Error::Truncated(_)) => {},
            _ => panic!("Expected truncated record"),
        }
    }
}
