//! Bgzip (BGZF) block framing and the streaming decompressor.
//!
//! A bgzip file is a sequence of gzip members. Every member carries an extra subfield `BC`
//! with the total block size, so blocks can be found without decompressing anything, and
//! decompresses to at most [MAX_BLOCK_SIZE](constant.MAX_BLOCK_SIZE.html) bytes.

pub mod window;
pub mod read;

pub use self::read::BamStream;

use super::error::Error;

/// Maximal size of a compressed block, and of its decompressed contents.
pub const MAX_BLOCK_SIZE: usize = 65536;
/// Default size of a single raw read. The raw window holds two such chunks.
pub const DEFAULT_IO_CHUNK_SIZE: usize = 1 << 20;
/// Fixed part of the gzip header, up to and including XLEN.
pub const HEADER_SIZE: usize = 12;
/// CRC32 and ISIZE.
pub const FOOTER_SIZE: usize = 8;

fn as_u16(buffer: &[u8], start: usize) -> u16 {
    buffer[start] as u16 + ((buffer[start + 1] as u16) << 8)
}

fn as_u32(buffer: &[u8], start: usize) -> u32 {
    as_u16(buffer, start) as u32 + ((as_u16(buffer, start + 2) as u32) << 16)
}

/// Analyzes 12 header bytes of a block.
/// Returns XLEN - total length of extra subfields.
pub(crate) fn analyze_header(header: &[u8]) -> Result<u16, Error> {
    if header.len() < HEADER_SIZE
            || header[0] != 31 || header[1] != 139 || header[2] != 8 || header[3] != 4 {
        return Err(Error::corrupted("bgzip block has an invalid header"));
    }
    Ok(as_u16(header, 10))
}

/// Analyzes extra fields following the header.
/// Returns BSIZE - total block size - 1.
pub(crate) fn analyze_extra_fields(extra_fields: &[u8]) -> Result<u16, Error> {
    let mut i = 0;
    while i + 3 < extra_fields.len() {
        let subfield_id1 = extra_fields[i];
        let subfield_id2 = extra_fields[i + 1];
        let subfield_len = as_u16(extra_fields, i + 2);
        if subfield_id1 == 66 && subfield_id2 == 67 {
            if subfield_len != 2 || i + 5 >= extra_fields.len() {
                return Err(Error::corrupted("bgzip block has an invalid BC subfield"));
            }
            return Ok(as_u16(extra_fields, i + 4));
        }
        i += 4 + subfield_len as usize;
    }
    Err(Error::corrupted("bgzip block has no BC subfield"))
}

/// Analyzes 8 footer bytes of a block. Returns CRC32 and the size of the decompressed data.
pub(crate) fn analyze_footer(footer: &[u8]) -> (u32, u32) {
    (as_u32(footer, 0), as_u32(footer, 4))
}
