//! Record sequence and qualities.

use std::io::{self, Write};

use byteorder::WriteBytesExt;

/// Letters for 4-bit nucleotide codes.
pub const NUCLEOTIDES: &[u8; 16] = b"=ACMGRSVTWYHKDBN";
/// Quality value of a record without qualities.
pub const MISSING_QUALITY: u8 = 0xff;

/// Clamps `offset..offset + len` to `0..seq_len`.
fn clamp_range(offset: usize, len: usize, seq_len: usize) -> (usize, usize) {
    let start = offset.min(seq_len);
    let end = offset.saturating_add(len).min(seq_len);
    (start, end)
}

/// View over a raw sequence, stored as `[u8; (len + 1) / 2]`. Each four bits encode a
/// nucleotide in the following order: `=ACMGRSVTWYHKDBN`.
#[derive(Clone, Copy)]
pub struct Sequence<'a> {
    raw: &'a [u8],
    len: usize,
}

impl<'a> Sequence<'a> {
    pub(crate) fn new(raw: &'a [u8], len: usize) -> Self {
        debug_assert!(raw.len() == (len + 1) / 2);
        Sequence { raw, len }
    }

    /// Returns raw data.
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// Returns full length of the sequence, O(1).
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true`, if the sequence is not present.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns a nucleotide at the position `index`, represented by a single byte, O(1).
    pub fn at(&self, index: usize) -> u8 {
        assert!(index < self.len, "Index out of range ({} >= {})", index, self.len);
        let nt = if index % 2 == 0 {
            self.raw[index / 2] >> 4
        } else {
            self.raw[index / 2] & 0x0f
        };
        NUCLEOTIDES[nt as usize]
    }

    /// Returns transformed data, each byte represents a single nucleotide, O(n).
    pub fn to_vec(&self) -> Vec<u8> {
        (0..self.len).map(|i| self.at(i)).collect()
    }

    /// Returns nucleotides `offset..offset + len`. The range is clamped to the sequence,
    /// so out-of-range requests return a shorter (possibly empty) result.
    pub fn bases(&self, offset: usize, len: usize) -> Vec<u8> {
        let (start, end) = clamp_range(offset, len, self.len);
        (start..end).map(|i| self.at(i)).collect()
    }

    /// Writes in human readable format. Writes `*` if empty.
    pub fn write_readable<W: Write>(&self, f: &mut W) -> io::Result<()> {
        if self.len == 0 {
            return f.write_u8(b'*');
        }
        f.write_all(&self.to_vec())
    }
}

/// View over qualities. Values do not include +33.
#[derive(Clone, Copy)]
pub struct Qualities<'a> {
    raw: &'a [u8],
}

impl<'a> Qualities<'a> {
    pub(crate) fn new(raw: &'a [u8]) -> Self {
        Qualities { raw }
    }

    /// Returns raw qualities. If qualities are missing, they have the same length as the
    /// sequence, but are filled with `0xff`.
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    /// Returns `true` if raw qualities have length 0 or every value is `0xff`.
    pub fn is_missing(&self) -> bool {
        self.raw.iter().all(|&qual| qual == MISSING_QUALITY)
    }

    /// Returns qualities with +33 added, values above `~` are written as `~`, O(n).
    pub fn to_readable(&self) -> Vec<u8> {
        self.raw.iter().map(|&qual| (qual as u16 + 33).min(b'~' as u16) as u8).collect()
    }

    /// Returns qualities `offset..offset + len` (clamped to the sequence), each value limited
    /// by 63 and increased by 33. Returns an empty vector if all values in the range are `0xff`.
    pub fn fragment(&self, offset: usize, len: usize) -> Vec<u8> {
        let (start, end) = clamp_range(offset, len, self.raw.len());
        let raw = &self.raw[start..end];
        if raw.iter().all(|&qual| qual == MISSING_QUALITY) {
            return Vec::new();
        }
        raw.iter().map(|&qual| qual.min(63) + 33).collect()
    }

    /// Writes to `f` in human readable format (qual + 33). Writes `*` if qualities are missing.
    pub fn write_readable<W: Write>(&self, f: &mut W) -> io::Result<()> {
        if self.is_missing() {
            return f.write_u8(b'*');
        }
        f.write_all(&self.to_readable())
    }
}
