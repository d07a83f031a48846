//! BAI index: virtual offsets, per-reference bin/linear tables and region queries.

use std::io::{self, Read};
use std::fs::File;
use std::path::Path;
use std::collections::HashMap;
use std::fmt::{self, Display, Formatter};
use std::result;

use byteorder::{LittleEndian, ReadBytesExt};

use super::error::Error;

/// Bin ids below this value are regular bins of the UCSC binning scheme.
pub const N_BINS: u32 = 37450;
/// Pseudo-bin that stores reference metadata instead of chunks.
pub const METADATA_BIN: u32 = 37450;
/// Each linear index window covers `1 << LINEAR_SHIFT` = 16384 bp.
pub const LINEAR_SHIFT: u32 = 14;
/// Largest coordinate the binning scheme can address.
pub const MAX_COORDINATE: u32 = 1 << 29;

/// First bin id on every level, from the 64 Mbp level down to the 16 Kbp level.
const LEVEL_FIRST_BIN: [u32; 5] = [1, 9, 73, 585, 4681];

/// Virtual offset: a compressed offset of a bgzip block (48 bits), combined with an offset
/// inside the decompressed block contents (16 bits).
///
/// Virtual offsets are ordered in the same way as the positions they point to. Zero is a
/// valid offset here; places where a stored zero means "absent" use `Option<VirtualOffset>`
/// (see [from_stored](#method.from_stored)).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct VirtualOffset(u64);

impl VirtualOffset {
    /// Construct a virtual offset from a block offset and an offset inside the block.
    pub fn new(block_offset: u64, contents_offset: u16) -> Self {
        VirtualOffset(block_offset << 16 | contents_offset as u64)
    }

    /// Construct a virtual offset from the packed 64-bit value.
    pub fn from_raw(raw: u64) -> Self {
        VirtualOffset(raw)
    }

    /// Converts a value stored in a BAI file, where `0` marks a missing offset.
    pub fn from_stored(raw: u64) -> Option<Self> {
        if raw == 0 {
            None
        } else {
            Some(VirtualOffset(raw))
        }
    }

    /// Returns the packed 64-bit value.
    pub fn raw(self) -> u64 {
        self.0
    }

    /// Offset of the bgzip block in the compressed file.
    pub fn block_offset(self) -> u64 {
        self.0 >> 16
    }

    /// Offset inside the decompressed contents of the block.
    pub fn contents_offset(self) -> u16 {
        self.0 as u16
    }
}

impl Display for VirtualOffset {
    fn fmt(&self, f: &mut Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "c={},u={}", self.block_offset(), self.contents_offset())
    }
}

/// Metadata stored in the pseudo-bin 37450.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RefMetadata {
    /// Start of the first record on the reference.
    pub start: Option<VirtualOffset>,
    /// End of the last record on the reference.
    pub end: Option<VirtualOffset>,
    pub n_mapped: u64,
    pub n_unmapped: u64,
}

fn read_count<R: Read>(stream: &mut R, what: &str) -> Result<usize, Error> {
    let value = stream.read_i32::<LittleEndian>()?;
    if value < 0 {
        return Err(Error::corrupted(format!("Negative {} ({})", what, value)));
    }
    Ok(value as usize)
}

fn read_offset<R: Read>(stream: &mut R) -> io::Result<Option<VirtualOffset>> {
    stream.read_u64::<LittleEndian>().map(VirtualOffset::from_stored)
}

/// Index of a single reference sequence.
///
/// Each bin keeps only the start offsets of its chunks: a region query seeks to a start and
/// then filters records by their coordinates, so chunk ends are never needed.
#[derive(Clone, Debug)]
pub struct RefIndex {
    bins: HashMap<u32, Vec<VirtualOffset>>,
    linear: Vec<Option<VirtualOffset>>,
    metadata: Option<RefMetadata>,
}

impl RefIndex {
    fn from_stream<R: Read>(stream: &mut R) -> Result<Self, Error> {
        let mut bins = HashMap::new();
        let mut metadata = None;
        let n_bins = read_count(stream, "number of bins")?;
        for _ in 0..n_bins {
            let bin_id = stream.read_u32::<LittleEndian>()?;
            let n_chunks = read_count(stream, "number of chunks")?;
            if bin_id == METADATA_BIN && n_chunks == 2 {
                metadata = Some(RefMetadata {
                    start: read_offset(stream)?,
                    end: read_offset(stream)?,
                    n_mapped: stream.read_u64::<LittleEndian>()?,
                    n_unmapped: stream.read_u64::<LittleEndian>()?,
                });
            } else if bin_id < N_BINS {
                let mut starts = Vec::with_capacity(n_chunks.min(1024));
                for _ in 0..n_chunks {
                    starts.push(VirtualOffset::from_raw(stream.read_u64::<LittleEndian>()?));
                    let _end = stream.read_u64::<LittleEndian>()?;
                }
                bins.insert(bin_id, starts);
            } else {
                for _ in 0..2 * n_chunks {
                    stream.read_u64::<LittleEndian>()?;
                }
            }
        }

        let n_intervals = read_count(stream, "number of intervals")?;
        let mut linear = Vec::with_capacity(n_intervals.min(1 << 15));
        let mut last = 0_u64;
        for _ in 0..n_intervals {
            let raw = stream.read_u64::<LittleEndian>()?;
            // Repeated values mark windows without own records.
            linear.push(if raw == last { None } else { VirtualOffset::from_stored(raw) });
            last = raw;
        }
        while let Some(None) = linear.last() {
            linear.pop();
        }
        Ok(RefIndex { bins, linear, metadata })
    }

    /// Chunk start offsets of the bin `bin_id`. Empty for bins that are not in the index.
    pub fn bin(&self, bin_id: u32) -> &[VirtualOffset] {
        self.bins.get(&bin_id).map(|starts| &starts[..]).unwrap_or(&[])
    }

    /// Number of non-empty bins.
    pub fn n_bins(&self) -> usize {
        self.bins.len()
    }

    /// Linear index, one entry per 16 Kbp window. `None` marks windows that repeat the offset
    /// of the previous window. Trailing `None` entries are removed.
    pub fn linear_index(&self) -> &[Option<VirtualOffset>] {
        &self.linear
    }

    /// Returns metadata from the pseudo-bin, if present.
    pub fn metadata(&self) -> Option<&RefMetadata> {
        self.metadata.as_ref()
    }

    /// Upper bound for the candidate offsets of a query ending at `end`.
    ///
    /// `None` disables the bound: an elided linear index entry says nothing about the
    /// position, so all candidates pass. This keeps every record reachable at the cost of
    /// a few extra seeks.
    fn max_offset(&self, end: u32) -> Option<VirtualOffset> {
        let window = (end >> LINEAR_SHIFT) as usize + 1;
        if window < self.linear.len() {
            self.linear[window]
        } else {
            self.metadata.and_then(|metadata| metadata.end)
        }
    }

    /// Returns sorted candidate offsets for records that may overlap the half-open interval
    /// `[beg, end)`. The result can contain the same offset several times. An empty result
    /// means that there are no records in the interval.
    pub fn slice(&self, beg: u32, end: u32) -> Vec<VirtualOffset> {
        let max_offset = self.max_offset(end);
        let mut res = Vec::new();
        for bin_id in region_to_bins(beg, end) {
            let starts = self.bin(bin_id);
            match max_offset {
                Some(max_offset) => res.extend(starts.iter().filter(|&&start| start < max_offset)),
                None => res.extend_from_slice(starts),
            }
        }
        res.sort();
        res
    }
}

impl Display for RefIndex {
    fn fmt(&self, f: &mut Formatter) -> result::Result<(), fmt::Error> {
        let mut bin_ids: Vec<_> = self.bins.keys().collect();
        bin_ids.sort();
        writeln!(f, "    Bins:")?;
        for bin_id in bin_ids {
            write!(f, "        Bin {}:", bin_id)?;
            for start in self.bins[bin_id].iter() {
                write!(f, " {}", start)?;
            }
            writeln!(f)?;
        }
        writeln!(f, "    Intervals: {}", self.linear.len())?;
        match self.metadata {
            Some(metadata) => writeln!(f, "    Mapped: {}, unmapped: {}",
                metadata.n_mapped, metadata.n_unmapped),
            None => writeln!(f, "    No metadata"),
        }
    }
}

/// BAI index for all references of a BAM file.
pub struct Index {
    references: Vec<RefIndex>,
    n_unplaced: Option<u64>,
}

impl Index {
    /// Parses the whole index. `n_references` is the number of references in the BAM header,
    /// an index with a different number of references is rejected.
    ///
    /// Any truncated or malformed reference segment fails the whole index.
    pub fn from_bytes(data: &[u8], n_references: usize) -> Result<Index, Error> {
        let mut stream = data;
        let mut magic = [0_u8; 4];
        stream.read_exact(&mut magic)?;
        if magic != [b'B', b'A', b'I', 1] {
            return Err(Error::corrupted("Input is not in BAI format"));
        }

        let n_ref = read_count(&mut stream, "number of references")?;
        if n_ref != n_references {
            return Err(Error::corrupted(format!(
                "BAI index has {} references, BAM header has {}", n_ref, n_references)));
        }
        let mut references = Vec::with_capacity(n_ref);
        for i in 0..n_ref {
            let reference = RefIndex::from_stream(&mut stream).map_err(|e| Error::corrupted(
                format!("Failed to load index #{}: {}", i + 1, e)))?;
            references.push(reference);
        }
        let n_unplaced = stream.read_u64::<LittleEndian>().ok();
        Ok(Index { references, n_unplaced })
    }

    /// Reads the whole stream and parses it, see [from_bytes](#method.from_bytes).
    pub fn from_stream<R: Read>(mut stream: R, n_references: usize) -> Result<Index, Error> {
        let mut data = Vec::new();
        stream.read_to_end(&mut data)?;
        Index::from_bytes(&data, n_references)
    }

    pub fn from_path<P: AsRef<Path>>(path: P, n_references: usize) -> Result<Index, Error> {
        let f = File::open(&path)?;
        Index::from_stream(f, n_references)
    }

    pub fn references(&self) -> &[RefIndex] {
        &self.references
    }

    /// Consumes the index and returns per-reference indices.
    pub fn into_references(self) -> Vec<RefIndex> {
        self.references
    }

    /// Number of records without coordinates, if the index stores it.
    pub fn n_unplaced(&self) -> Option<u64> {
        self.n_unplaced
    }
}

impl Display for Index {
    fn fmt(&self, f: &mut Formatter) -> result::Result<(), fmt::Error> {
        for (i, reference) in self.references.iter().enumerate() {
            writeln!(f, "Reference {}:", i)?;
            reference.fmt(f)?;
        }
        write!(f, "Unplaced reads: ")?;
        match self.n_unplaced {
            Some(count) => writeln!(f, "{}", count),
            None => writeln!(f, "Unknown")
        }
    }
}

/// Returns the smallest bin that fully contains the half-open interval `[beg, end)`.
pub fn region_to_bin(beg: u32, end: u32) -> u32 {
    let end = end.max(beg + 1) - 1;
    for (level, &first) in LEVEL_FIRST_BIN.iter().enumerate().rev() {
        let shift = LINEAR_SHIFT + 3 * (4 - level as u32);
        if beg >> shift == end >> shift {
            return first + (beg >> shift);
        }
    }
    0
}

/// Returns all bins that may contain records overlapping `[beg, end)`: bin 0 and a range
/// of bins on every level.
pub fn region_to_bins(beg: u32, end: u32) -> Vec<u32> {
    let beg = beg.min(MAX_COORDINATE - 1);
    let end = end.min(MAX_COORDINATE).max(beg + 1) - 1;
    let mut res = vec![0];
    for (level, &first) in LEVEL_FIRST_BIN.iter().enumerate() {
        let shift = LINEAR_SHIFT + 3 * (4 - level as u32);
        res.extend(first + (beg >> shift)..=first + (end >> shift));
    }
    res
}
