//! BAM records: a borrowed [Record](struct.Record.html) view and an owned
//! [RecordBuf](struct.RecordBuf.html).

use std::io::{self, Write};
use std::fmt::{self, Debug, Formatter};

use byteorder::{LittleEndian, ByteOrder, WriteBytesExt};

use super::error::Error;
use super::header::ReferenceLookup;

pub mod cigar;
pub mod sequence;
pub mod tags;

pub use self::cigar::{Cigar, CigarAlphabet, Operation};
pub use self::sequence::{Sequence, Qualities};
pub use self::tags::{TagViewer, TagValue};

pub const READ_PAIRED: u16 = 0x1;
pub const ALL_SEGMENTS_ALIGNED: u16 = 0x2;
pub const READ_UNMAPPED: u16 = 0x4;
pub const MATE_UNMAPPED: u16 = 0x8;
pub const READ_REVERSE_STRAND: u16 = 0x10;
pub const MATE_REVERSE_STRAND: u16 = 0x20;
pub const FIRST_IN_PAIR: u16 = 0x40;
pub const LAST_IN_PAIR: u16 = 0x80;
pub const SECONDARY: u16 = 0x100;
pub const READ_FAILS_QC: u16 = 0x200;
pub const PCR_OR_OPTICAL_DUPLICATE: u16 = 0x400;
pub const SUPPLEMENTARY: u16 = 0x800;

/// Size of the fixed part of a record (without the 4-byte length prefix).
pub const FIXED_SIZE: usize = 32;

const REF_ID: usize = 0;
const POS: usize = 4;
const NAME_LEN: usize = 8;
const MAPQ: usize = 9;
const BIN: usize = 10;
const N_CIGAR: usize = 12;
const FLAG: usize = 14;
const SEQ_LEN: usize = 16;
const NEXT_REF_ID: usize = 20;
const NEXT_POS: usize = 24;
const TEMPLATE_LEN: usize = 28;

/// Minimal size of a record with the fields stored in `raw` (without the length prefix).
/// Returns `FIXED_SIZE` if `raw` does not contain the fixed part, and `usize::MAX` if the
/// sequence length is negative.
pub fn min_size(raw: &[u8]) -> usize {
    if raw.len() < FIXED_SIZE {
        return FIXED_SIZE;
    }
    let seq_len = LittleEndian::read_i32(&raw[SEQ_LEN..]);
    if seq_len < 0 {
        return std::usize::MAX;
    }
    let seq_len = seq_len as usize;
    FIXED_SIZE + raw[NAME_LEN] as usize + 4 * LittleEndian::read_u16(&raw[N_CIGAR..]) as usize
        + (seq_len + 1) / 2 + seq_len
}

/// Returns `true` if `raw` is shorter than the sizes of its fields require.
pub fn is_too_small(raw: &[u8]) -> bool {
    raw.len() < min_size(raw)
}

/// Borrowed view over a single BAM record (without the 4-byte length prefix).
///
/// The view is only created over records that passed [is_too_small](fn.is_too_small.html),
/// so accessors never read outside of the record. Records read by a
/// [BamFile](../bam_reader/struct.BamFile.html) are stored in a caller-owned
/// [RecordBuf](struct.RecordBuf.html); use [to_buf](#method.to_buf) to keep a copy.
#[derive(Clone, Copy)]
pub struct Record<'a> {
    raw: &'a [u8],
}

impl<'a> Record<'a> {
    /// Creates a view over `raw`. Returns [Corrupted](../error/enum.Error.html#variant.Corrupted)
    /// if the record is too small.
    pub fn new(raw: &'a [u8]) -> Result<Self, Error> {
        if is_too_small(raw) {
            return Err(Error::corrupted(format!("Record is too small: {} bytes, at least {} \
                required", raw.len(), min_size(raw))));
        }
        Ok(Record { raw })
    }

    /// Returns the raw record without the length prefix.
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// Returns 0-based reference index. Returns -1 for unmapped records.
    pub fn ref_id(&self) -> i32 {
        LittleEndian::read_i32(&self.raw[REF_ID..])
    }

    /// Returns 0-based left-most aligned reference position. Same as *POS - 1* in SAM
    /// specification. Returns -1 for unmapped records.
    pub fn start(&self) -> i32 {
        LittleEndian::read_i32(&self.raw[POS..])
    }

    /// Returns BAI bin.
    pub fn bin(&self) -> u16 {
        LittleEndian::read_u16(&self.raw[BIN..])
    }

    /// Returns record MAPQ.
    pub fn mapq(&self) -> u8 {
        self.raw[MAPQ]
    }

    pub fn flag(&self) -> u16 {
        LittleEndian::read_u16(&self.raw[FLAG..])
    }

    /// Returns 0-based reference index for the pair record.
    pub fn next_ref_id(&self) -> i32 {
        LittleEndian::read_i32(&self.raw[NEXT_REF_ID..])
    }

    /// Returns 0-based left-most aligned reference position for the pair record.
    /// Same as *PNEXT - 1* in SAM specification.
    pub fn next_start(&self) -> i32 {
        LittleEndian::read_i32(&self.raw[NEXT_POS..])
    }

    /// Observed template length (TLEN in SAM specification).
    pub fn template_len(&self) -> i32 {
        LittleEndian::read_i32(&self.raw[TEMPLATE_LEN..])
    }

    fn name_len(&self) -> usize {
        self.raw[NAME_LEN] as usize
    }

    fn n_cigar(&self) -> usize {
        LittleEndian::read_u16(&self.raw[N_CIGAR..]) as usize
    }

    fn seq_len(&self) -> usize {
        LittleEndian::read_i32(&self.raw[SEQ_LEN..]) as usize
    }

    fn cigar_start(&self) -> usize {
        FIXED_SIZE + self.name_len()
    }

    fn seq_start(&self) -> usize {
        self.cigar_start() + 4 * self.n_cigar()
    }

    fn qual_start(&self) -> usize {
        self.seq_start() + (self.seq_len() + 1) / 2
    }

    fn tags_start(&self) -> usize {
        self.qual_start() + self.seq_len()
    }

    /// Returns record name as bytes, without the terminating NUL.
    pub fn name(&self) -> &'a [u8] {
        let name = &self.raw[FIXED_SIZE..self.cigar_start()];
        let len = name.iter().position(|&ch| ch == 0).unwrap_or(name.len());
        &name[..len]
    }

    /// Returns record CIGAR (can be empty).
    pub fn cigar(&self) -> Cigar<'a> {
        Cigar::new(&self.raw[self.cigar_start()..self.seq_start()])
    }

    /// Returns record sequence (can be empty).
    pub fn sequence(&self) -> Sequence<'a> {
        Sequence::new(&self.raw[self.seq_start()..self.qual_start()], self.seq_len())
    }

    /// Returns record qualities. Missing qualities are stored as `0xff`.
    pub fn qualities(&self) -> Qualities<'a> {
        Qualities::new(&self.raw[self.qual_start()..self.tags_start()])
    }

    /// Returns a view over the optional fields.
    pub fn tags(&self) -> TagViewer<'a> {
        TagViewer::new(&self.raw[self.tags_start()..])
    }

    /// Returns the value of the `RG:Z` tag, if present.
    pub fn read_group(&self) -> Option<&'a [u8]> {
        self.tags().iter().find_map(|(name, value)| match value {
            TagValue::String(group, tags::StringType::String) if &name == b"RG" => Some(group),
            _ => None,
        })
    }

    /// Number of reference positions covered by the alignment (see
    /// [Cigar::ref_span](cigar/struct.Cigar.html#method.ref_span)).
    pub fn ref_span(&self) -> u32 {
        self.cigar().ref_span()
    }

    /// For a record aligned to reference positions `[start-end)`, the function returns `end`.
    /// Takes O(n), where *n* is the length of the CIGAR.
    pub fn calculate_end(&self) -> i64 {
        self.start() as i64 + self.ref_span() as i64
    }

    /// Nucleotides `offset..offset + len`, clamped to the sequence length.
    pub fn bases(&self, offset: usize, len: usize) -> Vec<u8> {
        self.sequence().bases(offset, len)
    }

    /// Qualities `offset..offset + len` (+33, values limited by 63), clamped to the sequence length.
    /// Empty if the qualities are missing.
    pub fn fragment_qualities(&self, offset: usize, len: usize) -> Vec<u8> {
        self.qualities().fragment(offset, len)
    }

    /// Returns `true` if the record is placed on its reference: it is mapped, has
    /// non-negative reference id and position, and a non-empty CIGAR.
    pub fn is_self_mapped(&self) -> bool {
        self.is_mapped() && self.ref_id() >= 0 && self.start() >= 0 && self.n_cigar() > 0
    }

    /// Returns `true` if the record is paired, and its mate is placed on a reference.
    pub fn is_mate_mapped(&self) -> bool {
        self.is_paired() && self.mate_is_mapped()
            && self.next_ref_id() >= 0 && self.next_start() >= 0
    }

    /// Returns `true` if the record is paired and is either the first or the last segment,
    /// but not both.
    pub fn has_mate(&self) -> bool {
        self.is_paired() && self.first_in_pair() != self.last_in_pair()
    }

    /// Returns `true` if the record is neither secondary nor supplementary.
    pub fn is_primary(&self) -> bool {
        self.flag() & (SECONDARY | SUPPLEMENTARY) == 0
    }

    pub fn is_paired(&self) -> bool {
        self.flag() & READ_PAIRED != 0
    }

    pub fn all_segments_aligned(&self) -> bool {
        self.flag() & ALL_SEGMENTS_ALIGNED != 0
    }

    pub fn is_mapped(&self) -> bool {
        self.flag() & READ_UNMAPPED == 0
    }

    pub fn mate_is_mapped(&self) -> bool {
        self.flag() & MATE_UNMAPPED == 0
    }

    pub fn is_reverse_strand(&self) -> bool {
        self.flag() & READ_REVERSE_STRAND != 0
    }

    pub fn mate_is_reverse_strand(&self) -> bool {
        self.flag() & MATE_REVERSE_STRAND != 0
    }

    pub fn first_in_pair(&self) -> bool {
        self.flag() & FIRST_IN_PAIR != 0
    }

    pub fn last_in_pair(&self) -> bool {
        self.flag() & LAST_IN_PAIR != 0
    }

    pub fn is_secondary(&self) -> bool {
        self.flag() & SECONDARY != 0
    }

    pub fn is_supplementary(&self) -> bool {
        self.flag() & SUPPLEMENTARY != 0
    }

    pub fn fails_quality_controls(&self) -> bool {
        self.flag() & READ_FAILS_QC != 0
    }

    pub fn is_duplicate(&self) -> bool {
        self.flag() & PCR_OR_OPTICAL_DUPLICATE != 0
    }

    /// Write the record in SAM format to `f`, see [sam::write_sam](../sam/fn.write_sam.html).
    pub fn write_sam<W: Write, L: ReferenceLookup + ?Sized>(&self, f: &mut W, lookup: &L)
            -> io::Result<()> {
        super::sam::write_sam(f, self, lookup)
    }

    /// Copies the record into an owned buffer.
    pub fn to_buf(&self) -> RecordBuf {
        RecordBuf { raw: self.raw.to_vec() }
    }
}

impl<'a> Debug for Record<'a> {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        write!(f, "Record({}, ref_id {}, start {}, flag {})",
            String::from_utf8_lossy(self.name()), self.ref_id(), self.start(), self.flag())
    }
}

/// Owned BAM record. Always contains a valid record: a new or cleared buffer contains an
/// unmapped record with an empty name.
#[derive(Clone)]
pub struct RecordBuf {
    raw: Vec<u8>,
}

impl RecordBuf {
    /// Creates an empty record. Can be filled using
    /// [read_into](../trait.RecordReader.html#tymethod.read_into).
    pub fn new() -> RecordBuf {
        let mut res = RecordBuf { raw: Vec::with_capacity(FIXED_SIZE + 1) };
        res.clear();
        res
    }

    /// Creates a record from raw bytes (without the length prefix).
    pub fn from_raw(raw: Vec<u8>) -> Result<RecordBuf, Error> {
        Record::new(&raw)?;
        Ok(RecordBuf { raw })
    }

    /// Replaces the contents by an empty unmapped record, but does not touch capacity.
    pub fn clear(&mut self) {
        self.raw.clear();
        for &value in [-1_i32, -1].iter() {
            let _ = self.raw.write_i32::<LittleEndian>(value);
        }
        // Name length 1, MAPQ 255, bin 4680, no CIGAR, flag 0x4.
        self.raw.extend_from_slice(&[1, 255, 0x48, 0x12, 0, 0, 4, 0]);
        for &value in [0_i32, -1, -1, 0].iter() {
            let _ = self.raw.write_i32::<LittleEndian>(value);
        }
        self.raw.push(0);
    }

    /// Returns a view over the record.
    pub fn as_record(&self) -> Record {
        Record { raw: &self.raw }
    }

    /// Returns the raw record without the length prefix.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Gives access to the raw buffer for filling. Contents must be validated by
    /// `finish_fill` afterwards.
    pub(crate) fn raw_mut(&mut self) -> &mut Vec<u8> {
        &mut self.raw
    }

    /// Checks the record after it was filled. A too small record is cleared.
    pub(crate) fn finish_fill(&mut self) -> Result<(), Error> {
        if let Err(e) = Record::new(&self.raw) {
            self.clear();
            return Err(e);
        }
        Ok(())
    }

    /// Shrinks the inner buffer.
    pub fn shrink_to_fit(&mut self) {
        self.raw.shrink_to_fit();
    }
}

impl Default for RecordBuf {
    fn default() -> Self {
        RecordBuf::new()
    }
}

impl Debug for RecordBuf {
    fn fmt(&self, f: &mut Formatter) -> Result<(), fmt::Error> {
        self.as_record().fmt(f)
    }
}

impl<'a> From<Record<'a>> for RecordBuf {
    fn from(record: Record<'a>) -> RecordBuf {
        record.to_buf()
    }
}
