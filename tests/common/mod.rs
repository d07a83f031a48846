//! Synthesizes BGZF-compressed BAM files and their BAI indices for the integration tests.
#![allow(dead_code)]

use std::fs;
use std::io::Write;
use std::path::PathBuf;

use byteorder::{LittleEndian, WriteBytesExt};
use flate2::write::DeflateEncoder;
use flate2::Compression;
use tempfile::TempDir;

use bamview::index::{region_to_bin, METADATA_BIN};

pub const READ_PAIRED: u16 = 0x1;
pub const READ_UNMAPPED: u16 = 0x4;
pub const FIRST_IN_PAIR: u16 = 0x40;
pub const SECONDARY: u16 = 0x100;

/// Compresses `data` into a single bgzip block.
pub fn bgzf_block(data: &[u8]) -> Vec<u8> {
    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    let compressed = encoder.finish().unwrap();

    let mut block = vec![31, 139, 8, 4, 0, 0, 0, 0, 0, 255, 6, 0, 66, 67, 2, 0];
    block.write_u16::<LittleEndian>(compressed.len() as u16 + 25).unwrap();
    block.extend_from_slice(&compressed);
    block.write_u32::<LittleEndian>(crc32fast::hash(data)).unwrap();
    block.write_u32::<LittleEndian>(data.len() as u32).unwrap();
    block
}

fn parse_cigar(text: &str) -> Vec<(u32, u8)> {
    let mut res = Vec::new();
    let mut len = 0;
    for ch in text.bytes() {
        if ch.is_ascii_digit() {
            len = len * 10 + (ch - b'0') as u32;
        } else {
            res.push((len, ch));
            len = 0;
        }
    }
    res
}

fn op_code(op: u8) -> u32 {
    b"MIDNSHP=X".iter().position(|&symbol| symbol == op).unwrap() as u32
}

fn nt_code(nt: u8) -> u8 {
    b"=ACMGRSVTWYHKDBN".iter().position(|&symbol| symbol == nt).unwrap() as u8
}

/// A record to be written into a test BAM file.
#[derive(Clone, Debug)]
pub struct TestRecord {
    pub name: String,
    pub ref_id: i32,
    pub pos: i32,
    pub flag: u16,
    pub mapq: u8,
    pub cigar: Vec<(u32, u8)>,
    pub seq: Vec<u8>,
    pub qual: Option<Vec<u8>>,
    pub next_ref_id: i32,
    pub next_pos: i32,
    pub tlen: i32,
    pub tags: Vec<u8>,
    /// Number of bytes cut from the end of the encoded record.
    pub truncate: usize,
}

impl TestRecord {
    /// Mapped record with a sequence of `ACGT` repeats matching the CIGAR.
    pub fn mapped(name: &str, ref_id: i32, pos: i32, cigar: &str) -> TestRecord {
        let cigar = parse_cigar(cigar);
        let query_len: u32 = cigar.iter().filter(|(_, op)| b"MIS=X".contains(op))
            .map(|(len, _)| len).sum();
        let seq: Vec<u8> = (0..query_len as usize).map(|i| b"ACGT"[i % 4]).collect();
        TestRecord {
            name: name.to_string(),
            ref_id, pos, cigar,
            flag: 0,
            mapq: 60,
            qual: Some(vec![30; seq.len()]),
            seq,
            next_ref_id: -1,
            next_pos: -1,
            tlen: 0,
            tags: Vec::new(),
            truncate: 0,
        }
    }

    /// Unmapped record without coordinates.
    pub fn unmapped(name: &str) -> TestRecord {
        let mut record = TestRecord::mapped(name, -1, -1, "");
        record.flag = READ_UNMAPPED;
        record.mapq = 255;
        record.seq = b"ACGTN".to_vec();
        record.qual = None;
        record
    }

    pub fn is_self_mapped(&self) -> bool {
        self.flag & READ_UNMAPPED == 0 && self.ref_id >= 0 && self.pos >= 0
            && !self.cigar.is_empty()
    }

    pub fn ref_span(&self) -> i32 {
        self.cigar.iter().filter(|(_, op)| b"MDN=X".contains(op))
            .map(|&(len, _)| len as i32).sum()
    }

    /// End used for binning: at least one base.
    fn bin_end(&self) -> i32 {
        self.pos + self.ref_span().max(1)
    }

    fn bin(&self) -> u32 {
        if self.pos < 0 {
            4680
        } else {
            region_to_bin(self.pos as u32, self.bin_end() as u32)
        }
    }

    /// Returns `true` if the record would be returned by a query of `[beg, end)` on `ref_id`.
    pub fn overlaps(&self, ref_id: i32, beg: i32, end: i32) -> bool {
        self.is_self_mapped() && self.ref_id == ref_id && self.pos < end
            && self.pos + self.ref_span() > beg
    }

    /// Encodes the record with its length prefix.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.write_i32::<LittleEndian>(self.ref_id).unwrap();
        body.write_i32::<LittleEndian>(self.pos).unwrap();
        body.write_u8(self.name.len() as u8 + 1).unwrap();
        body.write_u8(self.mapq).unwrap();
        body.write_u16::<LittleEndian>(self.bin() as u16).unwrap();
        body.write_u16::<LittleEndian>(self.cigar.len() as u16).unwrap();
        body.write_u16::<LittleEndian>(self.flag).unwrap();
        body.write_i32::<LittleEndian>(self.seq.len() as i32).unwrap();
        body.write_i32::<LittleEndian>(self.next_ref_id).unwrap();
        body.write_i32::<LittleEndian>(self.next_pos).unwrap();
        body.write_i32::<LittleEndian>(self.tlen).unwrap();
        body.extend_from_slice(self.name.as_bytes());
        body.push(0);
        for &(len, op) in self.cigar.iter() {
            body.write_u32::<LittleEndian>(len << 4 | op_code(op)).unwrap();
        }
        for pair in self.seq.chunks(2) {
            let high = nt_code(pair[0]) << 4;
            let low = pair.get(1).map(|&nt| nt_code(nt)).unwrap_or(0);
            body.push(high | low);
        }
        match &self.qual {
            Some(qual) => body.extend_from_slice(qual),
            None => body.extend(std::iter::repeat(0xff).take(self.seq.len())),
        }
        body.extend_from_slice(&self.tags);
        body.truncate(body.len() - self.truncate);

        let mut res = Vec::with_capacity(body.len() + 4);
        res.write_i32::<LittleEndian>(body.len() as i32).unwrap();
        res.extend_from_slice(&body);
        res
    }
}

/// BAM and BAI bytes together with the virtual offsets of every record.
pub struct TestBam {
    pub bam: Vec<u8>,
    pub bai: Vec<u8>,
    /// Uncompressed header and records.
    pub contents: Vec<u8>,
    /// Compressed offsets of all blocks, including the end-of-file block.
    pub block_offsets: Vec<u64>,
    /// Virtual offsets of record starts and ends.
    pub record_offsets: Vec<(u64, u64)>,
    pub first_record: u64,
}

fn header_bytes(text: &str, references: &[(&str, u32)]) -> Vec<u8> {
    let mut buf = b"BAM\x01".to_vec();
    buf.write_i32::<LittleEndian>(text.len() as i32).unwrap();
    buf.extend_from_slice(text.as_bytes());
    buf.write_i32::<LittleEndian>(references.len() as i32).unwrap();
    for &(name, len) in references {
        buf.write_i32::<LittleEndian>(name.len() as i32 + 1).unwrap();
        buf.extend_from_slice(name.as_bytes());
        buf.push(0);
        buf.write_i32::<LittleEndian>(len as i32).unwrap();
    }
    buf
}

/// Writes `references` and `records` (in the given order) into a BAM file with blocks of
/// at most `block_size` uncompressed bytes, and builds its BAI index.
pub fn build_bam(references: &[(&str, u32)], records: &[TestRecord], block_size: usize)
        -> TestBam {
    assert!(block_size > 0 && block_size <= 65536);
    let mut text = String::from("@HD\tVN:1.6\tSO:coordinate\n");
    for &(name, len) in references {
        text.push_str(&format!("@SQ\tSN:{}\tLN:{}\n", name, len));
    }
    let mut contents = header_bytes(&text, references);
    let header_len = contents.len();
    let mut record_ranges = Vec::with_capacity(records.len());
    for record in records {
        let start = contents.len();
        contents.extend_from_slice(&record.encode());
        record_ranges.push((start, contents.len()));
    }

    let mut bam = Vec::new();
    let mut block_offsets = Vec::new();
    for chunk in contents.chunks(block_size) {
        block_offsets.push(bam.len() as u64);
        bam.extend_from_slice(&bgzf_block(chunk));
    }
    block_offsets.push(bam.len() as u64);
    bam.extend_from_slice(&bgzf_block(&[]));

    let voffset = |pos: usize| block_offsets[pos / block_size] << 16 | (pos % block_size) as u64;
    let record_offsets: Vec<(u64, u64)> = record_ranges.iter()
        .map(|&(start, end)| (voffset(start), voffset(end))).collect();
    let first_record = voffset(header_len);
    let bai = build_bai(references.len(), records, &record_offsets);
    TestBam { bam, bai, contents, block_offsets, record_offsets, first_record }
}

fn build_bai(n_references: usize, records: &[TestRecord], offsets: &[(u64, u64)]) -> Vec<u8> {
    let mut bai = b"BAI\x01".to_vec();
    bai.write_i32::<LittleEndian>(n_references as i32).unwrap();
    for ref_id in 0..n_references as i32 {
        let mut bins: Vec<(u32, Vec<(u64, u64)>)> = Vec::new();
        let mut linear: Vec<u64> = Vec::new();
        let mut bounds: Option<(u64, u64)> = None;
        let (mut n_mapped, mut n_unmapped) = (0_u64, 0_u64);

        for (record, &(start, end)) in records.iter().zip(offsets) {
            if record.ref_id != ref_id || record.pos < 0 || record.truncate > 0 {
                continue;
            }
            let bin = record.bin();
            match bins.iter_mut().find(|(bin_id, _)| *bin_id == bin) {
                Some((_, chunks)) => chunks.push((start, end)),
                None => bins.push((bin, vec![(start, end)])),
            }
            let first_window = (record.pos >> 14) as usize;
            let last_window = ((record.bin_end() - 1) >> 14) as usize;
            if linear.len() <= last_window {
                linear.resize(last_window + 1, 0);
            }
            for window in first_window..=last_window {
                if linear[window] == 0 || linear[window] > start {
                    linear[window] = start;
                }
            }
            bounds = Some(match bounds {
                None => (start, end),
                Some((first, _)) => (first, end),
            });
            if record.flag & READ_UNMAPPED == 0 {
                n_mapped += 1;
            } else {
                n_unmapped += 1;
            }
        }
        for window in 1..linear.len() {
            if linear[window] == 0 {
                linear[window] = linear[window - 1];
            }
        }

        let n_bins = bins.len() + if bounds.is_some() { 1 } else { 0 };
        bai.write_i32::<LittleEndian>(n_bins as i32).unwrap();
        for (bin_id, chunks) in bins.iter() {
            bai.write_u32::<LittleEndian>(*bin_id).unwrap();
            bai.write_i32::<LittleEndian>(chunks.len() as i32).unwrap();
            for &(start, end) in chunks {
                bai.write_u64::<LittleEndian>(start).unwrap();
                bai.write_u64::<LittleEndian>(end).unwrap();
            }
        }
        if let Some((first, last)) = bounds {
            bai.write_u32::<LittleEndian>(METADATA_BIN).unwrap();
            bai.write_i32::<LittleEndian>(2).unwrap();
            for &value in [first, last, n_mapped, n_unmapped].iter() {
                bai.write_u64::<LittleEndian>(value).unwrap();
            }
        }
        bai.write_i32::<LittleEndian>(linear.len() as i32).unwrap();
        for &offset in linear.iter() {
            bai.write_u64::<LittleEndian>(offset).unwrap();
        }
    }
    let n_no_coor = records.iter().filter(|record| record.ref_id < 0).count();
    bai.write_u64::<LittleEndian>(n_no_coor as u64).unwrap();
    bai
}

/// Writes `in.bam` and, if `bai` is present, `in.bam.bai` into a new temporary directory.
pub fn write_files(bam: &[u8], bai: Option<&[u8]>) -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let bam_path = dir.path().join("in.bam");
    fs::write(&bam_path, bam).unwrap();
    if let Some(bai) = bai {
        fs::write(dir.path().join("in.bam.bai"), bai).unwrap();
    }
    (dir, bam_path)
}
