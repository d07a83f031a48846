//! *bamview* reads BAM files and their BAI indices, written completely in Rust.
//!
//! ## Overview
//!
//! * [BamFile](bam_reader/struct.BamFile.html) - reads records consecutively, and fetches
//! records overlapping genomic regions using the BAI index.
//! * [BamStream](bgzip/read/struct.BamStream.html) - decompresses bgzip (BGZF) files block by
//! block and supports random access by [virtual offsets](index/struct.VirtualOffset.html).
//! * [Index](index/struct.Index.html) - BAI index and the binning scheme.
//! * [Record](record/struct.Record.html) - a view over a single record, with access to its
//! [CIGAR](record/cigar/struct.Cigar.html), sequence, qualities and
//! [tags](record/tags/struct.TagViewer.html).
//! * [sam](sam/index.html) - writes records as SAM text.
//!
//! Only one bgzip block is decompressed at any time, and raw data is read in large chunks.
//!
//! ## Usage
//!
//! The following code would load BAM file `in.bam` and its index `in.bam.bai`, take all records
//! from `chr3:600001-700000` and print them on the stdout.
//!
//! ```rust,no_run
//! use std::io;
//!
//! fn main() {
//!     let mut bam_file = bamview::BamFile::from_path("in.bam").unwrap();
//!     let header = bam_file.header().clone();
//!     let stdout = io::stdout();
//!     let mut stdout = io::BufWriter::new(stdout.lock());
//!
//!     for record in bam_file.query_range("chr3", 600_000, 700_000).unwrap() {
//!         let record = record.unwrap();
//!         record.as_record().write_sam(&mut stdout, &header).unwrap();
//!     }
//! }
//! ```
//!
//! Problems with the index are not fatal: they are written to the log (see the
//! [log](https://docs.rs/log) crate), the file is opened without the index and region queries
//! return no records.

pub mod error;
pub mod index;
pub mod bgzip;
pub mod header;
pub mod record;
pub mod sam;
pub mod bam_reader;

pub use bam_reader::{BamFile, BamFileBuilder, RecordSource, RegionViewer};
pub use bgzip::BamStream;
pub use error::Error;
pub use header::{Header, ReferenceLookup, ReferenceSequence};
pub use index::VirtualOffset;
pub use record::{Record, RecordBuf};

/// A trait for reading BAM records.
///
/// You can use a single record buffer:
/// ```rust,ignore
///let mut record = bamview::RecordBuf::new();
///loop {
///    // reader: impl RecordReader
///    match reader.read_into(&mut record) {
///        // New record is saved into record.
///        Ok(()) => {},
///        // NoMoreRecords represents stop iteration.
///        Err(bamview::Error::NoMoreRecords) => break,
///        Err(e) => panic!("{}", e),
///    }
///    // Do something with record.as_record().
///}
///```
/// Or you can just iterate over records:
/// ```rust,ignore
///for record in reader {
///    let record = record.unwrap();
///    // Do something with the record.
///}
///```
pub trait RecordReader: Iterator<Item = Result<RecordBuf, Error>> {
    /// Writes the next record into `record`. It allows to skip excessive memory allocation.
    ///
    /// # Errors
    ///
    /// If there are no more records to iterate over, the function returns
    /// [NoMoreRecords](enum.Error.html#variant.NoMoreRecords) error.
    ///
    /// If the record was corrupted, the function returns
    /// [Corrupted](enum.Error.html#variant.Corrupted) error.
    /// If the record was truncated, the function returns
    /// [Truncated](enum.Error.html#variant.Truncated) error.
    ///
    /// If the function returns an error, the record is cleared.
    fn read_into(&mut self, record: &mut RecordBuf) -> Result<(), Error>;
}
