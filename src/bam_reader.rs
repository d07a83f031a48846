//! BAM file reader: sequential reading and region queries using the BAI index.

use std::fs::{self, File};
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, warn};

use super::bgzip::{BamStream, DEFAULT_IO_CHUNK_SIZE};
use super::error::Error;
use super::header::{Header, ReferenceSequence};
use super::index::{Index, VirtualOffset};
use super::record::{Record, RecordBuf, FIRST_IN_PAIR, LAST_IN_PAIR};
use super::RecordReader;

/// Smallest BAI file that has a magic and a number of references.
const MIN_INDEX_SIZE: usize = 8;

/// Defines how to react to a BAI index being older than the BAM file.
///
/// # Variants
/// * `Error` - [BamFile](struct.BamFile.html) will not be constructed if the BAI index
/// was modified earlier than the BAM file,
/// * `Ignore` - does nothing if the index is older than the BAM file,
/// * `Warn` - writes a warning to the log and continues (default).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModificationTime {
    Error,
    Ignore,
    Warn,
}

impl ModificationTime {
    fn check<T: AsRef<Path>, U: AsRef<Path>>(&self, bam_path: T, bai_path: U)
            -> Result<(), Error> {
        let bam_modified = bam_path.as_ref().metadata().and_then(|metadata| metadata.modified());
        let bai_modified = bai_path.as_ref().metadata().and_then(|metadata| metadata.modified());
        let bai_older = match (bam_modified, bai_modified) {
            (Ok(bam_time), Ok(bai_time)) => bai_time < bam_time,
            _ => false, // Modification time not available.
        };
        if !bai_older {
            return Ok(());
        }

        match self {
            ModificationTime::Ignore => {},
            ModificationTime::Error => return Err(Error::InvalidInput(format!(
                "BAI index {} is older than the BAM file", bai_path.as_ref().display()))),
            ModificationTime::Warn => warn!("BAI index {} is older than the BAM file",
                bai_path.as_ref().display()),
        }
        Ok(())
    }
}

impl Default for ModificationTime {
    fn default() -> Self {
        ModificationTime::Warn
    }
}

/// [BamFile](struct.BamFile.html) builder. Allows to specify the path to the BAI index,
/// the size of I/O chunks and the reaction to an outdated index.
pub struct BamFileBuilder {
    bai_path: Option<PathBuf>,
    modification_time: ModificationTime,
    io_chunk_size: usize,
}

impl BamFileBuilder {
    pub fn new() -> Self {
        Self {
            bai_path: None,
            modification_time: ModificationTime::default(),
            io_chunk_size: DEFAULT_IO_CHUNK_SIZE,
        }
    }

    /// Sets a path to a BAI index. By default, it is `{bam_path}.bai`.
    /// Overwrites the last value, if any.
    pub fn bai_path<P: AsRef<Path>>(&mut self, path: P) -> &mut Self {
        self.bai_path = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the reaction to a BAI index that was modified earlier than the BAM file,
    /// see [ModificationTime](enum.ModificationTime.html).
    pub fn modification_time(&mut self, modification_time: ModificationTime) -> &mut Self {
        self.modification_time = modification_time;
        self
    }

    /// Sets the size of a single read from the BAM file (1 MiB by default). The stream keeps
    /// two such chunks in memory. The size must be at least 64 KiB, the maximal size of
    /// a bgzip block.
    pub fn io_chunk_size(&mut self, io_chunk_size: usize) -> &mut Self {
        self.io_chunk_size = io_chunk_size;
        self
    }

    /// Opens a BAM file from `bam_path`. If the BAI path was not specified, the function tries
    /// to load `{bam_path}.bai`.
    ///
    /// A missing or broken index is not an error: the file is opened without it, and
    /// region queries return no records.
    pub fn from_path<P: AsRef<Path>>(&self, bam_path: P) -> Result<BamFile<File>, Error> {
        let bam_path = bam_path.as_ref();
        let bai_path = self.bai_path.clone()
            .unwrap_or_else(|| PathBuf::from(format!("{}.bai", bam_path.display())));

        let file = File::open(bam_path)?;
        let mut bam_file = BamFile::new(BamStream::new(file, self.io_chunk_size)?)?;
        match fs::read(&bai_path) {
            Ok(data) => {
                self.modification_time.check(bam_path, &bai_path)?;
                bam_file.attach_index(&data);
            },
            Err(e) => debug!("No BAI index at {}: {}", bai_path.display(), e),
        }
        Ok(bam_file)
    }

    /// Creates a [BamFile](struct.BamFile.html) from a BAM stream and a BAI stream.
    /// BAM stream should support random access, while BAI stream does not need to.
    /// `bai_path` and `modification_time` values are ignored.
    pub fn from_streams<R: Read + Seek, T: Read>(&self, bam_stream: R, mut bai_stream: T)
            -> Result<BamFile<R>, Error> {
        let mut bam_file = self.from_stream(bam_stream)?;
        let mut data = Vec::new();
        match bai_stream.read_to_end(&mut data) {
            Ok(_) => bam_file.attach_index(&data),
            Err(e) => warn!("Failed to read BAI index: {}", e),
        }
        Ok(bam_file)
    }

    /// Creates a [BamFile](struct.BamFile.html) without an index from a BAM stream.
    pub fn from_stream<R: Read + Seek>(&self, bam_stream: R) -> Result<BamFile<R>, Error> {
        BamFile::new(BamStream::new(bam_stream, self.io_chunk_size)?)
    }
}

impl Default for BamFileBuilder {
    fn default() -> Self {
        BamFileBuilder::new()
    }
}

/// BAM file reader. Reads records one by one, and fetches records from genomic regions
/// if the BAI index is available.
///
/// The following code would open `in.bam` with its index `in.bam.bai`, and print all records
/// overlapping `chr1:100001-200000` in SAM format:
///
/// ```rust,no_run
/// let mut bam_file = bamview::BamFile::from_path("in.bam").unwrap();
/// // Reference names are needed to write SAM, but the file is blocked during the query.
/// let header = bam_file.header().clone();
/// let mut stdout = std::io::stdout();
///
/// for record in bam_file.query_range("chr1", 100_000, 200_000).unwrap() {
///     record.unwrap().as_record().write_sam(&mut stdout, &header).unwrap();
/// }
/// ```
///
/// Records can also be read into a single buffer to save allocations:
/// ```rust,no_run
/// use bamview::RecordReader;
///
/// let mut bam_file = bamview::BamFile::from_path("in.bam").unwrap();
/// let mut record = bamview::RecordBuf::new();
/// loop {
///     match bam_file.read_into(&mut record) {
///         Ok(()) => {},
///         Err(bamview::Error::NoMoreRecords) => break,
///         Err(e) => panic!("{}", e),
///     }
///     // Do something with record.as_record().
/// }
/// ```
///
/// Use [BamFileBuilder](struct.BamFileBuilder.html) for a different BAI path or I/O chunk size:
/// ```rust,no_run
/// use bamview::bam_reader::ModificationTime;
///
/// let bam_file = bamview::BamFile::build()
///     .bai_path("other_dir/test.bai")
///     .io_chunk_size(1 << 16)
///     .modification_time(ModificationTime::Ignore)
///     .from_path("in.bam").unwrap();
/// ```
pub struct BamFile<R: Read + Seek> {
    stream: BamStream<R>,
    header: Header,
    first_record: VirtualOffset,
    n_unplaced: Option<u64>,
}

impl BamFile<File> {
    /// Creates [BamFileBuilder](struct.BamFileBuilder.html).
    pub fn build() -> BamFileBuilder {
        BamFileBuilder::new()
    }

    /// Opens BAM file from `path`. BAI index will be loaded from `{path}.bai`, if present.
    ///
    /// Same as `Self::build().from_path(path)`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Self::build().from_path(path)
    }
}

impl<R: Read + Seek> BamFile<R> {
    fn new(mut stream: BamStream<R>) -> Result<Self, Error> {
        let header = Header::from_bam(&mut stream)?;
        let first_record = stream.tell();
        debug!("BAM header: {} references, first record at {}", header.n_references(),
            first_record);
        Ok(BamFile {
            stream, header, first_record,
            n_unplaced: None,
        })
    }

    /// Parses the index and attaches it to the references. Any problem drops the whole index.
    fn attach_index(&mut self, data: &[u8]) {
        if data.len() < MIN_INDEX_SIZE {
            debug!("BAI index is too short ({} bytes), ignoring it", data.len());
            return;
        }
        let index = match Index::from_bytes(data, self.header.n_references()) {
            Ok(index) => index,
            Err(e) => {
                warn!("Failed to load BAI index, region queries are disabled: {}", e);
                return;
            },
        };
        self.n_unplaced = index.n_unplaced();
        let references = self.header.references_mut();
        for (reference, ref_index) in references.iter_mut().zip(index.into_references()) {
            reference.set_index(Some(Arc::new(ref_index)));
        }
        debug!("Loaded BAI index for {} references", references.len());
    }

    /// Returns [header](../header/struct.Header.html).
    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Returns reference sequences (names, lengths and indices).
    pub fn references(&self) -> &[ReferenceSequence] {
        self.header.references()
    }

    pub fn reference_by_name(&self, name: &str) -> Option<&ReferenceSequence> {
        self.header.reference_by_name(name)
    }

    /// Returns `true` if the BAI index was loaded.
    pub fn has_index(&self) -> bool {
        self.header.references().iter().any(|reference| reference.index().is_some())
    }

    /// Number of records without coordinates, if the index stores it.
    pub fn n_unplaced(&self) -> Option<u64> {
        self.n_unplaced
    }

    /// Returns the underlying decompressor, for example to check its position
    /// or the number of processed bytes.
    pub fn stream(&self) -> &BamStream<R> {
        &self.stream
    }

    /// Virtual offset of the first record, just after the header.
    pub fn first_record_offset(&self) -> VirtualOffset {
        self.first_record
    }

    /// Moves back to the first record.
    pub fn rewind(&mut self) -> Result<(), Error> {
        self.stream.seek(self.first_record)
    }

    /// Returns `false` if the record is first (last) in pair, and its own (mate) reference id
    /// is not in the header. Records shorter than their fields never reach this point,
    /// see [Record::new](../record/struct.Record.html#method.new).
    pub fn is_good_record(&self, record: &Record) -> bool {
        let n_refs = self.header.n_references() as i64;
        let flag = record.flag();
        if flag & FIRST_IN_PAIR != 0 && record.ref_id() > 0 && record.ref_id() as i64 >= n_refs {
            return false;
        }
        if flag & LAST_IN_PAIR != 0 && record.next_ref_id() > 0
                && record.next_ref_id() as i64 >= n_refs {
            return false;
        }
        true
    }

    /// Reads the next good record into `record`, skipping bad records with a warning.
    /// Returns `false` at the end of the stream, and after the stream was stopped by an error.
    /// The record is cleared if the function returns `false` or an error.
    fn next_good_record(&mut self, record: &mut RecordBuf) -> Result<bool, Error> {
        if self.stream.is_failed() {
            record.clear();
            return Ok(false);
        }
        loop {
            let offset = self.stream.tell();
            match self.stream.read_record_into(record.raw_mut()) {
                Ok(true) => {},
                Ok(false) => {
                    record.clear();
                    return Ok(false);
                },
                Err(e) => {
                    record.clear();
                    return Err(e);
                },
            }
            if let Err(e) = record.finish_fill() {
                warn!("Skipping record at {}: {}", offset, e);
                continue;
            }
            if !self.is_good_record(&record.as_record()) {
                warn!("Skipping record at {}: reference id is not in the header", offset);
                continue;
            }
            return Ok(true);
        }
    }

    /// Returns a sequential source over the remaining records, starting at the current
    /// position. Use [rewind](#method.rewind) to start from the first record.
    pub fn records(&mut self) -> RecordSource<R> {
        RecordSource::Sequential(self)
    }

    /// Returns records aligned to the reference `name` and overlapping the 0-based half-open
    /// interval `[start, end)`. `end` is clamped to the reference length.
    ///
    /// Returns an empty source if the reference is unknown, has no index, or the interval is
    /// empty. Returns an error only if the first seek fails.
    pub fn query_range(&mut self, name: &str, start: u32, end: u32)
            -> Result<RecordSource<R>, Error> {
        self.query_range_by(name, start, end, |_| true)
    }

    /// Same as [query_range](#method.query_range), but only returns records that satisfy
    /// `predicate`. For example,
    /// ```rust,ignore
    /// bam_file.query_range_by("chr1", 100_000, 200_000,
    ///     |record| record.mapq() >= 30 && record.is_primary())
    /// ```
    pub fn query_range_by<'a, F>(&'a mut self, name: &str, start: u32, end: u32, predicate: F)
        -> Result<RecordSource<'a, R>, Error>
    where F: 'a + Fn(&Record) -> bool
    {
        let ref_id = match self.header.reference_id(name) {
            Some(ref_id) => ref_id,
            None => {
                debug!("Query {}:{}-{}: unknown reference", name, start, end);
                return Ok(RecordSource::Empty);
            },
        };
        let reference = &self.header.references()[ref_id];
        let end = end.min(reference.length());
        let index = match reference.index() {
            Some(index) if start < end => Arc::clone(index),
            _ => {
                debug!("Query {}:{}-{}: no index or empty interval", name, start, end);
                return Ok(RecordSource::Empty);
            },
        };

        let mut candidates = index.slice(start, end);
        candidates.dedup();
        debug!("Query {}:{}-{}: {} candidate offsets", name, start, end, candidates.len());
        if candidates.is_empty() {
            return Ok(RecordSource::Empty);
        }
        self.stream.seek(candidates[0])?;
        Ok(RecordSource::Slice(RegionViewer {
            file: self,
            candidates,
            next_candidate: 1,
            ref_id: ref_id as i32,
            start,
            end,
            matched: false,
            finished: false,
            predicate: Box::new(predicate),
        }))
    }

    /// Returns all records aligned to the reference `name`.
    pub fn query_reference(&mut self, name: &str) -> Result<RecordSource<R>, Error> {
        let length = match self.header.reference_by_name(name) {
            Some(reference) => reference.length(),
            None => return Ok(RecordSource::Empty),
        };
        self.query_range(name, 0, length)
    }
}

fn next_buf<T: RecordReader + ?Sized>(reader: &mut T) -> Option<Result<RecordBuf, Error>> {
    let mut record = RecordBuf::new();
    match reader.read_into(&mut record) {
        Ok(()) => Some(Ok(record)),
        Err(Error::NoMoreRecords) => None,
        Err(e) => Some(Err(e)),
    }
}

/// Reads records sequentially. Records that are shorter than their fields, or reference
/// ids not in the header, are skipped with a warning.
///
/// A decoding error is returned once, after that the reader returns `NoMoreRecords` until
/// [rewind](struct.BamFile.html#method.rewind) or a new query.
impl<R: Read + Seek> RecordReader for BamFile<R> {
    fn read_into(&mut self, record: &mut RecordBuf) -> Result<(), Error> {
        if self.next_good_record(record)? {
            Ok(())
        } else {
            Err(Error::NoMoreRecords)
        }
    }
}

/// Iterator over records.
///
/// # Errors
///
/// If the record was corrupted, the function returns
/// [Corrupted](../enum.Error.html#variant.Corrupted) error.
/// If the record was truncated, the function returns
/// [Truncated](../enum.Error.html#variant.Truncated) error.
impl<R: Read + Seek> Iterator for BamFile<R> {
    type Item = Result<RecordBuf, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        next_buf(self)
    }
}

/// Iterator over records overlapping a genomic region.
/// Implements [RecordReader](../trait.RecordReader.html) trait.
///
/// The viewer seeks to the first candidate offset from the index and then reads records in
/// the file order. It moves to the next candidate only after the stream ends, and only to
/// offsets that were not passed yet, so every record is returned at most once.
///
/// Iteration stops at the first placed record that starts at or after the end of the region,
/// or that belongs to another reference after records of the queried reference were seen.
pub struct RegionViewer<'a, R: Read + Seek> {
    file: &'a mut BamFile<R>,
    candidates: Vec<VirtualOffset>,
    next_candidate: usize,
    ref_id: i32,
    start: u32,
    end: u32,
    matched: bool,
    finished: bool,
    predicate: Box<dyn Fn(&Record) -> bool + 'a>,
}

impl<'a, R: Read + Seek> RegionViewer<'a, R> {
    /// Reference id (0-based) of the query.
    pub fn ref_id(&self) -> i32 {
        self.ref_id
    }

    /// Region `[start, end)` of the query.
    pub fn region(&self) -> (u32, u32) {
        (self.start, self.end)
    }

    /// Sorted candidate offsets without duplicates.
    pub fn candidates(&self) -> &[VirtualOffset] {
        &self.candidates
    }

    /// Seeks to the first candidate after the current position. Returns `false` if there is
    /// no such candidate.
    fn seek_next_candidate(&mut self) -> Result<bool, Error> {
        let reached = self.file.stream.tell();
        while self.next_candidate < self.candidates.len() {
            let candidate = self.candidates[self.next_candidate];
            self.next_candidate += 1;
            if candidate > reached {
                self.file.stream.seek(candidate)?;
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn finish(&mut self, record: &mut RecordBuf) -> Error {
        self.finished = true;
        record.clear();
        Error::NoMoreRecords
    }
}

impl<'a, R: Read + Seek> RegionViewer<'a, R> {
    fn read_next(&mut self, record: &mut RecordBuf) -> Result<(), Error> {
        loop {
            if self.finished {
                record.clear();
                return Err(Error::NoMoreRecords);
            }
            if !self.file.next_good_record(record)? {
                if !self.seek_next_candidate()? {
                    return Err(self.finish(record));
                }
                continue;
            }

            let current = record.as_record();
            if !current.is_self_mapped() {
                continue;
            }
            if current.ref_id() != self.ref_id {
                if self.matched {
                    return Err(self.finish(record));
                }
                continue;
            }
            self.matched = true;
            if current.start() as i64 >= self.end as i64 {
                return Err(self.finish(record));
            }
            if current.calculate_end() <= self.start as i64 {
                continue;
            }
            if !(self.predicate)(&current) {
                continue;
            }
            return Ok(());
        }
    }
}

/// The first error ends the iteration: it is returned once, followed by `NoMoreRecords`.
impl<'a, R: Read + Seek> RecordReader for RegionViewer<'a, R> {
    fn read_into(&mut self, record: &mut RecordBuf) -> Result<(), Error> {
        match self.read_next(record) {
            Err(Error::NoMoreRecords) => Err(Error::NoMoreRecords),
            Err(e) => {
                self.finished = true;
                record.clear();
                Err(e)
            },
            Ok(()) => Ok(()),
        }
    }
}

impl<'a, R: Read + Seek> Iterator for RegionViewer<'a, R> {
    type Item = Result<RecordBuf, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        next_buf(self)
    }
}

/// Source of records, returned by [BamFile](struct.BamFile.html) queries.
///
/// # Variants
/// * `Sequential` - all records from the current position of the file,
/// * `Slice` - records overlapping a region, see [RegionViewer](struct.RegionViewer.html),
/// * `Empty` - no records, for queries to unknown references, references without an index,
/// or regions without candidates.
pub enum RecordSource<'a, R: Read + Seek> {
    Sequential(&'a mut BamFile<R>),
    Slice(RegionViewer<'a, R>),
    Empty,
}

impl<'a, R: Read + Seek> RecordSource<'a, R> {
    pub fn is_empty_source(&self) -> bool {
        match self {
            RecordSource::Empty => true,
            _ => false,
        }
    }
}

impl<'a, R: Read + Seek> RecordReader for RecordSource<'a, R> {
    fn read_into(&mut self, record: &mut RecordBuf) -> Result<(), Error> {
        match self {
            RecordSource::Sequential(file) => file.read_into(record),
            RecordSource::Slice(viewer) => viewer.read_into(record),
            RecordSource::Empty => {
                record.clear();
                Err(Error::NoMoreRecords)
            },
        }
    }
}

impl<'a, R: Read + Seek> Iterator for RecordSource<'a, R> {
    type Item = Result<RecordBuf, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        next_buf(self)
    }
}
