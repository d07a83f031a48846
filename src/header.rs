//! BAM header: header text and reference sequences.

use std::io::Read;
use std::sync::Arc;
use std::collections::HashMap;

use byteorder::{LittleEndian, ReadBytesExt};

use super::error::Error;
use super::index::RefIndex;

fn read_length<R: Read>(stream: &mut R, what: &str) -> Result<usize, Error> {
    let value = stream.read_i32::<LittleEndian>()?;
    if value < 0 {
        return Err(Error::corrupted(format!("Negative {} ({})", what, value)));
    }
    Ok(value as usize)
}

fn read_bytes<R: Read>(stream: &mut R, len: usize, what: &str) -> Result<Vec<u8>, Error> {
    let mut res = Vec::new();
    stream.take(len as u64).read_to_end(&mut res)?;
    if res.len() < len {
        return Err(Error::Truncated(std::io::Error::new(std::io::ErrorKind::UnexpectedEof,
            format!("Failed to read {}: expected {} bytes, found {}", what, len, res.len()))));
    }
    Ok(res)
}

/// Removes trailing NUL bytes.
fn trim_nul(bytes: &[u8]) -> &[u8] {
    let end = bytes.iter().rposition(|&ch| ch != 0).map(|i| i + 1).unwrap_or(0);
    &bytes[..end]
}

/// A reference sequence from the BAM header, and its index if the BAM file has one.
#[derive(Clone, Debug)]
pub struct ReferenceSequence {
    name: String,
    length: u32,
    index: Option<Arc<RefIndex>>,
}

impl ReferenceSequence {
    pub fn new(name: String, length: u32) -> Self {
        ReferenceSequence {
            name,
            length,
            index: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn length(&self) -> u32 {
        self.length
    }

    /// Returns the index of this reference. The index is shared between all queries.
    pub fn index(&self) -> Option<&Arc<RefIndex>> {
        self.index.as_ref()
    }

    pub(crate) fn set_index(&mut self, index: Option<Arc<RefIndex>>) {
        self.index = index;
    }
}

/// Converts reference ids into reference names, used when records are written as SAM text.
pub trait ReferenceLookup {
    /// Returns the name of the reference `ref_id` (0-based), or `None` if there is no such
    /// reference.
    fn reference_name(&self, ref_id: i32) -> Option<&str>;
}

/// BAM header: the SAM header text and the list of reference sequences.
#[derive(Clone, Debug)]
pub struct Header {
    text: String,
    references: Vec<ReferenceSequence>,
    name_to_id: HashMap<String, usize>,
}

impl Header {
    /// Creates a header from text and references. If several references have the same name,
    /// lookup by name returns the first of them.
    pub fn new(text: String, references: Vec<ReferenceSequence>) -> Header {
        let mut name_to_id = HashMap::with_capacity(references.len());
        for (i, reference) in references.iter().enumerate() {
            name_to_id.entry(reference.name.clone()).or_insert(i);
        }
        Header { text, references, name_to_id }
    }

    /// Parses the header from the start of a decompressed BAM stream.
    pub fn from_bam<R: Read>(stream: &mut R) -> Result<Header, Error> {
        let mut magic = [0_u8; 4];
        stream.read_exact(&mut magic)?;
        if magic != [b'B', b'A', b'M', 1] {
            return Err(Error::corrupted("Input is not in BAM format"));
        }

        let l_text = read_length(stream, "header text length")?;
        let text = read_bytes(stream, l_text, "header text")?;
        let text = String::from_utf8_lossy(trim_nul(&text)).into_owned();

        let n_ref = read_length(stream, "number of references")?;
        let mut references = Vec::new();
        references.try_reserve(n_ref.min(1 << 20)).map_err(|_| Error::OutOfMemory)?;
        for _ in 0..n_ref {
            let l_name = read_length(stream, "reference name length")?;
            let name = read_bytes(stream, l_name, "reference name")?;
            let name = String::from_utf8_lossy(trim_nul(&name)).into_owned();
            let length = stream.read_i32::<LittleEndian>()?;
            if length < 0 {
                return Err(Error::corrupted(format!("Reference {} has negative length ({})",
                    name, length)));
            }
            references.push(ReferenceSequence::new(name, length as u32));
        }
        Ok(Header::new(text, references))
    }

    /// SAM header text, stored in the BAM file. Can be empty.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Iterator over lines of the header text.
    pub fn lines(&self) -> std::str::Lines {
        self.text.lines()
    }

    pub fn references(&self) -> &[ReferenceSequence] {
        &self.references
    }

    pub(crate) fn references_mut(&mut self) -> &mut [ReferenceSequence] {
        &mut self.references
    }

    pub fn n_references(&self) -> usize {
        self.references.len()
    }

    /// Returns the id of the reference with `name`.
    pub fn reference_id(&self, name: &str) -> Option<usize> {
        self.name_to_id.get(name).cloned()
    }

    pub fn reference_by_name(&self, name: &str) -> Option<&ReferenceSequence> {
        self.reference_id(name).map(|i| &self.references[i])
    }

    pub fn reference_len(&self, ref_id: usize) -> Option<u32> {
        self.references.get(ref_id).map(ReferenceSequence::length)
    }
}

impl ReferenceLookup for Header {
    fn reference_name(&self, ref_id: i32) -> Option<&str> {
        if ref_id < 0 {
            None
        } else {
            self.references.get(ref_id as usize).map(ReferenceSequence::name)
        }
    }
}
