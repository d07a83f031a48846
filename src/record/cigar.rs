//! CIGAR operations and their text representation.

use std::io::{self, Write};

use byteorder::{LittleEndian, ByteOrder};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    AlnMatch = 0,
    Insertion = 1,
    Deletion = 2,
    Skip = 3,
    Soft = 4,
    Hard = 5,
    Padding = 6,
    SeqMatch = 7,
    SeqMismatch = 8,
}

impl Operation {
    /// Converts an operation code (lower 4 bits of a raw CIGAR value). Codes 9-15 are not
    /// defined and return `None`.
    pub fn from_code(code: u32) -> Option<Operation> {
        use Operation::*;
        match code {
            0 => Some(AlnMatch),
            1 => Some(Insertion),
            2 => Some(Deletion),
            3 => Some(Skip),
            4 => Some(Soft),
            5 => Some(Hard),
            6 => Some(Padding),
            7 => Some(SeqMatch),
            8 => Some(SeqMismatch),
            _ => None,
        }
    }

    pub fn to_char(self) -> u8 {
        CigarAlphabet::Long.symbol(self as u32)
    }

    /// Returns `true` for operations that consume the reference: `M`, `D`, `N`, `=` and `X`.
    pub fn consumes_ref(self) -> bool {
        use Operation::*;
        match self {
            AlnMatch | Deletion | Skip | SeqMatch | SeqMismatch => true,
            _ => false,
        }
    }

    /// Returns `true` for soft and hard clipping.
    pub fn is_clipping(self) -> bool {
        self == Operation::Soft || self == Operation::Hard
    }
}

/// Letters used to write CIGAR operations.
///
/// # Variants
/// * `Long` - `MIDNSHP=X`, sequence match and mismatch are written as `=` and `X`,
/// * `Short` - `MIDNSHPMM`, sequence match and mismatch are written as `M`, and are merged
/// with neighbouring `M` operations.
///
/// Undefined operation codes are written as `?`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CigarAlphabet {
    Long,
    Short,
}

impl CigarAlphabet {
    fn symbols(self) -> &'static [u8; 16] {
        match self {
            CigarAlphabet::Long => b"MIDNSHP=X???????",
            CigarAlphabet::Short => b"MIDNSHPMM???????",
        }
    }

    /// Returns a letter for an operation code (lower 4 bits are used).
    pub fn symbol(self, code: u32) -> u8 {
        self.symbols()[(code & 0xf) as usize]
    }
}

/// View over a raw CIGAR: `n` little-endian `u32` values, each storing `len << 4 | op`.
#[derive(Clone, Copy)]
pub struct Cigar<'a> {
    raw: &'a [u8],
}

impl<'a> Cigar<'a> {
    pub(crate) fn new(raw: &'a [u8]) -> Self {
        debug_assert!(raw.len() % 4 == 0);
        Cigar { raw }
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.raw.len() / 4
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Returns a raw value at `index`.
    pub fn raw_at(&self, index: usize) -> u32 {
        LittleEndian::read_u32(&self.raw[4 * index..4 * index + 4])
    }

    /// Returns a pair `(length, operation code)` at `index`.
    pub fn at(&self, index: usize) -> (u32, u32) {
        let value = self.raw_at(index);
        (value >> 4, value & 0xf)
    }

    /// Iterator over pairs `(length, operation code)`.
    pub fn iter(&self) -> impl Iterator<Item = (u32, u32)> + 'a {
        self.raw.chunks(4).map(|chunk| {
            let value = LittleEndian::read_u32(chunk);
            (value >> 4, value & 0xf)
        })
    }

    /// Iterator over pairs `(length, operation)`. Undefined operations are yielded as `None`.
    pub fn operations(&self) -> impl Iterator<Item = (u32, Option<Operation>)> + 'a {
        self.iter().map(|(len, code)| (len, Operation::from_code(code)))
    }

    /// Number of reference positions covered by the alignment: sum of the lengths of
    /// `M`, `D`, `N`, `=` and `X` operations.
    pub fn ref_span(&self) -> u32 {
        self.operations()
            .filter(|(_, op)| op.map(Operation::consumes_ref).unwrap_or(false))
            .fold(0_u32, |acc, (len, _)| acc.wrapping_add(len))
    }

    /// Returns text tokens `(length, letter)`, where neighbouring operations with the same
    /// letter are merged. If `clipped` is true, all leading clipping tokens (`S` and `H`) are
    /// removed, and the last token is removed if it is clipping: `2H3S10M4S2H` gives `10M4S`.
    pub fn tokens(&self, alphabet: CigarAlphabet, clipped: bool) -> Vec<(u64, u8)> {
        let mut tokens: Vec<(u64, u8)> = Vec::with_capacity(self.len());
        for (len, code) in self.iter() {
            let symbol = alphabet.symbol(code);
            if let Some(last) = tokens.last_mut() {
                if last.1 == symbol {
                    last.0 += len as u64;
                    continue;
                }
            }
            tokens.push((len as u64, symbol));
        }
        if clipped {
            let is_clip = |token: &(u64, u8)| token.1 == b'S' || token.1 == b'H';
            let start = tokens.iter().position(|token| !is_clip(token)).unwrap_or(tokens.len());
            if tokens.len() > start && tokens.last().map(is_clip).unwrap_or(false) {
                tokens.pop();
            }
            tokens.drain(..start);
        }
        tokens
    }

    /// Writes CIGAR in a human readable format. Writes nothing if the CIGAR is empty.
    pub fn write_readable<W: Write>(&self, f: &mut W, alphabet: CigarAlphabet, clipped: bool)
            -> io::Result<()> {
        for (len, symbol) in self.tokens(alphabet, clipped) {
            write!(f, "{}{}", len, symbol as char)?;
        }
        Ok(())
    }

    /// Returns CIGAR in a human readable format.
    pub fn to_string_with(&self, alphabet: CigarAlphabet, clipped: bool) -> String {
        self.tokens(alphabet, clipped).iter()
            .map(|(len, symbol)| format!("{}{}", len, *symbol as char))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::WriteBytesExt;

    fn raw_cigar(text: &str) -> Vec<u8> {
        let mut raw = Vec::new();
        let mut len = 0;
        for ch in text.bytes() {
            if ch.is_ascii_digit() {
                len = len * 10 + (ch - b'0') as u32;
            } else {
                let code = b"MIDNSHP=X".iter().position(|&op| op == ch).unwrap() as u32;
                raw.write_u32::<LittleEndian>(len << 4 | code).unwrap();
                len = 0;
            }
        }
        raw
    }

    #[test]
    fn ref_span() {
        let raw = raw_cigar("5S10M2I3D4N6=7X8P9H");
        let cigar = Cigar::new(&raw);
        assert_eq!(cigar.len(), 9);
        assert_eq!(cigar.ref_span(), 10 + 3 + 4 + 6 + 7);
        assert_eq!(Cigar::new(&[]).ref_span(), 0);
    }

    #[test]
    fn merged_text() {
        let raw = raw_cigar("3M2M1I4=5X6M");
        let cigar = Cigar::new(&raw);
        assert_eq!(cigar.to_string_with(CigarAlphabet::Long, false), "5M1I4=5X6M");
        assert_eq!(cigar.to_string_with(CigarAlphabet::Short, false), "5M1I15M");

        let short_len: u64 = cigar.tokens(CigarAlphabet::Short, false).iter()
            .filter(|(_, symbol)| *symbol == b'M').map(|(len, _)| len).sum();
        assert_eq!(short_len, 3 + 2 + 4 + 5 + 6);
    }

    #[test]
    fn clipped_text() {
        let raw = raw_cigar("2H3S10M1D5M4S");
        let cigar = Cigar::new(&raw);
        assert_eq!(cigar.to_string_with(CigarAlphabet::Long, false), "2H3S10M1D5M4S");
        assert_eq!(cigar.to_string_with(CigarAlphabet::Long, true), "10M1D5M");

        let raw = raw_cigar("10M4S2H");
        assert_eq!(Cigar::new(&raw).to_string_with(CigarAlphabet::Long, true), "10M4S");
        let raw = raw_cigar("5H1S1S10M");
        assert_eq!(Cigar::new(&raw).to_string_with(CigarAlphabet::Long, true), "10M");
        let raw = raw_cigar("5S");
        assert_eq!(Cigar::new(&raw).to_string_with(CigarAlphabet::Long, true), "");
        let raw = raw_cigar("5S3H");
        assert_eq!(Cigar::new(&raw).to_string_with(CigarAlphabet::Long, true), "");
        let raw = raw_cigar("5S3S2M");
        assert_eq!(Cigar::new(&raw).to_string_with(CigarAlphabet::Short, false), "8S2M");
    }

    #[test]
    fn undefined_operations() {
        let mut raw = raw_cigar("3M");
        raw.write_u32::<LittleEndian>(4 << 4 | 12).unwrap();
        raw.write_u32::<LittleEndian>(1 << 4 | 15).unwrap();
        let cigar = Cigar::new(&raw);
        assert_eq!(cigar.to_string_with(CigarAlphabet::Long, false), "3M5?");
        assert_eq!(cigar.operations().filter(|(_, op)| op.is_none()).count(), 2);
        assert_eq!(cigar.ref_span(), 3);
    }
}
