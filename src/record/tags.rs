//! Optional fields (tags) of a BAM record.

use std::io::{self, Write};

use byteorder::{LittleEndian, ByteOrder};

/// Enum that represents tag type for the cases when a tag contains integer.
///
/// Possible values are `I8` (`c`), `U8` (`C`), `I16` (`s`), `U16` (`S`), `I32` (`i`) and `U32` (`I`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IntegerType {
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
}

impl IntegerType {
    /// Returns a letter that represents the integer type. For example, `i8` corresponds to `c`.
    pub fn letter(self) -> u8 {
        use IntegerType::*;
        match self {
            I8 => b'c',
            U8 => b'C',
            I16 => b's',
            U16 => b'S',
            I32 => b'i',
            U32 => b'I',
        }
    }

    /// Returns IntegerType from a letter, such as `c`.
    pub fn from_letter(ty: u8) -> Option<Self> {
        use IntegerType::*;
        match ty {
            b'c' => Some(I8),
            b'C' => Some(U8),
            b's' => Some(I16),
            b'S' => Some(U16),
            b'i' => Some(I32),
            b'I' => Some(U32),
            _ => None,
        }
    }

    pub fn size_of(self) -> usize {
        use IntegerType::*;
        match self {
            I8 | U8 => 1,
            I16 | U16 => 2,
            I32 | U32 => 4,
        }
    }

    /// Parses a value from a slice of length `size_of()`.
    fn parse_raw(self, raw_tag: &[u8]) -> i64 {
        use IntegerType::*;
        match self {
            I8 => raw_tag[0] as i8 as i64,
            U8 => raw_tag[0] as i64,
            I16 => LittleEndian::read_i16(raw_tag) as i64,
            U16 => LittleEndian::read_u16(raw_tag) as i64,
            I32 => LittleEndian::read_i32(raw_tag) as i64,
            U32 => LittleEndian::read_u32(raw_tag) as i64,
        }
    }
}

/// Enum that represents tag type for `String` and `Hex` types (`Z` and `H`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StringType {
    String,
    Hex,
}

impl StringType {
    /// Returns a letter that represents the string type.
    pub fn letter(self) -> u8 {
        match self {
            StringType::String => b'Z',
            StringType::Hex => b'H',
        }
    }

    /// Returns StringType from letters `Z` and `H`.
    pub fn from_letter(ty: u8) -> Option<Self> {
        match ty {
            b'Z' => Some(StringType::String),
            b'H' => Some(StringType::Hex),
            _ => None,
        }
    }
}

/// Wrapper around raw integer array stored in a tag.
#[derive(Clone, Copy)]
pub struct IntArrayView<'a> {
    raw: &'a [u8],
    int_type: IntegerType,
}

impl<'a> IntArrayView<'a> {
    /// Get the type of the inner array.
    pub fn int_type(&self) -> IntegerType {
        self.int_type
    }

    pub fn len(&self) -> usize {
        self.raw.len() / self.int_type.size_of()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Returns an element at the `index`. Returns `i64` to include both `i32` and `u32`.
    pub fn at(&self, index: usize) -> i64 {
        let start = self.int_type.size_of() * index;
        let end = start + self.int_type.size_of();
        assert!(end <= self.raw.len(), "Index out of bounds: index {}, len {}",
            index, self.len());
        self.int_type.parse_raw(&self.raw[start..end])
    }

    /// Returns iterator over values (converted into `i64`).
    pub fn iter(&self) -> impl Iterator<Item = i64> + 'a {
        let int_type = self.int_type;
        self.raw.chunks(int_type.size_of()).map(move |chunk| int_type.parse_raw(chunk))
    }

    /// Returns raw array.
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }
}

/// Wrapper around raw float array stored in a tag.
#[derive(Clone, Copy)]
pub struct FloatArrayView<'a> {
    raw: &'a [u8],
}

impl<'a> FloatArrayView<'a> {
    pub fn len(&self) -> usize {
        self.raw.len() / 4
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    /// Returns an element at the `index`.
    pub fn at(&self, index: usize) -> f32 {
        let start = 4 * index;
        assert!(start + 4 <= self.raw.len(), "Index out of bounds: index {}, len {}",
            index, self.len());
        LittleEndian::read_f32(&self.raw[start..start + 4])
    }

    pub fn iter(&self) -> impl Iterator<Item = f32> + 'a {
        self.raw.chunks(4).map(LittleEndian::read_f32)
    }

    /// Returns raw array.
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }
}

/// Enum with all possible tag values.
///
/// # Variants
/// * `Char` - contains a one-byte character,
/// * `Int(i64, IntegerType)` - contains an integer in `i64` format to be able to store both
/// `i32` and `u32`. Enum [IntegerType](enum.IntegerType.html) specifies initial integer size.
/// * `Float` - contains a float,
/// * `String(&[u8], StringType)` - contains a string as bytes (without the terminating NUL)
/// and a [type](enum.StringType.html) of the string - `String` or `Hex`.
/// * `IntArray` - contains a [view](struct.IntArrayView.html) over an integer array, which
/// allows to get an element at a specific index and iterate over all values,
/// * `FloatArray` - contains a [view](struct.FloatArrayView.html) over a float array.
#[derive(Clone, Copy)]
pub enum TagValue<'a> {
    Char(u8),
    Int(i64, IntegerType),
    Float(f32),
    String(&'a [u8], StringType),
    IntArray(IntArrayView<'a>),
    FloatArray(FloatArrayView<'a>),
}

impl<'a> TagValue<'a> {
    /// Get [TagValue](enum.TagValue.html) from a raw representation.
    /// Expects `raw_tag` to have the length returned by `get_length` (without name and type).
    fn from_raw(ty: u8, raw_tag: &'a [u8]) -> TagValue<'a> {
        use TagValue::*;
        if let Some(int_type) = IntegerType::from_letter(ty) {
            return Int(int_type.parse_raw(raw_tag), int_type);
        }
        if let Some(str_type) = StringType::from_letter(ty) {
            return String(&raw_tag[..raw_tag.len() - 1], str_type);
        }

        match ty {
            b'A' => Char(raw_tag[0]),
            b'f' => Float(LittleEndian::read_f32(raw_tag)),
            _ => {
                debug_assert_eq!(ty, b'B');
                match IntegerType::from_letter(raw_tag[0]) {
                    Some(int_type) => IntArray(IntArrayView {
                        raw: &raw_tag[5..],
                        int_type,
                    }),
                    None => FloatArray(FloatArrayView {
                        raw: &raw_tag[5..],
                    }),
                }
            },
        }
    }

    /// Write the tag value in a sam format (`type:value`).
    ///
    /// Integer values of every width (`c`, `C`, `s`, `S`, `i`, `I`) are written with the SAM
    /// type `i`, the stored width is not kept. Array values keep their element type.
    pub fn write_sam<W: Write>(&self, f: &mut W) -> io::Result<()> {
        use TagValue::*;
        match self {
            Char(value) => f.write_all(&[b'A', b':', *value]),
            Int(value, _) => write!(f, "i:{}", *value),
            Float(value) => write!(f, "f:{}", *value),
            String(u8_slice, str_type) => {
                f.write_all(&[str_type.letter(), b':'])?;
                f.write_all(u8_slice)
            },
            IntArray(arr_view) => {
                f.write_all(&[b'B', b':', arr_view.int_type().letter()])?;
                for value in arr_view.iter() {
                    write!(f, ",{}", value)?;
                }
                Ok(())
            },
            FloatArray(arr_view) => {
                f.write_all(b"B:f")?;
                for value in arr_view.iter() {
                    write!(f, ",{}", value)?;
                }
                Ok(())
            },
        }
    }
}

/// Alias for a tag name.
pub type TagName = [u8; 2];

/// Get a size of type from letter (c -> 1), (i -> 4). Returns None for non int/float types.
fn tag_type_size(ty: u8) -> Option<usize> {
    match ty {
        b'c' | b'C' | b'A' => Some(1),
        b's' | b'S' => Some(2),
        b'i' | b'I' | b'f' => Some(4),
        _ => None,
    }
}

/// Get the length of the first tag (including name) in a raw tags array.
/// Returns `None` if the tag has an unknown type or does not fit into `raw_tags`.
///
/// For example, the function would return 7 for the raw representation of `"AA:i:10    BB:i:20"`.
fn get_length(raw_tags: &[u8]) -> Option<usize> {
    if raw_tags.len() < 4 {
        return None;
    }
    let len = match raw_tags[2] {
        b'Z' | b'H' => raw_tags[3..].iter().position(|&ch| ch == 0)? + 4,
        b'B' => {
            if raw_tags.len() < 8 {
                return None;
            }
            let arr_len = LittleEndian::read_i32(&raw_tags[4..8]);
            if arr_len < 0 {
                return None;
            }
            let elem_size = match raw_tags[3] {
                b'A' => return None,
                ty => tag_type_size(ty)?,
            };
            (arr_len as usize).checked_mul(elem_size)?.checked_add(8)?
        },
        ty => 3 + tag_type_size(ty)?,
    };
    if len > raw_tags.len() {
        None
    } else {
        Some(len)
    }
}

/// View over the optional fields of a record.
#[derive(Clone, Copy)]
pub struct TagViewer<'a> {
    raw: &'a [u8],
}

impl<'a> TagViewer<'a> {
    pub(crate) fn new(raw: &'a [u8]) -> Self {
        TagViewer { raw }
    }

    /// Returns raw tags.
    pub fn raw(&self) -> &'a [u8] {
        self.raw
    }

    /// Returns a value of a tag with `name`. Takes `O(n_tags)`.
    pub fn get(&self, name: &TagName) -> Option<TagValue<'a>> {
        self.iter().find(|(tag_name, _)| tag_name == name).map(|(_, value)| value)
    }

    /// Iterate over tuples `(name, tag_value)`, where `name: [u8; 2]` and `tag_value: TagValue`.
    ///
    /// Iteration stops at the first tag that cannot be decoded,
    /// see [TagIter::failed](struct.TagIter.html#method.failed).
    pub fn iter(&self) -> TagIter<'a> {
        TagIter {
            raw: self.raw,
            failed: false,
        }
    }

    /// Writes tags in a SAM format, each tag preceded by a tab.
    pub fn write_sam<W: Write>(&self, f: &mut W) -> io::Result<()> {
        for (name, value) in self.iter() {
            f.write_all(&[b'\t', name[0], name[1], b':'])?;
            value.write_sam(f)?;
        }
        Ok(())
    }
}

/// Iterator over tags.
pub struct TagIter<'a> {
    raw: &'a [u8],
    failed: bool,
}

impl<'a> TagIter<'a> {
    /// Returns `true` if the iteration stopped on a tag that could not be decoded,
    /// and not at the end of the record.
    pub fn failed(&self) -> bool {
        self.failed
    }
}

impl<'a> Iterator for TagIter<'a> {
    type Item = (TagName, TagValue<'a>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.raw.is_empty() {
            return None;
        }
        let tag_len = match get_length(self.raw) {
            Some(value) => value,
            None => {
                self.failed = true;
                self.raw = &[];
                return None;
            },
        };
        let (tag, rest) = self.raw.split_at(tag_len);
        self.raw = rest;
        Some(([tag[0], tag[1]], TagValue::from_raw(tag[2], &tag[3..])))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_tags() -> Vec<u8> {
        let mut raw = Vec::new();
        raw.extend_from_slice(b"XAAq");
        raw.extend_from_slice(b"NMc\xfe");
        raw.extend_from_slice(b"XSS\x10\x27");
        raw.extend_from_slice(b"XIi\xff\xff\xff\xff");
        raw.extend_from_slice(b"XFf\x00\x00\xc0\x3f");
        raw.extend_from_slice(b"RGZgroup1\x00");
        raw.extend_from_slice(b"XHH0AFF\x00");
        raw.extend_from_slice(b"XBBs\x03\x00\x00\x00\x01\x00\xfe\xff\x03\x00");
        raw.extend_from_slice(b"XGBf\x01\x00\x00\x00\x00\x00\x20\x40");
        raw
    }

    fn to_sam(tags: TagViewer) -> String {
        let mut buf = Vec::new();
        tags.write_sam(&mut buf).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn all_types() {
        let raw = raw_tags();
        let tags = TagViewer::new(&raw);
        assert_eq!(tags.iter().count(), 9);
        assert_eq!(to_sam(tags), "\tXA:A:q\tNM:i:-2\tXS:i:10000\tXI:i:-1\tXF:f:1.5\tRG:Z:group1\
            \tXH:H:0AFF\tXB:B:s,1,-2,3\tXG:B:f,2.5");

        match tags.get(b"XB") {
            Some(TagValue::IntArray(array)) => {
                assert_eq!(array.int_type(), IntegerType::I16);
                assert_eq!(array.len(), 3);
                assert_eq!(array.at(1), -2);
            },
            _ => panic!("XB should be an integer array"),
        }
        match tags.get(b"RG") {
            Some(TagValue::String(value, StringType::String)) => assert_eq!(value, b"group1"),
            _ => panic!("RG should be a string"),
        }
        assert!(tags.get(b"ZZ").is_none());
    }

    #[test]
    fn stops_on_failure() {
        let mut raw = raw_tags();
        raw.extend_from_slice(b"XQq\x01");
        let tags = TagViewer::new(&raw);
        let mut iter = tags.iter();
        assert_eq!(iter.by_ref().count(), 9);
        assert!(iter.failed());

        // Truncated array.
        let raw = b"NMc\x01XBBi\x05\x00\x00\x00\x01\x00\x00\x00";
        let mut iter = TagViewer::new(raw).iter();
        assert_eq!(iter.by_ref().count(), 1);
        assert!(iter.failed());

        // Missing NUL.
        let raw = b"RGZabc";
        let mut iter = TagViewer::new(raw).iter();
        assert!(iter.next().is_none());
        assert!(iter.failed());
    }

    #[test]
    fn empty_tags() {
        let mut iter = TagViewer::new(&[]).iter();
        assert!(iter.next().is_none());
        assert!(!iter.failed());
    }
}
