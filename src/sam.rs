//! SAM text output of BAM records.

use std::io::{self, Write};
use std::io::ErrorKind::InvalidData;

use byteorder::WriteBytesExt;

use super::header::ReferenceLookup;
use super::record::{Record, CigarAlphabet};

fn reference_name<'a, L: ReferenceLookup + ?Sized>(lookup: &'a L, ref_id: i32)
        -> io::Result<&'a str> {
    lookup.reference_name(ref_id).ok_or_else(|| io::Error::new(InvalidData,
        format!("Record has a reference id not in the header ({})", ref_id)))
}

/// Writes a single SAM line (with a trailing new line) for `record`.
///
/// Reference name and position are written only for placed records (see
/// [is_self_mapped](../record/struct.Record.html#method.is_self_mapped)), otherwise the line
/// contains `*` and `0`. The same holds for the mate fields. Mate reference is always written
/// by name, `=` is never used. CIGAR operations are written one by one, as they are stored.
///
/// Returns `InvalidData` error if a placed record references an id missing in `lookup`.
pub fn write_sam<W, L>(f: &mut W, record: &Record, lookup: &L) -> io::Result<()>
where W: Write, L: ReferenceLookup + ?Sized,
{
    let name = record.name();
    if name.is_empty() {
        f.write_u8(b'*')?;
    } else {
        f.write_all(name)?;
    }
    write!(f, "\t{}\t", record.flag())?;

    if record.is_self_mapped() {
        write!(f, "{}\t{}\t", reference_name(lookup, record.ref_id())?, record.start() + 1)?;
    } else {
        f.write_all(b"*\t0\t")?;
    }
    write!(f, "{}\t", record.mapq())?;

    let cigar = record.cigar();
    if record.is_self_mapped() && !cigar.is_empty() {
        for (len, code) in cigar.iter() {
            write!(f, "{}{}", len, CigarAlphabet::Long.symbol(code) as char)?;
        }
    } else {
        f.write_u8(b'*')?;
    }

    if record.is_mate_mapped() {
        write!(f, "\t{}\t{}\t", reference_name(lookup, record.next_ref_id())?,
            record.next_start() + 1)?;
    } else {
        f.write_all(b"\t*\t0\t")?;
    }
    write!(f, "{}\t", record.template_len())?;

    if record.sequence().is_empty() {
        f.write_all(b"*\t*")?;
    } else {
        record.sequence().write_readable(f)?;
        f.write_u8(b'\t')?;
        record.qualities().write_readable(f)?;
    }
    record.tags().write_sam(f)?;
    writeln!(f)
}

/// Returns the SAM line for `record` without the trailing new line.
pub fn to_sam_string<L: ReferenceLookup + ?Sized>(record: &Record, lookup: &L)
        -> io::Result<String> {
    let mut buf = Vec::new();
    write_sam(&mut buf, record, lookup)?;
    buf.pop();
    String::from_utf8(buf).map_err(|e| io::Error::new(InvalidData, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::LittleEndian;
    use crate::record::{READ_PAIRED, READ_UNMAPPED, FIRST_IN_PAIR};

    struct Names(Vec<&'static str>);

    impl ReferenceLookup for Names {
        fn reference_name(&self, ref_id: i32) -> Option<&str> {
            if ref_id < 0 {
                return None;
            }
            self.0.get(ref_id as usize).cloned()
        }
    }

    /// Record with CIGAR `100M`, sequence `ACGT` and qualities `qual`.
    fn raw_record(ref_id: i32, pos: i32, flag: u16, next: (i32, i32), qual: [u8; 4],
            tags: &[u8]) -> Vec<u8> {
        let mut raw = Vec::new();
        raw.write_i32::<LittleEndian>(ref_id).unwrap();
        raw.write_i32::<LittleEndian>(pos).unwrap();
        raw.extend_from_slice(&[5, 60, 0, 0]);
        raw.write_u16::<LittleEndian>(1).unwrap();
        raw.write_u16::<LittleEndian>(flag).unwrap();
        raw.write_i32::<LittleEndian>(4).unwrap();
        raw.write_i32::<LittleEndian>(next.0).unwrap();
        raw.write_i32::<LittleEndian>(next.1).unwrap();
        raw.write_i32::<LittleEndian>(0).unwrap();
        raw.extend_from_slice(b"read\0");
        raw.write_u32::<LittleEndian>(100 << 4).unwrap();
        raw.extend_from_slice(&[0x12, 0x48]);
        raw.extend_from_slice(&qual);
        raw.extend_from_slice(tags);
        raw
    }

    #[test]
    fn mapped_record() {
        let names = Names(vec!["chr1", "chr2"]);
        let raw = raw_record(0, 1000, 0, (-1, -1), [30, 30, 40, 0], b"NMC\x02");
        let record = Record::new(&raw).unwrap();
        assert_eq!(to_sam_string(&record, &names).unwrap(),
            "read\t0\tchr1\t1001\t60\t100M\t*\t0\t0\tACGT\t??I!\tNM:i:2");

        let mut line = Vec::new();
        record.write_sam(&mut line, &names).unwrap();
        assert_eq!(line.last(), Some(&b'\n'));
    }

    #[test]
    fn mate_and_missing_qualities() {
        let names = Names(vec!["chr1", "chr2"]);
        let raw = raw_record(0, 9, READ_PAIRED | FIRST_IN_PAIR, (1, 19), [0xff; 4], b"");
        let record = Record::new(&raw).unwrap();
        assert_eq!(to_sam_string(&record, &names).unwrap(),
            "read\t65\tchr1\t10\t60\t100M\tchr2\t20\t0\tACGT\t*");
    }

    #[test]
    fn unplaced_record() {
        let names = Names(vec!["chr1"]);
        let raw = raw_record(0, 9, READ_UNMAPPED, (0, 5), [10; 4], b"");
        let record = Record::new(&raw).unwrap();
        assert_eq!(to_sam_string(&record, &names).unwrap(),
            "read\t4\t*\t0\t60\t*\t*\t0\t0\tACGT\t++++");
    }

    #[test]
    fn unknown_reference() {
        let names = Names(vec!["chr1"]);
        let raw = raw_record(3, 9, 0, (-1, -1), [10; 4], b"");
        let record = Record::new(&raw).unwrap();
        assert_eq!(to_sam_string(&record, &names).unwrap_err().kind(), InvalidData);
    }
}
