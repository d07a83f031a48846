use clap::{Parser, Subcommand};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use bamview::bam_reader::ModificationTime;
use bamview::{BamFile, Error, RecordReader, RecordBuf};

#[derive(Parser)]
#[command(name = "bamview")]
#[command(about = "Prints BAM records as SAM text, optionally restricted to a region", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print records in SAM format
    View {
        /// Input BAM file
        #[arg(value_name = "IN.BAM")]
        bam: PathBuf,

        /// Region NAME, NAME:START or NAME:START-END (1-based, inclusive); requires an index
        #[arg(value_name = "REGION")]
        region: Option<String>,

        /// BAI index (default: IN.BAM.bai)
        #[arg(short = 'i', long, value_name = "IN.BAI")]
        bai: Option<PathBuf>,

        /// Print the header text before the records
        #[arg(short = 'H', long)]
        header: bool,

        /// Size of a single read from the BAM file, in bytes
        #[arg(long, value_name = "INT", default_value = "1048576")]
        io_chunk_size: usize,
    },

    /// Print reference names, lengths and mapped/unmapped counts from the index
    Idxstats {
        /// Input BAM file
        #[arg(value_name = "IN.BAM")]
        bam: PathBuf,

        /// BAI index (default: IN.BAM.bai)
        #[arg(short = 'i', long, value_name = "IN.BAI")]
        bai: Option<PathBuf>,
    },
}

/// Parses `NAME[:START[-END]]` into a name and a 0-based half-open interval.
/// A region that is a reference name as a whole covers the entire reference, even if the
/// name contains `:`.
fn parse_region<F: Fn(&str) -> bool>(region: &str, is_reference: F)
        -> Result<(String, u32, u32), String> {
    if is_reference(region) {
        return Ok((region.to_string(), 0, std::u32::MAX));
    }
    let (name, range) = match region.rfind(':') {
        Some(pos) => (&region[..pos], Some(&region[pos + 1..])),
        None => (region, None),
    };
    let range = match range {
        None => return Ok((name.to_string(), 0, std::u32::MAX)),
        Some(range) => range.replace(',', ""),
    };
    let mut parts = range.splitn(2, '-');
    let start = parts.next().unwrap_or("").parse::<u32>()
        .map_err(|_| format!("Invalid region start: {}", region))?;
    let end = match parts.next() {
        Some(end) => end.parse::<u32>().map_err(|_| format!("Invalid region end: {}", region))?,
        None => std::u32::MAX,
    };
    if start == 0 || end < start {
        return Err(format!("Invalid region: {}", region));
    }
    Ok((name.to_string(), start - 1, end))
}

fn open(bam: &Path, bai: Option<PathBuf>, io_chunk_size: usize)
        -> Result<BamFile<std::fs::File>, Error> {
    let mut builder = BamFile::build();
    builder.modification_time(ModificationTime::Warn).io_chunk_size(io_chunk_size);
    if let Some(bai) = bai {
        builder.bai_path(bai);
    }
    builder.from_path(bam)
}

fn view(bam: PathBuf, region: Option<String>, bai: Option<PathBuf>, print_header: bool,
        io_chunk_size: usize) -> Result<(), Error> {
    let mut bam_file = open(&bam, bai, io_chunk_size)?;
    let header = bam_file.header().clone();
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    if print_header {
        out.write_all(header.text().as_bytes())?;
    }

    let mut source = match region {
        Some(region) => {
            let (name, start, end) = parse_region(&region,
                |name| header.reference_id(name).is_some()).map_err(Error::InvalidInput)?;
            if !bam_file.has_index() {
                log::warn!("{} has no usable index, region {} is empty", bam.display(), region);
            }
            bam_file.query_range(&name, start, end)?
        },
        None => bam_file.records(),
    };
    let mut record = RecordBuf::new();
    loop {
        match source.read_into(&mut record) {
            Ok(()) => {},
            Err(Error::NoMoreRecords) => break,
            Err(e) => return Err(e),
        }
        record.as_record().write_sam(&mut out, &header)?;
    }
    out.flush()?;
    Ok(())
}

fn idxstats(bam: PathBuf, bai: Option<PathBuf>) -> Result<(), Error> {
    let bam_file = open(&bam, bai, bamview::bgzip::DEFAULT_IO_CHUNK_SIZE)?;
    if !bam_file.has_index() {
        return Err(Error::InvalidInput(format!("{} has no usable index", bam.display())));
    }
    let stdout = io::stdout();
    let mut out = BufWriter::new(stdout.lock());
    for reference in bam_file.references() {
        let (mapped, unmapped) = reference.index()
            .and_then(|index| index.metadata())
            .map(|metadata| (metadata.n_mapped, metadata.n_unmapped))
            .unwrap_or((0, 0));
        writeln!(out, "{}\t{}\t{}\t{}", reference.name(), reference.length(), mapped, unmapped)?;
    }
    writeln!(out, "*\t0\t0\t{}", bam_file.n_unplaced().unwrap_or(0))?;
    out.flush()?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Warn)
        .parse_default_env()
        .format_timestamp(None)
        .format_target(false)
        .init();

    let res = match cli.command {
        Commands::View { bam, region, bai, header, io_chunk_size } =>
            view(bam, region, bai, header, io_chunk_size),
        Commands::Idxstats { bam, bai } => idxstats(bam, bai),
    };
    if let Err(e) = res {
        log::error!("{}", e);
        std::process::exit(1);
    }
}
