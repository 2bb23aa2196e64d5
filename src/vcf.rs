pub mod mask;
pub mod region;
pub mod split;

use ahash::{AHashSet, HashMap, HashMapExt};
use bstr::ByteSlice;
use log::debug;
use rust_htslib::bcf::{self, Read};
use snafu::prelude::*;
use std::{
    backtrace::Backtrace,
    path::{Path, PathBuf},
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("cannot open {}", path.display()))]
    Open {
        // leaf
        path: Box<PathBuf>,
        source: rust_htslib::errors::Error,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("cannot read record {irec} of {}", path.display()))]
    ReadRecord {
        // leaf
        path: Box<PathBuf>,
        irec: usize,
        source: rust_htslib::errors::Error,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("cannot write record to {}", path.display()))]
    WriteRecord {
        // leaf
        path: Box<PathBuf>,
        source: rust_htslib::errors::Error,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("{} has no variant records", path.display()))]
    EmptyVcf {
        // leaf
        path: Box<PathBuf>,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display(
        "there should be one and only one chromosome in {}, found {chroms}",
        path.display()
    ))]
    MultipleChromosomes {
        // leaf
        path: Box<PathBuf>,
        chroms: Box<String>,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("record {irec} has no valid contig"))]
    MissingContig {
        // leaf
        irec: usize,
        backtrace: Box<Option<Backtrace>>,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// Contig and sorted 1-based positions of a single-chromosome VCF
#[derive(Debug, Clone)]
pub struct VcfPositions {
    pub chrom: String,
    pub positions: Vec<u64>,
}

impl VcfPositions {
    pub fn min(&self) -> u64 {
        self.positions.first().copied().unwrap_or_default()
    }
    pub fn max(&self) -> u64 {
        self.positions.last().copied().unwrap_or_default()
    }
}

pub fn open_reader(p: impl AsRef<Path>) -> Result<bcf::Reader> {
    let path = p.as_ref();
    bcf::Reader::from_path(path).context(OpenSnafu {
        path: Box::new(path.to_path_buf()),
    })
}

/// Create a writer whose format follows the output file name: `.bcf` gives
/// compressed BCF, `.gz`/`.bgz` gives bgzipped VCF, anything else plain VCF.
pub fn create_writer(p: impl AsRef<Path>, header: &bcf::Header) -> Result<bcf::Writer> {
    let path = p.as_ref();
    let (format, uncompressed) = output_format(path);
    bcf::Writer::from_path(path, header, uncompressed, format).context(OpenSnafu {
        path: Box::new(path.to_path_buf()),
    })
}

/// htslib output format and whether it is written uncompressed
pub fn output_format(p: &Path) -> (bcf::Format, bool) {
    let name = crate::utils::path::file_name(p);
    if name.ends_with(".bcf") {
        (bcf::Format::Bcf, false)
    } else if name.ends_with(".gz") || name.ends_with(".bgz") {
        (bcf::Format::Vcf, false)
    } else {
        (bcf::Format::Vcf, true)
    }
}

/// Sample names of a VCF header, in column order
pub fn sample_names(header: &bcf::header::HeaderView) -> Vec<String> {
    header
        .samples()
        .into_iter()
        .map(|x| x.to_str_lossy().into_owned())
        .collect()
}

/// Contig name of a record, looked up through a cached rid -> name map
pub(crate) fn contig_name<'a>(
    header: &bcf::header::HeaderView,
    cache: &'a mut HashMap<u32, String>,
    rec: &bcf::Record,
    irec: usize,
) -> Result<&'a str> {
    let rid = rec.rid().context(MissingContigSnafu { irec })?;
    if !cache.contains_key(&rid) {
        let name = header
            .rid2name(rid)
            .ok()
            .context(MissingContigSnafu { irec })?
            .to_str_lossy()
            .into_owned();
        cache.insert(rid, name);
    }
    cache
        .get(&rid)
        .map(|x| x.as_str())
        .context(MissingContigSnafu { irec })
}

/// Read the positions of all records of a VCF holding a single chromosome
pub fn read_positions(p: impl AsRef<Path>) -> Result<VcfPositions> {
    let path = p.as_ref();
    let mut reader = open_reader(path)?;
    let header = reader.header().clone();
    let mut names = HashMap::new();
    let mut chroms = Vec::<String>::new();
    let mut seen = AHashSet::new();
    let mut positions = vec![];
    for (irec, r) in reader.records().enumerate() {
        let rec = r.context(ReadRecordSnafu {
            path: Box::new(path.to_path_buf()),
            irec,
        })?;
        let chrom = contig_name(&header, &mut names, &rec, irec)?;
        if !seen.contains(chrom) {
            seen.insert(chrom.to_owned());
            chroms.push(chrom.to_owned());
        }
        positions.push(rec.pos() as u64 + 1);
    }
    ensure!(
        !positions.is_empty(),
        EmptyVcfSnafu {
            path: Box::new(path.to_path_buf())
        }
    );
    ensure!(
        chroms.len() == 1,
        MultipleChromosomesSnafu {
            path: Box::new(path.to_path_buf()),
            chroms: Box::new(chroms.join(",")),
        }
    );
    positions.sort_unstable();
    debug!(
        "{}: {} variants on {} ({}-{})",
        path.display(),
        positions.len(),
        chroms[0],
        positions[0],
        positions[positions.len() - 1]
    );
    Ok(VcfPositions {
        chrom: chroms.swap_remove(0),
        positions,
    })
}

#[cfg(test)]
pub(crate) mod testdata {
    use std::path::{Path, PathBuf};

    /// Write a small VCF; `samples` and the GT columns of `rows` are tab
    /// separated.
    pub fn write_vcf(dir: &Path, name: &str, samples: &str, rows: &[(&str, u64, &str)]) -> PathBuf {
        let mut s = String::new();
        s.push_str("##fileformat=VCFv4.2\n");
        for chrom in ["1", "2", "22"] {
            s.push_str(&format!("##contig=<ID={chrom},length=100000000>\n"));
        }
        s.push_str("##FORMAT=<ID=GT,Number=1,Type=String,Description=\"Genotype\">\n");
        s.push_str(&format!(
            "#CHROM\tPOS\tID\tREF\tALT\tQUAL\tFILTER\tINFO\tFORMAT\t{samples}\n"
        ));
        for (chrom, pos, gts) in rows {
            s.push_str(&format!("{chrom}\t{pos}\t.\tA\tG\t.\tPASS\t.\tGT\t{gts}\n"));
        }
        let p = dir.join(name);
        std::fs::write(&p, s).unwrap();
        p
    }
}
