use ahash::{HashMap, HashMapExt};
use itertools::Itertools;
use log::info;
use snafu::prelude::*;
use std::{
    backtrace::Backtrace,
    path::{Path, PathBuf},
};

use crate::utils::path::ensure_dir;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(transparent)]
    Path {
        // non leaf
        #[snafu(backtrace)]
        source: crate::utils::path::Error,
    },
    #[snafu(display("cannot read {}", path.display()))]
    ReadTable {
        // leaf
        path: Box<PathBuf>,
        source: csv::Error,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("cannot write {}", path.display()))]
    WriteFile {
        // leaf
        path: Box<PathBuf>,
        source: std::io::Error,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("column {column} not found in {}", path.display()))]
    MissingColumn {
        // leaf
        path: Box<PathBuf>,
        column: Box<String>,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("line {line} of {} has no sample ID in its 2nd column", path.display()))]
    NoSampleId {
        // leaf
        path: Box<PathBuf>,
        line: usize,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("{n} samples in sample_order are missing in popinfo: {samples}"))]
    MissingSamples {
        // leaf
        n: usize,
        samples: Box<String>,
        backtrace: Box<Option<Backtrace>>,
    },
}

type Result<T> = std::result::Result<T, Error>;

pub const IND2POP_FILE: &str = "ind2pop.txt";
pub const POP_ORDER_FILE: &str = "pop_order.txt";

/// Sample IDs from the 2nd column of a space separated file without header,
/// such as a PLINK `.fam` file.
pub fn read_sample_order(p: impl AsRef<Path>) -> Result<Vec<String>> {
    let p = p.as_ref();
    let ctx = || ReadTableSnafu {
        path: Box::new(p.to_path_buf()),
    };
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b' ')
        .has_headers(false)
        .flexible(true)
        .from_path(p)
        .with_context(|_| ctx())?;
    let mut samples = vec![];
    for (i, rec) in rdr.records().enumerate() {
        let rec = rec.with_context(|_| ctx())?;
        let id = rec.get(1).context(NoSampleIdSnafu {
            path: Box::new(p.to_path_buf()),
            line: i + 1,
        })?;
        samples.push(id.to_owned());
    }
    Ok(samples)
}

/// Map sample ID to covariate value from a CSV file with header. The first
/// row of a duplicated sample ID wins.
pub fn read_popinfo(
    p: impl AsRef<Path>,
    sample_id_col: &str,
    covariate: &str,
) -> Result<HashMap<String, String>> {
    let p = p.as_ref();
    let ctx = || ReadTableSnafu {
        path: Box::new(p.to_path_buf()),
    };
    let mut rdr = csv::Reader::from_path(p).with_context(|_| ctx())?;
    let header = rdr.headers().with_context(|_| ctx())?;
    let col = |name: &str| {
        header
            .iter()
            .position(|h| h == name)
            .with_context(|| MissingColumnSnafu {
                path: Box::new(p.to_path_buf()),
                column: Box::new(name.to_owned()),
            })
    };
    let (id_col, cov_col) = (col(sample_id_col)?, col(covariate)?);

    let mut map = HashMap::new();
    for rec in rdr.records() {
        let rec = rec.with_context(|_| ctx())?;
        let id = rec.get(id_col).unwrap_or_default();
        let value = rec.get(cov_col).unwrap_or_default();
        map.entry(id.to_owned()).or_insert_with(|| value.to_owned());
    }
    Ok(map)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PopMap {
    /// covariate value of each sample, in sample order
    pub ind2pop: Vec<String>,
    /// unique covariate values, in order of first appearance
    pub pop_order: Vec<String>,
}

/// Covariate values for `samples`, with spaces replaced by `_`
pub fn map_samples(samples: &[String], popinfo: &HashMap<String, String>) -> Result<PopMap> {
    let missing: Vec<&str> = samples
        .iter()
        .filter(|s| !popinfo.contains_key(s.as_str()))
        .map(|s| s.as_str())
        .collect();
    ensure!(
        missing.is_empty(),
        MissingSamplesSnafu {
            n: missing.len(),
            samples: Box::new(missing.iter().take(10).join(",")),
        }
    );
    let ind2pop: Vec<String> = samples
        .iter()
        .filter_map(|s| popinfo.get(s.as_str()))
        .map(|v| v.replace(' ', "_"))
        .collect();
    let pop_order = ind2pop.iter().unique().cloned().collect();
    Ok(PopMap { ind2pop, pop_order })
}

fn write_lines(p: &Path, lines: &[String]) -> Result<()> {
    let mut s = String::new();
    for l in lines {
        s.push_str(l);
        s.push('\n');
    }
    std::fs::write(p, s).context(WriteFileSnafu {
        path: Box::new(p.to_path_buf()),
    })
}

/// Write `ind2pop.txt` and `pop_order.txt` to `outdir` for the samples of
/// `sample_order` labelled by the `covariate` column of `popinfo`.
pub fn ind2pop(
    popinfo: impl AsRef<Path>,
    sample_order: impl AsRef<Path>,
    covariate: &str,
    sample_id_col: &str,
    outdir: impl AsRef<Path>,
) -> Result<PopMap> {
    let samples = read_sample_order(sample_order)?;
    let info = read_popinfo(popinfo, sample_id_col, covariate)?;
    let popmap = map_samples(&samples, &info)?;

    let outdir = outdir.as_ref();
    ensure_dir(outdir)?;
    let p = outdir.join(IND2POP_FILE);
    write_lines(&p, &popmap.ind2pop)?;
    info!("ind2pop file successfully created: {}", p.display());
    let p = outdir.join(POP_ORDER_FILE);
    write_lines(&p, &popmap.pop_order)?;
    info!("Population order file successfully created: {}", p.display());
    Ok(popmap)
}
