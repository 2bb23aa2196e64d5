use log::info;
use rayon::prelude::*;
use snafu::prelude::*;
use std::{
    backtrace::Backtrace,
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::utils::path::{ensure_dir, file_name, list_files_with_suffix};

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
    WriteTable {
        // leaf
        path: Box<PathBuf>,
        source: csv::Error,
        backtrace: Box<Option<Backtrace>>,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// Group `*.bed` files of all input directories by `ID_HAP`, the file name
/// up to its first `.`. Files keep input directory order, then name order.
pub fn group_bed_files(input_dirs: &[impl AsRef<Path>]) -> Result<BTreeMap<String, Vec<PathBuf>>> {
    let mut groups = BTreeMap::<String, Vec<PathBuf>>::new();
    for dir in input_dirs {
        for p in list_files_with_suffix(dir, ".bed")? {
            let name = file_name(&p);
            let id_hap = name.split('.').next().unwrap_or_default().to_owned();
            groups.entry(id_hap).or_default().push(p);
        }
    }
    Ok(groups)
}

/// Concatenate tables with a header line. The output header is the union of
/// the input columns in order of first appearance; cells of columns a file
/// lacks are left empty.
pub fn concat_tables(files: &[PathBuf], out: &Path) -> Result<usize> {
    let mut columns: Vec<String> = vec![];
    let mut tables = vec![];
    for p in files {
        let ctx = || ReadTableSnafu {
            path: Box::new(p.clone()),
        };
        let mut rdr = super::tsv_reader(p).with_context(|_| ctx())?;
        let header = rdr.headers().with_context(|_| ctx())?.clone();
        let idx: Vec<usize> = header
            .iter()
            .map(|h| match columns.iter().position(|c| c == h) {
                Some(i) => i,
                None => {
                    columns.push(h.to_owned());
                    columns.len() - 1
                }
            })
            .collect();
        let rows = rdr
            .records()
            .collect::<csv::Result<Vec<_>>>()
            .with_context(|_| ctx())?;
        tables.push((idx, rows));
    }

    let ctx = || WriteTableSnafu {
        path: Box::new(out.to_path_buf()),
    };
    let mut wtr = super::tsv_writer(out).with_context(|_| ctx())?;
    wtr.write_record(&columns).with_context(|_| ctx())?;
    let mut row = vec![""; columns.len()];
    let mut nrows = 0;
    for (idx, records) in tables.iter() {
        for rec in records {
            row.iter_mut().for_each(|x| *x = "");
            for (i, field) in idx.iter().zip(rec.iter()) {
                row[*i] = field;
            }
            wtr.write_record(&row).with_context(|_| ctx())?;
            nrows += 1;
        }
    }
    wtr.flush()
        .map_err(csv::Error::from)
        .with_context(|_| ctx())?;
    Ok(nrows)
}

/// Concatenate the BED files of every `ID_HAP` found in `input_dirs` into
/// `{outdir}/{ID_HAP}.bed`. Returns the written `ID_HAP`s, sorted.
pub fn collect_beds(input_dirs: &[impl AsRef<Path>], outdir: impl AsRef<Path>) -> Result<Vec<String>> {
    let outdir = outdir.as_ref();
    ensure_dir(outdir)?;
    let groups = group_bed_files(input_dirs)?;
    info!(
        "found {} haplotypes in {} directories",
        groups.len(),
        input_dirs.len()
    );

    let written = groups
        .par_iter()
        .map(|(id_hap, files)| {
            let out = outdir.join(format!("{id_hap}.bed"));
            let nrows = concat_tables(files, &out)?;
            info!("{id_hap}.bed: {} files, {nrows} rows", files.len());
            Ok(id_hap.clone())
        })
        .collect::<Result<Vec<_>>>()?;

    info!("Files saved to {}", outdir.display());
    Ok(written)
}
