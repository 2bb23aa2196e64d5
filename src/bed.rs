//! Local ancestry segment tables ("BED" files): tab separated, with a header
//! line, one file per haplotype.
pub mod collect;
pub mod global;

use std::{fs::File, path::Path};

pub(crate) fn tsv_reader(p: &Path) -> csv::Result<csv::Reader<File>> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(p)
}

pub(crate) fn tsv_writer(p: &Path) -> csv::Result<csv::Writer<File>> {
    csv::WriterBuilder::new().delimiter(b'\t').from_path(p)
}
