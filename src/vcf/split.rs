use log::info;
use rust_htslib::bcf::{self, Read};
use snafu::prelude::*;
use std::{
    backtrace::Backtrace,
    path::{Path, PathBuf},
};

use super::region::Region;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(transparent)]
    Vcf {
        // non leaf
        #[snafu(backtrace)]
        source: super::Error,
    },
    #[snafu(display("number of splits must be greater than 0"))]
    ZeroSplits {
        // leaf
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("VCF file has fewer variants ({n_variants}) than requested splits ({n_split})"))]
    TooFewVariants {
        // leaf
        n_variants: usize,
        n_split: usize,
        backtrace: Box<Option<Backtrace>>,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// Partition sorted positions into `n_split` chunks whose sizes differ by at
/// most one (the first `len % n_split` chunks hold the extra position) and
/// return the region spanned by each chunk.
pub fn split_positions(positions: &[u64], n_split: usize, chrom: &str) -> Result<Vec<Region>> {
    ensure!(n_split > 0, ZeroSplitsSnafu);
    ensure!(
        positions.len() >= n_split,
        TooFewVariantsSnafu {
            n_variants: positions.len(),
            n_split,
        }
    );
    let (q, r) = (positions.len() / n_split, positions.len() % n_split);
    let mut regions = Vec::with_capacity(n_split);
    let mut start = 0;
    for i in 0..n_split {
        let size = q + usize::from(i < r);
        let chunk = &positions[start..start + size];
        regions.push(Region::new(chrom, chunk[0], chunk[size - 1]));
        start += size;
    }
    Ok(regions)
}

/// Output file of the `i`-th (0-based) split: `{prefix}_{i+1}.vcf.gz`
pub fn split_output(prefix: &Path, i: usize) -> PathBuf {
    let mut name = prefix.as_os_str().to_owned();
    name.push(format!("_{}.vcf.gz", i + 1));
    PathBuf::from(name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitOutput {
    pub region: Region,
    pub path: PathBuf,
    pub records: usize,
}

/// Split a single-chromosome VCF into `n_split` bgzipped VCF files holding
/// about the same number of variants.
///
/// A record goes to every region whose range contains its position, so
/// records sharing a position that straddles two chunks land in both files.
pub fn split_vcf(
    vcf: impl AsRef<Path>,
    out_prefix: impl AsRef<Path>,
    n_split: usize,
) -> Result<Vec<SplitOutput>> {
    let vcf = vcf.as_ref();
    let positions = super::read_positions(vcf)?;
    let regions = split_positions(&positions.positions, n_split, &positions.chrom)?;

    let mut reader = super::open_reader(vcf)?;
    let header = bcf::Header::from_template(reader.header());
    let mut outputs: Vec<SplitOutput> = regions
        .into_iter()
        .enumerate()
        .map(|(i, region)| SplitOutput {
            path: split_output(out_prefix.as_ref(), i),
            region,
            records: 0,
        })
        .collect();

    // regions are sorted and only touch at shared positions, so at most two
    // writers are open at a time
    let mut active: Vec<(usize, bcf::Writer)> = Vec::with_capacity(2);
    let mut next = 0;
    for (irec, r) in reader.records().enumerate() {
        let mut rec = r.context(super::ReadRecordSnafu {
            path: Box::new(vcf.to_path_buf()),
            irec,
        })?;
        let pos = rec.pos() as u64 + 1;
        // dropping a writer finishes its file
        active.retain(|(i, _)| outputs[*i].region.end >= pos);
        while next < outputs.len() && outputs[next].region.start <= pos {
            let o = &outputs[next];
            info!("Writing {} to {}...", o.region, o.path.display());
            let w = super::create_writer(&o.path, &header)?;
            if o.region.end >= pos {
                active.push((next, w));
            }
            next += 1;
        }
        for (i, w) in active.iter_mut() {
            let o = &mut outputs[*i];
            w.translate(&mut rec);
            w.write(&rec).context(super::WriteRecordSnafu {
                path: Box::new(o.path.clone()),
            })?;
            o.records += 1;
        }
    }
    drop(active);
    // regions no record reached still get their (empty) file
    for o in outputs[next..].iter() {
        super::create_writer(&o.path, &header)?;
    }

    for o in outputs.iter() {
        info!("{}: {} records ({})", o.path.display(), o.records, o.region);
    }
    Ok(outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcf::testdata::write_vcf;

    #[test]
    fn test_split_positions() {
        let pos: Vec<u64> = (1..=10).map(|x| x * 100).collect();
        let r = split_positions(&pos, 3, "22").unwrap();
        let s: Vec<String> = r.iter().map(|x| x.to_string()).collect();
        assert_eq!(s, vec!["22:100-400", "22:500-700", "22:800-1000"]);

        let r = split_positions(&pos, 10, "22").unwrap();
        assert_eq!(r[9], Region::new("22", 1000, 1000));

        let r = split_positions(&pos, 1, "chr1").unwrap();
        assert_eq!(r, vec![Region::new("chr1", 100, 1000)]);
    }

    #[test]
    fn test_split_positions_errors() {
        let pos = [1u64, 2, 3];
        assert!(matches!(
            split_positions(&pos, 0, "1"),
            Err(Error::ZeroSplits { .. })
        ));
        assert!(matches!(
            split_positions(&pos, 4, "1"),
            Err(Error::TooFewVariants {
                n_variants: 3,
                n_split: 4,
                ..
            })
        ));
    }

    #[test]
    fn test_split_output() {
        assert_eq!(
            split_output(Path::new("out/chr22"), 0),
            Path::new("out/chr22_1.vcf.gz")
        );
        assert_eq!(
            split_output(Path::new("chunk.v2"), 9),
            Path::new("chunk.v2_10.vcf.gz")
        );
    }

    fn positions_in(p: &Path) -> Vec<u64> {
        let mut reader = bcf::Reader::from_path(p).unwrap();
        reader
            .records()
            .map(|r| r.unwrap().pos() as u64 + 1)
            .collect()
    }

    #[test]
    fn test_split_vcf() {
        let tmp = tempfile::TempDir::new().unwrap();
        let rows: Vec<(&str, u64, &str)> = [10u64, 20, 30, 40, 50]
            .iter()
            .map(|p| ("22", *p, "0|1"))
            .collect();
        let vcf = write_vcf(tmp.path(), "in.vcf", "S1", &rows);
        let prefix = tmp.path().join("part");

        let outs = split_vcf(&vcf, &prefix, 2).unwrap();
        assert_eq!(outs.len(), 2);
        assert_eq!(outs[0].region.to_string(), "22:10-30");
        assert_eq!(outs[1].region.to_string(), "22:40-50");
        assert_eq!(outs[0].path, tmp.path().join("part_1.vcf.gz"));
        assert_eq!(positions_in(&outs[0].path), vec![10, 20, 30]);
        assert_eq!(positions_in(&outs[1].path), vec![40, 50]);
        assert_eq!((outs[0].records, outs[1].records), (3, 2));
    }

    #[test]
    fn test_split_vcf_shared_position() {
        let tmp = tempfile::TempDir::new().unwrap();
        let rows: Vec<(&str, u64, &str)> = [10u64, 20, 20, 30]
            .iter()
            .map(|p| ("22", *p, "0|1"))
            .collect();
        let vcf = write_vcf(tmp.path(), "in.vcf", "S1", &rows);
        let outs = split_vcf(&vcf, tmp.path().join("part"), 2).unwrap();
        assert_eq!(outs[0].region.to_string(), "22:10-20");
        assert_eq!(outs[1].region.to_string(), "22:20-30");
        assert_eq!(positions_in(&outs[0].path), vec![10, 20, 20]);
        assert_eq!(positions_in(&outs[1].path), vec![20, 20, 30]);
    }

    #[test]
    fn test_split_vcf_many_splits() {
        let tmp = tempfile::TempDir::new().unwrap();
        let rows: Vec<(&str, u64, &str)> = (1..=1500u64).map(|p| ("22", p, "0|1")).collect();
        let vcf = write_vcf(tmp.path(), "in.vcf", "S1", &rows);

        let outs = split_vcf(&vcf, tmp.path().join("part"), 1200).unwrap();
        assert_eq!(outs.len(), 1200);
        // 1500 = 300 chunks of 2 + 900 chunks of 1
        assert!(outs[..300].iter().all(|o| o.records == 2));
        assert!(outs[300..].iter().all(|o| o.records == 1));
        assert_eq!(outs[1199].path, tmp.path().join("part_1200.vcf.gz"));
        assert_eq!(positions_in(&outs[0].path), vec![1, 2]);
        assert_eq!(positions_in(&outs[300].path), vec![601]);
        assert_eq!(positions_in(&outs[1199].path), vec![1500]);
    }

    #[test]
    fn test_split_vcf_too_many_splits() {
        let tmp = tempfile::TempDir::new().unwrap();
        let vcf = write_vcf(tmp.path(), "in.vcf", "S1", &[("22", 10, "0|1")]);
        assert!(matches!(
            split_vcf(&vcf, tmp.path().join("part"), 2),
            Err(Error::TooFewVariants { .. })
        ));
        assert!(!tmp.path().join("part_1.vcf.gz").exists());
    }
}
