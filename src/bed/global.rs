use itertools::Itertools;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::Deserialize;
use snafu::prelude::*;
use std::{
    backtrace::Backtrace,
    cmp::Ordering,
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use crate::utils::path::{file_name, list_files_with_suffix};

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
    #[snafu(display("column {column} not found in {}", path.display()))]
    MissingColumn {
        // leaf
        path: Box<PathBuf>,
        column: &'static str,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("Sample name mismatch: {name0} != {name1}"))]
    SampleMismatch {
        // leaf
        name0: Box<String>,
        name1: Box<String>,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("no pair of haplotype BED files found in {}", dir.display()))]
    NoSamples {
        // leaf
        dir: Box<PathBuf>,
        backtrace: Box<Option<Backtrace>>,
    },
}

type Result<T> = std::result::Result<T, Error>;

const REQUIRED_COLUMNS: [&str; 3] = ["ancestry", "spos", "epos"];

/// The two haplotype BED files of a sample
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BedPair {
    pub sample: String,
    pub hap0: PathBuf,
    pub hap1: PathBuf,
}

/// Sample name of a haplotype BED file `{sample}_{hap}.bed`
pub fn sample_of(p: &Path, hap: u8) -> Option<String> {
    file_name(p)
        .strip_suffix(&format!("_{hap}.bed"))
        .map(|s| s.to_owned())
}

/// Pair up the `{sample}_0.bed` and `{sample}_1.bed` files of `dir`.
/// Samples without both files are left out.
pub fn list_bed_files(dir: impl AsRef<Path>) -> Result<Vec<BedPair>> {
    let mut groups = BTreeMap::<String, Vec<PathBuf>>::new();
    for p in list_files_with_suffix(dir, ".bed")? {
        match sample_of(&p, 0).or_else(|| sample_of(&p, 1)) {
            Some(sample) => groups.entry(sample).or_default().push(p),
            None => debug!("{} is not a haplotype BED file", p.display()),
        }
    }
    let mut pairs = Vec::with_capacity(groups.len());
    for (sample, files) in groups {
        // `_0.bed` sorts before `_1.bed`
        let Ok::<[PathBuf; 2], _>([hap0, hap1]) = files.try_into() else {
            warn!("sample {sample} does not have two haplotype files, skipped");
            continue;
        };
        pairs.push(BedPair { sample, hap0, hap1 });
    }
    Ok(pairs)
}

#[derive(Debug, Deserialize)]
struct SegmentRow {
    ancestry: Option<String>,
    #[serde(deserialize_with = "csv::invalid_option")]
    spos: Option<f64>,
    #[serde(deserialize_with = "csv::invalid_option")]
    epos: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AncestrySegment {
    pub ancestry: String,
    pub spos: f64,
    pub epos: f64,
}

impl AncestrySegment {
    pub fn length(&self) -> f64 {
        self.epos - self.spos
    }
}

fn is_missing(s: &str) -> bool {
    matches!(s.trim(), "" | "." | "NA")
}

/// Read the segments of a haplotype BED file. Rows with a missing ancestry
/// or position are dropped.
pub fn read_segments(p: &Path) -> Result<Vec<AncestrySegment>> {
    let ctx = || ReadTableSnafu {
        path: Box::new(p.to_path_buf()),
    };
    let mut rdr = super::tsv_reader(p).with_context(|_| ctx())?;
    let header = rdr.headers().with_context(|_| ctx())?;
    for column in REQUIRED_COLUMNS {
        ensure!(
            header.iter().any(|h| h == column),
            MissingColumnSnafu {
                path: Box::new(p.to_path_buf()),
                column,
            }
        );
    }
    let mut segs = vec![];
    for row in rdr.deserialize::<SegmentRow>() {
        let row = row.with_context(|_| ctx())?;
        match row {
            SegmentRow {
                ancestry: Some(ancestry),
                spos: Some(spos),
                epos: Some(epos),
            } if !is_missing(&ancestry) => segs.push(AncestrySegment {
                ancestry,
                spos,
                epos,
            }),
            _ => {}
        }
    }
    Ok(segs)
}

/// Load both haplotypes of a sample. The sample names derived from the two
/// file names must agree.
pub fn load_bed_pair(hap0: &Path, hap1: &Path) -> Result<(String, Vec<AncestrySegment>)> {
    let name0 = sample_of(hap0, 0).unwrap_or_else(|| file_name(hap0));
    let name1 = sample_of(hap1, 1).unwrap_or_else(|| file_name(hap1));
    ensure!(
        name0 == name1,
        SampleMismatchSnafu {
            name0: Box::new(name0),
            name1: Box::new(name1),
        }
    );
    let mut segs = read_segments(hap0)?;
    segs.extend(read_segments(hap1)?);
    Ok((name0, segs))
}

/// Fraction of the total segment length assigned to each ancestry.
///
/// A sample without any segment length gets no proportion at all, which is
/// written as `0.0` for every ancestry.
pub fn compute_proportions(segs: &[AncestrySegment]) -> BTreeMap<String, f64> {
    let mut weights = BTreeMap::<String, f64>::new();
    for seg in segs {
        *weights.entry(seg.ancestry.clone()).or_default() += seg.length();
    }
    let total: f64 = weights.values().sum();
    weights
        .into_iter()
        .map(|(anc, w)| (anc, if total > 0.0 { w / total } else { 0.0 }))
        .collect()
}

/// Sort ancestry labels numerically when they all are numbers, otherwise
/// lexicographically.
pub fn sort_ancestries<'a>(labels: impl Iterator<Item = &'a str>) -> Vec<String> {
    let labels: Vec<&str> = labels.unique().collect();
    let numeric: Option<Vec<f64>> = labels.iter().map(|x| x.parse::<f64>().ok()).collect();
    match numeric {
        Some(values) => labels
            .iter()
            .zip(values)
            .sorted_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal))
            .map(|(l, _)| l.to_string())
            .collect(),
        None => labels.into_iter().sorted().map(|x| x.to_owned()).collect(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GlobalAncestry {
    pub sample: String,
    pub proportions: BTreeMap<String, f64>,
}

/// Write proportions as CSV: `sample` then one column per ancestry, absent
/// proportions as `0.0`.
pub fn write_global_ancestry(rows: &[GlobalAncestry], out: &Path) -> Result<Vec<String>> {
    let ancestries = sort_ancestries(
        rows.iter()
            .flat_map(|r| r.proportions.keys().map(|x| x.as_str())),
    );
    let ctx = || WriteTableSnafu {
        path: Box::new(out.to_path_buf()),
    };
    let mut wtr = csv::Writer::from_path(out).with_context(|_| ctx())?;
    let header = std::iter::once("sample").chain(ancestries.iter().map(|x| x.as_str()));
    wtr.write_record(header).with_context(|_| ctx())?;
    for r in rows {
        let mut fields = vec![r.sample.clone()];
        fields.extend(ancestries.iter().map(|anc| {
            let p = r.proportions.get(anc).copied().unwrap_or(0.0);
            format!("{p:?}")
        }));
        wtr.write_record(&fields).with_context(|_| ctx())?;
    }
    wtr.flush()
        .map_err(csv::Error::from)
        .with_context(|_| ctx())?;
    Ok(ancestries)
}

/// Compute global ancestry proportions of every sample with two haplotype
/// BED files in `bed_dir` and write them to `out`.
pub fn global_ancestry(bed_dir: impl AsRef<Path>, out: impl AsRef<Path>) -> Result<Vec<GlobalAncestry>> {
    let bed_dir = bed_dir.as_ref();
    let pairs = list_bed_files(bed_dir)?;
    ensure!(
        !pairs.is_empty(),
        NoSamplesSnafu {
            dir: Box::new(bed_dir.to_path_buf())
        }
    );
    info!("Found {} samples with paired BED files", pairs.len());

    let rows = pairs
        .par_iter()
        .map(|pair| {
            let (sample, segs) = load_bed_pair(&pair.hap0, &pair.hap1)?;
            debug!("{sample}: {} segments", segs.len());
            if segs.iter().map(|s| s.length()).sum::<f64>() <= 0.0 {
                warn!("sample {sample} has no usable segments, all proportions set to 0.0");
            }
            Ok(GlobalAncestry {
                proportions: compute_proportions(&segs),
                sample,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let out = out.as_ref();
    let ancestries = write_global_ancestry(&rows, out)?;
    info!(
        "Global ancestry of {} samples over {} ancestries saved to {}",
        rows.len(),
        ancestries.len(),
        out.display()
    );
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "chm\tspos\tepos\tancestry\n";

    fn write(dir: &Path, name: &str, rows: &str) -> PathBuf {
        let p = dir.join(name);
        std::fs::write(&p, format!("{HEADER}{rows}")).unwrap();
        p
    }

    #[test]
    fn test_list_bed_files() {
        let tmp = tempfile::TempDir::new().unwrap();
        write(tmp.path(), "S1_1.bed", "");
        write(tmp.path(), "S1_0.bed", "");
        write(tmp.path(), "S2_0.bed", "");
        write(tmp.path(), "merged.bed", "");
        let pairs = list_bed_files(tmp.path()).unwrap();
        assert_eq!(
            pairs,
            vec![BedPair {
                sample: "S1".to_owned(),
                hap0: tmp.path().join("S1_0.bed"),
                hap1: tmp.path().join("S1_1.bed"),
            }]
        );
    }

    #[test]
    fn test_load_bed_pair() {
        let tmp = tempfile::TempDir::new().unwrap();
        let h0 = write(tmp.path(), "S1_0.bed", "1\t0\t100\tAFR\n1\t100\t150\t.\n");
        let h1 = write(tmp.path(), "S1_1.bed", "1\t0\tNA\tEUR\n1\t0\t50\tEUR\n");
        let (sample, segs) = load_bed_pair(&h0, &h1).unwrap();
        assert_eq!(sample, "S1");
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[1].ancestry, "EUR");
        assert_eq!(segs[1].length(), 50.0);

        let other = write(tmp.path(), "S2_1.bed", "");
        assert!(matches!(
            load_bed_pair(&h0, &other),
            Err(Error::SampleMismatch { .. })
        ));
    }

    #[test]
    fn test_missing_column() {
        let tmp = tempfile::TempDir::new().unwrap();
        let p = tmp.path().join("S1_0.bed");
        std::fs::write(&p, "chm\tspos\tepos\n1\t0\t10\n").unwrap();
        assert!(matches!(
            read_segments(&p),
            Err(Error::MissingColumn {
                column: "ancestry",
                ..
            })
        ));
    }

    #[test]
    fn test_compute_proportions() {
        let seg = |a: &str, s: f64, e: f64| AncestrySegment {
            ancestry: a.to_owned(),
            spos: s,
            epos: e,
        };
        let p = compute_proportions(&[seg("AFR", 0.0, 100.0), seg("EUR", 0.0, 300.0)]);
        assert_eq!(p["AFR"], 0.25);
        assert_eq!(p["EUR"], 0.75);

        let p = compute_proportions(&[seg("AFR", 10.0, 10.0)]);
        assert_eq!(p["AFR"], 0.0);
    }

    #[test]
    fn test_sort_ancestries() {
        let v = sort_ancestries(["10", "2", "0", "2"].into_iter());
        assert_eq!(v, vec!["0", "2", "10"]);
        let v = sort_ancestries(["NAT", "AFR", "10"].into_iter());
        assert_eq!(v, vec!["10", "AFR", "NAT"]);
    }

    #[test]
    fn test_global_ancestry() {
        let tmp = tempfile::TempDir::new().unwrap();
        write(tmp.path(), "S2_0.bed", "1\t0\t100\tEUR\n");
        write(tmp.path(), "S2_1.bed", "1\t0\t100\tEUR\n");
        write(tmp.path(), "S1_0.bed", "1\t0\t100\tAFR\n1\t100\t300\tNAT\n");
        write(tmp.path(), "S1_1.bed", "1\t0\t300\tAFR\n");
        let out = tmp.path().join("global.csv");

        let rows = global_ancestry(tmp.path(), &out).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].sample, "S1");
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "sample,AFR,EUR,NAT\nS1,0.6666666666666666,0.0,0.3333333333333333\nS2,0.0,1.0,0.0\n"
        );
    }

    #[test]
    fn test_global_ancestry_sample_without_segments() {
        let tmp = tempfile::TempDir::new().unwrap();
        write(tmp.path(), "S1_0.bed", "1\t0\t100\tAFR\n");
        write(tmp.path(), "S1_1.bed", "1\t0\t100\tEUR\n");
        write(tmp.path(), "S2_0.bed", "1\t0\t100\t.\n");
        write(tmp.path(), "S2_1.bed", "1\t0\tNA\tEUR\n");
        let out = tmp.path().join("global.csv");

        let rows = global_ancestry(tmp.path(), &out).unwrap();
        assert!(rows[1].proportions.is_empty());
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            "sample,AFR,EUR\nS1,0.5,0.5\nS2,0.0,0.0\n"
        );
    }

    #[test]
    fn test_global_ancestry_no_samples() {
        let tmp = tempfile::TempDir::new().unwrap();
        assert!(matches!(
            global_ancestry(tmp.path(), tmp.path().join("g.csv")),
            Err(Error::NoSamples { .. })
        ));
    }
}
