use ahash::{HashMap, HashMapExt};
use log::{info, warn};
use rust_htslib::bcf::{self, record::GenotypeAllele, Read};
use snafu::prelude::*;
use std::{
    backtrace::Backtrace,
    path::{Path, PathBuf},
};

use crate::rfmix::msp::{self, MspFile};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(transparent)]
    Vcf {
        // non leaf
        #[snafu(backtrace)]
        source: super::Error,
    },
    #[snafu(transparent)]
    Msp {
        // non leaf
        #[snafu(backtrace)]
        source: msp::Error,
    },
    #[snafu(display("cannot read genotypes of {chrom}:{pos}"))]
    Genotypes {
        // leaf
        chrom: Box<String>,
        pos: u64,
        source: rust_htslib::errors::Error,
        backtrace: Box<Option<Backtrace>>,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// What to do with a variant whose position falls in no local ancestry segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UncoveredPolicy {
    /// abort
    #[default]
    Error,
    /// drop the record from the output
    Skip,
    /// keep the record with every allele set to missing
    Mask,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MaskStats {
    pub records: usize,
    pub written: usize,
    pub skipped: usize,
    pub masked_alleles: usize,
}

const PROGRESS_EVERY: usize = 10000;

fn to_missing(a: GenotypeAllele) -> GenotypeAllele {
    match a {
        GenotypeAllele::Phased(_) | GenotypeAllele::PhasedMissing => GenotypeAllele::PhasedMissing,
        _ => GenotypeAllele::UnphasedMissing,
    }
}

fn mask_allele(a: &mut GenotypeAllele) -> usize {
    let was_called = a.index().is_some();
    *a = to_missing(*a);
    was_called as usize
}

/// Set allele `h` of a genotype to missing when the ancestry of haplotype
/// `h` differs from `target`. Only the first two alleles are considered.
///
/// Returns the number of called alleles that were masked.
pub fn mask_genotype(alleles: &mut [GenotypeAllele], ancestry: [u8; 2], target: u8) -> usize {
    alleles
        .iter_mut()
        .zip(ancestry)
        .filter(|(_, anc)| *anc != target)
        .map(|(a, _)| mask_allele(a))
        .sum()
}

/// Set every allele of a genotype to missing
pub fn mask_all(alleles: &mut [GenotypeAllele]) -> usize {
    alleles.iter_mut().map(mask_allele).sum()
}

/// Mask the genotypes of `vcf` by local ancestry.
///
/// Alleles on haplotypes whose ancestry in the `msp` file is not `target`
/// (a code or a label from the msp header) are written as missing. The VCF
/// must hold a single chromosome and every sample must have `<sample>.0` and
/// `<sample>.1` columns in the msp file.
///
/// Samples of one record may differ in ploidy; each genotype is written back
/// with its own number of alleles.
pub fn mask_vcf_by_ancestry(
    vcf: impl AsRef<Path>,
    msp_path: impl AsRef<Path>,
    target: &str,
    out: impl AsRef<Path>,
    uncovered: UncoveredPolicy,
) -> Result<MaskStats> {
    let vcf = vcf.as_ref();
    let out = out.as_ref();

    info!("reading variant range of {}", vcf.display());
    let range = super::read_positions(vcf)?;
    let (chrom, min_pos, max_pos) = (range.chrom.as_str(), range.min(), range.max());

    info!("reading local ancestry file {}", msp_path.as_ref().display());
    let mut lai = MspFile::from_path(msp_path)?;
    lai.restrict(chrom, min_pos, max_pos)?;
    let target = lai.codes().resolve(target)?;
    info!("keeping alleles of ancestry {target}");

    let mut reader = super::open_reader(vcf)?;
    let header = reader.header().clone();
    let samples = super::sample_names(&header);
    let hap_cols = samples
        .iter()
        .map(|s| Ok([lai.haplotype_index(s, 0)?, lai.haplotype_index(s, 1)?]))
        .collect::<Result<Vec<_>>>()?;

    let mut writer = super::create_writer(out, &bcf::Header::from_template(&header))?;
    let mut names = HashMap::new();
    let mut stats = MaskStats::default();
    let mut gts: Vec<Vec<GenotypeAllele>> = vec![vec![]; samples.len()];

    for (irec, r) in reader.records().enumerate() {
        let mut rec = r.context(super::ReadRecordSnafu {
            path: Box::new(vcf.to_path_buf()),
            irec,
        })?;
        let chrom = super::contig_name(&header, &mut names, &rec, irec)?;
        let pos = rec.pos() as u64 + 1;
        stats.records += 1;
        if irec % PROGRESS_EVERY == 0 {
            info!("masking at position {chrom}-{pos} ...");
        }

        let segment = match lai.locate(chrom, pos) {
            Ok(i) => Some(i),
            Err(msp::Error::NotCovered { .. }) if uncovered == UncoveredPolicy::Skip => {
                warn!("position {chrom}:{pos} not in local ancestry range, skipped");
                stats.skipped += 1;
                continue;
            }
            Err(msp::Error::NotCovered { .. }) if uncovered == UncoveredPolicy::Mask => {
                warn!("position {chrom}:{pos} not in local ancestry range, all alleles masked");
                None
            }
            Err(e) => return Err(e.into()),
        };

        let max_ploidy = {
            let genotypes = rec.genotypes().context(GenotypesSnafu {
                chrom: Box::new(chrom.to_owned()),
                pos,
            })?;
            let mut max_ploidy = 0;
            for (isam, (cols, alleles)) in hap_cols.iter().zip(gts.iter_mut()).enumerate() {
                // shorter genotypes (haploid calls, a bare `.`) end early
                alleles.clear();
                alleles.extend(genotypes.get(isam).iter().copied());
                max_ploidy = max_ploidy.max(alleles.len());
                stats.masked_alleles += match segment {
                    Some(iseg) => {
                        let anc = [lai.call(iseg, cols[0]), lai.call(iseg, cols[1])];
                        mask_genotype(alleles, anc, target)
                    }
                    None => mask_all(alleles),
                };
            }
            max_ploidy
        };

        writer.translate(&mut rec);
        if !gts.is_empty() {
            rec.push_genotype_structured(&gts, max_ploidy)
                .context(super::WriteRecordSnafu {
                    path: Box::new(out.to_path_buf()),
                })?;
        }
        writer.write(&rec).context(super::WriteRecordSnafu {
            path: Box::new(out.to_path_buf()),
        })?;
        stats.written += 1;
    }

    info!(
        "masked {} alleles; wrote {} of {} records to {}",
        stats.masked_alleles,
        stats.written,
        stats.records,
        out.display()
    );
    Ok(stats)
}

/// Output name for a masked VCF when none is given: `<input stem>.<ancestry>.vcf.gz`
pub fn default_output(vcf: &Path, target: &str) -> PathBuf {
    let mut name = crate::utils::path::file_name(vcf);
    for ext in [".gz", ".bgz", ".vcf", ".bcf"] {
        if let Some(stem) = name.strip_suffix(ext) {
            name = stem.to_owned();
        }
    }
    vcf.with_file_name(format!("{name}.{target}.vcf.gz"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vcf::testdata::write_vcf;
    use GenotypeAllele::*;

    #[test]
    fn test_mask_genotype() {
        let mut g = [Unphased(0), Phased(1)];
        assert_eq!(mask_genotype(&mut g, [1, 1], 1), 0);
        assert_eq!(g, [Unphased(0), Phased(1)]);

        assert_eq!(mask_genotype(&mut g, [0, 1], 1), 1);
        assert_eq!(g, [UnphasedMissing, Phased(1)]);

        let mut g = [Unphased(0), Phased(1)];
        assert_eq!(mask_genotype(&mut g, [1, 2], 1), 1);
        assert_eq!(g, [Unphased(0), PhasedMissing]);

        let mut g = [Unphased(1), Unphased(1)];
        assert_eq!(mask_genotype(&mut g, [0, 0], 1), 2);
        assert_eq!(g, [UnphasedMissing, UnphasedMissing]);

        // already missing alleles are not counted
        let mut g = [UnphasedMissing, Phased(1)];
        assert_eq!(mask_genotype(&mut g, [0, 0], 1), 1);
        assert_eq!(g, [UnphasedMissing, PhasedMissing]);
    }

    #[test]
    fn test_mask_genotype_haploid_and_polyploid() {
        let mut g = [Unphased(1)];
        assert_eq!(mask_genotype(&mut g, [0, 1], 1), 1);
        assert_eq!(g, [UnphasedMissing]);

        let mut g = [Unphased(0), Phased(1), Phased(1)];
        assert_eq!(mask_genotype(&mut g, [0, 0], 1), 2);
        assert_eq!(g, [UnphasedMissing, PhasedMissing, Phased(1)]);

        let mut g = [Unphased(0), Phased(1), Phased(1)];
        assert_eq!(mask_all(&mut g), 3);
    }

    #[test]
    fn test_default_output() {
        assert_eq!(
            default_output(Path::new("data/chr22.vcf.gz"), "EUR"),
            Path::new("data/chr22.EUR.vcf.gz")
        );
        assert_eq!(
            default_output(Path::new("x.bcf"), "1"),
            Path::new("x.1.vcf.gz")
        );
    }

    const MSP: &str = "\
#Subpopulation order/codes: AFR=0\tEUR=1
#chm\tspos\tepos\tsgpos\tegpos\tn snps\tS1.0\tS1.1\tS2.0\tS2.1
22\t100\t199\t0.1\t0.2\t3\t1\t0\t1\t1
22\t200\t299\t0.2\t0.3\t3\t0\t0\t1\t0
";

    fn read_gts(p: &Path) -> Vec<(u64, Vec<Vec<Option<u32>>>)> {
        let mut reader = bcf::Reader::from_path(p).unwrap();
        reader
            .records()
            .map(|r| {
                let rec = r.unwrap();
                let gts = rec.genotypes().unwrap();
                let nsam = rec.sample_count() as usize;
                let v = (0..nsam)
                    .map(|i| gts.get(i).iter().map(|a| a.index()).collect())
                    .collect();
                (rec.pos() as u64 + 1, v)
            })
            .collect()
    }

    #[test]
    fn test_mask_vcf() {
        let tmp = tempfile::TempDir::new().unwrap();
        let vcf = write_vcf(
            tmp.path(),
            "in.vcf",
            "S1\tS2",
            &[
                ("22", 150, "0|1\t1|1"),
                ("22", 250, "1|1\t0|1"),
            ],
        );
        let msp = tmp.path().join("lai.msp");
        std::fs::write(&msp, MSP).unwrap();
        let out = tmp.path().join("out.vcf");

        let stats = mask_vcf_by_ancestry(&vcf, &msp, "EUR", &out, UncoveredPolicy::Error).unwrap();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.written, 2);
        assert_eq!(stats.masked_alleles, 4);

        let gts = read_gts(&out);
        assert_eq!(gts[0].0, 150);
        assert_eq!(gts[0].1, vec![vec![Some(0), None], vec![Some(1), Some(1)]]);
        assert_eq!(gts[1].0, 250);
        assert_eq!(gts[1].1, vec![vec![None, None], vec![Some(0), None]]);

        // the same target given as code
        let out2 = tmp.path().join("out2.vcf.gz");
        mask_vcf_by_ancestry(&vcf, &msp, "1", &out2, UncoveredPolicy::Error).unwrap();
        assert_eq!(read_gts(&out2), gts);
    }

    #[test]
    fn test_mask_vcf_uncovered_policies() {
        let tmp = tempfile::TempDir::new().unwrap();
        let vcf = write_vcf(
            tmp.path(),
            "in.vcf",
            "S1\tS2",
            &[
                ("22", 150, "0|1\t1|1"),
                ("22", 250, "1|1\t0|1"),
                ("22", 320, "1|0\t0|1"),
            ],
        );
        let msp = tmp.path().join("lai.msp");
        std::fs::write(&msp, MSP).unwrap();
        let out = tmp.path().join("out.vcf");

        let r = mask_vcf_by_ancestry(&vcf, &msp, "EUR", &out, UncoveredPolicy::Error);
        assert!(matches!(
            r,
            Err(Error::Msp {
                source: msp::Error::NotCovered { pos: 320, .. }
            })
        ));

        let stats = mask_vcf_by_ancestry(&vcf, &msp, "EUR", &out, UncoveredPolicy::Skip).unwrap();
        assert_eq!((stats.records, stats.written, stats.skipped), (3, 2, 1));
        assert_eq!(read_gts(&out).len(), 2);

        let stats = mask_vcf_by_ancestry(&vcf, &msp, "EUR", &out, UncoveredPolicy::Mask).unwrap();
        assert_eq!((stats.written, stats.skipped, stats.masked_alleles), (3, 0, 8));
        let gts = read_gts(&out);
        assert_eq!(gts[2].1, vec![vec![None, None], vec![None, None]]);
    }

    #[test]
    fn test_mask_vcf_mixed_ploidy() {
        let tmp = tempfile::TempDir::new().unwrap();
        let vcf = write_vcf(
            tmp.path(),
            "in.vcf",
            "S1\tS2",
            &[
                ("22", 150, "0|1\t."),
                ("22", 160, "0|1\t1"),
                ("22", 250, "1|1|1\t0|1"),
            ],
        );
        let msp = tmp.path().join("lai.msp");
        std::fs::write(&msp, MSP).unwrap();
        let out = tmp.path().join("out.vcf");

        let stats = mask_vcf_by_ancestry(&vcf, &msp, "EUR", &out, UncoveredPolicy::Error).unwrap();
        assert_eq!((stats.records, stats.written), (3, 3));
        // 1 + 1 + (2 + 1); missing alleles are not counted
        assert_eq!(stats.masked_alleles, 5);

        let gts = read_gts(&out);
        assert_eq!(gts[0].1, vec![vec![Some(0), None], vec![None]]);
        assert_eq!(gts[1].1, vec![vec![Some(0), None], vec![Some(1)]]);
        assert_eq!(
            gts[2].1,
            vec![vec![None, None, Some(1)], vec![Some(0), None]]
        );
    }

    #[test]
    fn test_mask_vcf_missing_sample() {
        let tmp = tempfile::TempDir::new().unwrap();
        let vcf = write_vcf(
            tmp.path(),
            "in.vcf",
            "S1\tS3",
            &[("22", 150, "0|1\t1|1")],
        );
        let msp = tmp.path().join("lai.msp");
        std::fs::write(&msp, MSP).unwrap();
        let r = mask_vcf_by_ancestry(&vcf, &msp, "EUR", tmp.path().join("o.vcf"), UncoveredPolicy::Error);
        assert!(matches!(
            r,
            Err(Error::Msp {
                source: msp::Error::MissingHaplotype { .. }
            })
        ));
    }

    #[test]
    fn test_mask_vcf_chromosome_mismatch() {
        let tmp = tempfile::TempDir::new().unwrap();
        let vcf = write_vcf(tmp.path(), "in.vcf", "S1\tS2", &[("1", 150, "0|1\t1|1")]);
        let msp = tmp.path().join("lai.msp");
        std::fs::write(&msp, MSP).unwrap();
        let r = mask_vcf_by_ancestry(&vcf, &msp, "EUR", tmp.path().join("o.vcf"), UncoveredPolicy::Error);
        assert!(matches!(
            r,
            Err(Error::Msp {
                source: msp::Error::EmptyRange { .. }
            })
        ));
    }
}
