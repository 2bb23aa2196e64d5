use snafu::prelude::*;
use std::{backtrace::Backtrace, fmt, str::FromStr};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid region {region:?}, expected CHROM:START-END"))]
    InvalidRegion {
        // leaf
        region: Box<String>,
        backtrace: Box<Option<Backtrace>>,
    },
}

/// Genomic region with 1-based inclusive coordinates, written `chrom:start-end`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Region {
    pub chrom: String,
    pub start: u64,
    pub end: u64,
}

impl Region {
    pub fn new(chrom: &str, start: u64, end: u64) -> Self {
        Self {
            chrom: chrom.to_owned(),
            start,
            end,
        }
    }

    pub fn contains(&self, pos: u64) -> bool {
        self.start <= pos && pos <= self.end
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}-{}", self.chrom, self.start, self.end)
    }
}

impl FromStr for Region {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = || -> Option<Region> {
            // contig names may contain ':', e.g. HLA contigs
            let (chrom, range) = s.rsplit_once(':')?;
            let (start, end) = range.split_once('-')?;
            let start = start.replace(',', "").parse().ok()?;
            let end = end.replace(',', "").parse().ok()?;
            (!chrom.is_empty() && start <= end).then(|| Region::new(chrom, start, end))
        };
        parse().context(InvalidRegionSnafu {
            region: Box::new(s.to_owned()),
        })
    }
}

#[test]
fn test_region_display_and_parse() {
    let r = Region::new("chr22", 16050075, 16300000);
    assert_eq!(r.to_string(), "chr22:16050075-16300000");
    assert_eq!("chr22:16050075-16300000".parse::<Region>().unwrap(), r);
    assert_eq!(
        "HLA-A*01:01:01:01:1-3,000".parse::<Region>().unwrap(),
        Region::new("HLA-A*01:01:01:01", 1, 3000)
    );
    assert!("chr22".parse::<Region>().is_err());
    assert!("chr22:10-5".parse::<Region>().is_err());
    assert!(":1-5".parse::<Region>().is_err());
    assert!(r.contains(16050075) && r.contains(16300000) && !r.contains(16300001));
}
