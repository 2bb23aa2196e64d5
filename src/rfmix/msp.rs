//! msp file format (gnomix / rfmix2)
//!
//! ```text
//! #Subpopulation order/codes: AFR=0	EAS=1	EUR=2	NAT=3
//! #chm  spos      epos      sgpos  egpos  n snps  8v1_A.NAD_S100.0  8v1_A.NAD_S100.1  ...
//! chr22 16747906  17321937  2.00   4.80   152     2                 2
//! ...
//! ```
use ahash::{HashMap, HashMapExt};
use log::{info, warn};
use rayon::prelude::*;
use snafu::{ensure, OptionExt, ResultExt, Snafu};
use std::{
    backtrace::Backtrace,
    fs::File,
    io::{BufRead, BufReader},
    ops::Range,
    path::{Path, PathBuf},
};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("cannot read msp file {}", path.display()))]
    Io {
        // leaf
        path: Box<PathBuf>,
        source: std::io::Error,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("cannot write {}", path.display()))]
    Csv {
        // leaf
        path: Box<PathBuf>,
        source: csv::Error,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(transparent)]
    Path {
        // non leaf
        #[snafu(backtrace)]
        source: crate::utils::path::Error,
    },
    #[snafu(display("msp file is empty"))]
    EmptyData {
        // leaf
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("invalid msp header: {message}"))]
    InvalidHeader {
        // leaf
        message: Box<String>,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("line {line}: expected {expected} fields, found {found}"))]
    FieldCount {
        // leaf
        line: usize,
        expected: usize,
        found: usize,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("line {line}: cannot parse {column} value {value:?}"))]
    ParseField {
        // leaf
        line: usize,
        column: Box<String>,
        value: Box<String>,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("line {line}: segments must be sorted by position and not inverted"))]
    Unsorted {
        // leaf
        line: usize,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("line {line}: segments of chromosome {chrom} are not contiguous in the file"))]
    ChromosomeSplit {
        // leaf
        line: usize,
        chrom: Box<String>,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("no segment of chromosome {chrom} overlaps {min_pos}-{max_pos}"))]
    EmptyRange {
        // leaf
        chrom: Box<String>,
        min_pos: u64,
        max_pos: u64,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("position {chrom}:{pos} is not in the local ancestry range"))]
    NotCovered {
        // leaf
        chrom: Box<String>,
        pos: u64,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("position {chrom}:{pos} is in {n} local ancestry segments"))]
    Ambiguous {
        // leaf
        chrom: Box<String>,
        pos: u64,
        n: usize,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("haplotype column {name:?} not found in msp file"))]
    MissingHaplotype {
        // leaf
        name: Box<String>,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("ancestry {name:?} is neither a code nor a label of {known}"))]
    UnknownAncestry {
        // leaf
        name: Box<String>,
        known: Box<String>,
        backtrace: Box<Option<Backtrace>>,
    },
}

type Result<T> = std::result::Result<T, Error>;

const CODES_PREFIX: &str = "#Subpopulation order/codes:";

/// Label to integer code map from the first line of an msp file, e.g.
///
/// `#Subpopulation order/codes: AFR=0	EUR=1	NAT=2`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AncestryCodes(Vec<(String, u8)>);

impl AncestryCodes {
    pub fn parse_header_line(line: &str) -> Result<Self> {
        let rest = line
            .trim()
            .strip_prefix(CODES_PREFIX)
            .context(InvalidHeaderSnafu {
                message: Box::new(format!("first line should start with {CODES_PREFIX:?}")),
            })?;
        let mut v = vec![];
        for token in rest.split_whitespace() {
            let (label, code) = token.rsplit_once('=').context(InvalidHeaderSnafu {
                message: Box::new(format!("ancestry code {token:?} is not LABEL=CODE")),
            })?;
            let code = code.parse::<u8>().ok().context(InvalidHeaderSnafu {
                message: Box::new(format!("ancestry code {token:?} is not an integer")),
            })?;
            v.push((label.to_owned(), code));
        }
        Ok(Self(v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u8)> {
        self.0.iter().map(|(l, c)| (l.as_str(), *c))
    }

    pub fn label(&self, code: u8) -> Option<&str> {
        self.iter().find(|(_, c)| *c == code).map(|(l, _)| l)
    }

    pub fn code(&self, label: &str) -> Option<u8> {
        self.iter().find(|(l, _)| *l == label).map(|(_, c)| c)
    }

    /// Resolve a user supplied ancestry, given either as integer code or as
    /// label.
    pub fn resolve(&self, name: &str) -> Result<u8> {
        if let Ok(code) = name.trim().parse::<u8>() {
            if !self.is_empty() && self.label(code).is_none() {
                warn!("ancestry code {code} is not listed in the msp header; every allele will be masked");
            }
            return Ok(code);
        }
        self.code(name.trim()).context(UnknownAncestrySnafu {
            name: Box::new(name.to_owned()),
            known: Box::new(
                self.iter()
                    .map(|(l, c)| format!("{l}={c}"))
                    .collect::<Vec<_>>()
                    .join(","),
            ),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MspSegment {
    pub chrom: String,
    /// first bp of the segment (inclusive)
    pub spos: u64,
    /// last bp of the segment (inclusive)
    pub epos: u64,
    pub sgpos: Option<f64>,
    pub egpos: Option<f64>,
    pub n_snps: Option<u32>,
}

impl MspSegment {
    pub fn contains(&self, pos: u64) -> bool {
        self.spos <= pos && pos <= self.epos
    }
}

/// Column positions of the fixed (non haplotype) columns
#[derive(Debug, Default)]
struct FixedColumns {
    chm: usize,
    spos: usize,
    epos: usize,
    sgpos: Option<usize>,
    egpos: Option<usize>,
    n_snps: Option<usize>,
    n: usize,
}

impl FixedColumns {
    fn from_header(fields: &[&str]) -> Result<Self> {
        let mut cols = FixedColumns::default();
        let (mut chm, mut spos, mut epos) = (None, None, None);
        for (i, name) in fields.iter().enumerate() {
            match name.trim_start_matches('#') {
                "chm" => chm = Some(i),
                "spos" => spos = Some(i),
                "epos" => epos = Some(i),
                "sgpos" => cols.sgpos = Some(i),
                "egpos" => cols.egpos = Some(i),
                "n snps" | "snps" => cols.n_snps = Some(i),
                "n" => {}
                _ => break,
            }
            cols.n = i + 1;
        }
        let missing = |c: &str| InvalidHeaderSnafu {
            message: Box::new(format!("column {c} is missing")),
        };
        cols.chm = chm.with_context(|| missing("#chm"))?;
        cols.spos = spos.with_context(|| missing("spos"))?;
        cols.epos = epos.with_context(|| missing("epos"))?;
        Ok(cols)
    }
}

/// Local ancestry segments with one ancestry call per haplotype
///
/// The haplotype columns are named `<sample>.0` and `<sample>.1`. Calls are
/// kept in a segment-major matrix.
#[derive(Debug, Clone)]
pub struct MspFile {
    codes: AncestryCodes,
    haplotypes: Vec<String>,
    hap_map: HashMap<String, usize>,
    segments: Vec<MspSegment>,
    calls: Vec<u8>,
    chrom_spans: HashMap<String, Range<usize>>,
}

impl MspFile {
    pub fn from_path(p: impl AsRef<Path>) -> Result<Self> {
        let path = p.as_ref();
        let ctx = || IoSnafu {
            path: Box::new(path.to_path_buf()),
        };
        let file = File::open(path).with_context(|_| ctx())?;
        Self::from_reader(BufReader::new(file)).map_err(|e| match e {
            Error::Io {
                source, backtrace, ..
            } => Error::Io {
                path: Box::new(path.to_path_buf()),
                source,
                backtrace,
            },
            e => e,
        })
    }

    pub fn from_reader(reader: impl BufRead) -> Result<Self> {
        let mut lines = reader.lines().enumerate().map(|(i, l)| (i + 1, l));
        let ctx = || IoSnafu {
            path: Box::new(PathBuf::new()),
        };

        let (_, first) = lines.next().context(EmptyDataSnafu)?;
        let first = first.with_context(|_| ctx())?;
        let (codes, header) = if first.starts_with(CODES_PREFIX) {
            let codes = AncestryCodes::parse_header_line(&first)?;
            let (_, header) = lines.next().context(InvalidHeaderSnafu {
                message: Box::new("column header line is missing".to_owned()),
            })?;
            (codes, header.with_context(|_| ctx())?)
        } else {
            (AncestryCodes::default(), first)
        };

        let header = header.trim_end_matches(['\r', '\n']);
        let fields: Vec<&str> = header.split('\t').collect();
        ensure!(
            fields.first().map_or(false, |x| x.starts_with('#')),
            InvalidHeaderSnafu {
                message: Box::new("column header should start with #chm".to_owned()),
            }
        );
        let fixed = FixedColumns::from_header(&fields)?;
        let haplotypes: Vec<String> = fields[fixed.n..].iter().map(|x| x.to_string()).collect();
        for h in haplotypes.iter() {
            ensure!(
                split_haplotype_name(h).is_some(),
                InvalidHeaderSnafu {
                    message: Box::new(format!(
                        "haplotype column {h:?} should be named <sample>.0 or <sample>.1"
                    )),
                }
            );
        }
        let hap_map = haplotypes
            .iter()
            .enumerate()
            .map(|(i, h)| (h.clone(), i))
            .collect();

        let mut segments: Vec<MspSegment> = Vec::new();
        let mut calls = Vec::new();
        let mut chrom_spans: HashMap<String, Range<usize>> = HashMap::new();
        let ncols = fields.len();

        for (ln, line) in lines {
            let line = line.with_context(|_| ctx())?;
            let line = line.trim_end_matches(['\r', '\n']);
            if line.is_empty() {
                continue;
            }
            let v: Vec<&str> = line.split('\t').collect();
            ensure!(
                v.len() == ncols,
                FieldCountSnafu {
                    line: ln,
                    expected: ncols,
                    found: v.len(),
                }
            );
            let seg = MspSegment {
                chrom: v[fixed.chm].to_owned(),
                spos: parse_field(v[fixed.spos], ln, "spos")?,
                epos: parse_field(v[fixed.epos], ln, "epos")?,
                sgpos: fixed
                    .sgpos
                    .map(|i| parse_field(v[i], ln, "sgpos"))
                    .transpose()?,
                egpos: fixed
                    .egpos
                    .map(|i| parse_field(v[i], ln, "egpos"))
                    .transpose()?,
                n_snps: fixed
                    .n_snps
                    .map(|i| parse_field(v[i], ln, "n snps"))
                    .transpose()?,
            };
            ensure!(seg.spos <= seg.epos, UnsortedSnafu { line: ln });

            // segments of a chromosome form one sorted run
            let idx = segments.len();
            match segments.last() {
                Some(last) if last.chrom == seg.chrom => {
                    ensure!(
                        last.spos <= seg.spos && last.epos <= seg.epos,
                        UnsortedSnafu { line: ln }
                    );
                    if let Some(span) = chrom_spans.get_mut(&seg.chrom) {
                        span.end = idx + 1;
                    }
                }
                _ => {
                    ensure!(
                        !chrom_spans.contains_key(&seg.chrom),
                        ChromosomeSplitSnafu {
                            line: ln,
                            chrom: Box::new(seg.chrom.clone()),
                        }
                    );
                    chrom_spans.insert(seg.chrom.clone(), idx..idx + 1);
                }
            }

            for (name, x) in haplotypes.iter().zip(&v[fixed.n..]) {
                calls.push(parse_field(x, ln, name)?);
            }
            segments.push(seg);
        }

        Ok(Self {
            codes,
            haplotypes,
            hap_map,
            segments,
            calls,
            chrom_spans,
        })
    }

    pub fn codes(&self) -> &AncestryCodes {
        &self.codes
    }

    pub fn haplotypes(&self) -> &[String] {
        &self.haplotypes
    }

    pub fn segments(&self) -> &[MspSegment] {
        &self.segments
    }

    /// Distinct chromosome names, in file order
    pub fn chromosomes(&self) -> Vec<&str> {
        let mut v: Vec<_> = self
            .chrom_spans
            .iter()
            .map(|(c, r)| (r.start, c.as_str()))
            .collect();
        v.sort();
        v.into_iter().map(|(_, c)| c).collect()
    }

    /// Sample names in column order
    pub fn samples(&self) -> Vec<&str> {
        self.haplotypes
            .iter()
            .filter_map(|h| split_haplotype_name(h))
            .map(|(s, _)| s)
            .fold(vec![], |mut v, s| {
                if !v.contains(&s) {
                    v.push(s);
                }
                v
            })
    }

    /// Column index of haplotype `hap` (0 or 1) of `sample`
    pub fn haplotype_index(&self, sample: &str, hap: u8) -> Result<usize> {
        let name = format!("{sample}.{hap}");
        match self.hap_map.get(&name) {
            Some(i) => Ok(*i),
            None => MissingHaplotypeSnafu {
                name: Box::new(name),
            }
            .fail(),
        }
    }

    pub fn call(&self, segment: usize, haplotype: usize) -> u8 {
        self.calls[segment * self.haplotypes.len() + haplotype]
    }

    pub fn segment_calls(&self, segment: usize) -> &[u8] {
        let n = self.haplotypes.len();
        &self.calls[segment * n..(segment + 1) * n]
    }

    /// Keep the segments of `chrom` that overlap `[min_pos, max_pos]`: those
    /// containing either end of the range and those lying within it.
    pub fn restrict(&mut self, chrom: &str, min_pos: u64, max_pos: u64) -> Result<()> {
        let mut segments = Vec::new();
        let mut calls = Vec::new();
        for (i, s) in self.segments.iter().enumerate() {
            let overlaps = s.chrom == chrom
                && (s.contains(min_pos)
                    || s.contains(max_pos)
                    || (min_pos <= s.spos && s.epos <= max_pos));
            if overlaps {
                calls.extend_from_slice(self.segment_calls(i));
                segments.push(s.clone());
            }
        }
        // self is left untouched on error
        ensure!(
            !segments.is_empty(),
            EmptyRangeSnafu {
                chrom: Box::new(chrom.to_owned()),
                min_pos,
                max_pos,
            }
        );
        info!(
            "kept {} local ancestry segments for {chrom}:{min_pos}-{max_pos}",
            segments.len()
        );
        self.chrom_spans.clear();
        self.chrom_spans.insert(chrom.to_owned(), 0..segments.len());
        self.segments = segments;
        self.calls = calls;
        Ok(())
    }

    /// Index of the one segment of `chrom` with `spos <= pos <= epos`.
    pub fn locate(&self, chrom: &str, pos: u64) -> Result<usize> {
        let not_covered = || NotCoveredSnafu {
            chrom: Box::new(chrom.to_owned()),
            pos,
        };
        let span = self.chrom_spans.get(chrom).with_context(not_covered)?;
        let segs = &self.segments[span.clone()];
        // spos and epos are both non-decreasing within a chromosome
        let k = segs.partition_point(|s| s.spos <= pos);
        let n = segs[..k].iter().rev().take_while(|s| s.epos >= pos).count();
        match n {
            0 => not_covered().fail(),
            1 => Ok(span.start + k - 1),
            n => AmbiguousSnafu {
                chrom: Box::new(chrom.to_owned()),
                pos,
                n,
            }
            .fail(),
        }
    }

    /// Write one BED file per haplotype, `{outdir}/{sample}_{hap}.bed`, with
    /// columns `chm spos epos ancestry`.
    ///
    /// With `merge`, consecutive segments with the same ancestry are joined
    /// when they touch or overlap.
    pub fn to_haplotype_beds(&self, outdir: impl AsRef<Path>, merge: bool) -> Result<Vec<PathBuf>> {
        let outdir = outdir.as_ref();
        crate::utils::path::ensure_dir(outdir)?;
        self.haplotypes
            .par_iter()
            .enumerate()
            .map(|(ih, name)| {
                // names are validated when parsing
                let (sample, hap) = split_haplotype_name(name).unwrap_or((name.as_str(), 0));
                let p = outdir.join(format!("{sample}_{hap}.bed"));
                self.write_haplotype_bed(ih, &p, merge)?;
                Ok(p)
            })
            .collect()
    }

    fn write_haplotype_bed(&self, ih: usize, p: &Path, merge: bool) -> Result<()> {
        let ctx = || CsvSnafu {
            path: Box::new(p.to_path_buf()),
        };
        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_path(p)
            .with_context(|_| ctx())?;
        wtr.write_record(["chm", "spos", "epos", "ancestry"])
            .with_context(|_| ctx())?;

        let mut rows: Vec<(&str, u64, u64, u8)> = vec![];
        for (i, seg) in self.segments.iter().enumerate() {
            let anc = self.call(i, ih);
            match rows.last_mut() {
                Some(last)
                    if merge
                        && last.0 == seg.chrom
                        && last.3 == anc
                        && seg.spos <= last.2.saturating_add(1) =>
                {
                    last.2 = last.2.max(seg.epos);
                }
                _ => rows.push((seg.chrom.as_str(), seg.spos, seg.epos, anc)),
            }
        }
        for (chrom, spos, epos, anc) in rows {
            let label = match self.codes.label(anc) {
                Some(l) => l.to_owned(),
                None => anc.to_string(),
            };
            wtr.write_record([
                chrom,
                spos.to_string().as_str(),
                epos.to_string().as_str(),
                label.as_str(),
            ])
                .with_context(|_| ctx())?;
        }
        wtr.flush()
            .map_err(csv::Error::from)
            .with_context(|_| ctx())?;
        Ok(())
    }
}

/// Split `<sample>.<hap>` into sample name and haplotype index
pub fn split_haplotype_name(name: &str) -> Option<(&str, u8)> {
    let (sample, hap) = name.rsplit_once('.')?;
    match hap {
        "0" => Some((sample, 0)),
        "1" => Some((sample, 1)),
        _ => None,
    }
}

fn parse_field<T: std::str::FromStr>(value: &str, line: usize, column: &str) -> Result<T> {
    value.trim().parse::<T>().ok().context(ParseFieldSnafu {
        line,
        column: Box::new(column.to_owned()),
        value: Box::new(value.to_owned()),
    })
}
