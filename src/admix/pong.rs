use log::info;
use serde::Serialize;
use snafu::prelude::*;
use std::{
    backtrace::Backtrace,
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
    #[snafu(display("No Q files found with prefix '{prefix}' in '{}'", dir.display()))]
    NoQFiles {
        // leaf
        dir: Box<PathBuf>,
        prefix: Box<String>,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display(
        "Failed to parse K value from Q file name {name}; expected format 'prefix.K.Q'"
    ))]
    ParseK {
        // leaf
        name: Box<String>,
        backtrace: Box<Option<Backtrace>>,
    },
    #[snafu(display("Failed to write filemap to {}", path.display()))]
    WriteFileMap {
        // leaf
        path: Box<PathBuf>,
        source: csv::Error,
        backtrace: Box<Option<Backtrace>>,
    },
}

type Result<T> = std::result::Result<T, Error>;

/// One line of a pong file map
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QFile {
    pub run_id: String,
    pub k: u32,
    pub path: PathBuf,
}

/// `K` from a `prefix.K.Q` file name
pub fn parse_k(name: &str) -> Result<u32> {
    name.split('.')
        .nth(1)
        .and_then(|x| x.parse().ok())
        .context(ParseKSnafu {
            name: Box::new(name.to_owned()),
        })
}

/// File stem with `.` replaced by `x`, suffixed with `-K`
pub fn run_id(p: &Path, k: u32) -> String {
    let stem = p
        .file_stem()
        .map(|x| x.to_string_lossy().replace('.', "x"))
        .unwrap_or_default();
    format!("{stem}-{k}")
}

/// Q files of `dir` whose name starts with `prefix`, sorted by K then name
pub fn find_q_files(dir: impl AsRef<Path>, prefix: &str) -> Result<Vec<QFile>> {
    let dir = dir.as_ref();
    let mut qfiles = vec![];
    for path in list_files_with_suffix(dir, "Q")? {
        let name = file_name(&path);
        if !name.starts_with(prefix) {
            continue;
        }
        let k = parse_k(&name)?;
        qfiles.push(QFile {
            run_id: run_id(&path, k),
            k,
            path,
        });
    }
    ensure!(
        !qfiles.is_empty(),
        NoQFilesSnafu {
            dir: Box::new(dir.to_path_buf()),
            prefix: Box::new(prefix.to_owned()),
        }
    );
    // files are listed by name, the sort is stable
    qfiles.sort_by_key(|q| q.k);
    Ok(qfiles)
}

/// Write a pong file map (`runID`, `K`, file path; tab separated, no header)
/// for the Q files of `dir` starting with `prefix`.
pub fn make_pong_filemap(
    dir: impl AsRef<Path>,
    prefix: &str,
    out: impl AsRef<Path>,
) -> Result<Vec<QFile>> {
    let qfiles = find_q_files(dir, prefix)?;
    let out = out.as_ref();
    let ctx = || WriteFileMapSnafu {
        path: Box::new(out.to_path_buf()),
    };
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .from_path(out)
        .with_context(|_| ctx())?;
    for q in qfiles.iter() {
        wtr.serialize(q).with_context(|_| ctx())?;
    }
    wtr.flush()
        .map_err(csv::Error::from)
        .with_context(|_| ctx())?;
    info!(
        "Filemap of {} Q files successfully created and saved to '{}'",
        qfiles.len(),
        out.display()
    );
    Ok(qfiles)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_k_and_run_id() {
        assert_eq!(parse_k("admix.10.Q").unwrap(), 10);
        assert!(matches!(parse_k("admix.Q"), Err(Error::ParseK { .. })));
        assert!(matches!(parse_k("admix.x.Q"), Err(Error::ParseK { .. })));
        assert_eq!(run_id(Path::new("q/admix.3.Q"), 3), "admixx3-3");
        assert_eq!(run_id(Path::new("run1.4.Q"), 4), "run1x4-4");
    }

    #[test]
    fn test_make_pong_filemap() {
        let tmp = tempfile::TempDir::new().unwrap();
        for name in ["admix.10.Q", "admix.2.Q", "admix.3.Q", "admix.3.P", "other.2.Q"] {
            std::fs::write(tmp.path().join(name), "").unwrap();
        }
        let out = tmp.path().join("filemap.txt");
        let v = make_pong_filemap(tmp.path(), "admix", &out).unwrap();
        let ks: Vec<u32> = v.iter().map(|q| q.k).collect();
        assert_eq!(ks, vec![2, 3, 10]);

        let d = tmp.path().display();
        assert_eq!(
            std::fs::read_to_string(&out).unwrap(),
            format!(
                "admixx2-2\t2\t{d}/admix.2.Q\nadmixx3-3\t3\t{d}/admix.3.Q\nadmixx10-10\t10\t{d}/admix.10.Q\n"
            )
        );
    }

    #[test]
    fn test_make_pong_filemap_errors() {
        let tmp = tempfile::TempDir::new().unwrap();
        let out = tmp.path().join("filemap.txt");
        assert!(matches!(
            make_pong_filemap(tmp.path(), "admix", &out),
            Err(Error::NoQFiles { .. })
        ));
        assert!(matches!(
            make_pong_filemap(tmp.path().join("nope"), "admix", &out),
            Err(Error::Path { .. })
        ));
        std::fs::write(tmp.path().join("admix.Q"), "").unwrap();
        assert!(matches!(
            make_pong_filemap(tmp.path(), "admix", &out),
            Err(Error::ParseK { .. })
        ));
    }
}
