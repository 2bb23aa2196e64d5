pub mod path {
    use snafu::prelude::*;
    use std::{
        backtrace::Backtrace,
        path::{Path, PathBuf},
    };

    type Result<T> = std::result::Result<T, Error>;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub(crate)))]
    pub enum Error {
        #[snafu(display("cannot access {}", path.display()))]
        StdIo {
            // leaf
            path: Box<PathBuf>,
            source: std::io::Error,
            backtrace: Box<Option<Backtrace>>,
        },
        #[snafu(display("{} is not a directory", path.display()))]
        NotADirectory {
            // leaf
            path: Box<PathBuf>,
            backtrace: Box<Option<Backtrace>>,
        },
    }

    /// Create `dir` and all missing parents.
    pub fn ensure_dir(dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).context(StdIoSnafu {
            path: Box::new(dir.to_path_buf()),
        })
    }

    /// Files directly under `dir` whose name ends with `suffix`, sorted by
    /// file name.
    pub fn list_files_with_suffix(dir: impl AsRef<Path>, suffix: &str) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        ensure!(
            dir.is_dir(),
            NotADirectorySnafu {
                path: Box::new(dir.to_path_buf())
            }
        );
        let ctx = || StdIoSnafu {
            path: Box::new(dir.to_path_buf()),
        };
        let mut v = vec![];
        for entry in std::fs::read_dir(dir).with_context(|_| ctx())? {
            let p = entry.with_context(|_| ctx())?.path();
            if p.is_file() && file_name(&p).ends_with(suffix) {
                v.push(p);
            }
        }
        v.sort_by(|a, b| file_name(a).cmp(&file_name(b)));
        Ok(v)
    }

    /// Final component of a path as a (lossy) string; empty if there is none.
    pub fn file_name(p: &Path) -> String {
        p.file_name()
            .map(|x| x.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    #[test]
    fn test_list_files_with_suffix() {
        let tmp = tempfile::TempDir::new().unwrap();
        for name in ["b_1.bed", "a_0.bed", "notes.txt", "c.bed.gz"] {
            std::fs::write(tmp.path().join(name), "").unwrap();
        }
        std::fs::create_dir(tmp.path().join("d.bed")).unwrap();
        let v = list_files_with_suffix(tmp.path(), ".bed").unwrap();
        let names: Vec<_> = v.iter().map(|p| file_name(p)).collect();
        assert_eq!(names, vec!["a_0.bed", "b_1.bed"]);
    }

    #[test]
    fn test_list_files_not_a_dir() {
        let tmp = tempfile::TempDir::new().unwrap();
        let f = tmp.path().join("x.bed");
        std::fs::write(&f, "").unwrap();
        assert!(matches!(
            list_files_with_suffix(&f, ".bed"),
            Err(Error::NotADirectory { .. })
        ));
    }
}

pub mod logging {
    use log::LevelFilter;

    /// Initialize `env_logger` for a binary.
    ///
    /// `RUST_LOG` takes precedence over the level derived from the
    /// verbosity flags.
    pub fn init_logger(verbose: bool, quiet: bool) {
        let level = match (verbose, quiet) {
            (true, _) => LevelFilter::Debug,
            (false, true) => LevelFilter::Warn,
            (false, false) => LevelFilter::Info,
        };
        env_logger::Builder::new()
            .filter(None, level)
            .parse_default_env()
            .format_timestamp_secs()
            .init();
    }
}

pub mod error {
    use regex::Regex;
    use snafu::{AsErrorSource, ErrorCompat};

    /// One `fn`/`file`/`line` entry of a captured backtrace
    #[derive(Debug, PartialEq, Eq)]
    struct Frame<'a> {
        func: &'a str,
        file: &'a str,
        line: &'a str,
    }

    /// Frames of this crate's own source files, innermost first. The
    /// `Debug` form of `std::backtrace::Backtrace` lists every frame as
    /// `{ fn: "...", file: "...", line: N }`.
    fn own_frames(bt_debug: &str) -> Vec<Frame<'_>> {
        let Ok(re) = Regex::new(r#"fn: "([^"]+)", file: "(\./)?(src/[^"]+)", line: (\d+)"#) else {
            return vec![];
        };
        re.captures_iter(bt_debug)
            .filter_map(|cap| {
                let func = cap.get(1)?.as_str();
                // context selectors and `?` conversions add no information
                if func.contains("IntoError") || func.contains("core::convert") {
                    return None;
                }
                Some(Frame {
                    func,
                    file: cap.get(3)?.as_str(),
                    line: cap.get(4)?.as_str(),
                })
            })
            .collect()
    }

    /// Print the error chain to stderr, then, if a backtrace was captured
    /// (`RUST_BACKTRACE=1`), where in this crate the error was raised.
    pub fn show_snafu_error<E>(e: E)
    where
        E: ErrorCompat + AsErrorSource,
    {
        for (depth, cause) in ErrorCompat::iter_chain(&e).enumerate() {
            match depth {
                0 => eprintln!("error: {cause}"),
                _ => eprintln!("{:>width$}caused by: {cause}", "", width = depth * 2),
            }
        }
        let Some(bt) = ErrorCompat::backtrace(&e) else {
            return;
        };
        let bt = format!("{bt:?}");
        let frames = own_frames(&bt);
        if !frames.is_empty() {
            eprintln!("raised at:");
        }
        for f in frames {
            eprintln!("    {} ({}:{})", f.func, f.file, f.line);
        }
    }

    #[test]
    fn test_own_frames() {
        let bt = r#"Backtrace [{ fn: "std::backtrace::Backtrace::capture", file: "/rustc/abc/library/std/src/backtrace.rs", line: 296 }, { fn: "<T as snafu::IntoError>::into_error", file: "./src/vcf.rs", line: 84 }, { fn: "ancwrangle::vcf::open_reader", file: "./src/vcf.rs", line: 85 }, { fn: "rust_htslib::bcf::Reader::from_path", file: "/home/u/.cargo/registry/src/rust-htslib-1.0.1/src/bcf/mod.rs", line: 120 }, { fn: "vcfutils::main_entry", file: "src/bin/vcfutils.rs", line: 126 }]"#;
        assert_eq!(
            own_frames(bt),
            vec![
                Frame {
                    func: "ancwrangle::vcf::open_reader",
                    file: "src/vcf.rs",
                    line: "85"
                },
                Frame {
                    func: "vcfutils::main_entry",
                    file: "src/bin/vcfutils.rs",
                    line: "126"
                },
            ]
        );
    }
}
