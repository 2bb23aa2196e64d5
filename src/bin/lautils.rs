#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![cfg_attr(not(test), warn(clippy::expect_used))]

use std::path::PathBuf;

use ancwrangle::{
    bed::{collect::collect_beds, global::global_ancestry},
    rfmix::msp::MspFile,
    utils::{error::show_snafu_error, logging::init_logger},
};
use clap::{Parser, Subcommand};
use log::info;
use snafu::prelude::*;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(transparent)]
    Collect {
        // non leaf
        #[snafu(backtrace)]
        source: ancwrangle::bed::collect::Error,
    },
    #[snafu(transparent)]
    Global {
        // non leaf
        #[snafu(backtrace)]
        source: ancwrangle::bed::global::Error,
    },
    #[snafu(transparent)]
    Msp {
        // non leaf
        #[snafu(backtrace)]
        source: ancwrangle::rfmix::msp::Error,
    },
}
type Result<T> = std::result::Result<T, Error>;

fn main() {
    if let Err(e) = main_entry() {
        show_snafu_error(e);
        std::process::exit(-1);
    }
}

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Print debug messages
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    /// Only print warnings and errors
    #[arg(short = 'q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Concatenate per-chromosome haplotype BED files into one file per haplotype
    #[command(after_help = concat!(
        "Example:\n",
        "\tlautils collect-beds --input-dirs chr1_beds chr2_beds --outdir beds\n",
        "\n\tfiles are matched by name up to the first '.', e.g. chr1_beds/S1_0.bed\n",
        "\tand chr2_beds/S1_0.chr2.bed both go to beds/S1_0.bed"
    ))]
    CollectBeds {
        /// Directories holding per-chromosome BED files
        #[arg(short = 'i', long, required = true, num_args = 1..)]
        input_dirs: Vec<PathBuf>,

        /// Output directory, created if missing
        #[arg(short = 'o', long, required = true)]
        outdir: PathBuf,
    },

    /// Compute global ancestry proportions from paired haplotype BED files
    #[command(after_help = concat!(
        "Example:\n",
        "\tlautils global-ancestry --bed-dir beds --out global_ancestry.csv\n",
        "\n\tNOTE: each sample needs {sample}_0.bed and {sample}_1.bed with at least\n",
        "\tthe columns spos, epos and ancestry"
    ))]
    GlobalAncestry {
        /// Directory of {sample}_{hap}.bed files
        #[arg(short = 'b', long, required = true)]
        bed_dir: PathBuf,

        /// Output CSV file
        #[arg(short = 'o', long, required = true)]
        out: PathBuf,
    },

    /// Convert an RFMix/gnomix .msp file into one BED file per haplotype
    #[command(after_help = concat!(
        "Example:\n",
        "\tlautils msp-to-bed --msp chr22.msp.tsv --outdir chr22_beds --merge"
    ))]
    MspToBed {
        /// Input .msp file
        #[arg(short = 'l', long, required = true)]
        msp: PathBuf,

        /// Output directory, created if missing
        #[arg(short = 'o', long, required = true)]
        outdir: PathBuf,

        /// Join adjacent segments of the same ancestry
        #[arg(short = 'm', long, default_value_t = false)]
        merge: bool,
    },
}

fn main_entry() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose, cli.quiet);
    match cli.command {
        Commands::CollectBeds { input_dirs, outdir } => {
            collect_beds(&input_dirs, &outdir)?;
        }
        Commands::GlobalAncestry { bed_dir, out } => {
            global_ancestry(&bed_dir, &out)?;
        }
        Commands::MspToBed { msp, outdir, merge } => {
            let msp = MspFile::from_path(&msp)?;
            let beds = msp.to_haplotype_beds(&outdir, merge)?;
            info!(
                "{} BED files of {} samples written to {}",
                beds.len(),
                msp.samples().len(),
                outdir.display()
            );
        }
    }
    Ok(())
}
