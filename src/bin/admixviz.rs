#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![cfg_attr(not(test), warn(clippy::expect_used))]

use std::path::PathBuf;

use ancwrangle::{
    admix::{ind2pop::ind2pop, pong::make_pong_filemap},
    utils::{error::show_snafu_error, logging::init_logger},
};
use clap::{Parser, Subcommand};
use snafu::prelude::*;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(transparent)]
    Ind2Pop {
        // non leaf
        #[snafu(backtrace)]
        source: ancwrangle::admix::ind2pop::Error,
    },
    #[snafu(transparent)]
    Pong {
        // non leaf
        #[snafu(backtrace)]
        source: ancwrangle::admix::pong::Error,
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
    /// Write pong ind2pop.txt and pop_order.txt from sample metadata
    #[command(after_help = concat!(
        "Example:\n",
        "\tadmixviz ind2pop --popinfo popinfo.csv --sample-order data.fam \\\n",
        "\t\t--covariate Population --sample-id-col IID --outdir pong_input\n",
        "\n\tNOTE: the sample order file is space separated without header and has\n",
        "\tthe sample IDs in its 2nd column, like a PLINK .fam file"
    ))]
    Ind2pop {
        /// Population info CSV file with header
        #[arg(short = 'p', long, required = true)]
        popinfo: PathBuf,

        /// Sample order file (e.g. the .fam file used to run ADMIXTURE)
        #[arg(short = 's', long, required = true)]
        sample_order: PathBuf,

        /// Column of the population info file used as population label
        #[arg(short = 'c', long, required = true)]
        covariate: String,

        /// Column of the population info file holding sample IDs
        #[arg(short = 'i', long, required = true)]
        sample_id_col: String,

        /// Output directory
        #[arg(short = 'o', long, default_value = ".")]
        outdir: PathBuf,
    },

    /// Write a pong file map for the ADMIXTURE Q files of a directory
    #[command(after_help = concat!(
        "Example:\n",
        "\tadmixviz pong-filemap --qfiles-dir ./qfiles --prefix admix --out filemap.txt\n",
        "\n\tQ files are expected to be named <prefix>.<K>.Q"
    ))]
    PongFilemap {
        /// Directory of ADMIXTURE Q files
        #[arg(short = 'd', long, required = true)]
        qfiles_dir: PathBuf,

        /// Name prefix of the Q files to include
        #[arg(short = 'p', long, required = true)]
        prefix: String,

        /// Output file map
        #[arg(short = 'o', long, required = true)]
        out: PathBuf,
    },
}

fn main_entry() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose, cli.quiet);
    match cli.command {
        Commands::Ind2pop {
            popinfo,
            sample_order,
            covariate,
            sample_id_col,
            outdir,
        } => {
            ind2pop(&popinfo, &sample_order, &covariate, &sample_id_col, &outdir)?;
        }
        Commands::PongFilemap {
            qfiles_dir,
            prefix,
            out,
        } => {
            make_pong_filemap(&qfiles_dir, &prefix, &out)?;
        }
    }
    Ok(())
}
