#![cfg_attr(not(test), warn(clippy::unwrap_used))]
#![cfg_attr(not(test), warn(clippy::expect_used))]

use std::path::PathBuf;

use ancwrangle::{
    utils::{error::show_snafu_error, logging::init_logger},
    vcf::{
        mask::{default_output, mask_vcf_by_ancestry, UncoveredPolicy},
        split::split_vcf,
    },
};
use clap::{Parser, Subcommand};
use log::info;
use snafu::prelude::*;

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(transparent)]
    Mask {
        // non leaf
        #[snafu(backtrace)]
        source: ancwrangle::vcf::mask::Error,
    },
    #[snafu(transparent)]
    Split {
        // non leaf
        #[snafu(backtrace)]
        source: ancwrangle::vcf::split::Error,
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
    /// Mask genotypes of haplotypes whose local ancestry differs from the target ancestry
    #[command(after_help = concat!(
        "Example:\n",
        "\tvcfutils mask --ancestry EUR --vcf chr22.vcf.gz --msp chr22.msp.tsv --out chr22.EUR.vcf.gz\n",
        "\n\tNOTE: the VCF has to hold a single chromosome and every VCF sample needs\n",
        "\t<sample>.0 and <sample>.1 columns in the msp file"
    ))]
    Mask {
        /// Ancestry to keep, as a label from the msp header (e.g. EUR) or an integer code
        #[arg(short = 'a', long, required = true)]
        ancestry: String,

        /// Input VCF/BCF with phased genotypes of one chromosome
        #[arg(short = 'i', long, required = true)]
        vcf: PathBuf,

        /// RFMix/gnomix .msp file
        #[arg(short = 'l', long, required = true)]
        msp: PathBuf,

        /// Output file; format follows the extension (.bcf, .vcf.gz or .vcf).
        /// If not set, <input stem>.<ancestry>.vcf.gz next to the input
        #[arg(short = 'o', long)]
        out: Option<PathBuf>,

        /// What to do with variants not covered by any msp segment
        #[arg(short = 'u', long, value_enum, default_value_t = UncoveredPolicy::Error)]
        uncovered: UncoveredPolicy,
    },

    /// Split a single-chromosome VCF into regions with the same number of variants
    #[command(after_help = concat!(
        "Example:\n",
        "\tvcfutils split --vcf chr22.vcf.gz --out-prefix split/chr22 --n-split 10\n",
        "\n\twrites split/chr22_1.vcf.gz ... split/chr22_10.vcf.gz"
    ))]
    Split {
        /// Input VCF/BCF holding a single chromosome
        #[arg(short = 'i', long, required = true)]
        vcf: PathBuf,

        /// Prefix of the output files, {prefix}_{i}.vcf.gz
        #[arg(short = 'o', long, required = true)]
        out_prefix: PathBuf,

        /// Number of output files
        #[arg(short = 'n', long, required = true)]
        n_split: usize,
    },
}

fn main_entry() -> Result<()> {
    let cli = Cli::parse();
    init_logger(cli.verbose, cli.quiet);
    match cli.command {
        Commands::Mask {
            ancestry,
            vcf,
            msp,
            out,
            uncovered,
        } => {
            let out = out.unwrap_or_else(|| default_output(&vcf, &ancestry));
            let stats = mask_vcf_by_ancestry(&vcf, &msp, &ancestry, &out, uncovered)?;
            info!(
                "{} records read, {} written, {} skipped",
                stats.records, stats.written, stats.skipped
            );
        }
        Commands::Split {
            vcf,
            out_prefix,
            n_split,
        } => {
            let outputs = split_vcf(&vcf, &out_prefix, n_split)?;
            info!("VCF split into {} files", outputs.len());
        }
    }
    Ok(())
}
