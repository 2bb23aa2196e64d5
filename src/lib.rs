#![cfg_attr(not(test), warn(clippy::unwrap_used, clippy::expect_used))]
pub mod admix;
pub mod bed;
pub mod rfmix;
pub mod utils;
pub mod vcf;
