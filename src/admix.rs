//! Input files for visualizing ADMIXTURE runs with pong
pub mod ind2pop;
pub mod pong;
