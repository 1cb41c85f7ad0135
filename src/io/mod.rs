//! Input preparation ahead of an array run.

pub mod archive;
pub mod fastq;

pub use archive::extract_all;
pub use fastq::{merge_lanes, merge_pairs, PairSummary};
