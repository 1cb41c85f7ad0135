//! Job-array plumbing for metagenomics pipelines on a shared HPC scheduler.
//!
//! An array task turns its scheduler index into a sample through a
//! [`manifest::Manifest`], then [`job::JobInvoker`] prepares the sample's
//! output directory and runs kneaddata or HUMAnN on it. Failed samples are
//! rerun by submitting a [`manifest::RetrySubset`] through the same path.

pub mod cli;
pub mod config;
pub mod error;
pub mod io;
pub mod job;
pub mod manifest;
pub mod pipeline;
pub mod task;
pub mod utils;

pub use error::TaskError;
