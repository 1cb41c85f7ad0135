//! Error taxonomy for a single array task.
//!
//! Every variant is local to one task: nothing here is meant to abort sibling
//! tasks, and the scheduler only ever sees the exit code from [`TaskError::exit_code`].

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TaskError {
    #[error("manifest {location} is unavailable: {reason}")]
    ManifestUnavailable { location: String, reason: String },

    #[error("sample '{name}' appears twice in manifest {location} (entries {first} and {second})")]
    DuplicateSample {
        location: String,
        name: String,
        first: usize,
        second: usize,
    },

    #[error("sample '{name}' in manifest {location} is not a plain directory name: {reason}")]
    InvalidSampleName {
        location: String,
        name: String,
        reason: String,
    },

    #[error("index {index} is outside the manifest range 1..={len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("invalid array index '{value}' from {origin}")]
    InvalidIndex { value: String, origin: String },

    #[error("sample '{name}' is not part of the original manifest")]
    UnknownSample { name: String },

    #[error("sample '{sample}' (index {index}): input file {} is missing", path.display())]
    InputFileMissing {
        sample: String,
        index: usize,
        path: PathBuf,
    },

    #[error("sample '{sample}' (index {index}): {tool} failed with {}", describe_code(*code))]
    ToolExecutionFailed {
        sample: String,
        index: usize,
        tool: String,
        code: Option<i32>,
    },

    #[error("sample '{sample}' (index {index}): failed to launch {tool}: {source}")]
    ToolLaunch {
        sample: String,
        index: usize,
        tool: String,
        source: io::Error,
    },

    #[error("sample '{sample}' (index {index}): cannot prepare {}: {source}", path.display())]
    OutputUnavailable {
        sample: String,
        index: usize,
        path: PathBuf,
        source: io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("glob pattern error: {0}")]
    Pattern(#[from] glob::PatternError),
}

fn describe_code(code: Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {}", code),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl TaskError {
    /// Process exit code reported to the scheduler for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            TaskError::ToolExecutionFailed { code, .. } => match code {
                Some(code) if (1..=255).contains(code) => *code as u8,
                _ => 1,
            },
            TaskError::ManifestUnavailable { .. }
            | TaskError::DuplicateSample { .. }
            | TaskError::InvalidSampleName { .. } => 2,
            TaskError::IndexOutOfRange { .. } | TaskError::InvalidIndex { .. } => 3,
            TaskError::InputFileMissing { .. } => 4,
            TaskError::Config(_) => 5,
            _ => 1,
        }
    }
}
