//! File-naming conventions that turn a sample name into its input files.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const NAME_PLACEHOLDER: &str = "{name}";

/// How a sample's reads are laid out on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InputLayout {
    /// Forward and reverse files, e.g. `{name}_1.fq.gz` / `{name}_2.fq.gz`.
    Paired { forward: String, reverse: String },
    /// A single (possibly merged) file, e.g. `{name}.fastq`.
    Merged { pattern: String },
}

impl InputLayout {
    pub fn default_paired() -> Self {
        InputLayout::Paired {
            forward: "{name}_1.fq.gz".to_string(),
            reverse: "{name}_2.fq.gz".to_string(),
        }
    }

    pub fn default_merged() -> Self {
        InputLayout::Merged {
            pattern: "{name}.fastq".to_string(),
        }
    }

    pub fn is_paired(&self) -> bool {
        matches!(self, InputLayout::Paired { .. })
    }

    fn templates(&self) -> Vec<&str> {
        match self {
            InputLayout::Paired { forward, reverse } => vec![forward.as_str(), reverse.as_str()],
            InputLayout::Merged { pattern } => vec![pattern.as_str()],
        }
    }

    /// Templates lacking `{name}` would map every sample to the same file.
    pub fn validate(&self) -> Result<(), String> {
        for template in self.templates() {
            if !template.contains(NAME_PLACEHOLDER) {
                return Err(format!(
                    "input template '{}' does not contain {}",
                    template, NAME_PLACEHOLDER
                ));
            }
        }
        Ok(())
    }

    /// Input paths for `sample` under `input_dir`, forward file first.
    pub fn input_paths(&self, input_dir: &Path, sample: &str) -> Vec<PathBuf> {
        self.templates()
            .into_iter()
            .map(|t| input_dir.join(t.replace(NAME_PLACEHOLDER, sample)))
            .collect()
    }
}
