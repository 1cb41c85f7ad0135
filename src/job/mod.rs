//! Job configuration and the external tool invoker.

pub mod command;
pub mod invoker;
pub mod layout;

pub use command::ToolCommand;
pub use invoker::{JobInvoker, JobOutcome};
pub use layout::InputLayout;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// External tool driven by an array task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Host read decontamination.
    Kneaddata,
    /// Functional profiling.
    Humann,
}

impl ToolKind {
    pub fn default_executable(self) -> &'static str {
        match self {
            ToolKind::Kneaddata => "kneaddata",
            ToolKind::Humann => "humann",
        }
    }

    pub fn default_layout(self) -> InputLayout {
        match self {
            ToolKind::Kneaddata => InputLayout::default_paired(),
            ToolKind::Humann => InputLayout::default_merged(),
        }
    }
}

fn default_threads() -> usize {
    8
}

/// Everything needed to turn a sample into a tool invocation.
///
/// Both modes share this one type: kneaddata on paired reads, and humann on a
/// merged file with `viral_profiling` switching on the extra MetaPhlAn pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    pub tool: ToolKind,
    /// Tool binary; defaults to the tool's own name resolved through `PATH`.
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// Argv prefix placed before the executable, e.g. `["conda", "run", "-n", "kd"]`.
    #[serde(default)]
    pub launcher: Vec<String>,
    /// Prepended to the child's `PATH` (an activated environment's `bin/`).
    #[serde(default)]
    pub bin_dir: Option<PathBuf>,
    #[serde(default)]
    pub layout: Option<InputLayout>,
    #[serde(default = "default_threads")]
    pub threads: usize,
    pub reference_db: PathBuf,
    #[serde(default)]
    pub protein_db: Option<PathBuf>,
    #[serde(default)]
    pub viral_profiling: bool,
    #[serde(default)]
    pub metaphlan_options: Vec<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl JobConfig {
    pub fn new(tool: ToolKind, reference_db: impl Into<PathBuf>) -> Self {
        JobConfig {
            tool,
            executable: None,
            launcher: Vec::new(),
            bin_dir: None,
            layout: None,
            threads: default_threads(),
            reference_db: reference_db.into(),
            protein_db: None,
            viral_profiling: false,
            metaphlan_options: Vec::new(),
            extra_args: Vec::new(),
        }
    }

    pub fn layout(&self) -> InputLayout {
        self.layout
            .clone()
            .unwrap_or_else(|| self.tool.default_layout())
    }

    pub fn executable(&self) -> PathBuf {
        self.executable
            .clone()
            .unwrap_or_else(|| PathBuf::from(self.tool.default_executable()))
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.threads == 0 {
            return Err("threads must be at least 1".to_string());
        }
        let layout = self.layout();
        layout.validate()?;
        match self.tool {
            ToolKind::Humann if layout.is_paired() => {
                Err("humann takes a single merged input, not a paired layout".to_string())
            }
            ToolKind::Kneaddata if self.viral_profiling => {
                Err("viral_profiling is only available for humann".to_string())
            }
            ToolKind::Kneaddata if self.protein_db.is_some() => {
                Err("protein_db is only available for humann".to_string())
            }
            ToolKind::Kneaddata if !self.metaphlan_options.is_empty() => {
                Err("metaphlan_options is only available for humann".to_string())
            }
            _ => Ok(()),
        }
    }
}
