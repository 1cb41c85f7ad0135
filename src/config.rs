//! Run configuration: one JSON file per deployment, plus environment overrides.
//!
//! Precedence is command line, then environment, then the file. Relative
//! paths are resolved against the work root.

use crate::error::TaskError;
use crate::job::JobConfig;
use crate::manifest::ManifestSource;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Overrides the manifest file, e.g. to point a resubmission at a retry subset.
pub const MANIFEST_ENV: &str = "SEQARRAY_MANIFEST";
/// Root for relative input and output locations.
pub const WORK_ROOT_ENV: &str = "SEQARRAY_WORK_ROOT";

/// Array index variables, checked in this order (LSF, Slurm, PBS, SGE).
pub const INDEX_ENV_VARS: [&str; 4] = [
    "LSB_JOBINDEX",
    "SLURM_ARRAY_TASK_ID",
    "PBS_ARRAY_INDEX",
    "SGE_TASK_ID",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    #[serde(default)]
    pub work_root: Option<PathBuf>,
    pub manifest: ManifestSource,
    pub input_dir: PathBuf,
    pub output_root: PathBuf,
    /// Defaults to `<output_root>/logs`.
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    pub job: JobConfig,
}

/// Values that win over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub manifest: Option<PathBuf>,
    pub work_root: Option<PathBuf>,
    pub threads: Option<usize>,
}

impl Overrides {
    /// Overrides from the environment; `lookup` is normally `std::env::var`.
    pub fn from_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Overrides {
            manifest: non_empty(MANIFEST_ENV).map(PathBuf::from),
            work_root: non_empty(WORK_ROOT_ENV).map(PathBuf::from),
            threads: None,
        }
    }

    /// Layers `self` (higher priority) over `lower`.
    pub fn or(self, lower: Overrides) -> Overrides {
        Overrides {
            manifest: self.manifest.or(lower.manifest),
            work_root: self.work_root.or(lower.work_root),
            threads: self.threads.or(lower.threads),
        }
    }
}

impl RunConfig {
    pub fn from_json(text: &str) -> Result<Self, TaskError> {
        serde_json::from_str(text).map_err(|e| TaskError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, TaskError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| {
            TaskError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        debug!("Loaded configuration from {}", path.display());
        Self::from_json(&text)
    }

    /// Applies overrides and resolves every relative path against the work root.
    pub fn resolve(mut self, overrides: Overrides) -> Result<Self, TaskError> {
        if let Some(root) = overrides.work_root {
            self.work_root = Some(root);
        }
        if let Some(manifest) = overrides.manifest {
            self.manifest = ManifestSource::File(manifest);
        }
        if let Some(threads) = overrides.threads {
            self.job.threads = threads;
        }

        if let Some(root) = self.work_root.clone() {
            if let ManifestSource::File(_) = self.manifest {
                self.manifest = self.manifest.rooted(&root);
            }
            self.input_dir = root.join(&self.input_dir);
            self.output_root = root.join(&self.output_root);
            self.log_dir = self.log_dir.map(|dir| root.join(dir));
            self.job.reference_db = root.join(&self.job.reference_db);
            self.job.protein_db = self.job.protein_db.map(|db| root.join(db));
        }

        // Glob patterns are relative to the input directory.
        if let ManifestSource::Glob { .. } = self.manifest {
            self.manifest = self.manifest.rooted(&self.input_dir);
        }

        self.job.validate().map_err(TaskError::Config)?;
        Ok(self)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.output_root.join("logs"))
    }
}

/// The task's array index from the first scheduler variable that is set.
///
/// `Ok(None)` means no scheduler variable is present at all.
pub fn index_from_env<F>(lookup: F) -> Result<Option<usize>, TaskError>
where
    F: Fn(&str) -> Option<String>,
{
    for key in INDEX_ENV_VARS {
        if let Some(value) = lookup(key) {
            return parse_index(&value, key).map(Some);
        }
    }
    Ok(None)
}

pub fn parse_index(value: &str, origin: &str) -> Result<usize, TaskError> {
    value
        .trim()
        .parse::<usize>()
        .map_err(|_| TaskError::InvalidIndex {
            value: value.to_string(),
            origin: origin.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::ToolKind;
    use std::collections::HashMap;

    const CONFIG: &str = r#"{
        "work_root": "/work3/project",
        "manifest": {"file": "samples.txt"},
        "input_dir": "raw",
        "output_root": "kneaddata_output",
        "job": {
            "tool": "kneaddata",
            "reference_db": "db/hg37",
            "threads": 12,
            "extra_args": ["--run-trim-repetitive"]
        }
    }"#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_paths_resolve_against_work_root() {
        let config = RunConfig::from_json(CONFIG)
            .unwrap()
            .resolve(Overrides::default())
            .unwrap();
        assert_eq!(
            config.manifest,
            ManifestSource::File(PathBuf::from("/work3/project/samples.txt"))
        );
        assert_eq!(config.input_dir, PathBuf::from("/work3/project/raw"));
        assert_eq!(
            config.log_dir(),
            PathBuf::from("/work3/project/kneaddata_output/logs")
        );
        assert_eq!(config.job.tool, ToolKind::Kneaddata);
        assert_eq!(config.job.threads, 12);
    }

    #[test]
    fn test_environment_overrides_manifest_and_root() {
        let overrides = Overrides::from_env(env(&[
            (MANIFEST_ENV, "retry_samples.txt"),
            (WORK_ROOT_ENV, "/scratch/run2"),
        ]));
        let config = RunConfig::from_json(CONFIG)
            .unwrap()
            .resolve(overrides)
            .unwrap();
        assert_eq!(
            config.manifest,
            ManifestSource::File(PathBuf::from("/scratch/run2/retry_samples.txt"))
        );
        assert_eq!(
            config.output_root,
            PathBuf::from("/scratch/run2/kneaddata_output")
        );
    }

    #[test]
    fn test_cli_overrides_beat_environment() {
        let cli = Overrides {
            manifest: Some(PathBuf::from("/abs/cli.txt")),
            threads: Some(4),
            ..Overrides::default()
        };
        let from_env = Overrides::from_env(env(&[(MANIFEST_ENV, "env.txt")]));
        let config = RunConfig::from_json(CONFIG)
            .unwrap()
            .resolve(cli.or(from_env))
            .unwrap();
        // Absolute paths survive the join with the work root.
        assert_eq!(
            config.manifest,
            ManifestSource::File(PathBuf::from("/abs/cli.txt"))
        );
        assert_eq!(config.job.threads, 4);
    }

    #[test]
    fn test_glob_manifest_relative_to_input_dir() {
        let text = CONFIG.replace(
            r#"{"file": "samples.txt"}"#,
            r#"{"glob": {"pattern": "*_1.fq.gz", "suffix": "_1.fq.gz"}}"#,
        );
        let config = RunConfig::from_json(&text)
            .unwrap()
            .resolve(Overrides::default())
            .unwrap();
        assert_eq!(
            config.manifest,
            ManifestSource::Glob {
                pattern: "/work3/project/raw/*_1.fq.gz".to_string(),
                suffix: "_1.fq.gz".to_string(),
            }
        );
    }

    #[test]
    fn test_invalid_job_rejected() {
        let text = CONFIG.replace("\"threads\": 12", "\"threads\": 0");
        let result = RunConfig::from_json(&text)
            .unwrap()
            .resolve(Overrides::default());
        assert!(matches!(result, Err(TaskError::Config(_))));

        let unknown = CONFIG.replace("\"input_dir\"", "\"inputs\"");
        assert!(matches!(
            RunConfig::from_json(&unknown),
            Err(TaskError::Config(_))
        ));
    }

    #[test]
    fn test_index_from_scheduler_variables() {
        assert_eq!(index_from_env(env(&[])).unwrap(), None);
        assert_eq!(
            index_from_env(env(&[("SLURM_ARRAY_TASK_ID", "7")])).unwrap(),
            Some(7)
        );
        assert_eq!(
            index_from_env(env(&[("LSB_JOBINDEX", "3"), ("SLURM_ARRAY_TASK_ID", "9")])).unwrap(),
            Some(3)
        );
        assert!(matches!(
            index_from_env(env(&[("LSB_JOBINDEX", "abc")])),
            Err(TaskError::InvalidIndex { .. })
        ));
    }
}
