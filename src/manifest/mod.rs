//! Sample manifests and the index resolver.
//!
//! A manifest is the ordered list of sample identifiers an array job is
//! submitted over. Position `i` (1-based, as schedulers number array tasks)
//! always maps to the same identifier for as long as the manifest file is left
//! untouched, which is what makes resubmitting a single index safe.

pub mod retry;

pub use retry::RetrySubset;

use crate::error::TaskError;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Where the ordered sample list comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestSource {
    /// Plain text file, one identifier per line.
    File(PathBuf),
    /// Files matching `pattern`; the identifier is the file name minus `suffix`.
    Glob { pattern: String, suffix: String },
}

impl ManifestSource {
    /// Resolves relative locations against `root`.
    pub fn rooted(&self, root: &Path) -> ManifestSource {
        match self {
            ManifestSource::File(path) => ManifestSource::File(root.join(path)),
            ManifestSource::Glob { pattern, suffix } => ManifestSource::Glob {
                pattern: root.join(pattern).to_string_lossy().into_owned(),
                suffix: suffix.clone(),
            },
        }
    }

    fn describe(&self) -> String {
        match self {
            ManifestSource::File(path) => path.display().to_string(),
            ManifestSource::Glob { pattern, .. } => format!("glob '{}'", pattern),
        }
    }
}

/// One resolved manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleRef {
    /// 1-based position in the manifest.
    pub index: usize,
    pub name: String,
}

/// Ordered, duplicate-free list of sample identifiers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    location: String,
    samples: Vec<String>,
}

impl Manifest {
    /// Builds a manifest from identifiers already in memory.
    ///
    /// Fails with `ManifestUnavailable` when `samples` is empty, with
    /// `InvalidSampleName` when an identifier is not a single path component
    /// and with `DuplicateSample` when an identifier repeats.
    pub fn from_samples<I, S>(location: impl Into<String>, samples: I) -> Result<Self, TaskError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let location = location.into();
        let samples: Vec<String> = samples.into_iter().map(Into::into).collect();

        if samples.is_empty() {
            return Err(TaskError::ManifestUnavailable {
                location,
                reason: "no sample entries".to_string(),
            });
        }

        let mut seen: HashMap<&str, usize> = HashMap::with_capacity(samples.len());
        for (i, name) in samples.iter().enumerate() {
            if let Err(reason) = check_sample_name(name) {
                return Err(TaskError::InvalidSampleName {
                    location,
                    name: name.clone(),
                    reason: reason.to_string(),
                });
            }
            if let Some(first) = seen.insert(name.as_str(), i + 1) {
                return Err(TaskError::DuplicateSample {
                    location,
                    name: name.clone(),
                    first,
                    second: i + 1,
                });
            }
        }

        Ok(Manifest { location, samples })
    }

    /// Reads a line-oriented manifest. Surrounding whitespace is trimmed and
    /// blank lines are ignored; they do not consume an index.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, TaskError> {
        let path = path.as_ref();
        let location = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|e| TaskError::ManifestUnavailable {
            location: location.clone(),
            reason: e.to_string(),
        })?;

        let samples = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string);

        Self::from_samples(location, samples)
    }

    /// Lists files matching `pattern` and strips `suffix` from each file name.
    ///
    /// Matches are sorted by the raw bytes of their file names rather than
    /// relying on the listing order, so the index mapping does not depend on
    /// locale collation. Names that do not end in `suffix` are skipped.
    pub fn from_glob(pattern: &str, suffix: &str) -> Result<Self, TaskError> {
        let mut names = Vec::new();
        for entry in glob::glob(pattern)? {
            let path = match entry {
                Ok(path) => path,
                Err(e) => {
                    warn!("Skipping unreadable glob match: {}", e);
                    continue;
                }
            };
            if !path.is_file() {
                continue;
            }
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!("Skipping non UTF-8 file name: {}", path.display());
                continue;
            };
            match file_name.strip_suffix(suffix) {
                Some(name) if !name.is_empty() => names.push(name.to_string()),
                _ => warn!(
                    "Skipping {}: file name does not end with '{}'",
                    path.display(),
                    suffix
                ),
            }
        }

        names.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
        debug!("Glob '{}' produced {} sample(s)", pattern, names.len());

        Self::from_samples(format!("glob '{}'", pattern), names)
    }

    pub fn load(source: &ManifestSource) -> Result<Self, TaskError> {
        match source {
            ManifestSource::File(path) => Self::from_file(path),
            ManifestSource::Glob { pattern, suffix } => {
                Self::from_glob(pattern, suffix).map_err(|e| match e {
                    TaskError::ManifestUnavailable { reason, .. } => {
                        TaskError::ManifestUnavailable {
                            location: source.describe(),
                            reason,
                        }
                    }
                    other => other,
                })
            }
        }
    }

    /// Maps a 1-based scheduler index to its sample.
    pub fn resolve(&self, index: usize) -> Result<SampleRef, TaskError> {
        if index == 0 || index > self.samples.len() {
            return Err(TaskError::IndexOutOfRange {
                index,
                len: self.samples.len(),
            });
        }
        Ok(SampleRef {
            index,
            name: self.samples[index - 1].clone(),
        })
    }

    /// 1-based position of `name`, if present.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.samples.iter().position(|s| s == name).map(|i| i + 1)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    /// All entries with their indices, in manifest order.
    pub fn iter(&self) -> impl Iterator<Item = SampleRef> + '_ {
        self.samples.iter().enumerate().map(|(i, name)| SampleRef {
            index: i + 1,
            name: name.clone(),
        })
    }

    /// Writes one identifier per line, newline-terminated.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), TaskError> {
        write_lines(path.as_ref(), &self.samples)
    }
}

/// Identifiers become directory and file names under fixed roots, so each one
/// must be a single plain path component.
fn check_sample_name(name: &str) -> Result<(), &'static str> {
    if name == "." || name == ".." {
        return Err("refers to a directory itself");
    }
    if name.contains(&['/', '\\'][..]) {
        return Err("contains a path separator");
    }
    if name.contains('\0') {
        return Err("contains a NUL byte");
    }
    Ok(())
}

pub(crate) fn write_lines(path: &Path, lines: &[String]) -> Result<(), TaskError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    for line in lines {
        writeln!(writer, "{}", line)?;
    }
    writer.flush()?;
    Ok(())
}
