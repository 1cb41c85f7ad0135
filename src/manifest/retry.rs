//! Retry subsets: narrower manifests for resubmitting failed samples.
//!
//! A subset keeps the exact identifier spelling of the original manifest, so
//! the invoker derives the same input and output paths as the full run did.

use super::{write_lines, Manifest};
use crate::error::TaskError;
use log::info;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrySubset {
    samples: Vec<String>,
}

impl RetrySubset {
    /// Subset from sample names. Unknown names are rejected; the result follows
    /// the original manifest order and repeated names collapse.
    pub fn from_names<S: AsRef<str>>(original: &Manifest, names: &[S]) -> Result<Self, TaskError> {
        for name in names {
            let name = name.as_ref();
            if !original.contains(name) {
                return Err(TaskError::UnknownSample {
                    name: name.to_string(),
                });
            }
        }
        let samples = original
            .samples()
            .iter()
            .filter(|s| names.iter().any(|n| n.as_ref() == s.as_str()))
            .cloned()
            .collect();
        Ok(RetrySubset { samples })
    }

    /// Subset from 1-based array indices of the original run.
    pub fn from_indices(original: &Manifest, indices: &[usize]) -> Result<Self, TaskError> {
        let names = indices
            .iter()
            .map(|&i| original.resolve(i).map(|s| s.name))
            .collect::<Result<Vec<_>, _>>()?;
        Self::from_names(original, &names)
    }

    /// Samples whose `<output_root>/<name>/<marker>` does not exist.
    ///
    /// `marker` may contain `{name}`, e.g. `{name}_genefamilies.tsv`.
    pub fn incomplete(original: &Manifest, output_root: &Path, marker: &str) -> Self {
        let samples: Vec<String> = original
            .samples()
            .iter()
            .filter(|name| {
                let expected = output_root
                    .join(name.as_str())
                    .join(marker.replace("{name}", name));
                !expected.exists()
            })
            .cloned()
            .collect();
        info!(
            "{} of {} sample(s) lack {}",
            samples.len(),
            original.len(),
            marker
        );
        RetrySubset { samples }
    }

    pub fn samples(&self) -> &[String] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Writes the subset as a plain manifest file.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), TaskError> {
        write_lines(path.as_ref(), &self.samples)
    }

    /// Loadable manifest view of the subset. Empty subsets have none.
    pub fn to_manifest(&self, location: &str) -> Result<Manifest, TaskError> {
        Manifest::from_samples(location, self.samples.iter().cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn original() -> Manifest {
        Manifest::from_samples("full", ["S1", "S2", "S3", "S4"]).unwrap()
    }

    #[test]
    fn test_from_names_keeps_original_order() {
        let subset = RetrySubset::from_names(&original(), &["S4", "S2", "S4"]).unwrap();
        assert_eq!(subset.samples(), &["S2", "S4"]);
    }

    #[test]
    fn test_unknown_name_rejected() {
        let result = RetrySubset::from_names(&original(), &["S2", "s2"]);
        assert!(matches!(result, Err(TaskError::UnknownSample { name }) if name == "s2"));
    }

    #[test]
    fn test_from_indices() {
        let subset = RetrySubset::from_indices(&original(), &[3, 1]).unwrap();
        assert_eq!(subset.samples(), &["S1", "S3"]);

        let out_of_range = RetrySubset::from_indices(&original(), &[5]);
        assert!(matches!(
            out_of_range,
            Err(TaskError::IndexOutOfRange { index: 5, len: 4 })
        ));
    }

    #[test]
    fn test_incomplete_uses_marker() {
        let dir = tempdir().unwrap();
        for name in ["S1", "S3"] {
            let sample_dir = dir.path().join(name);
            fs::create_dir_all(&sample_dir).unwrap();
            fs::write(sample_dir.join(format!("{}_genefamilies.tsv", name)), b"").unwrap();
        }
        // S2 has a directory but no finished table.
        fs::create_dir_all(dir.path().join("S2")).unwrap();

        let subset = RetrySubset::incomplete(&original(), dir.path(), "{name}_genefamilies.tsv");
        assert_eq!(subset.samples(), &["S2", "S4"]);
    }

    #[test]
    fn test_written_subset_resolves_like_original() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("retry.txt");
        let subset = RetrySubset::from_names(&original(), &["S2"]).unwrap();
        subset.write(&path).unwrap();

        let retry = Manifest::from_file(&path).unwrap();
        assert_eq!(retry.resolve(1).unwrap().name, original().resolve(2).unwrap().name);
    }

    #[test]
    fn test_empty_subset_has_no_manifest() {
        let subset = RetrySubset::from_names::<&str>(&original(), &[]).unwrap();
        assert!(subset.is_empty());
        assert!(matches!(
            subset.to_manifest("retry"),
            Err(TaskError::ManifestUnavailable { .. })
        ));
    }
}
