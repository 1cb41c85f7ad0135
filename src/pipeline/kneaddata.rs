//! Read-count summary across kneaddata runs.
//!
//! Each sample directory under the kneaddata output root holds a
//! `*_kneaddata.log`; the counts of interest are pulled out of it line by line.

use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const LOG_SUFFIX: &str = "_kneaddata.log";

/// Read counts for one sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleMetrics {
    pub sample: String,
    pub total_reads: Option<u64>,
    pub host_paired_reads: u64,
    pub host_orphan1_reads: u64,
    pub host_orphan2_reads: u64,
    pub final_paired_1_reads: Option<u64>,
    pub final_paired_2_reads: Option<u64>,
}

impl SampleMetrics {
    pub fn new(sample: impl Into<String>) -> Self {
        SampleMetrics {
            sample: sample.into(),
            ..Default::default()
        }
    }

    pub fn host_reads(&self) -> u64 {
        self.host_paired_reads + self.host_orphan1_reads + self.host_orphan2_reads
    }

    pub fn non_host_reads(&self) -> Option<u64> {
        self.total_reads
            .map(|total| total.saturating_sub(self.host_reads()))
    }

    pub fn host_fraction(&self) -> Option<f64> {
        match self.total_reads {
            Some(total) if total > 0 => Some(self.host_reads() as f64 / total as f64),
            _ => None,
        }
    }
}

/// The last number on a log line.
///
/// Takes the text after the final `:` (ignoring a trailing `%`) and falls back
/// to the first number anywhere in the line. Fractions are truncated.
pub fn extract_terminal_number(line: &str) -> Option<u64> {
    let tail = line.trim().rsplit(':').next().unwrap_or("").trim();
    let tail = tail.strip_suffix('%').unwrap_or(tail);
    if let Ok(value) = tail.parse::<f64>() {
        if value.is_finite() && value >= 0.0 {
            return Some(value.trunc() as u64);
        }
    }
    first_number(line)
}

fn first_number(line: &str) -> Option<u64> {
    let start = line.find(|c: char| c.is_ascii_digit())?;
    let rest = &line[start..];
    let int_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..int_end].parse().ok()
}

/// Parses a kneaddata log; the sample name is the log's parent directory.
pub fn parse_log(path: &Path) -> Result<SampleMetrics> {
    let sample = path
        .parent()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let mut metrics = SampleMetrics::new(sample);

    for line in BufReader::new(file).split(b'\n') {
        let line = line?;
        let line = String::from_utf8_lossy(&line);
        parse_line(&line, &mut metrics);
    }
    debug!("Parsed {}: {:?}", path.display(), metrics);
    Ok(metrics)
}

fn parse_line(line: &str, metrics: &mut SampleMetrics) {
    if line.contains("READ COUNT: raw pair1") {
        if let Some(value) = extract_terminal_number(line) {
            metrics.total_reads = Some(value);
        }
    } else if line.contains("Total contaminate sequences in file") {
        let Some(value) = extract_terminal_number(line) else {
            return;
        };
        if line.contains("_paired_contam_1.fastq") {
            metrics.host_paired_reads = value;
        } else if line.contains("_unmatched_1_contam.fastq") {
            metrics.host_orphan1_reads = value;
        } else if line.contains("_unmatched_2_contam.fastq") {
            metrics.host_orphan2_reads = value;
        }
    } else if line.contains("READ COUNT: final pair1") {
        if let Some(value) = extract_terminal_number(line) {
            metrics.final_paired_1_reads = Some(value);
        }
    } else if line.contains("READ COUNT: final pair2") {
        if let Some(value) = extract_terminal_number(line) {
            metrics.final_paired_2_reads = Some(value);
        }
    }
}

/// First `*_kneaddata.log` in each immediate sub-directory, by sorted name.
pub fn find_sample_logs(root: &Path) -> Result<Vec<PathBuf>> {
    if !root.is_dir() {
        bail!("Kneaddata root not found: {}", root.display());
    }
    let mut sample_dirs: Vec<PathBuf> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    sample_dirs.sort();

    let mut logs = Vec::new();
    for dir in sample_dirs {
        let mut candidates: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                p.is_file()
                    && p.file_name()
                        .and_then(|n| n.to_str())
                        .map_or(false, |n| n.ends_with(LOG_SUFFIX))
            })
            .collect();
        candidates.sort();
        if let Some(first) = candidates.into_iter().next() {
            logs.push(first);
        }
    }
    Ok(logs)
}

/// Parses every sample log under `root`, sorted by sample name.
pub fn summarize(root: &Path) -> Result<Vec<SampleMetrics>> {
    let logs = find_sample_logs(root)?;
    if logs.is_empty() {
        bail!("No kneaddata logs found under {}", root.display());
    }
    info!("Found {} kneaddata log(s) under {}", logs.len(), root.display());
    let mut metrics = logs
        .iter()
        .map(|log| parse_log(log))
        .collect::<Result<Vec<_>>>()?;
    metrics.sort_by(|a, b| a.sample.cmp(&b.sample));
    Ok(metrics)
}

#[derive(Debug, Serialize)]
struct SummaryRow<'a> {
    sample: &'a str,
    total_reads: Option<u64>,
    host_reads: u64,
    non_host_reads: Option<u64>,
    final_paired_1_reads: Option<u64>,
    final_paired_2_reads: Option<u64>,
    host_paired_reads: u64,
    host_orphan1_reads: u64,
    host_orphan2_reads: u64,
    host_fraction: Option<String>,
}

/// Writes the per-sample summary as CSV.
pub fn write_csv(metrics: &[SampleMetrics], path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    for m in metrics {
        writer.serialize(SummaryRow {
            sample: &m.sample,
            total_reads: m.total_reads,
            host_reads: m.host_reads(),
            non_host_reads: m.non_host_reads(),
            final_paired_1_reads: m.final_paired_1_reads,
            final_paired_2_reads: m.final_paired_2_reads,
            host_paired_reads: m.host_paired_reads,
            host_orphan1_reads: m.host_orphan1_reads,
            host_orphan2_reads: m.host_orphan2_reads,
            host_fraction: m.host_fraction().map(|f| format!("{:.4}", f)),
        })?;
    }
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use tempfile::tempdir;

    const LOG: &str = "\
03/10/2025 10:01:12 AM - kneaddata.utilities - INFO: READ COUNT: raw pair1 : Initial number of reads ( /in/S1_1.fq.gz ): 1000000.0
03/10/2025 10:01:12 AM - kneaddata.utilities - INFO: READ COUNT: raw pair2 : Initial number of reads ( /in/S1_2.fq.gz ): 1000000.0
03/10/2025 11:20:40 AM - kneaddata.utilities - INFO: Total contaminate sequences in file ( /out/S1_paired_contam_1.fastq ) : 250000.0
03/10/2025 11:20:40 AM - kneaddata.utilities - INFO: Total contaminate sequences in file ( /out/S1_unmatched_1_contam.fastq ) : 1200.0
03/10/2025 11:20:40 AM - kneaddata.utilities - INFO: Total contaminate sequences in file ( /out/S1_unmatched_2_contam.fastq ) : 800.0
03/10/2025 11:25:02 AM - kneaddata.utilities - INFO: READ COUNT: final pair1 : Total reads after merging results from multiple databases ( /out/S1_paired_1.fastq ): 700000.0
03/10/2025 11:25:02 AM - kneaddata.utilities - INFO: READ COUNT: final pair2 : Total reads after merging results from multiple databases ( /out/S1_paired_2.fastq ): 700000.0
";

    fn write_log(root: &Path, sample: &str, content: &str) -> PathBuf {
        let dir = root.join(sample);
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(format!("{}_1_kneaddata.log", sample));
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_extract_terminal_number() {
        assert_eq!(extract_terminal_number("raw pair1 : reads: 1234.0"), Some(1234));
        assert_eq!(extract_terminal_number("fraction: 12.9%"), Some(12));
        assert_eq!(extract_terminal_number("count 42 reads: n/a"), Some(42));
        assert_eq!(extract_terminal_number("nothing here: none"), None);
    }

    #[test]
    fn test_parse_log_counts() {
        let dir = tempdir().unwrap();
        let path = write_log(dir.path(), "S1", LOG);
        let metrics = parse_log(&path).unwrap();

        assert_eq!(metrics.sample, "S1");
        assert_eq!(metrics.total_reads, Some(1_000_000));
        assert_eq!(metrics.host_reads(), 252_000);
        assert_eq!(metrics.non_host_reads(), Some(748_000));
        assert_eq!(metrics.final_paired_1_reads, Some(700_000));
        assert_eq!(metrics.final_paired_2_reads, Some(700_000));
        assert_relative_eq!(metrics.host_fraction().unwrap(), 0.252);
    }

    #[test]
    fn test_unknown_total_leaves_derived_values_empty() {
        let mut metrics = SampleMetrics::new("S9");
        metrics.host_paired_reads = 10;
        assert_eq!(metrics.non_host_reads(), None);
        assert_eq!(metrics.host_fraction(), None);

        metrics.total_reads = Some(5);
        assert_eq!(metrics.non_host_reads(), Some(0));
    }

    #[test]
    fn test_summarize_sorted_and_csv() {
        let dir = tempdir().unwrap();
        write_log(dir.path(), "S2", LOG);
        write_log(dir.path(), "S1", "READ COUNT: raw pair1 : reads: 10\n");
        fs::create_dir_all(dir.path().join("S3_no_log")).unwrap();

        let metrics = summarize(dir.path()).unwrap();
        let names: Vec<&str> = metrics.iter().map(|m| m.sample.as_str()).collect();
        assert_eq!(names, vec!["S1", "S2"]);

        let csv_path = dir.path().join("summary").join("kneaddata_read_summary.csv");
        write_csv(&metrics, &csv_path).unwrap();
        let content = fs::read_to_string(csv_path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next().unwrap(),
            "sample,total_reads,host_reads,non_host_reads,final_paired_1_reads,final_paired_2_reads,host_paired_reads,host_orphan1_reads,host_orphan2_reads,host_fraction"
        );
        assert_eq!(lines.next().unwrap(), "S1,10,0,10,,,0,0,0,0.0000");
        assert_eq!(
            lines.next().unwrap(),
            "S2,1000000,252000,748000,700000,700000,250000,1200,800,0.2520"
        );
    }

    #[test]
    fn test_missing_root_or_no_logs_is_error() {
        let dir = tempdir().unwrap();
        assert!(summarize(&dir.path().join("absent")).is_err());
        assert!(summarize(dir.path()).is_err());
    }
}
