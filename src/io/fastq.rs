//! Preparing FASTQ inputs for the array jobs.
//!
//! Sequencing deliveries arrive as one file per lane and read direction.
//! `merge_lanes` collapses them to one R1/R2 pair per sample; `merge_pairs`
//! concatenates each pair into the single file HUMAnN takes as input.
//! Records are never parsed: gzip members are simply concatenated or
//! recompressed.

use crate::utils::{parallel_process, ParallelConfig};
use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const FASTQ_EXTENSIONS: [&str; 4] = [".fastq.gz", ".fq.gz", ".fastq", ".fq"];

/// Read direction inferred from a `_1` / `_2` name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ReadType {
    R1,
    R2,
    Unknown,
}

impl fmt::Display for ReadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadType::R1 => write!(f, "R1"),
            ReadType::R2 => write!(f, "R2"),
            ReadType::Unknown => write!(f, "unknown"),
        }
    }
}

/// Lane files per sample and direction, sorted by sample.
pub type LaneGroups = BTreeMap<String, BTreeMap<ReadType, Vec<PathBuf>>>;

/// Recursively lists FASTQ files (plain or gzipped) under `dir`.
pub fn find_fastq_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current)
            .with_context(|| format!("Failed to list {}", current.display()))?
        {
            let path = entry?.path();
            if path.is_dir() {
                pending.push(path);
            } else if strip_fastq_extension(&path).is_some() {
                files.push(path);
            }
        }
    }
    files.sort();
    info!("Found {} FASTQ file(s) under {}", files.len(), dir.display());
    Ok(files)
}

fn strip_fastq_extension(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    FASTQ_EXTENSIONS
        .iter()
        .find_map(|ext| name.strip_suffix(ext))
}

/// Sample prefix and read direction for a lane file.
///
/// The prefix is everything before `marker` (e.g. the `_EKD` library tag) when
/// present, otherwise the whole name without its direction suffix.
pub fn classify(path: &Path, marker: &str) -> Option<(String, ReadType)> {
    let stem = strip_fastq_extension(path)?;
    let (stem, read_type) = if let Some(s) = stem.strip_suffix("_1") {
        (s, ReadType::R1)
    } else if let Some(s) = stem.strip_suffix("_2") {
        (s, ReadType::R2)
    } else {
        (stem, ReadType::Unknown)
    };
    let prefix = match stem.find(marker) {
        Some(pos) if !marker.is_empty() => &stem[..pos],
        _ => stem,
    };
    Some((prefix.to_string(), read_type))
}

pub fn group_by_sample(files: &[PathBuf], marker: &str) -> LaneGroups {
    let mut groups = LaneGroups::new();
    for file in files {
        if let Some((sample, read_type)) = classify(file, marker) {
            groups
                .entry(sample)
                .or_default()
                .entry(read_type)
                .or_default()
                .push(file.clone());
        }
    }
    info!("Grouped into {} sample(s)", groups.len());
    groups
}

/// Byte-concatenates lane files (in sorted order) per read direction.
/// Concatenated gzip members form a valid gzip stream.
pub fn merge_sample_lanes(
    sample: &str,
    reads: &BTreeMap<ReadType, Vec<PathBuf>>,
    output_dir: &Path,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)?;
    let mut written = Vec::new();
    for (read_type, lanes) in reads {
        let merged = output_dir.join(format!("{}_{}.fastq.gz", sample, read_type));
        let mut lanes = lanes.clone();
        lanes.sort();
        info!("Merging {} lane(s) -> {}", lanes.len(), merged.display());

        let mut writer = BufWriter::new(
            File::create(&merged)
                .with_context(|| format!("Failed to create {}", merged.display()))?,
        );
        for lane in &lanes {
            let mut reader = BufReader::new(
                File::open(lane).with_context(|| format!("Failed to open {}", lane.display()))?,
            );
            io::copy(&mut reader, &mut writer)?;
        }
        writer.flush()?;
        written.push(merged);
    }
    Ok(written)
}

/// Samples with and without a complete R1/R2 pair in a merged directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairSummary {
    pub complete: Vec<String>,
    pub incomplete: Vec<String>,
}

/// Counts `<sample>_R1.fastq.gz` / `<sample>_R2.fastq.gz` pairs in `dir`.
pub fn verify_pairs(dir: &Path) -> Result<PairSummary> {
    let mut seen: BTreeMap<String, (bool, bool)> = BTreeMap::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if let Some(sample) = name.strip_suffix("_R1.fastq.gz") {
            seen.entry(sample.to_string()).or_default().0 = true;
        } else if let Some(sample) = name.strip_suffix("_R2.fastq.gz") {
            seen.entry(sample.to_string()).or_default().1 = true;
        }
    }
    let mut summary = PairSummary::default();
    for (sample, (r1, r2)) in seen {
        if r1 && r2 {
            summary.complete.push(sample);
        } else {
            summary.incomplete.push(sample);
        }
    }
    Ok(summary)
}

/// Groups lane files under `input_dir` and merges them into `output_dir`.
pub fn merge_lanes(
    input_dir: &Path,
    output_dir: &Path,
    marker: &str,
    config: ParallelConfig,
) -> Result<PairSummary> {
    let files = find_fastq_files(input_dir)?;
    let groups = group_by_sample(&files, marker);
    let items: Vec<(String, (String, BTreeMap<ReadType, Vec<PathBuf>>))> = groups
        .into_iter()
        .map(|(sample, reads)| (sample.clone(), (sample, reads)))
        .collect();

    parallel_process(
        items,
        |(sample, reads)| merge_sample_lanes(sample, reads, output_dir),
        Some(config),
    )?;

    let summary = verify_pairs(output_dir)?;
    info!(
        "Samples with both R1 and R2: {}; missing a mate: {}",
        summary.complete.len(),
        summary.incomplete.len()
    );
    Ok(summary)
}

/// Decompresses R1 then R2 and writes them as one gzip file.
pub fn merge_pair(r1: &Path, r2: &Path, merged: &Path) -> Result<()> {
    let out = File::create(merged).with_context(|| format!("Failed to create {}", merged.display()))?;
    let mut encoder = GzEncoder::new(BufWriter::new(out), Compression::default());
    for input in [r1, r2] {
        let file = File::open(input).with_context(|| format!("Failed to open {}", input.display()))?;
        let mut decoder = MultiGzDecoder::new(BufReader::new(file));
        io::copy(&mut decoder, &mut encoder)
            .with_context(|| format!("Failed to decompress {}", input.display()))?;
    }
    encoder.finish()?.flush()?;
    Ok(())
}

/// Writes `<sample>_merged.fastq.gz` for every complete pair in `input_dir`.
/// Samples without an R2 file are skipped with a warning.
pub fn merge_pairs(input_dir: &Path, output_dir: &Path, config: ParallelConfig) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(output_dir)?;
    let mut r1_files: Vec<PathBuf> = fs::read_dir(input_dir)
        .with_context(|| format!("Failed to list {}", input_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with("_R1.fastq.gz"))
        })
        .collect();
    r1_files.sort();

    let mut items = Vec::new();
    for r1 in r1_files {
        let Some(sample) = r1
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix("_R1.fastq.gz"))
            .map(str::to_string)
        else {
            continue;
        };
        let r2 = input_dir.join(format!("{}_R2.fastq.gz", sample));
        if !r2.exists() {
            warn!("Skipping {}: missing R2 file", sample);
            continue;
        }
        let merged = output_dir.join(format!("{}_merged.fastq.gz", sample));
        items.push((sample, (r1, r2, merged)));
    }

    parallel_process(
        items,
        |(r1, r2, merged)| {
            info!("Merging {} + {} -> {}", r1.display(), r2.display(), merged.display());
            merge_pair(r1, r2, merged).map(|_| merged.clone())
        },
        Some(config),
    )
}
