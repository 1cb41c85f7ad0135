//! Unpacking sequencing deliveries that arrive as TAR batches.
//!
//! Each `<batch>.tar` / `<batch>.tar.gz` / `<batch>.tgz` under the archive
//! directory is unpacked into `<extract_dir>/<batch>`, where `merge_lanes`
//! picks the FASTQ files up.

use anyhow::{Context, Result};
use flate2::read::MultiGzDecoder;
use log::{info, warn};
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};

const GZIP_SUFFIXES: [&str; 2] = [".tar.gz", ".tgz"];
const PLAIN_SUFFIX: &str = ".tar";

/// Batch name and whether the archive is gzip-compressed.
pub fn archive_stem(path: &Path) -> Option<(&str, bool)> {
    let name = path.file_name()?.to_str()?;
    if let Some(stem) = GZIP_SUFFIXES.iter().find_map(|s| name.strip_suffix(s)) {
        return Some((stem, true));
    }
    name.strip_suffix(PLAIN_SUFFIX).map(|stem| (stem, false))
}

/// Archives directly inside `dir`, sorted by path.
pub fn find_archives(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut archives = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        match archive_stem(&path) {
            Some(_) => archives.push(path),
            None => {
                let looks_like_tar = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .map_or(false, |n| n.contains(".tar"));
                if looks_like_tar {
                    warn!("Skipping {}: unsupported archive compression", path.display());
                }
            }
        }
    }
    archives.sort();
    Ok(archives)
}

/// Unpacks one archive into `dest`. Entries that would land outside `dest`
/// are skipped by the `tar` crate.
pub fn extract_archive(archive: &Path, dest: &Path) -> Result<()> {
    let (_, gzipped) = archive_stem(archive)
        .with_context(|| format!("Not a TAR archive: {}", archive.display()))?;
    fs::create_dir_all(dest)?;

    let file = File::open(archive).with_context(|| format!("Failed to open {}", archive.display()))?;
    let reader: Box<dyn Read> = if gzipped {
        Box::new(MultiGzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };

    info!("Extracting {} -> {}", archive.display(), dest.display());
    tar::Archive::new(reader)
        .unpack(dest)
        .with_context(|| format!("Failed to extract {}", archive.display()))
}

/// Unpacks every archive in `tar_dir` into its own batch folder under
/// `extract_dir` and returns those folders.
pub fn extract_all(tar_dir: &Path, extract_dir: &Path) -> Result<Vec<PathBuf>> {
    let archives = find_archives(tar_dir)?;
    if archives.is_empty() {
        anyhow::bail!("No TAR archives found in {}", tar_dir.display());
    }
    info!("Found {} archive(s) in {}", archives.len(), tar_dir.display());

    let mut batches = Vec::with_capacity(archives.len());
    for archive in &archives {
        let Some((stem, _)) = archive_stem(archive) else {
            continue;
        };
        let dest = extract_dir.join(stem);
        extract_archive(archive, &dest)?;
        batches.push(dest);
    }
    Ok(batches)
}
