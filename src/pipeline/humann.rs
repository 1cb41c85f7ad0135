//! Cohort-level HUMAnN steps run after the array job finishes.
//!
//! Post-processing renormalises each sample's tables and regroups gene
//! families to EC numbers; merging stages per-sample tables and joins them
//! into cohort matrices. Both shell out to the `humann_*` utilities.

use crate::utils::run_command;
use anyhow::{bail, Context, Result};
use indexmap::IndexMap;
use log::{info, warn};
use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const BASE_TABLES: [&str; 3] = ["genefamilies", "pathabundance", "pathcoverage"];
const METAPHLAN_TABLE: &str = "metaphlan_bugs";

/// Runs external helpers, optionally with an environment's `bin/` on `PATH`.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[String], stdout_to: Option<&Path>) -> Result<()>;
}

/// Runs commands as child processes.
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    pub bin_dir: Option<PathBuf>,
}

impl CommandRunner for ProcessRunner {
    fn run(&self, program: &str, args: &[String], stdout_to: Option<&Path>) -> Result<()> {
        run_command(program, args, self.bin_dir.as_deref(), stdout_to)
    }
}

fn sample_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs: Vec<PathBuf> = fs::read_dir(root)
        .with_context(|| format!("Failed to list {}", root.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// `humann_regroup_table` group name matching the UniRef flavour in use.
pub fn detect_uniref_scope(genefamilies: &Path) -> Result<&'static str> {
    let file = File::open(genefamilies)
        .with_context(|| format!("Failed to open {}", genefamilies.display()))?;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let feature = line.split('\t').next().unwrap_or("");
        return Ok(if feature.starts_with("UniRef50_") {
            "uniref50_level4ec"
        } else {
            "uniref90_level4ec"
        });
    }
    bail!(
        "Could not detect UniRef scope in {}",
        genefamilies.display()
    )
}

/// What happened to one sample during post-processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostprocessStatus {
    /// Required HUMAnN outputs are missing.
    Skipped,
    /// Tables normalised; `regrouped` is false when the EC table already existed.
    Done { regrouped: bool },
}

fn normalize_table(
    runner: &dyn CommandRunner,
    table: &Path,
    units: &str,
    output: &Path,
) -> Result<()> {
    if output.exists() {
        return Ok(());
    }
    runner.run(
        "humann_renorm_table",
        &[
            "--input".to_string(),
            table.display().to_string(),
            "--units".to_string(),
            units.to_string(),
            "--output".to_string(),
            output.display().to_string(),
        ],
        None,
    )
}

/// CPM and relative-abundance tables plus EC regrouping for one sample.
pub fn postprocess_sample(runner: &dyn CommandRunner, sample_dir: &Path) -> Result<PostprocessStatus> {
    let sample = dir_name(sample_dir);
    let tables: Vec<(&str, PathBuf)> = BASE_TABLES
        .iter()
        .map(|t| (*t, sample_dir.join(format!("{}_{}.tsv", sample, t))))
        .collect();

    if let Some((_, missing)) = tables.iter().find(|(_, p)| !p.exists()) {
        warn!(
            "Skipping {}: missing HUMAnN output {}",
            sample,
            missing.display()
        );
        return Ok(PostprocessStatus::Skipped);
    }

    for (name, path) in &tables {
        for units in ["cpm", "relab"] {
            let output = sample_dir.join(format!("{}_{}_{}.tsv", sample, name, units));
            normalize_table(runner, path, units, &output)?;
        }
    }

    let genefamilies_cpm = sample_dir.join(format!("{}_genefamilies_cpm.tsv", sample));
    if !genefamilies_cpm.exists() {
        warn!("Skipping EC regroup for {}: CPM table missing", sample);
        return Ok(PostprocessStatus::Done { regrouped: false });
    }
    let ec_output = sample_dir.join(format!("{}_genefamilies_cpm_level4ec.tsv", sample));
    if ec_output.exists() {
        info!("Skipping EC regroup for {}: output already exists", sample);
        return Ok(PostprocessStatus::Done { regrouped: false });
    }

    let groups = detect_uniref_scope(&tables[0].1)?;
    runner.run(
        "humann_regroup_table",
        &[
            "--input".to_string(),
            genefamilies_cpm.display().to_string(),
            "--groups".to_string(),
            groups.to_string(),
            "--output".to_string(),
            ec_output.display().to_string(),
        ],
        None,
    )?;
    Ok(PostprocessStatus::Done { regrouped: true })
}

/// Post-processes every sample directory under `output_root`.
pub fn postprocess(runner: &dyn CommandRunner, output_root: &Path) -> Result<Vec<(String, PostprocessStatus)>> {
    let mut statuses = Vec::new();
    for dir in sample_dirs(output_root)? {
        let status = postprocess_sample(runner, &dir)?;
        statuses.push((dir_name(&dir), status));
    }
    info!("HUMAnN post-processing complete");
    Ok(statuses)
}

/// Per-sample file pattern and merged file name for each cohort table.
pub fn table_catalogue() -> IndexMap<&'static str, (&'static str, &'static str)> {
    let mut specs = IndexMap::new();
    for table in [
        "genefamilies",
        "genefamilies_cpm",
        "genefamilies_relab",
        "genefamilies_cpm_level4ec",
        "pathabundance",
        "pathabundance_cpm",
        "pathabundance_relab",
        "pathcoverage",
        "pathcoverage_cpm",
        "pathcoverage_relab",
    ] {
        specs.insert(table, ("{sample}_{table}.tsv", "humann_{table}.tsv"));
    }
    specs.insert(
        METAPHLAN_TABLE,
        (
            "{sample}_humann_temp/{sample}_metaphlan_bugs_list.tsv",
            "metaphlan_bugs_list.tsv",
        ),
    );
    specs
}

fn fill(template: &str, sample: &str, table: &str) -> String {
    template.replace("{sample}", sample).replace("{table}", table)
}

/// Recreates the staging folders and copies each sample's tables into them.
/// Returns the number of files staged per table, in catalogue order.
pub fn stage_tables(output_root: &Path, staging_root: &Path) -> Result<IndexMap<String, usize>> {
    let catalogue = table_catalogue();
    let mut counts: IndexMap<String, usize> = IndexMap::new();
    for table in catalogue.keys() {
        let stage = staging_root.join(table);
        if stage.exists() {
            fs::remove_dir_all(&stage)?;
        }
        fs::create_dir_all(&stage)?;
        counts.insert(table.to_string(), 0);
    }

    for dir in sample_dirs(output_root)? {
        let sample = dir_name(&dir);
        for (table, (pattern, _)) in &catalogue {
            let src = dir.join(fill(pattern, &sample, table));
            if !src.is_file() {
                continue;
            }
            let Some(file_name) = src.file_name() else {
                continue;
            };
            fs::copy(&src, staging_root.join(table).join(file_name))
                .with_context(|| format!("Failed to stage {}", src.display()))?;
            *counts.entry(table.to_string()).or_insert(0) += 1;
        }
    }
    Ok(counts)
}

/// Joins staged tables into cohort matrices under `merged_root`.
pub fn join_tables(
    runner: &dyn CommandRunner,
    staging_root: &Path,
    merged_root: &Path,
    counts: &IndexMap<String, usize>,
) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(merged_root)?;
    let mut written = Vec::new();

    for (table, (_, merged)) in table_catalogue() {
        if table == METAPHLAN_TABLE {
            continue;
        }
        if counts.get(table).copied().unwrap_or(0) == 0 {
            info!("Skipping {}: no files staged", table);
            continue;
        }
        let output = merged_root.join(fill(merged, "", table));
        runner.run(
            "humann_join_tables",
            &[
                "--input".to_string(),
                staging_root.join(table).display().to_string(),
                "--output".to_string(),
                output.display().to_string(),
            ],
            None,
        )?;
        written.push(output);
    }

    if counts.get(METAPHLAN_TABLE).copied().unwrap_or(0) > 0 {
        info!("Joining MetaPhlAn bugs lists");
        let mut files: Vec<String> = fs::read_dir(staging_root.join(METAPHLAN_TABLE))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().map_or(false, |e| e == "tsv"))
            .map(|p| p.display().to_string())
            .collect();
        files.sort();
        let output = merged_root.join("metaphlan_bugs_list.tsv");
        runner.run("merge_metaphlan_tables.py", &files, Some(&output))?;
        written.push(output);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Records calls and creates the `--output` file like the real tools do.
    #[derive(Default)]
    struct RecordingRunner {
        calls: Mutex<Vec<(String, Vec<String>, Option<PathBuf>)>>,
    }

    impl CommandRunner for RecordingRunner {
        fn run(&self, program: &str, args: &[String], stdout_to: Option<&Path>) -> Result<()> {
            if let Some(pos) = args.iter().position(|a| a == "--output") {
                fs::write(&args[pos + 1], "# table\n")?;
            }
            self.calls.lock().unwrap().push((
                program.to_string(),
                args.to_vec(),
                stdout_to.map(Path::to_path_buf),
            ));
            Ok(())
        }
    }

    impl RecordingRunner {
        fn programs(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(p, _, _)| p.clone())
                .collect()
        }
    }

    fn humann_sample(root: &Path, sample: &str, first_feature: &str) -> PathBuf {
        let dir = root.join(sample);
        fs::create_dir_all(&dir).unwrap();
        for table in BASE_TABLES {
            fs::write(
                dir.join(format!("{}_{}.tsv", sample, table)),
                format!("# Gene Family\t{}_Abundance-RPKs\n{}\t12.5\n", sample, first_feature),
            )
            .unwrap();
        }
        dir
    }

    #[test]
    fn test_detect_uniref_scope() {
        let dir = tempdir().unwrap();
        let d50 = humann_sample(dir.path(), "A", "UniRef50_Q8A1");
        let d90 = humann_sample(dir.path(), "B", "UniRef90_P0001");
        assert_eq!(
            detect_uniref_scope(&d50.join("A_genefamilies.tsv")).unwrap(),
            "uniref50_level4ec"
        );
        assert_eq!(
            detect_uniref_scope(&d90.join("B_genefamilies.tsv")).unwrap(),
            "uniref90_level4ec"
        );

        let empty = dir.path().join("empty.tsv");
        fs::write(&empty, "# header only\n").unwrap();
        assert!(detect_uniref_scope(&empty).is_err());
    }

    #[test]
    fn test_postprocess_runs_renorm_then_regroup_once() {
        let dir = tempdir().unwrap();
        humann_sample(dir.path(), "S1", "UniRef90_P0001");
        fs::create_dir_all(dir.path().join("S2")).unwrap();

        let runner = RecordingRunner::default();
        let statuses = postprocess(&runner, dir.path()).unwrap();
        assert_eq!(
            statuses,
            vec![
                ("S1".to_string(), PostprocessStatus::Done { regrouped: true }),
                ("S2".to_string(), PostprocessStatus::Skipped),
            ]
        );
        let programs = runner.programs();
        assert_eq!(programs.len(), 7);
        assert!(programs[..6].iter().all(|p| p == "humann_renorm_table"));
        assert_eq!(programs[6], "humann_regroup_table");

        // Second pass finds every output in place.
        let again = RecordingRunner::default();
        postprocess(&again, dir.path()).unwrap();
        assert!(again.programs().is_empty());
    }

    #[test]
    fn test_stage_and_join() {
        let dir = tempdir().unwrap();
        let output_root = dir.path().join("output");
        humann_sample(&output_root, "S1", "UniRef90_P0001");
        humann_sample(&output_root, "S2", "UniRef90_P0001");
        let temp = output_root.join("S2").join("S2_humann_temp");
        fs::create_dir_all(&temp).unwrap();
        fs::write(temp.join("S2_metaphlan_bugs_list.tsv"), "k__Bacteria\t100\n").unwrap();

        let staging = dir.path().join("merged_inputs");
        // Stale files from an earlier merge are cleared.
        fs::create_dir_all(staging.join("genefamilies")).unwrap();
        fs::write(staging.join("genefamilies").join("old.tsv"), "").unwrap();

        let counts = stage_tables(&output_root, &staging).unwrap();
        assert_eq!(counts["genefamilies"], 2);
        assert_eq!(counts["pathcoverage_cpm"], 0);
        assert_eq!(counts[METAPHLAN_TABLE], 1);
        assert!(!staging.join("genefamilies").join("old.tsv").exists());
        assert_eq!(counts.keys().next().map(String::as_str), Some("genefamilies"));

        let runner = RecordingRunner::default();
        let merged = dir.path().join("merged_tables");
        let written = join_tables(&runner, &staging, &merged, &counts).unwrap();
        assert!(written.contains(&merged.join("humann_genefamilies.tsv")));
        assert!(written.contains(&merged.join("metaphlan_bugs_list.tsv")));

        let calls = runner.calls.lock().unwrap();
        let joins = calls
            .iter()
            .filter(|(p, _, _)| p == "humann_join_tables")
            .count();
        assert_eq!(joins, 3);
        let (program, args, stdout_to) = calls.last().unwrap();
        assert_eq!(program, "merge_metaphlan_tables.py");
        assert_eq!(args.len(), 1);
        assert_eq!(stdout_to.as_deref(), Some(merged.join("metaphlan_bugs_list.tsv").as_path()));
    }
}
