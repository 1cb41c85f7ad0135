use crate::config::{index_from_env, Overrides, RunConfig};
use crate::error::TaskError;
use crate::io::{extract_all, merge_lanes, merge_pairs};
use crate::manifest::{Manifest, RetrySubset};
use crate::pipeline::{generate_report, humann, kneaddata, plot_host_contamination, ProcessRunner};
use crate::task::ArrayTask;
use crate::utils::ParallelConfig;
use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{debug, info, warn};
use std::env;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about = "Job-array runner for kneaddata and HUMAnN", long_about = None)]
pub struct Cli {
    /// Worker threads: the tool's thread count for `run`, the pool size for helpers
    #[arg(short, long, global = true)]
    pub threads: Option<usize>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    /// JSON run configuration
    #[arg(short, long)]
    pub config: PathBuf,

    /// Manifest file to use instead of the configured one (e.g. a retry subset)
    #[arg(short, long)]
    pub manifest: Option<PathBuf>,

    /// Root for relative paths in the configuration
    #[arg(long)]
    pub work_root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the configured tool for one array index
    Run {
        #[command(flatten)]
        config: ConfigArgs,

        /// 1-based array index; defaults to the scheduler's task id
        #[arg(short, long)]
        index: Option<usize>,

        /// Log the command without creating directories or launching anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Show the sample, inputs and output directory an index maps to
    Resolve {
        #[command(flatten)]
        config: ConfigArgs,

        #[arg(short, long)]
        index: Option<usize>,
    },

    /// Manifest maintenance
    #[command(subcommand)]
    Manifest(ManifestCommands),

    /// Summarise kneaddata read counts across samples
    SummarizeKneaddata {
        /// Directory holding one kneaddata output folder per sample
        #[arg(short, long)]
        root: PathBuf,

        /// Where the CSV goes; defaults to the kneaddata root
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        #[arg(long, default_value = "kneaddata_read_summary.csv")]
        csv_name: String,

        /// Stacked bar chart of host versus remaining reads, written next to the CSV
        #[arg(long, default_value = "kneaddata_host_contamination.png")]
        plot_name: String,

        #[arg(long, value_enum, default_value_t = PlotMode::Save)]
        plot_mode: PlotMode,
    },

    /// Renormalise per-sample HUMAnN tables and regroup gene families to EC
    HumannPostprocess {
        /// Directory holding one HUMAnN output folder per sample
        #[arg(short, long)]
        output_root: PathBuf,

        /// Directory with the humann_* utilities, prepended to PATH
        #[arg(long)]
        bin_dir: Option<PathBuf>,
    },

    /// Join per-sample HUMAnN tables into cohort matrices
    HumannMerge {
        #[arg(short, long)]
        output_root: PathBuf,

        /// Defaults to `<output_root>/../merged_inputs`
        #[arg(long)]
        staging_root: Option<PathBuf>,

        /// Defaults to `<output_root>/../merged_tables`
        #[arg(long)]
        merged_root: Option<PathBuf>,

        #[arg(long)]
        bin_dir: Option<PathBuf>,
    },

    /// Merge per-lane FASTQ files into one R1/R2 pair per sample
    MergeLanes {
        /// Directory searched recursively for lane files
        #[arg(short, long, required_unless_present = "tar_dir", conflicts_with = "tar_dir")]
        input_dir: Option<PathBuf>,

        /// Directory of `*.tar` / `*.tar.gz` batches to unpack first
        #[arg(long, requires = "extract_dir")]
        tar_dir: Option<PathBuf>,

        /// Each batch is unpacked into `<extract_dir>/<batch>`
        #[arg(long)]
        extract_dir: Option<PathBuf>,

        #[arg(short, long)]
        output_dir: PathBuf,

        /// Sample names end where this tag starts
        #[arg(long, default_value = "_EKD")]
        marker: String,
    },

    /// Concatenate R1 and R2 into one gzip file per sample for HUMAnN
    MergePairs {
        #[arg(short, long)]
        input_dir: PathBuf,

        #[arg(short, long)]
        output_dir: PathBuf,
    },
}

/// What `summarize-kneaddata` does with the contamination plot.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlotMode {
    /// Write the PNG
    Save,
    /// Skip plotting
    None,
}

#[derive(Subcommand, Debug)]
pub enum ManifestCommands {
    /// Freeze the configured manifest source (e.g. a glob) into a file
    Build {
        #[command(flatten)]
        config: ConfigArgs,

        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write a retry manifest holding a subset of an earlier run's samples
    Retry {
        /// Manifest of the original run
        #[arg(short, long)]
        manifest: PathBuf,

        #[arg(short, long)]
        output: PathBuf,

        #[command(flatten)]
        selection: RetrySelection,

        /// Output root of the original run, for --missing
        #[arg(long)]
        output_root: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct RetrySelection {
    /// Comma-separated sample names
    #[arg(long, value_delimiter = ',')]
    pub samples: Vec<String>,

    /// Comma-separated 1-based indices of the original run
    #[arg(long, value_delimiter = ',')]
    pub indices: Vec<usize>,

    /// Samples lacking this file in their output folder, e.g. `{name}_genefamilies.tsv`
    #[arg(long, requires = "output_root")]
    pub missing: Option<String>,
}

fn load_run_config(args: &ConfigArgs, threads: Option<usize>) -> Result<RunConfig, TaskError> {
    let from_cli = Overrides {
        manifest: args.manifest.clone(),
        work_root: args.work_root.clone(),
        threads,
    };
    let from_env = Overrides::from_env(|key| env::var(key).ok());
    RunConfig::load(&args.config)?.resolve(from_cli.or(from_env))
}

fn task_index(explicit: Option<usize>) -> Result<usize, TaskError> {
    if let Some(index) = explicit {
        return Ok(index);
    }
    index_from_env(|key| env::var(key).ok())?.ok_or_else(|| {
        TaskError::Config(
            "no array index: pass --index or run inside a scheduler array job".to_string(),
        )
    })
}

fn helper_pool(threads: Option<usize>) -> ParallelConfig {
    let mut config = ParallelConfig::default();
    if let Some(threads) = threads {
        config.threads = threads;
    }
    config
}

/// Exit code for a failed command: the task error's own code when there is one.
pub fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.chain()
        .find_map(|e| e.downcast_ref::<TaskError>())
        .map_or(1, TaskError::exit_code)
}

/// Main entry point for CLI
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            config,
            index,
            dry_run,
        } => {
            let run_config = load_run_config(&config, cli.threads)?;
            let index = task_index(index)?;
            let task = ArrayTask::from_config(&run_config, dry_run)?;
            let outcome = task.run(index)?;
            if outcome.is_dry_run() {
                println!("{}", outcome.command.render());
            } else {
                info!(
                    "Task {} ({}) completed successfully",
                    outcome.sample.index, outcome.sample.name
                );
            }
            Ok(())
        }

        Commands::Resolve { config, index } => {
            let run_config = load_run_config(&config, cli.threads)?;
            let index = task_index(index)?;
            let task = ArrayTask::from_config(&run_config, true)?;
            let sample = task.resolve(index)?;
            let invoker = task.invoker();

            println!("index\t{}", sample.index);
            println!("sample\t{}", sample.name);
            println!("output\t{}", invoker.output_dir(&sample).display());
            for input in invoker
                .config()
                .layout()
                .input_paths(&run_config.input_dir, &sample.name)
            {
                let state = if input.is_file() { "present" } else { "missing" };
                println!("input\t{}\t{}", input.display(), state);
            }
            invoker.check_inputs(&sample)?;
            Ok(())
        }

        Commands::Manifest(ManifestCommands::Build { config, output }) => {
            let run_config = load_run_config(&config, cli.threads)?;
            let manifest = Manifest::load(&run_config.manifest)?;
            for sample in manifest.iter() {
                debug!("{}\t{}", sample.index, sample.name);
            }
            manifest.write(&output)?;
            println!(
                "Wrote {} sample(s) to {}; submit indices 1-{}",
                manifest.len(),
                output.display(),
                manifest.len()
            );
            Ok(())
        }

        Commands::Manifest(ManifestCommands::Retry {
            manifest,
            output,
            selection,
            output_root,
        }) => {
            let original = Manifest::from_file(&manifest)?;
            let subset = if let Some(marker) = selection.missing {
                let root = output_root.context("--missing needs --output-root")?;
                RetrySubset::incomplete(&original, &root, &marker)
            } else if !selection.indices.is_empty() {
                RetrySubset::from_indices(&original, &selection.indices)?
            } else {
                RetrySubset::from_names(&original, &selection.samples)?
            };

            subset.write(&output)?;
            if subset.is_empty() {
                warn!("Nothing to retry: the subset is empty");
            }
            println!(
                "Wrote {} of {} sample(s) to {}; resubmit indices 1-{} with {}={}",
                subset.len(),
                original.len(),
                output.display(),
                subset.len(),
                crate::config::MANIFEST_ENV,
                output.display()
            );
            Ok(())
        }

        Commands::SummarizeKneaddata {
            root,
            output_dir,
            csv_name,
            plot_name,
            plot_mode,
        } => {
            let metrics = kneaddata::summarize(&root)?;
            let output_dir = output_dir.unwrap_or_else(|| root.clone());
            let csv_path = output_dir.join(csv_name);
            kneaddata::write_csv(&metrics, &csv_path)?;
            print!("{}", generate_report(&metrics));
            println!("\nCSV summary written to: {}", csv_path.display());

            if plot_mode == PlotMode::Save {
                if let Some(plot) = plot_host_contamination(&metrics, &output_dir.join(plot_name))? {
                    println!("Stacked bar plot saved to: {}", plot.display());
                }
            }
            Ok(())
        }

        Commands::HumannPostprocess {
            output_root,
            bin_dir,
        } => {
            let runner = ProcessRunner { bin_dir };
            let statuses = humann::postprocess(&runner, &output_root)?;
            let skipped = statuses
                .iter()
                .filter(|(_, s)| *s == humann::PostprocessStatus::Skipped)
                .count();
            println!(
                "Post-processed {} sample(s), skipped {}",
                statuses.len() - skipped,
                skipped
            );
            Ok(())
        }

        Commands::HumannMerge {
            output_root,
            staging_root,
            merged_root,
            bin_dir,
        } => {
            let parent = output_root
                .parent()
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("."));
            let staging_root = staging_root.unwrap_or_else(|| parent.join("merged_inputs"));
            let merged_root = merged_root.unwrap_or_else(|| parent.join("merged_tables"));

            info!("Staging per-sample tables under {}", staging_root.display());
            let counts = humann::stage_tables(&output_root, &staging_root)?;
            for (table, count) in &counts {
                println!("  {}: {} files", table, count);
            }

            info!("Merging staged tables into {}", merged_root.display());
            let runner = ProcessRunner { bin_dir };
            let written = humann::join_tables(&runner, &staging_root, &merged_root, &counts)?;
            println!("Wrote {} merged table(s) to {}", written.len(), merged_root.display());
            Ok(())
        }

        Commands::MergeLanes {
            input_dir,
            tar_dir,
            extract_dir,
            output_dir,
            marker,
        } => {
            let input_dir = match tar_dir {
                Some(tar_dir) => {
                    let extract_dir = extract_dir.context("--tar-dir needs --extract-dir")?;
                    let batches = extract_all(&tar_dir, &extract_dir)?;
                    info!("Unpacked {} batch(es) into {}", batches.len(), extract_dir.display());
                    extract_dir
                }
                None => input_dir.context("--input-dir or --tar-dir is required")?,
            };
            let summary = merge_lanes(&input_dir, &output_dir, &marker, helper_pool(cli.threads))?;
            println!("--- Verification Summary ---");
            println!(
                "Total unique samples in output: {}",
                summary.complete.len() + summary.incomplete.len()
            );
            println!("Samples with both R1 and R2: {}", summary.complete.len());
            println!("Samples missing a pair: {}", summary.incomplete.len());
            for sample in &summary.incomplete {
                println!("  incomplete: {}", sample);
            }
            Ok(())
        }

        Commands::MergePairs {
            input_dir,
            output_dir,
        } => {
            let written = merge_pairs(&input_dir, &output_dir, helper_pool(cli.threads))?;
            println!(
                "Merged {} pair(s) into {}",
                written.len(),
                output_dir.display()
            );
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run_with_index() {
        let cli = Cli::try_parse_from([
            "seqarray", "run", "--config", "job.json", "--index", "2", "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                config,
                index,
                dry_run,
            } => {
                assert_eq!(config.config, PathBuf::from("job.json"));
                assert_eq!(index, Some(2));
                assert!(dry_run);
            }
            other => panic!("unexpected command {:?}", other),
        }
    }

    #[test]
    fn test_retry_selection_is_exclusive() {
        let ok = Cli::try_parse_from([
            "seqarray", "manifest", "retry", "-m", "samples.txt", "-o", "retry.txt",
            "--samples", "S2,S5",
        ])
        .unwrap();
        match ok.command {
            Commands::Manifest(ManifestCommands::Retry { selection, .. }) => {
                assert_eq!(selection.samples, vec!["S2", "S5"]);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let both = Cli::try_parse_from([
            "seqarray", "manifest", "retry", "-m", "samples.txt", "-o", "retry.txt",
            "--samples", "S2", "--indices", "3",
        ]);
        assert!(both.is_err());

        let none = Cli::try_parse_from([
            "seqarray", "manifest", "retry", "-m", "samples.txt", "-o", "retry.txt",
        ]);
        assert!(none.is_err());
    }

    #[test]
    fn test_merge_lanes_from_archives() {
        let cli = Cli::try_parse_from([
            "seqarray", "merge-lanes", "--tar-dir", "tars", "--extract-dir", "tmp_extract",
            "-o", "cleaned",
        ])
        .unwrap();
        match cli.command {
            Commands::MergeLanes {
                input_dir,
                tar_dir,
                extract_dir,
                ..
            } => {
                assert_eq!(input_dir, None);
                assert_eq!(tar_dir, Some(PathBuf::from("tars")));
                assert_eq!(extract_dir, Some(PathBuf::from("tmp_extract")));
            }
            other => panic!("unexpected command {:?}", other),
        }

        let no_extract = Cli::try_parse_from(["seqarray", "merge-lanes", "--tar-dir", "tars", "-o", "out"]);
        assert!(no_extract.is_err());
        let no_source = Cli::try_parse_from(["seqarray", "merge-lanes", "-o", "out"]);
        assert!(no_source.is_err());
    }

    #[test]
    fn test_summarize_plot_options() {
        let cli = Cli::try_parse_from(["seqarray", "summarize-kneaddata", "-r", "kd"]).unwrap();
        match cli.command {
            Commands::SummarizeKneaddata {
                plot_name,
                plot_mode,
                ..
            } => {
                assert_eq!(plot_name, "kneaddata_host_contamination.png");
                assert_eq!(plot_mode, PlotMode::Save);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::try_parse_from([
            "seqarray", "summarize-kneaddata", "-r", "kd", "--plot-mode", "none",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::SummarizeKneaddata { plot_mode: PlotMode::None, .. }
        ));
    }

    #[test]
    fn test_exit_code_found_through_context() {
        let err = anyhow::Error::from(TaskError::IndexOutOfRange { index: 9, len: 3 })
            .context("task failed");
        assert_eq!(exit_code_for(&err), 3);
        assert_eq!(exit_code_for(&anyhow::anyhow!("plain failure")), 1);
    }
}
