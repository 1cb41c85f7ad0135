//! Launching the external tool for one resolved sample.

use super::{JobConfig, ToolCommand};
use crate::error::TaskError;
use crate::manifest::SampleRef;
use log::{error, info, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};

/// What happened to one task.
#[derive(Debug, Clone)]
pub struct JobOutcome {
    pub sample: SampleRef,
    pub output_dir: PathBuf,
    pub command: ToolCommand,
    /// `None` for dry runs.
    pub exit_code: Option<i32>,
}

impl JobOutcome {
    pub fn is_dry_run(&self) -> bool {
        self.exit_code.is_none()
    }
}

/// Prepares output locations and runs the configured tool.
#[derive(Debug, Clone)]
pub struct JobInvoker {
    config: JobConfig,
    input_dir: PathBuf,
    output_root: PathBuf,
    log_dir: PathBuf,
    dry_run: bool,
}

impl JobInvoker {
    pub fn new(
        config: JobConfig,
        input_dir: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        log_dir: impl Into<PathBuf>,
    ) -> Self {
        JobInvoker {
            config,
            input_dir: input_dir.into(),
            output_root: output_root.into(),
            log_dir: log_dir.into(),
            dry_run: false,
        }
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    /// `<output_root>/<sample name>`; the same name always gives the same path.
    pub fn output_dir(&self, sample: &SampleRef) -> PathBuf {
        self.output_root.join(&sample.name)
    }

    /// Creates the sample's output directory. Existing content is left alone.
    pub fn prepare_output_dir(&self, sample: &SampleRef) -> Result<PathBuf, TaskError> {
        let dir = self.output_dir(sample);
        fs::create_dir_all(&dir).map_err(|source| setup_error(sample, &dir, source))?;
        Ok(dir)
    }

    /// Input paths for the sample, failing on the first one that is absent.
    pub fn check_inputs(&self, sample: &SampleRef) -> Result<Vec<PathBuf>, TaskError> {
        let paths = self
            .config
            .layout()
            .input_paths(&self.input_dir, &sample.name);
        if let Some(missing) = paths.iter().find(|p| !p.is_file()) {
            return Err(TaskError::InputFileMissing {
                sample: sample.name.clone(),
                index: sample.index,
                path: missing.clone(),
            });
        }
        Ok(paths)
    }

    /// Stdout and stderr log paths for the task.
    pub fn log_paths(&self, sample: &SampleRef) -> (PathBuf, PathBuf) {
        let stem = format!("{}.{}", sample.name, sample.index);
        (
            self.log_dir.join(format!("{}.out", stem)),
            self.log_dir.join(format!("{}.err", stem)),
        )
    }

    /// Runs the tool for `sample` and waits for it.
    ///
    /// Inputs are checked before anything is created or launched. A non-zero
    /// exit becomes `ToolExecutionFailed` carrying the child's code; whatever
    /// the tool wrote is left in place.
    pub fn invoke(&self, sample: &SampleRef) -> Result<JobOutcome, TaskError> {
        let inputs = self.check_inputs(sample)?;
        let output_dir = self.output_dir(sample);
        let command = ToolCommand::build(&self.config, &sample.name, &inputs, &output_dir);

        info!(
            "Sample '{}' (index {}) -> {}",
            sample.name,
            sample.index,
            output_dir.display()
        );
        info!("Command: {}", command.render());

        if self.dry_run {
            info!("Dry run: not launching {}", self.tool_name());
            return Ok(JobOutcome {
                sample: sample.clone(),
                output_dir,
                command,
                exit_code: None,
            });
        }

        self.prepare_output_dir(sample)?;
        let (out_log, err_log) = self.log_paths(sample);
        fs::create_dir_all(&self.log_dir)
            .map_err(|source| setup_error(sample, &self.log_dir, source))?;
        let stdout = open_log(&out_log, sample)?;
        let stderr = open_log(&err_log, sample)?;

        let mut child = command
            .to_command()
            .map_err(|e| TaskError::Config(e.to_string()))?
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .spawn()
            .map_err(|source| TaskError::ToolLaunch {
                sample: sample.name.clone(),
                index: sample.index,
                tool: self.tool_name(),
                source,
            })?;

        let status = child.wait()?;
        if !status.success() {
            log_abnormal_exit(&status, sample);
            return Err(TaskError::ToolExecutionFailed {
                sample: sample.name.clone(),
                index: sample.index,
                tool: self.tool_name(),
                code: status.code(),
            });
        }

        info!(
            "{} finished for sample '{}' (logs: {})",
            self.tool_name(),
            sample.name,
            out_log.display()
        );
        Ok(JobOutcome {
            sample: sample.clone(),
            output_dir,
            command,
            exit_code: status.code(),
        })
    }

    fn tool_name(&self) -> String {
        self.config.executable().display().to_string()
    }
}

fn setup_error(sample: &SampleRef, path: &Path, source: io::Error) -> TaskError {
    TaskError::OutputUnavailable {
        sample: sample.name.clone(),
        index: sample.index,
        path: path.to_path_buf(),
        source,
    }
}

fn open_log(path: &Path, sample: &SampleRef) -> Result<File, TaskError> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|source| setup_error(sample, path, source))?;
    writeln!(
        file,
        "==> seqarray: sample {} (index {})",
        sample.name, sample.index
    )
    .map_err(|source| setup_error(sample, path, source))?;
    Ok(file)
}

#[cfg(unix)]
fn log_abnormal_exit(status: &ExitStatus, sample: &SampleRef) {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(signal) => warn!(
            "Tool for sample '{}' was terminated by signal {}",
            sample.name, signal
        ),
        None => error!("Tool for sample '{}' exited with {}", sample.name, status),
    }
}

#[cfg(not(unix))]
fn log_abnormal_exit(status: &ExitStatus, sample: &SampleRef) {
    error!("Tool for sample '{}' exited with {}", sample.name, status);
}
