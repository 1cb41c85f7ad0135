//! One array task: resolve the scheduler index, then invoke the tool.

use crate::config::RunConfig;
use crate::error::TaskError;
use crate::job::{JobInvoker, JobOutcome};
use crate::manifest::{Manifest, SampleRef};
use log::info;

/// Resolver and invoker bound to one configuration.
#[derive(Debug)]
pub struct ArrayTask {
    manifest: Manifest,
    invoker: JobInvoker,
}

impl ArrayTask {
    /// Loads the manifest named by `config`.
    pub fn from_config(config: &RunConfig, dry_run: bool) -> Result<Self, TaskError> {
        let manifest = Manifest::load(&config.manifest)?;
        info!(
            "Manifest {} holds {} sample(s)",
            manifest.location(),
            manifest.len()
        );
        let invoker = JobInvoker::new(
            config.job.clone(),
            &config.input_dir,
            &config.output_root,
            config.log_dir(),
        )
        .with_dry_run(dry_run);
        Ok(ArrayTask { manifest, invoker })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    pub fn invoker(&self) -> &JobInvoker {
        &self.invoker
    }

    pub fn resolve(&self, index: usize) -> Result<SampleRef, TaskError> {
        self.manifest.resolve(index)
    }

    /// Runs the task for `index`.
    pub fn run(&self, index: usize) -> Result<JobOutcome, TaskError> {
        let sample = self.resolve(index)?;
        info!(
            "Array index {} resolved to sample '{}'",
            index, sample.name
        );
        self.invoker.invoke(&sample)
    }
}
