use log::{debug, error};
use rayon::prelude::*;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParallelError {
    #[error("Thread error: {0}")]
    ThreadError(String),

    #[error("{failed} of {total} item(s) failed: {}", names.join(", "))]
    ItemsFailed {
        failed: usize,
        total: usize,
        names: Vec<String>,
    },
}

/// Configuration for parallel processing
#[derive(Debug, Clone)]
pub struct ParallelConfig {
    /// Number of threads to use
    pub threads: usize,

    /// Whether to continue on errors
    pub continue_on_error: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        ParallelConfig {
            threads: std::thread::available_parallelism().map_or(1, |n| n.get()),
            continue_on_error: true,
        }
    }
}

/// Process named items in parallel using rayon.
///
/// Results come back in input order. With `continue_on_error` every item is
/// attempted and failures are logged under their name before being reported
/// together; otherwise the first failure (in input order) is returned.
pub fn parallel_process<T, U, F>(
    items: Vec<(String, T)>,
    processor: F,
    config: Option<ParallelConfig>,
) -> Result<Vec<U>, anyhow::Error>
where
    T: Send + Sync,
    U: Send,
    F: Fn(&T) -> anyhow::Result<U> + Send + Sync,
{
    let config = config.unwrap_or_default();
    let total = items.len();
    debug!("Processing {} item(s) on {} thread(s)", total, config.threads);

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads.max(1))
        .build()
        .map_err(|e| ParallelError::ThreadError(format!("Failed to build thread pool: {}", e)))?;

    let results: Vec<(String, anyhow::Result<U>)> = pool.install(|| {
        items
            .par_iter()
            .map(|(name, item)| (name.clone(), processor(item)))
            .collect()
    });

    let mut successful = Vec::with_capacity(total);
    let mut failed = Vec::new();
    for (name, result) in results {
        match result {
            Ok(value) => successful.push(value),
            Err(e) if !config.continue_on_error => return Err(e.context(name)),
            Err(e) => {
                error!("{}: {:#}", name, e);
                failed.push(name);
            }
        }
    }

    if failed.is_empty() {
        Ok(successful)
    } else {
        Err(ParallelError::ItemsFailed {
            failed: failed.len(),
            total,
            names: failed,
        }
        .into())
    }
}
