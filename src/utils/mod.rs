pub mod parallel;
pub mod process;

pub use parallel::{parallel_process, ParallelConfig};
pub use process::{path_with_prefix, render_command, run_command};
