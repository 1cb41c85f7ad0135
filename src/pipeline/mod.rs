pub mod humann;
pub mod kneaddata;
pub mod plot;
pub mod report;

pub use humann::{CommandRunner, ProcessRunner};
pub use kneaddata::SampleMetrics;
pub use plot::plot_host_contamination;
pub use report::generate_report;
