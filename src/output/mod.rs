//! Output module for run reports and statistics
//!
//! This module handles:
//! - Building the run report from stage summaries and the catalog
//! - Exporting the report as JSON
//! - Printing catalog statistics and run summaries to the console

mod report;
pub mod stats;

pub use report::{
    FailedEntry, PageRange, RunReport, EXIT_FATAL, EXIT_INTERRUPTED, EXIT_OK,
};
pub use stats::{load_statistics, print_report, print_statistics, CatalogStatistics};
