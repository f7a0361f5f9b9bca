//! Pipeline controller
//!
//! Selects the stages to run, drives the page walker and the resolve/download
//! engine against the catalog, and produces the run report.

mod controller;

pub use controller::{PipelineController, RunOptions, StageSelection};
