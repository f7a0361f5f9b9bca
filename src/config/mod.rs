//! Configuration module for lbry-harvest
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//! The file is optional: every setting has a default, and command-line flags
//! override whatever the file provides.
//!
//! # Example
//!
//! ```no_run
//! use lbry_harvest::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("harvest.toml")).unwrap();
//! println!("Catalog: {}", config.output.database_path);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlerConfig, DaemonConfig, LinkSelection, OutputConfig, RetryConfig,
    UserAgentConfig,
};

pub use parser::{compute_config_hash, load_config, load_or_default};
pub use validation::validate;
