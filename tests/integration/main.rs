//! Integration tests for lbry-harvest

mod crawl_tests;
mod download_tests;
mod pipeline_tests;
mod support;
