//! Crawler module for the index site (Stage1)
//!
//! This module contains the page walking logic, including:
//! - HTTP fetching behind the [`PageSource`] seam
//! - HTML parsing of index pages and post pages
//! - Request spacing shared by all concurrent fetches
//! - The page walker that records discoveries in the catalog

mod fetcher;
mod parser;
mod throttle;
mod walker;

pub use fetcher::{build_http_client, FetchError, HttpSource, PageSource};
pub use parser::{
    compile_selector, PageLayout, ParseError, PostDetails, PostLink, MAX_TITLE_CHARS,
};
pub use throttle::Throttle;
pub use walker::{PageWalker, PostOutcome, WalkSummary};
