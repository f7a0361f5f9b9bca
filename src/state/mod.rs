//! State module for tracking pipeline progress
//!
//! # Components
//!
//! - `EntryStatus`: status of a catalog entry and its permitted transitions
//! - `CrawlCursor`: resumable marker for the index page walk

mod cursor;
mod entry_status;

pub use cursor::CrawlCursor;
pub use entry_status::EntryStatus;
