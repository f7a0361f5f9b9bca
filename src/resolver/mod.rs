//! Link resolution (first half of Stage2)
//!
//! Converts each Discovered entry's hosting link to a canonical `lbry://` URI
//! and asks the daemon for the claim's permanent identifier.

mod resolve;

pub use resolve::{LinkResolver, ResolveError, ResolveOutcome, ResolveSummary};
