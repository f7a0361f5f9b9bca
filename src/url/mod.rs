//! URL handling module for lbry-harvest
//!
//! This module provides post URL normalization, hosting-domain matching,
//! outbound redirect unwrapping and Odysee → LBRY URI conversion.

mod canonical;
mod hosting;
mod normalize;

pub use canonical::{to_canonical_uri, unwrap_out_link};
pub use hosting::{matches_wildcard, HostingMatcher, LBRY_SCHEME};
pub use normalize::{normalize_url, resolve_href};
