//! Identity scoping
//!
//! Key comments can name the repositories a key is meant for. Listings
//! returned through the tunnel only show keys whose scope covers the
//! repository being accessed, plus keys that carry no scope at all.

mod filter;
mod path;

pub use filter::{IdentityScopeFilter, ScopedListing};
pub use path::ScopePath;
