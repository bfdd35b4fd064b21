//! Identity map of the session.
//!
//! Entities are indexed both by their handle and by their document id.
//! Document ids compare case-insensitively.

mod case_insensitive;
mod tracking;

pub use case_insensitive::{CaseInsensitiveMap, CaseInsensitiveSet};
pub use tracking::DocumentRegistry;
