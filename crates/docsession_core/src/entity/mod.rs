//! Entity handles and per-document tracking state.

mod info;
mod metadata;
mod reference;

pub use info::DocumentInfo;
pub use metadata::{MetadataDictionary, MetadataValue};
pub use reference::EntityRef;
