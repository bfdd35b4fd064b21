//! # docsession testkit
//!
//! Test collaborators for docsession.
//!
//! This crate provides:
//! - A serde-backed entity mapper and identifier strategy
//! - An in-memory transport with transactional batch semantics
//! - Shop domain fixtures and store helpers
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docsession_testkit::prelude::*;
//!
//! #[tokio::test]
//! async fn stores_a_product() {
//!     let store = TestStore::new();
//!     let mut session = store.session();
//!     session.store(&EntityRef::new(Product::new("Chai", 18))).await.unwrap();
//!     session.save_changes().await.unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;
pub mod mapper;
pub mod transport;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::mapper::*;
    pub use crate::transport::*;
    pub use docsession_core::EntityRef;
}

pub use fixtures::*;
pub use generators::*;
pub use mapper::*;
pub use transport::*;
