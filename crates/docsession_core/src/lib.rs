//! # docsession core
//!
//! Client-side unit-of-work engine for a document database driver.
//!
//! This crate provides:
//! - Identity-mapped tracking of loaded, stored and deleted entities
//! - Structural change detection against the last persisted baseline
//! - A deferred command ledger with per-document conflict keys
//! - Compare-exchange staging for cluster-wide transactions
//! - A command compiler that turns the session state into one batch
//! - Request budgeting and session lifecycle enforcement
//!
//! The wire transport, entity marshalling and identifier generation are
//! external collaborators, injected through [`Transport`], [`EntityMapper`]
//! and [`IdentifierStrategy`].
//!
//! ## Usage
//!
//! ```rust,ignore
//! use docsession_core::{SessionOptions, StoreContext};
//!
//! let store = StoreContext::builder(transport, mapper, ids)
//!     .database("shop")
//!     .build();
//! let mut session = store.open_session(SessionOptions::default())?;
//!
//! let product = session.load("products/1").await?.expect("exists");
//! product.update(|p: &mut Product| p.price += 10);
//! session.save_changes().await?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod changes;
pub mod cluster;
pub mod commands;
mod config;
pub mod constants;
pub mod counters;
pub mod entity;
mod error;
pub mod events;
pub mod includes;
mod mapper;
pub mod registry;
mod session;
mod store;
mod transport;
mod types;

pub use changes::{ChangeType, DocumentsChanges};
pub use cluster::{ClusterTransactionOperations, ClusterTransactionStaging, StagedOperation};
pub use commands::{
    CommandData, CommandType, ConflictKind, CounterOperation, CounterOperationType, DeferredCommands,
    IdTypeAndName, PatchRequest,
};
pub use config::{Conventions, NameResolver, ReadBalanceBehavior, SessionOptions, TransactionMode};
pub use counters::{CounterCache, CounterDetail, CounterTracking};
pub use entity::{DocumentInfo, EntityRef, MetadataDictionary, MetadataValue};
pub use error::{ConflictingAction, ErrorCategory, SessionError, SessionResult};
pub use events::{BeforeDeleteEventArgs, BeforeStoreEventArgs, SessionEvents};
pub use mapper::{EntityMapper, IdentifierStrategy};
pub use registry::DocumentRegistry;
pub use session::{DocumentSession, ExpectedChangeVector, PendingWrite, SaveChangesData, StoreOptions};
pub use store::{StoreContext, StoreContextBuilder};
pub use transport::{
    BatchCommand, BatchCommandResult, CountersDetail, GetDocumentsResult, ReadRequest, Transport,
    TransportError,
};
pub use types::{
    BatchOptions, ConcurrencyCheckMode, IndexBatchOptions, ReplicationBatchOptions, ServerNode,
    SessionInfo,
};
