//! Batch commands and the deferred command ledger.

mod data;
mod ledger;

pub use data::{CommandData, CommandType, CounterOperation, CounterOperationType, PatchRequest};
pub use ledger::{ConflictKind, DeferredCommands, IdTypeAndName};
