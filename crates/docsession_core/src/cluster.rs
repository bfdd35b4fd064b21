//! Compare-exchange staging for cluster-wide transactions.

use crate::entity::EntityRef;
use crate::error::{SessionError, SessionResult};
use indexmap::IndexMap;

/// A compare-exchange operation waiting for the next commit.
#[derive(Debug, Clone, PartialEq)]
pub enum StagedOperation {
    /// Store `entity` under `key`.
    Put {
        /// Compare-exchange key.
        key: String,
        /// Value to store, serialized at commit time.
        entity: EntityRef,
        /// Expected index; 0 creates the key.
        index: u64,
    },
    /// Remove `key`.
    Delete {
        /// Compare-exchange key.
        key: String,
        /// Expected index.
        index: u64,
    },
}

impl StagedOperation {
    /// Returns the key the operation targets.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key, .. } => key,
        }
    }
}

/// Staging area consumed by the command compiler.
///
/// The compiler only sees this trait; sessions use
/// [`ClusterTransactionStaging`] unless another implementation is injected.
pub trait ClusterTransactionOperations: Send {
    /// Stages a put of `entity` under `key` with the expected `index`.
    fn stage_put(&mut self, key: &str, entity: EntityRef, index: u64) -> SessionResult<()>;

    /// Stages a delete of `key` with the expected `index`.
    fn stage_delete(&mut self, key: &str, index: u64) -> SessionResult<()>;

    /// Returns true if any operation is staged.
    fn has_commands(&self) -> bool;

    /// Returns the number of staged operations.
    fn number_of_commands(&self) -> usize;

    /// Removes and returns every staged operation, puts first.
    fn take_staged(&mut self) -> Vec<StagedOperation>;

    /// Puts back operations returned by [`Self::take_staged`] after a
    /// failed commit.
    fn restore(&mut self, operations: Vec<StagedOperation>);

    /// Drops every staged operation.
    fn clear(&mut self);
}

/// Default in-memory staging.
#[derive(Debug, Default)]
pub struct ClusterTransactionStaging {
    puts: IndexMap<String, (EntityRef, u64)>,
    deletes: IndexMap<String, u64>,
}

impl ClusterTransactionStaging {
    /// Creates empty staging.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages the creation of a new compare-exchange value.
    pub fn create_compare_exchange_value(&mut self, key: &str, entity: EntityRef) -> SessionResult<()> {
        self.stage_put(key, entity, 0)
    }

    /// Stages the deletion of a compare-exchange value.
    pub fn delete_compare_exchange_value(&mut self, key: &str, index: u64) -> SessionResult<()> {
        self.stage_delete(key, index)
    }

    fn ensure_not_staged(&self, key: &str) -> SessionResult<()> {
        if self.puts.contains_key(key) || self.deletes.contains_key(key) {
            return Err(SessionError::invalid_operation(format!(
                "the compare exchange key '{key}' already has a pending operation in this session"
            )));
        }
        Ok(())
    }
}

impl ClusterTransactionOperations for ClusterTransactionStaging {
    fn stage_put(&mut self, key: &str, entity: EntityRef, index: u64) -> SessionResult<()> {
        if key.is_empty() {
            return Err(SessionError::invalid_argument("key cannot be empty"));
        }
        self.ensure_not_staged(key)?;
        self.puts.insert(key.to_string(), (entity, index));
        Ok(())
    }

    fn stage_delete(&mut self, key: &str, index: u64) -> SessionResult<()> {
        if key.is_empty() {
            return Err(SessionError::invalid_argument("key cannot be empty"));
        }
        self.ensure_not_staged(key)?;
        self.deletes.insert(key.to_string(), index);
        Ok(())
    }

    fn has_commands(&self) -> bool {
        !self.puts.is_empty() || !self.deletes.is_empty()
    }

    fn number_of_commands(&self) -> usize {
        self.puts.len() + self.deletes.len()
    }

    fn take_staged(&mut self) -> Vec<StagedOperation> {
        let puts = std::mem::take(&mut self.puts)
            .into_iter()
            .map(|(key, (entity, index))| StagedOperation::Put { key, entity, index });
        let deletes = std::mem::take(&mut self.deletes)
            .into_iter()
            .map(|(key, index)| StagedOperation::Delete { key, index });
        puts.chain(deletes).collect()
    }

    fn restore(&mut self, operations: Vec<StagedOperation>) {
        for operation in operations {
            match operation {
                StagedOperation::Put { key, entity, index } => {
                    self.puts.entry(key).or_insert((entity, index));
                }
                StagedOperation::Delete { key, index } => {
                    self.deletes.entry(key).or_insert(index);
                }
            }
        }
    }

    fn clear(&mut self) {
        self.puts.clear();
        self.deletes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct User;

    #[test]
    fn staging_and_taking() {
        let mut staging = ClusterTransactionStaging::new();
        staging
            .create_compare_exchange_value("emails/a@x.io", EntityRef::new(User))
            .unwrap();
        staging.delete_compare_exchange_value("emails/b@x.io", 7).unwrap();

        assert!(staging.has_commands());
        assert_eq!(staging.number_of_commands(), 2);

        let staged = staging.take_staged();
        assert!(!staging.has_commands());
        assert!(matches!(&staged[0], StagedOperation::Put { index: 0, .. }));
        assert!(matches!(&staged[1], StagedOperation::Delete { index: 7, .. }));
    }

    #[test]
    fn one_pending_operation_per_key() {
        let mut staging = ClusterTransactionStaging::new();
        staging.stage_delete("k", 1).unwrap();
        let err = staging.stage_put("k", EntityRef::new(User), 1).unwrap_err();
        assert!(matches!(err, SessionError::InvalidOperation { .. }));
        assert!(staging.stage_delete("", 1).is_err());
    }

    #[test]
    fn restore_after_failure() {
        let mut staging = ClusterTransactionStaging::new();
        staging.stage_put("k", EntityRef::new(User), 0).unwrap();
        let staged = staging.take_staged();
        staging.restore(staged);
        assert_eq!(staging.number_of_commands(), 1);
    }
}
