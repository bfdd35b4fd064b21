//! Request budget, disposal and cluster-transaction validation.

use super::{DocumentSession, SaveChangesData};
use crate::commands::{CommandData, CommandType};
use crate::config::TransactionMode;
use crate::error::{SessionError, SessionResult};
use tracing::{trace, warn};
use uuid::Uuid;

/// Request counter and disposal flag of a session.
#[derive(Debug)]
pub(crate) struct LifecycleGuard {
    number_of_requests: u32,
    max_requests: u32,
    disposed: bool,
}

impl LifecycleGuard {
    pub(crate) fn new(max_requests: u32) -> Self {
        Self {
            number_of_requests: 0,
            max_requests,
            disposed: false,
        }
    }

    pub(crate) fn number_of_requests(&self) -> u32 {
        self.number_of_requests
    }

    pub(crate) fn max_requests(&self) -> u32 {
        self.max_requests
    }

    pub(crate) fn set_max_requests(&mut self, max: u32) {
        self.max_requests = max;
    }

    /// Counts a round trip. The counter never goes back down.
    pub(crate) fn increment_request_count(&mut self, session_id: &Uuid) -> SessionResult<()> {
        self.number_of_requests = self.number_of_requests.saturating_add(1);
        trace!(
            session_id = %session_id,
            requests = self.number_of_requests,
            max = self.max_requests,
            "request budget"
        );
        if self.number_of_requests > self.max_requests {
            warn!(session_id = %session_id, max = self.max_requests, "request budget exceeded");
            return Err(SessionError::RequestBudgetExceeded {
                max: self.max_requests,
            });
        }
        Ok(())
    }

    pub(crate) fn ensure_not_disposed(&self) -> SessionResult<()> {
        if self.disposed {
            return Err(SessionError::Disposed);
        }
        Ok(())
    }

    /// Returns true the first time it is called.
    pub(crate) fn dispose(&mut self) -> bool {
        !std::mem::replace(&mut self.disposed, true)
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.disposed
    }
}

impl DocumentSession {
    /// Checks a compiled batch against the rules of cluster-wide sessions.
    ///
    /// Only puts, deletes and compare-exchange operations are allowed, and
    /// puts and deletes must not carry a change vector. Single-node sessions
    /// always pass.
    pub fn validate_cluster_transaction(&self, data: &SaveChangesData) -> SessionResult<()> {
        if self.transaction_mode != TransactionMode::ClusterWide {
            return Ok(());
        }
        if self.use_optimistic_concurrency {
            return Err(SessionError::invalid_operation(
                "optimistic concurrency is not supported with cluster wide transactions",
            ));
        }
        for command in data.commands() {
            validate_cluster_command(command)?;
        }
        Ok(())
    }
}

fn validate_cluster_command(command: &CommandData) -> SessionResult<()> {
    let kind = command.command_type();
    if !kind.allowed_in_cluster_transaction() {
        return Err(SessionError::invalid_operation(format!(
            "the command '{kind}' is not supported in a cluster session"
        )));
    }
    if matches!(kind, CommandType::Put | CommandType::Delete) && command.change_vector().is_some() {
        return Err(SessionError::invalid_operation(format!(
            "optimistic concurrency for {} is not supported when using a cluster transaction",
            command.id().unwrap_or_default()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn budget_is_enforced_and_never_resets() {
        let id = Uuid::nil();
        let mut guard = LifecycleGuard::new(2);
        guard.increment_request_count(&id).unwrap();
        guard.increment_request_count(&id).unwrap();

        let err = guard.increment_request_count(&id).unwrap_err();
        assert!(matches!(err, SessionError::RequestBudgetExceeded { max: 2 }));
        assert!(!err.is_retryable());
        assert!(guard.increment_request_count(&id).is_err());
        assert_eq!(guard.number_of_requests(), 4);
    }

    #[test]
    fn dispose_is_idempotent() {
        let mut guard = LifecycleGuard::new(30);
        assert!(guard.ensure_not_disposed().is_ok());
        assert!(guard.dispose());
        assert!(!guard.dispose());
        assert!(matches!(guard.ensure_not_disposed(), Err(SessionError::Disposed)));
    }

    #[test]
    fn cluster_commands() {
        assert!(validate_cluster_command(&CommandData::put("a/1", None, json!({}))).is_ok());
        assert!(validate_cluster_command(&CommandData::put("a/1", Some("A:1".into()), json!({}))).is_err());
        assert!(validate_cluster_command(&CommandData::delete("a/1", Some(String::new()))).is_err());
        assert!(validate_cluster_command(&CommandData::CompareExchangeDelete {
            key: "k".into(),
            index: 3
        })
        .is_ok());
        assert!(validate_cluster_command(&CommandData::counters("a/1", Vec::new())).is_err());
    }
}
