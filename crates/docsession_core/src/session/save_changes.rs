//! Compiling the session state into a batch and folding the server's
//! response back in.
//!
//! Compilation never touches the tracking tables. Deleted entities stay
//! tracked and stored entities keep their old baseline until
//! [`DocumentSession::apply_batch_result`] runs with a successful response.

use super::tracking::document_for;
use super::DocumentSession;
use crate::changes::entity_changed;
use crate::cluster::StagedOperation;
use crate::commands::{CommandData, DeferredCommands};
use crate::config::TransactionMode;
use crate::constants::metadata;
use crate::entity::EntityRef;
use crate::error::{ConflictingAction, SessionError, SessionResult};
use crate::events::{BeforeDeleteEventArgs, BeforeStoreEventArgs};
use crate::transport::{BatchCommand, BatchCommandResult, CountersDetail, TransportError};
use crate::types::{BatchOptions, ConcurrencyCheckMode};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Local bookkeeping for one session-derived command.
#[derive(Debug, Clone, PartialEq)]
pub enum PendingWrite {
    /// The entity is written as `document`.
    Put {
        /// Entity being written.
        entity: EntityRef,
        /// Serialized form sent to the server.
        document: Value,
    },
    /// The document is deleted.
    Delete {
        /// Document id.
        id: String,
        /// Tracked entity, if any.
        entity: EntityRef,
    },
    /// A compare-exchange value is written or removed.
    CompareExchange {
        /// Compare-exchange key.
        key: String,
    },
}

/// One compiled commit attempt.
///
/// Commands go over the wire in two groups: the deferred commands first,
/// then the commands derived from tracked entities. Results come back in
/// the same order.
#[derive(Debug, Default)]
pub struct SaveChangesData {
    deferred: DeferredCommands,
    restorable: usize,
    session_commands: Vec<CommandData>,
    pending: Vec<PendingWrite>,
    options: BatchOptions,
    staged: Vec<StagedOperation>,
}

impl SaveChangesData {
    /// Returns true if there is nothing to send.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.deferred.is_empty() && self.session_commands.is_empty()
    }

    /// Returns the total number of commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.deferred.len() + self.session_commands.len()
    }

    /// Returns the deferred commands of this batch.
    #[must_use]
    pub fn deferred_commands(&self) -> &DeferredCommands {
        &self.deferred
    }

    /// Returns the commands derived from tracked entities.
    #[must_use]
    pub fn session_commands(&self) -> &[CommandData] {
        &self.session_commands
    }

    /// Returns the bookkeeping entries aligned with
    /// [`Self::session_commands`].
    #[must_use]
    pub fn pending_writes(&self) -> &[PendingWrite] {
        &self.pending
    }

    /// Returns the replication and index wait options.
    #[must_use]
    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Iterates every command in wire order.
    pub fn commands(&self) -> impl Iterator<Item = &CommandData> {
        self.deferred.iter().chain(self.session_commands.iter())
    }

    /// Builds the wire batch.
    #[must_use]
    pub fn to_batch(&self, transaction_mode: TransactionMode) -> BatchCommand {
        BatchCommand {
            commands: self.commands().map(CommandData::to_json).collect(),
            options: self.options.clone(),
            transaction_mode,
        }
    }

    fn push(&mut self, command: CommandData, pending: PendingWrite) {
        self.session_commands.push(command);
        self.pending.push(pending);
    }
}

impl DocumentSession {
    /// Compiles everything that changed into a batch and clears the
    /// deferred ledger.
    ///
    /// On failure the deferred ledger and compare-exchange staging are left
    /// as they were.
    pub fn prepare_for_save_changes(&mut self) -> SessionResult<SaveChangesData> {
        self.guard.ensure_not_disposed()?;
        let deferred = self.deferred.take();
        let mut data = SaveChangesData {
            restorable: deferred.len(),
            deferred,
            options: self.batch_options.clone(),
            ..SaveChangesData::default()
        };

        let mut reentrant = Vec::new();
        let compiled = self
            .prepare_deletes(&mut data, &mut reentrant)
            .and_then(|()| self.prepare_puts(&mut data, &mut reentrant))
            .and_then(|()| self.prepare_cluster_transaction(&mut data));
        if let Err(err) = compiled {
            self.restore_unsent(data);
            return Err(err);
        }

        for command in reentrant {
            data.deferred.defer(command);
        }
        data.deferred.append(self.deferred.take());
        for command in data.deferred.iter() {
            command.on_before_save_changes(&mut self.counters);
        }

        debug!(
            session_id = %self.id,
            deferred = data.deferred.len(),
            commands = data.session_commands.len(),
            "prepared batch"
        );
        Ok(data)
    }

    fn prepare_deletes(
        &mut self,
        data: &mut SaveChangesData,
        reentrant: &mut Vec<CommandData>,
    ) -> SessionResult<()> {
        let deleted: Vec<EntityRef> = self.registry.deleted_entities().cloned().collect();
        for entity in deleted {
            let Some(info) = self.registry.get(&entity) else {
                continue;
            };
            let Some(id) = info.id.clone() else {
                continue;
            };
            if let Some(command) = data.deferred.find_any(&id) {
                return Err(SessionError::deferred_conflict(
                    id,
                    command.command_type(),
                    ConflictingAction::Deleted,
                ));
            }
            let change_vector = if self.use_optimistic_concurrency {
                info.change_vector.clone()
            } else {
                None
            };

            let mut args = BeforeDeleteEventArgs::new(self.id, &id, Some(&entity));
            self.events.emit_before_delete(&mut args);
            reentrant.extend(args.into_deferred());

            data.push(
                CommandData::delete(id.as_str(), change_vector),
                PendingWrite::Delete { id, entity },
            );
        }
        Ok(())
    }

    fn prepare_puts(
        &mut self,
        data: &mut SaveChangesData,
        reentrant: &mut Vec<CommandData>,
    ) -> SessionResult<()> {
        let mapper = Arc::clone(self.store.mapper());
        let use_optimistic_concurrency = self.use_optimistic_concurrency;
        let notify = self.events.has_before_store();

        for (entity, info) in self.registry.live_entries_mut() {
            if info.ignore_changes {
                continue;
            }
            let metadata_dirty = info.fold_metadata_modifications();
            let mut document = document_for(mapper.as_ref(), entity, info)?;
            if !metadata_dirty && !entity_changed(&document, info, None) {
                continue;
            }

            if let Some(id) = info.id.as_deref() {
                if let Some(command) = data.deferred.find_modifying(id) {
                    return Err(SessionError::deferred_conflict(
                        id,
                        command.command_type(),
                        ConflictingAction::Modified,
                    ));
                }
            }

            if notify {
                let mut args = BeforeStoreEventArgs::new(self.id, entity, info);
                self.events.emit_before_store(&mut args);
                let metadata_accessed = args.is_metadata_accessed();
                reentrant.extend(args.into_deferred());
                if metadata_accessed {
                    info.fold_metadata_modifications();
                }
                document = document_for(mapper.as_ref(), entity, info)?;
            }

            let change_vector = match info.concurrency_check_mode {
                ConcurrencyCheckMode::Disabled => None,
                _ if use_optimistic_concurrency => {
                    Some(info.change_vector.clone().unwrap_or_default())
                }
                ConcurrencyCheckMode::Forced => info.change_vector.clone(),
                ConcurrencyCheckMode::Auto => None,
            };

            trace!(id = ?info.id, "compiled put");
            data.push(
                CommandData::put(info.id.clone().unwrap_or_default(), change_vector, document.clone()),
                PendingWrite::Put {
                    entity: entity.clone(),
                    document,
                },
            );
        }
        Ok(())
    }

    fn prepare_cluster_transaction(&mut self, data: &mut SaveChangesData) -> SessionResult<()> {
        if !self.cluster.has_commands() {
            return Ok(());
        }
        if self.transaction_mode != TransactionMode::ClusterWide {
            return Err(SessionError::invalid_operation(
                "performing cluster transaction operations requires the transaction mode \
                 to be set to cluster wide",
            ));
        }

        data.staged = self.cluster.take_staged();
        let mapper = Arc::clone(self.store.mapper());
        for operation in &data.staged {
            let command = match operation {
                StagedOperation::Put { key, entity, index } => CommandData::CompareExchangePut {
                    key: key.clone(),
                    value: mapper.to_document(entity, None)?,
                    index: *index,
                },
                StagedOperation::Delete { key, index } => CommandData::CompareExchangeDelete {
                    key: key.clone(),
                    index: *index,
                },
            };
            data.session_commands.push(command);
            data.pending.push(PendingWrite::CompareExchange {
                key: operation.key().to_string(),
            });
        }
        Ok(())
    }

    /// Puts the deferred commands and staged compare-exchange operations of
    /// an unsent batch back into the session.
    fn restore_unsent(&mut self, data: SaveChangesData) {
        let mut restored = DeferredCommands::new();
        for command in data.deferred.into_iter().take(data.restorable) {
            restored.defer(command);
        }
        restored.append(self.deferred.take());
        self.deferred = restored;
        if !data.staged.is_empty() {
            self.cluster.restore(data.staged);
        }
    }

    /// Commits every pending change in one batch.
    ///
    /// Nothing is sent when nothing changed. If the batch cannot be sent,
    /// the session keeps its pending changes and the call can be retried.
    pub async fn save_changes(&mut self) -> SessionResult<()> {
        self.guard.ensure_not_disposed()?;
        if self.no_tracking {
            return Err(SessionError::invalid_operation(
                "cannot execute save_changes when entity tracking is disabled",
            ));
        }

        let data = self.prepare_for_save_changes()?;
        if data.is_empty() {
            trace!(session_id = %self.id, "nothing to save");
            return Ok(());
        }
        if let Err(err) = self
            .increment_request_count()
            .and_then(|()| self.validate_cluster_transaction(&data))
        {
            self.restore_unsent(data);
            return Err(err);
        }

        let batch = data.to_batch(self.transaction_mode);
        let transport = Arc::clone(self.store.transport());
        let result = match transport
            .dispatch(&self.database, &batch, &self.session_info)
            .await
        {
            Ok(result) => result,
            Err(err) => {
                warn!(session_id = %self.id, error = %err, "batch failed");
                self.restore_unsent(data);
                return Err(err.into());
            }
        };
        self.apply_batch_result(&data, &result)
    }

    /// Folds a successful batch response back into the session.
    pub fn apply_batch_result(
        &mut self,
        data: &SaveChangesData,
        result: &BatchCommandResult,
    ) -> SessionResult<()> {
        if result.results.len() != data.len() {
            return Err(TransportError::protocol(format!(
                "batch of {} commands returned {} results",
                data.len(),
                result.results.len()
            ))
            .into());
        }

        self.store
            .set_last_transaction_index(&self.database, result.transaction_index);
        if let Some(index) = result.transaction_index {
            let last = &mut self.session_info.last_cluster_transaction_index;
            *last = Some(last.map_or(index, |last| last.max(index)));
        }

        let (deferred_results, session_results) = result.results.split_at(data.deferred.len());
        for (command, outcome) in data.deferred.iter().zip(deferred_results) {
            self.apply_deferred_result(command, outcome)?;
        }
        for (pending, outcome) in data.pending.iter().zip(session_results) {
            self.apply_session_result(pending, outcome)?;
        }

        debug!(
            session_id = %self.id,
            commands = data.len(),
            transaction_index = ?result.transaction_index,
            "applied batch"
        );
        Ok(())
    }

    fn apply_deferred_result(&mut self, command: &CommandData, outcome: &Value) -> SessionResult<()> {
        match command {
            CommandData::Put { id, .. } => {
                let Some(info) = self.registry.get_by_id_mut(id) else {
                    return Ok(());
                };
                for (key, value) in outcome.as_object().into_iter().flatten() {
                    if key != "Type" && key != metadata::ID {
                        info.metadata.insert(key.clone(), value.clone());
                    }
                }
                info.change_vector = change_vector_of(outcome).or(info.change_vector.take());
                info.reset_metadata_instance();
            }
            CommandData::Delete { id, .. } => {
                self.registry.remove_by_id(id);
                self.registry.register_missing(id);
                self.counters.remove(id);
            }
            CommandData::Patch { id, .. } => {
                let Some(document) = outcome.get("ModifiedDocument").filter(|doc| doc.is_object()) else {
                    return Ok(());
                };
                let Some(entity) = self.registry.entity_by_id(id).cloned() else {
                    return Ok(());
                };
                self.store.mapper().populate(&entity, document)?;
                if let Some(info) = self.registry.get_mut(&entity) {
                    if let Some(meta) = document.get(metadata::KEY).and_then(Value::as_object) {
                        info.metadata = meta.clone();
                    }
                    info.change_vector = outcome
                        .get("ChangeVector")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .or(info.change_vector.take());
                    info.document = Some(document.clone());
                    info.reset_metadata_instance();
                }
            }
            CommandData::Counters { .. } => {
                if let Some(detail) = outcome.get("CountersDetail") {
                    let detail: CountersDetail = serde_json::from_value(detail.clone())?;
                    let totals: Vec<_> = detail.counters.into_iter().flatten().collect();
                    self.counters.apply_totals(&totals);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn apply_session_result(&mut self, pending: &PendingWrite, outcome: &Value) -> SessionResult<()> {
        match pending {
            PendingWrite::Put { entity, document } => {
                let Some(info) = self.registry.get_mut(entity) else {
                    return Ok(());
                };
                let previous_id = info.id.clone();
                let Some(fields) = outcome.as_object() else {
                    return Err(TransportError::protocol("put result must be an object").into());
                };
                for (key, value) in fields {
                    if key != "Type" {
                        info.metadata.insert(key.clone(), value.clone());
                    }
                }
                if let Some(id) = fields.get(metadata::ID).and_then(Value::as_str) {
                    info.id = Some(id.to_string());
                }
                info.change_vector = change_vector_of(outcome);

                let mut baseline = document.clone();
                if let Some(body) = baseline.as_object_mut() {
                    body.insert(metadata::KEY.to_string(), Value::Object(info.metadata.clone()));
                }
                info.document = Some(baseline);
                info.new_document = false;
                info.reset_metadata_instance();

                let id = info.id.clone();
                self.registry.reindex(entity, previous_id.as_deref());
                if let Some(id) = id.filter(|id| Some(id) != previous_id.as_ref()) {
                    self.store.ids().try_set_id(entity, &id)?;
                }
            }
            PendingWrite::Delete { id, entity } => {
                self.registry.remove_entity(entity);
                self.registry.register_missing(id);
                self.counters.remove(id);
            }
            PendingWrite::CompareExchange { key } => {
                trace!(key = %key, "compare exchange committed");
            }
        }
        Ok(())
    }
}

fn change_vector_of(outcome: &Value) -> Option<String> {
    outcome
        .get(metadata::CHANGE_VECTOR)
        .and_then(Value::as_str)
        .map(str::to_string)
}
