//! Store, delete and defer.

use super::tracking::document_for;
use super::DocumentSession;
use crate::changes::entity_changed;
use crate::commands::CommandData;
use crate::constants::metadata;
use crate::entity::{DocumentInfo, EntityRef};
use crate::error::{ConflictingAction, SessionError, SessionResult};
use crate::types::ConcurrencyCheckMode;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, trace};

/// Change vector expectation passed to [`DocumentSession::store_with_options`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ExpectedChangeVector {
    /// Let the session decide.
    #[default]
    Unspecified,
    /// The stored document must have this change vector.
    Expected(String),
    /// Never send a change vector for this entity.
    Disabled,
}

/// Options of [`DocumentSession::store_with_options`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Explicit document id.
    pub id: Option<String>,
    /// Concurrency expectation.
    pub change_vector: ExpectedChangeVector,
}

impl StoreOptions {
    /// Creates empty options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the document id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Requires the stored document to have `change_vector`.
    #[must_use]
    pub fn change_vector(mut self, change_vector: impl Into<String>) -> Self {
        self.change_vector = ExpectedChangeVector::Expected(change_vector.into());
        self
    }

    /// Disables the concurrency check for this entity.
    #[must_use]
    pub fn no_change_vector(mut self) -> Self {
        self.change_vector = ExpectedChangeVector::Disabled;
        self
    }
}

impl DocumentSession {
    /// Stores an entity, generating an id for it if it has none.
    pub async fn store(&mut self, entity: &EntityRef) -> SessionResult<()> {
        let has_id = self.store.ids().try_get_id(entity).is_some();
        let mode = if has_id {
            ConcurrencyCheckMode::Auto
        } else {
            ConcurrencyCheckMode::Forced
        };
        self.store_internal(entity, None, None, mode).await
    }

    /// Stores an entity under `id`.
    pub fn store_with_id(&mut self, entity: &EntityRef, id: &str) -> SessionResult<()> {
        if self.update_tracked(entity, None, ConcurrencyCheckMode::Auto)? {
            return Ok(());
        }
        self.store.ids().try_set_id(entity, id)?;
        self.store_entity_in_unit_of_work(Some(id.to_string()), entity, None, ConcurrencyCheckMode::Auto)
    }

    /// Stores an entity with an explicit id and/or concurrency expectation.
    pub async fn store_with_options(&mut self, entity: &EntityRef, options: StoreOptions) -> SessionResult<()> {
        let (change_vector, mode) = match options.change_vector {
            ExpectedChangeVector::Expected(cv) => (Some(cv), ConcurrencyCheckMode::Forced),
            ExpectedChangeVector::Disabled => (None, ConcurrencyCheckMode::Disabled),
            ExpectedChangeVector::Unspecified => {
                let has_id = options.id.is_some() || self.store.ids().try_get_id(entity).is_some();
                let mode = if has_id {
                    ConcurrencyCheckMode::Auto
                } else {
                    ConcurrencyCheckMode::Forced
                };
                (None, mode)
            }
        };
        self.store_internal(entity, change_vector, options.id, mode).await
    }

    async fn store_internal(
        &mut self,
        entity: &EntityRef,
        change_vector: Option<String>,
        id: Option<String>,
        mode: ConcurrencyCheckMode,
    ) -> SessionResult<()> {
        if self.update_tracked(entity, change_vector.clone(), mode)? {
            return Ok(());
        }

        let id = match id {
            Some(id) => {
                self.store.ids().try_set_id(entity, &id)?;
                Some(id)
            }
            None => self.resolve_id(entity).await?,
        };
        self.store_entity_in_unit_of_work(id, entity, change_vector, mode)
    }

    /// Updates the concurrency settings of an already tracked entity.
    /// Returns false if the entity is not tracked.
    fn update_tracked(
        &mut self,
        entity: &EntityRef,
        change_vector: Option<String>,
        mode: ConcurrencyCheckMode,
    ) -> SessionResult<bool> {
        self.guard.ensure_not_disposed()?;
        self.ensure_tracking("store")?;

        if self.registry.is_marked_deleted(entity) {
            let id = self.document_id(entity).unwrap_or_default();
            return Err(SessionError::invalid_operation(format!(
                "can't store object, it was already deleted in this session; document id: {id}"
            )));
        }
        let Some(info) = self.registry.get_mut(entity) else {
            return Ok(false);
        };
        if change_vector.is_some() {
            info.change_vector = change_vector;
        }
        info.concurrency_check_mode = mode;
        Ok(true)
    }

    async fn resolve_id(&mut self, entity: &EntityRef) -> SessionResult<Option<String>> {
        let ids = Arc::clone(self.store.ids());
        if !self.conventions().generate_document_ids_on_store {
            ids.remember_entity_for_document_id_generation(entity)?;
            return Ok(None);
        }
        if let Some(id) = ids.try_get_id(entity) {
            return Ok(Some(id));
        }
        let collection = self.conventions().collection_name_for(entity);
        let id = ids
            .generate_id(&self.database, collection.as_deref(), entity)
            .await?;
        ids.try_set_id(entity, &id)?;
        trace!(id = %id, "generated document id");
        Ok(Some(id))
    }

    fn store_entity_in_unit_of_work(
        &mut self,
        id: Option<String>,
        entity: &EntityRef,
        change_vector: Option<String>,
        mode: ConcurrencyCheckMode,
    ) -> SessionResult<()> {
        if let Some(id) = id.as_deref() {
            if let Some(command) = self.deferred.find_any(id) {
                return Err(SessionError::deferred_conflict(
                    id,
                    command.command_type(),
                    ConflictingAction::Modified,
                ));
            }
            self.registry.assert_no_non_unique_instance(entity, id)?;
        }

        let mut meta = Map::new();
        if let Some(collection) = self.conventions().collection_name_for(entity) {
            meta.insert(metadata::COLLECTION.to_string(), Value::String(collection));
        }
        if let Some(type_name) = self.conventions().type_name_for(entity) {
            meta.insert(metadata::TYPE_NAME.to_string(), Value::String(type_name));
        }

        self.registry.unmark_deleted(entity);
        debug!(session_id = %self.id, id = ?id, "storing new entity");
        self.registry.insert(DocumentInfo::new(
            id,
            entity.clone(),
            meta,
            change_vector,
            mode,
        ))
    }

    /// Stages a tracked entity for deletion.
    pub fn delete_entity(&mut self, entity: &EntityRef) -> SessionResult<()> {
        self.guard.ensure_not_disposed()?;
        let Some(info) = self.registry.get(entity) else {
            return Err(SessionError::invalid_operation(format!(
                "{entity:?} is not associated with the session, cannot delete unknown entity instance"
            )));
        };
        let id = info.id.clone();

        self.registry.mark_deleted(entity.clone());
        if let Some(id) = id.as_deref() {
            self.registry.take_included(id);
            self.counters.remove(id);
        }
        debug!(session_id = %self.id, id = ?id, "staged delete");
        Ok(())
    }

    /// Deletes a document by id.
    ///
    /// A tracked document that was modified since it was loaded must be
    /// deleted through [`Self::delete_entity`] instead.
    pub fn delete(&mut self, id: &str) -> SessionResult<()> {
        self.delete_with_change_vector(id, None)
    }

    /// Deletes a document by id, expecting `expected_change_vector` when
    /// given.
    pub fn delete_with_change_vector(
        &mut self,
        id: &str,
        expected_change_vector: Option<&str>,
    ) -> SessionResult<()> {
        self.guard.ensure_not_disposed()?;
        if id.is_empty() {
            return Err(SessionError::invalid_argument("id cannot be empty"));
        }

        let mut change_vector = None;
        if let Some(info) = self.registry.get_by_id(id) {
            if let Some(entity) = &info.entity {
                let document = document_for(self.store.mapper().as_ref(), entity, info)?;
                if entity_changed(&document, info, None) {
                    return Err(SessionError::invalid_operation(
                        "can't delete changed entity using identifier, delete the entity instance instead",
                    ));
                }
            }
            change_vector = info.change_vector.clone();
            self.registry.remove_by_id(id);
        }

        self.registry.take_included(id);
        self.registry.register_missing(id);
        self.counters.remove(id);

        let change_vector = match expected_change_vector {
            Some(expected) => Some(expected.to_string()),
            None if self.use_optimistic_concurrency => change_vector,
            None => None,
        };
        debug!(session_id = %self.id, id, "deferred delete");
        self.deferred.defer(CommandData::delete(id, change_vector));
        Ok(())
    }

    /// Adds a command to the next batch.
    pub fn defer(&mut self, command: CommandData) {
        trace!(session_id = %self.id, kind = %command.command_type(), id = ?command.id(), "deferred");
        self.deferred.defer(command);
    }

    /// Adds several commands to the next batch, in order.
    pub fn defer_many(&mut self, commands: impl IntoIterator<Item = CommandData>) {
        for command in commands {
            self.defer(command);
        }
    }
}
