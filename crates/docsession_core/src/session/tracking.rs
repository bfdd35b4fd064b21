//! Tracking entry points and per-entity accessors.

use super::DocumentSession;
use crate::constants::{metadata, DOCUMENT_ID_FIELD_NAME};
use crate::entity::{DocumentInfo, EntityRef, MetadataDictionary};
use crate::error::{SessionError, SessionResult};
use crate::includes::for_each_include_id;
use crate::mapper::EntityMapper;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tracing::{debug, trace};

/// Serializes `entity` and attaches the metadata tracked for it.
pub(super) fn document_for(
    mapper: &dyn EntityMapper,
    entity: &EntityRef,
    info: &DocumentInfo,
) -> SessionResult<Value> {
    let mut document = mapper.to_document(entity, Some(info))?;
    let Some(fields) = document.as_object_mut() else {
        return Err(SessionError::mapping(format!(
            "{entity:?} did not serialize to an object"
        )));
    };
    fields.insert(
        metadata::KEY.to_string(),
        Value::Object(info.metadata.clone()),
    );
    Ok(document)
}

/// Like [`document_for`], but attaches the current values of the metadata
/// wrapper instead of the last folded metadata.
///
/// Also returns whether the wrapper was modified.
pub(super) fn current_document_for(
    mapper: &dyn EntityMapper,
    entity: &EntityRef,
    info: &DocumentInfo,
) -> SessionResult<(Value, bool)> {
    let mut document = document_for(mapper, entity, info)?;
    let Some(instance) = info.existing_metadata_instance() else {
        return Ok((document, false));
    };
    if let Some(fields) = document.as_object_mut() {
        fields.insert(metadata::KEY.to_string(), Value::Object(instance.to_json()));
    }
    Ok((document, instance.is_dirty() || instance.has_dirty_entries()))
}

impl DocumentSession {
    pub(super) fn ensure_tracking(&self, operation: &str) -> SessionResult<()> {
        if self.no_tracking {
            return Err(SessionError::invalid_operation(format!(
                "cannot {operation} an entity in a session with tracking disabled"
            )));
        }
        Ok(())
    }

    /// Returns the entity for a fetched document, tracking it.
    ///
    /// An id that is already tracked returns the tracked entity unchanged. A
    /// previously included document is promoted into the registry.
    pub fn track_entity(&mut self, info: DocumentInfo) -> SessionResult<EntityRef> {
        let id = info
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SessionError::invalid_argument("id cannot be empty"))?;

        if let Some(entity) = self.registry.entity_by_id(&id) {
            trace!(id = %id, "already tracked");
            return Ok(entity.clone());
        }

        let type_hint = info
            .metadata
            .get(metadata::TYPE_NAME)
            .and_then(Value::as_str);
        let document = info.document.as_ref().unwrap_or(&Value::Null);
        let entity = self.store.mapper().to_entity(type_hint, &id, document)?;

        if !self.no_tracking {
            let mut info = info;
            info.entity = Some(entity.clone());
            info.new_document = false;
            self.registry.insert(info)?;
        }
        Ok(entity)
    }

    /// Tracks an entity materialized outside the session.
    pub fn register_external_loaded_entity(&mut self, info: DocumentInfo) -> SessionResult<()> {
        if self.no_tracking {
            return Ok(());
        }
        let entity = info
            .entity
            .clone()
            .ok_or_else(|| SessionError::invalid_argument("entity cannot be empty"))?;
        let id = info
            .id
            .clone()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SessionError::invalid_argument("id cannot be empty"))?;

        if let Some(existing) = self.registry.entity_by_id(&id) {
            if existing == &entity {
                return Ok(());
            }
            return Err(SessionError::invalid_operation(format!(
                "the document {id} is already in the session with a different entity instance"
            )));
        }
        if let Some(existing) = self.registry.get(&entity) {
            return Err(SessionError::invalid_operation(format!(
                "the entity is already in the session with a different id: {}",
                existing.id_str()
            )));
        }
        self.registry.insert(info)
    }

    /// Stores side-loaded documents keyed by id.
    ///
    /// `null` entries and conflicted documents are skipped.
    pub fn register_includes(&mut self, includes: &Map<String, Value>) -> SessionResult<()> {
        if self.no_tracking {
            return Ok(());
        }
        for document in includes.values() {
            if document.is_null() {
                continue;
            }
            let info = DocumentInfo::from_document(document.clone())?;
            if info.is_conflicted() {
                continue;
            }
            self.registry.insert_included(info);
        }
        Ok(())
    }

    /// Records ids referenced through `paths` that came back neither as a
    /// tracked document nor as an include.
    pub fn register_missing_includes(
        &mut self,
        results: &[Option<Value>],
        includes: &Map<String, Value>,
        paths: &[String],
    ) {
        if self.no_tracking || paths.is_empty() {
            return;
        }
        let mut missing = Vec::new();
        for result in results.iter().flatten() {
            for path in paths {
                if path == DOCUMENT_ID_FIELD_NAME {
                    continue;
                }
                for_each_include_id(result, path, |id| {
                    if self.is_loaded(id) {
                        return;
                    }
                    let conflicted = includes
                        .get(id)
                        .and_then(|doc| doc.get(metadata::KEY))
                        .is_some_and(|meta| meta.get(metadata::CONFLICT).is_some());
                    if !conflicted {
                        missing.push(id.to_string());
                    }
                });
            }
        }
        for id in missing {
            self.registry.register_missing(&id);
        }
    }

    /// Returns true if every id, and every document its include paths
    /// reference, is available without a round trip.
    #[must_use]
    pub fn check_if_id_already_included(&self, ids: &[&str], paths: &[&str]) -> bool {
        for id in ids {
            if self.registry.is_known_missing(id) {
                continue;
            }
            let info = self
                .registry
                .get_by_id(id)
                .or_else(|| self.registry.get_included(id));
            let Some(info) = info else {
                return false;
            };
            if info.entity.is_none() && info.document.is_none() {
                return false;
            }
            let Some(document) = &info.document else {
                continue;
            };
            for path in paths {
                let mut has_all = true;
                for_each_include_id(document, path, |include| {
                    has_all &= self.is_loaded(include);
                });
                if !has_all {
                    return false;
                }
            }
        }
        true
    }

    /// Marks `id` as known to be absent.
    pub fn register_missing(&mut self, id: &str) {
        if self.no_tracking {
            return;
        }
        self.registry.register_missing(id);
    }

    /// Forgets that `id` was known to be absent.
    pub fn unregister_missing(&mut self, id: &str) {
        self.registry.unregister_missing(id);
    }

    /// Returns true if `id` is tracked, included or known to be deleted.
    #[must_use]
    pub fn is_loaded(&self, id: &str) -> bool {
        self.is_loaded_or_deleted(id)
    }

    /// Returns true if `id` is tracked, included or known to be deleted.
    #[must_use]
    pub fn is_loaded_or_deleted(&self, id: &str) -> bool {
        self.registry.is_loaded_or_deleted(id)
    }

    /// Returns true if `id` is known missing or staged for deletion.
    #[must_use]
    pub fn is_deleted(&self, id: &str) -> bool {
        self.registry.is_deleted(id)
    }

    /// Stops tracking `entity` without deleting it.
    pub fn evict(&mut self, entity: &EntityRef) {
        if let Some(info) = self.registry.remove_entity(entity) {
            if let Some(id) = info.id.as_deref() {
                self.counters.remove(id);
                debug!(session_id = %self.id, id, "evicted");
            }
        }
    }

    /// Drops every tracked entity, pending deferred command and staged
    /// compare-exchange operation.
    pub fn clear(&mut self) {
        self.registry.clear();
        self.counters.clear();
        self.deferred.take();
        self.cluster.clear();
        debug!(session_id = %self.id, "cleared session");
    }

    pub(super) fn document_info(&self, entity: &EntityRef) -> SessionResult<&DocumentInfo> {
        match self.registry.get(entity) {
            Some(info) => Ok(info),
            None => Err(self.untracked(entity)),
        }
    }

    pub(super) fn document_info_mut(&mut self, entity: &EntityRef) -> SessionResult<&mut DocumentInfo> {
        if self.registry.get(entity).is_none() {
            return Err(self.untracked(entity));
        }
        self.registry
            .get_mut(entity)
            .ok_or_else(|| SessionError::invalid_argument("entity is not tracked"))
    }

    fn untracked(&self, entity: &EntityRef) -> SessionError {
        let Some(id) = self.store.ids().try_get_id(entity) else {
            return SessionError::invalid_operation(format!(
                "could not find the document id for {entity:?}"
            ));
        };
        if let Err(err) = self.registry.assert_no_non_unique_instance(entity, &id) {
            return err;
        }
        SessionError::DocumentNotInSession { id }
    }

    /// Returns the metadata of a tracked entity for reading and writing.
    pub fn metadata_for(&mut self, entity: &EntityRef) -> SessionResult<&mut MetadataDictionary> {
        Ok(self.document_info_mut(entity)?.metadata_instance())
    }

    /// Returns the counter names listed in the metadata of a tracked entity.
    pub fn counters_for(&self, entity: &EntityRef) -> SessionResult<Option<Vec<String>>> {
        let info = self.document_info(entity)?;
        let names = info
            .metadata
            .get(metadata::COUNTERS)
            .and_then(Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            });
        Ok(names)
    }

    /// Returns the change vector of a tracked entity.
    pub fn change_vector_for(&self, entity: &EntityRef) -> SessionResult<Option<String>> {
        Ok(self.document_info(entity)?.change_vector.clone())
    }

    /// Returns the last modification time of a tracked entity.
    pub fn last_modified_for(&self, entity: &EntityRef) -> SessionResult<Option<DateTime<Utc>>> {
        let info = self.document_info(entity)?;
        let Some(raw) = info
            .metadata
            .get(metadata::LAST_MODIFIED)
            .and_then(Value::as_str)
        else {
            return Ok(None);
        };
        let parsed = DateTime::parse_from_rfc3339(raw)
            .map_err(|err| SessionError::mapping(format!("invalid {}: {err}", metadata::LAST_MODIFIED)))?;
        Ok(Some(parsed.with_timezone(&Utc)))
    }

    /// Returns the id of a tracked entity.
    #[must_use]
    pub fn document_id(&self, entity: &EntityRef) -> Option<String> {
        self.registry.get(entity).and_then(|info| info.id.clone())
    }

    /// Returns the number of tracked entities.
    #[must_use]
    pub fn number_of_entities_in_unit_of_work(&self) -> usize {
        self.registry.len()
    }

    /// Excludes a tracked entity from change detection.
    pub fn ignore_changes_for(&mut self, entity: &EntityRef) -> SessionResult<()> {
        self.document_info_mut(entity)?.ignore_changes = true;
        Ok(())
    }
}
