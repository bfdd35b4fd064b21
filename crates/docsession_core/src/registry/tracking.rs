//! Dual-indexed tracking tables.

use super::{CaseInsensitiveMap, CaseInsensitiveSet};
use crate::constants::is_server_assigned_id;
use crate::entity::{DocumentInfo, EntityRef};
use crate::error::{SessionError, SessionResult};
use indexmap::{IndexMap, IndexSet};
use tracing::trace;

/// Tracking tables of a session.
///
/// Every tracked document owns exactly one [`DocumentInfo`], stored under its
/// entity handle. The id table maps an id to that handle, so the same info is
/// reachable from both sides.
#[derive(Debug, Default)]
pub struct DocumentRegistry {
    by_entity: IndexMap<EntityRef, DocumentInfo>,
    by_id: CaseInsensitiveMap<EntityRef>,
    included: CaseInsensitiveMap<DocumentInfo>,
    known_missing: CaseInsensitiveSet,
    deleted: IndexSet<EntityRef>,
}

impl DocumentRegistry {
    /// Creates empty tables.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking `info`, which must hold an entity.
    ///
    /// The id is promoted out of the included and missing tables. An id
    /// already mapped to another entity is left untouched; callers check
    /// uniqueness first with [`DocumentRegistry::assert_no_non_unique_instance`].
    pub fn insert(&mut self, info: DocumentInfo) -> SessionResult<()> {
        let entity = info
            .entity
            .clone()
            .ok_or_else(|| SessionError::invalid_argument("tracked document must hold an entity"))?;

        if let Some(id) = info.id.clone() {
            self.included.remove(&id);
            self.known_missing.remove(&id);
            if !self.by_id.contains_key(&id) {
                self.by_id.insert(id.as_str(), entity.clone());
            }
            trace!(id = %id, "tracking document");
        }
        self.by_entity.insert(entity, info);
        Ok(())
    }

    /// Fails if `id` is already associated with a live entity other than
    /// `entity`.
    ///
    /// Ids the server assigns at commit time are exempt.
    pub fn assert_no_non_unique_instance(&self, entity: &EntityRef, id: &str) -> SessionResult<()> {
        if id.is_empty() || is_server_assigned_id(id) {
            return Ok(());
        }
        match self.by_id.get(id) {
            Some(existing) if existing != entity => {
                Err(SessionError::NonUniqueObject { id: id.to_string() })
            }
            _ => Ok(()),
        }
    }

    /// Returns the info of a tracked entity.
    #[must_use]
    pub fn get(&self, entity: &EntityRef) -> Option<&DocumentInfo> {
        self.by_entity.get(entity)
    }

    /// Returns the info of a tracked entity for modification.
    pub fn get_mut(&mut self, entity: &EntityRef) -> Option<&mut DocumentInfo> {
        self.by_entity.get_mut(entity)
    }

    /// Returns the entity tracked under `id`.
    #[must_use]
    pub fn entity_by_id(&self, id: &str) -> Option<&EntityRef> {
        self.by_id.get(id)
    }

    /// Returns the info tracked under `id`.
    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<&DocumentInfo> {
        self.by_id
            .get(id)
            .and_then(|entity| self.by_entity.get(entity))
    }

    /// Returns the info tracked under `id` for modification.
    pub fn get_by_id_mut(&mut self, id: &str) -> Option<&mut DocumentInfo> {
        let entity = self.by_id.get(id)?;
        self.by_entity.get_mut(entity)
    }

    /// Stops tracking `entity`, returning its info.
    ///
    /// The id entry is only dropped if it points at this entity.
    pub fn remove_entity(&mut self, entity: &EntityRef) -> Option<DocumentInfo> {
        let info = self.by_entity.shift_remove(entity)?;
        if let Some(id) = info.id.as_deref() {
            if self.by_id.get(id) == Some(entity) {
                self.by_id.remove(id);
            }
        }
        self.deleted.shift_remove(entity);
        Some(info)
    }

    /// Stops tracking the document under `id`, returning its info.
    pub fn remove_by_id(&mut self, id: &str) -> Option<DocumentInfo> {
        let entity = self.by_id.remove(id)?;
        self.deleted.shift_remove(&entity);
        self.by_entity.shift_remove(&entity)
    }

    /// Re-keys a tracked entity under its current id, replacing any stale
    /// id entry for the same entity.
    pub fn reindex(&mut self, entity: &EntityRef, previous_id: Option<&str>) {
        if let Some(previous) = previous_id {
            if self.by_id.get(previous) == Some(entity) {
                self.by_id.remove(previous);
            }
        }
        if let Some(id) = self.by_entity.get(entity).and_then(|info| info.id.clone()) {
            self.known_missing.remove(&id);
            self.included.remove(&id);
            self.by_id.insert(id, entity.clone());
        }
    }

    /// Stages `entity` for deletion.
    pub fn mark_deleted(&mut self, entity: EntityRef) {
        self.deleted.insert(entity);
    }

    /// Withdraws a staged deletion. Returns false if none was staged.
    pub fn unmark_deleted(&mut self, entity: &EntityRef) -> bool {
        self.deleted.shift_remove(entity)
    }

    /// Returns true if `entity` is staged for deletion.
    #[must_use]
    pub fn is_marked_deleted(&self, entity: &EntityRef) -> bool {
        self.deleted.contains(entity)
    }

    /// Iterates over the entities staged for deletion, in staging order.
    pub fn deleted_entities(&self) -> impl Iterator<Item = &EntityRef> {
        self.deleted.iter()
    }

    /// Returns the number of staged deletions.
    #[must_use]
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    /// Records `id` as known to be absent on the server.
    ///
    /// Ids that are currently tracked are left alone; they have to be
    /// removed first.
    pub fn register_missing(&mut self, id: &str) {
        if self.by_id.contains_key(id) {
            return;
        }
        self.known_missing.insert(id);
    }

    /// Forgets that `id` was absent.
    pub fn unregister_missing(&mut self, id: &str) {
        self.known_missing.remove(id);
    }

    /// Returns true if `id` is known to be absent.
    #[must_use]
    pub fn is_known_missing(&self, id: &str) -> bool {
        self.known_missing.contains(id)
    }

    /// Returns true if `id` is known missing, or its tracked entity is staged
    /// for deletion.
    #[must_use]
    pub fn is_deleted(&self, id: &str) -> bool {
        if self.known_missing.contains(id) {
            return true;
        }
        self.by_id
            .get(id)
            .is_some_and(|entity| self.deleted.contains(entity))
    }

    /// Returns true if `id` is tracked with content, included, or deleted.
    #[must_use]
    pub fn is_loaded_or_deleted(&self, id: &str) -> bool {
        let loaded = self
            .get_by_id(id)
            .is_some_and(|info| info.document.is_some() || info.entity.is_some());
        loaded || self.is_deleted(id) || self.included.contains_key(id)
    }

    /// Stores a side-loaded document until it is promoted.
    pub fn insert_included(&mut self, info: DocumentInfo) {
        if let Some(id) = info.id.clone() {
            self.included.insert(id, info);
        }
    }

    /// Removes and returns a side-loaded document.
    pub fn take_included(&mut self, id: &str) -> Option<DocumentInfo> {
        self.included.remove(id)
    }

    /// Returns a side-loaded document.
    #[must_use]
    pub fn get_included(&self, id: &str) -> Option<&DocumentInfo> {
        self.included.get(id)
    }

    /// Returns the number of side-loaded documents.
    #[must_use]
    pub fn included_count(&self) -> usize {
        self.included.len()
    }

    /// Iterates over every tracked entity and its info.
    pub fn entries(&self) -> impl Iterator<Item = (&EntityRef, &DocumentInfo)> {
        self.by_entity.iter()
    }

    /// Iterates mutably over tracked entities that are not staged for
    /// deletion.
    pub fn live_entries_mut(&mut self) -> impl Iterator<Item = (&EntityRef, &mut DocumentInfo)> {
        let deleted = &self.deleted;
        self.by_entity
            .iter_mut()
            .filter(move |(entity, _)| !deleted.contains(*entity))
    }

    /// Returns the number of tracked entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_entity.len()
    }

    /// Returns true if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_entity.is_empty()
    }

    /// Drops every table.
    pub fn clear(&mut self) {
        self.by_entity.clear();
        self.by_id.clear();
        self.included.clear();
        self.known_missing.clear();
        self.deleted.clear();
    }

    /// Checks the cross-table invariants.
    ///
    /// Every id entry must point at a tracked entity whose info carries the
    /// same id, no id may be both tracked and known missing, and every
    /// staged deletion must be tracked.
    pub fn verify_invariants(&self) -> SessionResult<()> {
        for (id, entity) in self.by_id.iter() {
            let info = self.by_entity.get(entity).ok_or_else(|| {
                SessionError::invalid_operation(format!("id {id} points at an untracked entity"))
            })?;
            let matches = info
                .id
                .as_deref()
                .is_some_and(|tracked| tracked.to_lowercase() == id.to_lowercase());
            if !matches {
                return Err(SessionError::invalid_operation(format!(
                    "id {id} points at an entity tracked as {:?}",
                    info.id
                )));
            }
            if self.known_missing.contains(id) {
                return Err(SessionError::invalid_operation(format!(
                    "id {id} is both tracked and known missing"
                )));
            }
        }
        for (entity, info) in &self.by_entity {
            if info.entity.as_ref() != Some(entity) {
                return Err(SessionError::invalid_operation(format!(
                    "info for {entity:?} holds a different entity"
                )));
            }
        }
        if let Some(entity) = self.deleted.iter().find(|e| !self.by_entity.contains_key(*e)) {
            return Err(SessionError::invalid_operation(format!(
                "{entity:?} is staged for deletion but not tracked"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ConcurrencyCheckMode;
    use serde_json::Map;

    struct Order;

    fn info(id: &str, entity: &EntityRef) -> DocumentInfo {
        DocumentInfo::new(
            Some(id.to_string()),
            entity.clone(),
            Map::new(),
            None,
            ConcurrencyCheckMode::Auto,
        )
    }

    #[test]
    fn insert_indexes_both_sides() {
        let mut registry = DocumentRegistry::new();
        let entity = EntityRef::new(Order);
        registry.insert(info("orders/1", &entity)).unwrap();

        assert_eq!(registry.entity_by_id("ORDERS/1"), Some(&entity));
        assert_eq!(registry.get(&entity).unwrap().id_str(), "orders/1");
        registry.verify_invariants().unwrap();
    }

    #[test]
    fn non_unique_instance_is_rejected() {
        let mut registry = DocumentRegistry::new();
        let first = EntityRef::new(Order);
        let second = EntityRef::new(Order);
        registry.insert(info("orders/1", &first)).unwrap();

        assert!(registry.assert_no_non_unique_instance(&first, "orders/1").is_ok());
        let err = registry
            .assert_no_non_unique_instance(&second, "orders/1")
            .unwrap_err();
        assert!(matches!(err, SessionError::NonUniqueObject { .. }));
        assert!(registry.assert_no_non_unique_instance(&second, "orders|").is_ok());
    }

    #[test]
    fn insert_promotes_out_of_missing_and_included() {
        let mut registry = DocumentRegistry::new();
        registry.register_missing("orders/1");
        assert!(registry.is_deleted("orders/1"));

        let entity = EntityRef::new(Order);
        registry.insert(info("orders/1", &entity)).unwrap();
        assert!(!registry.is_known_missing("orders/1"));
        assert!(!registry.is_deleted("orders/1"));
        registry.verify_invariants().unwrap();
    }

    #[test]
    fn missing_registration_is_idempotent() {
        let mut registry = DocumentRegistry::new();
        registry.register_missing("products/3");
        registry.register_missing("products/3");
        assert!(registry.is_deleted("products/3"));
        registry.unregister_missing("products/3");
        assert!(!registry.is_deleted("products/3"));
    }

    #[test]
    fn tracked_ids_are_never_missing() {
        let mut registry = DocumentRegistry::new();
        let entity = EntityRef::new(Order);
        registry.insert(info("orders/1", &entity)).unwrap();

        registry.register_missing("ORDERS/1");
        assert!(!registry.is_known_missing("orders/1"));
        registry.verify_invariants().unwrap();
    }

    #[test]
    fn staged_deletion_counts_as_deleted() {
        let mut registry = DocumentRegistry::new();
        let entity = EntityRef::new(Order);
        registry.insert(info("orders/1", &entity)).unwrap();
        registry.mark_deleted(entity.clone());

        assert!(registry.is_deleted("orders/1"));
        assert_eq!(registry.live_entries_mut().count(), 0);

        registry.unmark_deleted(&entity);
        assert!(!registry.is_deleted("orders/1"));
    }

    #[test]
    fn remove_entity_clears_all_tables() {
        let mut registry = DocumentRegistry::new();
        let entity = EntityRef::new(Order);
        registry.insert(info("orders/1", &entity)).unwrap();
        registry.mark_deleted(entity.clone());

        assert!(registry.remove_entity(&entity).is_some());
        assert!(registry.entity_by_id("orders/1").is_none());
        assert_eq!(registry.deleted_count(), 0);
        registry.verify_invariants().unwrap();
    }

    #[test]
    fn reindex_moves_id_entry() {
        let mut registry = DocumentRegistry::new();
        let entity = EntityRef::new(Order);
        registry.insert(info("orders|", &entity)).unwrap();

        registry.get_mut(&entity).unwrap().id = Some("orders/7-A".into());
        registry.reindex(&entity, Some("orders|"));

        assert!(registry.entity_by_id("orders|").is_none());
        assert_eq!(registry.entity_by_id("orders/7-a"), Some(&entity));
        registry.verify_invariants().unwrap();
    }
}
