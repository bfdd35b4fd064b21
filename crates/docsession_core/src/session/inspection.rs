//! Change introspection.

use super::tracking::current_document_for;
use super::DocumentSession;
use crate::changes::{entity_changed, ChangeType, DocumentsChanges};
use crate::constants::metadata;
use crate::entity::{DocumentInfo, EntityRef};
use crate::error::SessionResult;
use serde_json::Value;
use std::collections::BTreeMap;

impl DocumentSession {
    /// Returns true if any tracked entity changed or any deletion is
    /// staged. Deferred commands are not considered.
    pub fn has_changes(&self) -> SessionResult<bool> {
        for (entity, info) in self.registry.entries() {
            if !info.ignore_changes && self.is_dirty(entity, info)? {
                return Ok(true);
            }
        }
        Ok(self.registry.deleted_count() > 0)
    }

    /// Returns true if a tracked entity differs from its baseline.
    ///
    /// Untracked entities report false.
    pub fn has_changed(&self, entity: &EntityRef) -> SessionResult<bool> {
        let Some(info) = self.registry.get(entity) else {
            return Ok(false);
        };
        self.is_dirty(entity, info)
    }

    fn is_dirty(&self, entity: &EntityRef, info: &DocumentInfo) -> SessionResult<bool> {
        let (document, metadata_dirty) =
            current_document_for(self.store.mapper().as_ref(), entity, info)?;
        Ok(metadata_dirty || entity_changed(&document, info, None))
    }

    /// Returns the field-level changes of every modified or deleted
    /// document, keyed by id.
    ///
    /// Edits made through the metadata wrapper are included. Entities still
    /// waiting for a server-assigned id are not listed.
    pub fn what_changed(&self) -> SessionResult<BTreeMap<String, Vec<DocumentsChanges>>> {
        let mut changes = BTreeMap::new();
        let mapper = self.store.mapper().as_ref();

        for entity in self.registry.deleted_entities() {
            if let Some(id) = self.registry.get(entity).and_then(|info| info.id.clone()) {
                changes.insert(id, vec![DocumentsChanges::document(ChangeType::DocumentDeleted)]);
            }
        }

        for (entity, info) in self.registry.entries() {
            if info.ignore_changes || self.registry.is_marked_deleted(entity) {
                continue;
            }
            let Some(id) = info.id.as_deref().filter(|id| !id.is_empty()) else {
                continue;
            };
            let (document, metadata_dirty) = current_document_for(mapper, entity, info)?;
            let mut found = Vec::new();
            let changed = entity_changed(&document, info, Some(&mut found));
            if metadata_dirty && found.is_empty() {
                found.push(DocumentsChanges::field(
                    "",
                    metadata::KEY,
                    Some(&Value::Object(info.metadata.clone())),
                    document.get(metadata::KEY),
                    ChangeType::FieldChanged,
                ));
            }
            if changed || metadata_dirty {
                changes.insert(id.to_string(), found);
            }
        }
        Ok(changes)
    }
}
