//! Tracking state of one server document.

use super::{EntityRef, MetadataDictionary};
use crate::constants::metadata;
use crate::error::{SessionError, SessionResult};
use crate::types::ConcurrencyCheckMode;
use serde_json::{Map, Value};

/// Everything a session knows about one server document.
#[derive(Debug, Clone)]
pub struct DocumentInfo {
    /// Server document key. Absent for entities not yet identified.
    pub id: Option<String>,
    /// Last known persisted form, including `@metadata`.
    pub document: Option<Value>,
    /// Plain metadata of the document.
    pub metadata: Map<String, Value>,
    /// The tracked object.
    pub entity: Option<EntityRef>,
    /// Concurrency token from the server.
    pub change_vector: Option<String>,
    /// Whether a change vector is sent when the document is written.
    pub concurrency_check_mode: ConcurrencyCheckMode,
    /// True until the document has been committed once.
    pub new_document: bool,
    /// Excludes the entity from dirty checking.
    pub ignore_changes: bool,
    metadata_instance: Option<MetadataDictionary>,
}

impl DocumentInfo {
    /// Creates tracking state for a document about to be stored.
    pub fn new(
        id: Option<String>,
        entity: EntityRef,
        metadata: Map<String, Value>,
        change_vector: Option<String>,
        concurrency_check_mode: ConcurrencyCheckMode,
    ) -> Self {
        Self {
            id,
            document: None,
            metadata,
            entity: Some(entity),
            change_vector,
            concurrency_check_mode,
            new_document: true,
            ignore_changes: false,
            metadata_instance: None,
        }
    }

    /// Builds tracking state from a raw document returned by the server.
    ///
    /// The document must carry `@metadata` with an `@id` and a
    /// `@change-vector`.
    pub fn from_document(document: Value) -> SessionResult<Self> {
        let meta = document
            .get(metadata::KEY)
            .and_then(Value::as_object)
            .cloned()
            .ok_or_else(|| SessionError::invalid_argument("document must have a metadata"))?;

        let id = meta
            .get(metadata::ID)
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| SessionError::invalid_argument("document must have an id"))?;

        let change_vector = meta
            .get(metadata::CHANGE_VECTOR)
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| SessionError::MissingChangeVector { id: id.clone() })?;

        Ok(Self {
            id: Some(id),
            document: Some(document),
            metadata: meta,
            entity: None,
            change_vector: Some(change_vector),
            concurrency_check_mode: ConcurrencyCheckMode::Auto,
            new_document: false,
            ignore_changes: false,
            metadata_instance: None,
        })
    }

    /// Returns the id, or an empty string for unidentified documents.
    #[must_use]
    pub fn id_str(&self) -> &str {
        self.id.as_deref().unwrap_or_default()
    }

    /// Returns the mutable metadata wrapper, creating it on first access.
    pub fn metadata_instance(&mut self) -> &mut MetadataDictionary {
        let metadata = &self.metadata;
        self.metadata_instance
            .get_or_insert_with(|| MetadataDictionary::from_json(metadata))
    }

    /// Returns the metadata wrapper if it was ever created.
    #[must_use]
    pub fn existing_metadata_instance(&self) -> Option<&MetadataDictionary> {
        self.metadata_instance.as_ref()
    }

    /// Drops the metadata wrapper; the next access rebuilds it.
    pub fn reset_metadata_instance(&mut self) {
        self.metadata_instance = None;
    }

    /// Copies the metadata wrapper back into [`DocumentInfo::metadata`].
    ///
    /// Returns true if the wrapper or any of its entries is dirty. Calling
    /// this twice without further changes yields the same metadata.
    pub fn fold_metadata_modifications(&mut self) -> bool {
        let Some(instance) = &self.metadata_instance else {
            return false;
        };
        let dirty = instance.is_dirty() || instance.has_dirty_entries();
        self.metadata = instance.to_json();
        dirty
    }

    /// Returns the collection recorded in the metadata.
    #[must_use]
    pub fn collection(&self) -> Option<&str> {
        self.metadata.get(metadata::COLLECTION).and_then(Value::as_str)
    }

    /// Returns true if the server flagged the document as conflicted.
    #[must_use]
    pub fn is_conflicted(&self) -> bool {
        self.metadata.contains_key(metadata::CONFLICT)
    }
}
