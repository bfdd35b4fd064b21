//! Entity marshalling and identifier collaborators.

use crate::entity::{DocumentInfo, EntityRef};
use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use serde_json::Value;

/// Converts between application objects and raw documents.
///
/// Documents produced by [`EntityMapper::to_document`] carry no
/// `@metadata`; the session attaches it.
pub trait EntityMapper: Send + Sync {
    /// Builds an entity from a raw document. `type_hint` is the type marker
    /// found in the document's metadata, if any.
    fn to_entity(&self, type_hint: Option<&str>, id: &str, document: &Value) -> SessionResult<EntityRef>;

    /// Serializes an entity. `info` is the tracking state of the entity, when
    /// it is tracked.
    fn to_document(&self, entity: &EntityRef, info: Option<&DocumentInfo>) -> SessionResult<Value>;

    /// Overwrites the contents of `entity` from a raw document.
    fn populate(&self, entity: &EntityRef, document: &Value) -> SessionResult<()>;
}

/// Reads, generates and assigns document identifiers.
#[async_trait]
pub trait IdentifierStrategy: Send + Sync {
    /// Returns the identifier already held by `entity`, if any.
    fn try_get_id(&self, entity: &EntityRef) -> Option<String>;

    /// Generates an identifier for a new entity of `collection`.
    async fn generate_id(
        &self,
        database: &str,
        collection: Option<&str>,
        entity: &EntityRef,
    ) -> SessionResult<String>;

    /// Writes `id` into `entity`.
    fn try_set_id(&self, entity: &EntityRef, id: &str) -> SessionResult<()>;

    /// Called instead of [`Self::generate_id`] when client-side identifier
    /// generation is disabled.
    fn remember_entity_for_document_id_generation(&self, _entity: &EntityRef) -> SessionResult<()> {
        Err(SessionError::not_implemented(
            "you cannot set generate_document_ids_on_store to false without implementing \
             remember_entity_for_document_id_generation",
        ))
    }
}
