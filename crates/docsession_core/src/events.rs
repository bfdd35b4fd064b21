//! Session lifecycle notifications.
//!
//! Listeners run synchronously, in registration order, while the batch is
//! being compiled. They may read and modify metadata and may defer further
//! commands; those are folded into the same batch.

use crate::commands::CommandData;
use crate::entity::{DocumentInfo, EntityRef, MetadataDictionary};
use uuid::Uuid;

/// Arguments of a `before_store` notification.
pub struct BeforeStoreEventArgs<'a> {
    session_id: Uuid,
    document_id: Option<String>,
    entity: &'a EntityRef,
    info: &'a mut DocumentInfo,
    metadata_accessed: bool,
    deferred: Vec<CommandData>,
}

impl<'a> BeforeStoreEventArgs<'a> {
    pub(crate) fn new(session_id: Uuid, entity: &'a EntityRef, info: &'a mut DocumentInfo) -> Self {
        Self {
            session_id,
            document_id: info.id.clone(),
            entity,
            info,
            metadata_accessed: false,
            deferred: Vec::new(),
        }
    }

    /// Returns the id of the session raising the event.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Returns the id of the document being stored.
    #[must_use]
    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    /// Returns the entity being stored.
    #[must_use]
    pub fn entity(&self) -> &EntityRef {
        self.entity
    }

    /// Returns the document's metadata for modification.
    pub fn metadata(&mut self) -> &mut MetadataDictionary {
        self.metadata_accessed = true;
        self.info.metadata_instance()
    }

    /// Returns true if [`Self::metadata`] was called.
    #[must_use]
    pub fn is_metadata_accessed(&self) -> bool {
        self.metadata_accessed
    }

    /// Adds a command to the batch being compiled.
    pub fn defer(&mut self, command: CommandData) {
        self.deferred.push(command);
    }

    pub(crate) fn into_deferred(self) -> Vec<CommandData> {
        self.deferred
    }
}

/// Arguments of a `before_delete` notification.
pub struct BeforeDeleteEventArgs<'a> {
    session_id: Uuid,
    document_id: &'a str,
    entity: Option<&'a EntityRef>,
    deferred: Vec<CommandData>,
}

impl<'a> BeforeDeleteEventArgs<'a> {
    pub(crate) fn new(session_id: Uuid, document_id: &'a str, entity: Option<&'a EntityRef>) -> Self {
        Self {
            session_id,
            document_id,
            entity,
            deferred: Vec::new(),
        }
    }

    /// Returns the id of the session raising the event.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Returns the id of the document being deleted.
    #[must_use]
    pub fn document_id(&self) -> &str {
        self.document_id
    }

    /// Returns the entity being deleted.
    #[must_use]
    pub fn entity(&self) -> Option<&EntityRef> {
        self.entity
    }

    /// Adds a command to the batch being compiled.
    pub fn defer(&mut self, command: CommandData) {
        self.deferred.push(command);
    }

    pub(crate) fn into_deferred(self) -> Vec<CommandData> {
        self.deferred
    }
}

type BeforeStoreListener = Box<dyn FnMut(&mut BeforeStoreEventArgs<'_>) + Send>;
type BeforeDeleteListener = Box<dyn FnMut(&mut BeforeDeleteEventArgs<'_>) + Send>;

/// Registered listeners of a session.
#[derive(Default)]
pub struct SessionEvents {
    before_store: Vec<BeforeStoreListener>,
    before_delete: Vec<BeforeDeleteListener>,
}

impl SessionEvents {
    /// Creates an empty listener list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a `before_store` listener.
    pub fn on_before_store(
        &mut self,
        listener: impl FnMut(&mut BeforeStoreEventArgs<'_>) + Send + 'static,
    ) {
        self.before_store.push(Box::new(listener));
    }

    /// Registers a `before_delete` listener.
    pub fn on_before_delete(
        &mut self,
        listener: impl FnMut(&mut BeforeDeleteEventArgs<'_>) + Send + 'static,
    ) {
        self.before_delete.push(Box::new(listener));
    }

    /// Returns true if any `before_store` listener is registered.
    #[must_use]
    pub fn has_before_store(&self) -> bool {
        !self.before_store.is_empty()
    }

    /// Drops every listener.
    pub fn clear(&mut self) {
        self.before_store.clear();
        self.before_delete.clear();
    }

    pub(crate) fn emit_before_store(&mut self, args: &mut BeforeStoreEventArgs<'_>) {
        for listener in &mut self.before_store {
            listener(args);
        }
    }

    pub(crate) fn emit_before_delete(&mut self, args: &mut BeforeDeleteEventArgs<'_>) {
        for listener in &mut self.before_delete {
            listener(args);
        }
    }
}

impl std::fmt::Debug for SessionEvents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionEvents")
            .field("before_store", &self.before_store.len())
            .field("before_delete", &self.before_delete.len())
            .finish()
    }
}
