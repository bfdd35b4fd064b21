//! Serde-backed entity mapper and identifier strategy.
//!
//! Entity types are registered up front. Documents are plain JSON objects;
//! the entity's own `id` field is not part of the stored body.

use async_trait::async_trait;
use docsession_core::constants::metadata;
use docsession_core::{
    DocumentInfo, EntityMapper, EntityRef, IdentifierStrategy, SessionError, SessionResult,
};
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::any::TypeId;
use std::collections::HashMap;

/// An entity type the [`TypeRegistry`] can map.
pub trait Document: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Returns the document id held by the entity.
    fn id(&self) -> Option<&str>;

    /// Writes the document id into the entity.
    fn set_id(&mut self, id: String);
}

#[derive(Clone)]
struct Registration {
    type_name: &'static str,
    collection: String,
    to_entity: fn(&str, &Value) -> SessionResult<EntityRef>,
    to_document: fn(&EntityRef) -> SessionResult<Value>,
    populate: fn(&EntityRef, &Value) -> SessionResult<()>,
    get_id: fn(&EntityRef) -> Option<String>,
    set_id: fn(&EntityRef, &str) -> bool,
}

/// Maps registered [`Document`] types and hands out `collection/n-A` ids.
#[derive(Default)]
pub struct TypeRegistry {
    by_type: HashMap<TypeId, Registration>,
    by_name: HashMap<String, TypeId>,
    by_collection: HashMap<String, TypeId>,
    next_ids: Mutex<HashMap<String, u64>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` as stored in `collection`.
    #[must_use]
    pub fn register<T: Document>(mut self, collection: &str) -> Self {
        let registration = Registration {
            type_name: EntityRef::type_name_of::<T>(),
            collection: collection.to_string(),
            to_entity: to_entity::<T>,
            to_document: to_document::<T>,
            populate: populate::<T>,
            get_id: get_id::<T>,
            set_id: set_id::<T>,
        };
        let type_id = TypeId::of::<T>();
        self.by_name
            .insert(registration.type_name.to_lowercase(), type_id);
        self.by_collection.insert(collection.to_lowercase(), type_id);
        self.by_type.insert(type_id, registration);
        self
    }

    fn for_entity(&self, entity: &EntityRef) -> SessionResult<&Registration> {
        self.by_type.get(&entity.type_id()).ok_or_else(|| {
            SessionError::mapping(format!("type {} is not registered", entity.type_name()))
        })
    }

    fn for_document(&self, type_hint: Option<&str>, document: &Value) -> SessionResult<&Registration> {
        let by_hint = type_hint.and_then(|name| self.by_name.get(&name.to_lowercase()));
        let by_collection = || {
            document
                .get(metadata::KEY)
                .and_then(|meta| meta.get(metadata::COLLECTION))
                .and_then(Value::as_str)
                .and_then(|collection| self.by_collection.get(&collection.to_lowercase()))
        };
        by_hint
            .or_else(by_collection)
            .and_then(|type_id| self.by_type.get(type_id))
            .ok_or_else(|| SessionError::mapping("cannot determine the entity type of the document"))
    }
}

impl std::fmt::Debug for TypeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types: Vec<_> = self
            .by_type
            .values()
            .map(|registration| (registration.type_name, registration.collection.as_str()))
            .collect();
        f.debug_struct("TypeRegistry").field("types", &types).finish()
    }
}

impl EntityMapper for TypeRegistry {
    fn to_entity(&self, type_hint: Option<&str>, id: &str, document: &Value) -> SessionResult<EntityRef> {
        let registration = self.for_document(type_hint, document)?;
        (registration.to_entity)(id, document)
    }

    fn to_document(&self, entity: &EntityRef, _info: Option<&DocumentInfo>) -> SessionResult<Value> {
        (self.for_entity(entity)?.to_document)(entity)
    }

    fn populate(&self, entity: &EntityRef, document: &Value) -> SessionResult<()> {
        (self.for_entity(entity)?.populate)(entity, document)
    }
}

#[async_trait]
impl IdentifierStrategy for TypeRegistry {
    fn try_get_id(&self, entity: &EntityRef) -> Option<String> {
        let registration = self.by_type.get(&entity.type_id())?;
        (registration.get_id)(entity)
    }

    async fn generate_id(
        &self,
        _database: &str,
        collection: Option<&str>,
        entity: &EntityRef,
    ) -> SessionResult<String> {
        let collection = match collection {
            Some(collection) => collection.to_string(),
            None => self.for_entity(entity)?.collection.clone(),
        };
        let prefix = collection.to_lowercase();
        let mut next_ids = self.next_ids.lock();
        let next = next_ids.entry(prefix.clone()).or_insert(0);
        *next += 1;
        Ok(format!("{prefix}/{next}-A"))
    }

    fn try_set_id(&self, entity: &EntityRef, id: &str) -> SessionResult<()> {
        let registration = self.for_entity(entity)?;
        if (registration.set_id)(entity, id) {
            Ok(())
        } else {
            Err(SessionError::mapping(format!("cannot set id on {entity:?}")))
        }
    }

    /// Entities of a registered type are left for the server to name.
    fn remember_entity_for_document_id_generation(&self, entity: &EntityRef) -> SessionResult<()> {
        self.for_entity(entity).map(|_| ())
    }
}

/// Returns the document body without `@metadata` and `id`.
fn body_of(document: &Value) -> Value {
    let mut body = document.clone();
    if let Some(fields) = body.as_object_mut() {
        fields.remove(metadata::KEY);
        fields.remove("id");
    }
    body
}

fn to_entity<T: Document>(id: &str, document: &Value) -> SessionResult<EntityRef> {
    let mut value: T = serde_json::from_value(body_of(document))?;
    value.set_id(id.to_string());
    Ok(EntityRef::new(value))
}

fn to_document<T: Document>(entity: &EntityRef) -> SessionResult<Value> {
    let value = entity
        .read::<T>()
        .ok_or_else(|| SessionError::mapping(format!("{entity:?} is not a {}", EntityRef::type_name_of::<T>())))?;
    Ok(body_of(&serde_json::to_value(&*value)?))
}

fn populate<T: Document>(entity: &EntityRef, document: &Value) -> SessionResult<()> {
    let mut fresh: T = serde_json::from_value(body_of(document))?;
    let mut value = entity
        .write::<T>()
        .ok_or_else(|| SessionError::mapping(format!("{entity:?} is not a {}", EntityRef::type_name_of::<T>())))?;
    if let Some(id) = value.id().map(str::to_string) {
        fresh.set_id(id);
    }
    *value = fresh;
    Ok(())
}

fn get_id<T: Document>(entity: &EntityRef) -> Option<String> {
    entity
        .read::<T>()
        .and_then(|value| value.id().map(str::to_string))
}

fn set_id<T: Document>(entity: &EntityRef, id: &str) -> bool {
    entity
        .update(|value: &mut T| value.set_id(id.to_string()))
        .is_some()
}
