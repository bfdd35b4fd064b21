//! Loading documents by id and refreshing tracked entities.

use super::DocumentSession;
use crate::entity::{DocumentInfo, EntityRef};
use crate::error::{SessionError, SessionResult};
use crate::transport::{GetDocumentsResult, ReadRequest};
use indexmap::IndexMap;
use std::sync::Arc;
use tracing::debug;

impl DocumentSession {
    /// Loads one document.
    ///
    /// Returns `None` when the document does not exist or is known to be
    /// deleted in this session.
    pub async fn load(&mut self, id: &str) -> SessionResult<Option<EntityRef>> {
        let mut loaded = self.load_with_includes(&[id], &[]).await?;
        Ok(loaded.pop().flatten())
    }

    /// Loads several documents. The result is aligned with `ids`.
    pub async fn load_many(&mut self, ids: &[&str]) -> SessionResult<Vec<Option<EntityRef>>> {
        self.load_with_includes(ids, &[]).await
    }

    /// Loads several documents and side-loads the documents referenced by
    /// `includes`. The result is aligned with `ids`.
    ///
    /// Documents already tracked or included are served without a round
    /// trip; at most one request is made.
    pub async fn load_with_includes(
        &mut self,
        ids: &[&str],
        includes: &[&str],
    ) -> SessionResult<Vec<Option<EntityRef>>> {
        self.guard.ensure_not_disposed()?;
        if ids.iter().any(|id| id.is_empty()) {
            return Err(SessionError::invalid_argument("id cannot be empty"));
        }

        let mut fetched = IndexMap::new();
        if !self.check_if_id_already_included(ids, includes) {
            let mut to_fetch: IndexMap<String, &str> = IndexMap::new();
            for id in ids {
                if !self.is_loaded_or_deleted(id) {
                    to_fetch.entry(id.to_lowercase()).or_insert(*id);
                }
            }
            if !to_fetch.is_empty() {
                let ids: Vec<String> = to_fetch.values().map(|id| (*id).to_string()).collect();
                fetched = self.fetch_documents(ids, includes).await?;
            }
        }

        let mut loaded = Vec::with_capacity(ids.len());
        for id in ids {
            loaded.push(self.resolve_loaded(id, &fetched)?);
        }
        Ok(loaded)
    }

    async fn fetch_documents(
        &mut self,
        ids: Vec<String>,
        includes: &[&str],
    ) -> SessionResult<IndexMap<String, EntityRef>> {
        self.increment_request_count()?;
        let paths: Vec<String> = includes.iter().map(|path| (*path).to_string()).collect();
        let request = ReadRequest::GetDocuments {
            ids: ids.clone(),
            includes: paths.clone(),
        };
        debug!(session_id = %self.id, count = ids.len(), "fetching documents");

        let transport = Arc::clone(self.store.transport());
        let response = transport
            .execute(&self.database, &request, &self.session_info)
            .await?;
        let result: GetDocumentsResult = serde_json::from_value(response)?;
        if result.results.len() != ids.len() {
            return Err(SessionError::mapping(format!(
                "expected {} results, got {}",
                ids.len(),
                result.results.len()
            )));
        }

        self.register_includes(&result.includes)?;

        let mut fetched = IndexMap::new();
        for (id, document) in ids.iter().zip(&result.results) {
            match document {
                Some(document) if !document.is_null() => {
                    let info = DocumentInfo::from_document(document.clone())?;
                    let entity = self.track_entity(info)?;
                    fetched.insert(id.to_lowercase(), entity);
                }
                _ => self.register_missing(id),
            }
        }

        self.register_missing_includes(&result.results, &result.includes, &paths);
        Ok(fetched)
    }

    fn resolve_loaded(
        &mut self,
        id: &str,
        fetched: &IndexMap<String, EntityRef>,
    ) -> SessionResult<Option<EntityRef>> {
        if self.is_deleted(id) {
            return Ok(None);
        }
        if let Some(entity) = self.registry.entity_by_id(id) {
            return Ok(Some(entity.clone()));
        }
        if let Some(info) = self.registry.take_included(id) {
            return self.track_entity(info).map(Some);
        }
        Ok(fetched.get(&id.to_lowercase()).cloned())
    }

    /// Re-fetches a tracked entity and overwrites it with the stored
    /// version.
    pub async fn refresh(&mut self, entity: &EntityRef) -> SessionResult<()> {
        self.guard.ensure_not_disposed()?;
        let id = self
            .document_info(entity)?
            .id
            .clone()
            .ok_or_else(|| SessionError::invalid_operation("cannot refresh a transient instance"))?;

        self.increment_request_count()?;
        let request = ReadRequest::GetDocuments {
            ids: vec![id.clone()],
            includes: Vec::new(),
        };
        let transport = Arc::clone(self.store.transport());
        let response = transport
            .execute(&self.database, &request, &self.session_info)
            .await?;
        let result: GetDocumentsResult = serde_json::from_value(response)?;

        let Some(document) = result.results.into_iter().next().flatten().filter(|doc| !doc.is_null()) else {
            return Err(SessionError::invalid_operation(format!(
                "document '{id}' no longer exists and was probably deleted"
            )));
        };
        let fresh = DocumentInfo::from_document(document.clone())?;
        self.store.mapper().populate(entity, &document)?;

        let info = self.document_info_mut(entity)?;
        info.metadata = fresh.metadata;
        info.change_vector = fresh.change_vector;
        info.document = Some(document);
        info.new_document = false;
        info.reset_metadata_instance();
        debug!(session_id = %self.id, id = %id, "refreshed");
        Ok(())
    }
}
