//! Owning context shared by sessions.

use crate::config::{Conventions, SessionOptions};
use crate::error::{SessionError, SessionResult};
use crate::mapper::{EntityMapper, IdentifierStrategy};
use crate::session::DocumentSession;
use crate::transport::Transport;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Long-lived context sessions are opened from.
///
/// Owns the collaborators and the one piece of state sessions write back:
/// the last cluster transaction index observed per database.
pub struct StoreContext {
    identifier: String,
    database: Option<String>,
    conventions: Conventions,
    transport: Arc<dyn Transport>,
    mapper: Arc<dyn EntityMapper>,
    ids: Arc<dyn IdentifierStrategy>,
    last_transaction_index: RwLock<HashMap<String, u64>>,
}

impl StoreContext {
    /// Starts building a store context.
    pub fn builder(
        transport: Arc<dyn Transport>,
        mapper: Arc<dyn EntityMapper>,
        ids: Arc<dyn IdentifierStrategy>,
    ) -> StoreContextBuilder {
        StoreContextBuilder {
            identifier: None,
            database: None,
            conventions: Conventions::default(),
            transport,
            mapper,
            ids,
        }
    }

    /// Opens a new session.
    ///
    /// Fails if neither `options` nor the store name a database.
    pub fn open_session(self: &Arc<Self>, options: SessionOptions) -> SessionResult<DocumentSession> {
        let database = options
            .database
            .clone()
            .or_else(|| self.database.clone())
            .ok_or_else(|| {
                SessionError::invalid_operation(
                    "cannot open a session without specifying a name of a database \
                     to operate on; database has to be set either in the session \
                     options or on the store",
                )
            })?;
        DocumentSession::new(Arc::clone(self), database, options)
    }

    /// Returns the store identifier.
    #[must_use]
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Returns the default database.
    #[must_use]
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// Returns the conventions.
    #[must_use]
    pub fn conventions(&self) -> &Conventions {
        &self.conventions
    }

    /// Returns the transport.
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Returns the entity mapper.
    #[must_use]
    pub fn mapper(&self) -> &Arc<dyn EntityMapper> {
        &self.mapper
    }

    /// Returns the identifier strategy.
    #[must_use]
    pub fn ids(&self) -> &Arc<dyn IdentifierStrategy> {
        &self.ids
    }

    /// Returns the last cluster transaction index seen for `database`.
    #[must_use]
    pub fn last_transaction_index(&self, database: &str) -> Option<u64> {
        self.last_transaction_index
            .read()
            .get(&database.to_lowercase())
            .copied()
    }

    /// Records a cluster transaction index. Lower indexes are ignored.
    pub fn set_last_transaction_index(&self, database: &str, index: Option<u64>) {
        let Some(index) = index else {
            return;
        };
        let mut indexes = self.last_transaction_index.write();
        let entry = indexes.entry(database.to_lowercase()).or_insert(0);
        if index > *entry {
            debug!(database, index, "advancing last transaction index");
            *entry = index;
        }
    }
}

impl std::fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreContext")
            .field("identifier", &self.identifier)
            .field("database", &self.database)
            .field("conventions", &self.conventions)
            .finish_non_exhaustive()
    }
}

/// Builder for [`StoreContext`].
pub struct StoreContextBuilder {
    identifier: Option<String>,
    database: Option<String>,
    conventions: Conventions,
    transport: Arc<dyn Transport>,
    mapper: Arc<dyn EntityMapper>,
    ids: Arc<dyn IdentifierStrategy>,
}

impl StoreContextBuilder {
    /// Sets the store identifier. Defaults to a random UUID.
    #[must_use]
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Sets the default database.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Sets the conventions.
    #[must_use]
    pub fn conventions(mut self, conventions: Conventions) -> Self {
        self.conventions = conventions;
        self
    }

    /// Builds the context.
    #[must_use]
    pub fn build(self) -> Arc<StoreContext> {
        Arc::new(StoreContext {
            identifier: self
                .identifier
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            database: self.database,
            conventions: self.conventions,
            transport: self.transport,
            mapper: self.mapper,
            ids: self.ids,
            last_transaction_index: RwLock::new(HashMap::new()),
        })
    }
}
