//! The unit-of-work session.
//!
//! A session tracks the entities an application loads, stores and deletes,
//! and turns them into one batch on [`DocumentSession::save_changes`].
//! It is a single-threaded unit of work: methods take `&mut self`, and no
//! lock is held across a transport call.

mod counters;
mod inspection;
mod lifecycle;
mod loading;
mod operations;
mod save_changes;
mod tracking;

pub use operations::{ExpectedChangeVector, StoreOptions};
pub use save_changes::{PendingWrite, SaveChangesData};

use crate::cluster::{ClusterTransactionOperations, ClusterTransactionStaging};
use crate::commands::DeferredCommands;
use crate::config::{Conventions, SessionOptions, TransactionMode};
use crate::counters::CounterCache;
use crate::error::{SessionError, SessionResult};
use crate::events::SessionEvents;
use crate::registry::DocumentRegistry;
use crate::store::StoreContext;
use crate::types::{BatchOptions, IndexBatchOptions, ReplicationBatchOptions, ServerNode, SessionInfo};
use lifecycle::LifecycleGuard;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

static CLIENT_SESSION_ID: AtomicU64 = AtomicU64::new(0);

/// A unit of work over one database.
pub struct DocumentSession {
    id: Uuid,
    store: Arc<StoreContext>,
    database: String,
    transaction_mode: TransactionMode,
    no_tracking: bool,
    use_optimistic_concurrency: bool,
    guard: LifecycleGuard,
    registry: DocumentRegistry,
    counters: CounterCache,
    deferred: DeferredCommands,
    cluster: Box<dyn ClusterTransactionOperations>,
    events: SessionEvents,
    batch_options: BatchOptions,
    session_info: SessionInfo,
}

impl DocumentSession {
    pub(crate) fn new(
        store: Arc<StoreContext>,
        database: String,
        options: SessionOptions,
    ) -> SessionResult<Self> {
        let conventions = store.conventions();
        let client_session_id = CLIENT_SESSION_ID.fetch_add(1, Ordering::Relaxed) + 1;
        let session = Self {
            id: Uuid::new_v4(),
            transaction_mode: options.transaction_mode,
            no_tracking: options.no_tracking,
            use_optimistic_concurrency: conventions.use_optimistic_concurrency,
            guard: LifecycleGuard::new(conventions.max_number_of_requests_per_session),
            registry: DocumentRegistry::new(),
            counters: CounterCache::new(),
            deferred: DeferredCommands::new(),
            cluster: Box::new(ClusterTransactionStaging::new()),
            events: SessionEvents::new(),
            batch_options: BatchOptions::default(),
            session_info: SessionInfo {
                session_id: client_session_id,
                last_cluster_transaction_index: store.last_transaction_index(&database),
                no_caching: options.no_caching,
            },
            database,
            store,
        };
        debug!(
            session_id = %session.id,
            database = %session.database,
            mode = ?session.transaction_mode,
            "opened session"
        );
        Ok(session)
    }

    /// Returns the unique id of this session.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Returns the database this session operates on.
    #[must_use]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Returns the store conventions.
    #[must_use]
    pub fn conventions(&self) -> &Conventions {
        self.store.conventions()
    }

    /// Returns the transaction mode.
    #[must_use]
    pub fn transaction_mode(&self) -> TransactionMode {
        self.transaction_mode
    }

    /// Returns true if entity tracking is disabled.
    #[must_use]
    pub fn is_no_tracking(&self) -> bool {
        self.no_tracking
    }

    /// Returns the per-request session information.
    #[must_use]
    pub fn session_info(&self) -> &SessionInfo {
        &self.session_info
    }

    /// Returns `"<store identifier>;<database>"`.
    #[must_use]
    pub fn store_identifier(&self) -> String {
        format!("{};{}", self.store.identifier(), self.database)
    }

    /// Returns true if the session sends change vectors with every write.
    #[must_use]
    pub fn use_optimistic_concurrency(&self) -> bool {
        self.use_optimistic_concurrency
    }

    /// Turns session-wide optimistic concurrency on or off.
    ///
    /// Cluster-wide sessions cannot turn it on.
    pub fn set_use_optimistic_concurrency(&mut self, value: bool) -> SessionResult<()> {
        if value && self.transaction_mode == TransactionMode::ClusterWide {
            return Err(SessionError::invalid_operation(
                "optimistic concurrency is not supported with cluster wide transactions",
            ));
        }
        self.use_optimistic_concurrency = value;
        Ok(())
    }

    /// Returns the number of round trips made so far.
    #[must_use]
    pub fn number_of_requests(&self) -> u32 {
        self.guard.number_of_requests()
    }

    /// Returns the request ceiling.
    #[must_use]
    pub fn max_number_of_requests(&self) -> u32 {
        self.guard.max_requests()
    }

    /// Changes the request ceiling for this session.
    pub fn set_max_number_of_requests(&mut self, max: u32) {
        self.guard.set_max_requests(max);
    }

    /// Counts one round trip, failing once the ceiling is passed.
    pub fn increment_request_count(&mut self) -> SessionResult<()> {
        self.guard.increment_request_count(&self.id)
    }

    /// Marks the session disposed. Calling it again has no effect.
    pub fn dispose(&mut self) {
        if self.guard.dispose() {
            debug!(session_id = %self.id, "disposed session");
        }
    }

    /// Returns true once [`Self::dispose`] was called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.guard.is_disposed()
    }

    /// Returns the registered lifecycle listeners.
    pub fn events(&mut self) -> &mut SessionEvents {
        &mut self.events
    }

    /// Returns the tracking tables.
    #[must_use]
    pub fn registry(&self) -> &DocumentRegistry {
        &self.registry
    }

    /// Returns the counter cache.
    #[must_use]
    pub fn counter_cache(&self) -> &CounterCache {
        &self.counters
    }

    /// Returns the number of commands waiting in the deferred ledger.
    #[must_use]
    pub fn deferred_commands_count(&self) -> usize {
        self.deferred.len()
    }

    /// Returns the compare-exchange staging area.
    ///
    /// Only available in cluster-wide sessions.
    pub fn cluster_transaction(&mut self) -> SessionResult<&mut dyn ClusterTransactionOperations> {
        if self.transaction_mode != TransactionMode::ClusterWide {
            return Err(SessionError::invalid_operation(
                "this function is part of cluster transaction session, in order to use it \
                 you have to open the session with cluster wide transaction mode",
            ));
        }
        Ok(self.cluster.as_mut())
    }

    /// Replaces the compare-exchange staging implementation.
    pub fn set_cluster_operations(&mut self, operations: Box<dyn ClusterTransactionOperations>) {
        self.cluster = operations;
    }

    /// Makes the next batch wait for replication.
    pub fn wait_for_replication_after_save_changes(&mut self, options: ReplicationBatchOptions) {
        self.batch_options.replication_options = Some(options);
    }

    /// Makes the next batch wait for indexing.
    pub fn wait_for_indexes_after_save_changes(&mut self, options: IndexBatchOptions) {
        self.batch_options.index_options = Some(options);
    }

    /// Returns the node reads of this session are routed to.
    pub async fn current_session_node(&self) -> SessionResult<ServerNode> {
        let policy = self.store.conventions().read_balance_behavior;
        let node = self
            .store
            .transport()
            .select_node(&self.database, policy, self.session_info.session_id)
            .await?;
        Ok(node)
    }
}

impl std::fmt::Debug for DocumentSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentSession")
            .field("id", &self.id)
            .field("database", &self.database)
            .field("transaction_mode", &self.transaction_mode)
            .field("tracked", &self.registry.len())
            .field("deferred", &self.deferred.len())
            .finish_non_exhaustive()
    }
}
