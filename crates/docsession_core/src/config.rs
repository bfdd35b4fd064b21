//! Session configuration.

use crate::entity::EntityRef;
use crate::error::{SessionError, SessionResult};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Resolves a name (collection or type) for an entity.
pub type NameResolver = Arc<dyn Fn(&EntityRef) -> Option<String> + Send + Sync>;

/// Policy for picking the node that serves reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum ReadBalanceBehavior {
    /// Always use the preferred node.
    #[default]
    None,
    /// Spread sessions over nodes, deterministically by session number.
    RoundRobin,
    /// Use the node that answered fastest.
    FastestNode,
}

impl FromStr for ReadBalanceBehavior {
    type Err = SessionError;

    fn from_str(value: &str) -> SessionResult<Self> {
        match value {
            "None" => Ok(Self::None),
            "RoundRobin" => Ok(Self::RoundRobin),
            "FastestNode" => Ok(Self::FastestNode),
            other => Err(SessionError::invalid_argument(format!(
                "unknown read balance behavior: {other}"
            ))),
        }
    }
}

/// Transaction lane a session writes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
pub enum TransactionMode {
    /// Ordinary single-node batches.
    #[default]
    SingleNode,
    /// Cluster-wide transactions with compare-exchange support.
    ClusterWide,
}

/// Conventions shared by every session opened from a store.
///
/// The plain settings can be loaded from JSON with [`Conventions::from_json`];
/// the resolver hooks are set in code.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct Conventions {
    /// Whether sessions send change vectors with every write.
    pub use_optimistic_concurrency: bool,

    /// Request ceiling per session.
    pub max_number_of_requests_per_session: u32,

    /// Read routing policy.
    pub read_balance_behavior: ReadBalanceBehavior,

    /// Whether `store` generates identifiers on the client.
    pub generate_document_ids_on_store: bool,

    /// Separator between collection prefix and identity part.
    pub identity_parts_separator: char,

    #[serde(skip)]
    collection_name_resolver: Option<NameResolver>,

    #[serde(skip)]
    type_name_resolver: Option<NameResolver>,
}

impl Default for Conventions {
    fn default() -> Self {
        Self {
            use_optimistic_concurrency: false,
            max_number_of_requests_per_session: 30,
            read_balance_behavior: ReadBalanceBehavior::None,
            generate_document_ids_on_store: true,
            identity_parts_separator: '/',
            collection_name_resolver: None,
            type_name_resolver: None,
        }
    }
}

impl fmt::Debug for Conventions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Conventions")
            .field("use_optimistic_concurrency", &self.use_optimistic_concurrency)
            .field(
                "max_number_of_requests_per_session",
                &self.max_number_of_requests_per_session,
            )
            .field("read_balance_behavior", &self.read_balance_behavior)
            .field(
                "generate_document_ids_on_store",
                &self.generate_document_ids_on_store,
            )
            .field("identity_parts_separator", &self.identity_parts_separator)
            .field(
                "collection_name_resolver",
                &self.collection_name_resolver.is_some(),
            )
            .field("type_name_resolver", &self.type_name_resolver.is_some())
            .finish()
    }
}

impl Conventions {
    /// Creates conventions with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the plain settings from a JSON object.
    pub fn from_json(json: &str) -> SessionResult<Self> {
        serde_json::from_str(json)
            .map_err(|err| SessionError::invalid_argument(format!("invalid conventions: {err}")))
    }

    /// Sets whether sessions use optimistic concurrency.
    #[must_use]
    pub const fn use_optimistic_concurrency(mut self, value: bool) -> Self {
        self.use_optimistic_concurrency = value;
        self
    }

    /// Sets the request ceiling per session.
    #[must_use]
    pub const fn max_number_of_requests_per_session(mut self, value: u32) -> Self {
        self.max_number_of_requests_per_session = value;
        self
    }

    /// Sets the read routing policy.
    #[must_use]
    pub const fn read_balance_behavior(mut self, value: ReadBalanceBehavior) -> Self {
        self.read_balance_behavior = value;
        self
    }

    /// Sets whether `store` generates identifiers on the client.
    #[must_use]
    pub const fn generate_document_ids_on_store(mut self, value: bool) -> Self {
        self.generate_document_ids_on_store = value;
        self
    }

    /// Overrides how collection names are derived from entities.
    #[must_use]
    pub fn collection_name_resolver(
        mut self,
        resolver: impl Fn(&EntityRef) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.collection_name_resolver = Some(Arc::new(resolver));
        self
    }

    /// Overrides how type markers are derived from entities.
    #[must_use]
    pub fn type_name_resolver(
        mut self,
        resolver: impl Fn(&EntityRef) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.type_name_resolver = Some(Arc::new(resolver));
        self
    }

    /// Returns the type marker written into the metadata of `entity`.
    ///
    /// Defaults to the entity's short Rust type name.
    #[must_use]
    pub fn type_name_for(&self, entity: &EntityRef) -> Option<String> {
        match &self.type_name_resolver {
            Some(resolver) => resolver(entity),
            None => Some(entity.type_name().to_string()),
        }
    }

    /// Returns the collection `entity` is stored in.
    ///
    /// Defaults to the pluralised type name (`Company` -> `Companies`).
    #[must_use]
    pub fn collection_name_for(&self, entity: &EntityRef) -> Option<String> {
        match &self.collection_name_resolver {
            Some(resolver) => resolver(entity),
            None => self.type_name_for(entity).map(|name| pluralize(&name)),
        }
    }
}

fn pluralize(name: &str) -> String {
    let lower = name.to_ascii_lowercase();
    if lower.ends_with('y')
        && !matches!(
            lower.chars().rev().nth(1),
            Some('a' | 'e' | 'i' | 'o' | 'u')
        )
    {
        format!("{}ies", &name[..name.len() - 1])
    } else if ["s", "x", "z", "ch", "sh"]
        .iter()
        .any(|suffix| lower.ends_with(suffix))
    {
        format!("{name}es")
    } else {
        format!("{name}s")
    }
}

/// Options for opening a single session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Database to operate on; falls back to the store's database.
    pub database: Option<String>,
    /// Transaction lane.
    pub transaction_mode: TransactionMode,
    /// Disable entity tracking entirely.
    pub no_tracking: bool,
    /// Bypass the response cache.
    pub no_caching: bool,
}

impl SessionOptions {
    /// Creates options with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the database name.
    #[must_use]
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Sets the transaction mode.
    #[must_use]
    pub const fn transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.transaction_mode = mode;
        self
    }

    /// Sets whether tracking is disabled.
    #[must_use]
    pub const fn no_tracking(mut self, value: bool) -> Self {
        self.no_tracking = value;
        self
    }

    /// Sets whether caching is disabled.
    #[must_use]
    pub const fn no_caching(mut self, value: bool) -> Self {
        self.no_caching = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Company;
    struct Address;
    struct Box;

    #[test]
    fn default_conventions() {
        let conventions = Conventions::default();
        assert!(!conventions.use_optimistic_concurrency);
        assert_eq!(conventions.max_number_of_requests_per_session, 30);
        assert!(conventions.generate_document_ids_on_store);
        assert_eq!(conventions.read_balance_behavior, ReadBalanceBehavior::None);
    }

    #[test]
    fn builder_pattern() {
        let conventions = Conventions::new()
            .use_optimistic_concurrency(true)
            .max_number_of_requests_per_session(5)
            .read_balance_behavior(ReadBalanceBehavior::RoundRobin);

        assert!(conventions.use_optimistic_concurrency);
        assert_eq!(conventions.max_number_of_requests_per_session, 5);
        assert_eq!(
            conventions.read_balance_behavior,
            ReadBalanceBehavior::RoundRobin
        );
    }

    #[test]
    fn from_json_fills_defaults() {
        let conventions = Conventions::from_json(
            r#"{"use_optimistic_concurrency": true, "read_balance_behavior": "FastestNode"}"#,
        )
        .unwrap();
        assert!(conventions.use_optimistic_concurrency);
        assert_eq!(
            conventions.read_balance_behavior,
            ReadBalanceBehavior::FastestNode
        );
        assert_eq!(conventions.max_number_of_requests_per_session, 30);
    }

    #[test]
    fn unknown_read_balance_is_invalid_argument() {
        let err = "Nearest".parse::<ReadBalanceBehavior>().unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument { .. }));

        let err = Conventions::from_json(r#"{"read_balance_behavior": "Nearest"}"#).unwrap_err();
        assert!(matches!(err, SessionError::InvalidArgument { .. }));
    }

    #[test]
    fn default_collection_names_are_plural() {
        let conventions = Conventions::default();
        assert_eq!(
            conventions.collection_name_for(&EntityRef::new(Company)),
            Some("Companies".to_string())
        );
        assert_eq!(
            conventions.collection_name_for(&EntityRef::new(Address)),
            Some("Addresses".to_string())
        );
        assert_eq!(
            conventions.collection_name_for(&EntityRef::new(Box)),
            Some("Boxes".to_string())
        );
    }

    #[test]
    fn resolver_overrides_collection() {
        let conventions = Conventions::default().collection_name_resolver(|_| Some("Things".into()));
        assert_eq!(
            conventions.collection_name_for(&EntityRef::new(Company)),
            Some("Things".to_string())
        );
    }
}
