//! Test entities and store helpers.
//!
//! Provides a small shop domain and a store wired to the in-memory
//! transport and the serde mapper.

use crate::mapper::{Document, TypeRegistry};
use crate::transport::InMemoryTransport;
use docsession_core::{Conventions, DocumentSession, SessionOptions, StoreContext, TransactionMode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Database every test store opens sessions on.
pub const TEST_DATABASE: &str = "shop";

/// A catalogue entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    /// Document id, not part of the stored body.
    #[serde(skip)]
    pub id: Option<String>,
    /// Display name.
    pub name: String,
    /// Unit price.
    pub price: u32,
}

impl Product {
    /// Creates a product without an id.
    pub fn new(name: impl Into<String>, price: u32) -> Self {
        Self {
            id: None,
            name: name.into(),
            price,
        }
    }
}

/// One line of an [`Order`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Id of the ordered product.
    pub product: String,
    /// Units ordered.
    pub quantity: u32,
}

/// A customer order referencing a company and products.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Order {
    /// Document id.
    #[serde(skip)]
    pub id: Option<String>,
    /// Id of the ordering company.
    pub company: String,
    /// Ordered lines.
    #[serde(default)]
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Creates an order for `company` with one line per product id.
    pub fn new(company: impl Into<String>, products: &[&str]) -> Self {
        Self {
            id: None,
            company: company.into(),
            lines: products
                .iter()
                .map(|product| OrderLine {
                    product: (*product).to_string(),
                    quantity: 1,
                })
                .collect(),
        }
    }
}

/// A customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Company {
    /// Document id.
    #[serde(skip)]
    pub id: Option<String>,
    /// Company name.
    pub name: String,
}

impl Company {
    /// Creates a company without an id.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
        }
    }
}

macro_rules! impl_document {
    ($($ty:ty),*) => {
        $(impl Document for $ty {
            fn id(&self) -> Option<&str> {
                self.id.as_deref()
            }

            fn set_id(&mut self, id: String) {
                self.id = Some(id);
            }
        })*
    };
}

impl_document!(Product, Order, Company);

/// Returns a registry knowing the shop entities.
pub fn shop_registry() -> TypeRegistry {
    TypeRegistry::new()
        .register::<Product>("Products")
        .register::<Order>("Orders")
        .register::<Company>("Companies")
}

/// A store context backed by an in-memory server.
pub struct TestStore {
    /// The store context.
    pub store: Arc<StoreContext>,
    /// The server sessions talk to.
    pub transport: Arc<InMemoryTransport>,
}

impl TestStore {
    /// Creates a store with default conventions.
    pub fn new() -> Self {
        Self::with_conventions(Conventions::default())
    }

    /// Creates a store with `conventions`.
    pub fn with_conventions(conventions: Conventions) -> Self {
        let transport = Arc::new(InMemoryTransport::new());
        let registry = Arc::new(shop_registry());
        let store = StoreContext::builder(transport.clone(), registry.clone(), registry)
            .identifier("test-store")
            .database(TEST_DATABASE)
            .conventions(conventions)
            .build();
        Self { store, transport }
    }

    /// Opens a single-node session.
    pub fn session(&self) -> DocumentSession {
        self.open(SessionOptions::new())
    }

    /// Opens a cluster-wide session.
    pub fn cluster_session(&self) -> DocumentSession {
        self.open(SessionOptions::new().transaction_mode(TransactionMode::ClusterWide))
    }

    /// Opens a session with `options`.
    pub fn open(&self, options: SessionOptions) -> DocumentSession {
        self.store
            .open_session(options)
            .expect("Failed to open session")
    }

    /// Seeds a product directly on the server and returns its change vector.
    pub fn seed_product(&self, id: &str, name: &str, price: u32) -> String {
        self.transport.seed(
            id,
            "Products",
            serde_json::json!({"name": name, "price": price}),
        )
    }
}

impl Default for TestStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::ops::Deref for TestStore {
    type Target = InMemoryTransport;

    fn deref(&self) -> &Self::Target {
        &self.transport
    }
}

/// Installs a tracing subscriber writing to the test output.
///
/// Safe to call from several tests.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sessions_open_on_the_test_database() {
        let store = TestStore::new();
        let session = store.session();
        assert_eq!(session.database(), TEST_DATABASE);
        assert_eq!(session.store_identifier(), "test-store;shop");
    }

    #[test]
    fn seeded_products_are_readable() {
        let store = TestStore::new();
        let cv = store.seed_product("products/1", "Chai", 18);
        let document = store.document("PRODUCTS/1").unwrap();
        assert_eq!(document["@metadata"]["@change-vector"], cv);
        assert_eq!(document["name"], "Chai");
    }
}
