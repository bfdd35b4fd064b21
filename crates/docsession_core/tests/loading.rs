//! Loading, includes and refresh.

use docsession_core::{EntityRef, SessionError};
use docsession_testkit::prelude::*;
use serde_json::json;

fn seed_order(store: &TestStore) {
    store.transport.seed(
        "orders/1",
        "Orders",
        json!({
            "company": "companies/1",
            "lines": [
                {"product": "products/1", "quantity": 2},
                {"product": "products/404", "quantity": 1}
            ]
        }),
    );
    store.transport.seed("companies/1", "Companies", json!({"name": "Acme"}));
    store.seed_product("products/1", "Chai", 18);
}

#[tokio::test]
async fn includes_are_served_without_round_trips() {
    let store = TestStore::new();
    seed_order(&store);
    let mut session = store.session();

    let loaded = session
        .load_with_includes(&["orders/1"], &["company", "lines[].product"])
        .await
        .unwrap();
    let order = loaded[0].clone().unwrap();
    assert_eq!(order.with(|o: &Order| o.lines.len()).unwrap(), 2);
    assert_eq!(session.registry().included_count(), 2);

    let company = session.load("companies/1").await.unwrap().unwrap();
    assert_eq!(company.with(|c: &Company| c.name.clone()).unwrap(), "Acme");
    assert!(session.load("products/1").await.unwrap().is_some());
    assert!(session.load("products/404").await.unwrap().is_none());
    assert_eq!(session.number_of_requests(), 1);

    session
        .load_with_includes(&["orders/1"], &["company"])
        .await
        .unwrap();
    assert_eq!(session.number_of_requests(), 1);
    assert_eq!(session.registry().included_count(), 0);
}

#[tokio::test]
async fn load_many_is_aligned_and_deduplicated() {
    let store = TestStore::new();
    store.seed_product("products/1", "Chai", 18);
    let mut session = store.session();

    let loaded = session
        .load_many(&["products/1", "products/404", "PRODUCTS/1"])
        .await
        .unwrap();
    assert_eq!(loaded.len(), 3);
    assert!(loaded[1].is_none());
    assert_eq!(loaded[0], loaded[2]);

    match &store.reads()[0] {
        docsession_core::ReadRequest::GetDocuments { ids, .. } => {
            assert_eq!(ids, &vec!["products/1".to_string(), "products/404".to_string()]);
        }
        other => panic!("unexpected read: {other:?}"),
    }
}

#[tokio::test]
async fn refresh_picks_up_remote_changes() {
    let store = TestStore::new();
    store.seed_product("products/1", "Chai", 18);

    let mut session = store.session();
    let product = session.load("products/1").await.unwrap().unwrap();
    let before = session.change_vector_for(&product).unwrap();

    let mut other = store.session();
    let remote = other.load("products/1").await.unwrap().unwrap();
    remote.update(|p: &mut Product| p.price = 42);
    other.save_changes().await.unwrap();

    session.refresh(&product).await.unwrap();
    assert_eq!(product.with(|p: &Product| p.price).unwrap(), 42);
    assert_ne!(session.change_vector_for(&product).unwrap(), before);
    assert!(!session.has_changes().unwrap());
    assert_eq!(product.with(|p: &Product| p.id.clone()).unwrap().as_deref(), Some("products/1"));
}

#[tokio::test]
async fn refresh_of_a_deleted_document_fails() {
    let store = TestStore::new();
    store.seed_product("products/1", "Chai", 18);

    let mut session = store.session();
    let product = session.load("products/1").await.unwrap().unwrap();

    let mut other = store.session();
    other.delete("products/1").unwrap();
    other.save_changes().await.unwrap();

    let err = session.refresh(&product).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidOperation { .. }));
    assert!(err.to_string().contains("products/1"));
}

#[tokio::test]
async fn refresh_requires_a_tracked_entity() {
    let store = TestStore::new();
    let mut session = store.session();
    let err = session
        .refresh(&EntityRef::new(Product::new("Chai", 18)))
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidOperation { .. }));
    assert_eq!(session.number_of_requests(), 0);
}

#[tokio::test]
async fn metadata_accessors_read_the_server_metadata() {
    let store = TestStore::new();
    let cv = store.seed_product("products/1", "Chai", 18);
    store.seed_counter("products/1", "likes", 3);
    let mut session = store.session();

    let product = session.load("products/1").await.unwrap().unwrap();
    assert_eq!(session.change_vector_for(&product).unwrap(), Some(cv));
    assert!(session.last_modified_for(&product).unwrap().is_some());
    assert_eq!(
        session.counters_for(&product).unwrap(),
        Some(vec!["likes".to_string()])
    );
    assert_eq!(
        session.metadata_for(&product).unwrap().get_str("@collection"),
        Some("Products")
    );
    assert!(!session.has_changes().unwrap());
}

#[tokio::test]
async fn reads_are_routed_to_a_node() {
    let store = TestStore::new();
    let session = store.session();
    let node = session.current_session_node().await.unwrap();
    assert_eq!(node.cluster_tag, "A");
    assert_eq!(node.database, "shop");
}
