//! End-to-end commit tests against the in-memory server.

use docsession_core::{
    ChangeType, CommandData, CommandType, ConflictingAction, Conventions, EntityRef, PatchRequest,
    SessionError, SessionOptions, StoreOptions, TransportError,
};
use docsession_testkit::prelude::*;
use serde_json::json;

fn price_of(entity: &EntityRef) -> u32 {
    entity.with(|p: &Product| p.price).unwrap()
}

#[tokio::test]
async fn nothing_to_save_makes_no_request() {
    init_tracing();
    let store = TestStore::new();
    let mut session = store.session();

    assert!(!session.has_changes().unwrap());
    assert!(session.what_changed().unwrap().is_empty());
    session.save_changes().await.unwrap();

    assert!(store.batches().is_empty());
    assert_eq!(session.number_of_requests(), 0);
}

#[tokio::test]
async fn store_assigns_id_and_change_vector() {
    let store = TestStore::new();
    let mut session = store.session();
    let product = EntityRef::new(Product::new("Chai", 18));

    session.store(&product).await.unwrap();
    assert!(session.has_changes().unwrap());
    let changes = session.what_changed().unwrap();
    assert_eq!(changes["products/1-A"][0].change, ChangeType::DocumentAdded);

    session.save_changes().await.unwrap();

    assert_eq!(product.with(|p: &Product| p.id.clone()).unwrap().as_deref(), Some("products/1-A"));
    assert!(session.change_vector_for(&product).unwrap().is_some());
    assert!(session.last_modified_for(&product).unwrap().is_some());
    assert!(!session.has_changes().unwrap());

    let stored = store.document("products/1-A").unwrap();
    assert_eq!(stored["name"], "Chai");
    assert_eq!(stored["@metadata"]["@collection"], "Products");
    assert_eq!(stored["@metadata"]["Raven-Node-Type"], "Product");
}

#[tokio::test]
async fn modified_entity_is_written_once() {
    let store = TestStore::new();
    store.seed_product("products/1", "Chai", 18);
    let mut session = store.session();

    let product = session.load("products/1").await.unwrap().unwrap();
    assert!(!session.has_changed(&product).unwrap());
    product.update(|p: &mut Product| p.price = 20);
    assert!(session.has_changed(&product).unwrap());

    let changes = session.what_changed().unwrap();
    let price = &changes["products/1"][0];
    assert_eq!(price.change, ChangeType::FieldChanged);
    assert_eq!(price.field_name.as_deref(), Some("price"));
    assert_eq!(price.field_old_value, Some(json!(18)));
    assert_eq!(price.field_new_value, Some(json!(20)));

    session.save_changes().await.unwrap();
    session.save_changes().await.unwrap();

    assert_eq!(store.batches().len(), 1);
    assert_eq!(store.document("products/1").unwrap()["price"], 20);
}

#[tokio::test]
async fn ignored_entities_are_not_written() {
    let store = TestStore::new();
    store.seed_product("products/1", "Chai", 18);
    let mut session = store.session();

    let product = session.load("products/1").await.unwrap().unwrap();
    session.ignore_changes_for(&product).unwrap();
    product.update(|p: &mut Product| p.price = 99);

    assert!(!session.has_changes().unwrap());
    session.save_changes().await.unwrap();
    assert!(store.batches().is_empty());
}

#[tokio::test]
async fn changed_entity_cannot_be_deleted_by_id() {
    let store = TestStore::new();
    store.seed_product("products/5", "Chai", 18);
    let mut session = store.session();

    let product = session.load("products/5").await.unwrap().unwrap();
    product.update(|p: &mut Product| p.price = 99);

    let err = session.delete("products/5").unwrap_err();
    assert!(matches!(err, SessionError::InvalidOperation { .. }));
    assert_eq!(session.deferred_commands_count(), 0);
    assert!(session.is_loaded("products/5"));
}

#[tokio::test]
async fn delete_by_id_sends_change_vector_only_with_optimistic_concurrency() {
    for (occ, expected) in [(true, json!("A:1")), (false, json!(null))] {
        let store = TestStore::with_conventions(Conventions::new().use_optimistic_concurrency(occ));
        let cv = store.seed_product("products/5", "Chai", 18);
        assert_eq!(cv, "A:1");
        let mut session = store.session();

        session.load("products/5").await.unwrap().unwrap();
        session.delete("products/5").unwrap();
        assert!(session.is_deleted("products/5"));
        assert_eq!(session.number_of_entities_in_unit_of_work(), 0);

        session.save_changes().await.unwrap();
        let batch = &store.batches()[0];
        assert_eq!(batch.commands[0]["Type"], "DELETE");
        assert_eq!(batch.commands[0]["ChangeVector"], expected);
        assert!(store.document("products/5").is_none());
    }
}

#[tokio::test]
async fn explicit_change_vector_wins_for_delete() {
    let store = TestStore::new();
    store.seed_product("products/5", "Chai", 18);
    let mut session = store.session();

    session.delete_with_change_vector("products/5", Some("A:7")).unwrap();
    let err = session.save_changes().await.unwrap_err();

    assert!(matches!(err, SessionError::Transport(TransportError::Concurrency { .. })));
    assert_eq!(session.deferred_commands_count(), 1);
    assert!(store.document("products/5").is_some());
}

#[tokio::test]
async fn empty_id_is_rejected() {
    let store = TestStore::new();
    let mut session = store.session();
    assert!(matches!(session.delete(""), Err(SessionError::InvalidArgument { .. })));
    assert!(matches!(session.load("").await, Err(SessionError::InvalidArgument { .. })));
}

#[tokio::test]
async fn deleting_a_tracked_entity() {
    let store = TestStore::new();
    store.seed_product("products/1", "Chai", 18);
    let mut session = store.session();

    let product = session.load("products/1").await.unwrap().unwrap();
    session.delete_entity(&product).unwrap();

    assert!(session.has_changes().unwrap());
    assert!(session.is_deleted("products/1"));
    assert_eq!(
        session.what_changed().unwrap()["products/1"][0].change,
        ChangeType::DocumentDeleted
    );
    assert!(session.load("products/1").await.unwrap().is_none());

    let err = session.store(&product).await.unwrap_err();
    assert!(matches!(err, SessionError::InvalidOperation { .. }));

    session.save_changes().await.unwrap();
    assert!(store.document("products/1").is_none());
    assert_eq!(session.number_of_entities_in_unit_of_work(), 0);
    assert!(session.is_deleted("products/1"));
}

#[tokio::test]
async fn unknown_entities_cannot_be_deleted() {
    let store = TestStore::new();
    let mut session = store.session();
    let err = session
        .delete_entity(&EntityRef::new(Product::new("Chai", 18)))
        .unwrap_err();
    assert!(matches!(err, SessionError::InvalidOperation { .. }));
}

#[tokio::test]
async fn deferred_put_conflicts_with_stored_entity() {
    let store = TestStore::new();
    let mut session = store.session();

    let order = EntityRef::new(Order::new("companies/2", &[]));
    session.store_with_id(&order, "orders/9").unwrap();
    session.defer(CommandData::put("orders/9", None, json!({"company": "companies/1"})));

    let err = session.prepare_for_save_changes().unwrap_err();
    match err {
        SessionError::DeferredCommandConflict {
            id,
            command_type,
            action,
        } => {
            assert_eq!(id, "orders/9");
            assert_eq!(command_type, CommandType::Put);
            assert_eq!(action, ConflictingAction::Modified);
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(session.deferred_commands_count(), 1);
}

#[tokio::test]
async fn storing_under_a_deferred_id_is_rejected() {
    let store = TestStore::new();
    let mut session = store.session();

    session.defer(CommandData::put("orders/9", None, json!({"company": "companies/1"})));
    let order = EntityRef::new(Order::new("companies/2", &[]));
    let err = session.store_with_id(&order, "ORDERS/9").unwrap_err();
    assert!(matches!(
        err,
        SessionError::DeferredCommandConflict {
            command_type: CommandType::Put,
            action: ConflictingAction::Modified,
            ..
        }
    ));

    session.defer(CommandData::counters(
        "products/9",
        vec![docsession_core::CounterOperation::increment("likes", 1)],
    ));
    let product = EntityRef::new(Product::new("Chai", 18));
    let err = session.store_with_id(&product, "products/9").unwrap_err();
    assert!(matches!(
        err,
        SessionError::DeferredCommandConflict {
            command_type: CommandType::Counters,
            ..
        }
    ));

    assert_eq!(session.number_of_entities_in_unit_of_work(), 0);
    assert_eq!(session.deferred_commands_count(), 2);
}

#[tokio::test]
async fn deferred_patch_conflicts_with_deleted_entity() {
    let store = TestStore::new();
    store.seed_product("products/1", "Chai", 18);
    let mut session = store.session();

    let product = session.load("products/1").await.unwrap().unwrap();
    session.delete_entity(&product).unwrap();
    session.defer(CommandData::patch(
        "products/1",
        None,
        PatchRequest::new("this.price = args.price").value("price", 25),
    ));

    let err = session.save_changes().await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::DeferredCommandConflict {
            action: ConflictingAction::Deleted,
            ..
        }
    ));
    assert!(store.batches().is_empty());
    assert_eq!(session.deferred_commands_count(), 1);
}

#[tokio::test]
async fn counter_commands_do_not_conflict_with_puts() {
    let store = TestStore::new();
    store.seed_product("products/1", "Chai", 18);
    let mut session = store.session();

    let product = session.load("products/1").await.unwrap().unwrap();
    product.update(|p: &mut Product| p.price = 21);
    session.defer(CommandData::counters(
        "products/1",
        vec![docsession_core::CounterOperation::increment("likes", 1)],
    ));

    session.save_changes().await.unwrap();
    assert_eq!(store.counter("products/1", "likes"), Some(1));
    assert_eq!(store.document("products/1").unwrap()["price"], 21);
}

#[tokio::test]
async fn deferred_commands_go_first_and_are_cleared() {
    let store = TestStore::new();
    store.seed_product("products/1", "Chai", 18);
    let mut session = store.session();

    let product = session.load("products/1").await.unwrap().unwrap();
    session.defer(CommandData::patch(
        "products/1",
        None,
        PatchRequest::new("this.price = args.price").value("price", 25),
    ));
    session.store(&EntityRef::new(Product::new("Chang", 19))).await.unwrap();

    session.save_changes().await.unwrap();
    assert_eq!(session.deferred_commands_count(), 0);

    let batch = &store.batches()[0];
    assert_eq!(batch.commands[0]["Type"], "PATCH");
    assert_eq!(batch.commands[1]["Type"], "PUT");

    assert_eq!(price_of(&product), 25);
    assert_eq!(
        session.change_vector_for(&product).unwrap().as_deref(),
        store.document("products/1").unwrap()["@metadata"]["@change-vector"].as_str()
    );
    assert!(!session.has_changes().unwrap());

    session.save_changes().await.unwrap();
    assert_eq!(store.batches().len(), 1);
}

#[tokio::test]
async fn failed_dispatch_keeps_pending_work() {
    let store = TestStore::new();
    let mut session = store.session();

    session.defer(CommandData::put("orders/1", None, json!({"company": "companies/1", "lines": []})));
    let product = EntityRef::new(Product::new("Chai", 18));
    session.store(&product).await.unwrap();

    store.fail_next_dispatch(TransportError::network("connection reset", true));
    let err = session.save_changes().await.unwrap_err();
    assert!(err.is_retryable());
    assert_eq!(session.deferred_commands_count(), 1);
    assert!(session.has_changed(&product).unwrap());
    assert_eq!(session.number_of_requests(), 1);

    session.save_changes().await.unwrap();
    assert_eq!(session.deferred_commands_count(), 0);
    assert!(store.document("orders/1").is_some());
    assert!(store.document("products/1-A").is_some());
}

#[tokio::test]
async fn optimistic_concurrency_detects_concurrent_writes() {
    let store = TestStore::with_conventions(Conventions::new().use_optimistic_concurrency(true));
    store.seed_product("products/1", "Chai", 18);

    let mut first = store.session();
    let mut second = store.session();
    let mine = first.load("products/1").await.unwrap().unwrap();
    let theirs = second.load("products/1").await.unwrap().unwrap();

    theirs.update(|p: &mut Product| p.price = 30);
    second.save_changes().await.unwrap();

    mine.update(|p: &mut Product| p.price = 40);
    let err = first.save_changes().await.unwrap_err();
    assert!(matches!(err, SessionError::Transport(TransportError::Concurrency { .. })));
    assert_eq!(store.document("products/1").unwrap()["price"], 30);
}

#[tokio::test]
async fn optimistic_concurrency_rejects_overwriting_existing_documents() {
    let store = TestStore::with_conventions(Conventions::new().use_optimistic_concurrency(true));
    store.seed_product("products/1", "Chai", 18);
    let mut session = store.session();

    session
        .store_with_id(&EntityRef::new(Product::new("Impostor", 1)), "products/1")
        .unwrap();
    let err = session.save_changes().await.unwrap_err();
    assert!(matches!(err, SessionError::Transport(TransportError::Concurrency { .. })));
}

#[tokio::test]
async fn store_options_control_the_change_vector() {
    let store = TestStore::new();
    store.seed_product("products/1", "Chai", 18);
    let mut session = store.session();

    let stale = EntityRef::new(Product::new("Chai", 19));
    session
        .store_with_options(&stale, StoreOptions::new().id("products/1").change_vector("A:99"))
        .await
        .unwrap();
    let err = session.save_changes().await.unwrap_err();
    assert!(matches!(err, SessionError::Transport(TransportError::Concurrency { .. })));

    let mut session = store.session();
    let fresh = EntityRef::new(Product::new("Chai", 20));
    session
        .store_with_options(&fresh, StoreOptions::new().id("products/1").no_change_vector())
        .await
        .unwrap();
    session.save_changes().await.unwrap();
    assert_eq!(store.document("products/1").unwrap()["price"], 20);
}

#[tokio::test]
async fn server_assigned_ids_are_written_back() {
    let store = TestStore::new();
    let mut session = store.session();

    let first = EntityRef::new(Product::new("Chai", 18));
    let second = EntityRef::new(Product::new("Chang", 19));
    session.store_with_id(&first, "products|").unwrap();
    session.store_with_id(&second, "products|").unwrap();
    session.save_changes().await.unwrap();

    assert_eq!(session.document_id(&first).as_deref(), Some("products/1"));
    assert_eq!(session.document_id(&second).as_deref(), Some("products/2"));
    assert_eq!(second.with(|p: &Product| p.id.clone()).unwrap().as_deref(), Some("products/2"));
    assert_eq!(session.load("products/2").await.unwrap(), Some(second));
    assert_eq!(session.number_of_requests(), 1);
    session.registry().verify_invariants().unwrap();
}

#[tokio::test]
async fn listeners_can_edit_metadata_and_defer_commands() {
    let store = TestStore::new();
    let mut session = store.session();

    session.events().on_before_store(|args| {
        args.metadata().set("reviewed", true);
        if let Some(id) = args.document_id().map(str::to_string) {
            args.defer(CommandData::put(
                format!("audit/{id}"),
                None,
                json!({"company": id, "lines": []}),
            ));
        }
    });

    let product = EntityRef::new(Product::new("Chai", 18));
    session.store(&product).await.unwrap();
    session.save_changes().await.unwrap();

    let stored = store.document("products/1-A").unwrap();
    assert_eq!(stored["@metadata"]["reviewed"], true);
    assert!(store.document("audit/products/1-A").is_some());
    assert_eq!(session.deferred_commands_count(), 0);
    assert!(!session.has_changes().unwrap());
}

#[tokio::test]
async fn metadata_edits_are_changes() {
    let store = TestStore::new();
    store.seed_product("products/1", "Chai", 18);
    let mut session = store.session();

    let product = session.load("products/1").await.unwrap().unwrap();
    session.metadata_for(&product).unwrap().set("@expires", "2030-01-01T00:00:00Z");
    assert!(session.has_changes().unwrap());
    assert!(session.has_changed(&product).unwrap());

    let changes = session.what_changed().unwrap();
    let expires = &changes["products/1"];
    assert_eq!(expires.len(), 1);
    assert_eq!(expires[0].change, ChangeType::NewField);
    assert_eq!(expires[0].field_name.as_deref(), Some("@expires"));
    assert_eq!(expires[0].field_path.as_deref(), Some("@metadata"));
    assert_eq!(expires[0].field_new_value, Some(json!("2030-01-01T00:00:00Z")));

    session.save_changes().await.unwrap();
    let stored = store.document("products/1").unwrap();
    assert_eq!(stored["@metadata"]["@expires"], "2030-01-01T00:00:00Z");
    assert!(!session.has_changes().unwrap());
    assert!(session.what_changed().unwrap().is_empty());
}

#[tokio::test]
async fn rewriting_metadata_with_the_same_value_is_reported() {
    let store = TestStore::new();
    store.seed_product("products/1", "Chai", 18);
    let mut session = store.session();

    let product = session.load("products/1").await.unwrap().unwrap();
    session.metadata_for(&product).unwrap().set("@collection", "Products");

    let changes = session.what_changed().unwrap();
    assert_eq!(changes["products/1"].len(), 1);
    assert_eq!(changes["products/1"][0].change, ChangeType::FieldChanged);
    assert_eq!(changes["products/1"][0].field_name.as_deref(), Some("@metadata"));
}

#[tokio::test]
async fn entities_without_an_id_are_not_listed_as_changes() {
    let store = TestStore::with_conventions(Conventions::new().generate_document_ids_on_store(false));
    let mut session = store.session();

    session.store(&EntityRef::new(Product::new("Chai", 18))).await.unwrap();
    session.store(&EntityRef::new(Product::new("Chang", 19))).await.unwrap();

    assert!(session.has_changes().unwrap());
    let changes = session.what_changed().unwrap();
    assert!(!changes.contains_key(""));
    assert!(changes.is_empty());
}

#[tokio::test]
async fn request_budget_is_enforced() {
    let store = TestStore::with_conventions(Conventions::new().max_number_of_requests_per_session(1));
    store.seed_product("products/1", "Chai", 18);
    store.seed_product("products/2", "Chang", 19);
    let mut session = store.session();

    session.load("products/1").await.unwrap();
    let err = session.load("products/2").await.unwrap_err();
    assert!(matches!(err, SessionError::RequestBudgetExceeded { max: 1 }));

    session.set_max_number_of_requests(5);
    assert!(session.load("products/2").await.unwrap().is_some());
}

#[tokio::test]
async fn disposed_sessions_refuse_work() {
    let store = TestStore::new();
    let mut session = store.session();
    session.dispose();
    session.dispose();

    assert!(session.is_disposed());
    let product = EntityRef::new(Product::new("Chai", 18));
    assert!(matches!(session.store(&product).await, Err(SessionError::Disposed)));
    assert!(matches!(session.load("products/1").await, Err(SessionError::Disposed)));
    assert!(matches!(session.save_changes().await, Err(SessionError::Disposed)));
}

#[tokio::test]
async fn no_tracking_sessions_cannot_save() {
    let store = TestStore::new();
    store.seed_product("products/1", "Chai", 18);
    let mut session = store.open(SessionOptions::new().no_tracking(true));

    let first = session.load("products/1").await.unwrap().unwrap();
    let second = session.load("products/1").await.unwrap().unwrap();
    assert_ne!(first, second);
    assert_eq!(session.number_of_entities_in_unit_of_work(), 0);

    assert!(matches!(
        session.store(&EntityRef::new(Product::new("Chai", 18))).await,
        Err(SessionError::InvalidOperation { .. })
    ));
    assert!(matches!(
        session.save_changes().await,
        Err(SessionError::InvalidOperation { .. })
    ));
}
