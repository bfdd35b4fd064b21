//! Identity map and registry consistency tests.

use docsession_core::{EntityRef, SessionError};
use docsession_testkit::prelude::*;
use proptest::prelude::*;

#[tokio::test]
async fn loading_twice_returns_the_same_instance() {
    let store = TestStore::new();
    store.seed_product("products/1", "Chai", 18);
    let mut session = store.session();

    let first = session.load("products/1").await.unwrap().unwrap();
    let second = session.load("PRODUCTS/1").await.unwrap().unwrap();

    assert_eq!(first, second);
    assert_eq!(session.number_of_requests(), 1);
    assert_eq!(store.reads().len(), 1);
    assert_eq!(first.with(|p: &Product| p.name.clone()).unwrap(), "Chai");
}

#[tokio::test]
async fn stored_entity_is_served_by_load() {
    let store = TestStore::new();
    let mut session = store.session();
    let product = EntityRef::new(Product::new("Chai", 18));

    session.store(&product).await.unwrap();
    let id = session.document_id(&product).unwrap();
    let loaded = session.load(&id).await.unwrap().unwrap();

    assert_eq!(loaded, product);
    assert_eq!(session.number_of_requests(), 0);
}

#[tokio::test]
async fn second_instance_with_same_id_is_rejected() {
    let store = TestStore::new();
    let mut session = store.session();
    let first = EntityRef::new(Product::new("Chai", 18));
    let second = EntityRef::new(Product::new("Chang", 19));

    session.store_with_id(&first, "products/1").unwrap();
    let err = session.store_with_id(&second, "Products/1").unwrap_err();

    assert!(matches!(err, SessionError::NonUniqueObject { ref id } if id == "Products/1"));
    assert_eq!(session.number_of_entities_in_unit_of_work(), 1);
}

#[tokio::test]
async fn missing_documents_are_remembered() {
    let store = TestStore::new();
    let mut session = store.session();

    assert!(session.load("products/404").await.unwrap().is_none());
    assert!(session.is_deleted("products/404"));
    assert!(session.load("products/404").await.unwrap().is_none());
    assert_eq!(session.number_of_requests(), 1);

    session.register_missing("products/404");
    session.register_missing("PRODUCTS/404");
    session.unregister_missing("products/404");
    assert!(!session.is_deleted("products/404"));
}

#[tokio::test]
async fn evicted_entities_are_loaded_again() {
    let store = TestStore::new();
    store.seed_product("products/1", "Chai", 18);
    let mut session = store.session();

    let first = session.load("products/1").await.unwrap().unwrap();
    session.evict(&first);
    assert!(!session.is_loaded("products/1"));

    let second = session.load("products/1").await.unwrap().unwrap();
    assert_ne!(first, second);
    assert_eq!(session.number_of_requests(), 2);
}

#[tokio::test]
async fn clear_forgets_everything() {
    let store = TestStore::new();
    store.seed_product("products/1", "Chai", 18);
    let mut session = store.session();

    session.load("products/1").await.unwrap();
    session.delete("products/2").unwrap();
    session.clear();

    assert_eq!(session.number_of_entities_in_unit_of_work(), 0);
    assert_eq!(session.deferred_commands_count(), 0);
    assert!(!session.is_deleted("products/2"));
    assert!(!session.has_changes().unwrap());
}

#[tokio::test]
async fn untracked_entities_report_why() {
    let store = TestStore::new();
    let mut session = store.session();

    let anonymous = EntityRef::new(Product::new("Chai", 18));
    let err = session.change_vector_for(&anonymous).unwrap_err();
    assert!(matches!(err, SessionError::InvalidOperation { .. }));

    let mut named = Product::new("Chang", 19);
    named.id = Some("products/9".into());
    let err = session.change_vector_for(&EntityRef::new(named)).unwrap_err();
    assert!(matches!(err, SessionError::DocumentNotInSession { ref id } if id == "products/9"));

    assert!(session.has_changed(&anonymous).is_ok_and(|changed| !changed));
}

fn apply(
    runtime: &tokio::runtime::Runtime,
    session: &mut docsession_core::DocumentSession,
    entities: &[EntityRef],
    op: &SessionOp,
) {
    let _ = match op {
        SessionOp::Store { slot } => runtime.block_on(session.store(&entities[*slot])),
        SessionOp::StoreWithId { slot, id } => {
            session.store_with_id(&entities[*slot], DOCUMENT_IDS[*id])
        }
        SessionOp::Modify { slot, price } => {
            entities[*slot].update(|p: &mut Product| p.price = *price);
            Ok(())
        }
        SessionOp::DeleteEntity { slot } => session.delete_entity(&entities[*slot]),
        SessionOp::DeleteById { id } => session.delete(DOCUMENT_IDS[*id]),
        SessionOp::Evict { slot } => {
            session.evict(&entities[*slot]);
            Ok(())
        }
        SessionOp::RegisterMissing { id } => {
            session.register_missing(DOCUMENT_IDS[*id]);
            Ok(())
        }
    };
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn registry_tables_stay_consistent(ops in session_ops_strategy(24)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let store = TestStore::new();
        let mut session = store.session();
        let entities: Vec<EntityRef> = (0..ENTITY_SLOTS)
            .map(|n| EntityRef::new(Product::new(format!("p{n}"), 10)))
            .collect();

        for op in &ops {
            apply(&runtime, &mut session, &entities, op);
            prop_assert!(session.registry().verify_invariants().is_ok(), "after {:?}", op);
        }

        for entity in &entities {
            if let Some(id) = session.document_id(entity) {
                prop_assert_eq!(session.registry().entity_by_id(&id), Some(entity));
            }
        }
    }

    #[test]
    fn ids_match_regardless_of_case(id in document_id_strategy()) {
        let store = TestStore::new();
        let mut session = store.session();
        let entity = EntityRef::new(Product::new("Chai", 18));
        session.store_with_id(&entity, &id).unwrap();

        prop_assert!(session.is_loaded(&id.to_lowercase()));
        prop_assert!(session.is_loaded(&id.to_uppercase()));
    }
}
