//! Property-based test generators using proptest.
//!
//! Operation sequences refer to entities by slot so a sequence can store,
//! modify and delete the same object several times.

use crate::fixtures::Product;
use proptest::prelude::*;

/// Number of entity slots a generated sequence works with.
pub const ENTITY_SLOTS: usize = 4;

/// Ids a generated sequence may use. Some differ only by case.
pub const DOCUMENT_IDS: [&str; 5] = [
    "products/1",
    "PRODUCTS/1",
    "products/2",
    "products/3",
    "Products/3",
];

/// One step applied to a session under test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOp {
    /// Store the slot's entity with a generated id.
    Store {
        /// Entity slot.
        slot: usize,
    },
    /// Store the slot's entity under a fixed id.
    StoreWithId {
        /// Entity slot.
        slot: usize,
        /// Index into [`DOCUMENT_IDS`].
        id: usize,
    },
    /// Change the slot's entity in place.
    Modify {
        /// Entity slot.
        slot: usize,
        /// New price.
        price: u32,
    },
    /// Delete the slot's entity.
    DeleteEntity {
        /// Entity slot.
        slot: usize,
    },
    /// Delete by id.
    DeleteById {
        /// Index into [`DOCUMENT_IDS`].
        id: usize,
    },
    /// Stop tracking the slot's entity.
    Evict {
        /// Entity slot.
        slot: usize,
    },
    /// Mark an id as known missing.
    RegisterMissing {
        /// Index into [`DOCUMENT_IDS`].
        id: usize,
    },
}

/// Strategy for a single [`SessionOp`].
pub fn session_op_strategy() -> impl Strategy<Value = SessionOp> {
    let slot = 0..ENTITY_SLOTS;
    let id = 0..DOCUMENT_IDS.len();
    prop_oneof![
        3 => slot.clone().prop_map(|slot| SessionOp::Store { slot }),
        3 => (slot.clone(), id.clone()).prop_map(|(slot, id)| SessionOp::StoreWithId { slot, id }),
        2 => (slot.clone(), 1..500u32).prop_map(|(slot, price)| SessionOp::Modify { slot, price }),
        2 => slot.clone().prop_map(|slot| SessionOp::DeleteEntity { slot }),
        1 => id.clone().prop_map(|id| SessionOp::DeleteById { id }),
        1 => slot.prop_map(|slot| SessionOp::Evict { slot }),
        1 => id.prop_map(|id| SessionOp::RegisterMissing { id }),
    ]
}

/// Strategy for sequences of up to `max_len` operations.
pub fn session_ops_strategy(max_len: usize) -> impl Strategy<Value = Vec<SessionOp>> {
    prop::collection::vec(session_op_strategy(), 1..=max_len)
}

/// Strategy for products without an id.
pub fn product_strategy() -> impl Strategy<Value = Product> {
    ("[A-Z][a-z]{2,12}", 1..1000u32).prop_map(|(name, price)| Product::new(name, price))
}

/// Strategy for document ids with a random letter case.
pub fn document_id_strategy() -> impl Strategy<Value = String> {
    ("[a-z]{3,10}", 1..10_000u32, any::<bool>()).prop_map(|(collection, n, upper)| {
        let id = format!("{collection}/{n}");
        if upper {
            id.to_uppercase()
        } else {
            id
        }
    })
}

/// Strategy for counter `(name, value)` pairs with unique names.
pub fn counters_strategy() -> impl Strategy<Value = Vec<(String, i64)>> {
    prop::collection::btree_map("[a-z]{1,8}", -1000..1000i64, 0..6)
        .prop_map(|counters| counters.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn ops_stay_in_range(ops in session_ops_strategy(20)) {
            for op in ops {
                match op {
                    SessionOp::Store { slot }
                    | SessionOp::Modify { slot, .. }
                    | SessionOp::DeleteEntity { slot }
                    | SessionOp::Evict { slot } => prop_assert!(slot < ENTITY_SLOTS),
                    SessionOp::StoreWithId { slot, id } => {
                        prop_assert!(slot < ENTITY_SLOTS);
                        prop_assert!(id < DOCUMENT_IDS.len());
                    }
                    SessionOp::DeleteById { id } | SessionOp::RegisterMissing { id } => {
                        prop_assert!(id < DOCUMENT_IDS.len());
                    }
                }
            }
        }

        #[test]
        fn counter_names_are_unique(counters in counters_strategy()) {
            let mut names: Vec<_> = counters.iter().map(|(name, _)| name.clone()).collect();
            names.dedup();
            prop_assert_eq!(names.len(), counters.len());
        }
    }
}
