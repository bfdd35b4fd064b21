//! Shared entity handle.

use parking_lot::{MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A handle to an application object tracked by a session.
///
/// Handles are cheap to clone. Two handles are equal when they point to the
/// same object, regardless of the object's contents, which is what gives
/// the session its identity map semantics.
#[derive(Clone)]
pub struct EntityRef {
    inner: Arc<RwLock<dyn Any + Send + Sync>>,
    type_id: TypeId,
    type_name: &'static str,
}

impl EntityRef {
    /// Wraps `value` in a new handle.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value)),
            type_id: TypeId::of::<T>(),
            type_name: Self::type_name_of::<T>(),
        }
    }

    /// Returns the [`TypeId`] of the wrapped value.
    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the unqualified Rust type name of the wrapped value.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the name [`Self::type_name`] reports for handles wrapping a `T`.
    #[must_use]
    pub fn type_name_of<T: Any>() -> &'static str {
        short_type_name(std::any::type_name::<T>())
    }

    /// Returns true if the wrapped value is a `T`.
    #[must_use]
    pub fn is<T: Any>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Borrows the value as `T`, or returns `None` on a type mismatch.
    #[must_use]
    pub fn read<T: Any>(&self) -> Option<MappedRwLockReadGuard<'_, T>> {
        RwLockReadGuard::try_map(self.inner.read(), |value| value.downcast_ref::<T>()).ok()
    }

    /// Mutably borrows the value as `T`, or returns `None` on a type mismatch.
    #[must_use]
    pub fn write<T: Any>(&self) -> Option<MappedRwLockWriteGuard<'_, T>> {
        RwLockWriteGuard::try_map(self.inner.write(), |value| value.downcast_mut::<T>()).ok()
    }

    /// Borrows the value without a type check.
    pub fn read_any(&self) -> RwLockReadGuard<'_, dyn Any + Send + Sync> {
        self.inner.read()
    }

    /// Mutably borrows the value without a type check.
    pub fn write_any(&self) -> RwLockWriteGuard<'_, dyn Any + Send + Sync> {
        self.inner.write()
    }

    /// Runs `f` against the value if it is a `T`.
    pub fn with<T: Any, R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.read::<T>().map(|guard| f(&guard))
    }

    /// Runs `f` against the mutable value if it is a `T`.
    pub fn update<T: Any, R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.write::<T>().map(|mut guard| f(&mut guard))
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.inner).cast::<()>() as usize
    }
}

impl PartialEq for EntityRef {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for EntityRef {}

impl Hash for EntityRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}

impl fmt::Debug for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityRef({}@{:#x})", self.type_name, self.address())
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[derive(Debug, Clone, PartialEq)]
    struct Product {
        name: String,
        price: u32,
    }

    fn product() -> Product {
        Product {
            name: "Chai".into(),
            price: 18,
        }
    }

    #[test]
    fn identity_is_pointer_identity() {
        let a = EntityRef::new(product());
        let b = EntityRef::new(product());
        let a2 = a.clone();

        assert_eq!(a, a2);
        assert_ne!(a, b);

        let set: HashSet<_> = [a.clone(), a2, b].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn typed_access() {
        let entity = EntityRef::new(product());
        assert!(entity.is::<Product>());
        assert_eq!(entity.type_name(), "Product");

        entity.update(|p: &mut Product| p.price = 20);
        assert_eq!(entity.with(|p: &Product| p.price), Some(20));
        assert!(entity.read::<String>().is_none());
    }

    #[test]
    fn generic_type_names_are_shortened() {
        assert_eq!(short_type_name("alloc::vec::Vec<u8>"), "Vec");
        assert_eq!(short_type_name("shop::Order"), "Order");
    }
}
