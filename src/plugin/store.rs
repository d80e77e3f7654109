use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

type Entry = Arc<dyn Any + Send + Sync>;

/// Crawler-scoped state shared between plugins, one value per type
///
/// Plugins reach it through [`Crawler::store`](crate::crawler::Crawler::store). Values are
/// handed out as `Arc`s, so mutation goes through interior mutability in the stored type.
#[derive(Default)]
pub struct Store {
    entries: DashMap<TypeId, Entry>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        let entry = self.entries.get(&TypeId::of::<T>())?.value().clone();
        entry.downcast::<T>().ok()
    }

    /// Returns the stored `T`, creating it with `init` first if needed
    ///
    /// `init` runs while the entry is locked and must not touch the store.
    pub fn get_or_init<T, F>(&self, init: F) -> Arc<T>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        let entry = self
            .entries
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::new(init()) as Entry)
            .value()
            .clone();

        entry
            .downcast::<T>()
            .unwrap_or_else(|_| unreachable!("store entries are keyed by their own TypeId"))
    }

    /// Stores `value`, returning the previous `T` if there was one
    pub fn insert<T: Any + Send + Sync>(&self, value: T) -> Option<Arc<T>> {
        self.entries
            .insert(TypeId::of::<T>(), Arc::new(value))
            .and_then(|old| old.downcast::<T>().ok())
    }

    pub fn remove<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.entries
            .remove(&TypeId::of::<T>())
            .and_then(|(_, old)| old.downcast::<T>().ok())
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("entries", &self.entries.len())
            .finish()
    }
}
