use std::collections::{BTreeSet, HashMap, HashSet};

use common::{Entity, EntityKind, PropertyMeta, PropertySchema, PropertyValue, SchemaError, SortKey};
use parking_lot::RwLock;
use tracing::debug;

use crate::LibraryError;

/// Storage layout of a registry. Bulk loading appends in insertion
/// order; the one-way switch to `Ready` sorts once by natural order.
enum Layout {
    Loading(Vec<String>),
    Ready(BTreeSet<SortKey>),
}

impl Layout {
    fn insert<T: Entity>(&mut self, entity: &T) {
        match self {
            Layout::Loading(ids) => ids.push(entity.id().to_string()),
            Layout::Ready(keys) => {
                keys.insert(entity.sort_key());
            }
        }
    }

    fn remove<T: Entity>(&mut self, entity: &T) {
        match self {
            Layout::Loading(ids) => ids.retain(|id| id != entity.id()),
            Layout::Ready(keys) => {
                keys.remove(&entity.sort_key());
            }
        }
    }

    fn ids(&self) -> Vec<&str> {
        match self {
            Layout::Loading(ids) => ids.iter().map(|id| id.as_str()).collect(),
            Layout::Ready(keys) => keys.iter().map(|key| key.id()).collect(),
        }
    }
}

struct Inner<T: Entity> {
    items: HashMap<String, T>,
    layout: Layout,
    schema: PropertySchema,
}

impl<T: Entity> Inner<T> {
    fn snapshot<F: Fn(&T) -> bool>(&self, keep: F) -> Vec<T> {
        self.layout
            .ids()
            .into_iter()
            .filter_map(|id| self.items.get(id))
            .filter(|entity| keep(entity))
            .cloned()
            .collect()
    }

    fn take(&mut self, id: &str) -> Option<T> {
        let entity = self.items.remove(id)?;
        self.layout.remove(&entity);
        Some(entity)
    }
}

/// Authoritative, ID-indexed store for one entity type.
///
/// Readers always receive cloned snapshots. Mutators that can break
/// cross-entity references are crate-private and reached through
/// `Collection`.
pub struct Registry<T: Entity> {
    inner: RwLock<Inner<T>>,
}

impl<T: Entity> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Entity> Registry<T> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                items: HashMap::new(),
                layout: Layout::Loading(Vec::new()),
                schema: PropertySchema::builtin(T::KIND),
            }),
        }
    }

    pub fn kind(&self) -> EntityKind {
        T::KIND
    }

    pub fn get(&self, id: &str) -> Option<T> {
        self.inner.read().items.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.read().items.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.inner.read().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().items.is_empty()
    }

    /// Snapshot in the current layout order: insertion order while
    /// loading, natural order once ready.
    pub fn all(&self) -> Vec<T> {
        self.inner.read().snapshot(|_| true)
    }

    /// Snapshot in natural order. Fails while the registry is loading.
    pub fn sorted(&self) -> Result<Vec<T>, LibraryError> {
        let inner = self.inner.read();
        match inner.layout {
            Layout::Ready(_) => Ok(inner.snapshot(|_| true)),
            Layout::Loading(_) => Err(LibraryError::NotReady(T::KIND)),
        }
    }

    pub fn filtered<F: Fn(&T) -> bool>(&self, keep: F) -> Vec<T> {
        self.inner.read().snapshot(keep)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.inner.read().layout, Layout::Ready(_))
    }

    pub fn schema(&self) -> PropertySchema {
        self.inner.read().schema.clone()
    }

    /// Rebuilds the store in natural order. Later calls are no-ops.
    /// Returns whether this call performed the switch.
    pub(crate) fn switch_to_order(&self) -> bool {
        let mut inner = self.inner.write();
        if let Layout::Ready(_) = inner.layout {
            return false;
        }
        let keys: BTreeSet<SortKey> = inner.items.values().map(|e| e.sort_key()).collect();
        debug!("{} registry sorted ({} entries)", T::KIND, keys.len());
        inner.layout = Layout::Ready(keys);
        true
    }

    /// Inserts `entity` unless one with the same ID exists, in which case
    /// the existing one is returned unchanged. The flag tells whether the
    /// entity was inserted.
    pub(crate) fn register(&self, mut entity: T) -> (T, bool) {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.items.get(entity.id()) {
            return (existing.clone(), false);
        }
        for meta in inner.schema.custom() {
            if let Some(default) = &meta.default {
                entity
                    .custom_mut()
                    .entry(meta.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        inner.layout.insert(&entity);
        inner.items.insert(entity.id().to_string(), entity.clone());
        (entity, true)
    }

    pub(crate) fn remove(&self, id: &str) -> Option<T> {
        self.inner.write().take(id)
    }

    /// Applies `change` in place. The entity's ID must not change.
    pub(crate) fn update<F: FnOnce(&mut T)>(&self, id: &str, change: F) -> Option<T> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let entity = inner.items.get_mut(id)?;
        let before = entity.sort_key();
        change(entity);
        debug_assert_eq!(entity.id(), id, "registry update changed an entity ID");
        let after = entity.sort_key();
        if before != after {
            if let Layout::Ready(keys) = &mut inner.layout {
                keys.remove(&before);
                keys.insert(after);
            }
        }
        Some(entity.clone())
    }

    /// Removes every entity whose ID is not in `used`, for types that take
    /// part in orphan cleanup.
    pub(crate) fn retain_referenced(&self, used: &HashSet<String>) -> Vec<T> {
        if !T::ORPHAN_CLEANUP {
            return Vec::new();
        }
        let mut inner = self.inner.write();
        let orphans: Vec<String> = inner
            .items
            .keys()
            .filter(|id| !used.contains(*id))
            .cloned()
            .collect();
        orphans
            .iter()
            .filter_map(|id| inner.take(id))
            .collect()
    }

    pub(crate) fn clear(&self) {
        let mut inner = self.inner.write();
        inner.items.clear();
        inner.layout = Layout::Loading(Vec::new());
        inner.schema = PropertySchema::builtin(T::KIND);
    }

    /// Declares a custom property and gives every existing entity its
    /// default value, in one critical section.
    pub fn add_custom_property(&self, meta: PropertyMeta) -> Result<(), LibraryError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.schema.insert_custom(meta.clone())?;
        if let Some(default) = &meta.default {
            for entity in inner.items.values_mut() {
                entity
                    .custom_mut()
                    .entry(meta.name.clone())
                    .or_insert_with(|| default.clone());
            }
        }
        debug!("{} registry gained property {}", T::KIND, meta.name);
        Ok(())
    }

    /// Drops a custom property from the schema and from every entity.
    pub fn remove_custom_property(&self, name: &str) -> Result<(), LibraryError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.schema.remove_custom(name)?;
        for entity in inner.items.values_mut() {
            entity.custom_mut().remove(name);
        }
        Ok(())
    }

    pub fn set_custom_property(
        &self,
        id: &str,
        name: &str,
        value: PropertyValue,
    ) -> Result<T, LibraryError> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        inner.schema.check_custom(name, &value)?;
        let entity = inner
            .items
            .get_mut(id)
            .ok_or_else(|| LibraryError::not_found(T::KIND, id))?;
        entity.custom_mut().insert(name.to_string(), value);
        Ok(entity.clone())
    }

    /// Re-declares custom properties read back from a persisted catalog.
    /// Entities keep the values they were saved with.
    pub(crate) fn restore_schema(&self, custom: Vec<PropertyMeta>) -> Result<(), LibraryError> {
        let mut inner = self.inner.write();
        for meta in custom {
            match inner.schema.insert_custom(meta) {
                Ok(()) | Err(SchemaError::Duplicate(_)) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{Author, PropertyKind, Style, Year};
    use std::sync::Arc;

    #[test]
    fn registering_twice_returns_the_existing_entity() {
        let registry = Registry::new();
        let (first, created) = registry.register(Author::new("ArtistX"));
        assert!(created);

        let mut duplicate = Author::new("ArtistX");
        duplicate
            .custom
            .insert("note".into(), PropertyValue::Text("ignored".into()));
        let (second, created) = registry.register(duplicate);
        assert!(!created);
        assert_eq!(first.id, second.id);
        assert!(second.custom.is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn loading_keeps_insertion_order_until_switch() {
        let registry = Registry::new();
        registry.register(Author::new("Zappa"));
        registry.register(Author::new("abba"));
        registry.register(Author::new("Miles"));

        let names: Vec<String> = registry.all().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["Zappa", "abba", "Miles"]);
        assert!(matches!(registry.sorted(), Err(LibraryError::NotReady(_))));

        assert!(registry.switch_to_order());
        assert!(!registry.switch_to_order());
        let names: Vec<String> = registry
            .sorted()
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["abba", "Miles", "Zappa"]);

        registry.register(Author::new("Beck"));
        let names: Vec<String> = registry.all().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["abba", "Beck", "Miles", "Zappa"]);
    }

    #[test]
    fn remove_drops_entity_from_index_and_order() {
        let registry = Registry::new();
        let (author, _) = registry.register(Author::new("ArtistX"));
        registry.register(Author::new("ArtistY"));
        registry.switch_to_order();

        assert!(registry.remove(&author.id).is_some());
        assert!(registry.get(&author.id).is_none());
        assert_eq!(registry.all().len(), 1);
        assert!(registry.remove(&author.id).is_none());
    }

    #[test]
    fn filtered_snapshots_do_not_touch_the_live_set() {
        let registry = Registry::new();
        for value in [1999, 2001, 2005] {
            registry.register(Year::new(value));
        }
        registry.switch_to_order();
        let mut recent = registry.filtered(|year| year.value > 2000);
        assert_eq!(recent.len(), 2);
        recent.clear();
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn custom_properties_apply_to_existing_and_new_entities() {
        let registry = Registry::new();
        let (early, _) = registry.register(Author::new("Early"));
        registry
            .add_custom_property(PropertyMeta::custom(
                "origin",
                PropertyKind::Text,
                Some(PropertyValue::Text("unknown".into())),
            ))
            .unwrap();
        let (late, _) = registry.register(Author::new("Late"));

        assert_eq!(registry.get(&early.id).unwrap().human_value("origin"), "unknown");
        assert_eq!(late.human_value("origin"), "unknown");

        let updated = registry
            .set_custom_property(&late.id, "origin", PropertyValue::Text("UK".into()))
            .unwrap();
        assert_eq!(updated.human_value("origin"), "UK");
        assert!(matches!(
            registry.set_custom_property(&late.id, "origin", PropertyValue::Integer(1)),
            Err(LibraryError::Schema(_))
        ));

        registry.remove_custom_property("origin").unwrap();
        assert!(registry.all().iter().all(|a| a.custom.is_empty()));
    }

    #[test]
    fn retain_referenced_honours_cleanup_policy() {
        let authors = Registry::new();
        let (kept, _) = authors.register(Author::new("Kept"));
        authors.register(Author::new("Orphan"));
        let used: HashSet<String> = [kept.id.clone()].into_iter().collect();
        let removed = authors.retain_referenced(&used);
        assert_eq!(removed.len(), 1);
        assert_eq!(authors.len(), 1);

        let styles = Registry::new();
        styles.register(Style::new("Jazz"));
        assert!(styles.retain_referenced(&HashSet::new()).is_empty());
        assert_eq!(styles.len(), 1);
    }

    #[test]
    fn update_keeps_sorted_layout_consistent() {
        let registry = Registry::new();
        let (a, _) = registry.register(Author::new("a"));
        registry.register(Author::new("b"));
        registry.switch_to_order();
        registry.update(&a.id, |author| author.name = "c".into());
        let names: Vec<String> = registry.all().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn concurrent_readers_see_whole_entries() {
        let registry = Arc::new(Registry::new());
        std::thread::scope(|scope| {
            let writer = Arc::clone(&registry);
            scope.spawn(move || {
                for value in 0..500 {
                    writer.register(Year::new(value));
                }
            });
            for _ in 0..4 {
                let reader = Arc::clone(&registry);
                scope.spawn(move || {
                    for _ in 0..50 {
                        for year in reader.all() {
                            assert_eq!(year.name, year.value.to_string());
                        }
                    }
                });
            }
        });
        assert_eq!(registry.len(), 500);
    }
}
