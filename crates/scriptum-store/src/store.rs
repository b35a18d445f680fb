//! The object store.
//!
//! A concurrent map from sanitized names to stored objects. Each entry
//! owns its payload, its version provider, and an optional unregister
//! hook. Per-name operations linearize on the map entry: a replacement
//! installs the new object first and only then disposes the displaced
//! one, so observers never see a gap and unregister hooks always run
//! against the already-updated store.

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::error::StoreError;
use crate::handle::{lookup_name, sanitize_name, Handle};
use crate::value::{downcast_value, StoredValue};
use crate::version::VersionProvider;

/// Callback invoked once when an object leaves the store (replaced or
/// removed). Runs after the departure is visible to readers.
pub type UnregisterHook = Box<dyn FnOnce() + Send>;

/// One store entry: payload, versioning strategy, unregister hook.
pub struct StoredObject {
    name: String,
    payload: Arc<dyn StoredValue>,
    provider: Mutex<VersionProvider>,
    unregister: Mutex<Option<UnregisterHook>>,
}

impl StoredObject {
    fn new(
        name: &str,
        payload: Arc<dyn StoredValue>,
        on_unregister: Option<UnregisterHook>,
        baseline: u64,
    ) -> Result<Self, StoreError> {
        let provider = VersionProvider::for_payload(payload.as_ref(), baseline + 1)?;
        Ok(Self {
            name: name.to_string(),
            payload,
            provider: Mutex::new(provider),
            unregister: Mutex::new(on_unregister),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Arc<dyn StoredValue> {
        &self.payload
    }

    /// Typed view of the payload. `None` on type mismatch; retrieval by
    /// the wrong type is a soft failure by contract.
    pub fn payload_as<T: StoredValue>(&self) -> Option<Arc<T>> {
        downcast_value(&self.payload)
    }

    /// Current version. Reading may advance the counter when the
    /// provider observes a change (hash drift or a pending notification).
    pub fn version(&self) -> Result<u64, StoreError> {
        self.provider.lock().version_for(self.payload.as_ref())
    }

    /// Handle for this entry at its current version.
    pub fn handle(&self) -> Result<Handle, StoreError> {
        Handle::new(&self.name, self.version()?)
    }

    /// Fire the unregister hook (once) and freeze the provider. Called by
    /// the store after the object has left the map or been replaced.
    fn dispose(&self) {
        let hook = self.unregister.lock().take();
        if let Some(hook) = hook {
            hook();
        }
        self.provider.lock().dispose();
    }
}

impl std::fmt::Debug for StoredObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredObject")
            .field("name", &self.name)
            .field("type", &self.payload.type_label())
            .finish()
    }
}

/// Concurrent name-to-object map. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct ObjectStore {
    objects: Arc<DashMap<String, Arc<StoredObject>>>,
}

impl ObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the object under `name` (sanitized first).
    ///
    /// Fresh entries baseline at zero so their first version read is 1.
    /// Replacements baseline at the displaced object's current version,
    /// which guarantees the new version is strictly greater even when the
    /// payloads compare equal. The displaced object's unregister hook runs
    /// after the new object is installed.
    pub fn insert(
        &self,
        name: &str,
        payload: Arc<dyn StoredValue>,
    ) -> Result<Arc<StoredObject>, StoreError> {
        self.insert_with_hook(name, payload, None)
    }

    /// [`insert`] with an unregister hook attached to the new entry.
    ///
    /// [`insert`]: ObjectStore::insert
    pub fn insert_with_hook(
        &self,
        name: &str,
        payload: Arc<dyn StoredValue>,
        on_unregister: Option<UnregisterHook>,
    ) -> Result<Arc<StoredObject>, StoreError> {
        let (stored, _) = self.insert_unless(name, payload, on_unregister, |_| false)?;
        Ok(stored)
    }

    /// [`insert_with_hook`] with a dedup gate: when an entry already exists
    /// and `keep` approves its payload, the existing object comes back
    /// untouched (second tuple field `true`) and `payload` is dropped. The
    /// gate runs under the map entry's lock, so concurrent callers on the
    /// same name cannot both miss it and double-replace.
    ///
    /// [`insert_with_hook`]: ObjectStore::insert_with_hook
    pub fn insert_unless<F>(
        &self,
        name: &str,
        payload: Arc<dyn StoredValue>,
        on_unregister: Option<UnregisterHook>,
        keep: F,
    ) -> Result<(Arc<StoredObject>, bool), StoreError>
    where
        F: FnOnce(&Arc<dyn StoredValue>) -> bool,
    {
        let key = sanitize_name(name);
        if key.is_empty() {
            return Err(StoreError::EmptyName(name.to_string()));
        }

        let mut displaced: Option<Arc<StoredObject>> = None;
        let (stored, kept) = match self.objects.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let old = occupied.get().clone();
                if keep(old.payload()) {
                    (old, true)
                } else {
                    let baseline = old.version()?;
                    let fresh =
                        Arc::new(StoredObject::new(&key, payload, on_unregister, baseline)?);
                    occupied.insert(fresh.clone());
                    displaced = Some(old);
                    (fresh, false)
                }
            }
            Entry::Vacant(vacant) => {
                let fresh = Arc::new(StoredObject::new(&key, payload, on_unregister, 0)?);
                vacant.insert(fresh.clone());
                (fresh, false)
            }
        };

        // Entry guard released; dispose the displaced object now so its
        // hook observes the store with the replacement already in place.
        if let Some(old) = displaced {
            debug!("replaced stored object '{}'", key);
            old.dispose();
        } else if !kept {
            debug!("stored new object '{}'", key);
        }

        Ok((stored, kept))
    }

    /// Look up by name or handle text (a trailing `:version` is ignored).
    pub fn get(&self, name_or_handle: &str) -> Option<Arc<StoredObject>> {
        let key = lookup_name(name_or_handle);
        self.objects.get(&key).map(|entry| entry.value().clone())
    }

    /// Typed lookup. Missing entry and payload type mismatch both come
    /// back as `None`.
    pub fn get_as<T: StoredValue>(&self, name_or_handle: &str) -> Option<Arc<T>> {
        self.get(name_or_handle).and_then(|obj| obj.payload_as::<T>())
    }

    /// Current version of the named object.
    pub fn version_of(&self, name_or_handle: &str) -> Result<u64, StoreError> {
        let key = lookup_name(name_or_handle);
        match self.get(&key) {
            Some(obj) => obj.version(),
            None => Err(StoreError::NotFound(key)),
        }
    }

    /// Handle (name plus current version) of the named object.
    pub fn handle_of(&self, name_or_handle: &str) -> Result<Handle, StoreError> {
        let key = lookup_name(name_or_handle);
        match self.get(&key) {
            Some(obj) => obj.handle(),
            None => Err(StoreError::NotFound(key)),
        }
    }

    /// Remove the named object, handing back the departed entry. The
    /// unregister hook fires after the entry has left the map.
    pub fn remove(&self, name_or_handle: &str) -> Option<Arc<StoredObject>> {
        let key = lookup_name(name_or_handle);
        match self.objects.remove(&key) {
            Some((_, obj)) => {
                debug!("removed stored object '{}'", key);
                obj.dispose();
                Some(obj)
            }
            None => None,
        }
    }

    pub fn contains(&self, name_or_handle: &str) -> bool {
        self.objects.contains_key(&lookup_name(name_or_handle))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Snapshot of all stored names.
    pub fn names(&self) -> Vec<String> {
        self.objects.iter().map(|e| e.key().clone()).collect()
    }

    /// Remove everything, firing each unregister hook.
    pub fn clear(&self) {
        for name in self.names() {
            self.remove(&name);
        }
    }
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("len", &self.objects.len())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::{DataCell, DataValue, NullValue};
    use serde_json::json;
    use std::any::Any;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn data(v: serde_json::Value) -> Arc<dyn StoredValue> {
        Arc::new(DataValue::new(v))
    }

    #[test]
    fn test_insert_and_typed_get() {
        let store = ObjectStore::new();
        store.insert("prices", data(json!([1.5, 2.5]))).unwrap();

        let value = store.get_as::<DataValue>("prices").unwrap();
        assert_eq!(value.data, json!([1.5, 2.5]));
    }

    #[test]
    fn test_missing_and_mismatch_are_soft() {
        let store = ObjectStore::new();
        store.insert("prices", data(json!(1))).unwrap();

        assert!(store.get("absent").is_none());
        // Wrong type: soft failure, not an error.
        assert!(store.get_as::<DataCell>("prices").is_none());
        // The entry itself is still there.
        assert!(store.get("prices").is_some());
    }

    #[test]
    fn test_name_is_sanitized_and_handle_tolerated() {
        let store = ObjectStore::new();
        store.insert("Rates (EUR)", data(json!(1))).unwrap();

        assert!(store.contains("RatesEUR"));
        assert!(store.contains("RatesEUR:42"));
        assert_eq!(store.handle_of("RatesEUR").unwrap().to_string(), "RatesEUR:1");
    }

    #[test]
    fn test_empty_name_is_rejected() {
        let store = ObjectStore::new();
        assert!(matches!(
            store.insert("!!!", data(json!(1))),
            Err(StoreError::EmptyName(_))
        ));
    }

    #[test]
    fn test_fresh_insert_reads_version_one() {
        let store = ObjectStore::new();
        store.insert("a", data(json!("x"))).unwrap();
        assert_eq!(store.version_of("a").unwrap(), 1);
        // Stable across reads.
        assert_eq!(store.version_of("a").unwrap(), 1);
    }

    #[test]
    fn test_null_placeholder_reads_version_zero() {
        let store = ObjectStore::new();
        store.insert("pending", Arc::new(NullValue)).unwrap();
        assert_eq!(store.version_of("pending").unwrap(), 0);
    }

    #[test]
    fn test_in_place_mutation_bumps_version() {
        let store = ObjectStore::new();
        let cell = Arc::new(DataCell::new(json!(0)));
        store.insert("cell", cell.clone()).unwrap();

        assert_eq!(store.version_of("cell").unwrap(), 1);
        cell.set(json!(1));
        assert_eq!(store.version_of("cell").unwrap(), 2);
        // No further mutation, no further bump.
        assert_eq!(store.version_of("cell").unwrap(), 2);
    }

    #[test]
    fn test_replacement_bumps_above_displaced() {
        let store = ObjectStore::new();
        store.insert("a", data(json!(1))).unwrap();
        assert_eq!(store.version_of("a").unwrap(), 1);

        store.insert("a", data(json!(2))).unwrap();
        assert_eq!(store.version_of("a").unwrap(), 2);

        store.insert("a", data(json!(3))).unwrap();
        assert_eq!(store.version_of("a").unwrap(), 3);
    }

    #[test]
    fn test_equal_payload_replacement_still_bumps() {
        // A structurally identical but distinct instance is still a
        // replacement; the version must move so readers notice.
        let store = ObjectStore::new();
        store.insert("a", data(json!({"k": 1}))).unwrap();
        assert_eq!(store.version_of("a").unwrap(), 1);

        store.insert("a", data(json!({"k": 1}))).unwrap();
        assert_eq!(store.version_of("a").unwrap(), 2);
    }

    #[test]
    fn test_unregister_hook_sees_replacement_installed() {
        let store = ObjectStore::new();
        let observed = Arc::new(Mutex::new(None));

        let store_for_hook = store.clone();
        let observed_in_hook = observed.clone();
        store
            .insert_with_hook(
                "a",
                data(json!("old")),
                Some(Box::new(move || {
                    let seen = store_for_hook
                        .get_as::<DataValue>("a")
                        .map(|v| v.data.clone());
                    *observed_in_hook.lock() = seen;
                })),
            )
            .unwrap();

        store.insert("a", data(json!("new"))).unwrap();

        // The displaced object's hook ran after the replacement was
        // already visible.
        assert_eq!(observed.lock().clone(), Some(json!("new")));
    }

    #[test]
    fn test_remove_fires_hook_and_detaches() {
        let store = ObjectStore::new();
        let fired = Arc::new(AtomicBool::new(false));
        let fired_in_hook = fired.clone();

        store
            .insert_with_hook(
                "a",
                data(json!(1)),
                Some(Box::new(move || {
                    fired_in_hook.store(true, Ordering::SeqCst);
                })),
            )
            .unwrap();

        let removed = store.remove("a").unwrap();
        assert_eq!(removed.name(), "a");
        assert!(fired.load(Ordering::SeqCst));
        assert!(store.get("a").is_none());
        // Second removal is a no-op.
        assert!(store.remove("a").is_none());
    }

    #[test]
    fn test_insert_unless_keeps_approved_entry() {
        let store = ObjectStore::new();
        store.insert("a", data(json!(1))).unwrap();
        assert_eq!(store.version_of("a").unwrap(), 1);

        // Gate approves: the entry stays, the version stays, the rejected
        // payload never lands.
        let (kept_obj, kept) = store
            .insert_unless("a", data(json!(2)), None, |_| true)
            .unwrap();
        assert!(kept);
        assert_eq!(store.version_of("a").unwrap(), 1);
        assert_eq!(kept_obj.payload_as::<DataValue>().unwrap().data, json!(1));

        // Gate declines: ordinary replacement with a version bump.
        let (_, kept) = store
            .insert_unless("a", data(json!(2)), None, |_| false)
            .unwrap();
        assert!(!kept);
        assert_eq!(store.version_of("a").unwrap(), 2);

        // Vacant name: the gate is never consulted.
        let (_, kept) = store
            .insert_unless("b", data(json!(3)), None, |_| panic!("no entry to keep"))
            .unwrap();
        assert!(!kept);
        assert_eq!(store.version_of("b").unwrap(), 1);
    }

    #[test]
    fn test_unsupported_payload_is_refused() {
        #[derive(Debug)]
        struct Opaque;

        impl StoredValue for Opaque {
            fn type_label(&self) -> &'static str {
                "opaque"
            }

            fn as_any(&self) -> &dyn Any {
                self
            }

            fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
                self
            }
        }

        let store = ObjectStore::new();
        assert!(matches!(
            store.insert("a", Arc::new(Opaque)),
            Err(StoreError::UnsupportedValueType(_))
        ));
        assert!(store.is_empty());
    }

    #[test]
    fn test_names_and_clear() {
        let store = ObjectStore::new();
        store.insert("a", data(json!(1))).unwrap();
        store.insert("b", data(json!(2))).unwrap();

        let mut names = store.names();
        names.sort();
        assert_eq!(names, vec!["a", "b"]);

        store.clear();
        assert!(store.is_empty());
    }
}
