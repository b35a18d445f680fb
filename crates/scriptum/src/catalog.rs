//! Script catalog: the host-application surface.
//!
//! Ties the object store, the converter registry, and the context manager
//! together behind handle-based operations. Scripts registered here live in
//! the store as [`ScriptRecord`] payloads, so they version, serialize, and
//! resolve exactly like any other stored object.

use std::any::Any;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use scriptum_js_runtime::{spawn_engine, EngineSettings};
use scriptum_store::{
    downcast_value, DataValue, Handle, JsonValueCodec, ObjectStore, StoredObject, StoredValue,
    ValueCodec,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::Config;
use crate::context::{ContextManager, EngineSpawner};
use crate::engine::ScriptEngine;
use crate::error::ScriptError;
use crate::fingerprint::Fingerprint;
use crate::marshal::{ConverterRegistry, TransferableValue};
use crate::options::ScriptingOptions;
use crate::param::{ParamKind, Parameter, ParameterValue};
use crate::result::RunOutcome;
use crate::script::{content_fingerprint, Script};

// ─────────────────────────────────────────────────────────────────────────────
// Script records
// ─────────────────────────────────────────────────────────────────────────────

/// Stored form of a registered script: everything needed to rebuild it,
/// plus registration time. The content hash is the script fingerprint, so
/// store versioning tracks exactly the changes that would force a
/// recompile.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ScriptRecord {
    pub code: String,
    pub parameters: Vec<Parameter>,
    pub options: ScriptingOptions,
    #[serde(default)]
    pub return_kind: Option<ParamKind>,
    pub registered_at: DateTime<Utc>,
    #[serde(skip)]
    fingerprint: u32,
}

impl ScriptRecord {
    fn new(script: &Script) -> Self {
        Self {
            code: script.code().to_string(),
            parameters: script.parameters().to_vec(),
            options: script.options().clone(),
            return_kind: script.return_kind(),
            registered_at: Utc::now(),
            fingerprint: content_fingerprint(
                script.code(),
                script.parameters(),
                script.options(),
                script.return_kind(),
            )
            .0,
        }
    }

    /// Rebuild a runnable script from this record.
    pub fn to_script(&self) -> Script {
        let mut script = Script::new(self.code.clone(), self.options.clone())
            .with_parameters(self.parameters.to_vec());
        if let Some(kind) = self.return_kind {
            script = script.with_return_kind(kind);
        }
        script
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint(self.fingerprint)
    }

    fn rehash(mut self) -> Self {
        self.fingerprint =
            content_fingerprint(&self.code, &self.parameters, &self.options, self.return_kind).0;
        self
    }
}

impl StoredValue for ScriptRecord {
    fn type_label(&self) -> &'static str {
        "script"
    }

    fn content_hash(&self) -> Option<u64> {
        Some(u64::from(self.fingerprint))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Catalog
// ─────────────────────────────────────────────────────────────────────────────

/// Host-facing surface over store, registry, and contexts.
pub struct ScriptCatalog {
    store: ObjectStore,
    registry: ConverterRegistry,
    manager: Arc<ContextManager>,
    codec: JsonValueCodec,
    config: Config,
}

impl ScriptCatalog {
    /// Catalog with engines spawned from `config`'s engine settings.
    pub fn new(config: Config) -> Self {
        let settings = EngineSettings {
            max_heap_mb: config.engine.max_heap_mb,
        };
        let spawner: EngineSpawner = Arc::new(move |name| {
            let handle = spawn_engine(name, settings.clone())?;
            Ok(Box::new(handle) as Box<dyn ScriptEngine>)
        });
        Self::with_spawner(config, spawner)
    }

    /// Catalog with a caller-supplied engine spawner. Tests inject fakes
    /// here; production goes through [`new`].
    ///
    /// [`new`]: ScriptCatalog::new
    pub fn with_spawner(config: Config, spawner: EngineSpawner) -> Self {
        let mut codec = JsonValueCodec::new();
        codec.register(
            "script",
            |value| {
                downcast_value::<ScriptRecord>(value)
                    .and_then(|record| serde_json::to_value(record.as_ref()).ok())
            },
            |body| {
                let record: ScriptRecord = serde_json::from_value(body.clone())?;
                Ok(Arc::new(record.rehash()) as Arc<dyn StoredValue>)
            },
        );
        Self {
            store: ObjectStore::new(),
            registry: ConverterRegistry::with_store_defaults(),
            manager: Arc::new(ContextManager::new(spawner)),
            codec,
            config,
        }
    }

    pub fn store(&self) -> &ObjectStore {
        &self.store
    }

    pub fn registry(&self) -> &ConverterRegistry {
        &self.registry
    }

    pub fn manager(&self) -> &Arc<ContextManager> {
        &self.manager
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Options seeded from the configured defaults.
    pub fn default_options(&self) -> ScriptingOptions {
        ScriptingOptions {
            references: self.config.defaults.references.clone(),
            imports: self.config.defaults.imports.clone(),
            hosting: self.config.defaults.hosting,
        }
    }

    /// Build a script from source with catalog defaults applied.
    pub fn script(&self, code: impl Into<String>) -> Script {
        Script::new(code, self.default_options())
            .with_timeout_ms(self.config.engine.run_timeout_ms)
    }

    /// Register a script under `name`.
    ///
    /// Re-registering an unchanged script is a no-op: when the entry under
    /// `name` already holds a record with the same fingerprint, the existing
    /// handle comes back and the version stays put. Anything else replaces
    /// the entry and bumps the version. The fingerprint check and the
    /// replacement happen under one store entry operation, so concurrent
    /// registrations of identical content dedup instead of racing.
    pub fn register_script(&self, name: &str, script: &Script) -> Result<Handle, ScriptError> {
        let record = ScriptRecord::new(script);
        let fingerprint = record.fingerprint();

        let (stored, kept) = self.store.insert_unless(name, Arc::new(record), None, |existing| {
            downcast_value::<ScriptRecord>(existing)
                .is_some_and(|old| old.fingerprint() == fingerprint)
        })?;
        let handle = stored.handle()?;
        if kept {
            debug!(name = %stored.name(), %fingerprint, "script unchanged, keeping entry");
        } else {
            info!(name = %stored.name(), version = handle.version(), "registered script");
        }
        Ok(handle)
    }

    /// Rebuild a runnable script from a registered entry.
    pub fn script_named(&self, name_or_handle: &str) -> Result<Script, ScriptError> {
        let record = self
            .store
            .get_as::<ScriptRecord>(name_or_handle)
            .ok_or_else(|| ScriptError::UnknownHandle(name_or_handle.to_string()))?;
        Ok(record
            .to_script()
            .with_timeout_ms(self.config.engine.run_timeout_ms))
    }

    /// One-shot evaluation: build an anonymous script from `code`, run it
    /// once with `supplied`, and tear it down. Parameter declarations are
    /// taken from the supplied values, first occurrence per name.
    pub async fn evaluate(
        &self,
        code: &str,
        options: ScriptingOptions,
        supplied: &[ParameterValue],
    ) -> Result<RunOutcome, ScriptError> {
        let mut parameters: Vec<Parameter> = Vec::with_capacity(supplied.len());
        for pv in supplied {
            if !parameters.iter().any(|p| p.name() == pv.parameter().name()) {
                parameters.push(pv.parameter().clone());
            }
        }
        let mut script = Script::new(code, options)
            .with_label("eval")
            .with_parameters(parameters)
            .with_timeout_ms(self.config.engine.run_timeout_ms);

        let result = script
            .run(
                &self.manager,
                &self.store,
                &self.registry,
                supplied,
                CancellationToken::new(),
            )
            .await;
        script.dispose(&self.manager).await;
        result
    }

    /// Store a plain value under `name`, converted to its store payload.
    pub fn store_value(&self, name: &str, value: TransferableValue) -> Result<Handle, ScriptError> {
        let payload = self.registry.from_transferable::<DataValue>(&value)?;
        let stored = self.store.insert(name, payload)?;
        Ok(stored.handle()?)
    }

    /// Fetch a stored value as a wire value.
    pub fn fetch_value(&self, name_or_handle: &str) -> Result<TransferableValue, ScriptError> {
        let object = self
            .store
            .get(name_or_handle)
            .ok_or_else(|| ScriptError::UnknownHandle(name_or_handle.to_string()))?;
        self.registry.to_transferable(object.payload().as_ref())
    }

    /// Serialize a stored entry to self-describing text.
    pub fn serialize(&self, name_or_handle: &str) -> Result<String, ScriptError> {
        let object = self
            .store
            .get(name_or_handle)
            .ok_or_else(|| ScriptError::UnknownHandle(name_or_handle.to_string()))?;
        Ok(self.codec.encode(object.payload())?)
    }

    /// Decode serialized text and store it under `name`.
    pub fn materialize(&self, name: &str, text: &str) -> Result<Handle, ScriptError> {
        let payload = self.codec.decode(text)?;
        let stored = self.store.insert(name, payload)?;
        Ok(stored.handle()?)
    }

    /// Drop a stored entry, handing back what was removed.
    pub fn remove(&self, name_or_handle: &str) -> Option<Arc<StoredObject>> {
        self.store.remove(name_or_handle)
    }

    /// Tear down every context. Registered entries survive; their scripts
    /// lease fresh contexts on the next run.
    pub fn shutdown(&self) {
        self.manager.shutdown_all();
        info!("catalog shut down");
    }
}

impl std::fmt::Debug for ScriptCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptCatalog")
            .field("stored", &self.store.len())
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::param::ParamKind;
    use serde_json::json;

    fn mock_catalog() -> ScriptCatalog {
        let spawner: EngineSpawner =
            Arc::new(|_name| Ok(Box::new(MockEngine::new()) as Box<dyn ScriptEngine>));
        ScriptCatalog::with_spawner(Config::default(), spawner)
    }

    #[test]
    fn test_register_same_fingerprint_keeps_version() {
        let catalog = mock_catalog();
        let script = catalog.script("return 1;");

        let first = catalog.register_script("Rate", &script).unwrap();
        assert_eq!(first.version(), 1);

        // Identical content: handle unchanged, no version bump.
        let again = catalog.register_script("Rate", &script).unwrap();
        assert_eq!(again.version(), 1);

        let changed = catalog.script("return 2;");
        let third = catalog.register_script("Rate", &changed).unwrap();
        assert_eq!(third.version(), 2);
    }

    #[test]
    fn test_concurrent_identical_registration_dedups() {
        let catalog = mock_catalog();
        let script = catalog.script("return 1;");

        // Every racer carries the same content; exactly one insert may
        // land, everyone else must hit the dedup gate.
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| catalog.register_script("Rate", &script).unwrap());
            }
        });

        assert_eq!(catalog.store().version_of("Rate").unwrap(), 1);
    }

    #[test]
    fn test_registration_identity_ignores_sandbox_key() {
        let catalog = mock_catalog();
        let options = ScriptingOptions::with_hosting(crate::options::HostingPolicy::IndividualSandbox);

        // Two instances mint different sandbox keys but register as the
        // same content.
        let first = Script::new("return 1;", options.clone());
        let second = Script::new("return 1;", options);
        catalog.register_script("Job", &first).unwrap();
        let handle = catalog.register_script("Job", &second).unwrap();
        assert_eq!(handle.version(), 1);
    }

    #[test]
    fn test_return_kind_is_part_of_registration_identity() {
        let catalog = mock_catalog();
        let bare = catalog.script("return 1;");
        catalog.register_script("Typed", &bare).unwrap();

        let typed = catalog.script("return 1;").with_return_kind(ParamKind::Integer);
        let handle = catalog.register_script("Typed", &typed).unwrap();
        assert_eq!(handle.version(), 2);

        let rebuilt = catalog.script_named("Typed").unwrap();
        assert_eq!(rebuilt.return_kind(), Some(ParamKind::Integer));
    }

    #[test]
    fn test_script_named_rebuilds() {
        let catalog = mock_catalog();
        let script = catalog
            .script("return a;")
            .with_parameters(vec![Parameter::new("a", ParamKind::Integer).unwrap()]);
        catalog.register_script("Echo", &script).unwrap();

        let rebuilt = catalog.script_named("Echo").unwrap();
        assert_eq!(rebuilt.code(), "return a;");
        assert_eq!(rebuilt.parameters().len(), 1);

        assert!(matches!(
            catalog.script_named("Missing"),
            Err(ScriptError::UnknownHandle(_))
        ));
    }

    #[tokio::test]
    async fn test_evaluate_is_one_shot() {
        let catalog = mock_catalog();
        let supplied = vec![ParameterValue::direct(
            Parameter::new("x", ParamKind::Integer).unwrap(),
            TransferableValue::Integer(7),
        )];

        let outcome = catalog
            .evaluate("return x;", catalog.default_options(), &supplied)
            .await
            .unwrap();
        assert_eq!(
            outcome.value(),
            Some(&TransferableValue::Sequence(vec![TransferableValue::Integer(7)]))
        );
        // Anonymous scripts leave nothing behind.
        assert_eq!(catalog.manager().individual_count(), 0);
        assert!(catalog.store().is_empty());
    }

    #[tokio::test]
    async fn test_evaluate_individual_tears_down() {
        let catalog = mock_catalog();
        let options =
            ScriptingOptions::with_hosting(crate::options::HostingPolicy::IndividualSandbox);

        catalog.evaluate("return 1;", options, &[]).await.unwrap();
        assert_eq!(catalog.manager().individual_count(), 0);
    }

    #[test]
    fn test_store_and_fetch_value() {
        let catalog = mock_catalog();
        let handle = catalog
            .store_value("Rates", TransferableValue::from(json!([1.5, 2.5])))
            .unwrap();
        assert_eq!(handle.to_string(), "Rates:1");

        let fetched = catalog.fetch_value("Rates").unwrap();
        assert_eq!(fetched, TransferableValue::from(json!([1.5, 2.5])));

        assert!(matches!(
            catalog.fetch_value("Ghost"),
            Err(ScriptError::UnknownHandle(_))
        ));
    }

    #[test]
    fn test_serialize_round_trips_script_record() {
        let catalog = mock_catalog();
        let script = catalog
            .script("return a + 1;")
            .with_parameters(vec![Parameter::new("a", ParamKind::Integer).unwrap()]);
        catalog.register_script("Bump", &script).unwrap();

        let text = catalog.serialize("Bump").unwrap();
        let handle = catalog.materialize("BumpCopy", &text).unwrap();
        assert_eq!(handle.name(), "BumpCopy");

        let rebuilt = catalog.script_named("BumpCopy").unwrap();
        assert_eq!(rebuilt.code(), "return a + 1;");
        assert_eq!(rebuilt.parameters()[0].name(), "a");

        // The decoded record hashes the same as the original, so the
        // copy's fingerprint matches.
        let original = catalog.store().get_as::<ScriptRecord>("Bump").unwrap();
        let copy = catalog.store().get_as::<ScriptRecord>("BumpCopy").unwrap();
        assert_eq!(original.fingerprint(), copy.fingerprint());
    }

    #[test]
    fn test_serialize_plain_value() {
        let catalog = mock_catalog();
        catalog
            .store_value("Pi", TransferableValue::Float(3.25))
            .unwrap();

        let text = catalog.serialize("Pi").unwrap();
        catalog.materialize("PiCopy", &text).unwrap();
        assert_eq!(catalog.fetch_value("PiCopy").unwrap(), TransferableValue::Float(3.25));
    }
}
