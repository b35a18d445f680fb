//! Isolation contexts.
//!
//! A context is one engine worker plus an identity. Three identities exist:
//! the process-wide host context, the process-wide shared sandbox, and
//! per-script individual sandboxes. Isolation is message passing over the
//! engine's command channel; nothing else crosses the boundary.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use scriptum_js_runtime::EngineError;
use tracing::info;
use uuid::Uuid;

use crate::engine::ScriptEngine;
use crate::error::ContextError;
use crate::options::HostingPolicy;

/// Identity of an isolation context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextId {
    Host,
    Shared,
    Individual(Uuid),
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ContextId::Host => f.write_str("host"),
            ContextId::Shared => f.write_str("shared"),
            ContextId::Individual(id) => write!(f, "individual:{id}"),
        }
    }
}

/// One engine worker with its identity.
pub struct ScriptContext {
    id: ContextId,
    engine: Box<dyn ScriptEngine>,
}

impl ScriptContext {
    pub(crate) fn new(id: ContextId, engine: Box<dyn ScriptEngine>) -> Self {
        Self { id, engine }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn engine(&self) -> &dyn ScriptEngine {
        self.engine.as_ref()
    }

    pub fn terminate(&self) {
        self.engine.terminate();
    }

    pub fn is_terminated(&self) -> bool {
        self.engine.is_terminated()
    }
}

impl std::fmt::Debug for ScriptContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptContext")
            .field("id", &self.id)
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}

/// A script's claim on a context. Released through
/// [`ContextManager::release`]; an unreleased lease keeps an individual
/// sandbox alive, exactly like the script it belongs to.
#[derive(Debug)]
pub struct ContextLease {
    context: Arc<ScriptContext>,
}

impl ContextLease {
    pub fn id(&self) -> ContextId {
        self.context.id()
    }

    pub fn context(&self) -> &Arc<ScriptContext> {
        &self.context
    }
}

/// Produces a boxed engine for a context about to spawn. The string is the
/// worker name.
pub type EngineSpawner =
    Arc<dyn Fn(&str) -> Result<Box<dyn ScriptEngine>, EngineError> + Send + Sync>;

struct IndividualSlot {
    context: Arc<ScriptContext>,
    leases: usize,
}

/// Owns every context in the process.
///
/// Host and shared contexts spawn on first lease and persist until
/// [`shutdown_all`]; individual contexts spawn per key and tear down when
/// their last lease is released.
///
/// [`shutdown_all`]: ContextManager::shutdown_all
pub struct ContextManager {
    spawner: EngineSpawner,
    host: Mutex<Option<Arc<ScriptContext>>>,
    shared: Mutex<Option<Arc<ScriptContext>>>,
    individual: Mutex<HashMap<Uuid, IndividualSlot>>,
}

impl ContextManager {
    pub fn new(spawner: EngineSpawner) -> Self {
        Self {
            spawner,
            host: Mutex::new(None),
            shared: Mutex::new(None),
            individual: Mutex::new(HashMap::new()),
        }
    }

    /// Lease a context for `policy`. Individual policy uses `individual` as
    /// the sandbox key, minting a fresh one when absent; the chosen key is
    /// readable from the returned lease's id.
    pub fn lease(
        &self,
        policy: HostingPolicy,
        individual: Option<Uuid>,
    ) -> Result<ContextLease, ContextError> {
        let context = match policy {
            HostingPolicy::Host => self.lease_singleton(&self.host, ContextId::Host)?,
            HostingPolicy::SharedSandbox => self.lease_singleton(&self.shared, ContextId::Shared)?,
            HostingPolicy::IndividualSandbox => {
                let key = individual.unwrap_or_else(Uuid::new_v4);
                self.lease_individual(key)?
            }
        };
        Ok(ContextLease { context })
    }

    fn lease_singleton(
        &self,
        slot: &Mutex<Option<Arc<ScriptContext>>>,
        id: ContextId,
    ) -> Result<Arc<ScriptContext>, ContextError> {
        let mut guard = slot.lock();
        if let Some(context) = guard.as_ref() {
            if !context.is_terminated() {
                return Ok(context.clone());
            }
        }
        let context = self.spawn(id)?;
        *guard = Some(context.clone());
        Ok(context)
    }

    fn lease_individual(&self, key: Uuid) -> Result<Arc<ScriptContext>, ContextError> {
        let mut map = self.individual.lock();
        match map.entry(key) {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                occupied.get_mut().leases += 1;
                Ok(occupied.get().context.clone())
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                let context = self.spawn(ContextId::Individual(key))?;
                vacant.insert(IndividualSlot {
                    context: context.clone(),
                    leases: 1,
                });
                Ok(context)
            }
        }
    }

    fn spawn(&self, id: ContextId) -> Result<Arc<ScriptContext>, ContextError> {
        let name = match id {
            ContextId::Host => "host".to_string(),
            ContextId::Shared => "shared".to_string(),
            ContextId::Individual(key) => format!("individual-{key}"),
        };
        let engine = (self.spawner)(&name).map_err(ContextError::Spawn)?;
        info!(context = %id, "spawned context");
        Ok(Arc::new(ScriptContext::new(id, engine)))
    }

    /// Return a lease. Host and shared contexts persist; dropping the last
    /// lease on an individual context terminates it.
    pub fn release(&self, lease: ContextLease) {
        let ContextId::Individual(key) = lease.context.id() else {
            return;
        };
        let mut map = self.individual.lock();
        let remove = match map.get_mut(&key) {
            Some(slot) => {
                slot.leases = slot.leases.saturating_sub(1);
                slot.leases == 0
            }
            None => false,
        };
        if remove {
            if let Some(slot) = map.remove(&key) {
                slot.context.terminate();
                info!(context = %slot.context.id(), "tore down individual context");
            }
        }
    }

    /// Number of live individual sandboxes.
    pub fn individual_count(&self) -> usize {
        self.individual.lock().len()
    }

    /// Terminate every context. Later leases respawn host and shared;
    /// individual sandboxes are gone for good.
    pub fn shutdown_all(&self) {
        if let Some(context) = self.host.lock().take() {
            context.terminate();
        }
        if let Some(context) = self.shared.lock().take() {
            context.terminate();
        }
        let drained: Vec<_> = self.individual.lock().drain().collect();
        for (_, slot) in drained {
            slot.context.terminate();
        }
        info!("all contexts shut down");
    }
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("host", &self.host.lock().is_some())
            .field("shared", &self.shared.lock().is_some())
            .field("individual", &self.individual_count())
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_manager() -> (Arc<AtomicUsize>, ContextManager) {
        let spawned = Arc::new(AtomicUsize::new(0));
        let counter = spawned.clone();
        let spawner: EngineSpawner = Arc::new(move |_name| {
            counter.fetch_add(1, Ordering::Relaxed);
            Ok(Box::new(MockEngine::new()) as Box<dyn ScriptEngine>)
        });
        (spawned, ContextManager::new(spawner))
    }

    #[test]
    fn test_shared_context_is_reused() {
        let (spawned, manager) = counting_manager();

        let a = manager.lease(HostingPolicy::SharedSandbox, None).unwrap();
        let b = manager.lease(HostingPolicy::SharedSandbox, None).unwrap();

        assert!(Arc::ptr_eq(a.context(), b.context()));
        assert_eq!(spawned.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_host_and_shared_are_distinct() {
        let (spawned, manager) = counting_manager();

        let host = manager.lease(HostingPolicy::Host, None).unwrap();
        let shared = manager.lease(HostingPolicy::SharedSandbox, None).unwrap();

        assert_eq!(host.id(), ContextId::Host);
        assert_eq!(shared.id(), ContextId::Shared);
        assert!(!Arc::ptr_eq(host.context(), shared.context()));
        assert_eq!(spawned.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_individual_tears_down_on_last_release() {
        let (_, manager) = counting_manager();

        let lease = manager.lease(HostingPolicy::IndividualSandbox, None).unwrap();
        let ContextId::Individual(key) = lease.id() else {
            panic!("expected individual id");
        };
        let context = lease.context().clone();
        assert_eq!(manager.individual_count(), 1);

        // Same key leased again: two claims on one sandbox.
        let second = manager
            .lease(HostingPolicy::IndividualSandbox, Some(key))
            .unwrap();
        assert!(Arc::ptr_eq(&context, second.context()));

        manager.release(lease);
        assert_eq!(manager.individual_count(), 1);
        assert!(!context.is_terminated());

        manager.release(second);
        assert_eq!(manager.individual_count(), 0);
        assert!(context.is_terminated());
    }

    #[test]
    fn test_release_of_shared_is_a_no_op() {
        let (spawned, manager) = counting_manager();

        let lease = manager.lease(HostingPolicy::SharedSandbox, None).unwrap();
        let context = lease.context().clone();
        manager.release(lease);

        assert!(!context.is_terminated());
        let again = manager.lease(HostingPolicy::SharedSandbox, None).unwrap();
        assert!(Arc::ptr_eq(&context, again.context()));
        assert_eq!(spawned.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_terminated_singleton_respawns() {
        let (spawned, manager) = counting_manager();

        let first = manager.lease(HostingPolicy::SharedSandbox, None).unwrap();
        first.context().terminate();

        let second = manager.lease(HostingPolicy::SharedSandbox, None).unwrap();
        assert!(!Arc::ptr_eq(first.context(), second.context()));
        assert_eq!(spawned.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_shutdown_all() {
        let (_, manager) = counting_manager();

        let host = manager.lease(HostingPolicy::Host, None).unwrap();
        let individual = manager.lease(HostingPolicy::IndividualSandbox, None).unwrap();
        let host_context = host.context().clone();
        let individual_context = individual.context().clone();

        manager.shutdown_all();

        assert!(host_context.is_terminated());
        assert!(individual_context.is_terminated());
        assert_eq!(manager.individual_count(), 0);
    }
}
