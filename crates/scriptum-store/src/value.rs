//! The stored-value contract and change notification plumbing.
//!
//! A value becomes storable by implementing [`StoredValue`]. The two
//! capability probes decide how the store versions it: values that can
//! hash their content get a hash-comparing provider, values that own a
//! [`ChangeSignal`] get an edge-triggered one. A value may support
//! neither, in which case the store refuses it.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

/// A value the object store can hold.
///
/// Implementations are type-erased behind `Arc<dyn StoredValue>`; the two
/// `as_any` accessors exist so typed retrieval can downcast back.
pub trait StoredValue: Any + Send + Sync {
    /// Short type name used by codecs and error messages.
    fn type_label(&self) -> &'static str;

    /// Structural hash of the current content, if this type supports it.
    /// Returning `Some` opts the value into hash-comparing versioning.
    fn content_hash(&self) -> Option<u64> {
        None
    }

    /// Change signal owned by this value, if it supports edge-triggered
    /// notification. Hash support takes precedence when both are present.
    fn change_signal(&self) -> Option<&ChangeSignal> {
        None
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_arc(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

/// Downcast a type-erased payload to a concrete type. `None` on mismatch;
/// the store treats that as a soft lookup failure, not an error.
pub fn downcast_value<T: StoredValue>(value: &Arc<dyn StoredValue>) -> Option<Arc<T>> {
    value.clone().as_any_arc().downcast::<T>().ok()
}

/// 64-bit FNV-1a over raw bytes. Stable across runs, which is what makes
/// hash-based versioning meaningful for persisted or re-created values.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

// ─────────────────────────────────────────────────────────────────────────────
// Change notification
// ─────────────────────────────────────────────────────────────────────────────

/// Dirty flag handed to a subscriber of a [`ChangeSignal`].
///
/// `notify` sets it; the version provider consumes it with [`take_dirty`]
/// when the version is next read, so any number of notifications between
/// two reads collapse into a single version bump.
///
/// [`take_dirty`]: ChangeSink::take_dirty
#[derive(Debug, Default)]
pub struct ChangeSink {
    dirty: AtomicBool,
}

impl ChangeSink {
    /// Read and clear the dirty flag.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }

    fn mark(&self) {
        self.dirty.store(true, Ordering::Release);
    }
}

#[derive(Debug, Default)]
struct SignalInner {
    sinks: Mutex<Vec<(u64, Weak<ChangeSink>)>>,
    next_id: AtomicU64,
}

/// Subscription point owned by a mutable value.
///
/// The value calls [`notify`] after each mutation; subscribers hold a
/// [`ChangeSink`] plus a [`SubscriptionGuard`] that unsubscribes on drop,
/// so a discarded provider can never keep a subscription alive.
///
/// [`notify`]: ChangeSignal::notify
#[derive(Debug, Default)]
pub struct ChangeSignal {
    inner: Arc<SignalInner>,
}

impl ChangeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. The subscription lasts until the guard is
    /// dropped.
    pub fn subscribe(&self) -> (Arc<ChangeSink>, SubscriptionGuard) {
        let sink = Arc::new(ChangeSink::default());
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.sinks.lock().push((id, Arc::downgrade(&sink)));
        let guard = SubscriptionGuard {
            signal: Arc::downgrade(&self.inner),
            id,
        };
        (sink, guard)
    }

    /// Mark every live subscriber dirty. Entries whose sink has been
    /// dropped are pruned as a side effect; notifying with no subscribers
    /// is a no-op.
    pub fn notify(&self) {
        let mut sinks = self.inner.sinks.lock();
        sinks.retain(|(_, weak)| match weak.upgrade() {
            Some(sink) => {
                sink.mark();
                true
            }
            None => false,
        });
    }

    /// Number of live subscriptions (prunes dead sinks first).
    pub fn subscriber_count(&self) -> usize {
        let mut sinks = self.inner.sinks.lock();
        sinks.retain(|(_, weak)| weak.strong_count() > 0);
        sinks.len()
    }
}

/// Observer token: removes its subscription from the signal when dropped.
#[derive(Debug)]
pub struct SubscriptionGuard {
    signal: Weak<SignalInner>,
    id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.signal.upgrade() {
            inner.sinks.lock().retain(|(id, _)| *id != self.id);
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
