//! Version providers.
//!
//! One provider instance lives inside each stored object and answers "what
//! version is this payload at right now". The strategy set is closed: a
//! tagged enum rather than an open registry, so the selection rules below
//! are the whole story.
//!
//! Selection order for a new payload: the null placeholder gets [`Null`],
//! hash-capable payloads get [`Hash`], signal-capable payloads get
//! [`Notify`], anything else is refused.
//!
//! [`Null`]: VersionProvider::Null
//! [`Hash`]: VersionProvider::Hash
//! [`Notify`]: VersionProvider::Notify

use std::sync::Arc;

use crate::error::StoreError;
use crate::payload::NullValue;
use crate::value::{ChangeSink, StoredValue, SubscriptionGuard};

/// Versioning strategy for one stored payload.
#[derive(Debug)]
pub enum VersionProvider {
    /// Fixed version. Stands in after disposal, freezing whatever the
    /// strategy last observed.
    Constant { version: u64 },

    /// Re-hashes the payload on every read; a changed hash pre-increments
    /// the version, an equal hash leaves it untouched.
    Hash { version: u64, last_hash: u64 },

    /// Edge-triggered: the payload's change signal marks the sink dirty,
    /// and the next read converts that mark into a single bump no matter
    /// how many notifications piled up.
    Notify {
        version: u64,
        sink: Arc<ChangeSink>,
        _guard: SubscriptionGuard,
    },

    /// The null placeholder. Always version 0.
    Null,
}

impl VersionProvider {
    /// Pick and initialize the strategy for a payload. `initial_version`
    /// is where the mutable strategies start counting; the store computes
    /// it as the displaced object's version plus one (or one for a fresh
    /// insert).
    pub fn for_payload(
        payload: &dyn StoredValue,
        initial_version: u64,
    ) -> Result<Self, StoreError> {
        if payload.as_any().is::<NullValue>() {
            return Ok(Self::Null);
        }
        if let Some(hash) = payload.content_hash() {
            return Ok(Self::Hash {
                version: initial_version,
                last_hash: hash,
            });
        }
        if let Some(signal) = payload.change_signal() {
            let (sink, guard) = signal.subscribe();
            return Ok(Self::Notify {
                version: initial_version,
                sink,
                _guard: guard,
            });
        }
        Err(StoreError::UnsupportedValueType(
            payload.type_label().to_string(),
        ))
    }

    /// Current version of `payload` under this strategy. May advance the
    /// internal counter as a side effect of observing a change.
    pub fn version_for(&mut self, payload: &dyn StoredValue) -> Result<u64, StoreError> {
        match self {
            Self::Constant { version } => Ok(*version),
            Self::Hash { version, last_hash } => {
                let hash = payload
                    .content_hash()
                    .ok_or_else(|| StoreError::ProviderMismatch(payload.type_label().into()))?;
                if hash != *last_hash {
                    *last_hash = hash;
                    *version += 1;
                }
                Ok(*version)
            }
            Self::Notify { version, sink, .. } => {
                if sink.take_dirty() {
                    *version += 1;
                }
                Ok(*version)
            }
            Self::Null => {
                if payload.as_any().is::<NullValue>() {
                    Ok(0)
                } else {
                    Err(StoreError::ProviderMismatch(payload.type_label().into()))
                }
            }
        }
    }

    /// Freeze at the current counter. Replaces the strategy with a
    /// constant, which for [`Notify`] also drops the subscription guard.
    ///
    /// [`Notify`]: VersionProvider::Notify
    pub fn dispose(&mut self) {
        *self = Self::Constant {
            version: self.raw_version(),
        };
    }

    fn raw_version(&self) -> u64 {
        match self {
            Self::Constant { version } => *version,
            Self::Hash { version, .. } => *version,
            Self::Notify { version, .. } => *version,
            Self::Null => 0,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
