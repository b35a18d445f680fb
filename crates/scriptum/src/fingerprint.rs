//! Structural fingerprints.
//!
//! 32-bit FNV-1a, folded field by field in declaration order. Fingerprint
//! equality is what "structurally equal" means for scripts: it drives the
//! runner's compile cache and catalog registration dedup.

use serde::{Deserialize, Serialize};

const FNV_OFFSET: u32 = 2_166_136_261;
const FNV_PRIME: u32 = 16_777_619;

/// Sentinel folded in place of an absent optional field.
const ABSENT: u32 = 1;

/// Hash `bytes` with FNV-1a 32.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes
        .iter()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME))
}

/// A completed structural fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(pub u32);

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Field-by-field fingerprint folder.
///
/// Each `push_*` folds one field as `state = state * PRIME ^ field`, seeded
/// with the FNV offset basis; `finish` seals it. Strings fold as their own
/// byte-level FNV-1a hash, so a one-character change anywhere in a string
/// perturbs the whole fingerprint.
#[derive(Debug, Clone)]
pub struct FingerprintBuilder {
    state: u32,
}

impl FingerprintBuilder {
    pub fn new() -> Self {
        Self { state: FNV_OFFSET }
    }

    pub fn push_u32(mut self, value: u32) -> Self {
        self.state = self.state.wrapping_mul(FNV_PRIME) ^ value;
        self
    }

    pub fn push_bool(self, value: bool) -> Self {
        self.push_u32(u32::from(value))
    }

    pub fn push_str(self, value: &str) -> Self {
        let hash = fnv1a_32(value.as_bytes());
        self.push_u32(hash)
    }

    /// Fold an optional string; `None` contributes the absent sentinel.
    pub fn push_opt_str(self, value: Option<&str>) -> Self {
        match value {
            Some(text) => self.push_str(text),
            None => self.push_u32(ABSENT),
        }
    }

    /// Fold an already-computed field hash.
    pub fn push_hash(self, hash: u32) -> Self {
        self.push_u32(hash)
    }

    /// Fold an optional field hash; `None` contributes the absent sentinel.
    pub fn push_opt_hash(self, hash: Option<u32>) -> Self {
        self.push_u32(hash.unwrap_or(ABSENT))
    }

    pub fn finish(self) -> Fingerprint {
        Fingerprint(self.state)
    }
}

impl Default for FingerprintBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
