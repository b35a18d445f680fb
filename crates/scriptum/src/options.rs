//! Scripting options: compilation inputs and hosting policy.

use serde::{Deserialize, Serialize};

use crate::fingerprint::FingerprintBuilder;

/// Where a script executes.
///
/// `Host` runs in the process-wide host context, `SharedSandbox` in the one
/// sandbox all shared-policy scripts use, `IndividualSandbox` in a private
/// sandbox owned by the script instance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HostingPolicy {
    Host,
    #[default]
    SharedSandbox,
    IndividualSandbox,
}

impl HostingPolicy {
    pub fn tag(self) -> u32 {
        match self {
            HostingPolicy::Host => 0,
            HostingPolicy::SharedSandbox => 1,
            HostingPolicy::IndividualSandbox => 2,
        }
    }
}

impl std::fmt::Display for HostingPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            HostingPolicy::Host => "host",
            HostingPolicy::SharedSandbox => "shared_sandbox",
            HostingPolicy::IndividualSandbox => "individual_sandbox",
        };
        f.write_str(name)
    }
}

/// Compilation-relevant options of a script.
///
/// References and imports are opaque names to the engine; they matter to the
/// fingerprint (and thus to cache invalidation) in their declared order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptingOptions {
    pub references: Vec<String>,
    pub imports: Vec<String>,
    pub hosting: HostingPolicy,
}

impl ScriptingOptions {
    pub fn with_hosting(hosting: HostingPolicy) -> Self {
        Self {
            hosting,
            ..Self::default()
        }
    }

    /// Hash of references (in order), imports (in order), and the hosting
    /// tag. Each list folds its length first so an entry cannot slide from
    /// one list into the other unnoticed.
    pub fn structural_hash(&self) -> u32 {
        let mut builder = FingerprintBuilder::new().push_u32(self.references.len() as u32);
        for reference in &self.references {
            builder = builder.push_str(reference);
        }
        builder = builder.push_u32(self.imports.len() as u32);
        for import in &self.imports {
            builder = builder.push_str(import);
        }
        builder.push_u32(self.hosting.tag()).finish().0
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_shared() {
        assert_eq!(ScriptingOptions::default().hosting, HostingPolicy::SharedSandbox);
    }

    #[test]
    fn test_hash_tracks_order() {
        let mut a = ScriptingOptions::default();
        a.imports = vec!["x".into(), "y".into()];
        let mut b = ScriptingOptions::default();
        b.imports = vec!["y".into(), "x".into()];
        assert_ne!(a.structural_hash(), b.structural_hash());
    }

    #[test]
    fn test_hash_tracks_hosting() {
        let shared = ScriptingOptions::with_hosting(HostingPolicy::SharedSandbox);
        let host = ScriptingOptions::with_hosting(HostingPolicy::Host);
        assert_ne!(shared.structural_hash(), host.structural_hash());
    }

    #[test]
    fn test_references_and_imports_hash_apart() {
        let mut refs = ScriptingOptions::default();
        refs.references = vec!["lib".into()];
        let mut imports = ScriptingOptions::default();
        imports.imports = vec!["lib".into()];
        assert_ne!(refs.structural_hash(), imports.structural_hash());
    }
}
