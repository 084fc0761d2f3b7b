//! Schema cache accessor
//!
//! The gateway keeps one compiled schema in memory and swaps it atomically on
//! metadata changes. The transport never inspects the schema; it passes the
//! current `(schema, version)` pair to the planner at the start of every
//! operation, so a mid-flight reload never mixes two schema generations
//! inside one plan.

use std::sync::{Arc, RwLock};

/// Monotonic version counter for schema reloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SchemaVersion(pub u64);

/// The compiled gateway schema, opaque to the transport
#[derive(Debug, Clone, Default)]
pub struct GatewaySchema {
    /// SDL rendering kept for diagnostics
    pub sdl: String,
}

/// Atomic holder for the latest `(schema, version)` pair
pub struct SchemaCache {
    current: RwLock<(Arc<GatewaySchema>, SchemaVersion)>,
}

impl SchemaCache {
    pub fn new(schema: GatewaySchema) -> Self {
        Self {
            current: RwLock::new((Arc::new(schema), SchemaVersion(0))),
        }
    }

    /// Snapshot the latest schema and its version
    pub fn get(&self) -> (Arc<GatewaySchema>, SchemaVersion) {
        let guard = self.current.read().unwrap_or_else(|e| e.into_inner());
        (guard.0.clone(), guard.1)
    }

    /// Install a new schema, bumping the version
    pub fn replace(&self, schema: GatewaySchema) -> SchemaVersion {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let next = SchemaVersion(guard.1.0 + 1);
        *guard = (Arc::new(schema), next);
        next
    }
}

impl Default for SchemaCache {
    fn default() -> Self {
        Self::new(GatewaySchema::default())
    }
}
