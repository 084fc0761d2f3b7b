//! Query collections and the allow-list check
//!
//! Operators group vetted query texts into named collections and allow-list a
//! subset of those collections. When enforcement is on, a `start` is admitted
//! only if its query text (or its operation name plus text) matches an entry
//! in an allow-listed collection. The transport only ever calls
//! [`AllowlistChecker::is_allowed`]; collection management belongs to the
//! metadata layer.

use std::collections::HashSet;
use std::sync::RwLock;

/// A single vetted query inside a collection
#[derive(Debug, Clone)]
pub struct NamedQuery {
    pub name: String,
    pub query: String,
}

/// An ordered, named group of vetted queries
#[derive(Debug, Clone)]
pub struct QueryCollection {
    pub name: String,
    pub queries: Vec<NamedQuery>,
}

/// Read-side view over collections and the allow-listed subset
///
/// Collections keep their insertion order; the allow-list is a set of
/// collection names. Reads vastly outnumber writes, so both sides sit behind
/// `RwLock`s.
pub struct AllowlistChecker {
    collections: RwLock<Vec<QueryCollection>>,
    allowed: RwLock<HashSet<String>>,
}

impl AllowlistChecker {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(Vec::new()),
            allowed: RwLock::new(HashSet::new()),
        }
    }

    /// Replace or append a collection, preserving order for existing names
    pub fn upsert_collection(&self, collection: QueryCollection) {
        let mut collections = self.collections.write().unwrap_or_else(|e| e.into_inner());
        match collections.iter_mut().find(|c| c.name == collection.name) {
            Some(existing) => *existing = collection,
            None => collections.push(collection),
        }
    }

    /// Mark a collection name as allow-listed
    pub fn allow_collection(&self, name: impl Into<String>) {
        self.allowed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.into());
    }

    /// Drop a collection name from the allow-list
    pub fn disallow_collection(&self, name: &str) {
        self.allowed
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name);
    }

    /// Whether an operation may execute for the given role
    ///
    /// Matching is by normalised query text; when the client supplied an
    /// operation name it must also match the stored query name. The role is
    /// part of the interface so deployments can scope collections per role;
    /// the current matcher admits every role uniformly.
    pub fn is_allowed(&self, _role: &str, op_name: Option<&str>, query: &str) -> bool {
        let allowed = self.allowed.read().unwrap_or_else(|e| e.into_inner());
        if allowed.is_empty() {
            return false;
        }

        let wanted = normalise(query);
        let collections = self.collections.read().unwrap_or_else(|e| e.into_inner());

        collections
            .iter()
            .filter(|c| allowed.contains(&c.name))
            .flat_map(|c| c.queries.iter())
            .any(|q| {
                let name_ok = match op_name {
                    Some(name) => q.name == name,
                    None => true,
                };
                name_ok && normalise(&q.query) == wanted
            })
    }
}

impl Default for AllowlistChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// Collapse insignificant whitespace so formatting differences don't defeat
/// the text comparison
fn normalise(query: &str) -> String {
    query.split_whitespace().collect::<Vec<_>>().join(" ")
}
