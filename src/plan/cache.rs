//! Query-result cache
//!
//! Deterministic query responses are cached per `(request, role, relevant
//! session variables)`. Only the session variables a plan declares it uses
//! enter the key, so users differing in unrelated variables share entries.
//! Mutations and subscriptions never touch this cache.

use crate::core::auth::SessionVariables;
use crate::core::request::GqlRequest;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use tokio::sync::RwLock;

/// Build the cache key for a request under a given identity
pub fn cache_key(
    request: &GqlRequest,
    role: &str,
    session: &SessionVariables,
    vars_used: &[String],
) -> String {
    let mut hasher = DefaultHasher::new();
    request.query.hash(&mut hasher);
    request.operation_name.hash(&mut hasher);
    if let Some(vars) = &request.variables {
        // Map iteration order is insertion order (preserve_order), which is
        // the order the client sent; hash a stable rendering instead.
        let mut entries: Vec<(&String, String)> =
            vars.iter().map(|(k, v)| (k, v.to_string())).collect();
        entries.sort();
        entries.hash(&mut hasher);
    }
    role.hash(&mut hasher);
    for key in vars_used {
        if let Some(value) = session.get(key) {
            key.hash(&mut hasher);
            value.hash(&mut hasher);
        }
    }
    format!("{:016x}", hasher.finish())
}

/// Async interface over a response cache
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn lookup(&self, key: &str) -> Option<Value>;

    /// Store a response, honouring an optional TTL directive in seconds
    async fn store(&self, key: String, response: Value, ttl_secs: Option<u64>);
}

struct CacheEntry {
    response: Value,
    expires_at: Option<DateTime<Utc>>,
}

/// In-process cache backing the default environment
pub struct InMemoryResultCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
}

impl InMemoryResultCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryResultCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ResultCache for InMemoryResultCache {
    async fn lookup(&self, key: &str) -> Option<Value> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if let Some(expiry) = entry.expires_at
            && expiry <= Utc::now()
        {
            return None;
        }
        Some(entry.response.clone())
    }

    async fn store(&self, key: String, response: Value, ttl_secs: Option<u64>) {
        let expires_at = ttl_secs.map(|secs| Utc::now() + Duration::seconds(secs as i64));
        self.entries.write().await.insert(
            key,
            CacheEntry {
                response,
                expires_at,
            },
        );
    }
}
