//! Application key store
//!
//! Constant key/value pairs (tenant id and the like) injected into every
//! record of an application. Read on every batch; replaced in place, last
//! writer wins.

use dashmap::DashMap;
use dictum_core::ValueMap;

pub trait AppKeyStore: Send + Sync {
    /// Current keys for `app_id`; empty when none are set.
    fn keys(&self, app_id: &str) -> ValueMap;

    /// Replace every key of `app_id`.
    fn replace(&self, app_id: &str, keys: ValueMap);
}

#[derive(Debug, Default)]
pub struct InMemoryAppKeyStore {
    apps: DashMap<String, ValueMap>,
}

impl InMemoryAppKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_keys(app_id: &str, keys: ValueMap) -> Self {
        let store = Self::new();
        store.replace(app_id, keys);
        store
    }
}

impl AppKeyStore for InMemoryAppKeyStore {
    fn keys(&self, app_id: &str) -> ValueMap {
        self.apps
            .get(app_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    fn replace(&self, app_id: &str, keys: ValueMap) {
        tracing::debug!(app_id = %app_id, count = keys.len(), "application keys replaced");
        self.apps.insert(app_id.to_string(), keys);
    }
}
