use crate::config::AccessListConfig;
use dashmap::DashMap;

/// Membership checks consulted before any quota
///
/// The engine checks `is_denied` first, so deny wins when an identifier is on both lists.
pub trait AccessList: Send + Sync {
    fn is_denied(&self, identifier: &str) -> bool;
    fn is_allowed(&self, identifier: &str) -> bool;
}

/// Allow and deny lists held in memory, seeded from configuration
///
/// Entries carry an optional note. Lookups are lock-free reads on a sharded map;
/// an external admin surface may add or remove entries at runtime.
#[derive(Debug, Default)]
pub struct StaticAccessList {
    allow: DashMap<String, Option<String>>,
    deny: DashMap<String, Option<String>>,
}

impl StaticAccessList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &AccessListConfig) -> Self {
        let list = Self::new();
        for entry in &config.allow {
            list.allow(entry.identifier.clone(), entry.note.clone());
        }
        for entry in &config.deny {
            list.deny(entry.identifier.clone(), entry.note.clone());
        }

        tracing::info!(
            allowed = list.allow.len(),
            denied = list.deny.len(),
            "Access lists loaded"
        );

        list
    }

    pub fn allow(&self, identifier: impl Into<String>, note: Option<String>) {
        self.allow.insert(identifier.into(), note);
    }

    pub fn deny(&self, identifier: impl Into<String>, note: Option<String>) {
        self.deny.insert(identifier.into(), note);
    }

    /// Remove an identifier from both lists
    pub fn remove(&self, identifier: &str) -> bool {
        let allowed = self.allow.remove(identifier).is_some();
        let denied = self.deny.remove(identifier).is_some();
        allowed || denied
    }

    pub fn deny_note(&self, identifier: &str) -> Option<String> {
        self.deny.get(identifier).and_then(|entry| entry.value().clone())
    }

    pub fn allow_note(&self, identifier: &str) -> Option<String> {
        self.allow.get(identifier).and_then(|entry| entry.value().clone())
    }
}

impl AccessList for StaticAccessList {
    fn is_denied(&self, identifier: &str) -> bool {
        self.deny.contains_key(identifier)
    }

    fn is_allowed(&self, identifier: &str) -> bool {
        self.allow.contains_key(identifier)
    }
}
