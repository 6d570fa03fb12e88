//! Capability Registry
//!
//! The live set of capabilities the agent may call right now. Readers take a
//! shared lock only long enough to clone an `Arc`, so a capability that is
//! executing never holds the registry, and a registration never disturbs it.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::types::Capability;

#[derive(Default)]
struct Inner {
    entries: Vec<Arc<Capability>>,
    /// name -> index of the most recent registration
    by_name: HashMap<String, usize>,
}

/// Shared, append-only capability registry
#[derive(Default)]
pub struct CapabilityRegistry {
    inner: RwLock<Inner>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a capability. Duplicate names are allowed; the latest wins on lookup.
    pub fn register(&self, capability: Capability) -> Arc<Capability> {
        let capability = Arc::new(capability);
        let mut inner = self.inner.write();

        let index = inner.entries.len();
        inner.entries.push(capability.clone());
        let shadowed = inner
            .by_name
            .insert(capability.name.clone(), index)
            .is_some();

        debug!(
            "Registered capability '{}' (#{}, shadows earlier: {})",
            capability.name, index, shadowed
        );
        capability
    }

    /// Most recently registered capability with this name
    pub fn lookup(&self, name: &str) -> Option<Arc<Capability>> {
        let inner = self.inner.read();
        inner
            .by_name
            .get(name)
            .and_then(|&index| inner.entries.get(index))
            .cloned()
    }

    /// Point-in-time copy of every registration, in order
    pub fn list(&self) -> Vec<Arc<Capability>> {
        self.inner.read().entries.clone()
    }

    /// Point-in-time copy of the callable capabilities: the latest registration
    /// per name, in the order each name was last registered
    pub fn list_latest(&self) -> Vec<Arc<Capability>> {
        let inner = self.inner.read();
        inner
            .entries
            .iter()
            .enumerate()
            .filter(|(index, cap)| inner.by_name.get(&cap.name) == Some(index))
            .map(|(_, cap)| cap.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.inner.read().by_name.contains_key(name)
    }
}
