//! Site capacity.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};

/// Free job slots per site.
pub type SiteCapacity = BTreeMap<String, u64>;

#[async_trait]
pub trait ResourceSource: Send + Sync {
    /// Every site the grid knows about, whether or not it has free slots.
    async fn known_sites(&self) -> Result<BTreeSet<String>>;

    async fn free_slots(&self) -> Result<SiteCapacity>;
}

/// Fixed site list with adjustable slot counts.
pub struct StaticResources {
    slots: RwLock<SiteCapacity>,
}

impl StaticResources {
    pub fn new(slots: SiteCapacity) -> Self {
        Self {
            slots: RwLock::new(slots),
        }
    }

    pub fn from_pairs(pairs: &[(&str, u64)]) -> Self {
        Self::new(
            pairs
                .iter()
                .map(|(site, slots)| (site.to_string(), *slots))
                .collect(),
        )
    }

    pub fn set_slots(&self, site: &str, slots: u64) {
        self.slots.write().insert(site.to_string(), slots);
    }
}

#[async_trait]
impl ResourceSource for StaticResources {
    async fn known_sites(&self) -> Result<BTreeSet<String>> {
        Ok(self.slots.read().keys().cloned().collect())
    }

    async fn free_slots(&self) -> Result<SiteCapacity> {
        Ok(self
            .slots
            .read()
            .iter()
            .filter(|(_, slots)| **slots > 0)
            .map(|(site, slots)| (site.clone(), *slots))
            .collect())
    }
}
