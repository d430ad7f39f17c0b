//! Loading specifications by URL.

use super::cache::LruCache;
use super::types::WorkSpecification;

use anyhow::{Context, Result};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

#[async_trait]
pub trait SpecResolver: Send + Sync {
    async fn resolve(&self, spec_url: &str) -> Result<Arc<WorkSpecification>>;
}

/// Specifications registered up front, keyed by URL.
#[derive(Default)]
pub struct InMemorySpecs {
    specs: DashMap<String, Arc<WorkSpecification>>,
}

impl InMemorySpecs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, spec_url: &str, spec: WorkSpecification) {
        self.specs.insert(spec_url.to_string(), Arc::new(spec));
    }
}

#[async_trait]
impl SpecResolver for InMemorySpecs {
    async fn resolve(&self, spec_url: &str) -> Result<Arc<WorkSpecification>> {
        self.specs
            .get(spec_url)
            .map(|spec| spec.clone())
            .ok_or_else(|| anyhow::anyhow!("No specification at {}", spec_url))
    }
}

/// Reads JSON specifications from disk (`file://` URLs or plain paths).
pub struct FileSpecResolver {
    cache: LruCache<String, Arc<WorkSpecification>>,
}

impl FileSpecResolver {
    pub fn new(cache_capacity: usize) -> Self {
        Self {
            cache: LruCache::new(cache_capacity),
        }
    }

    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

#[async_trait]
impl SpecResolver for FileSpecResolver {
    async fn resolve(&self, spec_url: &str) -> Result<Arc<WorkSpecification>> {
        if let Some(spec) = self.cache.get(&spec_url.to_string()) {
            return Ok(spec);
        }

        let path = spec_url.strip_prefix("file://").unwrap_or(spec_url);
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read specification {}", spec_url))?;
        let spec: WorkSpecification = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse specification {}", spec_url))?;
        let spec = Arc::new(spec);

        if let Some(evicted) = self.cache.put(spec_url.to_string(), spec.clone()) {
            tracing::trace!("Evicted specification {} from cache", evicted);
        }
        Ok(spec)
    }
}
