//! Dataset and block lookups.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Metadata of one block as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub name: String,
    pub num_files: u64,
    pub num_events: u64,
    #[serde(default)]
    pub runs: Vec<u64>,
}

#[async_trait]
pub trait DataLocator: Send + Sync {
    async fn dataset_exists(&self, dataset: &str) -> Result<bool>;

    /// Blocks of a dataset; an unknown dataset is an error.
    async fn blocks(&self, dataset: &str) -> Result<Vec<BlockInfo>>;

    /// Sites holding a block, or holding every block of a dataset.
    async fn locations(&self, input: &str) -> Result<Vec<String>>;

    /// Blocks of the parent dataset that the given block was produced from.
    async fn parent_blocks(&self, block: &str) -> Result<Vec<BlockInfo>>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogBlock {
    pub name: String,
    pub files: u64,
    pub events: u64,
    #[serde(default)]
    pub runs: Vec<u64>,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub parents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogDataset {
    pub name: String,
    pub blocks: Vec<CatalogBlock>,
}

/// On-disk layout accepted by [`CatalogLocator::from_json`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub datasets: Vec<CatalogDataset>,
}

/// In-memory catalog.
///
/// Block locations can be moved at runtime, which is what location refreshes pick up.
#[derive(Default)]
pub struct CatalogLocator {
    /// Dataset -> block names, in insertion order.
    datasets: DashMap<String, Vec<String>>,
    blocks: DashMap<String, CatalogBlock>,
}

impl CatalogLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_catalog(catalog: CatalogFile) -> Self {
        let locator = Self::new();
        for dataset in catalog.datasets {
            for block in dataset.blocks {
                locator.add_block(&dataset.name, block);
            }
        }
        locator
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let catalog: CatalogFile = serde_json::from_str(raw)?;
        Ok(Self::from_catalog(catalog))
    }

    pub fn add_block(&self, dataset: &str, block: CatalogBlock) {
        let mut names = self.datasets.entry(dataset.to_string()).or_default();
        if !names.contains(&block.name) {
            names.push(block.name.clone());
        }
        drop(names);
        self.blocks.insert(block.name.clone(), block);
    }

    /// Convenience for tests: a block at the given sites with no parents.
    pub fn add_simple_block(&self, dataset: &str, block: &str, files: u64, events: u64, sites: &[&str]) {
        self.add_block(
            dataset,
            CatalogBlock {
                name: block.to_string(),
                files,
                events,
                runs: Vec::new(),
                locations: sites.iter().map(|s| s.to_string()).collect(),
                parents: Vec::new(),
            },
        );
    }

    /// Replaces the sites of a block. Returns false if the block is unknown.
    pub fn move_block(&self, block: &str, sites: &[&str]) -> bool {
        match self.blocks.get_mut(block) {
            Some(mut record) => {
                record.locations = sites.iter().map(|s| s.to_string()).collect();
                true
            }
            None => false,
        }
    }

    fn block_names(&self, dataset: &str) -> Option<Vec<String>> {
        self.datasets.get(dataset).map(|names| names.clone())
    }

    fn info(block: &CatalogBlock) -> BlockInfo {
        BlockInfo {
            name: block.name.clone(),
            num_files: block.files,
            num_events: block.events,
            runs: block.runs.clone(),
        }
    }
}

#[async_trait]
impl DataLocator for CatalogLocator {
    async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        Ok(self.datasets.contains_key(dataset))
    }

    async fn blocks(&self, dataset: &str) -> Result<Vec<BlockInfo>> {
        let names = self
            .block_names(dataset)
            .ok_or_else(|| anyhow::anyhow!("Unknown dataset {}", dataset))?;
        Ok(names
            .iter()
            .filter_map(|name| self.blocks.get(name).map(|block| Self::info(&block)))
            .collect())
    }

    async fn locations(&self, input: &str) -> Result<Vec<String>> {
        if let Some(block) = self.blocks.get(input) {
            return Ok(block.locations.clone());
        }

        let names = self
            .block_names(input)
            .ok_or_else(|| anyhow::anyhow!("Unknown block or dataset {}", input))?;

        let mut common: Option<BTreeSet<String>> = None;
        for name in names {
            let Some(block) = self.blocks.get(&name) else {
                continue;
            };
            let sites: BTreeSet<String> = block.locations.iter().cloned().collect();
            common = Some(match common {
                None => sites,
                Some(previous) => previous.intersection(&sites).cloned().collect(),
            });
        }
        Ok(common.unwrap_or_default().into_iter().collect())
    }

    async fn parent_blocks(&self, block: &str) -> Result<Vec<BlockInfo>> {
        let parents = self
            .blocks
            .get(block)
            .map(|record| record.parents.clone())
            .ok_or_else(|| anyhow::anyhow!("Unknown block {}", block))?;

        parents
            .iter()
            .map(|name| {
                self.blocks
                    .get(name)
                    .map(|parent| Self::info(&parent))
                    .ok_or_else(|| anyhow::anyhow!("Parent block {} of {} not in catalog", name, block))
            })
            .collect()
    }
}
