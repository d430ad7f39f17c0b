//! Shared fixtures for unit tests.

use crate::config::QueueConfig;
use crate::queue::engine::WorkQueue;
use crate::services::locator::CatalogBlock;
use crate::services::*;
use crate::spec::resolver::InMemorySpecs;
use crate::spec::types::{InputSpec, TaskSpec, WorkSpecification};
use crate::sync::parent::ParentQueue;

use std::sync::Arc;

pub const DATASET: &str = "/MinBias/Run2024-v1/RAW";
pub const PARENT_DATASET: &str = "/MinBias/Run2024-v1/GEN-SIM";
pub const BLOCK_1: &str = "/MinBias/Run2024-v1/RAW#b1";
pub const BLOCK_2: &str = "/MinBias/Run2024-v1/RAW#b2";
pub const DBS_URL: &str = "https://dbs.example.org/reader";

/// Two blocks at site A with 5 and 10 files, each with one parent block.
pub fn catalog() -> Arc<CatalogLocator> {
    let locator = CatalogLocator::new();
    let block = |name: &str, files, runs: Vec<u64>, sites: &[&str], parents: &[&str]| CatalogBlock {
        name: name.to_string(),
        files,
        events: files * 100,
        runs,
        locations: sites.iter().map(|s| s.to_string()).collect(),
        parents: parents.iter().map(|s| s.to_string()).collect(),
    };
    locator.add_block(PARENT_DATASET, block("/MinBias/Run2024-v1/GEN-SIM#p1", 3, vec![1], &["A"], &[]));
    locator.add_block(PARENT_DATASET, block("/MinBias/Run2024-v1/GEN-SIM#p2", 4, vec![2], &["A", "C"], &[]));
    locator.add_block(DATASET, block(BLOCK_1, 5, vec![1], &["A"], &["/MinBias/Run2024-v1/GEN-SIM#p1"]));
    locator.add_block(DATASET, block(BLOCK_2, 10, vec![2], &["A"], &["/MinBias/Run2024-v1/GEN-SIM#p2"]));
    Arc::new(locator)
}

pub fn resources() -> Arc<StaticResources> {
    Arc::new(StaticResources::from_pairs(&[("A", 100), ("B", 100), ("C", 100)]))
}

/// Block-split processing request whitelisting A and C, blacklisting B.
pub fn block_spec(name: &str) -> WorkSpecification {
    let mut task = TaskSpec::new("Reco", "Block");
    task.site_whitelist = vec!["A".into(), "C".into()];
    task.site_blacklist = vec!["B".into()];
    task.files_per_job = Some(1);
    task.input = Some(InputSpec::dataset("MinBias", "Run2024-v1", "RAW", DBS_URL));
    WorkSpecification {
        name: name.to_string(),
        owner: Default::default(),
        priority: 10,
        tasks: vec![task],
    }
}

pub fn dataset_spec(name: &str) -> WorkSpecification {
    let mut spec = block_spec(name);
    spec.tasks[0].split_algorithm = "Dataset".to_string();
    spec
}

/// Production request of `events` events, 100 events per job.
pub fn production_spec(name: &str, events: u64) -> WorkSpecification {
    let mut task = TaskSpec::new("Production", "MonteCarlo");
    task.site_whitelist = vec!["A".into(), "B".into(), "C".into()];
    task.events_per_job = Some(100);
    task.total_events = Some(events);
    WorkSpecification {
        name: name.to_string(),
        owner: Default::default(),
        priority: 5,
        tasks: vec![task],
    }
}

pub fn spec_url(name: &str) -> String {
    format!("mem://{}", name)
}

/// Collaborators shared by every queue of one test tree.
pub struct Grid {
    pub specs: Arc<InMemorySpecs>,
    pub locator: Arc<CatalogLocator>,
    pub resources: Arc<StaticResources>,
    pub failures: Arc<InMemoryFailureRecords>,
}

impl Grid {
    pub fn new() -> Self {
        Self {
            specs: Arc::new(InMemorySpecs::new()),
            locator: catalog(),
            resources: resources(),
            failures: Arc::new(InMemoryFailureRecords::new()),
        }
    }

    /// Registers a specification and returns its URL.
    pub fn register(&self, spec: WorkSpecification) -> String {
        let url = spec_url(&spec.name);
        self.specs.register(&url, spec);
        url
    }

    pub fn services(&self) -> Services {
        Services::new(self.specs.clone(), self.locator.clone(), self.resources.clone())
            .with_failures(self.failures.clone())
    }

    pub fn config(&self, url: &str) -> QueueConfig {
        QueueConfig::with_url(url)
    }

    pub fn global_queue(&self) -> Arc<WorkQueue> {
        WorkQueue::new(self.config("http://global"), self.services(), None)
    }

    pub fn local_queue(
        &self,
        url: &str,
        parent: Arc<dyn ParentQueue>,
        tracker: Arc<InMemoryTracker>,
    ) -> Arc<WorkQueue> {
        WorkQueue::new(
            self.config(url),
            self.services().with_tracker(tracker),
            Some(parent),
        )
    }
}
