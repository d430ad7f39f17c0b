//! Failed-file records consumed by resubmission splitting.

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailedFile {
    pub lfn: String,
    pub events: u64,
    pub locations: Vec<String>,
    /// Parent files, only meaningful when the task reads parents.
    #[serde(default)]
    pub parents: Vec<String>,
}

#[async_trait]
pub trait FailureRecords: Send + Sync {
    /// Files that failed for `task_path` within the given collection.
    async fn failed_files(&self, collection: &str, task_path: &str) -> Result<Vec<FailedFile>>;
}

#[derive(Default)]
pub struct InMemoryFailureRecords {
    records: DashMap<(String, String), Vec<FailedFile>>,
}

impl InMemoryFailureRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, collection: &str, task_path: &str, file: FailedFile) {
        self.records
            .entry((collection.to_string(), task_path.to_string()))
            .or_default()
            .push(file);
    }
}

#[async_trait]
impl FailureRecords for InMemoryFailureRecords {
    async fn failed_files(&self, collection: &str, task_path: &str) -> Result<Vec<FailedFile>> {
        Ok(self
            .records
            .get(&(collection.to_string(), task_path.to_string()))
            .map(|files| files.clone())
            .unwrap_or_default())
    }
}
