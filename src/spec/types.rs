use serde::{Deserialize, Serialize};

/// A request as produced by the upstream workload builder.
///
/// Immutable once queued: the queue re-reads it by URL whenever it needs to split,
/// and a request is never re-split under a different policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkSpecification {
    pub name: String,
    #[serde(default)]
    pub owner: Owner,
    #[serde(default)]
    pub priority: i64,
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Owner {
    pub name: String,
    pub group: String,
}

/// One top-level task of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    #[serde(default)]
    pub site_whitelist: Vec<String>,
    #[serde(default)]
    pub site_blacklist: Vec<String>,
    /// Splitting algorithm name, e.g. `Block` or `MonteCarlo`.
    pub split_algorithm: String,
    #[serde(default)]
    pub files_per_job: Option<u64>,
    #[serde(default)]
    pub events_per_job: Option<u64>,
    /// Events to generate; only used by whole-request (production) work.
    #[serde(default)]
    pub total_events: Option<u64>,
    /// Only blocks containing at least one of these runs are used. Empty means all runs.
    #[serde(default)]
    pub run_whitelist: Vec<u64>,
    #[serde(default)]
    pub include_parents: bool,
    #[serde(default)]
    pub trust_site_lists: bool,
    #[serde(default)]
    pub input: Option<InputSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum InputSpec {
    /// A catalog dataset, named `/primary/processed/tier`.
    Dataset {
        primary: String,
        processed: String,
        tier: String,
        dbs_url: String,
    },
    /// Files that failed in an earlier processing pass.
    Resubmission {
        collection: String,
        task_path: String,
    },
}

impl InputSpec {
    pub fn dataset(primary: &str, processed: &str, tier: &str, dbs_url: &str) -> Self {
        InputSpec::Dataset {
            primary: primary.to_string(),
            processed: processed.to_string(),
            tier: tier.to_string(),
            dbs_url: dbs_url.to_string(),
        }
    }

    /// Full dataset name, or `None` for resubmission input.
    pub fn dataset_path(&self) -> Option<String> {
        match self {
            InputSpec::Dataset {
                primary,
                processed,
                tier,
                ..
            } => Some(format!("/{}/{}/{}", primary, processed, tier)),
            InputSpec::Resubmission { .. } => None,
        }
    }
}

impl TaskSpec {
    pub fn new(name: &str, split_algorithm: &str) -> Self {
        Self {
            name: name.to_string(),
            site_whitelist: Vec::new(),
            site_blacklist: Vec::new(),
            split_algorithm: split_algorithm.to_string(),
            files_per_job: None,
            events_per_job: None,
            total_events: None,
            run_whitelist: Vec::new(),
            include_parents: false,
            trust_site_lists: false,
            input: None,
        }
    }

    pub fn dataset_path(&self) -> Option<String> {
        self.input.as_ref().and_then(InputSpec::dataset_path)
    }
}
