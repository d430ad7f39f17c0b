//! Splitting Policy
//!
//! Turns a request (or a unit pulled from a parent queue) into schedulable elements.
//!
//! ## Granularity
//! Splitting happens twice on the way down the tree:
//! 1. **Request level**: a queued request is cut into coarse units (one per task, block,
//!    or failure-location group) that parent queues hand out to children.
//! 2. **Unit level**: a child expands a pulled unit into what it schedules locally. Most
//!    policies copy the unit as-is; `Dataset` expands into one element per block.
//!
//! The policy is chosen from the task's algorithm name and never changes for a request.

pub mod policies;

use crate::services::{DataLocator, FailureRecords};
use crate::spec::types::{TaskSpec, WorkSpecification};
use crate::store::types::{Element, ElementStatus, InboxElement};

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Closed set of splitting algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SplitPolicy {
    /// Production work with no input: one unit per task, sized by event count.
    WholeRequest,
    /// One unit per dataset, expanded to blocks at the child.
    Dataset,
    /// One unit per block.
    Block,
    /// Per block, also carrying the parent blocks each one needs.
    DatasetWithParents,
    /// Re-run files recorded as failed, grouped by location.
    Resubmission,
}

impl SplitPolicy {
    /// Selects the policy for a task from its declared algorithm name.
    pub fn for_task(task: &TaskSpec) -> Result<Self, String> {
        let policy = match task.split_algorithm.as_str() {
            "MonteCarlo" | "WholeRequest" => SplitPolicy::WholeRequest,
            "Dataset" => SplitPolicy::Dataset,
            "Block" | "DatasetBlock" => SplitPolicy::Block,
            "ResubmitBlock" | "Resubmission" => SplitPolicy::Resubmission,
            other => return Err(format!("unknown splitting algorithm {}", other)),
        };
        Ok(match policy {
            SplitPolicy::Dataset | SplitPolicy::Block if task.include_parents => {
                SplitPolicy::DatasetWithParents
            }
            policy => policy,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SplitPolicy::WholeRequest => "WholeRequest",
            SplitPolicy::Dataset => "Dataset",
            SplitPolicy::Block => "Block",
            SplitPolicy::DatasetWithParents => "DatasetWithParents",
            SplitPolicy::Resubmission => "Resubmission",
        }
    }
}

impl fmt::Display for SplitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("{0}")]
    Specification(String),

    /// Valid input that produced nothing to schedule.
    #[error("no work")]
    NoWork,

    #[error(transparent)]
    Lookup(#[from] anyhow::Error),
}

/// Which of the two split granularities applies to an inbox entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitLevel {
    Request,
    Unit,
}

/// Collaborators and defaults needed while splitting.
pub struct SplitContext<'a> {
    pub locator: &'a dyn DataLocator,
    pub failures: &'a dyn FailureRecords,
    pub default_files_per_job: u64,
    pub default_events_per_job: u64,
}

impl SplitContext<'_> {
    /// `ceil(files / files_per_job)`, or event based when the task sets `events_per_job`.
    /// Never less than one.
    pub fn job_count(&self, task: &TaskSpec, files: u64, events: u64) -> u64 {
        let jobs = match task.events_per_job {
            Some(per_job) => events.div_ceil(per_job.max(1)),
            None => files.div_ceil(task.files_per_job.unwrap_or(self.default_files_per_job).max(1)),
        };
        jobs.max(1)
    }
}

/// Splits an inbox entry into new Available elements.
pub async fn split(
    spec: &WorkSpecification,
    inbox: &InboxElement,
    level: SplitLevel,
    ctx: &SplitContext<'_>,
) -> Result<Vec<Element>, SplitError> {
    let mut elements = Vec::new();

    match level {
        SplitLevel::Request => {
            for task in &spec.tasks {
                let policy = SplitPolicy::for_task(task).map_err(SplitError::Specification)?;
                let produced = policies::split_request(policy, spec, task, inbox, ctx).await?;
                tracing::debug!(
                    "{} / {}: {} split into {} units",
                    spec.name,
                    task.name,
                    policy,
                    produced.len()
                );
                elements.extend(produced);
            }
        }
        SplitLevel::Unit => {
            let task = spec
                .tasks
                .iter()
                .find(|task| task.name == inbox.task_name)
                .ok_or_else(|| {
                    SplitError::Specification(format!(
                        "task {} not found in {}",
                        inbox.task_name, spec.name
                    ))
                })?;
            let policy = SplitPolicy::for_task(task).map_err(SplitError::Specification)?;
            elements = policies::split_unit(policy, task, inbox, ctx).await?;
        }
    }

    if elements.is_empty() {
        return Err(SplitError::NoWork);
    }
    Ok(elements)
}

/// Skeleton of an element produced from `inbox` for `task`.
pub(crate) fn child_element(task: &TaskSpec, inbox: &InboxElement) -> Element {
    let mut element = Element::new(
        &inbox.request_name,
        &task.name,
        &inbox.spec_url,
        ElementStatus::Available,
    );
    element.priority = inbox.priority;
    element.priority_updated = inbox.priority_updated;
    element.parent_queue_id = Some(inbox.id.clone());
    element.team = inbox.team.clone();
    element.site_whitelist = task.site_whitelist.clone();
    element.site_blacklist = task.site_blacklist.clone();
    element.trust_site_lists = task.trust_site_lists;
    element
}

#[cfg(test)]
mod tests;
