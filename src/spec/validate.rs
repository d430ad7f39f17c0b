//! Checks run on a specification before anything is persisted.
//!
//! Every failure here is a [`WorkQueueError::Specification`]. Emptiness (no events, no
//! blocks left after run filtering) is not checked here; that is a "no work" outcome of
//! splitting.

use super::types::*;
use crate::error::{Result, WorkQueueError};
use crate::services::{DataLocator, ResourceSource};
use crate::splitting::SplitPolicy;

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

static DATASET_COMPONENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._-]+$").expect("Invalid regex pattern for dataset component")
});

/// Checks that need no collaborator. Returns the policy chosen for each task.
pub fn check_structure(
    spec: &WorkSpecification,
    request_name: Option<&str>,
) -> Result<Vec<SplitPolicy>> {
    let request = request_name.unwrap_or(&spec.name);

    if spec.name.trim().is_empty() {
        return Err(WorkQueueError::specification(request, "request name is empty"));
    }
    if let Some(name) = request_name
        && name != spec.name
    {
        return Err(WorkQueueError::specification(
            request,
            format!("request name does not match specification name {}", spec.name),
        ));
    }
    if spec.tasks.is_empty() {
        return Err(WorkQueueError::specification(request, "no top-level tasks"));
    }
    if spec.priority < 0 {
        return Err(WorkQueueError::specification(
            request,
            format!("priority must not be negative, got {}", spec.priority),
        ));
    }

    spec.tasks
        .iter()
        .map(|task| check_task(request, task))
        .collect()
}

fn check_task(request: &str, task: &TaskSpec) -> Result<SplitPolicy> {
    let fail = |reason: String| WorkQueueError::specification(request, format!("task {}: {}", task.name, reason));

    if task.site_whitelist.is_empty() {
        return Err(fail("site whitelist is empty".to_string()));
    }

    let both: Vec<&String> = task
        .site_whitelist
        .iter()
        .filter(|site| task.site_blacklist.contains(site))
        .collect();
    if !both.is_empty() {
        return Err(fail(format!("sites both white- and blacklisted: {:?}", both)));
    }

    if task.files_per_job == Some(0) || task.events_per_job == Some(0) {
        return Err(fail("job granularity must be positive".to_string()));
    }

    let policy = SplitPolicy::for_task(task).map_err(fail)?;

    match (policy, &task.input) {
        (SplitPolicy::WholeRequest, None) => {
            if task.total_events.is_none() {
                return Err(fail(format!("{} splitting needs an event count", policy)));
            }
        }
        (SplitPolicy::WholeRequest, Some(_)) => {
            return Err(fail(format!("{} splitting takes no input data", policy)));
        }
        (
            SplitPolicy::Dataset | SplitPolicy::Block | SplitPolicy::DatasetWithParents,
            Some(InputSpec::Dataset { .. }),
        ) => {}
        (SplitPolicy::Resubmission, Some(InputSpec::Resubmission { .. })) => {}
        (SplitPolicy::Resubmission, _) => {
            return Err(fail(format!("{} splitting needs a failure record", policy)));
        }
        (_, _) => {
            return Err(fail(format!("{} splitting needs an input dataset", policy)));
        }
    }

    if task.include_parents && task.input.is_none() {
        return Err(fail("parent processing requested without input data".to_string()));
    }

    if let Some(InputSpec::Dataset {
        primary,
        processed,
        tier,
        dbs_url,
    }) = &task.input
    {
        if primary.contains('/') {
            return Err(fail(format!("primary dataset {} contains '/'", primary)));
        }
        for component in [primary, processed, tier] {
            if !DATASET_COMPONENT.is_match(component) {
                return Err(fail(format!("malformed dataset component {:?}", component)));
            }
        }
        check_dbs_url(dbs_url).map_err(fail)?;
    }

    Ok(policy)
}

fn check_dbs_url(raw: &str) -> std::result::Result<(), String> {
    let url = reqwest::Url::parse(raw).map_err(|e| format!("malformed dbs url {}: {}", raw, e))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(format!("dbs url {} has unsupported scheme {}", raw, other)),
    }
}

/// Checks against the site list and the data catalog.
pub async fn check_references(
    spec: &WorkSpecification,
    request_name: Option<&str>,
    resources: &dyn ResourceSource,
    locator: &dyn DataLocator,
) -> Result<()> {
    let request = request_name.unwrap_or(&spec.name);
    let known: BTreeSet<String> = resources.known_sites().await?;

    for task in &spec.tasks {
        let unknown: Vec<&String> = task
            .site_whitelist
            .iter()
            .filter(|site| !known.contains(*site))
            .collect();
        if !unknown.is_empty() {
            return Err(WorkQueueError::specification(
                request,
                format!("task {}: unknown whitelist sites {:?}", task.name, unknown),
            ));
        }

        if let Some(dataset) = task.dataset_path()
            && !locator.dataset_exists(&dataset).await?
        {
            return Err(WorkQueueError::specification(
                request,
                format!("task {}: dataset {} not found", task.name, dataset),
            ));
        }
    }
    Ok(())
}

/// Full validation, structure first.
pub async fn validate(
    spec: &WorkSpecification,
    request_name: Option<&str>,
    resources: &dyn ResourceSource,
    locator: &dyn DataLocator,
) -> Result<Vec<SplitPolicy>> {
    let policies = check_structure(spec, request_name)?;
    check_references(spec, request_name, resources, locator).await?;
    Ok(policies)
}
