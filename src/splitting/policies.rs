//! One handler per policy and granularity.

use super::{SplitContext, SplitError, SplitPolicy, child_element};
use crate::services::{BlockInfo, FailedFile};
use crate::spec::types::{InputSpec, TaskSpec, WorkSpecification};
use crate::store::types::{Element, EventMask, InboxElement};

use std::collections::{BTreeMap, BTreeSet};

pub async fn split_request(
    policy: SplitPolicy,
    spec: &WorkSpecification,
    task: &TaskSpec,
    inbox: &InboxElement,
    ctx: &SplitContext<'_>,
) -> Result<Vec<Element>, SplitError> {
    match policy {
        SplitPolicy::WholeRequest => whole_request(task, inbox, ctx),
        SplitPolicy::Dataset => dataset(task, inbox, ctx).await,
        SplitPolicy::Block => blocks(task, inbox, ctx, false).await,
        SplitPolicy::DatasetWithParents => blocks(task, inbox, ctx, true).await,
        SplitPolicy::Resubmission => resubmission(spec, task, inbox, ctx).await,
    }
}

pub async fn split_unit(
    policy: SplitPolicy,
    task: &TaskSpec,
    unit: &InboxElement,
    ctx: &SplitContext<'_>,
) -> Result<Vec<Element>, SplitError> {
    match policy {
        SplitPolicy::Dataset => dataset_to_blocks(task, unit, ctx).await,
        _ => Ok(vec![copy_unit(task, unit)]),
    }
}

fn whole_request(
    task: &TaskSpec,
    inbox: &InboxElement,
    ctx: &SplitContext<'_>,
) -> Result<Vec<Element>, SplitError> {
    let total = task.total_events.ok_or_else(|| {
        SplitError::Specification(format!("task {} has no event count", task.name))
    })?;
    if total == 0 {
        return Ok(Vec::new());
    }

    let per_job = task.events_per_job.unwrap_or(ctx.default_events_per_job).max(1);
    let mut element = child_element(task, inbox);
    element.jobs = total.div_ceil(per_job);
    element.mask = Some(EventMask {
        first_event: 1,
        last_event: total,
    });
    Ok(vec![element])
}

async fn dataset(
    task: &TaskSpec,
    inbox: &InboxElement,
    ctx: &SplitContext<'_>,
) -> Result<Vec<Element>, SplitError> {
    let name = dataset_name(task)?;
    let selected = selected_blocks(task, ctx.locator.blocks(&name).await?);
    if selected.is_empty() {
        return Ok(Vec::new());
    }

    let mut element = child_element(task, inbox);
    element
        .inputs
        .insert(name.clone(), sorted(ctx.locator.locations(&name).await?));
    for block in &selected {
        element.jobs += ctx.job_count(task, block.num_files, block.num_events);
        element.num_of_files_added += block.num_files;
    }
    Ok(vec![element])
}

async fn dataset_to_blocks(
    task: &TaskSpec,
    unit: &InboxElement,
    ctx: &SplitContext<'_>,
) -> Result<Vec<Element>, SplitError> {
    let mut elements = Vec::new();
    for name in unit.inputs.keys() {
        for block in selected_blocks(task, ctx.locator.blocks(name).await?) {
            let mut element = copy_unit(task, unit);
            element.inputs = BTreeMap::from([(
                block.name.clone(),
                sorted(ctx.locator.locations(&block.name).await?),
            )]);
            element.jobs = ctx.job_count(task, block.num_files, block.num_events);
            element.num_of_files_added = block.num_files;
            elements.push(element);
        }
    }
    Ok(elements)
}

async fn blocks(
    task: &TaskSpec,
    inbox: &InboxElement,
    ctx: &SplitContext<'_>,
    with_parents: bool,
) -> Result<Vec<Element>, SplitError> {
    let name = dataset_name(task)?;
    let mut elements = Vec::new();

    for block in selected_blocks(task, ctx.locator.blocks(&name).await?) {
        let mut element = child_element(task, inbox);
        element
            .inputs
            .insert(block.name.clone(), sorted(ctx.locator.locations(&block.name).await?));
        element.jobs = ctx.job_count(task, block.num_files, block.num_events);
        element.num_of_files_added = block.num_files;

        if with_parents {
            let parents = ctx.locator.parent_blocks(&block.name).await?;
            if parents.is_empty() {
                return Err(SplitError::Specification(format!(
                    "block {} has no parents but parent processing was requested",
                    block.name
                )));
            }
            element.parent_flag = true;
            for parent in parents {
                element.num_of_files_added += parent.num_files;
                element
                    .parent_data
                    .insert(parent.name.clone(), sorted(ctx.locator.locations(&parent.name).await?));
            }
        }
        elements.push(element);
    }
    Ok(elements)
}

async fn resubmission(
    spec: &WorkSpecification,
    task: &TaskSpec,
    inbox: &InboxElement,
    ctx: &SplitContext<'_>,
) -> Result<Vec<Element>, SplitError> {
    let Some(InputSpec::Resubmission {
        collection,
        task_path,
    }) = &task.input
    else {
        return Err(SplitError::Specification(format!(
            "task {} has no failure record",
            task.name
        )));
    };

    let files = ctx.failures.failed_files(collection, task_path).await?;

    // Files that failed at the same set of sites become one unit.
    let mut groups: BTreeMap<Vec<String>, Vec<FailedFile>> = BTreeMap::new();
    for file in files {
        groups.entry(sorted(file.locations.clone())).or_default().push(file);
    }

    let mut elements = Vec::new();
    for (index, (sites, files)) in groups.into_iter().enumerate() {
        let mut element = child_element(task, inbox);
        let events: u64 = files.iter().map(|f| f.events).sum();
        let count = files.len() as u64;
        let parent_files: u64 = if task.include_parents {
            files.iter().map(|f| f.parents.len() as u64).sum()
        } else {
            0
        };
        element
            .inputs
            .insert(format!("{}:{}#{}", collection, task_path, index), sites);
        element.jobs = ctx.job_count(task, count, events);
        element.num_of_files_added = count + parent_files;
        elements.push(element);
    }

    if !elements.is_empty() {
        tracing::info!(
            "{}: resubmitting {} failure groups from {}",
            spec.name,
            elements.len(),
            collection
        );
    }
    Ok(elements)
}

/// Copies a pulled unit into a local element, keeping its inputs and sizing.
fn copy_unit(task: &TaskSpec, unit: &InboxElement) -> Element {
    let mut element = child_element(task, unit);
    element.site_whitelist = unit.site_whitelist.clone();
    element.site_blacklist = unit.site_blacklist.clone();
    element.trust_site_lists = unit.trust_site_lists;
    element.inputs = unit.inputs.clone();
    element.parent_flag = unit.parent_flag;
    element.parent_data = unit.parent_data.clone();
    element.jobs = unit.jobs;
    element.num_of_files_added = unit.num_of_files_added;
    element.mask = unit.mask;
    element
}

fn dataset_name(task: &TaskSpec) -> Result<String, SplitError> {
    task.dataset_path().ok_or_else(|| {
        SplitError::Specification(format!("task {} has no input dataset", task.name))
    })
}

/// Applies the run whitelist: only blocks holding at least one listed run survive.
fn selected_blocks(task: &TaskSpec, blocks: Vec<BlockInfo>) -> Vec<BlockInfo> {
    if task.run_whitelist.is_empty() {
        return blocks;
    }
    let wanted: BTreeSet<u64> = task.run_whitelist.iter().copied().collect();
    blocks
        .into_iter()
        .filter(|block| block.runs.iter().any(|run| wanted.contains(run)))
        .collect()
}

fn sorted(mut sites: Vec<String>) -> Vec<String> {
    sites.sort();
    sites.dedup();
    sites
}
