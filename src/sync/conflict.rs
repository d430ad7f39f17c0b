//! Deterministic merge of divergent element replicas.
//!
//! The merge is a pure function of the set of copies: the order in which branches are
//! passed in never changes the result.

use crate::store::types::{Element, ElementStatus};

/// Merges the current copy of an element with its conflicting branches.
///
/// - status: highest [`ElementStatus::precedence`]; a child's Negotiating copy beats the
///   parent's Acquired copy of the same assignment, since both describe the same state
///   and only the child knows the split is still pending,
/// - `PercentComplete` / `PercentSuccess`: maximum,
/// - priority: the most recently set value (`PriorityUpdated`), larger value on ties,
/// - `SubscriptionId`: maximum,
/// - every other field comes from the copy with the highest status, then the latest write;
///   copies that still tie are ordered by their serialized form.
pub fn merge_elements(current: &Element, others: &[&Element]) -> Element {
    let copies: Vec<&Element> = std::iter::once(current).chain(others.iter().copied()).collect();

    let base = copies
        .iter()
        .copied()
        .max_by(|a, b| {
            a.status
                .precedence()
                .cmp(&b.status.precedence())
                .then_with(|| a.update_time.cmp(&b.update_time))
                .then_with(|| a.child_queue_url.cmp(&b.child_queue_url))
                .then_with(|| a.subscription_id.cmp(&b.subscription_id))
                .then_with(|| a.jobs.cmp(&b.jobs))
                .then_with(|| a.priority_updated.cmp(&b.priority_updated))
                .then_with(|| canonical(a).cmp(&canonical(b)))
        })
        .unwrap_or(current);

    let mut merged = base.clone();
    merged.status = merge_status(&copies);
    merged.percent_complete = copies.iter().map(|e| e.percent_complete).max().unwrap_or(0);
    merged.percent_success = copies.iter().map(|e| e.percent_success).max().unwrap_or(0);
    merged.subscription_id = copies.iter().filter_map(|e| e.subscription_id).max();
    merged.update_time = copies.iter().map(|e| e.update_time).max().unwrap_or(0);

    if let Some(latest) = copies
        .iter()
        .max_by(|a, b| {
            a.priority_updated
                .cmp(&b.priority_updated)
                .then_with(|| a.priority.cmp(&b.priority))
        })
    {
        merged.priority = latest.priority;
        merged.priority_updated = latest.priority_updated;
    }

    merged
}

pub fn merge_status(copies: &[&Element]) -> ElementStatus {
    let top = copies
        .iter()
        .map(|e| e.status)
        .max_by_key(|s| s.precedence())
        .unwrap_or(ElementStatus::Negotiating);

    if top == ElementStatus::Acquired
        && copies.iter().any(|e| e.status == ElementStatus::Negotiating)
    {
        return ElementStatus::Negotiating;
    }
    top
}

/// Serialized form used as the last tiebreak. Element maps are ordered, so equal
/// elements always serialize identically.
fn canonical(element: &Element) -> String {
    serde_json::to_string(element).unwrap_or_default()
}
