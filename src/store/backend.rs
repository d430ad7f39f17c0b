//! Element and inbox collections of a single queue.
//!
//! All mutations go through [`ElementUpdate`], a field-level patch, so callers that touch
//! independent fields (status from the scheduler, progress from the tracker) never clobber
//! each other's writes.

use super::memory::DocumentStore;
use super::types::*;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field-level patch applied to elements or inbox entries.
///
/// Unset fields are left alone. Progress fields never decrease.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementUpdate {
    pub status: Option<ElementStatus>,
    pub priority: Option<i64>,
    /// `Some(None)` clears the child queue, `Some(Some(url))` sets it.
    pub child_queue_url: Option<Option<String>>,
    pub percent_complete: Option<u32>,
    pub percent_success: Option<u32>,
    pub subscription_id: Option<u64>,
    pub inputs: Option<BTreeMap<String, Vec<String>>>,
    pub parent_data: Option<BTreeMap<String, Vec<String>>>,
}

impl ElementUpdate {
    pub fn status(status: ElementStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn priority(priority: i64) -> Self {
        Self {
            priority: Some(priority),
            ..Default::default()
        }
    }

    pub fn progress(percent_complete: u32, percent_success: u32) -> Self {
        Self {
            percent_complete: Some(percent_complete),
            percent_success: Some(percent_success),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, status: ElementStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_child_queue(mut self, url: Option<String>) -> Self {
        self.child_queue_url = Some(url);
        self
    }

    pub fn with_subscription(mut self, subscription_id: u64) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    /// Whether applying this patch would modify `element`.
    pub fn changes(&self, element: &Element) -> bool {
        self.status.is_some_and(|s| s != element.status)
            || self.priority.is_some_and(|p| p != element.priority)
            || self
                .child_queue_url
                .as_ref()
                .is_some_and(|url| url != &element.child_queue_url)
            || self
                .percent_complete
                .is_some_and(|p| p > element.percent_complete)
            || self
                .percent_success
                .is_some_and(|p| p > element.percent_success)
            || self
                .subscription_id
                .is_some_and(|id| element.subscription_id != Some(id))
            || self.inputs.as_ref().is_some_and(|i| i != &element.inputs)
            || self
                .parent_data
                .as_ref()
                .is_some_and(|d| d != &element.parent_data)
    }

    pub fn apply(&self, element: &mut Element) {
        let now = now_ms();
        if let Some(status) = self.status {
            element.status = status;
        }
        if let Some(priority) = self.priority {
            element.priority = priority;
            element.priority_updated = now;
        }
        if let Some(url) = &self.child_queue_url {
            element.child_queue_url = url.clone();
        }
        if let Some(p) = self.percent_complete {
            element.percent_complete = element.percent_complete.max(p);
        }
        if let Some(p) = self.percent_success {
            element.percent_success = element.percent_success.max(p);
        }
        if let Some(id) = self.subscription_id {
            element.subscription_id = Some(id);
        }
        if let Some(inputs) = &self.inputs {
            element.inputs = inputs.clone();
        }
        if let Some(parent_data) = &self.parent_data {
            element.parent_data = parent_data.clone();
        }
        element.update_time = now;
    }
}

/// Query over elements or inbox entries. Empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementFilter {
    #[serde(default)]
    pub status: Option<Vec<ElementStatus>>,
    #[serde(default)]
    pub request_name: Option<String>,
    #[serde(default)]
    pub element_ids: Option<Vec<ElementId>>,
    #[serde(default)]
    pub child_queue_url: Option<String>,
    #[serde(default)]
    pub parent_queue_id: Option<ElementId>,
}

impl ElementFilter {
    pub fn status(statuses: &[ElementStatus]) -> Self {
        Self {
            status: Some(statuses.to_vec()),
            ..Default::default()
        }
    }

    pub fn request(name: &str) -> Self {
        Self {
            request_name: Some(name.to_string()),
            ..Default::default()
        }
    }

    pub fn ids(ids: &[ElementId]) -> Self {
        Self {
            element_ids: Some(ids.to_vec()),
            ..Default::default()
        }
    }

    pub fn with_status(mut self, statuses: &[ElementStatus]) -> Self {
        self.status = Some(statuses.to_vec());
        self
    }

    pub fn with_request(mut self, name: &str) -> Self {
        self.request_name = Some(name.to_string());
        self
    }

    pub fn with_child_queue(mut self, url: &str) -> Self {
        self.child_queue_url = Some(url.to_string());
        self
    }

    pub fn with_parent(mut self, id: &ElementId) -> Self {
        self.parent_queue_id = Some(id.clone());
        self
    }

    pub fn matches(&self, element: &Element) -> bool {
        if let Some(statuses) = &self.status
            && !statuses.contains(&element.status)
        {
            return false;
        }
        if let Some(name) = &self.request_name
            && &element.request_name != name
        {
            return false;
        }
        if let Some(ids) = &self.element_ids
            && !ids.contains(&element.id)
        {
            return false;
        }
        if let Some(url) = &self.child_queue_url
            && element.child_queue_url.as_deref() != Some(url.as_str())
        {
            return false;
        }
        if let Some(parent) = &self.parent_queue_id
            && element.parent_queue_id.as_ref() != Some(parent)
        {
            return false;
        }
        true
    }
}

/// The two logical collections every queue owns.
pub struct QueueBackend {
    /// Schedulable units.
    pub elements: DocumentStore<ElementId, Element>,
    /// Request-facing mirror; at a child this is a replica of the parent's elements.
    pub inbox: DocumentStore<ElementId, Element>,
}

impl Default for QueueBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueBackend {
    pub fn new() -> Self {
        Self {
            elements: DocumentStore::new("elements"),
            inbox: DocumentStore::new("inbox"),
        }
    }

    pub fn insert_elements(&self, elements: Vec<Element>) -> Vec<ElementId> {
        elements
            .into_iter()
            .map(|element| {
                let id = element.id.clone();
                self.elements.insert(id.clone(), element);
                id
            })
            .collect()
    }

    pub fn insert_inbox(&self, entry: InboxElement) -> ElementId {
        let id = entry.id.clone();
        self.inbox.insert(id.clone(), entry);
        id
    }

    pub fn get_element(&self, id: &ElementId) -> Option<Element> {
        self.elements.get(id)
    }

    pub fn get_inbox(&self, id: &ElementId) -> Option<InboxElement> {
        self.inbox.get(id)
    }

    /// Elements matching `filter`, oldest first.
    pub fn query_elements(&self, filter: &ElementFilter) -> Vec<Element> {
        query(&self.elements, filter)
    }

    /// Inbox entries matching `filter`, oldest first.
    pub fn query_inbox(&self, filter: &ElementFilter) -> Vec<InboxElement> {
        query(&self.inbox, filter)
    }

    /// Applies `update` to each listed element; returns the ids that actually changed.
    pub fn update_elements(&self, ids: &[ElementId], update: &ElementUpdate) -> Vec<ElementId> {
        bulk_update(&self.elements, ids, update)
    }

    pub fn update_inbox(&self, ids: &[ElementId], update: &ElementUpdate) -> Vec<ElementId> {
        bulk_update(&self.inbox, ids, update)
    }

    pub fn delete_elements(&self, ids: &[ElementId]) -> usize {
        ids.iter()
            .filter(|id| self.elements.remove(id).is_some())
            .count()
    }

    pub fn delete_inbox(&self, ids: &[ElementId]) -> usize {
        ids.iter().filter(|id| self.inbox.remove(id).is_some()).count()
    }

    pub fn element_documents(&self, filter: &ElementFilter) -> Vec<Document<Element>> {
        self.elements.filter_documents(|element| filter.matches(element))
    }

    pub fn inbox_documents(&self, filter: &ElementFilter) -> Vec<Document<InboxElement>> {
        self.inbox.filter_documents(|entry| filter.matches(entry))
    }
}

fn query(store: &DocumentStore<ElementId, Element>, filter: &ElementFilter) -> Vec<Element> {
    let mut found = store.filter(|element| filter.matches(element));
    found.sort_by(|a, b| {
        a.insert_time
            .cmp(&b.insert_time)
            .then_with(|| a.id.cmp(&b.id))
    });
    found
}

fn bulk_update(
    store: &DocumentStore<ElementId, Element>,
    ids: &[ElementId],
    update: &ElementUpdate,
) -> Vec<ElementId> {
    let mut changed = Vec::new();
    for id in ids {
        let Some(current) = store.get(id) else {
            tracing::debug!("{}: skipping update of missing {}", store.name(), id);
            continue;
        };
        if !update.changes(&current) {
            continue;
        }
        if store.update(id, |element| update.apply(element)).is_some() {
            changed.push(id.clone());
        }
    }
    changed
}
