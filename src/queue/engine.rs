//! Work Queue Engine
//!
//! One queue level of the tree. The same type serves as the top-level queue (requests are
//! queued into it and split), as an intermediate queue, and as a leaf that materializes
//! work into an execution tracker.
//!
//! ## Concurrency
//! Every operation that reads-then-writes element state holds `op_lock`, so two callers
//! can never acquire the same element or split the same inbox entry twice. Stores are
//! `DashMap`-backed, so read-only queries skip the lock. A queue only ever awaits its
//! parent while holding its own lock, never a child, so the tree cannot deadlock.

use super::lifecycle;
use crate::config::QueueConfig;
use crate::error::{Result, WorkQueueError};
use crate::matcher::{self, Assignment, MatchConstraints};
use crate::services::{Services, SiteCapacity};
use crate::spec::validate::validate;
use crate::splitting::{self, SplitContext, SplitError, SplitLevel};
use crate::store::backend::{ElementFilter, ElementUpdate, QueueBackend};
use crate::store::types::*;
use crate::sync::conflict::merge_elements;
use crate::sync::parent::ParentQueue;
use crate::sync::protocol::{Acknowledgement, AcquireRequest, ParentSnapshot};

use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of [`WorkQueue::queue_work`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueuedWork {
    /// Split into this many elements.
    Split(usize),
    /// Valid request that yielded nothing to schedule; it stays Negotiating until its
    /// retry window runs out.
    NoWork,
    /// A request with this name is already queued here.
    AlreadyQueued,
    /// Queued; splitting happens on a later inbound pass.
    Negotiating,
}

/// Elements addressed either by id or by the request they belong to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkSelector {
    Ids(Vec<ElementId>),
    Request(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InjectionStatus {
    Request(bool),
    All(Vec<(String, bool)>),
}

/// What one cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleanupReport {
    pub pulled: usize,
    pub conflicts_fixed: usize,
    pub canceled: usize,
    pub timed_out: usize,
    pub inbox_updated: usize,
    pub pushed: usize,
    pub deleted: usize,
}

pub struct WorkQueue {
    config: QueueConfig,
    backend: QueueBackend,
    services: Services,
    parent: Option<Arc<dyn ParentQueue>>,
    draining: AtomicBool,
    teams: RwLock<Vec<String>>,
    op_lock: tokio::sync::Mutex<()>,
    /// Inbox revision last sent to the parent, per entry.
    pushed: DashMap<ElementId, Revision>,
    /// Status the parent reported for each inbox entry at the last exchange.
    parent_view: DashMap<ElementId, ElementStatus>,
    /// Inbox entries the parent took back; deleted locally once they finish.
    orphans: DashSet<ElementId>,
}

impl WorkQueue {
    pub fn new(
        config: QueueConfig,
        services: Services,
        parent: Option<Arc<dyn ParentQueue>>,
    ) -> Arc<Self> {
        tracing::info!(
            "Work queue {} starting ({})",
            config.queue_url,
            match &parent {
                Some(p) => format!("parent {}", p.url()),
                None => "top level".to_string(),
            }
        );
        Arc::new(Self {
            draining: AtomicBool::new(config.drain_mode),
            teams: RwLock::new(config.teams.clone()),
            config,
            backend: QueueBackend::new(),
            services,
            parent,
            op_lock: tokio::sync::Mutex::new(()),
            pushed: DashMap::new(),
            parent_view: DashMap::new(),
            orphans: DashSet::new(),
        })
    }

    pub fn url(&self) -> &str {
        &self.config.queue_url
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn backend(&self) -> &QueueBackend {
        &self.backend
    }

    pub fn services(&self) -> &Services {
        &self.services
    }

    pub fn has_parent(&self) -> bool {
        self.parent.is_some()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    pub fn set_drain_mode(&self, draining: bool) {
        let previous = self.draining.swap(draining, Ordering::SeqCst);
        if previous != draining {
            tracing::info!("{}: drain mode {}", self.url(), if draining { "on" } else { "off" });
        }
    }

    pub fn teams(&self) -> Vec<String> {
        self.teams.read().clone()
    }

    pub fn set_teams(&self, teams: Vec<String>) {
        tracing::info!("{}: teams set to {:?}", self.url(), teams);
        *self.teams.write() = teams;
    }

    fn split_context(&self) -> SplitContext<'_> {
        SplitContext {
            locator: self.services.locator.as_ref(),
            failures: self.services.failures.as_ref(),
            default_files_per_job: self.config.default_files_per_job,
            default_events_per_job: self.config.default_events_per_job,
        }
    }

    // ============================================================
    // QUEUEING AND SPLITTING
    // ============================================================

    /// Validates and queues a request, splitting it right away unless configured not to.
    ///
    /// Specification errors are returned before anything is stored. Queueing the same
    /// request name twice is a no-op.
    pub async fn queue_work(
        &self,
        spec_url: &str,
        request_name: Option<&str>,
        team: Option<&str>,
    ) -> Result<QueuedWork> {
        let spec = self.services.specs.resolve(spec_url).await.map_err(|e| {
            WorkQueueError::specification(
                request_name.unwrap_or(spec_url),
                format!("cannot load {}: {:#}", spec_url, e),
            )
        })?;
        validate(
            &spec,
            request_name,
            self.services.resources.as_ref(),
            self.services.locator.as_ref(),
        )
        .await?;

        let _guard = self.op_lock.lock().await;

        if !self
            .backend
            .query_inbox(&ElementFilter::request(&spec.name))
            .is_empty()
        {
            tracing::info!("{}: request {} already queued", self.url(), spec.name);
            return Ok(QueuedWork::AlreadyQueued);
        }

        let mut inbox = Element::new(&spec.name, "", spec_url, ElementStatus::Negotiating);
        inbox.priority = spec.priority;
        inbox.team = team.map(str::to_string);

        if !self.config.split_on_queue {
            self.backend.insert_inbox(inbox);
            tracing::info!("{}: queued {} for later splitting", self.url(), spec.name);
            return Ok(QueuedWork::Negotiating);
        }

        match splitting::split(&spec, &inbox, SplitLevel::Request, &self.split_context()).await {
            Ok(elements) => {
                let count = elements.len();
                inbox.status = ElementStatus::Acquired;
                self.backend.insert_elements(elements);
                self.backend.insert_inbox(inbox);
                tracing::info!("{}: queued {} as {} elements", self.url(), spec.name, count);
                Ok(QueuedWork::Split(count))
            }
            Err(SplitError::Specification(reason)) => {
                Err(WorkQueueError::specification(&spec.name, reason))
            }
            Err(SplitError::NoWork) => {
                tracing::info!("{}: {} has no work yet", self.url(), spec.name);
                self.backend.insert_inbox(inbox);
                Ok(QueuedWork::NoWork)
            }
            Err(SplitError::Lookup(e)) => {
                tracing::error!("{}: splitting {} failed, will retry: {:#}", self.url(), spec.name, e);
                self.backend.insert_inbox(inbox);
                Ok(QueuedWork::Negotiating)
            }
        }
    }

    /// Splits every Negotiating inbox entry. Returns how many were split.
    ///
    /// Entries pulled from the parent are split at unit level, everything else at
    /// request level. Entries that keep failing are marked Failed once their retry
    /// window has passed.
    pub async fn process_inbound_work(&self) -> usize {
        let _guard = self.op_lock.lock().await;
        self.process_inbound_locked().await
    }

    async fn process_inbound_locked(&self) -> usize {
        let pending = self
            .backend
            .query_inbox(&ElementFilter::status(&[ElementStatus::Negotiating]));
        let mut processed = 0;

        for entry in pending {
            match self.split_entry(&entry).await {
                Ok(count) => {
                    processed += 1;
                    tracing::info!(
                        "{}: split {} ({}) into {} elements",
                        self.url(),
                        entry.id,
                        entry.request_name,
                        count
                    );
                }
                Err(e) => {
                    match &e {
                        SplitError::NoWork => {
                            tracing::info!("{}: no work for {} yet", self.url(), entry.id)
                        }
                        other => tracing::error!(
                            "{}: failed to split {} ({}): {:#}",
                            self.url(),
                            entry.id,
                            entry.request_name,
                            other
                        ),
                    }
                    if self.negotiation_expired(&entry) {
                        self.fail_negotiation(&entry);
                    }
                }
            }
        }
        processed
    }

    async fn split_entry(&self, entry: &InboxElement) -> std::result::Result<usize, SplitError> {
        // Elements from an earlier pass that did not get to update the inbox.
        let existing = self
            .backend
            .query_elements(&ElementFilter::default().with_parent(&entry.id));
        if !existing.is_empty() {
            self.backend.update_inbox(
                std::slice::from_ref(&entry.id),
                &ElementUpdate::status(ElementStatus::Acquired),
            );
            return Ok(existing.len());
        }

        let spec = self.services.specs.resolve(&entry.spec_url).await?;
        let level = if entry.child_queue_url.as_deref() == Some(self.url()) {
            SplitLevel::Unit
        } else {
            SplitLevel::Request
        };

        let elements = splitting::split(&spec, entry, level, &self.split_context()).await?;
        let count = elements.len();
        self.backend.insert_elements(elements);
        self.backend.update_inbox(
            std::slice::from_ref(&entry.id),
            &ElementUpdate::status(ElementStatus::Acquired),
        );
        Ok(count)
    }

    fn negotiation_expired(&self, entry: &InboxElement) -> bool {
        let waited = now_ms().saturating_sub(entry.insert_time);
        u128::from(waited) >= self.config.retry_window.as_millis()
    }

    fn fail_negotiation(&self, entry: &InboxElement) {
        tracing::error!(
            "{}: {} ({}) could not be split within {:?}, failing it",
            self.url(),
            entry.id,
            entry.request_name,
            self.config.retry_window
        );
        self.backend.update_inbox(
            std::slice::from_ref(&entry.id),
            &ElementUpdate::status(ElementStatus::Failed),
        );
    }

    // ============================================================
    // ACQUISITION
    // ============================================================

    /// Matches Available elements to `capacity` for local execution.
    ///
    /// With an execution tracker, each match is materialized and becomes Running;
    /// without one it becomes Acquired. Returns the updated elements.
    pub async fn get_work(&self, capacity: SiteCapacity) -> Vec<Element> {
        let _guard = self.op_lock.lock().await;
        let mut capacity = capacity;

        let candidates = self
            .backend
            .query_elements(&ElementFilter::status(&[ElementStatus::Available]));
        let assignments = matcher::acquire(
            candidates,
            &mut capacity,
            &MatchConstraints {
                teams: None,
                draining: self.is_draining(),
                requests: None,
            },
        );

        let mut acquired = Vec::new();
        for Assignment { element, site } in assignments {
            let update = match &self.services.tracker {
                Some(tracker) => match tracker.materialize(&element, &site).await {
                    Ok(subscription) => ElementUpdate::status(ElementStatus::Running)
                        .with_subscription(subscription),
                    Err(e) => {
                        tracing::error!(
                            "{}: could not materialize {} at {}: {:#}",
                            self.url(),
                            element.id,
                            site,
                            e
                        );
                        continue;
                    }
                },
                None => ElementUpdate::status(ElementStatus::Acquired),
            };
            self.backend
                .update_elements(std::slice::from_ref(&element.id), &update);
            if let Some(updated) = self.backend.get_element(&element.id) {
                tracing::debug!("{}: {} -> {} at {}", self.url(), element.id, updated.status, site);
                acquired.push(updated);
            }
        }

        if !acquired.is_empty() {
            tracing::info!("{}: acquired {} elements", self.url(), acquired.len());
        }
        acquired
    }

    /// Pulls work from the parent against `capacity` (free slots when `None`).
    ///
    /// Returns how many elements the parent assigned. Nothing is pulled while draining
    /// or while earlier pulls are still waiting to be split.
    pub async fn pull_work(&self, capacity: Option<SiteCapacity>) -> Result<usize> {
        let Some(parent) = self.parent.clone() else {
            tracing::debug!("{}: no parent to pull from", self.url());
            return Ok(0);
        };
        let _guard = self.op_lock.lock().await;

        if self.is_draining() {
            tracing::info!("{}: draining, not pulling work", self.url());
            return Ok(0);
        }

        self.pull_locked().await?;

        let waiting = self
            .backend
            .query_inbox(&ElementFilter::status(&[ElementStatus::Negotiating]))
            .len();
        if waiting > 0 {
            tracing::info!(
                "{}: {} pulled units not split yet, not pulling more",
                self.url(),
                waiting
            );
            return Ok(0);
        }

        let capacity = match capacity {
            Some(capacity) => capacity,
            None => self.services.resources.free_slots().await?,
        };
        let capacity: SiteCapacity = capacity.into_iter().filter(|(_, slots)| *slots > 0).collect();
        if capacity.is_empty() {
            return Ok(0);
        }

        let request = AcquireRequest {
            child_url: self.url().to_string(),
            capacity,
            teams: self.teams(),
            requests: None,
        };
        let acquired = parent
            .acquire(request)
            .await
            .map_err(|cause| WorkQueueError::Parent {
                url: parent.url().to_string(),
                cause,
            })?;

        if !acquired.is_empty() {
            tracing::info!("{}: pulled {} elements from {}", self.url(), acquired.len(), parent.url());
        }
        Ok(acquired.len())
    }

    // ============================================================
    // PARENT SIDE OF SYNCHRONIZATION
    // ============================================================

    /// Assigns Available elements to a child queue.
    pub async fn acquire_for_child(&self, request: AcquireRequest) -> Vec<ElementId> {
        let _guard = self.op_lock.lock().await;
        let mut capacity = request.capacity;

        let candidates = self
            .backend
            .query_elements(&ElementFilter::status(&[ElementStatus::Available]));
        let teams = (!request.teams.is_empty()).then_some(request.teams.as_slice());
        let assignments = matcher::acquire(
            candidates,
            &mut capacity,
            &MatchConstraints {
                teams,
                draining: self.is_draining(),
                requests: request.requests.as_deref(),
            },
        );

        let ids: Vec<ElementId> = assignments.into_iter().map(|a| a.element.id).collect();
        let acquired = self.backend.update_elements(
            &ids,
            &ElementUpdate::status(ElementStatus::Acquired)
                .with_child_queue(Some(request.child_url.clone())),
        );
        if !acquired.is_empty() {
            tracing::info!(
                "{}: assigned {} elements to {}",
                self.url(),
                acquired.len(),
                request.child_url
            );
        }
        acquired
    }

    /// Documents of everything assigned to `child_url`, plus which of the ids the child
    /// already knows were reassigned or deleted here.
    pub fn child_snapshot(&self, child_url: &str, known: &[ElementId]) -> ParentSnapshot {
        let assigned = self
            .backend
            .element_documents(&ElementFilter::default().with_child_queue(child_url))
            .into_iter()
            .map(without_conflicts)
            .collect();

        let mut orphaned = Vec::new();
        let mut missing = Vec::new();
        for id in known {
            match self.backend.get_element(id) {
                None => missing.push(id.clone()),
                Some(element) if element.child_queue_url.as_deref() != Some(child_url) => {
                    orphaned.push(id.clone())
                }
                Some(_) => {}
            }
        }

        ParentSnapshot {
            assigned,
            orphaned,
            missing,
        }
    }

    /// Applies a child's copies of elements it holds. Copies of elements that were
    /// reassigned or deleted in the meantime are ignored.
    pub async fn apply_child_updates(
        &self,
        child_url: &str,
        documents: Vec<Document<Element>>,
    ) -> Vec<Acknowledgement> {
        let _guard = self.op_lock.lock().await;
        let mut acknowledged = Vec::new();

        for doc in documents {
            let id = ElementId(doc.id.clone());
            let assigned = self
                .backend
                .get_element(&id)
                .is_some_and(|e| e.child_queue_url.as_deref() == Some(child_url));
            if !assigned {
                tracing::debug!("{}: ignoring update of {} from {}", self.url(), id, child_url);
                continue;
            }

            let outcome = self
                .backend
                .elements
                .apply_replicated(without_conflicts(doc), false);
            tracing::trace!("{}: {} from {}: {:?}", self.url(), id, child_url, outcome);

            if let Some(current) = self.backend.get_element(&id) {
                acknowledged.push(Acknowledgement {
                    id,
                    status: current.status,
                });
            }
        }
        acknowledged
    }

    // ============================================================
    // CHILD SIDE OF SYNCHRONIZATION
    // ============================================================

    /// Fetches the parent's copies of everything assigned to this queue.
    pub async fn pull_from_parent(&self) -> Result<usize> {
        let _guard = self.op_lock.lock().await;
        self.pull_locked().await
    }

    /// Sends this queue's inbox copies back to the parent.
    pub async fn send_to_parent(&self) -> Result<usize> {
        let _guard = self.op_lock.lock().await;
        self.push_locked().await
    }

    /// Pull then push, outside the regular cleanup cycle.
    pub async fn force_queue_sync(&self) -> Result<(usize, usize)> {
        let _guard = self.op_lock.lock().await;
        let pulled = self.pull_locked().await?;
        let pushed = self.push_locked().await?;
        Ok((pulled, pushed))
    }

    async fn pull_locked(&self) -> Result<usize> {
        let Some(parent) = &self.parent else {
            return Ok(0);
        };
        let url = self.url();

        let known: Vec<ElementId> = self
            .backend
            .query_inbox(&ElementFilter::default().with_child_queue(url))
            .into_iter()
            .map(|entry| entry.id)
            .collect();
        let snapshot = parent
            .snapshot(url, known)
            .await
            .map_err(|cause| WorkQueueError::Parent {
                url: parent.url().to_string(),
                cause,
            })?;

        let mut pulled = 0;
        for doc in snapshot.assigned {
            let id = ElementId(doc.id.clone());
            let parent_status = doc.value.status;

            if self.backend.inbox.contains_key(&id) {
                let outcome = self.backend.inbox.apply_replicated(doc, false);
                tracing::trace!("{}: pulled {}: {:?}", url, id, outcome);
            } else {
                self.backend.inbox.apply_replicated(doc, true);
                if parent_status == ElementStatus::Acquired {
                    // Waiting to be split here; the retry window starts now.
                    self.backend.inbox.update(&id, |entry| {
                        let now = now_ms();
                        entry.status = ElementStatus::Negotiating;
                        entry.insert_time = now;
                        entry.update_time = now;
                    });
                }
                pulled += 1;
                tracing::info!("{}: received {} from {}", url, id, parent.url());
            }
            self.parent_view.insert(id, parent_status);
        }

        for id in snapshot.orphaned {
            tracing::warn!("{}: {} was reassigned by {}, orphaning local work", url, id, parent.url());
            self.orphan(&id);
        }

        for id in snapshot.missing {
            match self.backend.get_inbox(&id) {
                Some(entry) if entry.status.is_terminal() => {
                    let children: Vec<ElementId> = self
                        .backend
                        .query_elements(&ElementFilter::default().with_parent(&id))
                        .into_iter()
                        .map(|e| e.id)
                        .collect();
                    self.backend.delete_elements(&children);
                    self.backend.delete_inbox(std::slice::from_ref(&id));
                    self.pushed.remove(&id);
                    self.parent_view.remove(&id);
                    self.orphans.remove(&id);
                    tracing::info!("{}: {} removed upstream, deleted", url, id);
                }
                Some(_) => {
                    tracing::warn!("{}: {} deleted by {} while still active", url, id, parent.url());
                    self.orphan(&id);
                }
                None => {}
            }
        }

        Ok(pulled)
    }

    /// Detaches an inbox entry from the parent: it is never pushed again.
    fn orphan(&self, id: &ElementId) {
        self.backend.update_inbox(
            std::slice::from_ref(id),
            &ElementUpdate::default().with_child_queue(None),
        );
        self.pushed.remove(id);
        self.parent_view.remove(id);
        self.orphans.insert(id.clone());
    }

    async fn push_locked(&self) -> Result<usize> {
        let Some(parent) = &self.parent else {
            return Ok(0);
        };
        let url = self.url();

        let documents: Vec<Document<Element>> = self
            .backend
            .inbox_documents(&ElementFilter::default().with_child_queue(url))
            .into_iter()
            .filter(|doc| doc.value.status != ElementStatus::Negotiating)
            .filter(|doc| {
                self.pushed
                    .get(&doc.value.id)
                    .is_none_or(|rev| *rev != doc.rev)
            })
            .map(without_conflicts)
            .collect();
        if documents.is_empty() {
            return Ok(0);
        }

        let sent: Vec<(ElementId, Revision)> = documents
            .iter()
            .map(|doc| (doc.value.id.clone(), doc.rev.clone()))
            .collect();
        let acknowledged = parent
            .push(url, documents)
            .await
            .map_err(|cause| WorkQueueError::Parent {
                url: parent.url().to_string(),
                cause,
            })?;

        for (id, rev) in &sent {
            self.pushed.insert(id.clone(), rev.clone());
        }
        for ack in acknowledged {
            self.parent_view.insert(ack.id, ack.status);
        }
        tracing::debug!("{}: pushed {} updates to {}", url, sent.len(), parent.url());
        Ok(sent.len())
    }

    /// Merges every conflicted element and inbox entry. Returns how many were merged.
    pub async fn fix_conflicts(&self) -> usize {
        let _guard = self.op_lock.lock().await;
        self.fix_conflicts_locked()
    }

    fn fix_conflicts_locked(&self) -> usize {
        let mut fixed = 0;
        for store in [&self.backend.elements, &self.backend.inbox] {
            for key in store.conflicted_keys() {
                if let Some(rev) = store.resolve(&key, merge_elements) {
                    tracing::info!("{}: merged conflicting copies of {} into {}", self.url(), key, rev);
                    fixed += 1;
                }
            }
        }
        fixed
    }

    // ============================================================
    // STATUS CHANGES
    // ============================================================

    /// Requests cancellation of non-terminal elements; by request name, the inbox
    /// entries are flagged too. Returns the affected element ids.
    pub async fn cancel_work(&self, selector: &WorkSelector) -> Result<Vec<ElementId>> {
        let _guard = self.op_lock.lock().await;

        let ids: Vec<ElementId> = self
            .select(selector)?
            .into_iter()
            .filter(|e| e.status.is_cancellable())
            .map(|e| e.id)
            .collect();
        let canceled = self
            .backend
            .update_elements(&ids, &ElementUpdate::status(ElementStatus::CancelRequested));

        if let WorkSelector::Request(name) = selector {
            let entries: Vec<ElementId> = self
                .backend
                .query_inbox(&ElementFilter::request(name))
                .into_iter()
                .filter(|entry| entry.status.is_cancellable())
                .map(|entry| entry.id)
                .collect();
            self.backend
                .update_inbox(&entries, &ElementUpdate::status(ElementStatus::CancelRequested));
        }

        tracing::info!("{}: cancellation requested for {} elements", self.url(), canceled.len());
        Ok(canceled)
    }

    /// Marks elements Done and hands them to accounting.
    pub async fn done_work(&self, selector: &WorkSelector) -> Result<Vec<ElementId>> {
        let _guard = self.op_lock.lock().await;

        let ids: Vec<ElementId> = self
            .select(selector)?
            .into_iter()
            .filter(|e| !e.status.is_terminal())
            .map(|e| e.id)
            .collect();
        let done = self
            .backend
            .update_elements(&ids, &ElementUpdate::status(ElementStatus::Done));

        if let Some(accounting) = &self.services.accounting
            && !done.is_empty()
        {
            let finished = self.backend.query_elements(&ElementFilter::ids(&done));
            if let Err(e) = accounting.work_done(&finished).await {
                tracing::warn!("{}: accounting rejected {} elements: {:#}", self.url(), finished.len(), e);
            }
        }
        Ok(done)
    }

    /// Takes elements back from the child queues holding them and makes them Available.
    pub async fn reset_work(&self, ids: &[ElementId]) -> Result<Vec<ElementId>> {
        let _guard = self.op_lock.lock().await;

        let mut resettable = Vec::new();
        for id in ids {
            let element = self
                .backend
                .get_element(id)
                .ok_or_else(|| WorkQueueError::UnknownElement(id.to_string()))?;
            if matches!(element.status, ElementStatus::Acquired | ElementStatus::Running)
                && element.child_queue_url.is_some()
            {
                resettable.push(element.id);
            }
        }

        let reset = self.backend.update_elements(
            &resettable,
            &ElementUpdate::status(ElementStatus::Available).with_child_queue(None),
        );
        if !reset.is_empty() {
            tracing::warn!("{}: reset {} elements to Available", self.url(), reset.len());
        }
        Ok(reset)
    }

    /// Records job progress reported by the execution system. Only the percentages
    /// change, and never downwards.
    pub async fn record_progress(
        &self,
        ids: &[ElementId],
        percent_complete: u32,
        percent_success: u32,
    ) -> Vec<ElementId> {
        let _guard = self.op_lock.lock().await;
        self.backend
            .update_elements(ids, &ElementUpdate::progress(percent_complete, percent_success))
    }

    /// Changes the priority of every element and inbox entry of a request.
    pub async fn set_priority(&self, request_name: &str, priority: i64) -> Result<usize> {
        let _guard = self.op_lock.lock().await;

        let filter = ElementFilter::request(request_name);
        let elements: Vec<ElementId> = self
            .backend
            .query_elements(&filter)
            .into_iter()
            .map(|e| e.id)
            .collect();
        let entries: Vec<ElementId> = self
            .backend
            .query_inbox(&filter)
            .into_iter()
            .map(|e| e.id)
            .collect();
        if elements.is_empty() && entries.is_empty() {
            return Err(WorkQueueError::UnknownRequest(request_name.to_string()));
        }

        let update = ElementUpdate::priority(priority);
        let changed = self.backend.update_elements(&elements, &update).len()
            + self.backend.update_inbox(&entries, &update).len();
        tracing::info!("{}: priority of {} set to {}", self.url(), request_name, priority);
        Ok(changed)
    }

    /// Removes every element and inbox entry of a request.
    pub async fn delete_workflows(&self, request_name: &str) -> usize {
        let _guard = self.op_lock.lock().await;

        let filter = ElementFilter::request(request_name);
        let elements: Vec<ElementId> = self
            .backend
            .query_elements(&filter)
            .into_iter()
            .map(|e| e.id)
            .collect();
        let entries: Vec<ElementId> = self
            .backend
            .query_inbox(&filter)
            .into_iter()
            .map(|e| e.id)
            .collect();
        for id in &entries {
            self.pushed.remove(id);
            self.parent_view.remove(id);
            self.orphans.remove(id);
        }

        let deleted =
            self.backend.delete_elements(&elements) + self.backend.delete_inbox(&entries);
        tracing::info!("{}: deleted {} records of {}", self.url(), deleted, request_name);
        deleted
    }

    /// Refreshes input and parent locations of Available elements from the locator.
    pub async fn update_location_info(&self) -> usize {
        let _guard = self.op_lock.lock().await;
        let locator = &self.services.locator;

        let candidates = self
            .backend
            .query_elements(&ElementFilter::status(&[ElementStatus::Available]));
        let mut updated = 0;

        for element in candidates.into_iter().filter(|e| !e.trust_site_lists) {
            let mut patch = ElementUpdate::default();

            let mut inputs = BTreeMap::new();
            for (name, sites) in &element.inputs {
                inputs.insert(name.clone(), refreshed(locator.locations(name).await, sites));
            }
            patch.inputs = Some(inputs);

            if element.parent_flag {
                let mut parents = BTreeMap::new();
                for (name, sites) in &element.parent_data {
                    parents.insert(name.clone(), refreshed(locator.locations(name).await, sites));
                }
                patch.parent_data = Some(parents);
            }

            if patch.changes(&element) {
                self.backend
                    .update_elements(std::slice::from_ref(&element.id), &patch);
                updated += 1;
            }
        }

        if updated > 0 {
            tracing::info!("{}: updated locations of {} elements", self.url(), updated);
        }
        updated
    }

    // ============================================================
    // QUERIES
    // ============================================================

    pub fn status(&self, filter: &ElementFilter) -> Vec<Element> {
        self.backend.query_elements(filter)
    }

    pub fn status_inbox(&self, filter: &ElementFilter) -> Vec<InboxElement> {
        self.backend.query_inbox(filter)
    }

    pub fn available_count(&self) -> usize {
        self.backend
            .query_elements(&ElementFilter::status(&[ElementStatus::Available]))
            .len()
    }

    /// Whether requests have been fully handed on: every inbox entry is past the
    /// Negotiating/Available/Acquired stages.
    pub fn injection_status(&self, request_name: Option<&str>) -> Result<InjectionStatus> {
        let mut requests: BTreeMap<String, Vec<ElementStatus>> = BTreeMap::new();
        for entry in self.backend.query_inbox(&ElementFilter::default()) {
            requests
                .entry(entry.request_name)
                .or_default()
                .push(entry.status);
        }
        let injected = |statuses: &[ElementStatus]| {
            !statuses.is_empty()
                && !statuses.iter().any(|s| {
                    matches!(
                        s,
                        ElementStatus::Negotiating
                            | ElementStatus::Available
                            | ElementStatus::Acquired
                    )
                })
        };

        match request_name {
            Some(name) => requests
                .get(name)
                .map(|statuses| InjectionStatus::Request(injected(statuses)))
                .ok_or_else(|| WorkQueueError::UnknownRequest(name.to_string())),
            None => Ok(InjectionStatus::All(
                requests
                    .iter()
                    .map(|(name, statuses)| (name.clone(), injected(statuses)))
                    .collect(),
            )),
        }
    }

    fn select(&self, selector: &WorkSelector) -> Result<Vec<Element>> {
        match selector {
            WorkSelector::Ids(ids) => {
                let found = self.backend.query_elements(&ElementFilter::ids(ids));
                if let Some(missing) = ids.iter().find(|id| !found.iter().any(|e| &e.id == *id)) {
                    return Err(WorkQueueError::UnknownElement(missing.to_string()));
                }
                Ok(found)
            }
            WorkSelector::Request(name) => {
                let filter = ElementFilter::request(name);
                let found = self.backend.query_elements(&filter);
                if found.is_empty() && self.backend.query_inbox(&filter).is_empty() {
                    return Err(WorkQueueError::UnknownRequest(name.clone()));
                }
                Ok(found)
            }
        }
    }

    // ============================================================
    // CLEANUP CYCLE
    // ============================================================

    /// One maintenance pass: sync with the parent, merge conflicts, carry cancellation
    /// and priority down, finish cancellations, time out stuck negotiations, roll element
    /// status up into the inbox, sync again and delete what the parent has seen finish.
    pub async fn perform_queue_cleanup_actions(&self, skip_sync: bool) -> CleanupReport {
        let _guard = self.op_lock.lock().await;
        let mut report = CleanupReport::default();
        let sync = !skip_sync && self.parent.is_some();

        if sync {
            match self.pull_locked().await {
                Ok(pulled) => report.pulled = pulled,
                Err(e) => tracing::warn!("{}: pull failed: {:#}", self.url(), e),
            }
        }

        report.conflicts_fixed = self.fix_conflicts_locked();
        self.propagate_inbox_changes();
        report.canceled = self.finish_cancellations().await;
        report.timed_out = self.fail_expired_negotiations();
        report.inbox_updated = self.apply_end_policy();

        if sync {
            match self.push_locked().await {
                Ok(pushed) => report.pushed = pushed,
                Err(e) => tracing::warn!("{}: push failed: {:#}", self.url(), e),
            }
        }

        report.deleted = self.delete_finished();
        tracing::debug!("{}: cleanup {:?}", self.url(), report);
        report
    }

    /// Carries cancellation and priority from each inbox entry to its elements.
    fn propagate_inbox_changes(&self) {
        for entry in self.backend.query_inbox(&ElementFilter::default()) {
            let elements = self
                .backend
                .query_elements(&ElementFilter::default().with_parent(&entry.id));

            if matches!(
                entry.status,
                ElementStatus::CancelRequested | ElementStatus::Canceled
            ) {
                let ids: Vec<ElementId> = elements
                    .iter()
                    .filter(|e| e.status.is_cancellable())
                    .map(|e| e.id.clone())
                    .collect();
                let changed = self
                    .backend
                    .update_elements(&ids, &ElementUpdate::status(ElementStatus::CancelRequested));
                if !changed.is_empty() {
                    tracing::info!(
                        "{}: {} canceled, canceling {} elements",
                        self.url(),
                        entry.id,
                        changed.len()
                    );
                }
            }

            let stale: Vec<ElementId> = elements
                .iter()
                .filter(|e| e.priority != entry.priority)
                .map(|e| e.id.clone())
                .collect();
            self.backend
                .update_elements(&stale, &ElementUpdate::priority(entry.priority));
        }
    }

    /// CancelRequested elements not delegated to a child are stopped here.
    async fn finish_cancellations(&self) -> usize {
        let pending = self
            .backend
            .query_elements(&ElementFilter::status(&[ElementStatus::CancelRequested]));
        let mut canceled = 0;

        for element in pending.into_iter().filter(|e| e.child_queue_url.is_none()) {
            if let Some(tracker) = &self.services.tracker
                && element.subscription_id.is_some()
                && let Err(e) = tracker.kill(&element).await
            {
                tracing::warn!("{}: could not kill jobs of {}: {:#}", self.url(), element.id, e);
                continue;
            }
            canceled += self
                .backend
                .update_elements(
                    std::slice::from_ref(&element.id),
                    &ElementUpdate::status(ElementStatus::Canceled),
                )
                .len();
        }
        canceled
    }

    fn fail_expired_negotiations(&self) -> usize {
        let expired: Vec<InboxElement> = self
            .backend
            .query_inbox(&ElementFilter::status(&[ElementStatus::Negotiating]))
            .into_iter()
            .filter(|entry| self.negotiation_expired(entry))
            .collect();
        for entry in &expired {
            self.fail_negotiation(entry);
        }
        expired.len()
    }

    /// Rolls element status and progress up into their inbox entries.
    fn apply_end_policy(&self) -> usize {
        let mut updated = 0;
        for entry in self.backend.query_inbox(&ElementFilter::default()) {
            if entry.status.is_terminal() || entry.status == ElementStatus::Negotiating {
                continue;
            }
            let elements = self
                .backend
                .query_elements(&ElementFilter::default().with_parent(&entry.id));
            let Some(status) = lifecycle::aggregate_status(entry.status, &elements) else {
                continue;
            };
            let (complete, success) = lifecycle::mean_progress(&elements);
            let update = ElementUpdate::progress(complete, success).with_status(status);

            if !self
                .backend
                .update_inbox(std::slice::from_ref(&entry.id), &update)
                .is_empty()
            {
                updated += 1;
                if status != entry.status {
                    tracing::info!(
                        "{}: {} ({}) {} -> {}",
                        self.url(),
                        entry.id,
                        entry.request_name,
                        entry.status,
                        status
                    );
                }
            }
        }
        updated
    }

    /// Deletes elements of finished inbox entries once the level above has seen the
    /// final status (immediately at the top of the tree). Finished orphans go entirely,
    /// since no parent will ever report them missing.
    fn delete_finished(&self) -> usize {
        let finished = self.backend.query_inbox(&ElementFilter::status(&[
            ElementStatus::Done,
            ElementStatus::Failed,
            ElementStatus::Canceled,
        ]));
        let mut deleted = 0;

        for entry in finished {
            let delegated = self.parent.is_some()
                && entry.child_queue_url.as_deref() == Some(self.url());
            let acknowledged = !delegated
                || self
                    .parent_view
                    .get(&entry.id)
                    .is_some_and(|status| *status == entry.status);
            if !acknowledged {
                continue;
            }

            let ids: Vec<ElementId> = self
                .backend
                .query_elements(&ElementFilter::default().with_parent(&entry.id))
                .into_iter()
                .map(|e| e.id)
                .collect();
            deleted += self.backend.delete_elements(&ids);

            if self.orphans.remove(&entry.id).is_some() {
                self.backend.delete_inbox(std::slice::from_ref(&entry.id));
                tracing::info!("{}: deleted finished orphan {}", self.url(), entry.id);
            }
        }

        if deleted > 0 {
            tracing::info!("{}: deleted {} finished elements", self.url(), deleted);
        }
        deleted
    }
}

fn without_conflicts(mut doc: Document<Element>) -> Document<Element> {
    doc.conflicts.clear();
    doc
}

fn refreshed(lookup: anyhow::Result<Vec<String>>, current: &[String]) -> Vec<String> {
    match lookup {
        Ok(mut sites) => {
            sites.sort();
            sites.dedup();
            sites
        }
        Err(e) => {
            tracing::debug!("Keeping known locations: {:#}", e);
            current.to_vec()
        }
    }
}
