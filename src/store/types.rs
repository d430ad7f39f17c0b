use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Unique identifier for an element within a queue's store.
///
/// Wrapper around a UUID string. The same id is kept when a parent element is
/// replicated into a child's inbox, which is what links the two copies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct ElementId(pub String);

impl ElementId {
    /// Generates a new random UUID v4-based ElementId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ElementId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<&str> for ElementId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle state of an element (and of an inbox entry).
///
/// The names are part of the persisted layout: parent and child queues compare
/// them when reconciling replicas, so they must never be renamed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ElementStatus {
    /// Queued request (or pulled unit) that has not been split yet.
    Negotiating,
    /// Split and schedulable; the matcher only ever looks at this state.
    Available,
    /// Claimed by the matcher, either locally or on behalf of a child queue.
    Acquired,
    /// Materialized in the execution-tracking system.
    Running,
    Done,
    Failed,
    Canceled,
    /// Cancellation asked for but not yet acknowledged by whoever holds the work.
    CancelRequested,
}

impl ElementStatus {
    pub const ALL: [ElementStatus; 8] = [
        ElementStatus::Negotiating,
        ElementStatus::Available,
        ElementStatus::Acquired,
        ElementStatus::Running,
        ElementStatus::Done,
        ElementStatus::Failed,
        ElementStatus::Canceled,
        ElementStatus::CancelRequested,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ElementStatus::Done | ElementStatus::Failed | ElementStatus::Canceled
        )
    }

    /// Whether a cancellation can still be requested for this state.
    pub fn is_cancellable(self) -> bool {
        !self.is_terminal() && self != ElementStatus::CancelRequested
    }

    /// Rank used when two replicas disagree: the higher rank wins.
    ///
    /// Cancellation outranks everything, then the more terminal state wins.
    pub fn precedence(self) -> u8 {
        match self {
            ElementStatus::Negotiating => 0,
            ElementStatus::Available => 1,
            ElementStatus::Acquired => 2,
            ElementStatus::Running => 3,
            ElementStatus::Done => 4,
            ElementStatus::Failed => 5,
            ElementStatus::CancelRequested => 6,
            ElementStatus::Canceled => 7,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ElementStatus::Negotiating => "Negotiating",
            ElementStatus::Available => "Available",
            ElementStatus::Acquired => "Acquired",
            ElementStatus::Running => "Running",
            ElementStatus::Done => "Done",
            ElementStatus::Failed => "Failed",
            ElementStatus::Canceled => "Canceled",
            ElementStatus::CancelRequested => "CancelRequested",
        }
    }
}

impl fmt::Display for ElementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ElementStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ElementStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown element status: {}", s))
    }
}

/// Event range covered by a whole-request (production) element.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct EventMask {
    pub first_event: u64,
    pub last_event: u64,
}

/// The unit the engine schedules.
///
/// Inbox entries use the same layout (see [`InboxElement`]): a child queue's inbox
/// entry is a replica of the parent's element document, field for field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct Element {
    pub id: ElementId,
    pub request_name: String,
    pub task_name: String,
    /// Location of the work specification this element was derived from.
    pub spec_url: String,
    pub status: ElementStatus,
    pub priority: i64,
    /// Timestamp (ms) of the last explicit priority change.
    #[serde(default)]
    pub priority_updated: u64,
    /// Element (or request) at the level above that this one was expanded from.
    pub parent_queue_id: Option<ElementId>,
    /// Queue that claimed this element, set by the parent on acquisition.
    pub child_queue_url: Option<String>,
    #[serde(rename = "TeamName")]
    pub team: Option<String>,
    #[serde(default)]
    pub site_whitelist: Vec<String>,
    #[serde(default)]
    pub site_blacklist: Vec<String>,
    /// Input name (dataset, block, failure-record chunk) -> sites holding it.
    #[serde(default)]
    pub inputs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub parent_flag: bool,
    /// Parent block -> sites holding it. Only consulted when `parent_flag` is set.
    #[serde(default)]
    pub parent_data: BTreeMap<String, Vec<String>>,
    /// Skip data-location checks and trust the site lists alone.
    #[serde(rename = "NoLocationUpdate", default)]
    pub trust_site_lists: bool,
    #[serde(default)]
    pub jobs: u64,
    #[serde(default)]
    pub num_of_files_added: u64,
    #[serde(default)]
    pub mask: Option<EventMask>,
    #[serde(default)]
    pub percent_complete: u32,
    #[serde(default)]
    pub percent_success: u32,
    #[serde(default)]
    pub subscription_id: Option<u64>,
    /// Timestamp (ms) when the element (or inbox entry) was created.
    pub insert_time: u64,
    /// Timestamp (ms) of the last local write.
    pub update_time: u64,
}

/// Request-facing mirror held at each queue boundary.
pub type InboxElement = Element;

impl Element {
    /// Creates an element with empty inputs and zero-valued metrics.
    pub fn new(request_name: &str, task_name: &str, spec_url: &str, status: ElementStatus) -> Self {
        let now = now_ms();
        Self {
            id: ElementId::new(),
            request_name: request_name.to_string(),
            task_name: task_name.to_string(),
            spec_url: spec_url.to_string(),
            status,
            priority: 0,
            priority_updated: 0,
            parent_queue_id: None,
            child_queue_url: None,
            team: None,
            site_whitelist: Vec::new(),
            site_blacklist: Vec::new(),
            inputs: BTreeMap::new(),
            parent_flag: false,
            parent_data: BTreeMap::new(),
            trust_site_lists: false,
            jobs: 0,
            num_of_files_added: 0,
            mask: None,
            percent_complete: 0,
            percent_success: 0,
            subscription_id: None,
            insert_time: now,
            update_time: now,
        }
    }

    /// Sites holding every input of this element, or `None` when it has no inputs
    /// (production work can run anywhere its site lists allow).
    pub fn input_locations(&self) -> Option<BTreeSet<String>> {
        intersect_locations(&self.inputs)
    }

    /// Sites holding every parent block, or `None` when parentage is not needed.
    pub fn parent_locations(&self) -> Option<BTreeSet<String>> {
        if !self.parent_flag {
            return None;
        }
        intersect_locations(&self.parent_data)
    }
}

fn intersect_locations(map: &BTreeMap<String, Vec<String>>) -> Option<BTreeSet<String>> {
    let mut sites: Option<BTreeSet<String>> = None;
    for locations in map.values() {
        let current: BTreeSet<String> = locations.iter().cloned().collect();
        sites = Some(match sites {
            None => current,
            Some(previous) => previous.intersection(&current).cloned().collect(),
        });
    }
    sites
}

/// Revision of a replicated document.
///
/// Ordered by generation first, then by tag, which gives every replica the same
/// winner when two revisions diverge.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Revision {
    pub generation: u64,
    pub tag: String,
}

impl Revision {
    pub fn first() -> Self {
        Self {
            generation: 1,
            tag: uuid::Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn next(&self) -> Self {
        Self {
            generation: self.generation + 1,
            tag: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short: String = self.tag.chars().take(8).collect();
        write!(f, "{}-{}", self.generation, short)
    }
}

/// A losing branch kept next to the current revision until conflicts are fixed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch<V> {
    pub rev: Revision,
    pub ancestors: Vec<Revision>,
    pub value: V,
}

/// Versioned record as held by a [`DocumentStore`](super::memory::DocumentStore).
///
/// This structure is what gets replicated between parent and child queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document<V> {
    pub id: String,
    pub rev: Revision,
    /// Every revision this one descends from (bounded, oldest dropped first).
    pub ancestors: Vec<Revision>,
    pub value: V,
    /// Divergent revisions seen during replication that lost the winner election.
    #[serde(default = "Vec::new")]
    pub conflicts: Vec<Branch<V>>,
}

impl<V> Document<V> {
    pub fn descends_from(&self, rev: &Revision) -> bool {
        self.ancestors.contains(rev)
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
