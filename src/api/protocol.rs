//! HTTP API Definitions
//!
//! Request/response bodies of the operator-facing API and the paths it is served on.
//! Parent/child endpoints live in [`crate::sync::protocol`].

use crate::queue::engine::QueuedWork;
use crate::services::SiteCapacity;
use crate::store::types::ElementId;

use serde::{Deserialize, Serialize};

pub const ENDPOINT_QUEUE_WORK: &str = "/workqueue/queue";
pub const ENDPOINT_PROCESS_INBOUND: &str = "/workqueue/process";
pub const ENDPOINT_ELEMENTS: &str = "/workqueue/elements";
pub const ENDPOINT_ELEMENT: &str = "/workqueue/elements/:id";
pub const ENDPOINT_INBOX: &str = "/workqueue/inbox";
pub const ENDPOINT_AVAILABLE: &str = "/workqueue/available";
pub const ENDPOINT_GET_WORK: &str = "/workqueue/get_work";
pub const ENDPOINT_PULL_WORK: &str = "/workqueue/pull_work";
pub const ENDPOINT_PRIORITY: &str = "/workqueue/priority";
pub const ENDPOINT_CANCEL: &str = "/workqueue/cancel";
pub const ENDPOINT_DONE: &str = "/workqueue/done";
pub const ENDPOINT_RESET: &str = "/workqueue/reset";
pub const ENDPOINT_PROGRESS: &str = "/workqueue/progress";
pub const ENDPOINT_REQUEST: &str = "/workqueue/requests/:name";
pub const ENDPOINT_INJECTION: &str = "/workqueue/injection";
pub const ENDPOINT_LOCATIONS: &str = "/workqueue/locations";
pub const ENDPOINT_DRAIN: &str = "/workqueue/drain";
pub const ENDPOINT_TEAMS: &str = "/workqueue/teams";
pub const ENDPOINT_CLEANUP: &str = "/workqueue/cleanup";
pub const ENDPOINT_SYNC: &str = "/workqueue/sync";
pub const ENDPOINT_FIX_CONFLICTS: &str = "/workqueue/fix_conflicts";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueWorkRequest {
    pub spec_url: String,
    #[serde(default)]
    pub request_name: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueWorkResponse {
    pub outcome: QueuedWork,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapacityRequest {
    pub capacity: SiteCapacity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullWorkRequest {
    /// Free slots per site; the resource source is asked when absent.
    #[serde(default)]
    pub capacity: Option<SiteCapacity>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetPriorityRequest {
    pub request_name: String,
    pub priority: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdsRequest {
    pub ids: Vec<ElementId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressRequest {
    pub ids: Vec<ElementId>,
    pub percent_complete: u32,
    #[serde(default)]
    pub percent_success: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdsResponse {
    pub ids: Vec<ElementId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountResponse {
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InjectionQuery {
    #[serde(default)]
    pub request: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrainRequest {
    pub draining: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamsRequest {
    pub teams: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupRequest {
    #[serde(default)]
    pub skip_sync: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncResponse {
    pub pulled: usize,
    pub pushed: usize,
}
