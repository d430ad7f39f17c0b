//! Parent/Child Protocol
//!
//! DTOs exchanged between a child queue and its parent, and the endpoints the parent
//! serves them on. Documents travel with their revision history so that either side can
//! tell a fast-forward from a conflict.

use crate::services::SiteCapacity;
use crate::store::types::{Document, Element, ElementId, ElementStatus};

use serde::{Deserialize, Serialize};

pub const ENDPOINT_ACQUIRE: &str = "/internal/workqueue/acquire";
pub const ENDPOINT_SNAPSHOT: &str = "/internal/workqueue/snapshot";
pub const ENDPOINT_PUSH: &str = "/internal/workqueue/push";

/// A child asking its parent to assign Available elements against the child's capacity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireRequest {
    pub child_url: String,
    pub capacity: SiteCapacity,
    #[serde(default)]
    pub teams: Vec<String>,
    #[serde(default)]
    pub requests: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcquireResponse {
    pub acquired: Vec<ElementId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotRequest {
    pub child_url: String,
    /// Ids the child already holds, so the parent can report the ones it took back.
    #[serde(default)]
    pub known: Vec<ElementId>,
}

/// The parent's view of everything assigned to one child.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParentSnapshot {
    /// Current documents of every element assigned to the child.
    pub assigned: Vec<Document<Element>>,
    /// Known to the child but now assigned elsewhere (reset).
    pub orphaned: Vec<ElementId>,
    /// Known to the child but deleted at the parent.
    pub missing: Vec<ElementId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushRequest {
    pub child_url: String,
    pub documents: Vec<Document<Element>>,
}

/// Status the parent holds for a pushed element after applying it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Acknowledgement {
    pub id: ElementId,
    pub status: ElementStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PushResponse {
    pub acknowledged: Vec<Acknowledgement>,
}
