//! The link from a child queue to its parent.

use super::protocol::{Acknowledgement, AcquireRequest, ParentSnapshot};
use crate::queue::engine::WorkQueue;
use crate::store::types::{Document, Element, ElementId};

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Operations a child needs from the queue one level up.
#[async_trait]
pub trait ParentQueue: Send + Sync {
    fn url(&self) -> &str;

    /// Asks the parent to assign work against `request.capacity`.
    async fn acquire(&self, request: AcquireRequest) -> Result<Vec<ElementId>>;

    /// Current documents of everything assigned to `child_url`.
    async fn snapshot(&self, child_url: &str, known: Vec<ElementId>) -> Result<ParentSnapshot>;

    /// Sends the child's copies back up.
    async fn push(
        &self,
        child_url: &str,
        documents: Vec<Document<Element>>,
    ) -> Result<Vec<Acknowledgement>>;
}

/// Parent living in the same process.
pub struct LocalParent {
    queue: Arc<WorkQueue>,
}

impl LocalParent {
    pub fn new(queue: Arc<WorkQueue>) -> Arc<Self> {
        Arc::new(Self { queue })
    }
}

#[async_trait]
impl ParentQueue for LocalParent {
    fn url(&self) -> &str {
        self.queue.url()
    }

    async fn acquire(&self, request: AcquireRequest) -> Result<Vec<ElementId>> {
        Ok(self.queue.acquire_for_child(request).await)
    }

    async fn snapshot(&self, child_url: &str, known: Vec<ElementId>) -> Result<ParentSnapshot> {
        Ok(self.queue.child_snapshot(child_url, &known))
    }

    async fn push(
        &self,
        child_url: &str,
        documents: Vec<Document<Element>>,
    ) -> Result<Vec<Acknowledgement>> {
        Ok(self.queue.apply_child_updates(child_url, documents).await)
    }
}
