//! Execution tracking and accounting hooks.

use crate::store::types::{Element, ElementId};

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// The system that turns acquired elements into runnable jobs.
#[async_trait]
pub trait ExecutionTracker: Send + Sync {
    /// Creates the subscription for an element at `site` and returns its id.
    async fn materialize(&self, element: &Element, site: &str) -> Result<u64>;

    /// Stops any jobs belonging to an element that is being cancelled.
    async fn kill(&self, element: &Element) -> Result<()>;
}

/// Downstream consumer of finished work.
#[async_trait]
pub trait Accounting: Send + Sync {
    async fn work_done(&self, elements: &[Element]) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub element: ElementId,
    pub site: String,
    pub jobs: u64,
}

#[derive(Default)]
pub struct InMemoryTracker {
    next_id: AtomicU64,
    subscriptions: DashMap<u64, Subscription>,
    killed: Mutex<Vec<ElementId>>,
}

impl InMemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscriptions(&self) -> Vec<(u64, Subscription)> {
        let mut all: Vec<_> = self
            .subscriptions
            .iter()
            .map(|entry| (*entry.key(), entry.value().clone()))
            .collect();
        all.sort_by_key(|(id, _)| *id);
        all
    }

    pub fn killed(&self) -> Vec<ElementId> {
        self.killed.lock().clone()
    }
}

#[async_trait]
impl ExecutionTracker for InMemoryTracker {
    async fn materialize(&self, element: &Element, site: &str) -> Result<u64> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.subscriptions.insert(
            id,
            Subscription {
                element: element.id.clone(),
                site: site.to_string(),
                jobs: element.jobs,
            },
        );
        tracing::debug!("Subscription {} created for {} at {}", id, element.id, site);
        Ok(id)
    }

    async fn kill(&self, element: &Element) -> Result<()> {
        if let Some(id) = element.subscription_id {
            self.subscriptions.remove(&id);
        }
        self.killed.lock().push(element.id.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryAccounting {
    done: Mutex<Vec<ElementId>>,
}

impl InMemoryAccounting {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn done(&self) -> Vec<ElementId> {
        self.done.lock().clone()
    }
}

#[async_trait]
impl Accounting for InMemoryAccounting {
    async fn work_done(&self, elements: &[Element]) -> Result<()> {
        self.done
            .lock()
            .extend(elements.iter().map(|element| element.id.clone()));
        Ok(())
    }
}
