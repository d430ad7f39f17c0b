//! Background Driver
//!
//! Runs a queue's periodic work so a node only has to start it and serve HTTP.
//!
//! ## Loops
//! - **Work loop** (every `poll_interval`): split inbound work, pull from the parent,
//!   and hand Available elements to the execution tracker when the queue has one.
//! - **Cleanup loop** (every `cleanup_interval`): one
//!   [`perform_queue_cleanup_actions`](WorkQueue::perform_queue_cleanup_actions) pass.

use super::engine::WorkQueue;

use std::sync::Arc;

pub struct QueueDriver {
    queue: Arc<WorkQueue>,
}

impl QueueDriver {
    pub fn new(queue: Arc<WorkQueue>) -> Arc<Self> {
        Arc::new(Self { queue })
    }

    /// Spawns both loops and returns immediately.
    pub async fn start(self: Arc<Self>) {
        let config = self.queue.config();
        tracing::info!(
            "Starting queue driver for {} (poll {:?}, cleanup {:?})",
            self.queue.url(),
            config.poll_interval,
            config.cleanup_interval
        );

        let driver = self.clone();
        tokio::spawn(async move {
            driver.work_loop().await;
        });

        let driver = self.clone();
        tokio::spawn(async move {
            driver.cleanup_loop().await;
        });
    }

    async fn work_loop(&self) {
        let mut interval = tokio::time::interval(self.queue.config().poll_interval);
        loop {
            interval.tick().await;
            self.work_pass().await;
        }
    }

    /// One split / pull / run round.
    pub async fn work_pass(&self) {
        let split = self.queue.process_inbound_work().await;
        if split > 0 {
            tracing::debug!("{}: split {} inbox entries", self.queue.url(), split);
        }

        if self.queue.has_parent()
            && let Err(e) = self.queue.pull_work(None).await
        {
            tracing::warn!("{}: pulling work failed: {}", self.queue.url(), e);
        }

        if self.queue.services().tracker.is_none() {
            return;
        }
        match self.queue.services().resources.free_slots().await {
            Ok(capacity) => {
                let started = self.queue.get_work(capacity).await;
                tracing::trace!("{}: started {} elements", self.queue.url(), started.len());
            }
            Err(e) => tracing::warn!("{}: cannot read free slots: {:#}", self.queue.url(), e),
        }
    }

    async fn cleanup_loop(&self) {
        let mut interval = tokio::time::interval(self.queue.config().cleanup_interval);
        loop {
            interval.tick().await;
            let report = self.queue.perform_queue_cleanup_actions(false).await;
            if report.deleted > 0 || report.timed_out > 0 || report.canceled > 0 {
                tracing::info!("{}: cleanup {:?}", self.queue.url(), report);
            }
        }
    }
}
