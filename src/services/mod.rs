//! Outbound Collaborators
//!
//! The engine never talks to catalogs, resource managers or the execution system directly.
//! Each of them sits behind an async trait, and every trait ships with an in-memory
//! implementation that the node binary and the tests use.
//!
//! ## Submodules
//! - **`locator`**: dataset/block metadata, block locations and parentage.
//! - **`resources`**: known sites and free job slots per site.
//! - **`tracker`**: materialization of acquired elements into runnable jobs, plus
//!   the accounting hook that consumes finished work.
//! - **`failures`**: failed-file records used by resubmission splitting.

pub mod failures;
pub mod locator;
pub mod resources;
pub mod tracker;

use crate::spec::resolver::SpecResolver;

use std::sync::Arc;

pub use failures::{FailedFile, FailureRecords, InMemoryFailureRecords};
pub use locator::{BlockInfo, CatalogLocator, DataLocator};
pub use resources::{ResourceSource, SiteCapacity, StaticResources};
pub use tracker::{Accounting, ExecutionTracker, InMemoryAccounting, InMemoryTracker};

/// Everything a queue needs from the outside world.
#[derive(Clone)]
pub struct Services {
    pub specs: Arc<dyn SpecResolver>,
    pub locator: Arc<dyn DataLocator>,
    pub resources: Arc<dyn ResourceSource>,
    pub failures: Arc<dyn FailureRecords>,
    /// Absent on queues that only forward work (e.g. the top of the tree).
    pub tracker: Option<Arc<dyn ExecutionTracker>>,
    pub accounting: Option<Arc<dyn Accounting>>,
}

impl Services {
    pub fn new(
        specs: Arc<dyn SpecResolver>,
        locator: Arc<dyn DataLocator>,
        resources: Arc<dyn ResourceSource>,
    ) -> Self {
        Self {
            specs,
            locator,
            resources,
            failures: Arc::new(InMemoryFailureRecords::new()),
            tracker: None,
            accounting: None,
        }
    }

    pub fn with_failures(mut self, failures: Arc<dyn FailureRecords>) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<dyn ExecutionTracker>) -> Self {
        self.tracker = Some(tracker);
        self
    }

    pub fn with_accounting(mut self, accounting: Arc<dyn Accounting>) -> Self {
        self.accounting = Some(accounting);
        self
    }
}
