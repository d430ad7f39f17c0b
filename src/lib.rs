//! Hierarchical Work Queue Library
//!
//! A tree of work queues. A global queue at the top accepts requests, splits them into
//! elements sized for execution and hands them to local queues that ask for work on
//! behalf of their sites. Local queues replicate the elements they acquired back to
//! the parent, so each side can change the same element and converge afterwards.
//!
//! ## Architecture Modules
//! - **`spec`**: work specifications, their validation and resolution from URLs.
//! - **`splitting`**: policies that turn one specification into work units
//!   (block, dataset, resubmission, production).
//! - **`store`**: the revisioned document store and the typed inbox/element backend.
//! - **`matcher`**: fits Available elements into free site capacity.
//! - **`queue`**: the queue engine, status roll-up and the background driver.
//! - **`sync`**: the parent/child protocol, its HTTP client and conflict merging.
//! - **`services`**: traits for the outside world plus in-memory implementations.
//! - **`api`**: the axum router exposing a queue over HTTP.

pub mod api;
pub mod config;
pub mod error;
pub mod matcher;
pub mod queue;
pub mod services;
pub mod spec;
pub mod splitting;
pub mod store;
pub mod sync;

#[cfg(test)]
mod test_support;
