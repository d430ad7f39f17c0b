//! Work Specification
//!
//! The request description the queue splits, plus the pieces around it: validation,
//! loading by URL, and a small LRU cache for loaded documents.
//!
//! ## Submodules
//! - **`types`**: `WorkSpecification`, `TaskSpec`, `InputSpec`.
//! - **`validate`**: rejects malformed requests before any state is written.
//! - **`resolver`**: `SpecResolver` trait with in-memory and file-backed implementations.
//! - **`cache`**: fixed-capacity `LruCache`.

pub mod cache;
pub mod resolver;
pub mod types;
pub mod validate;
