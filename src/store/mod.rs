//! Element Store
//!
//! Typed records (elements and inbox entries) kept in versioned document collections.
//!
//! ## Core Concepts
//! - **Documents**: every record carries a revision plus its ancestry, which is what lets a
//!   parent and a child queue exchange copies of the same element without coordination.
//! - **Field-level updates**: mutations are patches ([`backend::ElementUpdate`]), never
//!   whole-document replacement.
//! - **Conflicts**: divergent replicas are kept side by side until the queue merges them
//!   (see `sync::conflict`).

pub mod backend;
pub mod memory;
pub mod types;

#[cfg(test)]
mod tests;
