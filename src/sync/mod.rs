//! Parent/Child Synchronization
//!
//! A child queue and its parent each hold a copy of every element the child acquired:
//! the parent in its element store, the child in its inbox. The copies are reconciled by
//! exchanging revisioned documents; neither side ever locks the other.
//!
//! ## Cycle
//! 1. **Pull**: the child fetches the parent's documents for everything assigned to it.
//!    New ones enter the inbox as Negotiating; known ones are applied as replicas.
//! 2. **Fix conflicts**: divergent branches are merged with [`conflict::merge_elements`].
//! 3. **Push**: the child sends its inbox copies back; the parent applies them only while
//!    the element is still assigned to that child.
//!
//! ## Submodules
//! - **`protocol`**: DTOs and internal endpoints.
//! - **`parent`**: the `ParentQueue` trait and the in-process implementation.
//! - **`http`**: `ParentQueue` over HTTP.
//! - **`conflict`**: deterministic merge of divergent replicas.

pub mod conflict;
pub mod http;
pub mod parent;
pub mod protocol;

#[cfg(test)]
mod tests;
