//! Work Queue
//!
//! The queue engine, the roll-up rules that derive an inbox entry's status from its
//! elements, and the background driver that runs a queue unattended.
//!
//! ## Element lifecycle
//! ```text
//! Available -> Acquired -> Running -> Done | Failed
//!     |            |           |
//!     +------------+-----------+--> CancelRequested -> Canceled
//! ```
//! Inbox entries additionally start out Negotiating until they are split.

pub mod driver;
pub mod engine;
pub mod lifecycle;
