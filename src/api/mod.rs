//! HTTP API
//!
//! Operator-facing routes under `/workqueue/...` and the internal routes child queues
//! call on their parent. Every route works on the one `WorkQueue` of the node, shared
//! through an `Extension`.

pub mod handlers;
pub mod protocol;

use crate::queue::engine::WorkQueue;
use crate::sync::protocol::{ENDPOINT_ACQUIRE, ENDPOINT_PUSH, ENDPOINT_SNAPSHOT};
use handlers::*;
use protocol::*;

use axum::routing::{delete, get, post};
use axum::{Extension, Router};
use std::sync::Arc;

pub fn router(queue: Arc<WorkQueue>) -> Router {
    Router::new()
        .route(ENDPOINT_QUEUE_WORK, post(handle_queue_work))
        .route(ENDPOINT_PROCESS_INBOUND, post(handle_process_inbound))
        .route(ENDPOINT_ELEMENTS, post(handle_status))
        .route(ENDPOINT_ELEMENT, get(handle_get_element))
        .route(ENDPOINT_INBOX, post(handle_status_inbox))
        .route(ENDPOINT_AVAILABLE, get(handle_available))
        .route(ENDPOINT_GET_WORK, post(handle_get_work))
        .route(ENDPOINT_PULL_WORK, post(handle_pull_work))
        .route(ENDPOINT_PRIORITY, post(handle_set_priority))
        .route(ENDPOINT_CANCEL, post(handle_cancel))
        .route(ENDPOINT_DONE, post(handle_done))
        .route(ENDPOINT_RESET, post(handle_reset))
        .route(ENDPOINT_PROGRESS, post(handle_progress))
        .route(ENDPOINT_REQUEST, delete(handle_delete_request))
        .route(ENDPOINT_INJECTION, get(handle_injection_status))
        .route(ENDPOINT_LOCATIONS, post(handle_update_locations))
        .route(ENDPOINT_DRAIN, post(handle_drain))
        .route(ENDPOINT_TEAMS, post(handle_teams))
        .route(ENDPOINT_CLEANUP, post(handle_cleanup))
        .route(ENDPOINT_SYNC, post(handle_sync))
        .route(ENDPOINT_FIX_CONFLICTS, post(handle_fix_conflicts))
        .route(ENDPOINT_ACQUIRE, post(handle_internal_acquire))
        .route(ENDPOINT_SNAPSHOT, post(handle_internal_snapshot))
        .route(ENDPOINT_PUSH, post(handle_internal_push))
        .layer(Extension(queue))
}
