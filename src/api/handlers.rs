use super::protocol::*;
use crate::error::WorkQueueError;
use crate::queue::engine::{CleanupReport, InjectionStatus, QueuedWork, WorkQueue, WorkSelector};
use crate::store::backend::ElementFilter;
use crate::store::types::{Element, ElementId};
use crate::sync::protocol::*;

use axum::extract::{Path, Query};
use axum::{Extension, Json, http::StatusCode};
use std::sync::Arc;

type ApiResult<T> = Result<(StatusCode, Json<T>), WorkQueueError>;

pub async fn handle_queue_work(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Json(req): Json<QueueWorkRequest>,
) -> ApiResult<QueueWorkResponse> {
    let outcome = queue
        .queue_work(&req.spec_url, req.request_name.as_deref(), req.team.as_deref())
        .await?;
    let status = match outcome {
        QueuedWork::AlreadyQueued => StatusCode::OK,
        _ => StatusCode::CREATED,
    };
    Ok((status, Json(QueueWorkResponse { outcome })))
}

pub async fn handle_process_inbound(
    Extension(queue): Extension<Arc<WorkQueue>>,
) -> (StatusCode, Json<CountResponse>) {
    let count = queue.process_inbound_work().await;
    (StatusCode::OK, Json(CountResponse { count }))
}

pub async fn handle_status(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Json(filter): Json<ElementFilter>,
) -> (StatusCode, Json<Vec<Element>>) {
    (StatusCode::OK, Json(queue.status(&filter)))
}

pub async fn handle_get_element(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Path(id): Path<String>,
) -> ApiResult<Element> {
    let id = ElementId(id);
    match queue.backend().get_element(&id) {
        Some(element) => Ok((StatusCode::OK, Json(element))),
        None => Err(WorkQueueError::UnknownElement(id.to_string())),
    }
}

pub async fn handle_status_inbox(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Json(filter): Json<ElementFilter>,
) -> (StatusCode, Json<Vec<Element>>) {
    (StatusCode::OK, Json(queue.status_inbox(&filter)))
}

pub async fn handle_available(
    Extension(queue): Extension<Arc<WorkQueue>>,
) -> (StatusCode, Json<CountResponse>) {
    let count = queue.available_count();
    (StatusCode::OK, Json(CountResponse { count }))
}

pub async fn handle_get_work(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Json(req): Json<CapacityRequest>,
) -> (StatusCode, Json<Vec<Element>>) {
    (StatusCode::OK, Json(queue.get_work(req.capacity).await))
}

pub async fn handle_pull_work(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Json(req): Json<PullWorkRequest>,
) -> ApiResult<CountResponse> {
    let count = queue.pull_work(req.capacity).await?;
    Ok((StatusCode::OK, Json(CountResponse { count })))
}

pub async fn handle_set_priority(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Json(req): Json<SetPriorityRequest>,
) -> ApiResult<CountResponse> {
    let count = queue.set_priority(&req.request_name, req.priority).await?;
    Ok((StatusCode::OK, Json(CountResponse { count })))
}

pub async fn handle_cancel(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Json(selector): Json<WorkSelector>,
) -> ApiResult<IdsResponse> {
    let ids = queue.cancel_work(&selector).await?;
    Ok((StatusCode::OK, Json(IdsResponse { ids })))
}

pub async fn handle_done(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Json(selector): Json<WorkSelector>,
) -> ApiResult<IdsResponse> {
    let ids = queue.done_work(&selector).await?;
    Ok((StatusCode::OK, Json(IdsResponse { ids })))
}

pub async fn handle_reset(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Json(req): Json<IdsRequest>,
) -> ApiResult<IdsResponse> {
    let ids = queue.reset_work(&req.ids).await?;
    Ok((StatusCode::OK, Json(IdsResponse { ids })))
}

pub async fn handle_progress(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Json(req): Json<ProgressRequest>,
) -> (StatusCode, Json<IdsResponse>) {
    let ids = queue
        .record_progress(&req.ids, req.percent_complete, req.percent_success)
        .await;
    (StatusCode::OK, Json(IdsResponse { ids }))
}

pub async fn handle_delete_request(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Path(name): Path<String>,
) -> (StatusCode, Json<CountResponse>) {
    let count = queue.delete_workflows(&name).await;
    (StatusCode::OK, Json(CountResponse { count }))
}

pub async fn handle_injection_status(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Query(query): Query<InjectionQuery>,
) -> ApiResult<InjectionStatus> {
    let status = queue.injection_status(query.request.as_deref())?;
    Ok((StatusCode::OK, Json(status)))
}

pub async fn handle_update_locations(
    Extension(queue): Extension<Arc<WorkQueue>>,
) -> (StatusCode, Json<CountResponse>) {
    let count = queue.update_location_info().await;
    (StatusCode::OK, Json(CountResponse { count }))
}

pub async fn handle_drain(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Json(req): Json<DrainRequest>,
) -> StatusCode {
    queue.set_drain_mode(req.draining);
    StatusCode::NO_CONTENT
}

pub async fn handle_teams(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Json(req): Json<TeamsRequest>,
) -> StatusCode {
    queue.set_teams(req.teams);
    StatusCode::NO_CONTENT
}

pub async fn handle_cleanup(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Json(req): Json<CleanupRequest>,
) -> (StatusCode, Json<CleanupReport>) {
    let report = queue.perform_queue_cleanup_actions(req.skip_sync).await;
    (StatusCode::OK, Json(report))
}

pub async fn handle_sync(Extension(queue): Extension<Arc<WorkQueue>>) -> ApiResult<SyncResponse> {
    let (pulled, pushed) = queue.force_queue_sync().await?;
    Ok((StatusCode::OK, Json(SyncResponse { pulled, pushed })))
}

pub async fn handle_fix_conflicts(
    Extension(queue): Extension<Arc<WorkQueue>>,
) -> (StatusCode, Json<CountResponse>) {
    let count = queue.fix_conflicts().await;
    (StatusCode::OK, Json(CountResponse { count }))
}

// Parent side of the child protocol.

pub async fn handle_internal_acquire(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Json(req): Json<AcquireRequest>,
) -> (StatusCode, Json<AcquireResponse>) {
    tracing::debug!("Acquire request from {} for {:?}", req.child_url, req.capacity);
    let acquired = queue.acquire_for_child(req).await;
    (StatusCode::OK, Json(AcquireResponse { acquired }))
}

pub async fn handle_internal_snapshot(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Json(req): Json<SnapshotRequest>,
) -> (StatusCode, Json<ParentSnapshot>) {
    (StatusCode::OK, Json(queue.child_snapshot(&req.child_url, &req.known)))
}

pub async fn handle_internal_push(
    Extension(queue): Extension<Arc<WorkQueue>>,
    Json(req): Json<PushRequest>,
) -> (StatusCode, Json<PushResponse>) {
    tracing::debug!("{} updates pushed by {}", req.documents.len(), req.child_url);
    let acknowledged = queue.apply_child_updates(&req.child_url, req.documents).await;
    (StatusCode::OK, Json(PushResponse { acknowledged }))
}
