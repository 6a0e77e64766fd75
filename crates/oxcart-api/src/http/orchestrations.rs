//! Orchestration lifecycle handlers: start, poll, list, cancel.

use std::str::FromStr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path as AxumPath, Query, State},
    http::StatusCode,
};
use oxcart_core::{ArchiveRequest, InstanceFilter, InstanceStatus, OrchestrationInstance};
use tracing::info;
use uuid::Uuid;

use crate::http::errors::ApiError;
use crate::models::{InstanceListParams, StartArchiveRequest, StartArchiveResponse};
use crate::state::ApiState;

pub(crate) async fn start_orchestration(
    State(state): State<Arc<ApiState>>,
    Json(request): Json<StartArchiveRequest>,
) -> Result<(StatusCode, Json<StartArchiveResponse>), ApiError> {
    let instance = state
        .engine
        .start(ArchiveRequest {
            root_path: request.root_path,
        })
        .await?;

    info!(instance_id = %instance.instance_id, "accepted archive request");
    Ok((
        StatusCode::ACCEPTED,
        Json(StartArchiveResponse {
            instance_id: instance.instance_id,
            status_query_uri: format!("/orchestrations/{}", instance.instance_id),
        }),
    ))
}

pub(crate) async fn get_orchestration(
    State(state): State<Arc<ApiState>>,
    AxumPath(instance_id): AxumPath<Uuid>,
) -> Result<Json<OrchestrationInstance>, ApiError> {
    state.engine.instance(instance_id).await.map_or_else(
        || Err(ApiError::not_found(format!("no orchestration instance {instance_id}"))),
        |instance| Ok(Json(instance)),
    )
}

pub(crate) async fn list_orchestrations(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<InstanceListParams>,
) -> Result<Json<Vec<OrchestrationInstance>>, ApiError> {
    let status = match params.status.as_deref() {
        None => None,
        Some(raw) => Some(InstanceStatus::from_str(raw).map_err(ApiError::bad_request)?),
    };
    let filter = InstanceFilter {
        status,
        started_after: params.started_after,
        started_before: params.started_before,
    };
    Ok(Json(state.engine.instances(&filter).await))
}

pub(crate) async fn cancel_orchestration(
    State(state): State<Arc<ApiState>>,
    AxumPath(instance_id): AxumPath<Uuid>,
) -> Result<StatusCode, ApiError> {
    state.engine.cancel(instance_id).await?;
    Ok(StatusCode::ACCEPTED)
}
