//! Call REST API handlers
//!
//! The REST surface mirrors the signaling relay's call-control glue:
//! transitions performed here are broadcast over the WebSocket fan-out so
//! connected devices stay in sync regardless of which surface acted.

use super::call_dto::{
    ApiResponse, CallListResponse, CallResponse, HistoryQuery, InitiateCallRequest, StatsResponse,
};
use super::signaling::SignalingState;
use crate::domain::call::session::CallSessionManager;
use crate::domain::registry::ConnectionRegistry;
use crate::domain::shared::error::DomainError;
use crate::domain::shared::value_objects::{CallId, UserId};
use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub sessions: Arc<CallSessionManager>,
    pub registry: Arc<ConnectionRegistry>,
    pub signaling: Arc<SignalingState>,
}

fn status_for(error: &DomainError) -> StatusCode {
    match error {
        DomainError::ValidationError(_) => StatusCode::BAD_REQUEST,
        DomainError::NotFound(_) => StatusCode::NOT_FOUND,
        DomainError::Forbidden(_) => StatusCode::FORBIDDEN,
        DomainError::InvalidTransition(_) | DomainError::Conflict(_) => StatusCode::CONFLICT,
        DomainError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn failure<T>(error: DomainError) -> (StatusCode, Json<ApiResponse<T>>) {
    (
        status_for(&error),
        Json(ApiResponse::error(error.code(), error.to_string())),
    )
}

/// Actor identity from an optional bearer header
///
/// The REST surface is also used by trusted internal services that carry
/// no user token; participation is only enforced when a valid token names
/// an actor.
fn bearer_actor(state: &AppState, headers: &HeaderMap) -> Option<UserId> {
    let header = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = header.strip_prefix("Bearer ")?;
    let claims = state.signaling.verifier().verify(token)?;
    Some(UserId::from_uuid(claims.sub))
}

async fn check_participation(
    state: &AppState,
    headers: &HeaderMap,
    call_id: &CallId,
) -> Result<(), DomainError> {
    if let Some(actor) = bearer_actor(state, headers) {
        let call = state.sessions.get_call(call_id).await?;
        if !call.involves_user(&actor) {
            return Err(DomainError::Forbidden(format!(
                "user {} is neither caller nor receiver of call {}",
                actor, call_id
            )));
        }
    }
    Ok(())
}

/// Initiate a call
pub async fn initiate_call(
    State(state): State<AppState>,
    Json(request): Json<InitiateCallRequest>,
) -> (StatusCode, Json<ApiResponse<CallResponse>>) {
    info!(
        "API: Initiating {} call to {}",
        request.call_type.as_str(),
        request.receiver_id
    );

    let caller = request.caller();
    let receiver_id = UserId::from_uuid(request.receiver_id);

    match state
        .sessions
        .create_call(caller, &request.caller_name, receiver_id, request.call_type)
        .await
    {
        Ok(call) => {
            state.signaling.ring_receiver(&call).await;
            (
                StatusCode::CREATED,
                Json(ApiResponse::success(CallResponse::from(call))),
            )
        }
        Err(e) => failure(e),
    }
}

/// Answer a ringing call
pub async fn answer_call(
    State(state): State<AppState>,
    Path(call_id): Path<Uuid>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiResponse<CallResponse>>) {
    let call_id = CallId::from_uuid(call_id);
    info!("API: Answering call {}", call_id);

    if let Err(e) = check_participation(&state, &headers, &call_id).await {
        return failure(e);
    }

    match state.sessions.answer_call(&call_id).await {
        Ok(call) => {
            state.signaling.publish_transition(&call).await;
            (
                StatusCode::OK,
                Json(ApiResponse::success(CallResponse::from(call))),
            )
        }
        Err(e) => failure(e),
    }
}

/// Reject a ringing call
pub async fn reject_call(
    State(state): State<AppState>,
    Path(call_id): Path<Uuid>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiResponse<CallResponse>>) {
    let call_id = CallId::from_uuid(call_id);
    info!("API: Rejecting call {}", call_id);

    if let Err(e) = check_participation(&state, &headers, &call_id).await {
        return failure(e);
    }

    match state.sessions.reject_call(&call_id).await {
        Ok(call) => {
            state.signaling.publish_transition(&call).await;
            (
                StatusCode::OK,
                Json(ApiResponse::success(CallResponse::from(call))),
            )
        }
        Err(e) => failure(e),
    }
}

/// End a call; idempotent on already-terminal calls
pub async fn end_call(
    State(state): State<AppState>,
    Path(call_id): Path<Uuid>,
    headers: HeaderMap,
) -> (StatusCode, Json<ApiResponse<CallResponse>>) {
    let call_id = CallId::from_uuid(call_id);
    info!("API: Ending call {}", call_id);

    if let Err(e) = check_participation(&state, &headers, &call_id).await {
        return failure(e);
    }

    match state.sessions.end_call(&call_id).await {
        Ok(end) => {
            if end.transitioned {
                state.signaling.publish_transition(&end.call).await;
            }
            (
                StatusCode::OK,
                Json(ApiResponse::success(CallResponse::from(end.call))),
            )
        }
        Err(e) => failure(e),
    }
}

/// Active call for a user, if any
pub async fn get_active_call(
    State(state): State<AppState>,
    Path(user_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse<Option<CallResponse>>>) {
    let user_id = UserId::from_uuid(user_id);

    match state.sessions.get_active_call(&user_id).await {
        Ok(call) => (
            StatusCode::OK,
            Json(ApiResponse::success(call.map(CallResponse::from))),
        ),
        Err(e) => failure(e),
    }
}

/// Call detail by id
pub async fn get_call(
    State(state): State<AppState>,
    Path(call_id): Path<Uuid>,
) -> (StatusCode, Json<ApiResponse<CallResponse>>) {
    let call_id = CallId::from_uuid(call_id);

    match state.sessions.get_call(&call_id).await {
        Ok(call) => (
            StatusCode::OK,
            Json(ApiResponse::success(CallResponse::from(call))),
        ),
        Err(e) => failure(e),
    }
}

/// Call history for a user, newest first
pub async fn list_calls(
    State(state): State<AppState>,
    Query(query): Query<HistoryQuery>,
) -> (StatusCode, Json<ApiResponse<CallListResponse>>) {
    let user_id = UserId::from_uuid(query.user_id);

    match state
        .sessions
        .call_history(&user_id, query.limit, query.offset)
        .await
    {
        Ok(calls) => {
            let response = CallListResponse {
                calls: calls.into_iter().map(CallResponse::from).collect(),
                limit: query.limit,
                offset: query.offset,
            };
            (StatusCode::OK, Json(ApiResponse::success(response)))
        }
        Err(e) => failure(e),
    }
}

/// Runtime statistics
pub async fn get_stats(
    State(state): State<AppState>,
) -> (StatusCode, Json<ApiResponse<StatsResponse>>) {
    let registry_stats = state.registry.statistics();

    match state.sessions.active_call_count().await {
        Ok(active_calls) => {
            let response = StatsResponse {
                active_calls,
                total_connections: registry_stats.total_connections,
                online_users: registry_stats.online_users,
                connected_visitors: registry_stats.connected_visitors,
            };
            (StatusCode::OK, Json(ApiResponse::success(response)))
        }
        Err(e) => failure(e),
    }
}

/// Health check
pub async fn health_check() -> Json<ApiResponse<String>> {
    Json(ApiResponse::success("ok".to_string()))
}
