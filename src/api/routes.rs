use super::middleware::Caller;
use crate::AppState;
use crate::comments::CommentQuery;
use crate::coordinator::{EgressHealth, NewDestination, RemoveOutcome};
use crate::credentials::OAuthConnection;
use crate::error::{Result, ServiceError};
use crate::ingest::StartOutcome;
use crate::model::{ChatPlatform, CommentStatus, DestinationView, IngestedComment, Stream};
use crate::streams::{DeleteOutcome, NewStream};
use axum::extract::{Extension, Path as AxumPath, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

#[derive(Serialize, Deserialize)]
pub struct StatusResponse {
    pub active_egress_jobs: usize,
    pub polling_jobs: BTreeMap<ChatPlatform, usize>,
    pub total_polling_jobs: usize,
}

#[derive(Serialize, Deserialize)]
pub struct StatusUpdate {
    pub status: CommentStatus,
}

#[derive(Serialize, Deserialize)]
pub struct BulkStatusUpdate {
    pub comment_ids: Vec<Uuid>,
    pub status: CommentStatus,
}

#[derive(Serialize, Deserialize)]
pub struct BulkStatusResponse {
    pub updated: usize,
    pub comments: Vec<IngestedComment>,
}

#[derive(Serialize, Deserialize)]
pub struct RecentQuery {
    pub since: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
pub struct StartIngestion {
    pub channel_id: String,
}

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IngestionStatus {
    Started,
    AlreadyPolling,
    Stopped,
    NotPolling,
}

#[derive(Serialize, Deserialize)]
pub struct IngestionResponse {
    pub status: IngestionStatus,
}

#[derive(Serialize, Deserialize)]
pub struct ConnectionRequest {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Serialize, Deserialize)]
pub struct RevokeResponse {
    pub revoked: bool,
}

fn parse_platform(platform: &str) -> Result<ChatPlatform> {
    platform.parse().map_err(ServiceError::InvalidInput)
}

#[axum::debug_handler]
pub async fn status(Extension(state): Extension<AppState>) -> impl IntoResponse {
    let polling_jobs = state.ingestion.active_jobs();
    let total_polling_jobs = polling_jobs.values().sum();

    (
        StatusCode::OK,
        Json(StatusResponse {
            active_egress_jobs: state.coordinator.registry().active_count(),
            polling_jobs,
            total_polling_jobs,
        }),
    )
}

//
// Streams
//

pub async fn create_stream(
    Extension(state): Extension<AppState>,
    caller: Caller,
    Json(request): Json<NewStream>,
) -> Result<(StatusCode, Json<Stream>)> {
    let stream = state.streams.create(caller.id(), request).await?;
    Ok((StatusCode::CREATED, Json(stream)))
}

pub async fn list_streams(
    Extension(state): Extension<AppState>,
    caller: Caller,
) -> Json<Vec<Stream>> {
    Json(state.streams.list(caller.id()).await)
}

pub async fn get_stream(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath(stream_id): AxumPath<Uuid>,
) -> Result<Json<Stream>> {
    Ok(Json(state.streams.get(caller.id(), stream_id).await?))
}

pub async fn delete_stream(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath(stream_id): AxumPath<Uuid>,
) -> Result<Json<DeleteOutcome>> {
    Ok(Json(state.streams.delete(caller.id(), stream_id).await?))
}

//
// Destinations
//

pub async fn create_destination(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath(stream_id): AxumPath<Uuid>,
    Json(request): Json<NewDestination>,
) -> Result<(StatusCode, Json<DestinationView>)> {
    let destination = state
        .coordinator
        .create(caller.id(), stream_id, request)
        .await?;
    Ok((StatusCode::CREATED, Json(destination.into())))
}

pub async fn list_destinations(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath(stream_id): AxumPath<Uuid>,
) -> Result<Json<Vec<DestinationView>>> {
    let destinations = state.coordinator.list(caller.id(), stream_id).await?;
    Ok(Json(destinations.into_iter().map(Into::into).collect()))
}

pub async fn get_destination(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath((stream_id, destination_id)): AxumPath<(Uuid, Uuid)>,
) -> Result<Json<DestinationView>> {
    let destination = state
        .coordinator
        .get(caller.id(), stream_id, destination_id)
        .await?;
    Ok(Json(destination.into()))
}

pub async fn start_destination(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath((stream_id, destination_id)): AxumPath<(Uuid, Uuid)>,
) -> Result<Json<DestinationView>> {
    let destination = state
        .coordinator
        .start(caller.id(), stream_id, destination_id)
        .await?;
    Ok(Json(destination.into()))
}

pub async fn stop_destination(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath((stream_id, destination_id)): AxumPath<(Uuid, Uuid)>,
) -> Result<Json<DestinationView>> {
    let destination = state
        .coordinator
        .stop(caller.id(), stream_id, destination_id)
        .await?;
    Ok(Json(destination.into()))
}

pub async fn destination_health(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath((stream_id, destination_id)): AxumPath<(Uuid, Uuid)>,
) -> Result<Json<EgressHealth>> {
    let health = state
        .coordinator
        .health(caller.id(), stream_id, destination_id)
        .await?;
    Ok(Json(health))
}

pub async fn delete_destination(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath((stream_id, destination_id)): AxumPath<(Uuid, Uuid)>,
) -> Result<Json<RemoveOutcome>> {
    let outcome = state
        .coordinator
        .remove(caller.id(), stream_id, destination_id)
        .await?;
    Ok(Json(outcome))
}

//
// Comments
//

pub async fn list_comments(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath(stream_id): AxumPath<Uuid>,
    Query(query): Query<CommentQuery>,
) -> Result<Json<Vec<IngestedComment>>> {
    Ok(Json(state.comments.list(caller.id(), stream_id, &query).await?))
}

pub async fn recent_comments(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath(stream_id): AxumPath<Uuid>,
    Query(query): Query<RecentQuery>,
) -> Result<Json<Vec<IngestedComment>>> {
    let comments = state
        .comments
        .recent_since(caller.id(), stream_id, query.since)
        .await?;
    Ok(Json(comments))
}

pub async fn update_comment_status(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath((stream_id, comment_id)): AxumPath<(Uuid, Uuid)>,
    Json(update): Json<StatusUpdate>,
) -> Result<Json<IngestedComment>> {
    let comment = state
        .comments
        .update_status(caller.id(), stream_id, comment_id, update.status)
        .await?;
    Ok(Json(comment))
}

pub async fn bulk_update_comments(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath(stream_id): AxumPath<Uuid>,
    Json(update): Json<BulkStatusUpdate>,
) -> Result<Json<BulkStatusResponse>> {
    let comments = state
        .comments
        .bulk_update_status(caller.id(), stream_id, &update.comment_ids, update.status)
        .await?;
    Ok(Json(BulkStatusResponse {
        updated: comments.len(),
        comments,
    }))
}

pub async fn delete_comment(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath((stream_id, comment_id)): AxumPath<(Uuid, Uuid)>,
) -> Result<StatusCode> {
    state
        .comments
        .delete(caller.id(), stream_id, comment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

//
// Ingestion
//

pub async fn start_ingestion(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath((stream_id, platform)): AxumPath<(Uuid, String)>,
    Json(request): Json<StartIngestion>,
) -> Result<(StatusCode, Json<IngestionResponse>)> {
    let platform = parse_platform(&platform)?;
    let outcome = state
        .ingestion
        .start(caller.id(), stream_id, platform, &request.channel_id)
        .await?;

    let status = match outcome {
        StartOutcome::Started => IngestionStatus::Started,
        StartOutcome::AlreadyPolling => IngestionStatus::AlreadyPolling,
    };
    Ok((StatusCode::ACCEPTED, Json(IngestionResponse { status })))
}

pub async fn stop_ingestion(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath((stream_id, platform)): AxumPath<(Uuid, String)>,
) -> Result<(StatusCode, Json<IngestionResponse>)> {
    let platform = parse_platform(&platform)?;
    let stopped = state.ingestion.stop(caller.id(), stream_id, platform).await?;

    let status = if stopped {
        IngestionStatus::Stopped
    } else {
        IngestionStatus::NotPolling
    };
    Ok((StatusCode::ACCEPTED, Json(IngestionResponse { status })))
}

//
// OAuth connections
//

pub async fn save_connection(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath(provider): AxumPath<String>,
    Json(request): Json<ConnectionRequest>,
) -> Result<StatusCode> {
    let provider = parse_platform(&provider)?;
    if request.access_token.is_empty() {
        return Err(ServiceError::InvalidInput("access_token is empty".into()));
    }

    state
        .credentials
        .save(OAuthConnection {
            user_id: caller.0,
            provider,
            access_token: request.access_token,
            refresh_token: request.refresh_token,
            expires_at: request.expires_at,
        })
        .await;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn revoke_connection(
    Extension(state): Extension<AppState>,
    caller: Caller,
    AxumPath(provider): AxumPath<String>,
) -> Result<Json<RevokeResponse>> {
    let provider = parse_platform(&provider)?;
    let revoked = state.credentials.revoke(caller.id(), provider).await;
    Ok(Json(RevokeResponse { revoked }))
}
