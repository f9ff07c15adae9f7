//! REST boundary.
//!
//! Mirrors the wire events for clients without a persistent connection and
//! for attachment-bearing sends. Every endpoint returns the same expanded
//! shapes as the transport events, so clients can treat both paths
//! uniformly. REST sends fan out through the dispatch engine exactly like
//! socket sends.

use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Multipart, Path, Query, State},
    http::Method,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use parley_shared::constants::DEFAULT_PAGE_LIMIT;
use parley_shared::{GroupId, MediaItem, MessageId, MessageView, UserId};
use parley_store::{Group, User};

use crate::config::ServerConfig;
use crate::dispatch::{Dispatcher, SendRequest, SharedStore};
use crate::error::ApiError;
use crate::media::MediaStore;
use crate::presence::PresenceRegistry;
use crate::rooms::Hub;
use crate::session;

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
    pub hub: Hub,
    pub presence: PresenceRegistry,
    pub store: SharedStore,
    pub media: Arc<MediaStore>,
    pub config: Arc<ServerConfig>,
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers(Any);

    let max_upload = state.config.max_upload_size;

    Router::new()
        .route("/health", get(health_check))
        .route("/ws", get(session::ws_handler))
        // Users
        .route("/users", post(create_user).get(list_users))
        .route("/users/{id}", get(get_user))
        // Groups
        .route("/groups", post(create_group))
        .route("/groups/{id}", get(get_group))
        .route("/groups/{id}/members", post(add_member))
        .route("/groups/{id}/members/{userId}", delete(remove_member))
        .route("/groups/user/{userId}", get(groups_for_user))
        // Messages
        .route("/messages", post(send_message))
        .route("/messages/upload", post(send_message_with_media))
        .route("/messages/seen", post(mark_seen))
        .route("/messages/pinned/{userId}", get(pinned_for_user))
        .route(
            "/messages/direct/{user1}/{user2}",
            get(direct_history).delete(delete_all_direct),
        )
        .route(
            "/messages/group/{groupId}",
            get(group_history).delete(delete_all_group),
        )
        .route("/messages/{id}", put(edit_message).delete(delete_message))
        .route("/messages/{id}/react", post(react_to_message))
        .route("/messages/{id}/pin", post(pin_message))
        .route("/messages/{id}/unpin", post(unpin_message))
        // Uploads
        .route("/uploads/{name}", get(serve_upload))
        .layer(DefaultBodyLimit::max(max_upload))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ─── Users ───

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateUserRequest {
    username: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    avatar: Option<String>,
}

async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<Json<User>, ApiError> {
    if req.username.trim().is_empty() {
        return Err(ApiError::BadRequest("Username is required".into()));
    }

    let user = User {
        id: UserId::new(),
        username: req.username,
        email: req.email,
        avatar: req.avatar,
        created_at: Utc::now(),
    };
    state.store.lock().await.create_user(&user)?;

    info!(user = %user.id, "user created");
    Ok(Json(user))
}

async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<UserId>,
) -> Result<Json<User>, ApiError> {
    let user = state.store.lock().await.get_user(id)?;
    Ok(Json(user))
}

async fn list_users(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    let users = state.store.lock().await.list_users()?;
    Ok(Json(users))
}

// ─── Groups ───

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateGroupRequest {
    name: String,
    admin: UserId,
    #[serde(default)]
    members: Vec<UserId>,
    #[serde(default)]
    avatar: Option<String>,
}

async fn create_group(
    State(state): State<AppState>,
    Json(req): Json<CreateGroupRequest>,
) -> Result<Json<Group>, ApiError> {
    if req.name.trim().is_empty() {
        return Err(ApiError::BadRequest("Group name is required".into()));
    }

    let mut group = Group::new(req.name, req.admin);
    group.avatar = req.avatar;
    for member in req.members {
        if !group.members.contains(&member) {
            group.members.push(member);
        }
    }

    let store = state.store.lock().await;
    store.get_user_ref(req.admin)?;
    store.create_group(&group)?;
    let group = store.get_group(group.id)?;

    info!(group = %group.id, admin = %group.admin, "group created");
    Ok(Json(group))
}

async fn get_group(
    State(state): State<AppState>,
    Path(id): Path<GroupId>,
) -> Result<Json<Group>, ApiError> {
    let group = state.store.lock().await.get_group(id)?;
    Ok(Json(group))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddMemberRequest {
    user_id: UserId,
}

async fn add_member(
    State(state): State<AppState>,
    Path(id): Path<GroupId>,
    Json(req): Json<AddMemberRequest>,
) -> Result<Json<Group>, ApiError> {
    let store = state.store.lock().await;
    store.get_group_ref(id)?;
    store.get_user_ref(req.user_id)?;
    store.add_group_member(id, req.user_id)?;
    Ok(Json(store.get_group(id)?))
}

async fn remove_member(
    State(state): State<AppState>,
    Path((id, user_id)): Path<(GroupId, UserId)>,
) -> Result<Json<Group>, ApiError> {
    let store = state.store.lock().await;
    store.get_group_ref(id)?;
    store.remove_group_member(id, user_id)?;
    Ok(Json(store.get_group(id)?))
}

async fn groups_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<Vec<Group>>, ApiError> {
    let groups = state.store.lock().await.list_groups_for_user(user_id)?;
    Ok(Json(groups))
}

// ─── Messages ───

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateMessageRequest {
    sender: UserId,
    #[serde(default)]
    receiver: Option<UserId>,
    #[serde(default)]
    group: Option<GroupId>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    reply_to: Option<MessageId>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendResponse {
    data: MessageView,
    #[serde(skip_serializing_if = "Option::is_none")]
    delivered: Option<bool>,
}

async fn send_message(
    State(state): State<AppState>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<Json<SendResponse>, ApiError> {
    let outcome = state
        .dispatcher
        .send(SendRequest {
            sender: req.sender,
            receiver: req.receiver,
            group: req.group,
            text: req.text,
            media: Vec::new(),
            reply_to: req.reply_to,
        })
        .await?;

    Ok(Json(SendResponse {
        data: outcome.message,
        delivered: outcome.delivered,
    }))
}

/// Multipart variant of message creation for attachment-bearing sends.
/// Text fields mirror [`CreateMessageRequest`]; each `media` field is one
/// attachment.
async fn send_message_with_media(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<SendResponse>, ApiError> {
    let mut sender = None;
    let mut receiver = None;
    let mut group = None;
    let mut text = None;
    let mut reply_to = None;
    let mut media: Vec<MediaItem> = Vec::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Multipart error: {}", e)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "media" => {
                let file_name = field.file_name().map(str::to_string);
                let content_type = field.content_type().map(str::to_string);
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read field: {}", e)))?;

                let item = state
                    .media
                    .store_upload(file_name.as_deref(), content_type.as_deref(), &data)
                    .await?;
                media.push(item);
            }
            "sender" | "receiver" | "group" | "text" | "replyTo" => {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ApiError::BadRequest(format!("Failed to read field: {}", e)))?;
                match name.as_str() {
                    "sender" => sender = Some(parse_field::<UserId>("sender", &value)?),
                    "receiver" => receiver = Some(parse_field::<UserId>("receiver", &value)?),
                    "group" => group = Some(parse_field::<GroupId>("group", &value)?),
                    "text" => text = Some(value),
                    "replyTo" => reply_to = Some(parse_field::<MessageId>("replyTo", &value)?),
                    _ => unreachable!(),
                }
            }
            _ => {}
        }
    }

    let Some(sender) = sender else {
        return Err(ApiError::BadRequest("Sender is required".into()));
    };

    let outcome = state
        .dispatcher
        .send(SendRequest {
            sender,
            receiver,
            group,
            text,
            media,
            reply_to,
        })
        .await?;

    Ok(Json(SendResponse {
        data: outcome.message,
        delivered: outcome.delivered,
    }))
}

fn parse_field<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ApiError>
where
    T::Err: std::fmt::Display,
{
    value
        .parse::<T>()
        .map_err(|e| ApiError::BadRequest(format!("Invalid {name}: {e}")))
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    limit: Option<u32>,
    #[serde(default)]
    before: Option<DateTime<Utc>>,
}

async fn direct_history(
    State(state): State<AppState>,
    Path((user1, user2)): Path<(UserId, UserId)>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let messages = state
        .store
        .lock()
        .await
        .find_direct_messages(user1, user2, limit, query.before)?;
    Ok(Json(messages))
}

async fn group_history(
    State(state): State<AppState>,
    Path(group_id): Path<GroupId>,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    let messages = state
        .store
        .lock()
        .await
        .find_group_messages(group_id, limit, query.before)?;
    Ok(Json(messages))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EditMessageRequest {
    new_text: String,
    sender: UserId,
}

async fn edit_message(
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
    Json(req): Json<EditMessageRequest>,
) -> Result<Json<MessageView>, ApiError> {
    let view = state.dispatcher.edit(id, req.sender, &req.new_text).await?;
    Ok(Json(view))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteMessageRequest {
    sender: UserId,
}

async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
    Json(req): Json<DeleteMessageRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.dispatcher.delete(id, req.sender).await?;
    Ok(Json(serde_json::json!({ "deleted": true })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReactRequest {
    user_id: UserId,
    #[serde(rename = "type")]
    kind: String,
}

async fn react_to_message(
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
    Json(req): Json<ReactRequest>,
) -> Result<Json<MessageView>, ApiError> {
    let view = state.dispatcher.react(id, req.user_id, &req.kind).await?;
    Ok(Json(view))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PinRequest {
    user_id: UserId,
}

async fn pin_message(
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
    Json(req): Json<PinRequest>,
) -> Result<Json<MessageView>, ApiError> {
    let view = state.dispatcher.set_pinned(id, req.user_id, true).await?;
    Ok(Json(view))
}

async fn unpin_message(
    State(state): State<AppState>,
    Path(id): Path<MessageId>,
    Json(req): Json<PinRequest>,
) -> Result<Json<MessageView>, ApiError> {
    let view = state.dispatcher.set_pinned(id, req.user_id, false).await?;
    Ok(Json(view))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkSeenRequest {
    message_ids: Vec<MessageId>,
    user_id: UserId,
}

async fn mark_seen(
    State(state): State<AppState>,
    Json(req): Json<MarkSeenRequest>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let updated = state.dispatcher.mark_seen(&req.message_ids, req.user_id).await;
    Ok(Json(updated))
}

async fn pinned_for_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> Result<Json<Vec<MessageView>>, ApiError> {
    let pinned = state.store.lock().await.pinned_messages_for_user(user_id)?;
    Ok(Json(pinned))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeleteAllRequest {
    requester_id: UserId,
}

async fn delete_all_direct(
    State(state): State<AppState>,
    Path((user1, user2)): Path<(UserId, UserId)>,
    Json(req): Json<DeleteAllRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state
        .dispatcher
        .delete_all_between(user1, user2, req.requester_id)
        .await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

async fn delete_all_group(
    State(state): State<AppState>,
    Path(group_id): Path<GroupId>,
    Json(req): Json<DeleteAllRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let deleted = state
        .dispatcher
        .delete_all_in_group(group_id, req.requester_id)
        .await?;
    Ok(Json(serde_json::json!({ "deleted": deleted })))
}

// ─── Uploads ───

async fn serve_upload(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Vec<u8>, ApiError> {
    state.media.read(&name).await
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
