use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::AppError;
use crate::server::AppState;
use crate::store::{Filters, Message};
use crate::validation::Validator;

use super::{ensure_user, with_store_timeout};

const DEFAULT_PAGE_SIZE: i64 = 20;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
}

/// Accept a message for `peer_id` from `user_id`.
///
/// The message is validated, appended to the durable stream, and then
/// pushed to the recipient's live subscription if one exists. 202 means
/// queued, not persisted; the worker writes the row asynchronously.
pub async fn send_message(
    State(state): State<AppState>,
    Path((user_id, peer_id)): Path<(i64, i64)>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, AppError> {
    if user_id < 1 || peer_id < 1 {
        return Err(AppError::NotFound);
    }

    ensure_user(&state, user_id).await?;
    ensure_user(&state, peer_id).await?;

    let Json(input) = payload.map_err(|e| AppError::BadRequest(e.to_string()))?;

    let message = Message {
        id: 0,
        timestamp: Utc::now(),
        content: input.content,
        sender_id: user_id,
        receiver_id: peer_id,
        read_status: false,
    };

    let mut v = Validator::new();
    message.validate(&mut v);
    if !v.is_valid() {
        return Err(AppError::Validation(v.into_errors()));
    }

    state.queue.enqueue(&message).await?;

    // Live push to the recipient; enqueue first so durability never
    // depends on the subscriber being connected.
    let frame = serde_json::to_string(&message).map_err(AppError::internal)?;
    state.hub.publish_to_user(user_id, peer_id, frame).await;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Message queued for processing" })),
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct ListMessagesQuery {
    pub cursor: Option<String>,
    pub page_size: Option<String>,
}

/// Cursor-paginated conversation history between the two users, newest
/// first.
pub async fn list_messages(
    State(state): State<AppState>,
    Path((user_id, peer_id)): Path<(i64, i64)>,
    Query(query): Query<ListMessagesQuery>,
) -> Result<impl IntoResponse, AppError> {
    if user_id < 1 || peer_id < 1 {
        return Err(AppError::NotFound);
    }

    let mut v = Validator::new();

    let cursor = match &query.cursor {
        None => Utc::now(),
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => ts.with_timezone(&Utc),
            Err(_) => {
                v.add_error("cursor", "Cursor must be a valid timestamp");
                Utc::now()
            }
        },
    };

    let page_size = match &query.page_size {
        None => DEFAULT_PAGE_SIZE,
        Some(raw) => match raw.parse::<i64>() {
            Ok(n) => n,
            Err(_) => {
                v.add_error("page_size", "Page size must be an integer");
                DEFAULT_PAGE_SIZE
            }
        },
    };

    let filters = Filters { cursor, page_size };
    filters.validate(&mut v);
    if !v.is_valid() {
        return Err(AppError::Validation(v.into_errors()));
    }

    let (messages, metadata) =
        with_store_timeout(state.messages.get_all_for_pair(user_id, peer_id, &filters)).await?;

    Ok(Json(json!({ "messages": messages, "metadata": metadata })))
}

/// Mark a message as read.
pub async fn read_message(
    State(state): State<AppState>,
    Path(message_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if message_id < 1 {
        return Err(AppError::NotFound);
    }

    with_store_timeout(state.messages.update_status(message_id, true)).await?;

    Ok(Json(json!({ "status": "read" })))
}

/// Peers the user has open conversations with.
pub async fn list_chats(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    if user_id < 1 {
        return Err(AppError::NotFound);
    }

    ensure_user(&state, user_id).await?;

    let chats = with_store_timeout(state.messages.chats_for_user(user_id)).await?;

    Ok(Json(json!({ "chats": chats })))
}
