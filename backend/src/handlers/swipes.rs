use axum::{
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use super::auth::AuthenticatedUser;
use super::response::{JsonResponse, write_response};
use crate::error::{ServiceError, ServiceResult};
use crate::models::{ChatMessage, MatchCursor, UserId};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct LikeParams {
    #[serde(rename = "super")]
    pub super_like: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PageParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct MatchParams {
    pub count: Option<i64>,
    pub cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    pub after: Option<u64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct LikeResult {
    pub matched: bool,
}

/// Wire form of a persisted message, shared with the chat socket.
#[derive(Debug, Clone, Serialize)]
pub struct MessageView {
    pub seq: u64,
    pub sender: UserId,
    pub payload: String,
    pub sent_at: chrono::DateTime<chrono::Utc>,
}

impl From<ChatMessage> for MessageView {
    fn from(message: ChatMessage) -> Self {
        Self {
            seq: message.sequence,
            sender: message.sender,
            payload: message.payload,
            sent_at: message.sent_at,
        }
    }
}

pub(crate) fn parse_target(raw: &str) -> ServiceResult<UserId> {
    raw.parse()
        .map_err(|_| ServiceError::BadRequest(format!("invalid user id: {}", raw)))
}

pub async fn like(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(target): Path<String>,
    Query(params): Query<LikeParams>,
) -> ServiceResult<Response> {
    let target = parse_target(&target)?;
    let matched = state
        .service
        .like(user.id, target, params.super_like.unwrap_or(false))
        .await?;
    Ok(write_response(LikeResult { matched }))
}

pub async fn dislike(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(target): Path<String>,
) -> ServiceResult<Response> {
    let target = parse_target(&target)?;
    state.service.dislike(user.id, target).await?;
    Ok(write_response("ok"))
}

pub async fn liked(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(page): Query<PageParams>,
) -> ServiceResult<Response> {
    let profiles = state
        .service
        .list_liked(user.id, page.limit, page.offset)
        .await?;
    Ok(write_response(profiles))
}

pub async fn disliked(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(page): Query<PageParams>,
) -> ServiceResult<Response> {
    let profiles = state
        .service
        .list_disliked(user.id, page.limit, page.offset)
        .await?;
    Ok(write_response(profiles))
}

pub async fn matches(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Query(params): Query<MatchParams>,
) -> ServiceResult<Response> {
    let cursor = match params.cursor.as_deref() {
        Some(raw) => Some(
            MatchCursor::decode(raw)
                .ok_or_else(|| ServiceError::BadRequest("malformed cursor".into()))?,
        ),
        None => None,
    };
    let listing = state
        .service
        .get_matches(user.id, params.count, cursor.as_ref())
        .await?;

    let mut response = JsonResponse::data(listing.profiles);
    if let Some(next) = listing.next_cursor {
        response = response.with_meta("next_cursor", next.encode());
    }
    Ok(response.into_response())
}

pub async fn chats(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> ServiceResult<Response> {
    let profiles = state.service.get_all_chats(user.id).await?;
    Ok(write_response(profiles))
}

pub async fn history(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(target): Path<String>,
    Query(params): Query<HistoryParams>,
) -> ServiceResult<Response> {
    let target = parse_target(&target)?;
    let messages: Vec<MessageView> = state
        .service
        .history(user.id, target, params.after, params.limit)
        .await?
        .into_iter()
        .map(MessageView::from)
        .collect();
    Ok(write_response(messages))
}
