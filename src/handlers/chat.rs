use axum::{
    extract::{rejection::JsonRejection, State},
    Json,
};
use std::sync::Arc;
use tracing::info;

use crate::chat::{contains_crisis_keywords, SAFETY_MESSAGE};
use crate::AppState;

use super::{AppError, ChatRequest, ChatResponse, DocChatRequest};

// ─── POST /chat ──────────────────────────────────────────────────

pub async fn chat_with_memory(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(req) = body?;

    // Crisis messages never reach the model
    if contains_crisis_keywords(&req.query) {
        state
            .chat_log
            .log_chat(&req.session_id, &req.query, SAFETY_MESSAGE, true);
        return Ok(Json(ChatResponse {
            response: SAFETY_MESSAGE.to_string(),
        }));
    }

    let response = state.chat.get_response(&req.session_id, &req.query).await?;
    state
        .chat_log
        .log_chat(&req.session_id, &req.query, &response, false);

    Ok(Json(ChatResponse { response }))
}

// ─── POST /doc-chat ──────────────────────────────────────────────

pub async fn chat_with_documents(
    State(state): State<Arc<AppState>>,
    body: Result<Json<DocChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, AppError> {
    let Json(req) = body?;
    info!(session_id = %req.session_id, "document question");
    let response = state.docs.query_documents(&req.query).await?;
    Ok(Json(ChatResponse { response }))
}
