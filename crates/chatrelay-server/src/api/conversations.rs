use crate::api::response::{ApiError, api_error, internal_error};
use crate::api::{ApiResponse, state::AppState};
use crate::auth::OwnerId;
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use chatrelay_core::models::{Conversation, Turn};
use serde::Deserialize;

#[derive(Debug, Deserialize, Default)]
pub struct CreateConversationRequest {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system_prompt: Option<String>,
}

// POST /api/conversations
pub async fn create_conversation(
    State(state): State<AppState>,
    Extension(OwnerId(owner)): Extension<OwnerId>,
    Json(request): Json<CreateConversationRequest>,
) -> Result<(StatusCode, Json<ApiResponse<Conversation>>), ApiError> {
    let model = request
        .model
        .filter(|model| !model.trim().is_empty())
        .unwrap_or_else(|| state.default_model.clone());
    let mut conversation = Conversation::new(owner, model);

    if let Some(title) = request.title.filter(|title| !title.trim().is_empty()) {
        conversation = conversation.with_title(title.trim());
    }

    if let Some(prompt) = request.system_prompt {
        conversation = conversation.with_system_prompt(prompt);
    }

    state
        .core
        .conversations
        .create(&conversation)
        .await
        .map_err(|e| internal_error("Failed to create conversation", e))?;

    Ok((StatusCode::CREATED, Json(ApiResponse::ok(conversation))))
}

// GET /api/conversations
pub async fn list_conversations(
    State(state): State<AppState>,
    Extension(OwnerId(owner)): Extension<OwnerId>,
) -> Result<Json<ApiResponse<Vec<Conversation>>>, ApiError> {
    let conversations = state
        .core
        .conversations
        .list_for_owner(&owner)
        .await
        .map_err(|e| internal_error("Failed to list conversations", e))?;
    Ok(Json(ApiResponse::ok(conversations)))
}

// GET /api/conversations/{id}/turns
pub async fn list_turns(
    State(state): State<AppState>,
    Extension(OwnerId(owner)): Extension<OwnerId>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<Turn>>>, ApiError> {
    let owned = state
        .core
        .conversations
        .get_owned(&id, &owner)
        .await
        .map_err(|e| internal_error("Failed to load conversation", e))?;
    if owned.is_none() {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Conversation {} not found", id),
        ));
    }

    let turns = state
        .core
        .transcripts
        .list_ordered(&id)
        .await
        .map_err(|e| internal_error("Failed to load transcript", e))?;
    Ok(Json(ApiResponse::ok(turns)))
}
