use crate::api::response::{internal_error, relay_error};
use crate::api::{ApiResponse, state::AppState};
use crate::auth::OwnerId;
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    response::{
        IntoResponse, Response, Sse,
        sse::{Event, KeepAlive},
    },
};
use chatrelay_core::models::Turn;
use chatrelay_core::{ChannelWriter, RelayError};
use futures::{StreamExt, stream};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct RelayQuery {
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_stream() -> bool {
    true
}

#[derive(Debug, Serialize)]
pub struct RelayReply {
    pub content: String,
    pub user_turn: Turn,
    pub assistant_turn: Option<Turn>,
}

// POST /api/conversations/{id}/messages
pub async fn send_message(
    State(state): State<AppState>,
    Extension(OwnerId(owner)): Extension<OwnerId>,
    Path(id): Path<String>,
    Query(query): Query<RelayQuery>,
    Json(request): Json<SendMessageRequest>,
) -> Response {
    if !query.stream {
        return send_message_buffered(state, owner, id, request.message).await;
    }

    let session = match state.core.relay.prepare(&owner, &id, &request.message).await {
        Ok(session) => session,
        Err(err) => return relay_error(err).into_response(),
    };

    let (mut writer, mut rx) = ChannelWriter::channel(state.core.relay.config().channel_capacity);
    // Detached so the session finishes even if the client goes away.
    let task = tokio::spawn(async move { session.run(&mut writer).await });

    // The response is committed only once the session has produced output.
    let Some(first) = rx.recv().await else {
        return match task.await {
            Ok(outcome) => {
                let err = outcome.error.unwrap_or_else(|| {
                    RelayError::UpstreamStream("upstream produced no output".to_string())
                });
                relay_error(err).into_response()
            }
            Err(err) => internal_error("Relay task failed", err).into_response(),
        };
    };
    debug!(conversation_id = %id, "Relay stream committed");

    let events = stream::once(async move { first })
        .chain(ReceiverStream::new(rx))
        .map(|event| Ok::<_, Infallible>(Event::default().data(event.data())));

    Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response()
}

async fn send_message_buffered(
    state: AppState,
    owner: String,
    id: String,
    message: String,
) -> Response {
    match state.core.relay.relay_buffered(&owner, &id, &message).await {
        Ok(outcome) => {
            let reply = RelayReply {
                content: outcome.content,
                user_turn: outcome.user_turn,
                assistant_turn: outcome.assistant_turn,
            };
            let body = match outcome.error {
                Some(err) => ApiResponse::ok_with_message(reply, err.to_string()),
                None => ApiResponse::ok(reply),
            };
            Json(body).into_response()
        }
        Err(err) => relay_error(err).into_response(),
    }
}
