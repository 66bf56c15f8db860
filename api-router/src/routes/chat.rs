use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures::stream::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use agent_loop::{AgentLoop, AgentMessage, AgentStreamEvent, Citation, ToolContext};
use common::utils::cache::{from_cache_value, to_cache_value};

use crate::{api_state::ApiState, error::ApiError};

fn session_cache_key(conversation_id: &str) -> String {
    format!("session:{conversation_id}")
}

/// Loads prior turns from the session cache when the caller didn't resend
/// `conversation_history` itself, so a client can carry only `conversation_id`
/// across a multi-turn conversation instead of replaying the full transcript.
async fn resolve_history(state: &ApiState, conversation_id: &str, sent_history: Vec<ChatTurn>) -> Vec<AgentMessage> {
    if !sent_history.is_empty() {
        return history_from_turns(sent_history);
    }
    match state.session_cache.get(&session_cache_key(conversation_id)).await {
        Some(raw) => from_cache_value(&raw).unwrap_or_default(),
        None => Vec::new(),
    }
}

/// Persists the full turn history (prior turns + this question + this answer)
/// under `session:<conversation_id>` so the next turn can omit it.
async fn store_history(state: &ApiState, conversation_id: &str, history: &[AgentMessage]) {
    if let Some(raw) = to_cache_value(&history) {
        state.session_cache.set(session_cache_key(conversation_id), raw).await;
    }
}

#[derive(Debug, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub conversation_history: Vec<ChatTurn>,
}

#[derive(Debug, Serialize)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub response: String,
    pub citations: Vec<Citation>,
    pub conversation_id: String,
    pub token_usage: TokenUsage,
    pub latency_ms: f64,
}

fn history_from_turns(turns: Vec<ChatTurn>) -> Vec<AgentMessage> {
    turns
        .into_iter()
        .map(|turn| {
            if turn.role == "assistant" {
                AgentMessage::Assistant { text: Some(turn.content), tool_calls: Vec::new() }
            } else {
                AgentMessage::User(turn.content)
            }
        })
        .collect()
}

fn tool_context(state: &ApiState) -> ToolContext<'_> {
    ToolContext {
        db: &state.db,
        embedder: &state.embedder,
        sql_sandbox: state.sql_sandbox.as_deref(),
        hybrid_config: &state.hybrid_config,
        reranker_pool: state.reranker_pool.as_ref(),
    }
}

/// `POST /chat`. Runs the non-streaming agent loop to completion and returns
/// the full answer in one response.
pub async fn chat(
    State(state): State<ApiState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let conversation_id = request.conversation_id.unwrap_or_else(|| Uuid::new_v4().to_string());
    let history = resolve_history(&state, &conversation_id, request.conversation_history).await;
    let ctx = tool_context(&state);
    let agent_loop = AgentLoop::new(&state.openai_client, &state.db, ctx);

    let answer = agent_loop.answer(&request.message, history.clone()).await?;

    let mut full_history = history;
    full_history.push(AgentMessage::User(request.message.clone()));
    full_history.push(AgentMessage::Assistant {
        text: Some(answer.answer.clone()),
        tool_calls: Vec::new(),
    });
    store_history(&state, &conversation_id, &full_history).await;

    Ok(Json(ChatResponse {
        response: answer.answer,
        citations: answer.citations,
        conversation_id,
        token_usage: TokenUsage {
            input_tokens: answer.input_tokens,
            output_tokens: answer.output_tokens,
            total_tokens: answer.input_tokens + answer.output_tokens,
        },
        latency_ms: answer.latency_ms,
    }))
}

/// `POST /chat/stream`. Adapts `agent_loop::streaming::AgentStreamEvent` into
/// the SSE event shapes spec.md §6 prescribes
/// (`status`/`token`/`citation`/`done`/`error`), keeping that translation
/// here rather than in `agent-loop` so the loop crate stays transport-agnostic.
pub async fn chat_stream(
    State(state): State<ApiState>,
    Json(request): Json<ChatRequest>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let conversation_id = request.conversation_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());

    let stream = async_stream::stream! {
        let history = resolve_history(&state, &conversation_id, request.conversation_history).await;
        let ctx = tool_context(&state);
        let agent_loop = AgentLoop::new(&state.openai_client, &state.db, ctx);
        let mut events = Box::pin(agent_loop.answer_streaming(&request.message, history.clone()));

        let mut answer_text = String::new();
        while let Some(event) = events.next().await {
            if let AgentStreamEvent::Token(content) = &event {
                answer_text.push_str(content);
            }
            let done = matches!(event, AgentStreamEvent::Done { .. });

            let (event_type, payload) = match event {
                AgentStreamEvent::Status(content) => ("status", serde_json::json!({ "content": content })),
                AgentStreamEvent::Token(content) => ("token", serde_json::json!({ "content": content })),
                AgentStreamEvent::Citation(citation) => ("citation", serde_json::json!({ "data": citation })),
                AgentStreamEvent::Done { input_tokens, output_tokens, latency_ms, tool_calls } => (
                    "done",
                    serde_json::json!({
                        "metadata": {
                            "token_usage": {
                                "input_tokens": input_tokens,
                                "output_tokens": output_tokens,
                                "total_tokens": input_tokens + output_tokens,
                            },
                            "latency_ms": latency_ms,
                            "tool_calls": tool_calls,
                        }
                    }),
                ),
                AgentStreamEvent::Error(message) => ("error", serde_json::json!({ "message": message })),
            };

            let mut body = payload;
            body["type"] = serde_json::Value::String(event_type.to_string());
            yield Ok(Event::default().data(body.to_string()));

            if done {
                let mut full_history = history.clone();
                full_history.push(AgentMessage::User(request.message.clone()));
                full_history.push(AgentMessage::Assistant { text: Some(answer_text.clone()), tool_calls: Vec::new() });
                store_history(&state, &conversation_id, &full_history).await;
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
