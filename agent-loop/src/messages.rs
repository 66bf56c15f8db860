use async_openai::types::{
    ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessage,
};
use serde::{Deserialize, Serialize};

use common::error::AppError;

/// One request call's tool invocation, carried on an `Assistant` turn until
/// its matching `ToolResult` turn answers it by `tool_call_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

/// A source the final answer drew on, surfaced to the caller alongside the
/// answer text so it can be rendered as a citation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Citation {
    pub document_title: Option<String>,
    pub section_path: Option<String>,
    pub source_url: Option<String>,
    pub segment_id: Option<String>,
}

/// A turn in the conversation. Three shapes, not a bag of optional fields:
/// a plain user turn, an assistant turn that may carry tool calls, and a
/// tool-result turn answering one of those calls by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum AgentMessage {
    User(String),
    Assistant {
        text: Option<String>,
        #[serde(default)]
        tool_calls: Vec<ToolCall>,
    },
    ToolResult {
        tool_call_id: String,
        content: String,
    },
}

impl AgentMessage {
    pub fn to_request_message(&self) -> Result<ChatCompletionRequestMessage, AppError> {
        match self {
            Self::User(text) => Ok(ChatCompletionRequestUserMessage::from(text.as_str()).into()),
            Self::Assistant { text, tool_calls } => {
                let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
                if let Some(text) = text {
                    builder.content(text.clone());
                }
                if !tool_calls.is_empty() {
                    let calls: Vec<ChatCompletionMessageToolCall> = tool_calls
                        .iter()
                        .map(|call| ChatCompletionMessageToolCall {
                            id: call.id.clone(),
                            r#type: async_openai::types::ChatCompletionToolType::Function,
                            function: async_openai::types::FunctionCall {
                                name: call.name.clone(),
                                arguments: call.arguments.clone(),
                            },
                        })
                        .collect();
                    builder.tool_calls(calls);
                }
                let message = builder
                    .build()
                    .map_err(|err| AppError::Internal(format!("failed to build assistant message: {err}")))?;
                Ok(message.into())
            }
            Self::ToolResult { tool_call_id, content } => {
                let message = ChatCompletionRequestToolMessageArgs::default()
                    .tool_call_id(tool_call_id.clone())
                    .content(content.clone())
                    .build()
                    .map_err(|err| AppError::Internal(format!("failed to build tool result message: {err}")))?;
                Ok(message.into())
            }
        }
    }
}

/// Final result of a non-streaming `answer` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResponse {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub latency_ms: f64,
    pub tool_calls: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_message_converts_to_request_message() {
        let message = AgentMessage::User("hello".into());
        let request = message.to_request_message().unwrap();
        assert!(matches!(request, ChatCompletionRequestMessage::User(_)));
    }

    #[test]
    fn tool_result_message_converts_to_request_message() {
        let message = AgentMessage::ToolResult {
            tool_call_id: "call-1".into(),
            content: "result".into(),
        };
        let request = message.to_request_message().unwrap();
        assert!(matches!(request, ChatCompletionRequestMessage::Tool(_)));
    }
}
