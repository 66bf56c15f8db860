use std::collections::BTreeMap;

use async_openai::types::{
    ChatCompletionRequestSystemMessage, ChatCompletionStreamOptions, CreateChatCompletionRequestArgs,
    FinishReason,
};
use async_stream::stream;
use futures::{Stream, StreamExt};
use tracing::warn;

use common::storage::types::system_settings::SystemSettings;

use crate::{
    loop_::{AgentLoop, MAX_TOOL_ITERATIONS, SYSTEM_PROMPT},
    messages::{AgentMessage, Citation, ToolCall},
    tools::{execute_tool, tool_definitions},
};

const MAX_ANSWER_TOKENS: u32 = 4096;

/// One increment of the streamed answer, in emission order: status updates
/// while the loop is working, token deltas once the model has committed to a
/// final answer, one citation per source the answer drew on, and a terminal
/// `Done` (or `Error`) event carrying usage and latency.
#[derive(Debug, Clone)]
pub enum AgentStreamEvent {
    Status(String),
    Token(String),
    Citation(Citation),
    Done {
        input_tokens: u32,
        output_tokens: u32,
        latency_ms: f64,
        tool_calls: usize,
    },
    Error(String),
}

/// Accumulates the partial tool-call chunks a streamed response delivers
/// piecemeal, keyed by the index OpenAI assigns each call within the turn.
#[derive(Default)]
struct ToolCallAccumulator {
    calls: BTreeMap<u32, ToolCall>,
}

impl ToolCallAccumulator {
    fn absorb(&mut self, chunks: Vec<async_openai::types::ChatCompletionMessageToolCallChunk>) {
        for chunk in chunks {
            let entry = self.calls.entry(chunk.index).or_insert_with(|| ToolCall {
                id: String::new(),
                name: String::new(),
                arguments: String::new(),
            });
            if let Some(id) = chunk.id {
                entry.id = id;
            }
            if let Some(function) = chunk.function {
                if let Some(name) = function.name {
                    entry.name.push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    entry.arguments.push_str(&arguments);
                }
            }
        }
    }

    fn into_calls(self) -> Vec<ToolCall> {
        self.calls.into_values().collect()
    }
}

impl<'a> AgentLoop<'a> {
    /// Streaming counterpart to [`AgentLoop::answer`]. Runs the same tool-use
    /// state machine, but the round that turns out to need no further tools
    /// streams its answer token by token as it arrives, instead of being
    /// generated non-streaming and re-emitted -- there is exactly one model
    /// call per round, streamed every time, so the final answer is never
    /// produced twice.
    pub fn answer_streaming(
        &'a self,
        question: &'a str,
        history: Vec<AgentMessage>,
    ) -> impl Stream<Item = AgentStreamEvent> + 'a {
        stream! {
            let start = std::time::Instant::now();

            let settings = match SystemSettings::get_current(self.db()).await {
                Ok(settings) => settings,
                Err(err) => {
                    yield AgentStreamEvent::Error(err.to_string());
                    return;
                }
            };
            let tools = match tool_definitions() {
                Ok(tools) => tools,
                Err(err) => {
                    yield AgentStreamEvent::Error(err.to_string());
                    return;
                }
            };

            let mut messages = history;
            messages.push(AgentMessage::User(question.to_string()));

            let mut all_citations: Vec<Citation> = Vec::new();
            let mut input_tokens = 0u32;
            let mut output_tokens = 0u32;
            let mut tool_call_count = 0usize;

            for round in 0..MAX_TOOL_ITERATIONS {
                yield AgentStreamEvent::Status(if round == 0 { "Thinking...".to_string() } else { "Thinking some more...".to_string() });

                let mut request_messages = vec![ChatCompletionRequestSystemMessage::from(SYSTEM_PROMPT).into()];
                let mut build_err = None;
                for message in &messages {
                    match message.to_request_message() {
                        Ok(request_message) => request_messages.push(request_message),
                        Err(err) => {
                            build_err = Some(err);
                            break;
                        }
                    }
                }
                if let Some(err) = build_err {
                    yield AgentStreamEvent::Error(err.to_string());
                    return;
                }

                let request = match CreateChatCompletionRequestArgs::default()
                    .model(&settings.agent_model)
                    .max_tokens(MAX_ANSWER_TOKENS)
                    .messages(request_messages)
                    .tools(tools.clone())
                    .stream_options(ChatCompletionStreamOptions { include_usage: true })
                    .build()
                {
                    Ok(request) => request,
                    Err(err) => {
                        yield AgentStreamEvent::Error(err.to_string());
                        return;
                    }
                };

                let mut response_stream = match self.client().chat().create_stream(request).await {
                    Ok(stream) => stream,
                    Err(err) => {
                        yield AgentStreamEvent::Error(err.to_string());
                        return;
                    }
                };

                let mut accumulator = ToolCallAccumulator::default();
                let mut assistant_text = String::new();
                let mut finish_reason = None;
                let mut error = None;

                while let Some(chunk) = response_stream.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(err) => {
                            error = Some(err.to_string());
                            break;
                        }
                    };

                    if let Some(usage) = chunk.usage {
                        input_tokens += usage.prompt_tokens;
                        output_tokens += usage.completion_tokens;
                    }

                    let Some(choice) = chunk.choices.into_iter().next() else {
                        continue;
                    };

                    if let Some(content) = choice.delta.content {
                        if !content.is_empty() {
                            assistant_text.push_str(&content);
                            yield AgentStreamEvent::Token(content);
                        }
                    }
                    if let Some(tool_calls) = choice.delta.tool_calls {
                        accumulator.absorb(tool_calls);
                    }
                    if choice.finish_reason.is_some() {
                        finish_reason = choice.finish_reason;
                    }
                }

                if let Some(err) = error {
                    yield AgentStreamEvent::Error(err);
                    return;
                }

                if matches!(finish_reason, Some(FinishReason::ToolCalls)) {
                    let tool_calls = accumulator.into_calls();

                    messages.push(AgentMessage::Assistant {
                        text: if assistant_text.is_empty() { None } else { Some(assistant_text) },
                        tool_calls: tool_calls.clone(),
                    });

                    for call in tool_calls {
                        tool_call_count += 1;
                        yield AgentStreamEvent::Status(format!("Using {}...", call.name));

                        let outcome = execute_tool(&call.name, &call.arguments, self.tool_ctx()).await;
                        let (result, citations) = match outcome {
                            Ok(outcome) => outcome,
                            Err(err) => {
                                yield AgentStreamEvent::Error(err.to_string());
                                return;
                            }
                        };
                        all_citations.extend(citations);
                        messages.push(AgentMessage::ToolResult {
                            tool_call_id: call.id.clone(),
                            content: result,
                        });
                    }
                    continue;
                }

                for citation in &all_citations {
                    yield AgentStreamEvent::Citation(citation.clone());
                }
                yield AgentStreamEvent::Done {
                    input_tokens,
                    output_tokens,
                    latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                    tool_calls: tool_call_count,
                };
                return;
            }

            warn!(tool_calls = tool_call_count, "agent loop exhausted max tool iterations");
            yield AgentStreamEvent::Token(
                "I was unable to fully answer your question within the allowed number of \
                 search steps. Please try rephrasing or asking a more specific question."
                    .to_string(),
            );
            yield AgentStreamEvent::Done {
                input_tokens,
                output_tokens,
                latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                tool_calls: tool_call_count,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_reassembles_name_and_arguments_across_chunks() {
        use async_openai::types::{ChatCompletionMessageToolCallChunk, FunctionCallStream};

        let mut accumulator = ToolCallAccumulator::default();
        accumulator.absorb(vec![ChatCompletionMessageToolCallChunk {
            index: 0,
            id: Some("call-1".to_string()),
            r#type: None,
            function: Some(FunctionCallStream {
                name: Some("search_knowledge".to_string()),
                arguments: Some("{\"query\":".to_string()),
            }),
        }]);
        accumulator.absorb(vec![ChatCompletionMessageToolCallChunk {
            index: 0,
            id: None,
            r#type: None,
            function: Some(FunctionCallStream {
                name: None,
                arguments: Some("\"pricing\"}".to_string()),
            }),
        }]);

        let calls = accumulator.into_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call-1");
        assert_eq!(calls[0].name, "search_knowledge");
        assert_eq!(calls[0].arguments, "{\"query\":\"pricing\"}");
    }

    #[test]
    fn accumulator_keeps_distinct_calls_separate_by_index() {
        use async_openai::types::{ChatCompletionMessageToolCallChunk, FunctionCallStream};

        let mut accumulator = ToolCallAccumulator::default();
        accumulator.absorb(vec![
            ChatCompletionMessageToolCallChunk {
                index: 0,
                id: Some("call-1".to_string()),
                r#type: None,
                function: Some(FunctionCallStream { name: Some("a".to_string()), arguments: Some("{}".to_string()) }),
            },
            ChatCompletionMessageToolCallChunk {
                index: 1,
                id: Some("call-2".to_string()),
                r#type: None,
                function: Some(FunctionCallStream { name: Some("b".to_string()), arguments: Some("{}".to_string()) }),
            },
        ]);

        let calls = accumulator.into_calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].id, "call-1");
        assert_eq!(calls[1].id, "call-2");
    }
}
