use async_openai::{
    config::OpenAIConfig,
    types::{ChatCompletionRequestSystemMessage, CreateChatCompletionRequestArgs, FinishReason},
    Client,
};
use tracing::{info, instrument, warn};

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::system_settings::SystemSettings},
};

use crate::{
    messages::{AgentMessage, AgentResponse, ToolCall},
    tools::{execute_tool, tool_definitions, ToolContext},
};

/// Caps how many rounds of tool calls the loop will run before it gives up
/// and returns a "couldn't fully answer" response instead of looping forever
/// against an uncooperative model.
pub const MAX_TOOL_ITERATIONS: usize = 5;

pub(crate) const SYSTEM_PROMPT: &str = "You are a business knowledge assistant. You answer questions using \
information retrieved from the business knowledge base via the available tools.

Available tools:
- search_knowledge: Search documents for relevant text segments.
- get_document_context: Fetch full document content for deep reading.
- get_change_history: See recent document changes and sync history.
- query_database: Run SQL queries on analytics data files (CSV/Parquet/JSON).
- search_entities: Look up structured business entities extracted from documents.

Rules:
1. ALWAYS use tools to find information before answering.
2. Every factual claim MUST cite its source using this format: [Source: document_title > section](source_url)
3. If the source_url is not available, use: [Source: document_title > section]
4. If you cannot find relevant information, say so clearly -- never make up facts.
5. For complex questions, you may search multiple times with different queries.
6. Synthesize information from multiple sources when relevant.
7. Be concise and direct in your answers.";

const MAX_ANSWER_TOKENS: u32 = 4096;

/// Drives the tool-use loop: sends the conversation to the model, executes
/// any tool calls it asks for, appends the results, and repeats until the
/// model produces a final answer or `MAX_TOOL_ITERATIONS` is exhausted.
pub struct AgentLoop<'a> {
    client: &'a Client<OpenAIConfig>,
    db: &'a SurrealDbClient,
    tool_ctx: ToolContext<'a>,
}

impl<'a> AgentLoop<'a> {
    pub fn new(client: &'a Client<OpenAIConfig>, db: &'a SurrealDbClient, tool_ctx: ToolContext<'a>) -> Self {
        Self { client, db, tool_ctx }
    }

    pub(crate) fn client(&self) -> &'a Client<OpenAIConfig> {
        self.client
    }

    pub(crate) fn db(&self) -> &'a SurrealDbClient {
        self.db
    }

    pub(crate) fn tool_ctx(&self) -> &ToolContext<'a> {
        &self.tool_ctx
    }

    #[instrument(skip_all, fields(question_len = question.len()))]
    pub async fn answer(
        &self,
        question: &str,
        history: Vec<AgentMessage>,
    ) -> Result<AgentResponse, AppError> {
        let start = std::time::Instant::now();
        let settings = SystemSettings::get_current(self.db).await?;
        let tools = tool_definitions()?;

        let mut messages = history;
        messages.push(AgentMessage::User(question.to_string()));

        let mut all_citations = Vec::new();
        let mut input_tokens = 0u32;
        let mut output_tokens = 0u32;
        let mut tool_call_count = 0usize;

        for _ in 0..MAX_TOOL_ITERATIONS {
            let request_messages = self.build_request_messages(&messages)?;
            let request = CreateChatCompletionRequestArgs::default()
                .model(&settings.agent_model)
                .max_tokens(MAX_ANSWER_TOKENS)
                .messages(request_messages)
                .tools(tools.clone())
                .build()?;

            let response = self.client.chat().create(request).await?;
            let choice = response
                .choices
                .into_iter()
                .next()
                .ok_or_else(|| AppError::TransientUpstream("empty chat completion response".into()))?;

            if let Some(usage) = response.usage {
                input_tokens += usage.prompt_tokens;
                output_tokens += usage.completion_tokens;
            }

            match choice.finish_reason {
                Some(FinishReason::ToolCalls) => {
                    let tool_calls: Vec<ToolCall> = choice
                        .message
                        .tool_calls
                        .unwrap_or_default()
                        .into_iter()
                        .map(|call| ToolCall {
                            id: call.id,
                            name: call.function.name,
                            arguments: call.function.arguments,
                        })
                        .collect();

                    messages.push(AgentMessage::Assistant {
                        text: choice.message.content,
                        tool_calls: tool_calls.clone(),
                    });

                    for call in tool_calls {
                        tool_call_count += 1;
                        let (result, citations) = execute_tool(&call.name, &call.arguments, &self.tool_ctx).await?;
                        all_citations.extend(citations);
                        messages.push(AgentMessage::ToolResult {
                            tool_call_id: call.id.clone(),
                            content: result.clone(),
                        });
                        info!(tool = %call.name, result_length = result.len(), "agent tool call");
                    }
                }
                _ => {
                    let answer = choice.message.content.unwrap_or_default();
                    return Ok(AgentResponse {
                        answer,
                        citations: all_citations,
                        input_tokens,
                        output_tokens,
                        latency_ms: start.elapsed().as_secs_f64() * 1000.0,
                        tool_calls: tool_call_count,
                    });
                }
            }
        }

        warn!(tool_calls = tool_call_count, "agent loop exhausted max tool iterations");
        Ok(AgentResponse {
            answer: "I was unable to fully answer your question within the allowed number of \
                     search steps. Please try rephrasing or asking a more specific question."
                .to_string(),
            citations: all_citations,
            input_tokens,
            output_tokens,
            latency_ms: start.elapsed().as_secs_f64() * 1000.0,
            tool_calls: tool_call_count,
        })
    }

    fn build_request_messages(
        &self,
        history: &[AgentMessage],
    ) -> Result<Vec<async_openai::types::ChatCompletionRequestMessage>, AppError> {
        let mut messages = vec![ChatCompletionRequestSystemMessage::from(SYSTEM_PROMPT).into()];
        for message in history {
            messages.push(message.to_request_message()?);
        }
        Ok(messages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::utils::embedding::Embedder;
    use retrieval_pipeline::HybridSearchConfig;

    #[tokio::test]
    async fn build_request_messages_prepends_system_prompt() {
        let db = SurrealDbClient::memory("test", &uuid::Uuid::new_v4().to_string()).await.unwrap();
        db.apply_migrations().await.unwrap();
        let client = Client::with_config(OpenAIConfig::new());
        let embedder = Embedder::new(client.clone());
        let hybrid_config = HybridSearchConfig::default();
        let tool_ctx = ToolContext { db: &db, embedder: &embedder, sql_sandbox: None, hybrid_config: &hybrid_config, reranker_pool: None };
        let agent_loop = AgentLoop::new(&client, &db, tool_ctx);

        let history = vec![AgentMessage::User("hello".into())];
        let messages = agent_loop.build_request_messages(&history).unwrap();

        assert_eq!(messages.len(), 2);
        assert!(matches!(
            messages[0],
            async_openai::types::ChatCompletionRequestMessage::System(_)
        ));
    }
}
