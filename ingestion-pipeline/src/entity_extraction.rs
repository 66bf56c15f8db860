use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use common::error::AppError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

const EXTRACTION_SYSTEM_MESSAGE: &str = "You are an entity extraction system. Extract structured business \
entities from the given text: metric definitions, analytics event tracking specs, and KPI targets. Only \
extract entities that are clearly present in the text -- never infer or guess. If nothing in the text \
matches one of these shapes, return an empty list.";

const MAX_INPUT_CHARS: usize = 4000;
const SOURCE_TEXT_PREVIEW_CHARS: usize = 500;

/// One entity surfaced by a single extraction call, still carrying its
/// untyped `entity_data` payload -- the caller attaches `document_id` and
/// `segment_id` before persisting it as `common::storage::types::extracted_entity::ExtractedEntity`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawExtractedEntity {
    pub entity_type: String,
    pub entity_data: Value,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

fn default_confidence() -> f32 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct ExtractionResponse {
    #[serde(default)]
    entities: Vec<RawExtractedEntity>,
}

fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "entity_type": {
                            "type": "string",
                            "enum": ["metric_definition", "event_tracking_spec", "kpi_target"]
                        },
                        "entity_data": { "type": "object" },
                        "confidence": { "type": "number" }
                    },
                    "required": ["entity_type", "entity_data", "confidence"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["entities"],
        "additionalProperties": false
    })
}

/// Extracts structured business entities from one text segment via a single
/// structured-output chat completion. Returns an empty list (never an error)
/// when the model finds nothing, or when the segment is blank.
pub async fn extract_from_text(
    openai_client: &Client<OpenAIConfig>,
    model: &str,
    text: &str,
) -> Result<Vec<RawExtractedEntity>, AppError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let truncated: String = text.chars().take(MAX_INPUT_CHARS).collect();
    let user_message = format!("Text to analyze:\n---\n{truncated}\n---");

    let response_format = ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: Some("Structured business entities mentioned in the text".into()),
            name: "business_entity_extraction".into(),
            schema: Some(extraction_schema()),
            strict: Some(true),
        },
    };

    let request = CreateChatCompletionRequestArgs::default()
        .model(model)
        .temperature(0.0)
        .max_tokens(2048u32)
        .messages([
            ChatCompletionRequestSystemMessage::from(EXTRACTION_SYSTEM_MESSAGE).into(),
            ChatCompletionRequestUserMessage::from(user_message).into(),
        ])
        .response_format(response_format)
        .build()?;

    let response = openai_client.chat().create(request).await?;
    debug!("received business entity extraction response: {:?}", response);

    let content = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_ref())
        .ok_or_else(|| AppError::TransientUpstream("empty entity extraction response".into()))?;

    let parsed: ExtractionResponse = serde_json::from_str(content)
        .map_err(|e| AppError::Internal(format!("failed to parse entity extraction response: {e}")))?;

    Ok(parsed.entities)
}

/// Truncates a segment's content to the preview length stored alongside each
/// extracted entity for grounding.
pub fn source_text_preview(text: &str) -> String {
    text.chars().take(SOURCE_TEXT_PREVIEW_CHARS).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_schema_requires_entities() {
        let schema = extraction_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("entities")));
    }

    #[test]
    fn empty_response_deserializes_to_no_entities() {
        let response: ExtractionResponse = serde_json::from_str("{}").unwrap();
        assert!(response.entities.is_empty());
    }

    #[test]
    fn source_text_preview_truncates_long_text() {
        let text = "x".repeat(SOURCE_TEXT_PREVIEW_CHARS + 100);
        let preview = source_text_preview(&text);
        assert_eq!(preview.chars().count(), SOURCE_TEXT_PREVIEW_CHARS);
    }
}
