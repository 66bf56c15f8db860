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
use serde_json::json;
use tracing::debug;

const EXTRACTION_SYSTEM_MESSAGE: &str = "You extract entities and relationships from a passage \
of business knowledge so they can be stored in a knowledge graph. Entities are concrete things \
a reader would want to look up again: people, organizations, products, systems, projects, \
policies. Relationships describe a fact connecting two entities, grounded in the passage's \
wording. Only extract what the text actually states. Names must be normalized (e.g. full names, \
canonical casing) so the same entity mentioned twice resolves to one name.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelation {
    pub source: String,
    pub target: String,
    pub relationship: String,
    pub fact: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EntityExtraction {
    #[serde(default)]
    pub entities: Vec<ExtractedEntity>,
    #[serde(default)]
    pub relations: Vec<ExtractedRelation>,
}

fn extraction_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "entity_type": { "type": "string" },
                        "description": { "type": "string" }
                    },
                    "required": ["name", "entity_type", "description"],
                    "additionalProperties": false
                }
            },
            "relations": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "source": { "type": "string" },
                        "target": { "type": "string" },
                        "relationship": { "type": "string" },
                        "fact": { "type": "string" }
                    },
                    "required": ["source", "target", "relationship", "fact"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["entities", "relations"],
        "additionalProperties": false
    })
}

/// Mines entities and relationships out of an episode's text via a single
/// structured-output chat completion. Returns an empty extraction (never an
/// error) when the model reports nothing found in the passage.
pub async fn extract_entities(
    openai_client: &Client<OpenAIConfig>,
    text: &str,
    entity_types: &[String],
) -> Result<EntityExtraction, AppError> {
    let type_hint = if entity_types.is_empty() {
        "Use whatever entity types fit the content.".to_string()
    } else {
        format!("Prefer these entity types where they fit: {}.", entity_types.join(", "))
    };
    let user_message = format!("{type_hint}\n\nPassage:\n{text}");

    let response_format = ResponseFormat::JsonSchema {
        json_schema: ResponseFormatJsonSchema {
            description: Some("Entities and relationships mentioned in the passage".into()),
            name: "entity_extraction".into(),
            schema: Some(extraction_schema()),
            strict: Some(true),
        },
    };

    let request = CreateChatCompletionRequestArgs::default()
        .model("gpt-4o-mini")
        .temperature(0.0)
        .max_tokens(2048u32)
        .messages([
            ChatCompletionRequestSystemMessage::from(EXTRACTION_SYSTEM_MESSAGE).into(),
            ChatCompletionRequestUserMessage::from(user_message).into(),
        ])
        .response_format(response_format)
        .build()?;

    let response = openai_client.chat().create(request).await?;
    debug!("received entity extraction response: {:?}", response);

    let content = response
        .choices
        .first()
        .and_then(|choice| choice.message.content.as_ref())
        .ok_or_else(|| AppError::TransientUpstream("empty entity extraction response".into()))?;

    serde_json::from_str(content)
        .map_err(|e| AppError::Internal(format!("failed to parse entity extraction response: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extraction_schema_requires_entities_and_relations() {
        let schema = extraction_schema();
        let required = schema["required"].as_array().unwrap();
        assert!(required.contains(&json!("entities")));
        assert!(required.contains(&json!("relations")));
    }

    #[test]
    fn empty_extraction_deserializes_from_minimal_json() {
        let extraction: EntityExtraction = serde_json::from_str("{}").unwrap();
        assert!(extraction.entities.is_empty());
        assert!(extraction.relations.is_empty());
    }
}
