use std::sync::Arc;

use async_openai::types::{ChatCompletionTool, ChatCompletionToolArgs, ChatCompletionToolType, FunctionObjectArgs};
use serde_json::{json, Value};
use tracing::info;

use common::{
    error::AppError,
    sql_sandbox::SqlSandbox,
    storage::{
        db::SurrealDbClient,
        types::{
            document::Document, extracted_entity::ExtractedEntity, segment::Segment,
            sync_log::SyncLog, system_settings::SystemSettings,
        },
    },
    utils::embedding::Embedder,
};
use retrieval_pipeline::{hybrid_search, reranking::RerankerPool, HybridSearchConfig};

use crate::messages::Citation;

const DEFAULT_SEARCH_TOP_K: usize = 10;
const DEFAULT_CHANGE_HISTORY_LIMIT: usize = 20;
const DEFAULT_ENTITY_SEARCH_LIMIT: usize = 10;

/// Per-call dependencies a tool implementation needs. Borrowed for the
/// duration of one `execute_tool` call; nothing here outlives the agent loop
/// invocation that owns it.
pub struct ToolContext<'a> {
    pub db: &'a SurrealDbClient,
    pub embedder: &'a Embedder,
    pub sql_sandbox: Option<&'a SqlSandbox>,
    pub hybrid_config: &'a HybridSearchConfig,
    pub reranker_pool: Option<&'a Arc<RerankerPool>>,
}

/// The five tools offered to the model, schema-for-schema grounded on the
/// original agent's tool catalogue.
pub fn tool_definitions() -> Result<Vec<ChatCompletionTool>, AppError> {
    let specs = [
        (
            "search_knowledge",
            "Search the business knowledge base for relevant information. Use this to find \
             definitions, processes, metrics, documentation, and any business knowledge. Returns \
             relevant text segments with source citations. Be specific in your query and include \
             key terms.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query. Be specific and include key terms relevant to the question."
                    },
                    "source_type": {
                        "type": "string",
                        "description": "Optional: filter results by connector source type."
                    }
                },
                "required": ["query"]
            }),
        ),
        (
            "get_document_context",
            "Fetch the full content of a specific document for deep reading. Use this when you \
             need the complete context of a document, not just search snippets. Provide either \
             the document title or source ID.",
            json!({
                "type": "object",
                "properties": {
                    "document_title": {
                        "type": "string",
                        "description": "The title of the document to fetch."
                    },
                    "source_id": {
                        "type": "string",
                        "description": "The source ID of the document (e.g. file path or connector entry id)."
                    }
                }
            }),
        ),
        (
            "get_change_history",
            "Query the sync log to see recent changes to documents. Shows what was ingested, \
             updated, or deleted and when. Useful for answering questions like 'what changed \
             recently?' or 'when was X last updated?'",
            json!({
                "type": "object",
                "properties": {
                    "document_title": {
                        "type": "string",
                        "description": "Optional: filter changes for a specific document title."
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum number of change records to return. Default: 20."
                    }
                }
            }),
        ),
        (
            "query_database",
            "Run SQL queries against registered data files (CSV, Parquet, JSON) using an \
             analytical SQL engine. Use this for analytical questions about data: aggregations, \
             filtering, joins, etc. The query must be a read-only SELECT statement.",
            json!({
                "type": "object",
                "properties": {
                    "sql": {
                        "type": "string",
                        "description": "A read-only SQL SELECT query to execute."
                    },
                    "list_tables": {
                        "type": "boolean",
                        "description": "Set to true to list all available tables and their schemas instead of running a query."
                    }
                }
            }),
        ),
        (
            "search_entities",
            "Search for structured business entities extracted from documents. Entities include \
             metric definitions, event tracking specs, and KPI targets. Use this for precise \
             lookups of business definitions, formulas, and targets.",
            json!({
                "type": "object",
                "properties": {
                    "entity_type": {
                        "type": "string",
                        "description": "Optional: filter by entity type."
                    },
                    "search_term": {
                        "type": "string",
                        "description": "Search term to match against entity data."
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum results to return. Default: 10."
                    }
                },
                "required": ["search_term"]
            }),
        ),
    ];

    specs
        .into_iter()
        .map(|(name, description, parameters)| {
            let function = FunctionObjectArgs::default()
                .name(name)
                .description(description)
                .parameters(parameters)
                .build()
                .map_err(|err| AppError::Internal(format!("failed to build tool schema for {name}: {err}")))?;
            ChatCompletionToolArgs::default()
                .r#type(ChatCompletionToolType::Function)
                .function(function)
                .build()
                .map_err(|err| AppError::Internal(format!("failed to build tool definition for {name}: {err}")))
        })
        .collect()
}

/// Runs a tool call by name, returning its result text for the model plus
/// any citations it surfaced. An unrecognized tool name is not an error --
/// it's handed back to the model as plain text, same as every other tool
/// result, so the model can recover by trying a different name.
pub async fn execute_tool(
    name: &str,
    arguments_json: &str,
    ctx: &ToolContext<'_>,
) -> Result<(String, Vec<Citation>), AppError> {
    let input: Value = serde_json::from_str(arguments_json).unwrap_or(Value::Null);

    let (result, citations) = match name {
        "search_knowledge" => search_knowledge(&input, ctx).await?,
        "get_document_context" => get_document_context(&input, ctx).await?,
        "get_change_history" => get_change_history(&input, ctx).await?,
        "query_database" => query_database(&input, ctx),
        "search_entities" => search_entities(&input, ctx).await?,
        other => (format!("Unknown tool: {other}"), Vec::new()),
    };

    info!(tool = name, result_length = result.len(), "agent tool call executed");
    Ok((result, citations))
}

async fn search_knowledge(input: &Value, ctx: &ToolContext<'_>) -> Result<(String, Vec<Citation>), AppError> {
    let Some(query) = input.get("query").and_then(Value::as_str) else {
        return Ok(("Please provide a query.".into(), Vec::new()));
    };

    let settings = SystemSettings::get_current(ctx.db).await?;
    let query_embedding = ctx.embedder.embed(query, &settings.embedding_model, settings.embedding_dimensions).await?;

    let lease = match ctx.reranker_pool {
        Some(pool) => Some(pool.checkout().await),
        None => None,
    };
    let hits = hybrid_search(
        ctx.db,
        query,
        query_embedding,
        DEFAULT_SEARCH_TOP_K,
        ctx.hybrid_config,
        lease.as_ref(),
    )
    .await?;
    let source_type_filter = input.get("source_type").and_then(Value::as_str);

    let mut citations = Vec::with_capacity(hits.len());
    let mut parts = Vec::new();
    for hit in &hits {
        let document: Document = ctx
            .db
            .get_item(&hit.segment.document_id)
            .await?
            .ok_or_else(|| AppError::Internal(format!("segment {} references a missing document", hit.segment.id)))?;

        if let Some(filter) = source_type_filter {
            if document.source_type != filter {
                continue;
            }
        }

        citations.push(Citation {
            document_title: Some(document.title.clone()),
            section_path: hit.segment.section_path.clone(),
            source_url: document.source_url.clone(),
            segment_id: Some(hit.segment.id.clone()),
        });

        let mut source_label = document.title.clone();
        if let Some(section) = &hit.segment.section_path {
            source_label.push_str(" > ");
            source_label.push_str(section);
        }
        let url_part = document.source_url.as_deref().map(|url| format!(" ({url})")).unwrap_or_default();
        parts.push(format!("[Result {}] Source: {source_label}{url_part}\n{}", parts.len() + 1, hit.segment.content));
    }

    if parts.is_empty() {
        return Ok(("No relevant results found for this query.".into(), Vec::new()));
    }

    Ok((parts.join("\n\n---\n\n"), citations))
}

async fn get_document_context(input: &Value, ctx: &ToolContext<'_>) -> Result<(String, Vec<Citation>), AppError> {
    let title = input.get("document_title").and_then(Value::as_str);
    let source_id = input.get("source_id").and_then(Value::as_str);

    let Some(document) = (match (title, source_id) {
        (Some(title), _) => Document::find_by_title(title, ctx.db).await?,
        (None, Some(source_id)) => Document::find_by_source_id(source_id, ctx.db).await?,
        (None, None) => return Ok(("Please provide either document_title or source_id.".into(), Vec::new())),
    }) else {
        let label = title.or(source_id).unwrap_or("unknown");
        return Ok((format!("Document not found: {label}"), Vec::new()));
    };

    let segments = Segment::list_by_document(&document.id, ctx.db).await?;
    let full_content = segments.iter().map(|segment| segment.content.as_str()).collect::<Vec<_>>().join("\n\n");

    let citation = Citation {
        document_title: Some(document.title.clone()),
        section_path: None,
        source_url: document.source_url.clone(),
        segment_id: None,
    };

    let header = format!("Document: {}\nSource: {}\nSegments: {}\n\n", document.title, document.source_id, segments.len());
    Ok((header + &full_content, vec![citation]))
}

async fn get_change_history(input: &Value, ctx: &ToolContext<'_>) -> Result<(String, Vec<Citation>), AppError> {
    let limit = input.get("limit").and_then(Value::as_u64).map(|n| n as usize).unwrap_or(DEFAULT_CHANGE_HISTORY_LIMIT);
    let title = input.get("document_title").and_then(Value::as_str);

    let logs = if let Some(title) = title {
        let document_ids = Document::find_ids_by_title(title, ctx.db).await?;
        let mut logs = Vec::new();
        for document_id in document_ids {
            logs.extend(SyncLog::recent(Some(&document_id), limit, ctx.db).await?);
        }
        logs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        logs.truncate(limit);
        logs
    } else {
        SyncLog::recent(None, limit, ctx.db).await?
    };

    if logs.is_empty() {
        return Ok(("No change history found.".into(), Vec::new()));
    }

    let parts: Vec<String> = logs
        .iter()
        .map(|log| {
            format!(
                "- [{}] {} | segments_affected: {} | details: {}",
                log.created_at,
                log.action,
                log.segments_affected.map(|n| n.to_string()).unwrap_or_else(|| "N/A".into()),
                log.details,
            )
        })
        .collect();

    Ok((format!("Recent changes ({} records):\n{}", logs.len(), parts.join("\n")), Vec::new()))
}

fn query_database(input: &Value, ctx: &ToolContext<'_>) -> (String, Vec<Citation>) {
    let Some(sandbox) = ctx.sql_sandbox else {
        return ("SQL sandbox not configured for this deployment.".into(), Vec::new());
    };

    if input.get("list_tables").and_then(Value::as_bool).unwrap_or(false) {
        return match sandbox.list_tables() {
            Ok(tables) if tables.is_empty() => ("No data tables registered.".into(), Vec::new()),
            Ok(tables) => {
                let parts: Vec<String> = tables
                    .iter()
                    .map(|table| {
                        if let Some(error) = table.get("error").and_then(Value::as_str) {
                            format!("- {} ({}): ERROR - {error}", table["table"], table["file"])
                        } else {
                            format!("- {} ({}, {} rows)", table["table"], table["file"], table["row_count"])
                        }
                    })
                    .collect();
                (format!("Available tables:\n{}", parts.join("\n")), Vec::new())
            }
            Err(err) => (format!("Failed to list tables: {err}"), Vec::new()),
        };
    }

    let Some(sql) = input.get("sql").and_then(Value::as_str) else {
        return ("Please provide either 'sql' query or set 'list_tables' to true.".into(), Vec::new());
    };

    match sandbox.execute_query(sql) {
        Ok(result) => {
            let header = result.columns.join(" | ");
            let separator = result.columns.iter().map(|_| "---").collect::<Vec<_>>().join(" | ");
            let body = result
                .rows
                .iter()
                .map(|row| row.iter().map(value_to_cell).collect::<Vec<_>>().join(" | "))
                .collect::<Vec<_>>()
                .join("\n");
            let truncated_note = if result.truncated { "\n(Results truncated)" } else { "" };
            (
                format!("{header}\n{separator}\n{body}{truncated_note}\n\n({} rows)", result.row_count),
                Vec::new(),
            )
        }
        Err(err) => (format!("Query error: {err}"), Vec::new()),
    }
}

fn value_to_cell(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "NULL".into(),
        other => other.to_string(),
    }
}

async fn search_entities(input: &Value, ctx: &ToolContext<'_>) -> Result<(String, Vec<Citation>), AppError> {
    let entity_type = input.get("entity_type").and_then(Value::as_str);
    let search_term = input.get("search_term").and_then(Value::as_str);
    let limit = input.get("limit").and_then(Value::as_u64).map(|n| n as usize).unwrap_or(DEFAULT_ENTITY_SEARCH_LIMIT);

    let entities = ExtractedEntity::search(entity_type, search_term, limit, ctx.db).await?;
    if entities.is_empty() {
        return Ok(("No matching entities found.".into(), Vec::new()));
    }

    let parts: Vec<String> = entities
        .iter()
        .map(|entity| {
            format!(
                "[{}] (confidence: {:.1}%)\n{}",
                entity.entity_type,
                entity.confidence * 100.0,
                serde_json::to_string_pretty(&entity.entity_data).unwrap_or_default(),
            )
        })
        .collect();

    Ok((format!("Found {} entities:\n\n{}", entities.len(), parts.join("\n\n---\n\n")), Vec::new()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_definitions_build_for_every_tool() {
        let tools = tool_definitions().unwrap();
        assert_eq!(tools.len(), 5);
        let names: Vec<&str> = tools.iter().map(|tool| tool.function.name.as_str()).collect();
        assert!(names.contains(&"search_knowledge"));
        assert!(names.contains(&"query_database"));
        assert!(names.contains(&"search_entities"));
    }

    #[tokio::test]
    async fn query_database_without_sandbox_reports_not_configured() {
        let db = SurrealDbClient::memory("test", &uuid::Uuid::new_v4().to_string()).await.unwrap();
        db.apply_migrations().await.unwrap();
        let embedder = Embedder::new(async_openai::Client::with_config(async_openai::config::OpenAIConfig::new()));
        let hybrid_config = HybridSearchConfig::default();
        let ctx = ToolContext { db: &db, embedder: &embedder, sql_sandbox: None, hybrid_config: &hybrid_config, reranker_pool: None };

        let (result, citations) = query_database(&Value::Null, &ctx);
        assert!(result.contains("not configured"));
        assert!(citations.is_empty());
    }

    #[tokio::test]
    async fn execute_tool_reports_unknown_tool_name_without_erroring() {
        let db = SurrealDbClient::memory("test", &uuid::Uuid::new_v4().to_string()).await.unwrap();
        db.apply_migrations().await.unwrap();
        let embedder = Embedder::new(async_openai::Client::with_config(async_openai::config::OpenAIConfig::new()));
        let hybrid_config = HybridSearchConfig::default();
        let ctx = ToolContext { db: &db, embedder: &embedder, sql_sandbox: None, hybrid_config: &hybrid_config, reranker_pool: None };

        let (result, citations) = execute_tool("does_not_exist", "{}", &ctx).await.unwrap();
        assert_eq!(result, "Unknown tool: does_not_exist");
        assert!(citations.is_empty());
    }
}
