use std::path::{Path, PathBuf};

use duckdb::types::Value as DuckValue;
use duckdb::Connection;
use regex::Regex;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{info, warn};

use crate::error::AppError;

/// Blocks anything but a read-only SELECT: DDL/DML keywords and statement chaining.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "CREATE", "ALTER", "TRUNCATE", "GRANT", "REVOKE", "EXEC",
    "EXECUTE", "COPY", "ATTACH", "DETACH", "PRAGMA", "INSTALL", "LOAD", "SET",
];

#[derive(Debug, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<JsonValue>>,
    pub row_count: usize,
    pub truncated: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum FileKind {
    Csv,
    Parquet,
    Json,
}

struct RegisteredTable {
    name: String,
    path: PathBuf,
    kind: FileKind,
}

/// Ad-hoc analytical SQL over tabular files registered from a configured
/// directory at startup. Creates a fresh in-memory DuckDB engine per query --
/// it is never shared across requests (§4.15, §5).
pub struct SqlSandbox {
    data_dir: Option<PathBuf>,
    max_rows: usize,
    forbidden_pattern: Regex,
}

impl SqlSandbox {
    pub fn new(data_dir: impl Into<PathBuf>, max_rows: usize) -> Self {
        let pattern = format!(r"(?i)\b({})\b", FORBIDDEN_KEYWORDS.join("|"));
        Self {
            data_dir: Some(data_dir.into()),
            max_rows,
            #[allow(clippy::expect_used)]
            forbidden_pattern: Regex::new(&pattern).expect("forbidden keyword pattern is valid"),
        }
    }

    fn registered_tables(&self) -> Vec<RegisteredTable> {
        let Some(dir) = self.data_dir.as_deref() else {
            return Vec::new();
        };
        let Ok(entries) = std::fs::read_dir(dir) else {
            return Vec::new();
        };

        let mut tables = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(kind) = classify(&path) else {
                continue;
            };
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let name = stem.to_lowercase().replace(['-', ' '], "_");
            tables.push(RegisteredTable { name, path, kind });
        }
        tables
    }

    /// Lists registered tables with their column schema and row counts.
    pub fn list_tables(&self) -> Result<Vec<JsonValue>, AppError> {
        let tables = self.registered_tables();
        let mut out = Vec::with_capacity(tables.len());

        for table in &tables {
            let conn = Connection::open_in_memory()?;
            let create = create_table_sql(table);
            match conn.execute_batch(&create) {
                Ok(()) => {
                    let count: i64 = conn
                        .query_row(&format!("SELECT count(*) FROM {}", table.name), [], |row| {
                            row.get(0)
                        })?;
                    out.push(serde_json::json!({
                        "table": table.name,
                        "file": table.path.file_name().and_then(|f| f.to_str()),
                        "row_count": count,
                    }));
                }
                Err(err) => {
                    out.push(serde_json::json!({
                        "table": table.name,
                        "file": table.path.file_name().and_then(|f| f.to_str()),
                        "error": err.to_string(),
                    }));
                }
            }
        }

        Ok(out)
    }

    /// Runs a single read-only `SELECT`, wrapped to cap rows at `max_rows + 1`
    /// so truncation is detectable, against a fresh ephemeral engine.
    pub fn execute_query(&self, sql: &str) -> Result<QueryResult, AppError> {
        if self.forbidden_pattern.is_match(sql) {
            return Err(AppError::Forbidden(
                "only SELECT queries are allowed; write operations are forbidden".into(),
            ));
        }

        let trimmed = sql.trim().trim_end_matches(';').trim();
        if trimmed.contains(';') {
            return Err(AppError::Forbidden(
                "multi-statement queries are not allowed".into(),
            ));
        }

        let tables = self.registered_tables();
        if tables.is_empty() {
            return Err(AppError::Validation(
                "no data files registered for the SQL sandbox".into(),
            ));
        }

        let conn = Connection::open_in_memory()?;
        for table in &tables {
            conn.execute_batch(&create_table_sql(table))?;
        }

        // Disable filesystem access once tables are materialized in memory.
        conn.execute_batch("SET enable_external_access = false;")?;

        let limited_sql = format!("SELECT * FROM ({trimmed}) AS sandboxed_query LIMIT {}", self.max_rows + 1);
        let mut stmt = conn.prepare(&limited_sql)?;
        let columns: Vec<String> = stmt.column_names();

        let mut rows = Vec::new();
        let mut query_rows = stmt.query([])?;
        while let Some(row) = query_rows.next()? {
            let mut values = Vec::with_capacity(columns.len());
            for idx in 0..columns.len() {
                let value: DuckValue = row.get(idx)?;
                values.push(duck_value_to_json(value));
            }
            rows.push(values);
        }

        let truncated = rows.len() > self.max_rows;
        if truncated {
            rows.truncate(self.max_rows);
        }

        info!(rows = rows.len(), truncated, "sql sandbox query executed");

        Ok(QueryResult {
            row_count: rows.len(),
            columns,
            rows,
            truncated,
        })
    }
}

fn classify(path: &Path) -> Option<FileKind> {
    match path.extension().and_then(|e| e.to_str())?.to_lowercase().as_str() {
        "csv" => Some(FileKind::Csv),
        "parquet" => Some(FileKind::Parquet),
        "json" => Some(FileKind::Json),
        _ => None,
    }
}

fn create_table_sql(table: &RegisteredTable) -> String {
    let reader = match table.kind {
        FileKind::Csv => "read_csv_auto",
        FileKind::Parquet => "read_parquet",
        FileKind::Json => "read_json_auto",
    };
    let path = table.path.to_string_lossy().replace('\'', "''");
    format!(
        "CREATE OR REPLACE TABLE {} AS SELECT * FROM {}('{}');",
        table.name, reader, path
    )
}

fn duck_value_to_json(value: DuckValue) -> JsonValue {
    match value {
        DuckValue::Null => JsonValue::Null,
        DuckValue::Boolean(b) => JsonValue::Bool(b),
        DuckValue::TinyInt(v) => JsonValue::from(v),
        DuckValue::SmallInt(v) => JsonValue::from(v),
        DuckValue::Int(v) => JsonValue::from(v),
        DuckValue::BigInt(v) => JsonValue::from(v),
        DuckValue::HugeInt(v) => JsonValue::from(v.to_string()),
        DuckValue::UTinyInt(v) => JsonValue::from(v),
        DuckValue::USmallInt(v) => JsonValue::from(v),
        DuckValue::UInt(v) => JsonValue::from(v),
        DuckValue::UBigInt(v) => JsonValue::from(v),
        DuckValue::Float(v) => serde_json::Number::from_f64(f64::from(v))
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        DuckValue::Double(v) => serde_json::Number::from_f64(v)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        DuckValue::Text(s) => JsonValue::String(s),
        other => {
            warn!(?other, "sql sandbox result value serialized via Debug fallback");
            JsonValue::String(format!("{other:?}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_csv(dir: &Path, name: &str, contents: &str) {
        let mut file = std::fs::File::create(dir.join(name)).unwrap();
        file.write_all(contents.as_bytes()).unwrap();
    }

    #[test]
    fn rejects_write_queries() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SqlSandbox::new(dir.path(), 100);
        let result = sandbox.execute_query("DROP TABLE foo");
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn rejects_multi_statement_queries() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SqlSandbox::new(dir.path(), 100);
        let result = sandbox.execute_query("SELECT 1; SELECT 2");
        assert!(matches!(result, Err(AppError::Forbidden(_))));
    }

    #[test]
    fn errors_when_no_tables_registered() {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = SqlSandbox::new(dir.path(), 100);
        let result = sandbox.execute_query("SELECT 1");
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[test]
    fn executes_select_over_registered_csv() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "people.csv", "name,age\nalice,30\nbob,40\n");
        let sandbox = SqlSandbox::new(dir.path(), 100);

        let result = sandbox
            .execute_query("SELECT name, age FROM people ORDER BY age")
            .unwrap();

        assert_eq!(result.columns, vec!["name", "age"]);
        assert_eq!(result.row_count, 2);
        assert!(!result.truncated);
    }

    #[test]
    fn truncates_when_exceeding_max_rows() {
        let dir = tempfile::tempdir().unwrap();
        write_csv(dir.path(), "nums.csv", "n\n1\n2\n3\n4\n5\n");
        let sandbox = SqlSandbox::new(dir.path(), 2);

        let result = sandbox.execute_query("SELECT n FROM nums").unwrap();
        assert_eq!(result.row_count, 2);
        assert!(result.truncated);
    }
}
