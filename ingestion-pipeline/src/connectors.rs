use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::utils::fingerprint::hash_bytes;
use thiserror::Error;

/// One entry from `Connector::list`: enough to decide whether a document
/// needs re-fetching without pulling its content.
#[derive(Debug, Clone)]
pub struct ConnectorEntry {
    pub source_id: String,
    pub title: String,
    pub owner: Option<String>,
    pub source_url: Option<String>,
    pub modified_at: Option<DateTime<Utc>>,
}

/// The bytes and metadata for one fetched document.
#[derive(Debug, Clone)]
pub struct FetchedDocument {
    pub content: Vec<u8>,
    pub content_type: String,
    pub source_id: String,
    pub title: String,
    pub source_url: Option<String>,
    pub owner: Option<String>,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("document not found: {0}")]
    NotFound(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("transient connector error: {0}")]
    Transient(String),
    #[error("path escapes configured ingest root: {0}")]
    PathEscape(String),
}

/// Source of ingestible documents, polymorphic over the capability set
/// {list, fetch, cheap_hash}. A connector never touches the rel store or
/// any other pipeline stage -- it only knows how to enumerate and fetch.
#[async_trait]
pub trait Connector: Send + Sync {
    fn source_type(&self) -> &'static str;

    async fn list(&self) -> Result<Vec<ConnectorEntry>, ConnectorError>;

    async fn fetch(&self, source_id: &str) -> Result<FetchedDocument, ConnectorError>;

    /// Cheap hash for a source_id, used to skip a full fetch when the
    /// connector can answer without retrieving content (e.g. a provider's
    /// server-side checksum). The local filesystem connector has no such
    /// shortcut and always falls back to hashing the fetched bytes.
    async fn cheap_hash(&self, source_id: &str) -> Result<String, ConnectorError> {
        let fetched = self.fetch(source_id).await?;
        Ok(hash_bytes(&fetched.content))
    }
}

/// Walks a directory tree under a configured root, filtering by extension.
/// Refuses any `source_id` that resolves outside the root -- the
/// canonicalize-then-prefix-check idiom from
/// `common::storage::store::StorageManager::resolve_local_path`.
pub struct LocalFsConnector {
    root: PathBuf,
    allowed_extensions: Vec<String>,
}

impl LocalFsConnector {
    pub fn new(root: impl Into<PathBuf>, allowed_extensions: Vec<String>) -> Self {
        Self {
            root: root.into(),
            allowed_extensions,
        }
    }

    /// Resolves `source_id` (a path relative to `root`) to an absolute path,
    /// rejecting `..`/absolute components before touching the filesystem and
    /// rejecting any canonicalized result that escapes `root` after symlinks
    /// are followed.
    fn resolve(&self, source_id: &str) -> Result<PathBuf, ConnectorError> {
        let relative = Path::new(source_id);
        if relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(ConnectorError::PathEscape(source_id.to_owned()));
        }

        let candidate = self.root.join(relative);
        let canonical_root = self
            .root
            .canonicalize()
            .map_err(|e| ConnectorError::Transient(format!("resolving ingest root: {e}")))?;
        let canonical_candidate = candidate.canonicalize().map_err(|e| {
            ConnectorError::NotFound(format!("{source_id} ({e})"))
        })?;

        if !canonical_candidate.starts_with(&canonical_root) {
            return Err(ConnectorError::PathEscape(source_id.to_owned()));
        }

        Ok(canonical_candidate)
    }

    fn is_allowed_extension(&self, path: &Path) -> bool {
        if self.allowed_extensions.is_empty() {
            return true;
        }
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.allowed_extensions
                    .iter()
                    .any(|allowed| allowed.eq_ignore_ascii_case(ext))
            })
    }

    fn content_type_for(path: &Path) -> String {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("md") || ext.eq_ignore_ascii_case("markdown") => {
                "text/markdown".to_string()
            }
            Some(ext) if ext.eq_ignore_ascii_case("pdf") => "application/pdf".to_string(),
            Some(ext) => format!("application/{}", ext.to_lowercase()),
            None => "application/octet-stream".to_string(),
        }
    }
}

#[async_trait]
impl Connector for LocalFsConnector {
    fn source_type(&self) -> &'static str {
        "local_fs"
    }

    async fn list(&self) -> Result<Vec<ConnectorEntry>, ConnectorError> {
        let root = self.root.clone();
        let allowed = self.allowed_extensions.clone();
        tokio::task::spawn_blocking(move || walk_dir(&root, &root, &allowed))
            .await
            .map_err(|e| ConnectorError::Transient(format!("walk task join error: {e}")))?
    }

    async fn fetch(&self, source_id: &str) -> Result<FetchedDocument, ConnectorError> {
        let path = self.resolve(source_id)?;
        if !self.is_allowed_extension(&path) {
            return Err(ConnectorError::NotFound(source_id.to_owned()));
        }

        let content = tokio::fs::read(&path)
            .await
            .map_err(|e| ConnectorError::NotFound(format!("{source_id} ({e})")))?;

        let title = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(source_id)
            .to_string();

        Ok(FetchedDocument {
            content_type: Self::content_type_for(&path),
            content,
            source_id: source_id.to_owned(),
            title,
            source_url: Some(path.display().to_string()),
            owner: None,
            metadata: serde_json::Value::Object(Default::default()),
        })
    }
}

fn walk_dir(
    root: &Path,
    dir: &Path,
    allowed_extensions: &[String],
) -> Result<Vec<ConnectorEntry>, ConnectorError> {
    let mut entries = Vec::new();
    let read_dir = std::fs::read_dir(dir)
        .map_err(|e| ConnectorError::Transient(format!("reading {}: {e}", dir.display())))?;

    for entry in read_dir {
        let entry =
            entry.map_err(|e| ConnectorError::Transient(format!("reading dir entry: {e}")))?;
        let path = entry.path();

        if path.is_dir() {
            entries.extend(walk_dir(root, &path, allowed_extensions)?);
            continue;
        }

        if !allowed_extensions.is_empty() {
            let matches = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| {
                    allowed_extensions
                        .iter()
                        .any(|allowed| allowed.eq_ignore_ascii_case(ext))
                });
            if !matches {
                continue;
            }
        }

        let source_id = path
            .strip_prefix(root)
            .unwrap_or(&path)
            .to_string_lossy()
            .replace('\\', "/");

        let modified_at = entry
            .metadata()
            .ok()
            .and_then(|m| m.modified().ok())
            .map(DateTime::<Utc>::from);

        let title = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&source_id)
            .to_string();

        entries.push(ConnectorEntry {
            source_id,
            title,
            owner: None,
            source_url: Some(path.display().to_string()),
            modified_at,
        });
    }

    Ok(entries)
}

/// Stub proving the `Connector` trait is narrow enough to add a remote
/// source without touching the ingestion pipeline. The wire protocol for an
/// actual Google Drive integration is out of scope (spec.md treats remote
/// connectors as an external collaborator).
pub struct GoogleDriveConnector {
    pub folder_id: String,
}

#[async_trait]
impl Connector for GoogleDriveConnector {
    fn source_type(&self) -> &'static str {
        "google_drive"
    }

    async fn list(&self) -> Result<Vec<ConnectorEntry>, ConnectorError> {
        Err(ConnectorError::Transient(format!(
            "google drive connector not wired up for folder {}",
            self.folder_id
        )))
    }

    async fn fetch(&self, source_id: &str) -> Result<FetchedDocument, ConnectorError> {
        Err(ConnectorError::Transient(format!(
            "google drive connector not wired up for {source_id}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn list_walks_directory_and_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), b"# A").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"ignored").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/c.md"), b"# C").unwrap();

        let connector = LocalFsConnector::new(dir.path(), vec!["md".to_string()]);
        let mut entries = connector.list().await.unwrap();
        entries.sort_by(|a, b| a.source_id.cmp(&b.source_id));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].source_id, "a.md");
        assert_eq!(entries[1].source_id, "sub/c.md");
    }

    #[tokio::test]
    async fn fetch_rejects_parent_dir_escape() {
        let dir = tempfile::tempdir().unwrap();
        let connector = LocalFsConnector::new(dir.path(), vec!["md".to_string()]);
        let result = connector.fetch("../outside.md").await;
        assert!(matches!(result, Err(ConnectorError::PathEscape(_))));
    }

    #[tokio::test]
    async fn fetch_returns_content_and_type() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc.md"), b"# Hello").unwrap();

        let connector = LocalFsConnector::new(dir.path(), vec!["md".to_string()]);
        let fetched = connector.fetch("doc.md").await.unwrap();
        assert_eq!(fetched.content, b"# Hello");
        assert_eq!(fetched.content_type, "text/markdown");
    }

    #[tokio::test]
    async fn cheap_hash_matches_fetched_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("doc.md"), b"stable content").unwrap();

        let connector = LocalFsConnector::new(dir.path(), vec!["md".to_string()]);
        let fetched = connector.fetch("doc.md").await.unwrap();
        let hash = connector.cheap_hash("doc.md").await.unwrap();
        assert_eq!(hash, hash_bytes(&fetched.content));
    }
}
