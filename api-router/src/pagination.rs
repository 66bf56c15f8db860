use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use common::error::AppError;

/// Opaque keyset pagination token: the last row's id and sort value,
/// base64url-encoded JSON. Grounded on the offset-based `Pagination` helper
/// in `html-router/src/utils/pagination.rs`, adapted to a keyset cursor per
/// spec.md §6/§9 ("keyset cursor ... enables stable ordering without offset
/// scans").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cursor {
    pub id: String,
    pub sv: String,
}

impl Cursor {
    pub fn new(id: impl Into<String>, sort_value: impl Into<String>) -> Self {
        Self { id: id.into(), sv: sort_value.into() }
    }

    pub fn encode(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        URL_SAFE_NO_PAD.encode(json)
    }

    pub fn decode(token: &str) -> Result<Self, AppError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|err| AppError::Validation(format!("invalid cursor: {err}")))?;
        serde_json::from_slice(&bytes).map_err(|err| AppError::Validation(format!("invalid cursor: {err}")))
    }
}

/// `{items, total, cursor}` page shape every keyset-paginated endpoint
/// returns -- `cursor` is the opaque token for the next page, or empty once
/// there isn't one, matching spec.md §6's pagination contract.
#[derive(Debug, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub cursor: String,
}

impl<T> Page<T> {
    /// Builds a page from a result set fetched with `limit + 1` rows: the
    /// extra row (if present) is dropped and signals there's a next page,
    /// whose cursor is derived from the last row kept.
    pub fn new(mut items: Vec<T>, limit: usize, total: i64, sort_value: impl Fn(&T) -> (String, String)) -> Self {
        let has_more = items.len() > limit;
        items.truncate(limit);

        let cursor = if has_more {
            items.last().map(|item| {
                let (id, sv) = sort_value(item);
                Cursor::new(id, sv).encode()
            })
        } else {
            None
        };

        Self { items, total, cursor: cursor.unwrap_or_default() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_round_trips() {
        let cursor = Cursor::new("doc-123", "2026-01-01T00:00:00Z");
        let token = cursor.encode();
        let decoded = Cursor::decode(&token).unwrap();
        assert_eq!(decoded, cursor);
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(Cursor::decode("not valid base64!!").is_err());
    }

    #[test]
    fn re_encoding_a_decoded_cursor_is_the_identity() {
        let cursor = Cursor::new("doc-456", "42");
        let token = cursor.encode();
        let round_tripped = Cursor::decode(&token).unwrap().encode();
        assert_eq!(token, round_tripped);
    }

    #[test]
    fn page_has_empty_cursor_when_fewer_rows_than_limit_plus_one() {
        let page = Page::new(vec!["a", "b"], 5, 2, |s| (s.to_string(), s.to_string()));
        assert_eq!(page.items, vec!["a", "b"]);
        assert_eq!(page.cursor, "");
    }

    #[test]
    fn page_truncates_and_sets_cursor_when_an_extra_row_is_present() {
        let page = Page::new(vec!["a", "b", "c"], 2, 3, |s| (s.to_string(), s.to_string()));
        assert_eq!(page.items, vec!["a", "b"]);
        assert!(!page.cursor.is_empty());
        assert_eq!(Cursor::decode(&page.cursor).unwrap().id, "b");
    }
}
