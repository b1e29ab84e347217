//! Scroll API contract.
//!
//! A scroll is a stateful, resumable cursor over the id list matching a
//! query. The cursor for one command is single-owner: the keep-alive /
//! cursor-id protocol is enforced by the backing query engine, not here.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// One page of a scroll; empty `ids` signals exhaustion
#[derive(Debug, Clone, PartialEq)]
pub struct ScrollPage {
    pub ids: Vec<String>,
    pub scroll_id: String,
}

/// Scroll failures; invalid queries degrade to an empty match upstream
#[derive(Debug, Error)]
pub enum ScrollError {
    /// Query cannot be parsed or targets an unknown source
    #[error("invalid query: {message}")]
    InvalidQuery { message: String },

    /// Cursor expired or was never issued
    #[error("unknown scroll cursor: {scroll_id}")]
    UnknownCursor { scroll_id: String },

    /// Backend failure
    #[error("scroll backend error: {message}")]
    Backend { message: String },
}

impl ScrollError {
    pub fn invalid_query<S: Into<String>>(message: S) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }
}

/// Paged id cursor over an arbitrary query
#[async_trait]
pub trait DocumentScroller: Send + Sync {
    /// Open a cursor for `query`, returning the first page
    async fn scroll(
        &self,
        query: &str,
        batch_size: usize,
        keep_alive: Duration,
    ) -> Result<ScrollPage, ScrollError>;

    /// Fetch the next page of an open cursor
    async fn scroll_next(&self, scroll_id: &str) -> Result<ScrollPage, ScrollError>;
}

/// Fixture scroller serving preloaded id sets per query string.
/// Unknown queries fail with `InvalidQuery`, like a parse error would.
#[derive(Debug, Default)]
pub struct MemoryScroller {
    results: DashMap<String, Vec<String>>,
    cursors: DashMap<String, Cursor>,
}

#[derive(Debug, Clone)]
struct Cursor {
    query: String,
    offset: usize,
    batch_size: usize,
}

impl MemoryScroller {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the id set a query matches
    pub fn load<S: Into<String>>(&self, query: S, ids: Vec<String>) {
        self.results.insert(query.into(), ids);
    }

    /// Register a query matching `count` synthetic ids (`doc-0`..`doc-n`)
    pub fn load_synthetic<S: Into<String>>(&self, query: S, count: usize) {
        let ids = (0..count).map(|i| format!("doc-{i}")).collect();
        self.load(query, ids);
    }

    fn page(&self, query: &str, offset: usize, batch_size: usize) -> ScrollPage {
        let ids = self
            .results
            .get(query)
            .map(|r| {
                r.iter()
                    .skip(offset)
                    .take(batch_size)
                    .cloned()
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        let scroll_id = Uuid::new_v4().to_string();
        self.cursors.insert(
            scroll_id.clone(),
            Cursor {
                query: query.to_string(),
                offset: offset + ids.len(),
                batch_size,
            },
        );
        ScrollPage { ids, scroll_id }
    }
}

#[async_trait]
impl DocumentScroller for MemoryScroller {
    async fn scroll(
        &self,
        query: &str,
        batch_size: usize,
        _keep_alive: Duration,
    ) -> Result<ScrollPage, ScrollError> {
        if !self.results.contains_key(query) {
            return Err(ScrollError::invalid_query(format!(
                "no source matches: {query}"
            )));
        }
        Ok(self.page(query, 0, batch_size.max(1)))
    }

    async fn scroll_next(&self, scroll_id: &str) -> Result<ScrollPage, ScrollError> {
        let cursor = self
            .cursors
            .remove(scroll_id)
            .map(|(_, c)| c)
            .ok_or_else(|| ScrollError::UnknownCursor {
                scroll_id: scroll_id.to_string(),
            })?;
        Ok(self.page(&cursor.query, cursor.offset, cursor.batch_size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEEP_ALIVE: Duration = Duration::from_secs(10);

    #[tokio::test]
    async fn test_scroll_pages_until_exhaustion() {
        let scroller = MemoryScroller::new();
        scroller.load_synthetic("q", 5);

        let mut page = scroller.scroll("q", 2, KEEP_ALIVE).await.unwrap();
        let mut seen = page.ids.len();
        while !page.ids.is_empty() {
            page = scroller.scroll_next(&page.scroll_id).await.unwrap();
            seen += page.ids.len();
        }
        assert_eq!(seen, 5);
    }

    #[tokio::test]
    async fn test_unknown_query_is_invalid() {
        let scroller = MemoryScroller::new();
        assert!(matches!(
            scroller.scroll("missing", 10, KEEP_ALIVE).await,
            Err(ScrollError::InvalidQuery { .. })
        ));
    }

    #[tokio::test]
    async fn test_stale_cursor_rejected() {
        let scroller = MemoryScroller::new();
        scroller.load_synthetic("q", 1);
        let page = scroller.scroll("q", 10, KEEP_ALIVE).await.unwrap();
        scroller.scroll_next(&page.scroll_id).await.unwrap();
        assert!(matches!(
            scroller.scroll_next(&page.scroll_id).await,
            Err(ScrollError::UnknownCursor { .. })
        ));
    }
}
