//! Cursor walking over paged remote listings.
//!
//! A walk is pulled one page at a time and can only be restarted from the
//! first page. Any fetch error ends the walk; retrying is the caller's call.

use std::sync::Arc;

use acfy_adapters::{KeywordPlanner, KeywordResult, RemoteListingClient, Resource};
use acfy_core::{Page, SyncCursor};
use acfy_storage::FetchError;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use tracing::debug;

use crate::SyncError;

/// One paged listing operation.
#[async_trait]
pub trait PageSource: Send + Sync {
    type Item: Send;

    async fn fetch_page(&self, cursor: Option<&SyncCursor>) -> Result<Page<Self::Item>, FetchError>;

    /// Name used in errors and logs.
    fn describe(&self) -> String;
}

/// Raw records of a content platform listing.
pub struct ListingSource {
    client: Arc<dyn RemoteListingClient>,
    resource: Resource,
}

impl ListingSource {
    pub fn new(client: Arc<dyn RemoteListingClient>, resource: Resource) -> Self {
        Self { client, resource }
    }
}

#[async_trait]
impl PageSource for ListingSource {
    type Item = JsonValue;

    async fn fetch_page(&self, cursor: Option<&SyncCursor>) -> Result<Page<JsonValue>, FetchError> {
        self.client.list_page(self.resource, cursor).await
    }

    fn describe(&self) -> String {
        format!("{} listing", self.resource.as_str())
    }
}

/// Keyword ideas for one batch of seed keywords, rejects included.
pub struct KeywordIdeaSource {
    planner: Arc<dyn KeywordPlanner>,
    seeds: Vec<String>,
}

impl KeywordIdeaSource {
    pub fn new(planner: Arc<dyn KeywordPlanner>, seeds: Vec<String>) -> Self {
        Self { planner, seeds }
    }
}

#[async_trait]
impl PageSource for KeywordIdeaSource {
    type Item = KeywordResult;

    async fn fetch_page(
        &self,
        cursor: Option<&SyncCursor>,
    ) -> Result<Page<KeywordResult>, FetchError> {
        self.planner.keyword_ideas_page(&self.seeds, cursor).await
    }

    fn describe(&self) -> String {
        format!("keyword ideas for {} seeds", self.seeds.len())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum WalkState {
    Start,
    Next(SyncCursor),
    Done,
}

pub struct CursorWalker<S> {
    source: S,
    state: WalkState,
    pages: usize,
}

impl<S: PageSource> CursorWalker<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            state: WalkState::Start,
            pages: 0,
        }
    }

    /// Next page of items, or `None` once the listing (or a failed walk) is over.
    pub async fn next_page(&mut self) -> Option<Result<Vec<S::Item>, SyncError>> {
        let cursor = match &self.state {
            WalkState::Done => return None,
            WalkState::Start => None,
            WalkState::Next(cursor) => Some(cursor.clone()),
        };

        let page = match self.source.fetch_page(cursor.as_ref()).await {
            Ok(page) => page,
            Err(err) => {
                self.state = WalkState::Done;
                return Some(Err(SyncError::fetch(self.source.describe(), err)));
            }
        };
        self.pages += 1;

        self.state = match page.next_cursor {
            None => WalkState::Done,
            Some(next) if cursor.as_ref() == Some(&next) => {
                self.state = WalkState::Done;
                let what = self.source.describe();
                let reason = format!("listing returned cursor {} twice", next.as_str());
                return Some(Err(SyncError::fetch(
                    what.clone(),
                    FetchError::fatal(what, reason),
                )));
            }
            Some(next) => WalkState::Next(next),
        };

        debug!(
            source = %self.source.describe(),
            page = self.pages,
            items = page.items.len(),
            "page walked"
        );
        Some(Ok(page.items))
    }

    /// Drops any cursor; the next call fetches the first page again.
    pub fn restart(&mut self) {
        self.state = WalkState::Start;
        self.pages = 0;
    }

    pub fn is_finished(&self) -> bool {
        self.state == WalkState::Done
    }

    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Walks the remaining pages and concatenates their items.
    pub async fn collect_all(&mut self) -> Result<Vec<S::Item>, SyncError> {
        let mut items = Vec::new();
        while let Some(page) = self.next_page().await {
            items.extend(page?);
        }
        Ok(items)
    }
}
