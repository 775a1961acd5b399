#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use acfy_adapters::{
    read_json_file, AdsPlatform, KeywordPlanner, KeywordResult, PayloadError,
    RemoteListingClient, RemoteWrite, Resource, TextGenerator,
};
use acfy_core::{KeywordRecord, Page, StructuredContent, SyncCursor};
use acfy_storage::{BackoffPolicy, Database, FetchError};
use acfy_sync::{AppConfig, Collaborators, SyncPipeline};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value as JsonValue;

pub fn fixtures() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../fixtures")
}

pub fn load(relative: &str) -> JsonValue {
    read_json_file(fixtures().join(relative)).expect("fixture json")
}

pub fn fixture_array(relative: &str, key: &str) -> Vec<JsonValue> {
    load(relative)[key].as_array().expect("fixture array").clone()
}

pub async fn memory_db() -> Database {
    let db = Database::connect_in_memory().await.expect("db");
    db.ensure_schema().await.expect("schema");
    db
}

pub fn config_with(root: &Path, pairs: &[(&str, &str)]) -> AppConfig {
    let mut vars: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    vars.insert("ACFY_WORKSPACE_ROOT".into(), root.display().to_string());
    vars.insert(
        "GOOGLE_ADS_CONFIG".into(),
        root.join("missing.yaml").display().to_string(),
    );
    AppConfig::from_lookup(|key| vars.get(key).cloned()).expect("config")
}

pub fn quick_backoff() -> BackoffPolicy {
    BackoffPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(2),
    }
}

pub fn pipeline(config: AppConfig, db: Database, collaborators: Collaborators) -> SyncPipeline {
    SyncPipeline::new(config, db, collaborators).with_backoff(quick_backoff())
}

pub fn unauthorized() -> FetchError {
    FetchError::Fatal {
        url: "https://fake.example".to_string(),
        status: Some(401),
        reason: "invalid credentials".to_string(),
    }
}

/// In-memory content platform serving articles and products by offset cursor.
pub struct FakeListing {
    pub articles: Mutex<Vec<JsonValue>>,
    pub products: Mutex<Vec<JsonValue>>,
    page_size: usize,
    /// Cursor whose first fetch fails with a transient error.
    flaky_cursor: Mutex<Option<String>>,
    /// Article titles whose publishing fails with the given error.
    failing_titles: Mutex<HashMap<String, FetchError>>,
    pub cursor_log: Mutex<Vec<Option<String>>>,
    pub writes: Mutex<Vec<(Option<i64>, String)>>,
    next_id: AtomicI64,
}

impl FakeListing {
    pub fn new(articles: Vec<JsonValue>, products: Vec<JsonValue>) -> Self {
        Self {
            articles: Mutex::new(articles),
            products: Mutex::new(products),
            page_size: 2,
            flaky_cursor: Mutex::new(None),
            failing_titles: Mutex::new(HashMap::new()),
            cursor_log: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(900_000_001),
        }
    }

    pub fn from_fixtures() -> Self {
        Self::new(
            fixture_array("shopify/articles.json", "articles"),
            fixture_array("shopify/products.json", "products"),
        )
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    pub fn flaky_at(self, cursor: &str) -> Self {
        *self.flaky_cursor.lock().expect("lock") = Some(cursor.to_string());
        self
    }

    pub fn fail_title(&self, title: &str, error: FetchError) {
        self.failing_titles
            .lock()
            .expect("lock")
            .insert(title.to_string(), error);
    }
}

#[async_trait]
impl RemoteListingClient for FakeListing {
    async fn list_page(
        &self,
        resource: Resource,
        cursor: Option<&SyncCursor>,
    ) -> Result<Page<JsonValue>, FetchError> {
        let token = cursor.map(|c| c.as_str().to_string());
        self.cursor_log.lock().expect("lock").push(token.clone());

        let mut flaky = self.flaky_cursor.lock().expect("lock");
        if token.is_some() && *flaky == token {
            *flaky = None;
            return Err(FetchError::transient("fake listing", "connection reset"));
        }
        drop(flaky);

        let offset: usize = token.as_deref().map_or(0, |t| t.parse().unwrap_or(0));
        let all = match resource {
            Resource::Articles => self.articles.lock().expect("lock").clone(),
            Resource::Products => self.products.lock().expect("lock").clone(),
        };
        let end = (offset + self.page_size).min(all.len());
        let items = all[offset.min(end)..end].to_vec();
        Ok(if end < all.len() {
            Page::with_next(items, end.to_string())
        } else {
            Page::last(items)
        })
    }

    async fn create_or_update(
        &self,
        _resource: Resource,
        payload: &JsonValue,
        remote_id: Option<i64>,
    ) -> Result<RemoteWrite, FetchError> {
        let title = payload["title"].as_str().unwrap_or_default().to_string();
        if let Some(err) = self.failing_titles.lock().expect("lock").get(&title) {
            return Err(err.clone());
        }
        self.writes.lock().expect("lock").push((remote_id, title));
        let remote_id = remote_id.unwrap_or_else(|| self.next_id.fetch_add(1, Ordering::SeqCst));
        Ok(RemoteWrite {
            remote_id,
            updated_at: Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).single().expect("date"),
        })
    }
}

/// Keyword planner that echoes its seeds on page one and adds a
/// "reusable <seed>" idea per seed on page two.
#[derive(Default)]
pub struct FakePlanner {
    pub fail_with: Option<FetchError>,
    /// Appends one result without text to every idea page and metrics batch.
    pub blank_result: bool,
    pub idea_calls: Mutex<Vec<Vec<String>>>,
}

impl FakePlanner {
    pub fn failing(err: FetchError) -> Self {
        Self {
            fail_with: Some(err),
            ..Default::default()
        }
    }

    pub fn with_blank_results() -> Self {
        Self {
            blank_result: true,
            ..Default::default()
        }
    }

    fn finish(&self, mut results: Vec<KeywordResult>) -> Vec<KeywordResult> {
        if self.blank_result {
            results.push(Err(PayloadError::new(
                "keyword idea",
                "<missing text>",
                "empty keyword text",
            )));
        }
        results
    }
}

#[async_trait]
impl KeywordPlanner for FakePlanner {
    async fn keyword_ideas_page(
        &self,
        seeds: &[String],
        cursor: Option<&SyncCursor>,
    ) -> Result<Page<KeywordResult>, FetchError> {
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        self.idea_calls.lock().expect("lock").push(seeds.to_vec());
        match cursor {
            None => Ok(Page::with_next(
                self.finish(seeds.iter().map(|s| Ok(KeywordRecord::new(s))).collect()),
                "ideas-2",
            )),
            Some(_) => Ok(Page::last(
                seeds
                    .iter()
                    .map(|s| Ok(KeywordRecord::new(format!("reusable {s}"))))
                    .collect(),
            )),
        }
    }

    async fn historical_metrics(
        &self,
        keywords: &[String],
    ) -> Result<Vec<KeywordResult>, FetchError> {
        if let Some(err) = &self.fail_with {
            return Err(err.clone());
        }
        Ok(self.finish(
            keywords
                .iter()
                .map(|k| {
                    let mut record =
                        KeywordRecord::new(k).with_top_of_page_bids(500_000, 1_500_000);
                    record.avg_monthly_searches = 100 * k.len() as i64;
                    Ok(record)
                })
                .collect(),
        ))
    }
}

/// Text generator driven by a prompt-to-reply function.
pub struct FakeText {
    reply: Box<dyn Fn(&str) -> Result<String, FetchError> + Send + Sync>,
    pub prompts: Mutex<Vec<String>>,
}

impl FakeText {
    pub fn new(reply: impl Fn(&str) -> Result<String, FetchError> + Send + Sync + 'static) -> Self {
        Self {
            reply: Box::new(reply),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Replies with the recorded ad copy completion for every prompt.
    pub fn ad_copy() -> Self {
        let body = load("openai/rsa_completion.json");
        let content = body["choices"][0]["message"]["content"]
            .as_str()
            .expect("content")
            .to_string();
        Self::new(move |_| Ok(content.clone()))
    }
}

#[async_trait]
impl TextGenerator for FakeText {
    async fn complete(&self, prompt: &str) -> Result<String, FetchError> {
        self.prompts.lock().expect("lock").push(prompt.to_string());
        (self.reply)(prompt)
    }
}

/// Ads platform that hands out sequential resource names and can fail at a
/// named call.
#[derive(Default)]
pub struct FakeAds {
    pub fail_at: Option<&'static str>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeAds {
    pub fn failing_at(call: &'static str) -> Self {
        Self {
            fail_at: Some(call),
            ..Default::default()
        }
    }

    fn call(&self, name: &str, resource: String) -> Result<String, FetchError> {
        self.calls.lock().expect("lock").push(name.to_string());
        if self.fail_at == Some(name) {
            return Err(FetchError::Fatal {
                url: format!("https://ads.example/{name}"),
                status: Some(400),
                reason: "INVALID_ARGUMENT".to_string(),
            });
        }
        Ok(resource)
    }
}

#[async_trait]
impl AdsPlatform for FakeAds {
    async fn create_campaign_budget(
        &self,
        _name: &str,
        _amount_micros: i64,
    ) -> Result<String, FetchError> {
        self.call("budget", "customers/1/campaignBudgets/11".to_string())
    }

    async fn create_search_campaign(
        &self,
        _name: &str,
        _budget_resource: &str,
    ) -> Result<String, FetchError> {
        self.call("campaign", "customers/1/campaigns/22".to_string())
    }

    async fn add_campaign_targeting(
        &self,
        campaign_resource: &str,
    ) -> Result<Vec<String>, FetchError> {
        let resource = self.call("targeting", format!("{campaign_resource}~2840"))?;
        Ok(vec![resource, format!("{campaign_resource}~1000")])
    }

    async fn create_ad_group(
        &self,
        _name: &str,
        _campaign_resource: &str,
        _cpc_bid_micros: i64,
    ) -> Result<String, FetchError> {
        self.call("ad_group", "customers/1/adGroups/33".to_string())
    }

    async fn create_responsive_search_ad(
        &self,
        ad_group_resource: &str,
        _copy: &StructuredContent,
        _final_url: &str,
    ) -> Result<String, FetchError> {
        self.call("ad", format!("{ad_group_resource}~44").replace("adGroups", "adGroupAds"))
    }
}

pub fn collaborators(
    listing: Option<Arc<FakeListing>>,
    planner: Option<Arc<FakePlanner>>,
    text: Option<Arc<FakeText>>,
    ads: Option<Arc<FakeAds>>,
) -> Collaborators {
    Collaborators {
        listing: listing.map(|l| l as Arc<dyn RemoteListingClient>),
        planner: planner.map(|p| p as Arc<dyn KeywordPlanner>),
        text: text.map(|t| t as Arc<dyn TextGenerator>),
        ads: ads.map(|a| a as Arc<dyn AdsPlatform>),
    }
}
