//! Collaborator contracts for the remote platforms, plus the clients that
//! implement them for Shopify, OpenAI and Google Ads.
//!
//! Everything the sync engine needs from the outside world goes through the
//! traits in this file, so tests can swap in in-memory fakes.

use std::fs;
use std::path::Path;

use acfy_core::{KeywordRecord, Page, StructuredContent, SyncCursor};
use acfy_storage::FetchError;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub mod google_ads;
pub mod openai;
pub mod shopify;

pub use google_ads::{GoogleAdsClient, GoogleAdsConfig};
pub use openai::{OpenAiClient, OpenAiConfig};
pub use shopify::{ShopifyClient, ShopifyConfig};

pub const CRATE_NAME: &str = "acfy-adapters";

/// Listing endpoints the content platform exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resource {
    Articles,
    Products,
}

impl Resource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Articles => "articles",
            Self::Products => "products",
        }
    }
}

/// Outcome of a successful remote create-or-update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteWrite {
    pub remote_id: i64,
    pub updated_at: DateTime<Utc>,
}

/// A remote record that cannot be turned into a domain value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {what} payload ({key}): {reason}")]
pub struct PayloadError {
    pub what: &'static str,
    pub key: String,
    pub reason: String,
}

impl PayloadError {
    pub fn new(what: &'static str, key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            what,
            key: key.into(),
            reason: reason.into(),
        }
    }
}

#[async_trait]
pub trait RemoteListingClient: Send + Sync {
    async fn list_page(
        &self,
        resource: Resource,
        cursor: Option<&SyncCursor>,
    ) -> Result<Page<JsonValue>, FetchError>;

    /// Creates the record when `remote_id` is `None`, otherwise updates it.
    async fn create_or_update(
        &self,
        resource: Resource,
        payload: &JsonValue,
        remote_id: Option<i64>,
    ) -> Result<RemoteWrite, FetchError>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, FetchError>;
}

/// One decoded planner result; results without usable text are errors.
pub type KeywordResult = std::result::Result<KeywordRecord, PayloadError>;

#[async_trait]
pub trait KeywordPlanner: Send + Sync {
    async fn keyword_ideas_page(
        &self,
        seeds: &[String],
        cursor: Option<&SyncCursor>,
    ) -> Result<Page<KeywordResult>, FetchError>;

    async fn historical_metrics(&self, keywords: &[String])
        -> Result<Vec<KeywordResult>, FetchError>;
}

#[async_trait]
pub trait AdsPlatform: Send + Sync {
    async fn create_campaign_budget(&self, name: &str, amount_micros: i64)
        -> Result<String, FetchError>;

    /// Creates a paused search campaign on the given budget.
    async fn create_search_campaign(
        &self,
        name: &str,
        budget_resource: &str,
    ) -> Result<String, FetchError>;

    /// Attaches the configured location and language criteria.
    async fn add_campaign_targeting(&self, campaign_resource: &str)
        -> Result<Vec<String>, FetchError>;

    async fn create_ad_group(
        &self,
        name: &str,
        campaign_resource: &str,
        cpc_bid_micros: i64,
    ) -> Result<String, FetchError>;

    async fn create_responsive_search_ad(
        &self,
        ad_group_resource: &str,
        copy: &StructuredContent,
        final_url: &str,
    ) -> Result<String, FetchError>;
}

pub fn read_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

/// Accepts int64 values as JSON numbers or as decimal strings.
pub(crate) mod lenient_i64 {
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumberOrString {
        Number(i64),
        Float(f64),
        Text(String),
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<NumberOrString>::deserialize(deserializer)?;
        Ok(match raw {
            None => None,
            Some(NumberOrString::Number(n)) => Some(n),
            Some(NumberOrString::Float(f)) => Some(f as i64),
            Some(NumberOrString::Text(s)) => {
                let s = s.trim();
                if s.is_empty() {
                    None
                } else {
                    Some(s.parse::<i64>().map_err(serde::de::Error::custom)?)
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Deserialize)]
    struct Probe {
        #[serde(default, with = "lenient_i64")]
        value: Option<i64>,
    }

    #[test]
    fn lenient_i64_accepts_strings_numbers_and_absence() {
        let from_text: Probe = serde_json::from_str(r#"{"value":"1900"}"#).expect("text");
        let from_number: Probe = serde_json::from_str(r#"{"value":42}"#).expect("number");
        let missing: Probe = serde_json::from_str("{}").expect("missing");
        let null: Probe = serde_json::from_str(r#"{"value":null}"#).expect("null");

        assert_eq!(from_text.value, Some(1900));
        assert_eq!(from_number.value, Some(42));
        assert_eq!(missing.value, None);
        assert_eq!(null.value, None);
        assert!(serde_json::from_str::<Probe>(r#"{"value":"many"}"#).is_err());
    }

    #[test]
    fn resource_names_match_listing_paths() {
        assert_eq!(Resource::Articles.as_str(), "articles");
        assert_eq!(Resource::Products.as_str(), "products");
    }
}
