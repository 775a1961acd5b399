//! Google Ads REST client: keyword planning and search campaign creation.
//!
//! Credentials come from a YAML file. The OAuth access token is exchanged from
//! the refresh token on first use and cached until shortly before it expires.

use std::path::Path;
use std::time::{Duration, Instant};

use acfy_core::{CompetitionLevel, KeywordRecord, Page, StructuredContent, SyncCursor};
use acfy_storage::{FetchError, HttpClientConfig, HttpFetcher};
use anyhow::Context;
use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::{lenient_i64, AdsPlatform, KeywordPlanner, KeywordResult, PayloadError};

const DEFAULT_API_BASE: &str = "https://googleads.googleapis.com";
const DEFAULT_OAUTH_URL: &str = "https://oauth2.googleapis.com/token";
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoogleAdsConfig {
    pub developer_token: String,
    pub client_id: String,
    pub client_secret: String,
    pub refresh_token: String,
    #[serde(default, deserialize_with = "optional_customer_id")]
    pub login_customer_id: Option<String>,
    #[serde(deserialize_with = "customer_id")]
    pub customer_id: String,
    #[serde(default = "default_location_ids")]
    pub location_ids: Vec<i64>,
    #[serde(default = "default_language_id")]
    pub language_id: i64,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

/// United States.
fn default_location_ids() -> Vec<i64> {
    vec![2840]
}

/// English.
fn default_language_id() -> i64 {
    1000
}

fn default_api_version() -> String {
    "v17".to_string()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum IdValue {
    Text(String),
    Number(u64),
}

impl IdValue {
    fn normalized(self) -> String {
        match self {
            Self::Text(text) => text.chars().filter(|c| c.is_ascii_digit()).collect(),
            Self::Number(n) => n.to_string(),
        }
    }
}

fn customer_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(IdValue::deserialize(deserializer)?.normalized())
}

fn optional_customer_id<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<IdValue>::deserialize(deserializer)?
        .map(IdValue::normalized)
        .filter(|id| !id.is_empty()))
}

impl GoogleAdsConfig {
    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        let config: Self = serde_yaml::from_str(text).context("parsing google ads yaml")?;
        anyhow::ensure!(!config.customer_id.is_empty(), "customer_id must not be empty");
        Ok(config)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        Self::from_yaml_str(&text).with_context(|| format!("loading {}", path.display()))
    }

    fn geo_target_constants(&self) -> Vec<String> {
        self.location_ids
            .iter()
            .map(|id| format!("geoTargetConstants/{id}"))
            .collect()
    }

    fn language_constant(&self) -> String {
        format!("languageConstants/{}", self.language_id)
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

#[derive(Debug)]
pub struct GoogleAdsClient {
    http: HttpFetcher,
    config: GoogleAdsConfig,
    api_base: String,
    oauth_url: String,
    token: Mutex<Option<CachedToken>>,
}

impl GoogleAdsClient {
    pub fn new(config: GoogleAdsConfig, http: HttpClientConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpFetcher::new(http)?,
            config,
            api_base: DEFAULT_API_BASE.to_string(),
            oauth_url: DEFAULT_OAUTH_URL.to_string(),
            token: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &GoogleAdsConfig {
        &self.config
    }

    async fn access_token(&self) -> Result<String, FetchError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() + TOKEN_EXPIRY_MARGIN {
                return Ok(token.access_token.clone());
            }
        }

        let request = self.http.request(Method::POST, &self.oauth_url).form(&[
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", self.config.refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ]);
        let response = self.http.send(request).await?;
        let token: TokenResponse = response.json()?;
        debug!(expires_in = token.expires_in, "oauth access token refreshed");

        let access_token = token.access_token.clone();
        *cached = Some(CachedToken {
            access_token: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(access_token)
    }

    fn customer_url(&self, suffix: &str) -> String {
        format!(
            "{}/{}/customers/{}{suffix}",
            self.api_base.trim_end_matches('/'),
            self.config.api_version,
            self.config.customer_id
        )
    }

    async fn post(&self, suffix: &str, body: &JsonValue) -> Result<JsonValue, FetchError> {
        let token = self.access_token().await?;
        let url = self.customer_url(suffix);
        let mut request = self
            .http
            .request(Method::POST, &url)
            .bearer_auth(token)
            .header("developer-token", &self.config.developer_token)
            .json(body);
        if let Some(login) = &self.config.login_customer_id {
            request = request.header("login-customer-id", login);
        }
        self.http.send(request).await?.json()
    }

    async fn mutate(
        &self,
        service: &str,
        operations: Vec<JsonValue>,
    ) -> Result<Vec<String>, FetchError> {
        let suffix = format!("/{service}:mutate");
        let body = self.post(&suffix, &json!({ "operations": operations })).await?;
        let names = mutate_resource_names(&body);
        if names.is_empty() {
            return Err(FetchError::fatal(
                self.customer_url(&suffix),
                "mutate response carried no resource names",
            ));
        }
        Ok(names)
    }

    async fn mutate_one(&self, service: &str, operation: JsonValue) -> Result<String, FetchError> {
        let mut names = self.mutate(service, vec![operation]).await?;
        Ok(names.swap_remove(0))
    }
}

/// `results[].resourceName` of a mutate response, in order.
pub fn mutate_resource_names(body: &JsonValue) -> Vec<String> {
    body.get("results")
        .and_then(JsonValue::as_array)
        .map(|results| {
            results
                .iter()
                .filter_map(|r| r.get("resourceName").and_then(JsonValue::as_str))
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeywordIdea {
    text: Option<String>,
    #[serde(default, alias = "keywordMetrics")]
    keyword_idea_metrics: Option<KeywordMetrics>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeywordMetrics {
    #[serde(default, deserialize_with = "lenient_i64::deserialize")]
    avg_monthly_searches: Option<i64>,
    #[serde(default)]
    competition: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64::deserialize")]
    competition_index: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64::deserialize")]
    low_top_of_page_bid_micros: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64::deserialize")]
    high_top_of_page_bid_micros: Option<i64>,
    #[serde(default)]
    low_top_of_page_bid_percentile: Option<f64>,
    #[serde(default)]
    high_top_of_page_bid_percentile: Option<f64>,
}

impl KeywordMetrics {
    fn missing_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.avg_monthly_searches.is_none() {
            missing.push("avg_monthly_searches");
        }
        if self.competition.is_none() {
            missing.push("competition");
        }
        if self.competition_index.is_none() {
            missing.push("competition_index");
        }
        if self.low_top_of_page_bid_micros.is_none() {
            missing.push("low_top_of_page_bid_micros");
        }
        if self.high_top_of_page_bid_micros.is_none() {
            missing.push("high_top_of_page_bid_micros");
        }
        missing
    }
}

/// Decodes a keyword idea or historical-metrics result. Missing metrics
/// become zero (or `UNKNOWN`) and are logged at debug level.
pub fn decode_keyword_idea(value: &JsonValue) -> Result<KeywordRecord, PayloadError> {
    let key = value
        .get("text")
        .and_then(JsonValue::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or("<missing text>")
        .to_string();
    let idea: KeywordIdea = serde_json::from_value(value.clone())
        .map_err(|err| PayloadError::new("keyword idea", &key, err.to_string()))?;
    let text = idea
        .text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| PayloadError::new("keyword idea", &key, "empty keyword text"))?;

    let metrics = idea.keyword_idea_metrics.unwrap_or_default();
    let missing = metrics.missing_fields();
    if !missing.is_empty() {
        debug!(keyword = %text, ?missing, "keyword metrics defaulted to zero");
    }

    let mut record = KeywordRecord::new(text).with_top_of_page_bids(
        metrics.low_top_of_page_bid_micros.unwrap_or(0),
        metrics.high_top_of_page_bid_micros.unwrap_or(0),
    );
    record.avg_monthly_searches = metrics.avg_monthly_searches.unwrap_or(0);
    record.competition_level = metrics
        .competition
        .as_deref()
        .map(CompetitionLevel::parse)
        .unwrap_or_default();
    record.competition_index = metrics.competition_index.unwrap_or(0);
    record.top_of_page_bid_percentile_low = metrics.low_top_of_page_bid_percentile.unwrap_or(0.0);
    record.top_of_page_bid_percentile_high = metrics.high_top_of_page_bid_percentile.unwrap_or(0.0);
    Ok(record)
}

/// Decodes every result in order. Rejected results stay in place as errors
/// so the caller can report them.
pub fn decode_keyword_results(body: &JsonValue) -> Vec<KeywordResult> {
    body.get("results")
        .and_then(JsonValue::as_array)
        .map(|results| results.iter().map(decode_keyword_idea).collect())
        .unwrap_or_default()
}

pub fn next_page_token(body: &JsonValue) -> Option<String> {
    body.get("nextPageToken")
        .and_then(JsonValue::as_str)
        .filter(|t| !t.is_empty())
        .map(ToString::to_string)
}

#[async_trait]
impl KeywordPlanner for GoogleAdsClient {
    #[instrument(level = "info", skip(self, seeds, cursor), fields(seed_count = seeds.len(), paged = cursor.is_some()))]
    async fn keyword_ideas_page(
        &self,
        seeds: &[String],
        cursor: Option<&SyncCursor>,
    ) -> Result<Page<KeywordResult>, FetchError> {
        let mut body = json!({
            "language": self.config.language_constant(),
            "geoTargetConstants": self.config.geo_target_constants(),
            "keywordPlanNetwork": "GOOGLE_SEARCH",
            "keywordSeed": { "keywords": seeds },
        });
        if let Some(cursor) = cursor {
            body["pageToken"] = JsonValue::String(cursor.as_str().to_string());
        }

        let response = self.post(":generateKeywordIdeas", &body).await?;
        let items = decode_keyword_results(&response);
        debug!(ideas = items.len(), "keyword ideas page decoded");
        Ok(Page {
            items,
            next_cursor: next_page_token(&response).map(SyncCursor::new),
        })
    }

    #[instrument(level = "info", skip(self, keywords), fields(keyword_count = keywords.len()))]
    async fn historical_metrics(
        &self,
        keywords: &[String],
    ) -> Result<Vec<KeywordResult>, FetchError> {
        let body = json!({
            "keywords": keywords,
            "language": self.config.language_constant(),
            "geoTargetConstants": self.config.geo_target_constants(),
            "keywordPlanNetwork": "GOOGLE_SEARCH",
        });
        let response = self.post(":generateKeywordHistoricalMetrics", &body).await?;
        Ok(decode_keyword_results(&response))
    }
}

#[async_trait]
impl AdsPlatform for GoogleAdsClient {
    async fn create_campaign_budget(
        &self,
        name: &str,
        amount_micros: i64,
    ) -> Result<String, FetchError> {
        let resource = self
            .mutate_one(
                "campaignBudgets",
                json!({ "create": {
                    "name": name,
                    "amountMicros": amount_micros.to_string(),
                    "deliveryMethod": "STANDARD",
                    "explicitlyShared": false,
                }}),
            )
            .await?;
        info!(%resource, "campaign budget created");
        Ok(resource)
    }

    async fn create_search_campaign(
        &self,
        name: &str,
        budget_resource: &str,
    ) -> Result<String, FetchError> {
        let resource = self
            .mutate_one(
                "campaigns",
                json!({ "create": {
                    "name": name,
                    "status": "PAUSED",
                    "advertisingChannelType": "SEARCH",
                    "campaignBudget": budget_resource,
                    "manualCpc": { "enhancedCpcEnabled": false },
                    "networkSettings": {
                        "targetGoogleSearch": true,
                        "targetSearchNetwork": true,
                        "targetContentNetwork": false,
                    },
                }}),
            )
            .await?;
        info!(%resource, "search campaign created");
        Ok(resource)
    }

    async fn add_campaign_targeting(
        &self,
        campaign_resource: &str,
    ) -> Result<Vec<String>, FetchError> {
        let mut operations: Vec<JsonValue> = self
            .config
            .geo_target_constants()
            .into_iter()
            .map(|geo| {
                json!({ "create": {
                    "campaign": campaign_resource,
                    "location": { "geoTargetConstant": geo },
                }})
            })
            .collect();
        operations.push(json!({ "create": {
            "campaign": campaign_resource,
            "language": { "languageConstant": self.config.language_constant() },
        }}));

        let resources = self.mutate("campaignCriteria", operations).await?;
        info!(criteria = resources.len(), "campaign targeting added");
        Ok(resources)
    }

    async fn create_ad_group(
        &self,
        name: &str,
        campaign_resource: &str,
        cpc_bid_micros: i64,
    ) -> Result<String, FetchError> {
        let resource = self
            .mutate_one(
                "adGroups",
                json!({ "create": {
                    "name": name,
                    "campaign": campaign_resource,
                    "status": "ENABLED",
                    "type": "SEARCH_STANDARD",
                    "cpcBidMicros": cpc_bid_micros.to_string(),
                }}),
            )
            .await?;
        info!(%resource, "ad group created");
        Ok(resource)
    }

    async fn create_responsive_search_ad(
        &self,
        ad_group_resource: &str,
        copy: &StructuredContent,
        final_url: &str,
    ) -> Result<String, FetchError> {
        let assets = |texts: &[String]| -> Vec<JsonValue> {
            texts.iter().map(|text| json!({ "text": text })).collect()
        };
        let resource = self
            .mutate_one(
                "adGroupAds",
                json!({ "create": {
                    "adGroup": ad_group_resource,
                    "status": "ENABLED",
                    "ad": {
                        "finalUrls": [final_url],
                        "responsiveSearchAd": {
                            "headlines": assets(&copy.headlines),
                            "descriptions": assets(&copy.descriptions),
                        },
                    },
                }}),
            )
            .await?;
        info!(%resource, "responsive search ad created");
        Ok(resource)
    }
}
