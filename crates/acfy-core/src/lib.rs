//! Core domain model for AutoContentify: keywords, content, catalog and sync state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "acfy-core";

/// Ad platforms report bids in micros of the account currency.
pub const MICROS_PER_UNIT: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompetitionLevel {
    Low,
    Medium,
    High,
    #[default]
    Unknown,
}

impl CompetitionLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Lenient parse; anything unrecognised (including `UNSPECIFIED`) is `Unknown`.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW" => Self::Low,
            "MEDIUM" => Self::Medium,
            "HIGH" => Self::High,
            _ => Self::Unknown,
        }
    }
}

/// Keyword with its planner metrics. `text` is the natural key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordRecord {
    pub text: String,
    pub avg_monthly_searches: i64,
    pub competition_level: CompetitionLevel,
    pub competition_index: i64,
    pub bid_range_low: f64,
    pub bid_range_high: f64,
    pub top_of_page_bid_micros_low: i64,
    pub top_of_page_bid_micros_high: i64,
    pub top_of_page_bid_percentile_low: f64,
    pub top_of_page_bid_percentile_high: f64,
}

impl KeywordRecord {
    /// A keyword with every metric at its zero/UNKNOWN default.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into().trim().to_string(),
            avg_monthly_searches: 0,
            competition_level: CompetitionLevel::Unknown,
            competition_index: 0,
            bid_range_low: 0.0,
            bid_range_high: 0.0,
            top_of_page_bid_micros_low: 0,
            top_of_page_bid_micros_high: 0,
            top_of_page_bid_percentile_low: 0.0,
            top_of_page_bid_percentile_high: 0.0,
        }
    }

    /// Sets the top-of-page bids and derives the bid range in currency units.
    pub fn with_top_of_page_bids(mut self, low_micros: i64, high_micros: i64) -> Self {
        self.top_of_page_bid_micros_low = low_micros;
        self.top_of_page_bid_micros_high = high_micros;
        self.bid_range_low = low_micros as f64 / MICROS_PER_UNIT;
        self.bid_range_high = high_micros as f64 / MICROS_PER_UNIT;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncState {
    Pending,
    Synced,
}

impl SyncState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Synced => "SYNCED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "SYNCED" => Some(Self::Synced),
            _ => None,
        }
    }
}

/// Locally stored blog article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub local_id: i64,
    pub remote_id: Option<i64>,
    pub title: String,
    pub body: String,
    pub updated_at: DateTime<Utc>,
    pub sync_state: SyncState,
}

impl ContentRecord {
    /// True when the stored row already reflects `remote` exactly.
    pub fn matches_remote(&self, remote: &RemoteContent) -> bool {
        self.sync_state == SyncState::Synced
            && self.remote_id == Some(remote.remote_id)
            && self.title == remote.title
            && self.body == remote.body
            && self.updated_at == remote.updated_at
    }
}

/// Article as reported by the content platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteContent {
    pub remote_id: i64,
    pub title: String,
    pub body: String,
    pub updated_at: DateTime<Utc>,
}

/// New article that has not been stored yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentDraft {
    pub title: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogItem {
    pub id: i64,
    pub remote_id: i64,
    pub title: String,
    pub body_html: Option<String>,
    pub vendor: Option<String>,
    pub product_type: Option<String>,
    pub status: String,
    pub image_urls: Vec<String>,
    pub last_synced_at: DateTime<Utc>,
}

impl CatalogItem {
    pub fn matches_remote(&self, remote: &RemoteCatalogItem) -> bool {
        self.remote_id == remote.remote_id
            && self.title == remote.title
            && self.body_html == remote.body_html
            && self.vendor == remote.vendor
            && self.product_type == remote.product_type
            && self.status == remote.status
            && self.image_urls == remote.image_urls
            && self.last_synced_at == remote.updated_at
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogVariant {
    pub id: i64,
    pub item_id: i64,
    pub remote_id: i64,
    pub title: String,
    pub sku: Option<String>,
    /// Decimal price exactly as the platform reports it.
    pub price: String,
    pub inventory_quantity: i64,
    pub weight: f64,
    pub weight_unit: String,
    pub inventory_policy: String,
    pub last_synced_at: DateTime<Utc>,
}

impl CatalogVariant {
    pub fn matches_remote(&self, remote: &RemoteCatalogVariant, synced_at: DateTime<Utc>) -> bool {
        self.remote_id == remote.remote_id
            && self.title == remote.title
            && self.sku == remote.sku
            && self.price == remote.price
            && self.inventory_quantity == remote.inventory_quantity
            && self.weight == remote.weight
            && self.weight_unit == remote.weight_unit
            && self.inventory_policy == remote.inventory_policy
            && self.last_synced_at == synced_at
    }
}

/// Product as reported by the commerce platform, with its variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCatalogItem {
    pub remote_id: i64,
    pub title: String,
    pub body_html: Option<String>,
    pub vendor: Option<String>,
    pub product_type: Option<String>,
    pub status: String,
    pub image_urls: Vec<String>,
    pub updated_at: DateTime<Utc>,
    pub variants: Vec<RemoteCatalogVariant>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCatalogVariant {
    pub remote_id: i64,
    pub title: String,
    pub sku: Option<String>,
    pub price: String,
    pub inventory_quantity: i64,
    pub weight: f64,
    pub weight_unit: String,
    pub inventory_policy: String,
}

/// Opaque position in a paged remote listing. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SyncCursor {
    pub next_page_token: String,
}

impl SyncCursor {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            next_page_token: token.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.next_page_token
    }
}

/// One page of a remote listing.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_cursor: Option<SyncCursor>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self {
            items,
            next_cursor: None,
        }
    }

    pub fn with_next(items: Vec<T>, token: impl Into<String>) -> Self {
        Self {
            items,
            next_cursor: Some(SyncCursor::new(token)),
        }
    }
}

/// Generated ad copy for a responsive search ad.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructuredContent {
    pub headlines: Vec<String>,
    pub descriptions: Vec<String>,
}

/// Mapping between a generated ad and the remote resources created for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdCampaignRecord {
    pub budget_resource: String,
    pub campaign_resource: String,
    pub ad_group_resource: String,
    pub ad_resource: String,
    pub keywords: Vec<String>,
    pub headlines: Vec<String>,
    pub descriptions: Vec<String>,
    pub final_url: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn competition_level_parse_is_lenient() {
        assert_eq!(CompetitionLevel::parse("low"), CompetitionLevel::Low);
        assert_eq!(CompetitionLevel::parse(" HIGH "), CompetitionLevel::High);
        assert_eq!(CompetitionLevel::parse("UNSPECIFIED"), CompetitionLevel::Unknown);
        assert_eq!(CompetitionLevel::parse(""), CompetitionLevel::Unknown);
        assert_eq!(
            serde_json::to_string(&CompetitionLevel::Medium).unwrap(),
            "\"MEDIUM\""
        );
    }

    #[test]
    fn new_keyword_defaults_every_metric_to_zero() {
        let kw = KeywordRecord::new("  eco bag ");
        assert_eq!(kw.text, "eco bag");
        assert_eq!(kw.avg_monthly_searches, 0);
        assert_eq!(kw.competition_level, CompetitionLevel::Unknown);
        assert_eq!(kw.bid_range_low, 0.0);
        assert_eq!(kw.top_of_page_bid_percentile_high, 0.0);
    }

    #[test]
    fn top_of_page_bids_derive_bid_range() {
        let kw = KeywordRecord::new("compost bin").with_top_of_page_bids(1_250_000, 3_000_000);
        assert_eq!(kw.bid_range_low, 1.25);
        assert_eq!(kw.bid_range_high, 3.0);
        assert_eq!(kw.top_of_page_bid_micros_high, 3_000_000);
    }

    #[test]
    fn sync_state_round_trips_through_text() {
        for state in [SyncState::Pending, SyncState::Synced] {
            assert_eq!(SyncState::parse(state.as_str()), Some(state));
        }
        assert_eq!(SyncState::parse("synced"), None);
    }
}
