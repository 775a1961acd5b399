//! Shopify Admin REST client: blog articles and products.

use std::time::Duration;

use acfy_core::{Page, RemoteCatalogItem, RemoteCatalogVariant, RemoteContent, SyncCursor};
use acfy_storage::{FetchError, HttpClientConfig, HttpFetcher};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tracing::{debug, info, instrument};

use crate::{PayloadError, RemoteListingClient, RemoteWrite, Resource};

pub const DEFAULT_API_VERSION: &str = "2023-10";
const PAGE_LIMIT: u32 = 250;
const ACCESS_TOKEN_HEADER: &str = "X-Shopify-Access-Token";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopifyConfig {
    pub store_url: String,
    pub access_token: String,
    pub blog_id: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

#[derive(Debug, Clone)]
pub struct ShopifyClient {
    http: HttpFetcher,
    config: ShopifyConfig,
}

impl ShopifyClient {
    /// Shopify allows two REST calls per second per store.
    pub fn new(config: ShopifyConfig, http: HttpClientConfig) -> anyhow::Result<Self> {
        let http = HttpFetcher::new(http.with_token_bucket(2, Duration::from_millis(500)))?;
        Ok(Self { http, config })
    }

    fn base(&self) -> String {
        format!(
            "{}/admin/api/{}",
            self.config.store_url.trim_end_matches('/'),
            self.config.api_version
        )
    }

    pub fn collection_url(&self, resource: Resource) -> String {
        match resource {
            Resource::Articles => {
                format!("{}/blogs/{}/articles.json", self.base(), self.config.blog_id)
            }
            Resource::Products => format!("{}/products.json", self.base()),
        }
    }

    pub fn member_url(&self, resource: Resource, remote_id: i64) -> String {
        match resource {
            Resource::Articles => format!(
                "{}/blogs/{}/articles/{remote_id}.json",
                self.base(),
                self.config.blog_id
            ),
            Resource::Products => format!("{}/products/{remote_id}.json", self.base()),
        }
    }
}

#[async_trait]
impl RemoteListingClient for ShopifyClient {
    #[instrument(level = "debug", skip(self, cursor), fields(resource = resource.as_str()))]
    async fn list_page(
        &self,
        resource: Resource,
        cursor: Option<&SyncCursor>,
    ) -> Result<Page<JsonValue>, FetchError> {
        let url = self.collection_url(resource);
        let mut query = vec![("limit", PAGE_LIMIT.to_string())];
        if let Some(cursor) = cursor {
            query.push(("page_info", cursor.as_str().to_string()));
        }

        let request = self
            .http
            .request(Method::GET, &url)
            .header(ACCESS_TOKEN_HEADER, &self.config.access_token)
            .query(&query);
        let response = self.http.send(request).await?;
        let body: JsonValue = response.json()?;

        let items = body
            .get(resource.as_str())
            .and_then(JsonValue::as_array)
            .cloned()
            .ok_or_else(|| {
                FetchError::fatal(&response.final_url, format!("missing `{}` array", resource.as_str()))
            })?;
        let next = response.header("link").and_then(parse_next_page_info);

        debug!(count = items.len(), has_next = next.is_some(), "listing page fetched");
        Ok(Page {
            items,
            next_cursor: next.map(SyncCursor::new),
        })
    }

    #[instrument(level = "info", skip(self, payload), fields(resource = resource.as_str()))]
    async fn create_or_update(
        &self,
        resource: Resource,
        payload: &JsonValue,
        remote_id: Option<i64>,
    ) -> Result<RemoteWrite, FetchError> {
        if resource != Resource::Articles {
            return Err(FetchError::fatal(
                self.collection_url(resource),
                "only articles are written back to the store",
            ));
        }

        let (method, url) = match remote_id {
            Some(id) => (Method::PUT, self.member_url(resource, id)),
            None => (Method::POST, self.collection_url(resource)),
        };
        let request = self
            .http
            .request(method, &url)
            .header(ACCESS_TOKEN_HEADER, &self.config.access_token)
            .json(&json!({ "article": payload }));
        let response = self.http.send(request).await?;
        let body: JsonValue = response.json()?;

        let article = body
            .get("article")
            .ok_or_else(|| FetchError::fatal(&url, "response has no `article` object"))
            .and_then(|value| {
                decode_article(value).map_err(|err| FetchError::fatal(&url, err.to_string()))
            })?;

        info!(remote_id = article.remote_id, "article written");
        Ok(RemoteWrite {
            remote_id: article.remote_id,
            updated_at: article.updated_at,
        })
    }
}

/// Extracts `page_info` from the `rel="next"` entry of a `Link` header.
pub fn parse_next_page_info(link_header: &str) -> Option<String> {
    link_header.split(',').find_map(|part| {
        let (target, params) = part.split_once(';')?;
        if !params.split(';').any(|p| p.trim() == r#"rel="next""#) {
            return None;
        }
        let url = target.trim().trim_start_matches('<').trim_end_matches('>');
        let (_, query) = url.split_once('?')?;
        query.split('&').find_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            (key == "page_info" && !value.is_empty()).then(|| value.to_string())
        })
    })
}

/// Body for creating or updating an article.
pub fn article_payload(title: &str, body_html: &str) -> JsonValue {
    json!({ "title": title, "body_html": body_html })
}

#[derive(Debug, Clone, Deserialize)]
struct ShopifyArticle {
    id: Option<i64>,
    title: Option<String>,
    #[serde(default)]
    body_html: Option<String>,
    updated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
struct ShopifyProduct {
    id: Option<i64>,
    title: Option<String>,
    #[serde(default)]
    body_html: Option<String>,
    #[serde(default)]
    vendor: Option<String>,
    #[serde(default)]
    product_type: Option<String>,
    #[serde(default)]
    status: Option<String>,
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    variants: Vec<ShopifyVariant>,
    #[serde(default)]
    images: Vec<ShopifyImage>,
}

#[derive(Debug, Clone, Deserialize)]
struct ShopifyVariant {
    id: Option<i64>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    sku: Option<String>,
    price: Option<JsonValue>,
    #[serde(default)]
    inventory_quantity: Option<i64>,
    #[serde(default)]
    weight: Option<f64>,
    #[serde(default)]
    weight_unit: Option<String>,
    #[serde(default)]
    inventory_policy: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct ShopifyImage {
    src: Option<String>,
}

fn record_key(value: &JsonValue) -> String {
    value
        .get("id")
        .map(|id| id.to_string())
        .unwrap_or_else(|| "<missing id>".to_string())
}

pub fn decode_article(value: &JsonValue) -> Result<RemoteContent, PayloadError> {
    let key = record_key(value);
    let raw: ShopifyArticle = serde_json::from_value(value.clone())
        .map_err(|err| PayloadError::new("article", &key, err.to_string()))?;

    let remote_id = raw
        .id
        .ok_or_else(|| PayloadError::new("article", &key, "missing id"))?;
    let title = raw
        .title
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| PayloadError::new("article", &key, "missing title"))?;
    let updated_at = raw
        .updated_at
        .ok_or_else(|| PayloadError::new("article", &key, "missing updated_at"))?;

    Ok(RemoteContent {
        remote_id,
        title,
        body: raw.body_html.unwrap_or_default(),
        updated_at,
    })
}

pub fn decode_product(value: &JsonValue) -> Result<RemoteCatalogItem, PayloadError> {
    let key = record_key(value);
    let raw: ShopifyProduct = serde_json::from_value(value.clone())
        .map_err(|err| PayloadError::new("product", &key, err.to_string()))?;

    let remote_id = raw
        .id
        .ok_or_else(|| PayloadError::new("product", &key, "missing id"))?;
    let title = raw
        .title
        .ok_or_else(|| PayloadError::new("product", &key, "missing title"))?;
    let updated_at = raw
        .updated_at
        .ok_or_else(|| PayloadError::new("product", &key, "missing updated_at"))?;
    if raw.variants.is_empty() {
        return Err(PayloadError::new("product", &key, "product has no variants"));
    }

    let variants = raw
        .variants
        .into_iter()
        .map(|variant| decode_variant(&key, variant))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RemoteCatalogItem {
        remote_id,
        title,
        body_html: raw.body_html,
        vendor: raw.vendor,
        product_type: raw.product_type,
        status: raw.status.unwrap_or_else(|| "active".to_string()),
        image_urls: raw.images.into_iter().filter_map(|image| image.src).collect(),
        updated_at,
        variants,
    })
}

fn decode_variant(
    product_key: &str,
    variant: ShopifyVariant,
) -> Result<RemoteCatalogVariant, PayloadError> {
    let remote_id = variant
        .id
        .ok_or_else(|| PayloadError::new("variant", product_key, "variant without id"))?;
    let price = match variant.price {
        Some(JsonValue::String(price)) => price,
        Some(JsonValue::Number(price)) => price.to_string(),
        _ => {
            return Err(PayloadError::new(
                "variant",
                remote_id.to_string(),
                "missing price",
            ))
        }
    };

    Ok(RemoteCatalogVariant {
        remote_id,
        title: variant.title.unwrap_or_default(),
        sku: variant.sku,
        price,
        inventory_quantity: variant.inventory_quantity.unwrap_or(0),
        weight: variant.weight.unwrap_or(0.0),
        weight_unit: variant.weight_unit.unwrap_or_else(|| "kg".to_string()),
        inventory_policy: variant.inventory_policy.unwrap_or_else(|| "deny".to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_page_info_comes_from_rel_next_only() {
        let header = r#"<https://shop.example/admin/api/2023-10/products.json?limit=250&page_info=prev123>; rel="previous", <https://shop.example/admin/api/2023-10/products.json?limit=250&page_info=next456>; rel="next""#;
        assert_eq!(parse_next_page_info(header).as_deref(), Some("next456"));

        let last_page = r#"<https://shop.example/admin/api/2023-10/products.json?limit=250&page_info=prev123>; rel="previous""#;
        assert_eq!(parse_next_page_info(last_page), None);
        assert_eq!(parse_next_page_info(""), None);
    }

    #[test]
    fn article_without_updated_at_is_rejected() {
        let err = decode_article(&json!({"id": 12, "title": "Tote care"}))
            .expect_err("updated_at is required");
        assert_eq!(err.key, "12");
        assert!(err.reason.contains("updated_at"));
    }

    #[test]
    fn article_offsets_normalise_to_utc() {
        let article = decode_article(&json!({
            "id": 12,
            "title": "Tote care",
            "body_html": null,
            "updated_at": "2024-03-01T09:00:00-05:00"
        }))
        .expect("valid article");
        assert_eq!(article.updated_at.to_rfc3339(), "2024-03-01T14:00:00+00:00");
        assert_eq!(article.body, "");
    }

    #[test]
    fn product_without_variants_is_rejected() {
        let err = decode_product(&json!({
            "id": 9,
            "title": "Jute Tote",
            "updated_at": "2024-03-01T09:00:00Z",
            "variants": []
        }))
        .expect_err("zero variants");
        assert!(err.reason.contains("no variants"));
    }

    #[test]
    fn numeric_prices_keep_their_text() {
        let product = decode_product(&json!({
            "id": 9,
            "title": "Jute Tote",
            "updated_at": "2024-03-01T09:00:00Z",
            "variants": [{"id": 91, "price": 12.5}]
        }))
        .expect("valid product");
        assert_eq!(product.variants[0].price, "12.5");
        assert_eq!(product.variants[0].weight_unit, "kg");
        assert_eq!(product.status, "active");
    }
}
