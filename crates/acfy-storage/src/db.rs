//! Relational store of record (SQLite through sqlx).
//!
//! Per-record functions take a `&mut SqliteConnection` so callers can run the
//! identity lookup and the write inside one transaction. Pool-level helpers on
//! [`Database`] are for reads outside any reconciliation.

use std::str::FromStr;

use acfy_core::{
    AdCampaignRecord, CatalogItem, CatalogVariant, CompetitionLevel, ContentRecord,
    KeywordRecord, RemoteCatalogItem, RemoteCatalogVariant, RemoteContent, SyncState,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, Sqlite, SqliteConnection, SqlitePool, Transaction};
use tracing::info;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS keywords (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    text TEXT NOT NULL UNIQUE,
    avg_monthly_searches INTEGER NOT NULL DEFAULT 0,
    competition_level TEXT NOT NULL DEFAULT 'UNKNOWN',
    competition_index INTEGER NOT NULL DEFAULT 0,
    bid_range_low REAL NOT NULL DEFAULT 0,
    bid_range_high REAL NOT NULL DEFAULT 0,
    top_of_page_bid_micros_low INTEGER NOT NULL DEFAULT 0,
    top_of_page_bid_micros_high INTEGER NOT NULL DEFAULT 0,
    top_of_page_bid_percentile_low REAL NOT NULL DEFAULT 0,
    top_of_page_bid_percentile_high REAL NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS content_records (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    remote_id INTEGER UNIQUE,
    title TEXT NOT NULL,
    body TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    sync_state TEXT NOT NULL CHECK (sync_state IN ('PENDING', 'SYNCED'))
);

CREATE INDEX IF NOT EXISTS content_records_sync_state ON content_records (sync_state);

CREATE TABLE IF NOT EXISTS catalog_items (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    remote_id INTEGER NOT NULL UNIQUE,
    title TEXT NOT NULL,
    body_html TEXT,
    vendor TEXT,
    product_type TEXT,
    status TEXT NOT NULL,
    image_urls TEXT NOT NULL DEFAULT '[]',
    last_synced_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS catalog_variants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    item_id INTEGER NOT NULL REFERENCES catalog_items (id) ON DELETE CASCADE,
    remote_id INTEGER NOT NULL UNIQUE,
    title TEXT NOT NULL,
    sku TEXT,
    price TEXT NOT NULL,
    inventory_quantity INTEGER NOT NULL DEFAULT 0,
    weight REAL NOT NULL DEFAULT 0,
    weight_unit TEXT NOT NULL,
    inventory_policy TEXT NOT NULL,
    last_synced_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS catalog_variants_item ON catalog_variants (item_id);

CREATE TABLE IF NOT EXISTS ad_campaigns (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    budget_resource TEXT NOT NULL,
    campaign_resource TEXT NOT NULL UNIQUE,
    ad_group_resource TEXT NOT NULL,
    ad_resource TEXT NOT NULL,
    keywords TEXT NOT NULL,
    headlines TEXT NOT NULL,
    descriptions TEXT NOT NULL,
    final_url TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

/// Row counts reported by the status endpoint and the daily brief.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub keywords: i64,
    pub content_pending: i64,
    pub content_synced: i64,
    pub catalog_items: i64,
    pub catalog_variants: i64,
    pub ad_campaigns: i64,
}

impl Database {
    /// Opens (creating if missing) the database at `url`.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .with_context(|| format!("parsing database url {url}"))?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .with_context(|| format!("connecting to {url}"))?;
        Ok(Self { pool })
    }

    /// Private in-memory database. A single connection that never expires, so
    /// the data lives as long as the pool.
    pub async fn connect_in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("parsing in-memory database url")?
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("opening in-memory database")?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn begin(&self) -> sqlx::Result<Transaction<'static, Sqlite>> {
        self.pool.begin().await
    }

    /// Creates every table that does not exist yet. Safe to call on every start.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("applying schema statement: {statement}"))?;
        }
        info!("schema ready");
        Ok(())
    }

    pub async fn counts(&self) -> sqlx::Result<StoreCounts> {
        let row = sqlx::query(
            "SELECT
                (SELECT COUNT(*) FROM keywords) AS keywords,
                (SELECT COUNT(*) FROM content_records WHERE sync_state = 'PENDING') AS content_pending,
                (SELECT COUNT(*) FROM content_records WHERE sync_state = 'SYNCED') AS content_synced,
                (SELECT COUNT(*) FROM catalog_items) AS catalog_items,
                (SELECT COUNT(*) FROM catalog_variants) AS catalog_variants,
                (SELECT COUNT(*) FROM ad_campaigns) AS ad_campaigns",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreCounts {
            keywords: row.try_get("keywords")?,
            content_pending: row.try_get("content_pending")?,
            content_synced: row.try_get("content_synced")?,
            catalog_items: row.try_get("catalog_items")?,
            catalog_variants: row.try_get("catalog_variants")?,
            ad_campaigns: row.try_get("ad_campaigns")?,
        })
    }

    pub async fn keyword_texts(&self) -> sqlx::Result<Vec<String>> {
        sqlx::query_scalar("SELECT text FROM keywords ORDER BY id")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn keywords(&self) -> sqlx::Result<Vec<KeywordRecord>> {
        let rows = sqlx::query(&format!("{KEYWORD_SELECT} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(keyword_from_row).collect()
    }

    /// Keywords at or above `min_searches`, most searched first.
    pub async fn keywords_with_min_searches(
        &self,
        min_searches: i64,
        limit: usize,
    ) -> sqlx::Result<Vec<KeywordRecord>> {
        let rows = sqlx::query(&format!(
            "{KEYWORD_SELECT} WHERE avg_monthly_searches >= ? ORDER BY avg_monthly_searches DESC, id LIMIT ?"
        ))
        .bind(min_searches)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(keyword_from_row).collect()
    }

    pub async fn pending_content(&self) -> sqlx::Result<Vec<ContentRecord>> {
        let rows = sqlx::query(&format!(
            "{CONTENT_SELECT} WHERE sync_state = 'PENDING' ORDER BY id"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(content_from_row).collect()
    }

    pub async fn content(&self) -> sqlx::Result<Vec<ContentRecord>> {
        let rows = sqlx::query(&format!("{CONTENT_SELECT} ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(content_from_row).collect()
    }

    pub async fn catalog_item_by_remote_id(
        &self,
        remote_id: i64,
    ) -> sqlx::Result<Option<(CatalogItem, Vec<CatalogVariant>)>> {
        let mut conn = self.pool.acquire().await?;
        let Some(id) = find_catalog_item_id(&mut conn, remote_id).await? else {
            return Ok(None);
        };
        let item = load_catalog_item(&mut conn, id).await?;
        let variants = load_variants(&mut conn, id).await?;
        Ok(Some((item, variants)))
    }

    pub async fn ad_campaign_resources(&self) -> sqlx::Result<Vec<String>> {
        sqlx::query_scalar("SELECT campaign_resource FROM ad_campaigns ORDER BY id")
            .fetch_all(&self.pool)
            .await
    }
}

fn decode_error(column: &str, value: &str) -> sqlx::Error {
    sqlx::Error::Decode(format!("unexpected {column} value {value:?}").into())
}

// keywords

const KEYWORD_SELECT: &str = "SELECT id, text, avg_monthly_searches, competition_level, \
    competition_index, bid_range_low, bid_range_high, top_of_page_bid_micros_low, \
    top_of_page_bid_micros_high, top_of_page_bid_percentile_low, \
    top_of_page_bid_percentile_high FROM keywords";

fn keyword_from_row(row: &SqliteRow) -> sqlx::Result<KeywordRecord> {
    let level: String = row.try_get("competition_level")?;
    Ok(KeywordRecord {
        text: row.try_get("text")?,
        avg_monthly_searches: row.try_get("avg_monthly_searches")?,
        competition_level: CompetitionLevel::parse(&level),
        competition_index: row.try_get("competition_index")?,
        bid_range_low: row.try_get("bid_range_low")?,
        bid_range_high: row.try_get("bid_range_high")?,
        top_of_page_bid_micros_low: row.try_get("top_of_page_bid_micros_low")?,
        top_of_page_bid_micros_high: row.try_get("top_of_page_bid_micros_high")?,
        top_of_page_bid_percentile_low: row.try_get("top_of_page_bid_percentile_low")?,
        top_of_page_bid_percentile_high: row.try_get("top_of_page_bid_percentile_high")?,
    })
}

pub async fn find_keyword_id(conn: &mut SqliteConnection, text: &str) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar("SELECT id FROM keywords WHERE text = ?")
        .bind(text)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn load_keyword(conn: &mut SqliteConnection, id: i64) -> sqlx::Result<KeywordRecord> {
    let row = sqlx::query(&format!("{KEYWORD_SELECT} WHERE id = ?"))
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    keyword_from_row(&row)
}

/// Inserts unless the text already exists. Returns the new id, or `None` on conflict.
pub async fn insert_keyword(
    conn: &mut SqliteConnection,
    keyword: &KeywordRecord,
    now: DateTime<Utc>,
) -> sqlx::Result<Option<i64>> {
    let result = sqlx::query(
        "INSERT INTO keywords (text, avg_monthly_searches, competition_level, competition_index,
            bid_range_low, bid_range_high, top_of_page_bid_micros_low, top_of_page_bid_micros_high,
            top_of_page_bid_percentile_low, top_of_page_bid_percentile_high, created_at, updated_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT (text) DO NOTHING",
    )
    .bind(&keyword.text)
    .bind(keyword.avg_monthly_searches)
    .bind(keyword.competition_level.as_str())
    .bind(keyword.competition_index)
    .bind(keyword.bid_range_low)
    .bind(keyword.bid_range_high)
    .bind(keyword.top_of_page_bid_micros_low)
    .bind(keyword.top_of_page_bid_micros_high)
    .bind(keyword.top_of_page_bid_percentile_low)
    .bind(keyword.top_of_page_bid_percentile_high)
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        Ok(None)
    } else {
        Ok(Some(result.last_insert_rowid()))
    }
}

pub async fn update_keyword_metrics(
    conn: &mut SqliteConnection,
    id: i64,
    keyword: &KeywordRecord,
    now: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE keywords SET avg_monthly_searches = ?, competition_level = ?,
            competition_index = ?, bid_range_low = ?, bid_range_high = ?,
            top_of_page_bid_micros_low = ?, top_of_page_bid_micros_high = ?,
            top_of_page_bid_percentile_low = ?, top_of_page_bid_percentile_high = ?,
            updated_at = ?
         WHERE id = ?",
    )
    .bind(keyword.avg_monthly_searches)
    .bind(keyword.competition_level.as_str())
    .bind(keyword.competition_index)
    .bind(keyword.bid_range_low)
    .bind(keyword.bid_range_high)
    .bind(keyword.top_of_page_bid_micros_low)
    .bind(keyword.top_of_page_bid_micros_high)
    .bind(keyword.top_of_page_bid_percentile_low)
    .bind(keyword.top_of_page_bid_percentile_high)
    .bind(now)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// content

const CONTENT_SELECT: &str =
    "SELECT id, remote_id, title, body, updated_at, sync_state FROM content_records";

fn content_from_row(row: &SqliteRow) -> sqlx::Result<ContentRecord> {
    let state: String = row.try_get("sync_state")?;
    Ok(ContentRecord {
        local_id: row.try_get("id")?,
        remote_id: row.try_get("remote_id")?,
        title: row.try_get("title")?,
        body: row.try_get("body")?,
        updated_at: row.try_get("updated_at")?,
        sync_state: SyncState::parse(&state).ok_or_else(|| decode_error("sync_state", &state))?,
    })
}

pub async fn find_content_by_remote_id(
    conn: &mut SqliteConnection,
    remote_id: i64,
) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar("SELECT id FROM content_records WHERE remote_id = ?")
        .bind(remote_id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn load_content(conn: &mut SqliteConnection, id: i64) -> sqlx::Result<ContentRecord> {
    let row = sqlx::query(&format!("{CONTENT_SELECT} WHERE id = ?"))
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    content_from_row(&row)
}

/// Stores a remote article that has no local row yet.
pub async fn insert_synced_content(
    conn: &mut SqliteConnection,
    remote: &RemoteContent,
) -> sqlx::Result<i64> {
    let result = sqlx::query(
        "INSERT INTO content_records (remote_id, title, body, updated_at, sync_state)
         VALUES (?, ?, ?, ?, 'SYNCED')",
    )
    .bind(remote.remote_id)
    .bind(&remote.title)
    .bind(&remote.body)
    .bind(remote.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Stores locally created content that has never been published.
pub async fn insert_pending_content(
    conn: &mut SqliteConnection,
    title: &str,
    body: &str,
    created_at: DateTime<Utc>,
) -> sqlx::Result<i64> {
    let result = sqlx::query(
        "INSERT INTO content_records (remote_id, title, body, updated_at, sync_state)
         VALUES (NULL, ?, ?, ?, 'PENDING')",
    )
    .bind(title)
    .bind(body)
    .bind(created_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Overwrites the local copy with the remote one.
pub async fn overwrite_content_from_remote(
    conn: &mut SqliteConnection,
    id: i64,
    remote: &RemoteContent,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE content_records SET remote_id = ?, title = ?, body = ?, updated_at = ?,
            sync_state = 'SYNCED'
         WHERE id = ?",
    )
    .bind(remote.remote_id)
    .bind(&remote.title)
    .bind(&remote.body)
    .bind(remote.updated_at)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn mark_content_synced(
    conn: &mut SqliteConnection,
    id: i64,
    remote_id: i64,
    updated_at: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE content_records SET remote_id = ?, updated_at = ?, sync_state = 'SYNCED'
         WHERE id = ?",
    )
    .bind(remote_id)
    .bind(updated_at)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Applies a local edit and queues it for publishing.
pub async fn stage_content_edit(
    conn: &mut SqliteConnection,
    id: i64,
    title: &str,
    body: &str,
    edited_at: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE content_records SET title = ?, body = ?, updated_at = ?, sync_state = 'PENDING'
         WHERE id = ?",
    )
    .bind(title)
    .bind(body)
    .bind(edited_at)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

// catalog

const ITEM_SELECT: &str = "SELECT id, remote_id, title, body_html, vendor, product_type, status, \
    image_urls, last_synced_at FROM catalog_items";

const VARIANT_SELECT: &str = "SELECT id, item_id, remote_id, title, sku, price, \
    inventory_quantity, weight, weight_unit, inventory_policy, last_synced_at FROM catalog_variants";

fn catalog_item_from_row(row: &SqliteRow) -> sqlx::Result<CatalogItem> {
    let image_urls: String = row.try_get("image_urls")?;
    Ok(CatalogItem {
        id: row.try_get("id")?,
        remote_id: row.try_get("remote_id")?,
        title: row.try_get("title")?,
        body_html: row.try_get("body_html")?,
        vendor: row.try_get("vendor")?,
        product_type: row.try_get("product_type")?,
        status: row.try_get("status")?,
        image_urls: serde_json::from_str(&image_urls)
            .map_err(|_| decode_error("image_urls", &image_urls))?,
        last_synced_at: row.try_get("last_synced_at")?,
    })
}

fn variant_from_row(row: &SqliteRow) -> sqlx::Result<CatalogVariant> {
    Ok(CatalogVariant {
        id: row.try_get("id")?,
        item_id: row.try_get("item_id")?,
        remote_id: row.try_get("remote_id")?,
        title: row.try_get("title")?,
        sku: row.try_get("sku")?,
        price: row.try_get("price")?,
        inventory_quantity: row.try_get("inventory_quantity")?,
        weight: row.try_get("weight")?,
        weight_unit: row.try_get("weight_unit")?,
        inventory_policy: row.try_get("inventory_policy")?,
        last_synced_at: row.try_get("last_synced_at")?,
    })
}

fn image_urls_json(urls: &[String]) -> sqlx::Result<String> {
    serde_json::to_string(urls).map_err(|err| sqlx::Error::Encode(Box::new(err)))
}

pub async fn find_catalog_item_id(
    conn: &mut SqliteConnection,
    remote_id: i64,
) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar("SELECT id FROM catalog_items WHERE remote_id = ?")
        .bind(remote_id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn load_catalog_item(conn: &mut SqliteConnection, id: i64) -> sqlx::Result<CatalogItem> {
    let row = sqlx::query(&format!("{ITEM_SELECT} WHERE id = ?"))
        .bind(id)
        .fetch_one(&mut *conn)
        .await?;
    catalog_item_from_row(&row)
}

pub async fn insert_catalog_item(
    conn: &mut SqliteConnection,
    remote: &RemoteCatalogItem,
) -> sqlx::Result<i64> {
    let result = sqlx::query(
        "INSERT INTO catalog_items (remote_id, title, body_html, vendor, product_type, status,
            image_urls, last_synced_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(remote.remote_id)
    .bind(&remote.title)
    .bind(&remote.body_html)
    .bind(&remote.vendor)
    .bind(&remote.product_type)
    .bind(&remote.status)
    .bind(image_urls_json(&remote.image_urls)?)
    .bind(remote.updated_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

pub async fn update_catalog_item(
    conn: &mut SqliteConnection,
    id: i64,
    remote: &RemoteCatalogItem,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE catalog_items SET title = ?, body_html = ?, vendor = ?, product_type = ?,
            status = ?, image_urls = ?, last_synced_at = ?
         WHERE id = ?",
    )
    .bind(&remote.title)
    .bind(&remote.body_html)
    .bind(&remote.vendor)
    .bind(&remote.product_type)
    .bind(&remote.status)
    .bind(image_urls_json(&remote.image_urls)?)
    .bind(remote.updated_at)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Deletes the item; its variants go with it through the foreign-key cascade.
pub async fn delete_catalog_item(conn: &mut SqliteConnection, remote_id: i64) -> sqlx::Result<bool> {
    let result = sqlx::query("DELETE FROM catalog_items WHERE remote_id = ?")
        .bind(remote_id)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn load_variants(
    conn: &mut SqliteConnection,
    item_id: i64,
) -> sqlx::Result<Vec<CatalogVariant>> {
    let rows = sqlx::query(&format!("{VARIANT_SELECT} WHERE item_id = ? ORDER BY id"))
        .bind(item_id)
        .fetch_all(&mut *conn)
        .await?;
    rows.iter().map(variant_from_row).collect()
}

pub async fn find_variant_id(
    conn: &mut SqliteConnection,
    remote_id: i64,
) -> sqlx::Result<Option<i64>> {
    sqlx::query_scalar("SELECT id FROM catalog_variants WHERE remote_id = ?")
        .bind(remote_id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn insert_variant(
    conn: &mut SqliteConnection,
    item_id: i64,
    variant: &RemoteCatalogVariant,
    synced_at: DateTime<Utc>,
) -> sqlx::Result<i64> {
    let result = sqlx::query(
        "INSERT INTO catalog_variants (item_id, remote_id, title, sku, price, inventory_quantity,
            weight, weight_unit, inventory_policy, last_synced_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(item_id)
    .bind(variant.remote_id)
    .bind(&variant.title)
    .bind(&variant.sku)
    .bind(&variant.price)
    .bind(variant.inventory_quantity)
    .bind(variant.weight)
    .bind(&variant.weight_unit)
    .bind(&variant.inventory_policy)
    .bind(synced_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}

/// Rewrites a variant, re-parenting it if the platform moved it.
pub async fn update_variant(
    conn: &mut SqliteConnection,
    id: i64,
    item_id: i64,
    variant: &RemoteCatalogVariant,
    synced_at: DateTime<Utc>,
) -> sqlx::Result<()> {
    sqlx::query(
        "UPDATE catalog_variants SET item_id = ?, title = ?, sku = ?, price = ?,
            inventory_quantity = ?, weight = ?, weight_unit = ?, inventory_policy = ?,
            last_synced_at = ?
         WHERE id = ?",
    )
    .bind(item_id)
    .bind(&variant.title)
    .bind(&variant.sku)
    .bind(&variant.price)
    .bind(variant.inventory_quantity)
    .bind(variant.weight)
    .bind(&variant.weight_unit)
    .bind(&variant.inventory_policy)
    .bind(synced_at)
    .bind(id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn delete_variant(conn: &mut SqliteConnection, id: i64) -> sqlx::Result<()> {
    sqlx::query("DELETE FROM catalog_variants WHERE id = ?")
        .bind(id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// ad campaigns

pub async fn insert_ad_campaign(
    conn: &mut SqliteConnection,
    record: &AdCampaignRecord,
) -> sqlx::Result<i64> {
    let encode = |values: &[String]| {
        serde_json::to_string(values).map_err(|err| sqlx::Error::Encode(Box::new(err)))
    };
    let result = sqlx::query(
        "INSERT INTO ad_campaigns (budget_resource, campaign_resource, ad_group_resource,
            ad_resource, keywords, headlines, descriptions, final_url, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&record.budget_resource)
    .bind(&record.campaign_resource)
    .bind(&record.ad_group_resource)
    .bind(&record.ad_resource)
    .bind(encode(&record.keywords)?)
    .bind(encode(&record.headlines)?)
    .bind(encode(&record.descriptions)?)
    .bind(&record.final_url)
    .bind(record.created_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.last_insert_rowid())
}
