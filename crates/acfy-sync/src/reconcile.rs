//! Reconciliation between the remote platforms and the local store.
//!
//! Every record is decided in its own transaction: resolve identity, compare,
//! then insert, update or skip. A failing record is reported and the batch
//! moves on. Transactions never span a remote call.

use std::collections::{HashMap, HashSet};
use std::hash::Hash;

use acfy_adapters::shopify::{article_payload, decode_article, decode_product};
use acfy_adapters::{RemoteListingClient, Resource};
use acfy_core::{ContentDraft, ContentRecord, KeywordRecord, RemoteCatalogItem, RemoteContent};
use acfy_storage::{db, Database};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{debug, info, warn};

use crate::identity::{
    resolve_catalog_item, resolve_content, resolve_keyword, resolve_variant, Identity,
};
use crate::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Inserted,
    Updated,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecordFailure {
    pub key: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub duplicates_discarded: usize,
    pub failures: Vec<RecordFailure>,
    /// Set when an auth failure stopped the batch early.
    pub aborted: bool,
}

impl ReconcileReport {
    pub fn record(&mut self, decision: Decision) {
        match decision {
            Decision::Inserted => self.inserted += 1,
            Decision::Updated => self.updated += 1,
            Decision::Skipped => self.skipped += 1,
        }
    }

    pub fn fail(&mut self, key: impl Into<String>, error: &SyncError) {
        let key = key.into();
        warn!(key = %key, error = %error, "record failed");
        self.failures.push(RecordFailure {
            key,
            error: error.to_string(),
        });
    }

    fn apply(&mut self, key: impl Into<String>, outcome: Result<Decision, SyncError>) {
        match outcome {
            Ok(decision) => self.record(decision),
            Err(err) => self.fail(key, &err),
        }
    }

    pub fn merge(&mut self, other: ReconcileReport) {
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.skipped += other.skipped;
        self.duplicates_discarded += other.duplicates_discarded;
        self.failures.extend(other.failures);
        self.aborted |= other.aborted;
    }

    /// Rows inserted or updated.
    pub fn mutations(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Keeps the first occurrence of every key. Returns the survivors and the
/// number of later duplicates dropped.
pub fn dedup_first_seen<T, K, F>(items: Vec<T>, key: F) -> (Vec<T>, usize)
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut seen = HashSet::new();
    let mut kept = Vec::with_capacity(items.len());
    let mut dropped = 0;
    for item in items {
        if seen.insert(key(&item)) {
            kept.push(item);
        } else {
            dropped += 1;
        }
    }
    (kept, dropped)
}

#[derive(Debug, Clone)]
pub struct Reconciler {
    db: Database,
}

impl Reconciler {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Insert-only: a keyword that already exists is skipped, never updated.
    pub async fn insert_new_keywords(&self, keywords: Vec<KeywordRecord>) -> ReconcileReport {
        let (keywords, duplicates) = dedup_first_seen(keywords, |k| k.text.clone());
        let mut report = ReconcileReport {
            duplicates_discarded: duplicates,
            ..Default::default()
        };
        for keyword in &keywords {
            let outcome = self.insert_keyword_if_absent(keyword).await;
            report.apply(format!("keyword {:?}", keyword.text), outcome);
        }
        report
    }

    async fn insert_keyword_if_absent(&self, keyword: &KeywordRecord) -> Result<Decision, SyncError> {
        let key = keyword.text.as_str();
        let mut tx = self.db.begin().await.map_err(|e| SyncError::persistence(key, e))?;
        let decision = match resolve_keyword(&mut tx, key)
            .await
            .map_err(|e| SyncError::persistence(key, e))?
        {
            Identity::Found(_) => Decision::Skipped,
            Identity::Absent => {
                match db::insert_keyword(&mut tx, keyword, Utc::now())
                    .await
                    .map_err(|e| SyncError::persistence(key, e))?
                {
                    Some(_) => Decision::Inserted,
                    None => Decision::Skipped,
                }
            }
        };
        tx.commit().await.map_err(|e| SyncError::persistence(key, e))?;
        Ok(decision)
    }

    /// Metrics refresh: insert absent keywords, update changed ones, skip the rest.
    pub async fn upsert_keyword_metrics(&self, keywords: Vec<KeywordRecord>) -> ReconcileReport {
        let (keywords, duplicates) = dedup_first_seen(keywords, |k| k.text.clone());
        let mut report = ReconcileReport {
            duplicates_discarded: duplicates,
            ..Default::default()
        };
        for keyword in &keywords {
            let outcome = self.upsert_keyword(keyword).await;
            report.apply(format!("keyword {:?}", keyword.text), outcome);
        }
        report
    }

    async fn upsert_keyword(&self, keyword: &KeywordRecord) -> Result<Decision, SyncError> {
        let key = keyword.text.as_str();
        let persist = |e| SyncError::persistence(key, e);
        let mut tx = self.db.begin().await.map_err(persist)?;
        let now = Utc::now();
        let decision = match resolve_keyword(&mut tx, key).await.map_err(persist)? {
            Identity::Absent => {
                db::insert_keyword(&mut tx, keyword, now).await.map_err(persist)?;
                Decision::Inserted
            }
            Identity::Found(id) => {
                let stored = db::load_keyword(&mut tx, id).await.map_err(persist)?;
                if stored == *keyword {
                    Decision::Skipped
                } else {
                    db::update_keyword_metrics(&mut tx, id, keyword, now)
                        .await
                        .map_err(persist)?;
                    Decision::Updated
                }
            }
        };
        tx.commit().await.map_err(persist)?;
        Ok(decision)
    }

    /// Remote to local for blog articles, last writer wins by timestamp.
    pub async fn pull_content(&self, raw: Vec<JsonValue>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut decoded = Vec::with_capacity(raw.len());
        for value in &raw {
            match decode_article(value) {
                Ok(article) => decoded.push(article),
                Err(err) => {
                    let key = format!("article {}", err.key);
                    report.fail(key, &SyncError::from(err));
                }
            }
        }

        let (articles, duplicates) = dedup_first_seen(decoded, |a| a.remote_id);
        report.duplicates_discarded = duplicates;
        for article in &articles {
            let outcome = self.pull_article(article).await;
            report.apply(format!("article {}", article.remote_id), outcome);
        }
        info!(
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failures.len(),
            "articles reconciled"
        );
        report
    }

    async fn pull_article(&self, remote: &RemoteContent) -> Result<Decision, SyncError> {
        let key = format!("article {}", remote.remote_id);
        let persist = |e| SyncError::persistence(key.clone(), e);
        let mut tx = self.db.begin().await.map_err(persist)?;
        let decision = match resolve_content(&mut tx, remote.remote_id)
            .await
            .map_err(persist)?
        {
            Identity::Absent => {
                db::insert_synced_content(&mut tx, remote).await.map_err(persist)?;
                Decision::Inserted
            }
            Identity::Found(id) => {
                let local = db::load_content(&mut tx, id).await.map_err(persist)?;
                if local_edit_wins(&local, remote) {
                    debug!(remote_id = remote.remote_id, local_id = id, "local edit is newer");
                    Decision::Skipped
                } else if local.matches_remote(remote) {
                    Decision::Skipped
                } else {
                    db::overwrite_content_from_remote(&mut tx, id, remote)
                        .await
                        .map_err(persist)?;
                    Decision::Updated
                }
            }
        };
        tx.commit().await.map_err(persist)?;
        Ok(decision)
    }

    /// Remote to local for products. An item and its variants share one
    /// transaction; variants the remote no longer lists are deleted.
    pub async fn pull_catalog(&self, raw: Vec<JsonValue>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let mut decoded = Vec::with_capacity(raw.len());
        for value in &raw {
            match decode_product(value) {
                Ok(product) => decoded.push(product),
                Err(err) => {
                    let key = format!("product {}", err.key);
                    report.fail(key, &SyncError::from(err));
                }
            }
        }

        let (products, duplicates) = dedup_first_seen(decoded, |p| p.remote_id);
        report.duplicates_discarded = duplicates;
        for product in products {
            let key = format!("product {}", product.remote_id);
            let outcome = self.pull_product(product, &mut report.duplicates_discarded).await;
            report.apply(key, outcome);
        }
        info!(
            inserted = report.inserted,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failures.len(),
            "products reconciled"
        );
        report
    }

    async fn pull_product(
        &self,
        mut remote: RemoteCatalogItem,
        duplicates: &mut usize,
    ) -> Result<Decision, SyncError> {
        let key = format!("product {}", remote.remote_id);
        let persist = |e| SyncError::persistence(key.clone(), e);

        let (variants, dropped) = dedup_first_seen(std::mem::take(&mut remote.variants), |v| v.remote_id);
        remote.variants = variants;

        let synced_at = remote.updated_at;
        let mut tx = self.db.begin().await.map_err(persist)?;
        let decision = match resolve_catalog_item(&mut tx, remote.remote_id)
            .await
            .map_err(persist)?
        {
            Identity::Absent => {
                let item_id = db::insert_catalog_item(&mut tx, &remote).await.map_err(persist)?;
                for variant in &remote.variants {
                    match resolve_variant(&mut tx, variant.remote_id).await.map_err(persist)? {
                        Identity::Found(variant_id) => {
                            db::update_variant(&mut tx, variant_id, item_id, variant, synced_at)
                                .await
                                .map_err(persist)?;
                        }
                        Identity::Absent => {
                            db::insert_variant(&mut tx, item_id, variant, synced_at)
                                .await
                                .map_err(persist)?;
                        }
                    }
                }
                Decision::Inserted
            }
            Identity::Found(item_id) => {
                let local = db::load_catalog_item(&mut tx, item_id).await.map_err(persist)?;
                if local.last_synced_at > synced_at {
                    debug!(remote_id = remote.remote_id, "stored product is newer");
                    Decision::Skipped
                } else {
                    let local_variants: HashMap<i64, _> = db::load_variants(&mut tx, item_id)
                        .await
                        .map_err(persist)?
                        .into_iter()
                        .map(|v| (v.remote_id, v))
                        .collect();

                    let mut changed = false;
                    if !local.matches_remote(&remote) {
                        db::update_catalog_item(&mut tx, item_id, &remote)
                            .await
                            .map_err(persist)?;
                        changed = true;
                    }

                    for variant in &remote.variants {
                        if local_variants
                            .get(&variant.remote_id)
                            .is_some_and(|stored| stored.matches_remote(variant, synced_at))
                        {
                            continue;
                        }
                        changed = true;
                        match resolve_variant(&mut tx, variant.remote_id).await.map_err(persist)? {
                            Identity::Found(variant_id) => {
                                db::update_variant(&mut tx, variant_id, item_id, variant, synced_at)
                                    .await
                                    .map_err(persist)?;
                            }
                            Identity::Absent => {
                                db::insert_variant(&mut tx, item_id, variant, synced_at)
                                    .await
                                    .map_err(persist)?;
                            }
                        }
                    }

                    let listed: HashSet<i64> = remote.variants.iter().map(|v| v.remote_id).collect();
                    for stale in local_variants.values().filter(|v| !listed.contains(&v.remote_id)) {
                        debug!(
                            remote_id = remote.remote_id,
                            variant = stale.remote_id,
                            "removing variant no longer listed"
                        );
                        db::delete_variant(&mut tx, stale.id).await.map_err(persist)?;
                        changed = true;
                    }

                    if changed {
                        Decision::Updated
                    } else {
                        Decision::Skipped
                    }
                }
            }
        };
        tx.commit().await.map_err(persist)?;
        *duplicates += dropped;
        Ok(decision)
    }

    /// Local to remote for articles. A failed record stays PENDING and the
    /// loop continues, except after an auth failure.
    pub async fn push_pending_content(
        &self,
        client: &dyn RemoteListingClient,
    ) -> Result<ReconcileReport, SyncError> {
        let pending = self
            .db
            .pending_content()
            .await
            .map_err(|e| SyncError::persistence("pending content", e))?;
        let mut report = ReconcileReport::default();

        for (index, record) in pending.iter().enumerate() {
            let key = format!("content {}", record.local_id);
            let payload = article_payload(&record.title, &record.body);
            let written = match client
                .create_or_update(Resource::Articles, &payload, record.remote_id)
                .await
            {
                Ok(written) => written,
                Err(err) => {
                    let err = SyncError::fetch(key.clone(), err);
                    report.fail(key, &err);
                    if err.is_auth_failure() {
                        warn!(
                            remaining = pending.len() - index - 1,
                            "auth failure; remaining records stay pending"
                        );
                        report.aborted = true;
                        break;
                    }
                    continue;
                }
            };

            let outcome = self.mark_pushed(record, written.remote_id, written.updated_at).await;
            report.apply(key, outcome);
        }
        info!(
            published = report.mutations(),
            failed = report.failures.len(),
            aborted = report.aborted,
            "pending content pushed"
        );
        Ok(report)
    }

    async fn mark_pushed(
        &self,
        record: &ContentRecord,
        remote_id: i64,
        updated_at: DateTime<Utc>,
    ) -> Result<Decision, SyncError> {
        let key = format!("content {}", record.local_id);
        let persist = |e| SyncError::persistence(key.clone(), e);
        let mut tx = self.db.begin().await.map_err(persist)?;
        db::mark_content_synced(&mut tx, record.local_id, remote_id, updated_at)
            .await
            .map_err(persist)?;
        tx.commit().await.map_err(persist)?;
        Ok(if record.remote_id.is_some() {
            Decision::Updated
        } else {
            Decision::Inserted
        })
    }

    /// Removes a product; its variants go with it through the cascade.
    pub async fn delete_catalog_item(&self, remote_id: i64) -> Result<bool, SyncError> {
        let key = format!("product {remote_id}");
        let mut conn = self
            .db
            .pool()
            .acquire()
            .await
            .map_err(|e| SyncError::persistence(key.clone(), e))?;
        let deleted = db::delete_catalog_item(&mut conn, remote_id)
            .await
            .map_err(|e| SyncError::persistence(key.clone(), e))?;
        info!(remote_id, deleted, "catalog item delete");
        Ok(deleted)
    }

    /// Stores new local content as PENDING, all drafts in one transaction.
    /// Returns the local ids in draft order.
    pub async fn queue_new_content(&self, drafts: Vec<ContentDraft>) -> Result<Vec<i64>, SyncError> {
        let persist = |e| SyncError::persistence("new content", e);
        let mut tx = self.db.begin().await.map_err(persist)?;
        let now = Utc::now();
        let mut ids = Vec::with_capacity(drafts.len());
        for draft in &drafts {
            let id = db::insert_pending_content(&mut tx, &draft.title, &draft.body, now)
                .await
                .map_err(|e| SyncError::persistence(format!("content {:?}", draft.title), e))?;
            debug!(local_id = id, title = %draft.title, "content queued for publishing");
            ids.push(id);
        }
        tx.commit().await.map_err(persist)?;
        Ok(ids)
    }

    /// Applies an edit made locally and queues it for the next push.
    pub async fn record_local_edit(
        &self,
        local_id: i64,
        title: &str,
        body: &str,
    ) -> Result<(), SyncError> {
        let key = format!("content {local_id}");
        let persist = |e| SyncError::persistence(key.clone(), e);
        let mut tx = self.db.begin().await.map_err(persist)?;
        db::load_content(&mut tx, local_id).await.map_err(persist)?;
        db::stage_content_edit(&mut tx, local_id, title, body, Utc::now())
            .await
            .map_err(persist)?;
        tx.commit().await.map_err(persist)?;
        Ok(())
    }
}

fn local_edit_wins(local: &ContentRecord, remote: &RemoteContent) -> bool {
    local.updated_at > remote.updated_at
}

#[cfg(test)]
mod tests {
    use acfy_core::{CompetitionLevel, SyncState};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use super::*;

    async fn reconciler() -> Reconciler {
        let store = Database::connect_in_memory().await.expect("db");
        store.ensure_schema().await.expect("schema");
        Reconciler::new(store)
    }

    fn article(id: i64, title: &str, updated_at: &str) -> JsonValue {
        json!({"id": id, "title": title, "body_html": "<p>body</p>", "updated_at": updated_at})
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let (kept, dropped) = dedup_first_seen(vec!["eco bag", "eco bag", "compost bin"], |s| *s);
        assert_eq!(kept, vec!["eco bag", "compost bin"]);
        assert_eq!(dropped, 1);
    }

    #[tokio::test]
    async fn insert_only_mode_never_updates_existing_keywords() {
        let rec = reconciler().await;
        let first = rec.insert_new_keywords(vec![KeywordRecord::new("eco bag")]).await;
        assert_eq!(first.inserted, 1);

        let mut richer = KeywordRecord::new("eco bag");
        richer.avg_monthly_searches = 5000;
        let second = rec.insert_new_keywords(vec![richer]).await;
        assert_eq!(second.skipped, 1);
        assert_eq!(second.mutations(), 0);

        let stored = rec.database().keywords().await.expect("keywords");
        assert_eq!(stored[0].avg_monthly_searches, 0);
    }

    #[tokio::test]
    async fn metrics_refresh_inserts_updates_and_skips() {
        let rec = reconciler().await;
        rec.insert_new_keywords(vec![KeywordRecord::new("eco bag")]).await;

        let mut eco = KeywordRecord::new("eco bag");
        eco.avg_monthly_searches = 2900;
        eco.competition_level = CompetitionLevel::Medium;
        let fresh = KeywordRecord::new("jute tote");

        let report = rec.upsert_keyword_metrics(vec![eco.clone(), fresh.clone()]).await;
        assert_eq!((report.inserted, report.updated, report.skipped), (1, 1, 0));

        let again = rec.upsert_keyword_metrics(vec![eco, fresh]).await;
        assert_eq!((again.inserted, again.updated, again.skipped), (0, 0, 2));
    }

    #[tokio::test]
    async fn invalid_articles_are_reported_and_the_rest_land() {
        let rec = reconciler().await;
        let report = rec
            .pull_content(vec![
                article(1, "First", "2024-03-01T10:00:00Z"),
                article(2, "", "2024-03-01T10:00:00Z"),
                article(1, "First again", "2024-03-02T10:00:00Z"),
            ])
            .await;

        assert_eq!(report.inserted, 1);
        assert_eq!(report.duplicates_discarded, 1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].key.contains('2'));

        let stored = rec.database().content().await.expect("content");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].title, "First");
        assert_eq!(stored[0].sync_state, SyncState::Synced);
    }

    #[tokio::test]
    async fn newer_remote_overwrites_synced_copy() {
        let rec = reconciler().await;
        rec.pull_content(vec![article(5, "Old", "2024-03-01T10:00:00Z")]).await;
        let report = rec.pull_content(vec![article(5, "New", "2024-03-05T10:00:00Z")]).await;
        assert_eq!(report.updated, 1);

        let stored = rec.database().content().await.expect("content");
        assert_eq!(stored[0].title, "New");
        assert_eq!(
            stored[0].updated_at,
            Utc.with_ymd_and_hms(2024, 3, 5, 10, 0, 0).single().expect("date")
        );
    }

    #[tokio::test]
    async fn queued_drafts_are_pending_without_remote_id() {
        let rec = reconciler().await;
        let ids = rec
            .queue_new_content(vec![
                ContentDraft {
                    title: "Why eco bags matter".to_string(),
                    body: "<p>one</p>".to_string(),
                },
                ContentDraft {
                    title: "Composting at home".to_string(),
                    body: "<p>two</p>".to_string(),
                },
            ])
            .await
            .expect("queue");
        assert_eq!(ids.len(), 2);

        let stored = rec.database().pending_content().await.expect("pending");
        assert_eq!(stored.len(), 2);
        for (record, id) in stored.iter().zip(&ids) {
            assert_eq!(record.local_id, *id);
            assert_eq!(record.sync_state, SyncState::Pending);
            assert_eq!(record.remote_id, None);
        }
        assert_eq!(stored[1].title, "Composting at home");
    }

    #[tokio::test]
    async fn editing_a_missing_record_is_a_persistence_error() {
        let rec = reconciler().await;
        let err = rec.record_local_edit(99, "t", "b").await.expect_err("missing");
        assert!(matches!(err, SyncError::Persistence { .. }));
    }

    #[tokio::test]
    async fn deleting_an_unknown_product_reports_false() {
        let rec = reconciler().await;
        assert!(!rec.delete_catalog_item(123).await.expect("delete"));
    }
}
