mod common;

use std::num::NonZeroUsize;
use std::sync::Arc;

use acfy_core::{ContentDraft, KeywordRecord, SyncState};
use acfy_storage::{Database, FetchError};
use acfy_sync::{chunk, Reconciler};
use common::{collaborators, config_with, memory_db, pipeline, unauthorized, FakeListing};
use tempfile::tempdir;

async fn queue_posts(db: &Database, count: usize, body: &str) {
    let drafts = (1..=count)
        .map(|n| ContentDraft {
            title: format!("Post {n}"),
            body: body.to_string(),
        })
        .collect();
    Reconciler::new(db.clone())
        .queue_new_content(drafts)
        .await
        .expect("queue posts");
}

#[tokio::test]
async fn eco_bag_batches_store_each_keyword_once() {
    let db = memory_db().await;
    let reconciler = Reconciler::new(db.clone());
    let input = vec!["eco bag", "eco bag", "compost bin"];

    let chunks: Vec<Vec<&str>> = chunk(input, NonZeroUsize::new(2).expect("size")).collect();
    assert_eq!(chunks, vec![vec!["eco bag", "eco bag"], vec!["compost bin"]]);

    let mut duplicates = 0;
    for batch in chunks {
        let report = reconciler
            .insert_new_keywords(batch.into_iter().map(KeywordRecord::new).collect())
            .await;
        assert!(report.failures.is_empty());
        duplicates += report.duplicates_discarded;
    }
    assert_eq!(duplicates, 1);

    let mut stored = db.keyword_texts().await.expect("texts");
    stored.sort();
    assert_eq!(stored, vec!["compost bin", "eco bag"]);
}

#[tokio::test]
async fn second_pull_of_unchanged_listings_mutates_nothing() {
    let root = tempdir().expect("tempdir");
    let listing = Arc::new(FakeListing::from_fixtures());
    let pipeline = pipeline(
        config_with(root.path(), &[]),
        memory_db().await,
        collaborators(Some(listing), None, None, None),
    );

    let articles = pipeline.pull_blogs().await.expect("articles");
    assert_eq!(articles.inserted, 2);
    assert_eq!(articles.failures.len(), 1);
    let products = pipeline.pull_products().await.expect("products");
    assert_eq!(products.inserted, 2);
    assert_eq!(products.failures.len(), 1);

    let articles_again = pipeline.pull_blogs().await.expect("articles");
    let products_again = pipeline.pull_products().await.expect("products");
    assert_eq!(articles_again.mutations(), 0);
    assert_eq!(articles_again.skipped, 2);
    assert_eq!(products_again.mutations(), 0);
    assert_eq!(products_again.skipped, 2);

    let counts = pipeline.database().counts().await.expect("counts");
    assert_eq!(counts.content_synced, 2);
    assert_eq!(counts.catalog_items, 2);
    assert_eq!(counts.catalog_variants, 3);
}

#[tokio::test]
async fn failed_record_stays_pending_while_the_rest_publish() {
    let root = tempdir().expect("tempdir");
    let db = memory_db().await;
    queue_posts(&db, 5, "<p>draft</p>").await;

    let listing = Arc::new(FakeListing::empty());
    listing.fail_title("Post 3", FetchError::transient("fake listing", "503 from upstream"));
    let pipeline = pipeline(
        config_with(root.path(), &[]),
        db.clone(),
        collaborators(Some(listing.clone()), None, None, None),
    );

    let report = pipeline.push_blogs().await.expect("push");
    assert_eq!(report.inserted, 4);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].key.contains("content 3"));
    assert!(!report.aborted);

    let stored = db.content().await.expect("content");
    for record in &stored {
        if record.title == "Post 3" {
            assert_eq!(record.sync_state, SyncState::Pending);
            assert_eq!(record.remote_id, None);
        } else {
            assert_eq!(record.sync_state, SyncState::Synced, "{}", record.title);
            assert!(record.remote_id.is_some());
        }
    }
    assert_eq!(listing.writes.lock().expect("lock").len(), 4);
}

#[tokio::test]
async fn auth_failure_stops_publishing_and_leaves_the_rest_pending() {
    let root = tempdir().expect("tempdir");
    let db = memory_db().await;
    queue_posts(&db, 4, "<p>x</p>").await;

    let listing = Arc::new(FakeListing::empty());
    listing.fail_title("Post 2", unauthorized());
    let pipeline = pipeline(
        config_with(root.path(), &[]),
        db.clone(),
        collaborators(Some(listing.clone()), None, None, None),
    );

    let report = pipeline.push_blogs().await.expect("push");
    assert!(report.aborted);
    assert_eq!(report.inserted, 1);
    assert_eq!(listing.writes.lock().expect("lock").len(), 1);

    let counts = db.counts().await.expect("counts");
    assert_eq!(counts.content_synced, 1);
    assert_eq!(counts.content_pending, 3);
}

#[tokio::test]
async fn deleting_a_product_removes_its_variants() {
    let root = tempdir().expect("tempdir");
    let listing = Arc::new(FakeListing::from_fixtures());
    let pipeline = pipeline(
        config_with(root.path(), &[]),
        memory_db().await,
        collaborators(Some(listing), None, None, None),
    );
    pipeline.pull_products().await.expect("products");

    assert!(pipeline.delete_product(7001).await.expect("delete"));
    let counts = pipeline.database().counts().await.expect("counts");
    assert_eq!(counts.catalog_items, 1);
    assert_eq!(counts.catalog_variants, 1);
    assert!(pipeline
        .database()
        .catalog_item_by_remote_id(7001)
        .await
        .expect("lookup")
        .is_none());
}

#[tokio::test]
async fn variants_dropped_remotely_are_deleted_locally() {
    let root = tempdir().expect("tempdir");
    let listing = Arc::new(FakeListing::from_fixtures());
    let pipeline = pipeline(
        config_with(root.path(), &[]),
        memory_db().await,
        collaborators(Some(listing.clone()), None, None, None),
    );
    pipeline.pull_products().await.expect("first pull");

    {
        let mut products = listing.products.lock().expect("lock");
        let tote = &mut products[0];
        tote["variants"]
            .as_array_mut()
            .expect("variants")
            .retain(|v| v["id"] != 82);
        tote["updated_at"] = "2030-06-01T00:00:00Z".into();
    }

    let report = pipeline.pull_products().await.expect("second pull");
    assert_eq!(report.updated, 1);
    assert_eq!(report.skipped, 1);

    let (_, variants) = pipeline
        .database()
        .catalog_item_by_remote_id(7001)
        .await
        .expect("lookup")
        .expect("tote");
    assert_eq!(variants.iter().map(|v| v.remote_id).collect::<Vec<_>>(), vec![81]);
}

#[tokio::test]
async fn newer_local_edit_survives_pull_and_is_pushed() {
    let root = tempdir().expect("tempdir");
    let listing = Arc::new(FakeListing::from_fixtures());
    let pipeline = pipeline(
        config_with(root.path(), &[]),
        memory_db().await,
        collaborators(Some(listing.clone()), None, None, None),
    );
    pipeline.pull_blogs().await.expect("pull");

    let stored = pipeline.database().content().await.expect("content");
    let local = stored
        .iter()
        .find(|c| c.remote_id == Some(558144001))
        .expect("article");
    pipeline
        .reconciler()
        .record_local_edit(local.local_id, "Edited locally", "<p>fresh</p>")
        .await
        .expect("edit");

    let pulled = pipeline.pull_blogs().await.expect("pull again");
    assert_eq!(pulled.mutations(), 0);
    let edited = pipeline
        .database()
        .content()
        .await
        .expect("content")
        .into_iter()
        .find(|c| c.local_id == local.local_id)
        .expect("edited");
    assert_eq!(edited.title, "Edited locally");
    assert_eq!(edited.sync_state, SyncState::Pending);

    let pushed = pipeline.push_blogs().await.expect("push");
    assert_eq!(pushed.updated, 1);
    assert_eq!(
        listing.writes.lock().expect("lock").as_slice(),
        &[(Some(558144001), "Edited locally".to_string())]
    );
    assert_eq!(pipeline.database().counts().await.expect("counts").content_pending, 0);
}

#[tokio::test]
async fn interrupted_listing_is_walked_again_from_the_first_page() {
    let root = tempdir().expect("tempdir");
    let listing = Arc::new(FakeListing::from_fixtures().flaky_at("2"));
    let pipeline = pipeline(
        config_with(root.path(), &[]),
        memory_db().await,
        collaborators(Some(listing.clone()), None, None, None),
    );

    let report = pipeline.pull_blogs().await.expect("pull");
    assert_eq!(report.inserted, 2);
    assert_eq!(
        *listing.cursor_log.lock().expect("lock"),
        vec![None, Some("2".to_string()), None, Some("2".to_string())]
    );
}
