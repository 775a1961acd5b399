//! Natural-key to surrogate-key resolution.
//!
//! Resolvers take the connection of an open transaction so the lookup and the
//! write that follows it see the same state.

use acfy_storage::db;
use sqlx::SqliteConnection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    Found(i64),
    Absent,
}

impl From<Option<i64>> for Identity {
    fn from(id: Option<i64>) -> Self {
        id.map_or(Self::Absent, Self::Found)
    }
}

impl Identity {
    pub fn surrogate(self) -> Option<i64> {
        match self {
            Self::Found(id) => Some(id),
            Self::Absent => None,
        }
    }
}

pub async fn resolve_keyword(conn: &mut SqliteConnection, text: &str) -> sqlx::Result<Identity> {
    db::find_keyword_id(conn, text).await.map(Identity::from)
}

pub async fn resolve_content(conn: &mut SqliteConnection, remote_id: i64) -> sqlx::Result<Identity> {
    db::find_content_by_remote_id(conn, remote_id)
        .await
        .map(Identity::from)
}

pub async fn resolve_catalog_item(
    conn: &mut SqliteConnection,
    remote_id: i64,
) -> sqlx::Result<Identity> {
    db::find_catalog_item_id(conn, remote_id)
        .await
        .map(Identity::from)
}

pub async fn resolve_variant(conn: &mut SqliteConnection, remote_id: i64) -> sqlx::Result<Identity> {
    db::find_variant_id(conn, remote_id).await.map(Identity::from)
}

#[cfg(test)]
mod tests {
    use acfy_core::KeywordRecord;
    use acfy_storage::Database;
    use chrono::Utc;

    use super::*;

    #[tokio::test]
    async fn lookup_inside_a_transaction_sees_its_own_insert() {
        let store = Database::connect_in_memory().await.expect("db");
        store.ensure_schema().await.expect("schema");

        let mut tx = store.begin().await.expect("tx");
        assert_eq!(resolve_keyword(&mut tx, "eco bag").await.expect("lookup"), Identity::Absent);
        let id = db::insert_keyword(&mut tx, &KeywordRecord::new("eco bag"), Utc::now())
            .await
            .expect("insert")
            .expect("new row");
        assert_eq!(
            resolve_keyword(&mut tx, "eco bag").await.expect("lookup"),
            Identity::Found(id)
        );
        tx.rollback().await.expect("rollback");

        let mut conn = store.pool().acquire().await.expect("conn");
        assert_eq!(resolve_keyword(&mut conn, "eco bag").await.expect("lookup"), Identity::Absent);
        assert_eq!(resolve_content(&mut conn, 1).await.expect("lookup"), Identity::Absent);
    }
}
