//! A [`DocumentStore`] keeping JSONB documents in PostgreSQL.
//!
//! All collections share the `documents` table, keyed by `(collection, id)`.
//! Updates are merged into the stored body with `||`, which gives the same
//! result as setting each top-level field.

use super::{
    Collection, Document, DocumentStore, ObjectId, StoreError, StoreResult, UpdateDefinition,
    UpdateResult, ID_FIELD,
};
use crate::infra::database::{DbPool, Tx};
use serde_json::Value;
use sqlx::types::Json;
use tracing::{instrument, Instrument};

/// A document store on top of a PostgreSQL pool.
#[derive(Clone, Debug)]
pub struct PgDocumentStore {
    pool: DbPool,
}

impl PgDocumentStore {
    /// Creates a store using the given pool.
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Creates the document table if it is missing.
    #[instrument(skip(self))]
    pub async fn migrate(&self) -> StoreResult<()> {
        tracing::info!("Running migrations");
        sqlx::migrate!().run(&self.pool).await?;
        Ok(())
    }
}

/// A session on a [`PgDocumentStore`].
///
/// The open transaction, if any, is an [`sqlx::Transaction`], which rolls
/// back by itself when dropped.
#[derive(Debug)]
pub struct PgSession {
    pool: DbPool,
    tx: Option<Tx>,
}

impl PgSession {
    /// Whether a transaction is open on this session.
    pub fn in_transaction(&self) -> bool {
        self.tx.is_some()
    }
}

const UPDATE_ONE: &str = r#"
    WITH target AS (
        SELECT id, body FROM documents
        WHERE collection = $1 AND id = $2
        FOR UPDATE
    ),
    changed AS (
        UPDATE documents AS d
        SET body = t.body || $3
        FROM target AS t
        WHERE d.collection = $1
          AND d.id = t.id
          AND t.body || $3 IS DISTINCT FROM t.body
        RETURNING d.id
    )
    SELECT
        (SELECT COUNT(*) FROM target) AS matched,
        (SELECT COUNT(*) FROM changed) AS modified
"#;

#[async_trait::async_trait]
impl DocumentStore for PgDocumentStore {
    type Session = PgSession;

    async fn ping(&self) -> bool {
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("Database ping failed: {}", e);
                false
            }
        }
    }

    async fn start_session(&self) -> StoreResult<PgSession> {
        Ok(PgSession {
            pool: self.pool.clone(),
            tx: None,
        })
    }

    #[instrument(skip_all)]
    async fn start_transaction(&self, session: &mut PgSession) -> StoreResult<()> {
        if session.tx.is_some() {
            return Err(StoreError::TransactionInProgress);
        }
        let tx = session
            .pool
            .begin()
            .instrument(tracing::info_span!("begin"))
            .await?;
        session.tx = Some(tx);
        Ok(())
    }

    #[instrument(skip_all)]
    async fn commit_transaction(&self, session: &mut PgSession) -> StoreResult<()> {
        let tx = session.tx.take().ok_or(StoreError::NoTransaction)?;
        tx.commit().await?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn abort_transaction(&self, session: &mut PgSession) -> StoreResult<()> {
        let tx = session.tx.take().ok_or(StoreError::NoTransaction)?;
        tx.rollback().await?;
        Ok(())
    }

    #[instrument(skip(self, session, document), fields(collection = collection.name()))]
    async fn insert_one(
        &self,
        session: &mut PgSession,
        collection: &Collection,
        mut document: Document,
    ) -> StoreResult<ObjectId> {
        let id = ObjectId::new();
        document.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        let query = sqlx::query(
            r#"
            INSERT INTO documents (collection, id, body)
            VALUES ($1, $2, $3)
            "#,
        )
        .bind(collection.name())
        .bind(id.as_uuid())
        .bind(Json(&document));
        match session.tx.as_mut() {
            Some(tx) => query.execute(&mut **tx).await?,
            None => query.execute(&session.pool).await?,
        };
        Ok(id)
    }

    #[instrument(skip(self), fields(collection = collection.name()))]
    async fn find_all(&self, collection: &Collection) -> StoreResult<Vec<Document>> {
        let docs = sqlx::query_scalar::<_, Json<Document>>(
            r#"
            SELECT body FROM documents
            WHERE collection = $1
            ORDER BY seq
            "#,
        )
        .bind(collection.name())
        .fetch_all(&self.pool)
        .instrument(tracing::info_span!("fetch_all"))
        .await?;
        Ok(docs.into_iter().map(|Json(doc)| doc).collect())
    }

    #[instrument(skip(self), fields(collection = collection.name()))]
    async fn find_by_id(
        &self,
        collection: &Collection,
        id: ObjectId,
    ) -> StoreResult<Option<Document>> {
        let doc = sqlx::query_scalar::<_, Json<Document>>(
            r#"
            SELECT body FROM documents
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection.name())
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .instrument(tracing::info_span!("fetch_optional"))
        .await?;
        Ok(doc.map(|Json(doc)| doc))
    }

    #[instrument(skip(self, session, update), fields(collection = collection.name()))]
    async fn update_one(
        &self,
        session: &mut PgSession,
        collection: &Collection,
        id: ObjectId,
        update: &UpdateDefinition,
    ) -> StoreResult<UpdateResult> {
        let mut patch = update.to_document();
        patch.remove(ID_FIELD);
        let query = sqlx::query_as::<_, (i64, i64)>(UPDATE_ONE)
            .bind(collection.name())
            .bind(id.as_uuid())
            .bind(Json(&patch));
        let (matched, modified) = match session.tx.as_mut() {
            Some(tx) => query.fetch_one(&mut **tx).await?,
            None => query.fetch_one(&session.pool).await?,
        };
        Ok(UpdateResult {
            matched: matched.unsigned_abs(),
            modified: modified.unsigned_abs(),
        })
    }

    #[instrument(skip(self, session), fields(collection = collection.name()))]
    async fn delete_one(
        &self,
        session: &mut PgSession,
        collection: &Collection,
        id: ObjectId,
    ) -> StoreResult<u64> {
        let query = sqlx::query(
            r#"
            DELETE FROM documents
            WHERE collection = $1 AND id = $2
            "#,
        )
        .bind(collection.name())
        .bind(id.as_uuid());
        let result = match session.tx.as_mut() {
            Some(tx) => query.execute(&mut **tx).await?,
            None => query.execute(&session.pool).await?,
        };
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(name: &str) -> Document {
        let mut doc = Document::new();
        doc.insert("name".to_string(), json!(name));
        doc
    }

    #[sqlx::test]
    #[ignore = "needs a database at DATABASE_URL"]
    async fn insert_then_find_returns_document(db: DbPool) {
        let store = PgDocumentStore::new(db);
        let items = Collection::new("items");
        let mut session = store.start_session().await.unwrap();

        let id = store.insert_one(&mut session, &items, doc("Foo")).await.unwrap();

        let found = store.find_by_id(&items, id).await.unwrap().unwrap();
        assert_eq!(Some(&json!("Foo")), found.get("name"));
        assert_eq!(1, store.find_all(&items).await.unwrap().len());
    }

    #[sqlx::test]
    #[ignore = "needs a database at DATABASE_URL"]
    async fn aborted_update_leaves_document_unchanged(db: DbPool) {
        let store = PgDocumentStore::new(db);
        let items = Collection::new("items");
        let mut session = store.start_session().await.unwrap();
        let id = store.insert_one(&mut session, &items, doc("Foo")).await.unwrap();

        store.start_transaction(&mut session).await.unwrap();
        assert!(session.in_transaction());
        let mut update = UpdateDefinition::new();
        update.set("name", "Bar");
        let result = store.update_one(&mut session, &items, id, &update).await.unwrap();
        assert_eq!(UpdateResult { matched: 1, modified: 1 }, result);
        store.abort_transaction(&mut session).await.unwrap();
        assert!(!session.in_transaction());

        let found = store.find_by_id(&items, id).await.unwrap().unwrap();
        assert_eq!(Some(&json!("Foo")), found.get("name"));
    }

    #[sqlx::test]
    #[ignore = "needs a database at DATABASE_URL"]
    async fn identical_update_matches_without_modifying(db: DbPool) {
        let store = PgDocumentStore::new(db);
        let items = Collection::new("items");
        let mut session = store.start_session().await.unwrap();
        let id = store.insert_one(&mut session, &items, doc("Foo")).await.unwrap();

        let mut update = UpdateDefinition::new();
        update.set("name", "Foo");
        let result = store.update_one(&mut session, &items, id, &update).await.unwrap();
        assert_eq!(UpdateResult { matched: 1, modified: 0 }, result);
    }

    #[sqlx::test]
    #[ignore = "needs a database at DATABASE_URL"]
    async fn committed_delete_removes_document(db: DbPool) {
        let store = PgDocumentStore::new(db);
        let items = Collection::new("items");
        let mut session = store.start_session().await.unwrap();
        let id = store.insert_one(&mut session, &items, doc("Foo")).await.unwrap();

        store.start_transaction(&mut session).await.unwrap();
        assert_eq!(1, store.delete_one(&mut session, &items, id).await.unwrap());
        store.commit_transaction(&mut session).await.unwrap();

        assert!(store.find_by_id(&items, id).await.unwrap().is_none());
        assert!(store.ping().await);
    }
}
