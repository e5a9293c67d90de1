//! Vector store: persistent named collections with similarity query

use crate::embedding::cosine_similarity;
use crate::error::{DependencyError, FatalError, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

/// An item stored in a collection
#[derive(Debug, Clone)]
pub struct VectorItem {
    pub id: String,
    pub text: String,
    pub metadata: HashMap<String, String>,
    pub vector: Vec<f32>,
}

/// A similarity query match
#[derive(Debug, Clone)]
pub struct QueryMatch {
    pub id: String,
    pub score: f32,
    pub text: String,
    pub metadata: HashMap<String, String>,
}

/// Simple equality filter over item metadata
#[derive(Debug, Clone)]
pub struct MetadataFilter {
    pub key: String,
    pub equals: String,
}

/// Collection descriptor
#[derive(Debug, Clone)]
pub struct CollectionInfo {
    pub name: String,
    pub dimension: usize,
    pub item_count: usize,
}

/// Vector store trait; the orchestrator guarantees a single writer per
/// collection, readers may be concurrent
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Insert or replace a batch of items. The batch is atomic: a crash
    /// mid-upsert leaves either all or none of it visible.
    async fn upsert(&self, collection: &str, items: Vec<VectorItem>) -> Result<()>;

    /// Fetch a single item by id
    async fn get(&self, collection: &str, id: &str) -> Result<Option<VectorItem>>;

    /// k nearest items by cosine similarity
    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryMatch>>;

    /// Delete items by exact id
    async fn delete_ids(&self, collection: &str, ids: &[String]) -> Result<usize>;

    /// Delete items whose id starts with `prefix`; used to roll back a
    /// stage's partial writes keyed on the run id
    async fn delete_prefix(&self, collection: &str, prefix: &str) -> Result<usize>;

    /// Delete items matching a metadata filter
    async fn delete_filter(&self, collection: &str, filter: &MetadataFilter) -> Result<usize>;

    /// List collections with their fixed dimensions
    async fn list_collections(&self) -> Result<Vec<CollectionInfo>>;
}

/// SQLite-backed vector store
pub struct SqliteVectorStore {
    pool: SqlitePool,
}

impl SqliteVectorStore {
    /// Open (or create) the store at the given path
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let url = format!("sqlite://{}?mode=rwc", path.display());
        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| DependencyError::VectorStoreUnavailable(e.to_string()))?;
        let store = Self { pool };
        store.migrate().await?;
        info!("Vector store ready at {}", path.display());
        Ok(store)
    }

    /// In-memory store for tests
    pub async fn open_in_memory() -> Result<Self> {
        let pool = SqlitePool::connect("sqlite::memory:")
            .await
            .map_err(|e| DependencyError::VectorStoreUnavailable(e.to_string()))?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS collections (
                name TEXT PRIMARY KEY,
                dimension INTEGER NOT NULL,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                collection TEXT NOT NULL,
                id TEXT NOT NULL,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL DEFAULT '{}',
                embedding BLOB NOT NULL,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (collection, id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_collection ON items(collection)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Serialize embedding for storage
    pub fn serialize_embedding(embedding: &[f32]) -> Vec<u8> {
        embedding
            .iter()
            .flat_map(|f| f.to_le_bytes().to_vec())
            .collect()
    }

    /// Deserialize embedding from storage
    pub fn deserialize_embedding(data: &[u8]) -> Vec<f32> {
        data.chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect()
    }

    fn serialize_metadata(metadata: &HashMap<String, String>) -> Result<String> {
        Ok(serde_json::to_string(metadata)?)
    }

    fn deserialize_metadata(data: &str) -> HashMap<String, String> {
        serde_json::from_str(data).unwrap_or_default()
    }

    /// Dimension of an existing collection, if any
    async fn collection_dimension(&self, collection: &str) -> Result<Option<usize>> {
        let row = sqlx::query("SELECT dimension FROM collections WHERE name = ?1")
            .bind(collection)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| r.get::<i64, _>("dimension") as usize))
    }
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn upsert(&self, collection: &str, items: Vec<VectorItem>) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let dimension = items[0].vector.len();
        for item in &items {
            if item.vector.len() != dimension {
                return Err(FatalError::DimensionMismatch {
                    collection: collection.to_string(),
                    expected: dimension,
                    actual: item.vector.len(),
                }
                .into());
            }
        }

        if let Some(existing) = self.collection_dimension(collection).await? {
            if existing != dimension {
                return Err(FatalError::DimensionMismatch {
                    collection: collection.to_string(),
                    expected: existing,
                    actual: dimension,
                }
                .into());
            }
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO collections (name, dimension, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(collection)
        .bind(dimension as i64)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        let count = items.len();
        for item in items {
            let metadata = Self::serialize_metadata(&item.metadata)?;
            let blob = Self::serialize_embedding(&item.vector);
            sqlx::query(
                r#"
                INSERT INTO items (collection, id, content, metadata, embedding, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(collection, id) DO UPDATE SET
                    content = excluded.content,
                    metadata = excluded.metadata,
                    embedding = excluded.embedding,
                    updated_at = excluded.updated_at
                "#,
            )
            .bind(collection)
            .bind(&item.id)
            .bind(&item.text)
            .bind(&metadata)
            .bind(&blob)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        debug!("Upserted {} items into collection {}", count, collection);
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<VectorItem>> {
        let row = sqlx::query(
            "SELECT id, content, metadata, embedding FROM items WHERE collection = ?1 AND id = ?2",
        )
        .bind(collection)
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| VectorItem {
            id: row.get("id"),
            text: row.get("content"),
            metadata: Self::deserialize_metadata(row.get("metadata")),
            vector: Self::deserialize_embedding(row.get("embedding")),
        }))
    }

    async fn query(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<QueryMatch>> {
        if let Some(dimension) = self.collection_dimension(collection).await? {
            if dimension != vector.len() {
                return Err(FatalError::DimensionMismatch {
                    collection: collection.to_string(),
                    expected: dimension,
                    actual: vector.len(),
                }
                .into());
            }
        }

        // Brute-force scan; collections stay small enough per document
        let rows = sqlx::query("SELECT id, content, metadata, embedding FROM items WHERE collection = ?1")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;

        let mut matches = Vec::new();
        for row in rows {
            let metadata = Self::deserialize_metadata(row.get("metadata"));
            if let Some(f) = filter {
                if metadata.get(&f.key) != Some(&f.equals) {
                    continue;
                }
            }

            let embedding = Self::deserialize_embedding(row.get("embedding"));
            let score = cosine_similarity(vector, &embedding);
            matches.push(QueryMatch {
                id: row.get("id"),
                score,
                text: row.get("content"),
                metadata,
            });
        }

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        matches.truncate(k);
        Ok(matches)
    }

    async fn delete_ids(&self, collection: &str, ids: &[String]) -> Result<usize> {
        let mut deleted = 0usize;
        let mut tx = self.pool.begin().await?;
        for id in ids {
            let result = sqlx::query("DELETE FROM items WHERE collection = ?1 AND id = ?2")
                .bind(collection)
                .bind(id)
                .execute(&mut *tx)
                .await?;
            deleted += result.rows_affected() as usize;
        }
        tx.commit().await?;
        Ok(deleted)
    }

    async fn delete_prefix(&self, collection: &str, prefix: &str) -> Result<usize> {
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let result =
            sqlx::query("DELETE FROM items WHERE collection = ?1 AND id LIKE ?2 ESCAPE '\\'")
                .bind(collection)
                .bind(&pattern)
                .execute(&self.pool)
                .await?;
        let deleted = result.rows_affected() as usize;
        debug!(
            "Deleted {} items with prefix {} from {}",
            deleted, prefix, collection
        );
        Ok(deleted)
    }

    async fn delete_filter(&self, collection: &str, filter: &MetadataFilter) -> Result<usize> {
        let rows = sqlx::query("SELECT id, metadata FROM items WHERE collection = ?1")
            .bind(collection)
            .fetch_all(&self.pool)
            .await?;

        let matching: Vec<String> = rows
            .into_iter()
            .filter(|row| {
                let metadata = Self::deserialize_metadata(row.get("metadata"));
                metadata.get(&filter.key) == Some(&filter.equals)
            })
            .map(|row| row.get("id"))
            .collect();

        self.delete_ids(collection, &matching).await
    }

    async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let rows = sqlx::query(
            r#"
            SELECT c.name AS name, c.dimension AS dimension, COUNT(i.id) AS item_count
            FROM collections c
            LEFT JOIN items i ON i.collection = c.name
            GROUP BY c.name, c.dimension
            ORDER BY c.name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| CollectionInfo {
                name: row.get("name"),
                dimension: row.get::<i64, _>("dimension") as usize,
                item_count: row.get::<i64, _>("item_count") as usize,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str, vector: Vec<f32>) -> VectorItem {
        VectorItem {
            id: id.to_string(),
            text: format!("text for {}", id),
            metadata: HashMap::new(),
            vector,
        }
    }

    async fn test_store() -> SqliteVectorStore {
        SqliteVectorStore::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_query() {
        let store = test_store().await;
        store
            .upsert(
                "fragments",
                vec![
                    item("a", vec![1.0, 0.0, 0.0]),
                    item("b", vec![0.9, 0.1, 0.0]),
                    item("c", vec![0.0, 0.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let matches = store
            .query("fragments", &[1.0, 0.0, 0.0], 2, None)
            .await
            .unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].id, "a");
        assert!(matches[0].score > 0.99);
        assert_eq!(matches[1].id, "b");
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = test_store().await;
        store
            .upsert("fixed", vec![item("a", vec![1.0, 0.0])])
            .await
            .unwrap();

        let err = store
            .upsert("fixed", vec![item("b", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "dimension_mismatch");

        let err = store.query("fixed", &[1.0, 0.0, 0.0], 1, None).await.unwrap_err();
        assert_eq!(err.code(), "dimension_mismatch");
    }

    #[tokio::test]
    async fn test_upsert_replaces_existing() {
        let store = test_store().await;
        store
            .upsert("col", vec![item("a", vec![1.0, 0.0])])
            .await
            .unwrap();
        let mut replacement = item("a", vec![0.0, 1.0]);
        replacement.text = "updated".to_string();
        store.upsert("col", vec![replacement]).await.unwrap();

        let matches = store.query("col", &[0.0, 1.0], 1, None).await.unwrap();
        assert_eq!(matches[0].text, "updated");
        assert!(matches[0].score > 0.99);
    }

    #[tokio::test]
    async fn test_metadata_filter() {
        let store = test_store().await;
        let mut a = item("a", vec![1.0, 0.0]);
        a.metadata.insert("section".to_string(), "garantias".to_string());
        let mut b = item("b", vec![1.0, 0.0]);
        b.metadata.insert("section".to_string(), "plazos".to_string());
        store.upsert("col", vec![a, b]).await.unwrap();

        let filter = MetadataFilter {
            key: "section".to_string(),
            equals: "plazos".to_string(),
        };
        let matches = store
            .query("col", &[1.0, 0.0], 10, Some(&filter))
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "b");
    }

    #[tokio::test]
    async fn test_delete_by_prefix() {
        let store = test_store().await;
        store
            .upsert(
                "col",
                vec![
                    item("run1:0", vec![1.0, 0.0]),
                    item("run1:1", vec![0.0, 1.0]),
                    item("run2:0", vec![1.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let deleted = store.delete_prefix("col", "run1:").await.unwrap();
        assert_eq!(deleted, 2);

        let remaining = store.query("col", &[1.0, 1.0], 10, None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "run2:0");
    }

    #[tokio::test]
    async fn test_delete_by_ids_and_filter() {
        let store = test_store().await;
        let mut tagged = item("a", vec![1.0, 0.0]);
        tagged.metadata.insert("run".to_string(), "r1".to_string());
        let mut other = item("b", vec![0.0, 1.0]);
        other.metadata.insert("run".to_string(), "r2".to_string());
        store.upsert("col", vec![tagged, other, item("c", vec![1.0, 1.0])]).await.unwrap();

        let deleted = store.delete_ids("col", &["c".to_string()]).await.unwrap();
        assert_eq!(deleted, 1);

        let filter = MetadataFilter {
            key: "run".to_string(),
            equals: "r1".to_string(),
        };
        let deleted = store.delete_filter("col", &filter).await.unwrap();
        assert_eq!(deleted, 1);

        let remaining = store.query("col", &[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, "b");
    }

    #[tokio::test]
    async fn test_list_collections() {
        let store = test_store().await;
        store
            .upsert("alpha", vec![item("a", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert("beta", vec![item("b", vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();

        let collections = store.list_collections().await.unwrap();
        assert_eq!(collections.len(), 2);
        assert_eq!(collections[0].name, "alpha");
        assert_eq!(collections[0].dimension, 2);
        assert_eq!(collections[1].name, "beta");
        assert_eq!(collections[1].item_count, 1);
    }

    #[test]
    fn test_embedding_serialization_roundtrip() {
        let embedding = vec![1.5, -2.3, 0.0, 42.1];
        let serialized = SqliteVectorStore::serialize_embedding(&embedding);
        let deserialized = SqliteVectorStore::deserialize_embedding(&serialized);

        assert_eq!(embedding.len(), deserialized.len());
        for (orig, deser) in embedding.iter().zip(deserialized.iter()) {
            assert!((orig - deser).abs() < f32::EPSILON);
        }
    }
}
