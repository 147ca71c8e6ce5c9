use std::collections::HashSet;

use sha2::{Digest, Sha256};
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Blob, "blob", {
    sha256: String,
    size: u64,
    mime_type: String,
    bucket: String,
    key: String
});

impl Blob {
    pub fn new(sha256: String, size: u64, mime_type: String, bucket: String, key: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            sha256,
            size,
            mime_type,
            bucket,
            key,
        }
    }

    /// Hex encoded SHA-256 over the full byte content.
    pub fn compute_sha256(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        for chunk in bytes.chunks(8192) {
            hasher.update(chunk);
        }
        format!("{:x}", hasher.finalize())
    }

    /// Retrieves a `Blob` by its content hash.
    pub async fn get_by_sha(
        sha256: &str,
        db_client: &SurrealDbClient,
    ) -> Result<Option<Blob>, AppError> {
        let mut response = db_client
            .client
            .query("SELECT * FROM type::table($table) WHERE sha256 = $sha256 LIMIT 1")
            .bind(("table", Self::table_name()))
            .bind(("sha256", sha256.to_owned()))
            .await?;
        let blobs: Vec<Blob> = response.take(0)?;

        Ok(blobs.into_iter().next())
    }

    /// Looks up a blob by hash and bumps its `updated_at`, which keeps it out of the next
    /// garbage collection pass.
    pub async fn touch_by_sha(
        sha256: &str,
        db_client: &SurrealDbClient,
    ) -> Result<Option<Blob>, AppError> {
        let mut response = db_client
            .client
            .query("UPDATE type::table($table) SET updated_at = $now WHERE sha256 = $sha256 RETURN AFTER")
            .bind(("table", Self::table_name()))
            .bind(("sha256", sha256.to_owned()))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;
        let blobs: Vec<Blob> = response.take(0)?;

        Ok(blobs.into_iter().next())
    }

    /// Deletes the row only while it is still unreferenced and untouched since `cutoff`.
    /// Returns the deleted blob, or `None` when it was reused or is already gone.
    pub async fn delete_if_unused(
        id: &str,
        cutoff: DateTime<Utc>,
        db_client: &SurrealDbClient,
    ) -> Result<Option<Blob>, AppError> {
        const DELETE_UNUSED: &str = r"
            DELETE type::thing($table, $id)
            WHERE updated_at <= $cutoff
              AND array::len((SELECT VALUE id FROM document WHERE blob_id = $id LIMIT 1)) = 0
            RETURN BEFORE;
        ";

        let mut response = db_client
            .client
            .query(DELETE_UNUSED)
            .bind(("table", Self::table_name()))
            .bind(("id", id.to_owned()))
            .bind(("cutoff", SurrealDatetime::from(cutoff)))
            .await?;
        let deleted: Vec<Blob> = response.take(0)?;

        Ok(deleted.into_iter().next())
    }

    /// Blobs that no document references anymore.
    pub async fn list_unreferenced(db_client: &SurrealDbClient) -> Result<Vec<Blob>, AppError> {
        let mut response = db_client
            .client
            .query("SELECT VALUE blob_id FROM document")
            .await?;
        let referenced: Vec<String> = response.take(0)?;
        let referenced: HashSet<String> = referenced.into_iter().collect();

        let blobs: Vec<Blob> = db_client.get_all_stored_items().await?;

        Ok(blobs
            .into_iter()
            .filter(|blob| !referenced.contains(&blob.id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::document::Document;

    async fn memory_db() -> SurrealDbClient {
        let database = Uuid::new_v4().to_string();
        SurrealDbClient::memory("test_ns", &database)
            .await
            .expect("Failed to start in-memory surrealdb")
    }

    #[test]
    fn test_compute_sha256_known_vector() {
        assert_eq!(
            Blob::compute_sha256(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(
            Blob::compute_sha256(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_compute_sha256_spans_buffer_boundaries() {
        let large = vec![7u8; 8192 * 3 + 11];
        let mut hasher = Sha256::new();
        hasher.update(&large);
        assert_eq!(
            Blob::compute_sha256(&large),
            format!("{:x}", hasher.finalize())
        );
    }

    #[tokio::test]
    async fn test_get_by_sha() {
        let db = memory_db().await;
        let blob = Blob::new(
            "hash-1".into(),
            12,
            "text/plain".into(),
            "documents".into(),
            "ws/1/a.txt".into(),
        );
        db.store_item(blob.clone()).await.expect("store blob");

        let found = Blob::get_by_sha("hash-1", &db).await.expect("query");
        assert_eq!(found.map(|b| b.id), Some(blob.id));

        let missing = Blob::get_by_sha("nonexistent", &db).await.expect("query");
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_touch_keeps_blob_from_stale_delete() {
        let db = memory_db().await;
        let blob = Blob::new(
            "hash-touch".into(),
            3,
            "text/plain".into(),
            "documents".into(),
            "ws/1/t.txt".into(),
        );
        db.store_item(blob.clone()).await.expect("store blob");
        let cutoff = Utc::now();

        let touched = Blob::touch_by_sha("hash-touch", &db)
            .await
            .expect("touch")
            .expect("blob present");
        assert!(touched.updated_at > blob.updated_at);
        assert!(Blob::touch_by_sha("unknown", &db)
            .await
            .expect("touch")
            .is_none());

        // touched after the cutoff, so it survives
        let kept = Blob::delete_if_unused(&blob.id, cutoff, &db)
            .await
            .expect("delete");
        assert!(kept.is_none());

        let deleted = Blob::delete_if_unused(&blob.id, Utc::now(), &db)
            .await
            .expect("delete");
        assert_eq!(deleted.map(|b| b.id), Some(blob.id.clone()));
        assert!(Blob::get_by_sha("hash-touch", &db)
            .await
            .expect("query")
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_if_unused_skips_referenced_blob() {
        let db = memory_db().await;
        let blob = Blob::new(
            "hash-ref".into(),
            3,
            "text/plain".into(),
            "documents".into(),
            "ws/1/r.txt".into(),
        );
        db.store_item(blob.clone()).await.expect("store blob");
        let document = Document::new(
            "ws".into(),
            "r.txt".into(),
            None,
            Vec::new(),
            blob.id.clone(),
        );
        db.store_item(document).await.expect("store document");

        let deleted = Blob::delete_if_unused(&blob.id, Utc::now(), &db)
            .await
            .expect("delete");
        assert!(deleted.is_none());
        assert!(Blob::get_by_sha("hash-ref", &db)
            .await
            .expect("query")
            .is_some());
    }

    #[tokio::test]
    async fn test_list_unreferenced() {
        let db = memory_db().await;
        let kept = Blob::new(
            "kept".into(),
            1,
            "text/plain".into(),
            "documents".into(),
            "k".into(),
        );
        let orphan = Blob::new(
            "orphan".into(),
            1,
            "text/plain".into(),
            "documents".into(),
            "o".into(),
        );
        db.store_item(kept.clone()).await.expect("store kept");
        db.store_item(orphan.clone()).await.expect("store orphan");

        let document = Document::new(
            "ws".into(),
            "notes.txt".into(),
            None,
            Vec::new(),
            kept.id.clone(),
        );
        db.store_item(document).await.expect("store document");

        let unreferenced = Blob::list_unreferenced(&db).await.expect("list");
        let ids: Vec<String> = unreferenced.into_iter().map(|b| b.id).collect();
        assert_eq!(ids, vec![orphan.id]);
    }
}
