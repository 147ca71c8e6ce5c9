use std::{path::Path, sync::Arc};

use bytes::Bytes;
use chrono::{Duration as ChronoDuration, Utc};
use futures::{stream::BoxStream, TryStreamExt};
use tracing::{debug, info, warn};
use uuid::Uuid;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{blob::Blob, document::Document},
    },
};

/// Metadata supplied with an upload.
#[derive(Debug, Clone, Default)]
pub struct NewDocument {
    pub workspace_id: String,
    pub file_name: String,
    pub directory: Option<String>,
    pub tags: Vec<String>,
    pub content_type: Option<String>,
}

/// Result of storing bytes. `is_new` is false when an identical blob already existed.
#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub blob: Blob,
    pub is_new: bool,
}

#[derive(Debug, Clone)]
pub struct UploadedDocument {
    pub document: Document,
    pub blob: Blob,
    pub is_new: bool,
}

/// Content-addressed blob storage over the object store plus the blob table.
#[derive(Clone)]
pub struct ContentStore {
    db: Arc<SurrealDbClient>,
    storage: StorageManager,
    bucket: String,
}

impl ContentStore {
    pub fn new(db: Arc<SurrealDbClient>, storage: StorageManager, bucket: impl Into<String>) -> Self {
        Self {
            db,
            storage,
            bucket: bucket.into(),
        }
    }

    /// Stores `bytes` unless a blob with the same SHA-256 already exists.
    ///
    /// A reused blob is touched first so a concurrent garbage collection pass leaves it alone.
    pub async fn put(
        &self,
        workspace_id: &str,
        file_name: &str,
        mime_type: &str,
        bytes: Bytes,
    ) -> Result<StoredBlob, AppError> {
        let sha256 = Blob::compute_sha256(&bytes);
        if let Some(blob) = Blob::touch_by_sha(&sha256, &self.db).await? {
            if self.storage.exists(&blob.bucket, &blob.key).await? {
                info!(blob_id = %blob.id, sha256 = %sha256, "Reusing existing blob");
                return Ok(StoredBlob {
                    blob,
                    is_new: false,
                });
            }
            warn!(blob_id = %blob.id, key = %blob.key, "Blob object missing, storing content again");
            self.db.delete_item::<Blob>(&blob.id).await?;
        }

        self.store_new(workspace_id, file_name, mime_type, sha256, bytes)
            .await
    }

    /// Writes the object, then the blob row. When the row cannot be inserted the object is
    /// removed again and the hash is looked up once more, since a concurrent upload of the
    /// same content may have won.
    async fn store_new(
        &self,
        workspace_id: &str,
        file_name: &str,
        mime_type: &str,
        sha256: String,
        bytes: Bytes,
    ) -> Result<StoredBlob, AppError> {
        self.storage.ensure_bucket(&self.bucket).await?;
        let key = object_key(workspace_id, file_name);
        let size = bytes.len() as u64;
        self.storage.put(&self.bucket, &key, bytes).await?;

        let blob = Blob::new(
            sha256.clone(),
            size,
            mime_type.to_string(),
            self.bucket.clone(),
            key.clone(),
        );

        match self.db.store_item(blob.clone()).await {
            Ok(_) => Ok(StoredBlob { blob, is_new: true }),
            Err(err) => {
                warn!(sha256 = %sha256, error = %err, "Blob insert failed, removing stored object");
                if let Err(remove_err) = self.storage.remove(&self.bucket, &key).await {
                    warn!(key = %key, error = %remove_err, "Failed to remove orphaned object");
                }
                match Blob::get_by_sha(&sha256, &self.db).await? {
                    Some(existing) => Ok(StoredBlob {
                        blob: existing,
                        is_new: false,
                    }),
                    None => Err(err.into()),
                }
            }
        }
    }

    /// Stores the bytes and creates a pending document pointing at the blob.
    pub async fn upload_document(
        &self,
        upload: NewDocument,
        bytes: Bytes,
    ) -> Result<UploadedDocument, AppError> {
        if upload.workspace_id.trim().is_empty() {
            return Err(AppError::Validation("workspace_id is required".into()));
        }
        if upload.file_name.trim().is_empty() {
            return Err(AppError::Validation("file name is required".into()));
        }

        let mime_type = resolve_mime(upload.content_type.as_deref(), &upload.file_name);
        let stored = self
            .put(&upload.workspace_id, &upload.file_name, &mime_type, bytes)
            .await?;

        let document = Document::new(
            upload.workspace_id,
            upload.file_name,
            upload.directory,
            upload.tags,
            stored.blob.id.clone(),
        );
        self.db.store_item(document.clone()).await?;

        info!(
            document_id = %document.id,
            blob_id = %stored.blob.id,
            is_new = stored.is_new,
            "Document uploaded"
        );

        Ok(UploadedDocument {
            document,
            blob: stored.blob,
            is_new: stored.is_new,
        })
    }

    pub async fn get_stream(
        &self,
        blob: &Blob,
    ) -> Result<BoxStream<'static, Result<Bytes, AppError>>, AppError> {
        let stream = self.storage.get_stream(&blob.bucket, &blob.key).await?;
        Ok(Box::pin(stream.map_err(AppError::from)))
    }

    /// Buffered read of the blob bytes.
    pub async fn get(&self, blob: &Blob) -> Result<Bytes, AppError> {
        let chunks: Vec<Bytes> = self.get_stream(blob).await?.try_collect().await?;
        Ok(Bytes::from(chunks.concat()))
    }

    pub async fn load_blob(&self, blob_id: &str) -> Result<Blob, AppError> {
        self.db
            .get_item::<Blob>(blob_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("blob {blob_id} not found")))
    }

    /// Deletes blobs no document references, skipping anything used within `min_age`.
    /// The row goes first and only while it is still unused; a failed object removal is
    /// logged.
    pub async fn collect_garbage(&self, min_age: ChronoDuration) -> Result<usize, AppError> {
        let cutoff = Utc::now() - min_age;
        let candidates = Blob::list_unreferenced(&self.db).await?;
        let mut removed = 0;

        for blob in candidates.into_iter().filter(|blob| blob.updated_at <= cutoff) {
            match Blob::delete_if_unused(&blob.id, cutoff, &self.db).await {
                Ok(Some(_)) => {}
                Ok(None) => {
                    debug!(blob_id = %blob.id, "Blob reused since listing, keeping it");
                    continue;
                }
                Err(err) => {
                    warn!(blob_id = %blob.id, error = %err, "Failed to delete unreferenced blob row");
                    continue;
                }
            }
            if let Err(err) = self.storage.remove(&blob.bucket, &blob.key).await {
                warn!(blob_id = %blob.id, key = %blob.key, error = %err, "Failed to remove unreferenced object");
            }
            removed += 1;
        }

        if removed > 0 {
            info!(removed, "Removed unreferenced blobs");
        }
        Ok(removed)
    }
}

/// `{workspace}/{unix seconds}/{uuid}{.ext}`
fn object_key(workspace_id: &str, file_name: &str) -> String {
    let extension = Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty())
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_default();
    format!(
        "{workspace_id}/{}/{}{extension}",
        Utc::now().timestamp(),
        Uuid::new_v4()
    )
}

/// Declared type unless it is missing or generic, otherwise guessed from the file name.
pub fn resolve_mime(declared: Option<&str>, file_name: &str) -> String {
    match declared.map(str::trim) {
        Some(declared)
            if !declared.is_empty() && declared != mime::APPLICATION_OCTET_STREAM.essence_str() =>
        {
            declared.to_string()
        }
        _ => mime_guess::from_path(file_name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}
