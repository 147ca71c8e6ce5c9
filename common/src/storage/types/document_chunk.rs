use surrealdb::RecordId;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(DocumentChunk, "document_chunk", {
    document_id: String,
    workspace_id: String,
    chunk_index: u32,
    page_number: u32,
    content: String
});

/// One page of chunks ordered by chunk index.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ChunkPage {
    pub items: Vec<DocumentChunk>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
}

pub const DEFAULT_PAGE_SIZE: u32 = 20;
pub const MAX_PAGE_SIZE: u32 = 100;

#[derive(Deserialize)]
struct CountRow {
    count: u64,
}

impl DocumentChunk {
    pub fn new(
        document_id: String,
        workspace_id: String,
        chunk_index: u32,
        page_number: u32,
        content: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            document_id,
            workspace_id,
            chunk_index,
            page_number,
            content,
        }
    }

    /// Stores a batch of chunks in one statement.
    pub async fn insert_batch(
        chunks: Vec<DocumentChunk>,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        if chunks.is_empty() {
            return Ok(());
        }
        db.client
            .query(format!("INSERT INTO {} $chunks", Self::table_name()))
            .bind(("chunks", chunks))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn delete_by_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE type::table($table) WHERE document_id = $document_id")
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_owned()))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn list_for_document(
        document_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<DocumentChunk>, AppError> {
        let mut response = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE document_id = $document_id ORDER BY chunk_index ASC",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }

    /// Paginated listing. `page` starts at 1 and `page_size` must be within 1..=100.
    pub async fn list_page(
        document_id: &str,
        page: u32,
        page_size: u32,
        db: &SurrealDbClient,
    ) -> Result<ChunkPage, AppError> {
        if page == 0 {
            return Err(AppError::Validation("page must be at least 1".into()));
        }
        if !(1..=MAX_PAGE_SIZE).contains(&page_size) {
            return Err(AppError::Validation(format!(
                "page_size must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }
        let offset = u64::from(page - 1) * u64::from(page_size);

        let mut response = db
            .client
            .query(
                "SELECT * FROM type::table($table) WHERE document_id = $document_id \
                 ORDER BY chunk_index ASC LIMIT $limit START $start",
            )
            .query(
                "SELECT count() AS count FROM type::table($table) WHERE document_id = $document_id GROUP ALL",
            )
            .bind(("table", Self::table_name()))
            .bind(("document_id", document_id.to_owned()))
            .bind(("limit", page_size))
            .bind(("start", offset))
            .await?;

        let items: Vec<DocumentChunk> = response.take(0)?;
        let counts: Vec<CountRow> = response.take(1)?;
        let total = counts.first().map_or(0, |row| row.count);

        Ok(ChunkPage {
            items,
            total,
            page,
            page_size,
        })
    }

    pub async fn get_by_ids(
        ids: &[String],
        db: &SurrealDbClient,
    ) -> Result<Vec<DocumentChunk>, AppError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let record_ids: Vec<RecordId> = ids
            .iter()
            .map(|id| RecordId::from_table_key(Self::table_name(), id))
            .collect();

        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE id INSIDE $ids")
            .bind(("table", Self::table_name()))
            .bind(("ids", record_ids))
            .await?;
        Ok(response.take(0)?)
    }
}
