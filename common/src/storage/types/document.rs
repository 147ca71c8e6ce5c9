use state_machines::state_machine;
use surrealdb::{sql::Datetime as SurrealDatetime, RecordId};
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    #[default]
    Pending,
    Processing,
    Processed,
    Failed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Processed => "processed",
            ProcessingStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum StatusTransition {
    Begin,
    Complete,
    Fail,
}

impl StatusTransition {
    fn as_str(self) -> &'static str {
        match self {
            StatusTransition::Begin => "begin",
            StatusTransition::Complete => "complete",
            StatusTransition::Fail => "fail",
        }
    }
}

mod lifecycle {
    use super::state_machine;

    state_machine! {
        name: DocumentLifecycleMachine,
        initial: Pending,
        states: [Pending, Processing, Processed, Failed],
        events {
            begin {
                transition: { from: Pending, to: Processing }
                transition: { from: Processed, to: Processing }
                transition: { from: Failed, to: Processing }
            }
            complete {
                transition: { from: Processing, to: Processed }
            }
            fail {
                transition: { from: Pending, to: Failed }
                transition: { from: Processing, to: Failed }
            }
        }
    }

    pub(super) fn pending() -> DocumentLifecycleMachine<(), Pending> {
        DocumentLifecycleMachine::new(())
    }
}

fn invalid_transition(status: ProcessingStatus, event: StatusTransition) -> AppError {
    AppError::Validation(format!(
        "Invalid document status transition: {} -> {}",
        status.as_str(),
        event.as_str()
    ))
}

/// Validates a status change against the document lifecycle.
fn compute_next_status(
    status: ProcessingStatus,
    event: StatusTransition,
) -> Result<ProcessingStatus, AppError> {
    use lifecycle::pending;

    match (status, event) {
        (ProcessingStatus::Pending, StatusTransition::Begin) => pending()
            .begin()
            .map(|_| ProcessingStatus::Processing)
            .map_err(|_| invalid_transition(status, event)),
        (ProcessingStatus::Processed, StatusTransition::Begin) => pending()
            .begin()
            .map_err(|_| invalid_transition(status, event))?
            .complete()
            .map_err(|_| invalid_transition(status, event))?
            .begin()
            .map(|_| ProcessingStatus::Processing)
            .map_err(|_| invalid_transition(status, event)),
        (ProcessingStatus::Failed, StatusTransition::Begin) => pending()
            .fail()
            .map_err(|_| invalid_transition(status, event))?
            .begin()
            .map(|_| ProcessingStatus::Processing)
            .map_err(|_| invalid_transition(status, event)),
        (ProcessingStatus::Processing, StatusTransition::Complete) => pending()
            .begin()
            .map_err(|_| invalid_transition(status, event))?
            .complete()
            .map(|_| ProcessingStatus::Processed)
            .map_err(|_| invalid_transition(status, event)),
        (ProcessingStatus::Pending, StatusTransition::Fail) => pending()
            .fail()
            .map(|_| ProcessingStatus::Failed)
            .map_err(|_| invalid_transition(status, event)),
        (ProcessingStatus::Processing, StatusTransition::Fail) => pending()
            .begin()
            .map_err(|_| invalid_transition(status, event))?
            .fail()
            .map(|_| ProcessingStatus::Failed)
            .map_err(|_| invalid_transition(status, event)),
        _ => Err(invalid_transition(status, event)),
    }
}

stored_object!(Document, "document", {
    workspace_id: String,
    name: String,
    directory: Option<String>,
    tags: Vec<String>,
    status: ProcessingStatus,
    blob_id: String,
    error_message: Option<String>,
    #[serde(
        serialize_with = "serialize_option_datetime",
        deserialize_with = "deserialize_option_datetime",
        default
    )]
    processed_at: Option<chrono::DateTime<chrono::Utc>>,
    chunk_count: u32
});

/// Coarse progress attached to a status report.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ProcessingProgress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<u8>,
    pub chunks_created: u32,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct DocumentStatus {
    pub document_id: String,
    pub status: ProcessingStatus,
    pub processed_at: Option<chrono::DateTime<chrono::Utc>>,
    pub error_message: Option<String>,
    pub progress: Option<ProcessingProgress>,
}

impl Document {
    pub fn new(
        workspace_id: String,
        name: String,
        directory: Option<String>,
        tags: Vec<String>,
        blob_id: String,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            workspace_id,
            name,
            directory,
            tags,
            status: ProcessingStatus::Pending,
            blob_id,
            error_message: None,
            processed_at: None,
            chunk_count: 0,
        }
    }

    /// Fetches a document scoped to a workspace. Documents of other workspaces are reported
    /// as missing.
    pub async fn get_in_workspace(
        document_id: &str,
        workspace_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Document, AppError> {
        db.get_item::<Document>(document_id)
            .await?
            .filter(|document| document.workspace_id == workspace_id)
            .ok_or_else(|| AppError::document_not_found(document_id))
    }

    pub async fn list_by_workspace(
        workspace_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Document>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE workspace_id = $workspace_id ORDER BY name ASC")
            .bind(("table", Self::table_name()))
            .bind(("workspace_id", workspace_id.to_owned()))
            .await?;

        Ok(response.take(0)?)
    }

    pub async fn get_by_ids(ids: &[String], db: &SurrealDbClient) -> Result<Vec<Document>, AppError> {
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

    /// Distinct workspace ids that own at least one document.
    pub async fn list_workspace_ids(db: &SurrealDbClient) -> Result<Vec<String>, AppError> {
        let mut response = db
            .client
            .query("SELECT VALUE workspace_id FROM type::table($table)")
            .bind(("table", Self::table_name()))
            .await?;
        let mut ids: Vec<String> = response.take(0)?;
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    /// Moves the document into `processing` with a single conditional update.
    ///
    /// Without `force`, a document that is already `processing` yields `Conflict`. With
    /// `force` the guard is bypassed.
    pub async fn begin_processing(
        document_id: &str,
        workspace_id: &str,
        force: bool,
        db: &SurrealDbClient,
    ) -> Result<Document, AppError> {
        let current = Self::get_in_workspace(document_id, workspace_id, db).await?;
        if current.status == ProcessingStatus::Processing {
            if !force {
                return Err(AppError::already_processing(document_id));
            }
        } else {
            compute_next_status(current.status, StatusTransition::Begin)?;
        }

        const BEGIN_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $processing,
                error_message = NONE,
                processed_at = NONE,
                chunk_count = 0,
                updated_at = $now
            WHERE workspace_id = $workspace_id
              AND ($force = true OR status != $processing)
            RETURN AFTER;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(BEGIN_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", document_id.to_owned()))
            .bind(("workspace_id", workspace_id.to_owned()))
            .bind(("processing", ProcessingStatus::Processing.as_str()))
            .bind(("force", force))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<Document> = result.take(0)?;
        updated.ok_or_else(|| AppError::already_processing(document_id))
    }

    pub async fn record_progress(
        &self,
        chunks_created: u32,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id) SET chunk_count = $count, updated_at = $now WHERE status = $processing",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("count", chunks_created))
            .bind(("processing", ProcessingStatus::Processing.as_str()))
            .bind(("now", SurrealDatetime::from(chrono::Utc::now())))
            .await?
            .check()?;
        Ok(())
    }

    pub async fn mark_processed(
        &self,
        chunk_count: u32,
        db: &SurrealDbClient,
    ) -> Result<Document, AppError> {
        let next = compute_next_status(ProcessingStatus::Processing, StatusTransition::Complete)?;
        debug_assert_eq!(next, ProcessingStatus::Processed);

        const COMPLETE_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $processed,
                processed_at = $now,
                chunk_count = $chunk_count,
                error_message = NONE,
                updated_at = $now
            WHERE status = $processing
            RETURN AFTER;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(COMPLETE_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("processed", ProcessingStatus::Processed.as_str()))
            .bind(("processing", ProcessingStatus::Processing.as_str()))
            .bind(("chunk_count", chunk_count))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<Document> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(self.status, StatusTransition::Complete))
    }

    pub async fn mark_failed(
        &self,
        error_message: &str,
        db: &SurrealDbClient,
    ) -> Result<Document, AppError> {
        compute_next_status(ProcessingStatus::Processing, StatusTransition::Fail)?;

        const FAIL_QUERY: &str = r#"
            UPDATE type::thing($table, $id)
            SET status = $failed,
                error_message = $error_message,
                updated_at = $now
            WHERE status IN $allow_states
            RETURN AFTER;
        "#;

        let now = chrono::Utc::now();
        let mut result = db
            .client
            .query(FAIL_QUERY)
            .bind(("table", Self::table_name()))
            .bind(("id", self.id.clone()))
            .bind(("failed", ProcessingStatus::Failed.as_str()))
            .bind((
                "allow_states",
                vec![
                    ProcessingStatus::Pending.as_str(),
                    ProcessingStatus::Processing.as_str(),
                ],
            ))
            .bind(("error_message", error_message.to_owned()))
            .bind(("now", SurrealDatetime::from(now)))
            .await?;

        let updated: Option<Document> = result.take(0)?;
        updated.ok_or_else(|| invalid_transition(self.status, StatusTransition::Fail))
    }

    pub fn status_report(&self) -> DocumentStatus {
        let progress = match self.status {
            ProcessingStatus::Processing => Some(ProcessingProgress {
                current_step: Some("chunking_and_embedding".to_string()),
                percentage: Some(50),
                chunks_created: self.chunk_count,
            }),
            ProcessingStatus::Processed => Some(ProcessingProgress {
                current_step: None,
                percentage: None,
                chunks_created: self.chunk_count,
            }),
            ProcessingStatus::Pending | ProcessingStatus::Failed => None,
        };

        DocumentStatus {
            document_id: self.id.clone(),
            status: self.status,
            processed_at: self.processed_at,
            error_message: self.error_message.clone(),
            progress,
        }
    }

    pub async fn get_status(
        document_id: &str,
        workspace_id: &str,
        db: &SurrealDbClient,
    ) -> Result<DocumentStatus, AppError> {
        Ok(Self::get_in_workspace(document_id, workspace_id, db)
            .await?
            .status_report())
    }
}
