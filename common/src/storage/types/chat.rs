use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(Chat, "chat", {
    workspace_id: String,
    title: String
});

impl Chat {
    pub fn new(workspace_id: String, title: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            updated_at: now,
            workspace_id,
            title,
        }
    }

    pub async fn get_in_workspace(
        chat_id: &str,
        workspace_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Chat, AppError> {
        db.get_item::<Chat>(chat_id)
            .await?
            .filter(|chat| chat.workspace_id == workspace_id)
            .ok_or_else(|| AppError::NotFound(format!("chat {chat_id} not found")))
    }

    /// Most recently active first.
    pub async fn list_by_workspace(
        workspace_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Chat>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE workspace_id = $workspace_id ORDER BY updated_at DESC")
            .bind(("table", Self::table_name()))
            .bind(("workspace_id", workspace_id.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }
}
