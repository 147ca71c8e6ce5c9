#![allow(clippy::module_name_repetitions)]
use surrealdb::sql::Datetime as SurrealDatetime;
use uuid::Uuid;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::chat::Chat;

#[derive(Deserialize, Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// A chunk that contributed to an assistant answer.
#[derive(Deserialize, Debug, Clone, Serialize, PartialEq)]
pub struct DocumentReference {
    pub document_id: String,
    pub chunk_index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_number: Option<u32>,
    pub score: f32,
    pub content_preview: String,
}

stored_object!(Message, "message", {
    chat_id: String,
    message_index: u32,
    role: MessageRole,
    content: String,
    #[serde(default)]
    document_refs: Vec<DocumentReference>
});

const APPEND_TURN: &str = r"
    BEGIN TRANSACTION;
    LET $last = (SELECT message_index FROM type::table($table) WHERE chat_id = $chat_id ORDER BY message_index DESC LIMIT 1);
    LET $max = IF array::len($last) > 0 { $last[0].message_index } ELSE { 0 };

    CREATE type::thing($table, $user_id) SET
        chat_id = $chat_id,
        message_index = $max + 1,
        role = $user_role,
        content = $user_content,
        document_refs = [],
        created_at = $now,
        updated_at = $now;

    CREATE type::thing($table, $assistant_id) SET
        chat_id = $chat_id,
        message_index = $max + 2,
        role = $assistant_role,
        content = $assistant_content,
        document_refs = $document_refs,
        created_at = $now,
        updated_at = $now;

    UPDATE type::thing($chat_table, $chat_id) SET updated_at = $now;
    COMMIT TRANSACTION;
";

impl Message {
    /// Persists a user message and its assistant reply as one transaction.
    ///
    /// Indices are `max + 1` and `max + 2` of the current maximum in the chat, read inside the
    /// same transaction. Returns `(user, assistant)`.
    pub async fn append_turn(
        chat_id: &str,
        user_content: &str,
        assistant_content: &str,
        document_refs: Vec<DocumentReference>,
        db: &SurrealDbClient,
    ) -> Result<(Message, Message), AppError> {
        let user_id = Uuid::new_v4().to_string();
        let assistant_id = Uuid::new_v4().to_string();

        db.client
            .query(APPEND_TURN)
            .bind(("table", Self::table_name()))
            .bind(("chat_table", Chat::table_name()))
            .bind(("chat_id", chat_id.to_owned()))
            .bind(("user_id", user_id.clone()))
            .bind(("assistant_id", assistant_id.clone()))
            .bind(("user_role", MessageRole::User.as_str()))
            .bind(("assistant_role", MessageRole::Assistant.as_str()))
            .bind(("user_content", user_content.to_owned()))
            .bind(("assistant_content", assistant_content.to_owned()))
            .bind(("document_refs", document_refs))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?
            .check()?;

        let user: Option<Message> = db.get_item(&user_id).await?;
        let assistant: Option<Message> = db.get_item(&assistant_id).await?;
        match (user, assistant) {
            (Some(user), Some(assistant)) => Ok((user, assistant)),
            _ => Err(AppError::InternalError(format!(
                "chat turn for {chat_id} was not persisted"
            ))),
        }
    }

    pub async fn list_for_chat(
        chat_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Vec<Message>, AppError> {
        let mut response = db
            .client
            .query("SELECT * FROM type::table($table) WHERE chat_id = $chat_id ORDER BY message_index ASC")
            .bind(("table", Self::table_name()))
            .bind(("chat_id", chat_id.to_owned()))
            .await?;
        Ok(response.take(0)?)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.role.as_str(), self.content)
    }
}
