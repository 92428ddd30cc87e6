use sqlx::SqlitePool;
use crate::error::{Error, Result};
use crate::models::message::{CreateMessage, Message};

#[derive(Clone)]
pub struct MessageService {
    pool: SqlitePool,
}

impl MessageService {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn create(&self, msg: CreateMessage) -> Result<i64> {
        let (chat_id, text, file_id, file_path) = match msg {
            CreateMessage::Text { chat_id, text } => (chat_id, non_empty(text), None, None),
            CreateMessage::Image {
                chat_id,
                file_id,
                file_path,
            } => (chat_id, None, Some(file_id), Some(file_path)),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO messages (chat_id, message, file_id, file_path)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(chat_id)
        .bind(text)
        .bind(file_id)
        .bind(file_path)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn insert_text(&self, chat_id: i64, text: Option<String>) -> Result<i64> {
        self.create(CreateMessage::Text { chat_id, text }).await
    }

    pub async fn insert_image(&self, chat_id: i64, file_id: &str, file_path: &str) -> Result<i64> {
        self.create(CreateMessage::Image {
            chat_id,
            file_id: file_id.to_string(),
            file_path: file_path.to_string(),
        })
        .await
    }

    /// Every record, newest first.
    pub async fn list(&self) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, chat_id, message, file_id, file_path, timestamp
            FROM messages
            ORDER BY timestamp DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(messages)
    }

    pub async fn get(&self, id: i64) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(
            r#"
            SELECT id, chat_id, message, file_id, file_path, timestamp
            FROM messages
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(message)
    }

    /// Empty text clears the column, the same as on insert.
    pub async fn update_text(&self, id: i64, text: &str) -> Result<()> {
        let result = sqlx::query("UPDATE messages SET message = ?1 WHERE id = ?2")
            .bind(non_empty(Some(text.to_string())))
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Message {} not found", id)));
        }
        Ok(())
    }

    /// Removes the row only; a downloaded picture stays on disk.
    pub async fn delete(&self, id: i64) -> Result<()> {
        let result = sqlx::query("DELETE FROM messages WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(Error::NotFound(format!("Message {} not found", id)));
        }
        Ok(())
    }
}

fn non_empty(text: Option<String>) -> Option<String> {
    text.filter(|t| !t.is_empty())
}
