use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A stored chat entry: either text or a downloaded picture.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Message {
    pub id: i64,
    pub chat_id: i64,
    pub message: Option<String>,
    pub file_id: Option<String>,
    pub file_path: Option<String>,
    pub timestamp: NaiveDateTime,
}

impl Message {
    pub fn is_image(&self) -> bool {
        self.file_id.is_some() || self.file_path.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateMessage {
    Text {
        chat_id: i64,
        text: Option<String>,
    },
    Image {
        chat_id: i64,
        file_id: String,
        file_path: String,
    },
}
