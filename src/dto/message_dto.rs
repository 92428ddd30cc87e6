use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::message::Message;

/// A record as the list page shows it.
#[derive(Debug, Serialize)]
pub struct MessageView {
    pub id: i64,
    pub chat_id: i64,
    pub message: Option<String>,
    pub image_name: Option<String>,
    pub timestamp: String,
}

impl From<&Message> for MessageView {
    fn from(msg: &Message) -> Self {
        Self {
            id: msg.id,
            chat_id: msg.chat_id,
            message: msg.message.clone(),
            image_name: msg
                .file_path
                .as_deref()
                .and_then(|p| Path::new(p).file_name())
                .map(|name| name.to_string_lossy().into_owned()),
            timestamp: msg.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct EditForm {
    pub message: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub notice: Option<String>,
}

impl ListQuery {
    pub fn notice_text(&self) -> Option<&'static str> {
        match self.notice.as_deref() {
            Some("updated") => Some("Message updated successfully."),
            Some("deleted") => Some("Message deleted successfully."),
            _ => None,
        }
    }
}
