use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::json;

use crate::error::{Error, Result};
use crate::services::relay_service::{ChatTransport, Incoming, Payload, RelayService};

const API_BASE: &str = "https://api.telegram.org";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(20);
const POLL_TIMEOUT_SECS: u64 = 30;
const POLL_RETRY_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub message: Option<TelegramMessage>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramMessage {
    pub message_id: i64,
    pub chat: TelegramChat,
    pub text: Option<String>,
    #[serde(default)]
    pub photo: Vec<PhotoSize>,
}

#[derive(Debug, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PhotoSize {
    pub file_id: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Deserialize)]
pub struct TelegramFile {
    pub file_id: String,
    pub file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SentMessage {
    pub message_id: i64,
}

impl TelegramMessage {
    /// Maps a provider message onto the relay's input. Anything that is
    /// neither text nor a photo yields `None`.
    pub fn into_incoming(self) -> Option<Incoming> {
        let payload = if let Some(best) = largest_photo(&self.photo) {
            Payload::Photo {
                file_id: best.file_id.clone(),
            }
        } else {
            let text = self.text?;
            if is_start_command(&text) {
                Payload::Start
            } else {
                Payload::Text(Some(text))
            }
        };

        Some(Incoming {
            chat_id: self.chat.id,
            message_id: self.message_id,
            payload,
        })
    }
}

fn largest_photo(sizes: &[PhotoSize]) -> Option<&PhotoSize> {
    sizes
        .iter()
        .max_by_key(|p| u64::from(p.width) * u64::from(p.height))
}

fn is_start_command(text: &str) -> bool {
    let command = text.split_whitespace().next().unwrap_or_default();
    command == "/start" || command.starts_with("/start@")
}

#[derive(Clone)]
pub struct TelegramClient {
    client: Client,
    token: String,
}

impl TelegramClient {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(READ_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            token: token.into(),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
        timeout: Duration,
    ) -> Result<T> {
        let url = format!("{}/bot{}/{}", API_BASE, self.token, method);
        let response: ApiResponse<T> = self
            .client
            .post(&url)
            .json(&body)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::Reqwest(e.without_url()))?
            .json()
            .await
            .map_err(|e| Error::Reqwest(e.without_url()))?;

        into_result(method, response)
    }

    /// Polling and a registered webhook are mutually exclusive.
    pub async fn delete_webhook(&self) -> Result<()> {
        let _: bool = self
            .call("deleteWebhook", json!({}), READ_TIMEOUT)
            .await?;
        Ok(())
    }

    pub async fn get_updates(&self, offset: Option<i64>) -> Result<Vec<TelegramUpdate>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message"],
            }),
            READ_TIMEOUT + Duration::from_secs(POLL_TIMEOUT_SECS),
        )
        .await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<SentMessage> {
        self.call(
            "sendMessage",
            json!({ "chat_id": chat_id, "text": text }),
            READ_TIMEOUT,
        )
        .await
    }

    pub async fn get_file(&self, file_id: &str) -> Result<TelegramFile> {
        self.call("getFile", json!({ "file_id": file_id }), READ_TIMEOUT)
            .await
    }
}

fn into_result<T>(method: &str, response: ApiResponse<T>) -> Result<T> {
    if !response.ok {
        return Err(Error::Telegram(
            response
                .description
                .unwrap_or_else(|| format!("{} failed", method)),
        ));
    }
    response
        .result
        .ok_or_else(|| Error::Telegram(format!("{} returned no result", method)))
}

#[async_trait]
impl ChatTransport for TelegramClient {
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64> {
        Ok(self.send_message(chat_id, text).await?.message_id)
    }

    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()> {
        let _: bool = self
            .call(
                "deleteMessage",
                json!({ "chat_id": chat_id, "message_id": message_id }),
                READ_TIMEOUT,
            )
            .await?;
        Ok(())
    }

    async fn download_file(&self, file_id: &str, destination: &Path) -> Result<()> {
        let file = self.get_file(file_id).await?;
        let remote_path = file.file_path.ok_or_else(|| {
            Error::Telegram(format!("file {} is not available for download", file.file_id))
        })?;

        let url = format!("{}/file/bot{}/{}", API_BASE, self.token, remote_path);
        let bytes = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Reqwest(e.without_url()))?
            .bytes()
            .await
            .map_err(|e| Error::Reqwest(e.without_url()))?;

        tokio::fs::write(destination, &bytes).await?;
        tracing::debug!(file_id, bytes = bytes.len(), path = %destination.display(), "Downloaded file");
        Ok(())
    }
}

/// Long-polls for updates and hands every message to the relay on its own task.
pub async fn run_polling(client: TelegramClient, relay: RelayService) -> Result<()> {
    client.delete_webhook().await?;
    tracing::info!("Polling Telegram for updates");

    let mut offset: Option<i64> = None;
    loop {
        match client.get_updates(offset).await {
            Ok(updates) => {
                for update in updates {
                    offset = Some(update.update_id + 1);
                    if let Some(incoming) = update.message.and_then(TelegramMessage::into_incoming)
                    {
                        relay.spawn(incoming);
                    }
                }
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to fetch Telegram updates");
                tokio::time::sleep(POLL_RETRY_DELAY).await;
            }
        }
    }
}
