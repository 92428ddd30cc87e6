use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;

use crate::error::Result;
use crate::services::message_service::MessageService;

pub const PHOTO_ACK: &str = "Picture received! It will disappear soon.";
pub const TEXT_ACK: &str = "Message received! It will disappear soon.";
pub const WELCOME: &str =
    "Hi! Send me a message or a picture, and it will disappear after 10 seconds!";
pub const DELETE_AFTER: Duration = Duration::from_secs(10);
pub const IMAGE_EXTENSION: &str = "jpg";
/// Extra time a shutdown grants in-flight flows beyond the delete delay.
pub const DRAIN_MARGIN: Duration = Duration::from_secs(5);

/// What the relay needs from the messaging provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Sends `text` to the chat and returns the id of the sent message.
    async fn send_text(&self, chat_id: i64, text: &str) -> Result<i64>;
    async fn delete_message(&self, chat_id: i64, message_id: i64) -> Result<()>;
    /// Downloads the remote file to `destination`.
    async fn download_file(&self, file_id: &str, destination: &Path) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(Option<String>),
    Photo { file_id: String },
    Start,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incoming {
    pub chat_id: i64,
    pub message_id: i64,
    pub payload: Payload,
}

#[derive(Clone)]
pub struct RelayService {
    store: MessageService,
    transport: Arc<dyn ChatTransport>,
    images_dir: PathBuf,
    delete_after: Duration,
    // Process-local on purpose: a restart greets every chat again.
    welcomed: Arc<Mutex<HashSet<i64>>>,
    tasks: TaskTracker,
}

impl RelayService {
    pub fn new(
        store: MessageService,
        transport: Arc<dyn ChatTransport>,
        images_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            transport,
            images_dir: images_dir.into(),
            delete_after: DELETE_AFTER,
            welcomed: Arc::new(Mutex::new(HashSet::new())),
            tasks: TaskTracker::new(),
        }
    }

    pub fn with_delete_after(mut self, delay: Duration) -> Self {
        self.delete_after = delay;
        self
    }

    /// Runs the flow for one message on its own task so the delete delay
    /// never holds up other chats.
    pub fn spawn(&self, incoming: Incoming) -> JoinHandle<()> {
        let relay = self.clone();
        self.tasks.spawn(async move {
            let chat_id = incoming.chat_id;
            let message_id = incoming.message_id;
            if let Err(e) = relay.handle(incoming).await {
                tracing::error!(chat_id, message_id, error = %e, "Failed to relay message");
            }
        })
    }

    /// Waits for every spawned flow to finish its deletions, giving up after
    /// the delete delay plus [`DRAIN_MARGIN`]. Returns whether all finished.
    pub async fn drain(&self) -> bool {
        self.tasks.close();
        let pending = self.tasks.len();
        if pending > 0 {
            tracing::info!(pending, "Waiting for pending deletions");
        }

        let limit = self.delete_after + DRAIN_MARGIN;
        match tokio::time::timeout(limit, self.tasks.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    pending = self.tasks.len(),
                    "Shutdown timed out with messages left undeleted"
                );
                false
            }
        }
    }

    pub async fn handle(&self, incoming: Incoming) -> Result<()> {
        let Incoming {
            chat_id,
            message_id,
            payload,
        } = incoming;

        let ack_text = match payload {
            Payload::Start => {
                self.ensure_welcomed(chat_id).await?;
                return Ok(());
            }
            Payload::Photo { file_id } => {
                self.store_photo(chat_id, &file_id).await?;
                PHOTO_ACK
            }
            Payload::Text(text) => {
                self.store.insert_text(chat_id, text).await?;
                TEXT_ACK
            }
        };

        let ack_id = self.transport.send_text(chat_id, ack_text).await?;
        tracing::info!(
            chat_id,
            message_id,
            ack_message_id = ack_id,
            "Message stored and acknowledged"
        );

        tokio::time::sleep(self.delete_after).await;
        self.cleanup(chat_id, &[message_id, ack_id]).await;

        self.ensure_welcomed(chat_id).await?;
        Ok(())
    }

    async fn store_photo(&self, chat_id: i64, file_id: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.images_dir).await?;
        let path = self
            .images_dir
            .join(format!("{}.{}", file_id, IMAGE_EXTENSION));

        self.transport.download_file(file_id, &path).await?;
        self.store
            .insert_image(chat_id, file_id, &path.to_string_lossy())
            .await?;
        Ok(path)
    }

    /// Best effort: failures are logged and never stop the flow.
    async fn cleanup(&self, chat_id: i64, message_ids: &[i64]) {
        let mut deleted = 0;
        for &message_id in message_ids {
            match self.transport.delete_message(chat_id, message_id).await {
                Ok(()) => deleted += 1,
                Err(e) => {
                    tracing::warn!(chat_id, message_id, error = %e, "Failed to delete message")
                }
            }
        }
        if deleted == message_ids.len() {
            tracing::info!(chat_id, "Deleted messages successfully");
        }
    }

    /// Sends the onboarding notice unless this chat already got it.
    /// Returns whether a notice was sent.
    pub async fn ensure_welcomed(&self, chat_id: i64) -> Result<bool> {
        if !self.claim_welcome(chat_id) {
            return Ok(false);
        }

        if let Err(e) = self.transport.send_text(chat_id, WELCOME).await {
            self.release_welcome(chat_id);
            return Err(e);
        }
        Ok(true)
    }

    fn claim_welcome(&self, chat_id: i64) -> bool {
        let mut welcomed = self.welcomed.lock().unwrap_or_else(|p| p.into_inner());
        welcomed.insert(chat_id)
    }

    fn release_welcome(&self, chat_id: i64) {
        let mut welcomed = self.welcomed.lock().unwrap_or_else(|p| p.into_inner());
        welcomed.remove(&chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::pool::{create_memory_pool, run_migrations};
    use crate::error::Error;
    use mockall::predicate::eq;

    async fn setup_store() -> MessageService {
        let pool = create_memory_pool().await.expect("pool");
        run_migrations(&pool).await.expect("migrations");
        MessageService::new(pool)
    }

    const SHORT_DELAY: Duration = Duration::from_millis(50);

    fn temp_images_dir() -> PathBuf {
        std::env::temp_dir().join(format!("relay-images-{}", uuid::Uuid::new_v4()))
    }

    fn text(chat_id: i64, message_id: i64, body: &str) -> Incoming {
        Incoming {
            chat_id,
            message_id,
            payload: Payload::Text(Some(body.to_string())),
        }
    }

    #[tokio::test]
    async fn text_message_is_stored_acked_deleted_then_welcomed() {
        let store = setup_store().await;
        let mut transport = MockChatTransport::new();
        transport
            .expect_send_text()
            .with(eq(42), eq(TEXT_ACK))
            .times(1)
            .returning(|_, _| Ok(101));
        transport
            .expect_delete_message()
            .with(eq(42), eq(100))
            .times(1)
            .returning(|_, _| Ok(()));
        transport
            .expect_delete_message()
            .with(eq(42), eq(101))
            .times(1)
            .returning(|_, _| Ok(()));
        transport
            .expect_send_text()
            .with(eq(42), eq(WELCOME))
            .times(1)
            .returning(|_, _| Ok(102));
        transport.expect_download_file().never();

        let relay = RelayService::new(store.clone(), Arc::new(transport), temp_images_dir())
            .with_delete_after(SHORT_DELAY);
        let started = std::time::Instant::now();
        relay.handle(text(42, 100, "secret")).await.unwrap();
        assert!(started.elapsed() >= SHORT_DELAY);

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].chat_id, 42);
        assert_eq!(records[0].message.as_deref(), Some("secret"));
        assert!(records[0].file_id.is_none() && records[0].file_path.is_none());
    }

    #[tokio::test]
    async fn photo_message_downloads_largest_file_and_stores_path() {
        let store = setup_store().await;
        let images_dir = temp_images_dir();
        let expected_path = images_dir.join("AgACphoto.jpg");

        let mut transport = MockChatTransport::new();
        transport
            .expect_download_file()
            .withf(|file_id, _| file_id == "AgACphoto")
            .times(1)
            .returning(|_, dest| std::fs::write(dest, b"\xFF\xD8\xFFjpeg").map_err(Error::from));
        transport
            .expect_send_text()
            .with(eq(5), eq(PHOTO_ACK))
            .times(1)
            .returning(|_, _| Ok(11));
        transport
            .expect_send_text()
            .with(eq(5), eq(WELCOME))
            .times(1)
            .returning(|_, _| Ok(12));
        transport
            .expect_delete_message()
            .times(2)
            .returning(|_, _| Ok(()));

        let relay = RelayService::new(store.clone(), Arc::new(transport), images_dir.clone())
            .with_delete_after(SHORT_DELAY);
        relay
            .handle(Incoming {
                chat_id: 5,
                message_id: 10,
                payload: Payload::Photo {
                    file_id: "AgACphoto".into(),
                },
            })
            .await
            .unwrap();

        let records = store.list().await.unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].message.is_none());
        assert_eq!(records[0].file_id.as_deref(), Some("AgACphoto"));
        assert_eq!(
            records[0].file_path.as_deref(),
            Some(expected_path.to_string_lossy().as_ref())
        );
        let size = std::fs::metadata(&expected_path).unwrap().len();
        assert!(size > 0);

        let _ = std::fs::remove_dir_all(images_dir);
    }

    #[tokio::test]
    async fn welcome_is_sent_once_per_chat() {
        let store = setup_store().await;
        let mut transport = MockChatTransport::new();
        transport
            .expect_send_text()
            .withf(|_, text| text == TEXT_ACK)
            .times(3)
            .returning(|_, _| Ok(500));
        transport
            .expect_send_text()
            .withf(|chat_id, text| *chat_id == 9 && text == WELCOME)
            .times(1)
            .returning(|_, _| Ok(501));
        transport
            .expect_delete_message()
            .returning(|_, _| Ok(()));

        let relay = RelayService::new(store, Arc::new(transport), temp_images_dir())
            .with_delete_after(SHORT_DELAY);
        for message_id in 1..=3 {
            relay.handle(text(9, message_id, "again")).await.unwrap();
        }
    }

    #[tokio::test]
    async fn failed_deletions_do_not_abort_the_flow() {
        let store = setup_store().await;
        let mut transport = MockChatTransport::new();
        transport
            .expect_send_text()
            .with(eq(3), eq(TEXT_ACK))
            .returning(|_, _| Ok(31));
        transport
            .expect_delete_message()
            .times(2)
            .returning(|_, _| Err(Error::Telegram("message can't be deleted".into())));
        transport
            .expect_send_text()
            .with(eq(3), eq(WELCOME))
            .times(1)
            .returning(|_, _| Ok(32));

        let relay = RelayService::new(store, Arc::new(transport), temp_images_dir())
            .with_delete_after(SHORT_DELAY);
        relay.handle(text(3, 30, "keep going")).await.unwrap();
    }

    #[tokio::test]
    async fn start_command_only_welcomes() {
        let store = setup_store().await;
        let mut transport = MockChatTransport::new();
        transport
            .expect_send_text()
            .with(eq(8), eq(WELCOME))
            .times(1)
            .returning(|_, _| Ok(1));
        transport.expect_delete_message().never();

        let relay = RelayService::new(store.clone(), Arc::new(transport), temp_images_dir())
            .with_delete_after(SHORT_DELAY);
        let start = Incoming {
            chat_id: 8,
            message_id: 1,
            payload: Payload::Start,
        };
        relay.handle(start.clone()).await.unwrap();
        relay.handle(start).await.unwrap();

        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_welcome_can_be_retried() {
        let store = setup_store().await;
        let mut transport = MockChatTransport::new();
        let attempts = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = attempts.clone();
        transport
            .expect_send_text()
            .with(eq(4), eq(WELCOME))
            .times(2)
            .returning(move |_, _| {
                if seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                    Err(Error::Telegram("Too Many Requests".into()))
                } else {
                    Ok(2)
                }
            });

        let relay = RelayService::new(store, Arc::new(transport), temp_images_dir())
            .with_delete_after(SHORT_DELAY);
        assert!(relay.ensure_welcomed(4).await.is_err());
        assert!(relay.ensure_welcomed(4).await.unwrap());
        assert!(!relay.ensure_welcomed(4).await.unwrap());
    }

    fn recording_transport(events: &Arc<Mutex<Vec<String>>>) -> MockChatTransport {
        let mut transport = MockChatTransport::new();
        let log = events.clone();
        transport.expect_send_text().returning(move |chat_id, text| {
            log.lock().unwrap().push(format!("send:{}:{}", chat_id, text));
            Ok(chat_id * 10)
        });
        let log = events.clone();
        transport
            .expect_delete_message()
            .returning(move |chat_id, message_id| {
                log.lock().unwrap().push(format!("delete:{}:{}", chat_id, message_id));
                Ok(())
            });
        transport
    }

    fn count(events: &Arc<Mutex<Vec<String>>>, prefix: &str) -> usize {
        events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    #[tokio::test]
    async fn drain_waits_for_pending_deletions() {
        let store = setup_store().await;
        let events = Arc::new(Mutex::new(Vec::<String>::new()));
        let relay = RelayService::new(
            store,
            Arc::new(recording_transport(&events)),
            temp_images_dir(),
        )
        .with_delete_after(Duration::from_millis(300));

        relay.spawn(text(6, 61, "bye"));
        relay.spawn(text(7, 71, "bye too"));
        assert!(relay.drain().await);

        // Acks get id chat_id * 10.
        for deleted in ["delete:6:61", "delete:6:60", "delete:7:71", "delete:7:70"] {
            assert_eq!(count(&events, deleted), 1, "{}", deleted);
        }
    }

    #[tokio::test]
    async fn concurrent_messages_from_one_chat_welcome_once() {
        let store = setup_store().await;
        let events = Arc::new(Mutex::new(Vec::<String>::new()));
        let relay = RelayService::new(
            store,
            Arc::new(recording_transport(&events)),
            temp_images_dir(),
        )
        .with_delete_after(SHORT_DELAY);

        let first = relay.spawn(text(3, 1, "one"));
        let second = relay.spawn(text(3, 2, "two"));
        let third = relay.spawn(text(3, 3, "three"));
        first.await.unwrap();
        second.await.unwrap();
        third.await.unwrap();

        assert_eq!(count(&events, &format!("send:3:{}", TEXT_ACK)), 3);
        assert_eq!(count(&events, &format!("send:3:{}", WELCOME)), 1);
        assert_eq!(count(&events, "delete:3:"), 6);
    }

    #[tokio::test]
    async fn waiting_message_does_not_block_the_next_one() {
        let store = setup_store().await;
        let events = Arc::new(Mutex::new(Vec::<String>::new()));
        let relay = RelayService::new(
            store,
            Arc::new(recording_transport(&events)),
            temp_images_dir(),
        )
        .with_delete_after(Duration::from_secs(2));

        let first = relay.spawn(text(1, 100, "one"));
        let second = relay.spawn(text(2, 200, "two"));
        for _ in 0..100 {
            if count(&events, "send:") == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(count(&events, "send:"), 2);
        assert_eq!(count(&events, "delete:"), 0);

        first.await.unwrap();
        second.await.unwrap();
        assert_eq!(count(&events, "delete:"), 4);
        assert_eq!(count(&events, &format!("send:1:{}", WELCOME)), 1);
        assert_eq!(count(&events, &format!("send:2:{}", WELCOME)), 1);
    }
}
