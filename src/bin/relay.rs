use std::sync::Arc;

use ephemeral_relay::{
    config::RelayConfig,
    database::pool::{create_pool, run_migrations},
    init_tracing,
    services::{
        message_service::MessageService,
        relay_service::RelayService,
        telegram_service::{run_polling, TelegramClient},
    },
};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = RelayConfig::from_env()?;

    let pool = create_pool(&config.storage.database_path).await?;
    run_migrations(&pool).await?;
    tokio::fs::create_dir_all(&config.storage.images_dir).await?;

    let client = TelegramClient::new(config.telegram_bot_token.clone())?;
    let relay = RelayService::new(
        MessageService::new(pool),
        Arc::new(client.clone()),
        config.storage.images_dir.clone(),
    );

    info!("Starting bot...");
    let outcome = tokio::select! {
        result = run_polling(client, relay.clone()) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
            Ok(())
        }
    };

    // Messages still inside their delete delay are removed before exit.
    relay.drain().await;
    outcome?;
    Ok(())
}
