pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use crate::config::PanelConfig;
use crate::middleware::auth::SessionKeys;
use crate::services::message_service::MessageService;
use minijinja::Environment;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const GENERATED_SECRET_LEN: usize = 48;

#[derive(Clone)]
pub struct AppState {
    pub message_service: MessageService,
    pub images_dir: Arc<PathBuf>,
    pub web_password: Arc<str>,
    pub sessions: SessionKeys,
    pub templates: Arc<Environment<'static>>,
}

impl AppState {
    pub fn new(pool: SqlitePool, config: &PanelConfig) -> error::Result<Self> {
        let secret = config
            .session_secret
            .clone()
            .unwrap_or_else(|| utils::token::generate_secret(GENERATED_SECRET_LEN));

        Ok(Self {
            message_service: MessageService::new(pool),
            images_dir: Arc::new(config.storage.images_dir.clone()),
            web_password: Arc::from(config.web_password.as_str()),
            sessions: SessionKeys::new(&secret, config.session_ttl_hours),
            templates: Arc::new(routes::load_templates()?),
        })
    }
}

/// Installs the global tracing subscriber; `RUST_LOG` overrides the `info` default.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
