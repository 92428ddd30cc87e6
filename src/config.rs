use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;

pub const DEFAULT_DATABASE_PATH: &str = "/app/db/messages.db";
pub const DEFAULT_IMAGES_DIR: &str = "/app/images";
pub const DEFAULT_SERVER_ADDRESS: &str = "0.0.0.0:5000";
pub const DEFAULT_SESSION_TTL_HOURS: i64 = 12;

/// Locations shared by the relay and the panel.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub database_path: PathBuf,
    pub images_dir: PathBuf,
}

impl StorageConfig {
    pub fn from_env() -> Self {
        Self {
            database_path: get_env_or("DATABASE_PATH", DEFAULT_DATABASE_PATH).into(),
            images_dir: get_env_or("IMAGES_DIR", DEFAULT_IMAGES_DIR).into(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub storage: StorageConfig,
    pub telegram_bot_token: String,
}

impl RelayConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            storage: StorageConfig::from_env(),
            telegram_bot_token: get_env("TELEGRAM_BOT_TOKEN")?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct PanelConfig {
    pub storage: StorageConfig,
    pub server_address: String,
    pub web_password: String,
    /// Signs session cookies. `None` means a fresh random secret per process.
    pub session_secret: Option<String>,
    pub session_ttl_hours: i64,
}

impl PanelConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        Ok(Self {
            storage: StorageConfig::from_env(),
            server_address: get_env_or("SERVER_ADDRESS", DEFAULT_SERVER_ADDRESS),
            web_password: get_env("WEB_PASSWORD")?,
            session_secret: env::var("SESSION_SECRET").ok().filter(|s| !s.is_empty()),
            session_ttl_hours: match env::var("SESSION_TTL_HOURS") {
                Ok(_) => positive_hours(get_env_parse("SESSION_TTL_HOURS")?)?,
                Err(_) => DEFAULT_SESSION_TTL_HOURS,
            },
        })
    }
}

fn positive_hours(hours: i64) -> Result<i64> {
    if hours < 1 {
        return Err(Error::Config(format!(
            "SESSION_TTL_HOURS must be at least 1, got {}",
            hours
        )));
    }
    Ok(hours)
}

fn get_env(name: &str) -> Result<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(Error::Config(format!("Missing environment variable: {}", name))),
    }
}

fn get_env_or(name: &str, default: &str) -> String {
    env::var(name)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn get_env_parse<T>(name: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(name)?;
    raw.parse()
        .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ttl_must_be_positive() {
        assert_eq!(positive_hours(12).unwrap(), 12);
        assert!(matches!(positive_hours(0), Err(Error::Config(_))));
        assert!(matches!(positive_hours(-3), Err(Error::Config(_))));
    }
}
