pub mod export_service;
pub mod message_service;
pub mod relay_service;
pub mod telegram_service;
