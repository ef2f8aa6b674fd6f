//! Telegram Bot API adapter: long polling, webhook registration and `sendMessage`.

mod client;
pub mod models;

pub use client::TelegramClient;
pub use models::Update;
