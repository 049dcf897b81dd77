//! Feed transport abstraction and the Telegram implementation.

pub mod channel;
pub mod telegram;
pub mod telegram_types;

pub use channel::*;
pub use telegram::{TelegramConfig, TelegramTransport};
