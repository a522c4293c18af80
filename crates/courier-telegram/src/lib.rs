//! Telegram channel adapter.
//!
//! Talks to the Bot API directly over HTTPS: a 30-second `getUpdates` long
//! poll drives the inbound side, `sendMessage` the outbound. No public URL
//! is required.

pub mod api;
pub mod channel;
pub mod error;
pub mod media;
pub mod send;

pub use channel::TelegramChannel;
pub use error::TelegramError;
pub use send::split_message;
