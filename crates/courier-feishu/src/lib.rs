//! Feishu/Lark channel adapter.
//!
//! Inbound: an HTTP webhook at `POST /webhook/event` receiving event v2
//! payloads, optionally wrapped in an AES-encrypted envelope. Deliveries
//! are at-least-once upstream, so events are deduplicated by id. Outbound:
//! the IM send API with a tenant access token.

pub mod channel;
pub mod crypto;
pub mod dedup;
pub mod error;
pub mod event;
pub mod send;

pub use channel::FeishuChannel;
pub use error::FeishuError;
