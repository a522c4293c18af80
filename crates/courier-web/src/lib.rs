//! Browser channel: WebSocket chat, embedded frontend, history API.

pub mod channel;

pub use channel::WebChannel;
