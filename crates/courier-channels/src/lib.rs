pub mod channel;
pub mod cli;
pub mod error;
pub mod manager;
pub mod types;

pub use channel::{Channel, MessageStream, MESSAGE_BUFFER};
pub use cli::CliChannel;
pub use error::ChannelError;
pub use manager::ChannelManager;
pub use types::{Message, Response};
