use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use crate::{
    error::ChannelError,
    types::{Message, Response},
};

/// Bound on each channel's inbound message buffer.
///
/// When a producer outruns the dispatcher the excess is dropped with a
/// warning — except the CLI, which awaits its request/response pair and
/// therefore never queues more than one message.
pub const MESSAGE_BUFFER: usize = 64;

/// Common interface implemented by every channel adapter
/// (CLI, Telegram, Feishu, web, cron).
///
/// Implementations must be `Send + Sync` so they can be stored in a
/// [`ChannelManager`](crate::manager::ChannelManager) and driven from
/// multiple Tokio tasks.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Stable lowercase identifier for this channel (e.g. `"telegram"`).
    ///
    /// Used as the key inside the manager and must be unique across all
    /// registered adapters.
    fn name(&self) -> &str;

    /// Bring the channel online. Returns only after bootstrap (auth
    /// handshake, port bind) completes, failing fast on permanent errors.
    /// Idempotent: a second call on a running channel is a no-op.
    async fn start(&self) -> Result<(), ChannelError>;

    /// Drain in-flight producers, close the message stream exactly once,
    /// release sockets and tickers. Channels with possibly-blocking reads
    /// enforce a short timeout and log if they cannot cleanly join.
    async fn stop(&self) -> Result<(), ChannelError>;

    /// Deliver one response. Implementations split oversize payloads and
    /// retry transient formatting failures once with degraded options.
    async fn send(&self, resp: &Response) -> Result<(), ChannelError>;

    /// Take the inbound message stream.
    ///
    /// The stream is consumed by exactly one reader (the dispatcher);
    /// subsequent calls return `None`.
    fn messages(&self) -> Option<mpsc::Receiver<Message>>;
}

/// Shared plumbing for a channel's inbound stream: a bounded sender plus a
/// take-once receiver.
///
/// The primary sender lives here; producer tasks hold clones. [`close`]
/// drops the primary so the stream ends once every producer has drained —
/// mpsc semantics make the closure happen exactly once by construction.
///
/// [`close`]: MessageStream::close
pub struct MessageStream {
    tx: Mutex<Option<mpsc::Sender<Message>>>,
    rx: Mutex<Option<mpsc::Receiver<Message>>>,
}

impl MessageStream {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx: Mutex::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Clone the sender for a producer task. `None` after [`close`].
    ///
    /// [`close`]: MessageStream::close
    pub fn sender(&self) -> Option<mpsc::Sender<Message>> {
        self.tx.lock().unwrap().clone()
    }

    /// Non-blocking push for producers that must never stall on a slow
    /// dispatcher. On overflow the message is dropped with a warning.
    pub fn push(&self, channel: &str, msg: Message) {
        let Some(tx) = self.sender() else {
            warn!(channel, id = %msg.id, "message stream closed, dropping");
            return;
        };
        if let Err(e) = tx.try_send(msg) {
            warn!(channel, error = %e, "message buffer full, dropping inbound message");
        }
    }

    /// Take the receiver. Only the first caller gets it.
    pub fn take(&self) -> Option<mpsc::Receiver<Message>> {
        self.rx.lock().unwrap().take()
    }

    /// Drop the primary sender. The stream closes once producer clones
    /// finish.
    pub fn close(&self) {
        self.tx.lock().unwrap().take();
    }
}
