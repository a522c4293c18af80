use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::{
    channel::Channel,
    error::ChannelError,
    types::Response,
};

/// Channels that start before the rest, in this order. The CLI goes last so
/// its prompt appears after the network channels have printed their banners.
const START_ORDER: &[&str] = &["web", "telegram", "feishu"];

/// Registry of channel adapters keyed by [`Channel::name`].
///
/// Channels are started in a defined order and stopped best-effort in
/// parallel. The manager is the single place the dispatcher and sinks go
/// through to reach a channel by name.
pub struct ChannelManager {
    channels: HashMap<String, Arc<dyn Channel>>,
}

impl ChannelManager {
    pub fn new() -> Self {
        Self {
            channels: HashMap::new(),
        }
    }

    /// Register a channel adapter. A channel with the same name is replaced.
    pub fn register(&mut self, channel: Arc<dyn Channel>) {
        let name = channel.name().to_string();
        info!(channel = %name, "registering channel adapter");
        self.channels.insert(name, channel);
    }

    /// Start all registered channels in the defined order:
    /// web → telegram → feishu → (banner delay) → cli → remaining.
    ///
    /// The first bootstrap failure aborts the sequence and is returned —
    /// a channel that cannot start is fatal to process startup.
    pub async fn start_all(&self) -> Result<(), ChannelError> {
        let mut started: Vec<&str> = Vec::new();

        for name in START_ORDER {
            if let Some(ch) = self.channels.get(*name) {
                info!(channel = %name, "starting channel");
                ch.start().await?;
                started.push(name);
            }
        }

        if let Some(cli) = self.channels.get("cli") {
            // Let the Telegram banner land before the prompt is drawn.
            if started.contains(&"telegram") {
                sleep(Duration::from_secs(1)).await;
            }
            info!(channel = "cli", "starting channel");
            cli.start().await?;
            started.push("cli");
        }

        let mut rest: Vec<&String> = self
            .channels
            .keys()
            .filter(|name| !started.contains(&name.as_str()) && *name != "cli")
            .collect();
        rest.sort();
        for name in rest {
            info!(channel = %name, "starting channel");
            self.channels[name.as_str()].start().await?;
        }

        Ok(())
    }

    /// Stop every channel in parallel. Errors are collected and returned,
    /// never allowed to prevent the other channels from stopping.
    pub async fn stop_all(&self) -> Vec<(String, ChannelError)> {
        let stops = self.channels.iter().map(|(name, ch)| {
            let name = name.clone();
            let ch = Arc::clone(ch);
            async move { (name, ch.stop().await) }
        });

        let mut failures = Vec::new();
        for (name, result) in join_all(stops).await {
            if let Err(e) = result {
                warn!(channel = %name, error = %e, "error while stopping channel");
                failures.push((name, e));
            }
        }
        failures
    }

    /// Deliver text to the named channel.
    pub async fn send_to(
        &self,
        name: &str,
        text: &str,
        reply_to: &str,
    ) -> Result<(), ChannelError> {
        let channel = self
            .channels
            .get(name)
            .ok_or_else(|| ChannelError::NotFound(name.to_string()))?;
        channel.send(&Response::new(text, reply_to)).await
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Channel>> {
        self.channels.get(name).cloned()
    }

    /// Iterate registered channels for dispatcher fan-out.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Channel>> {
        self.channels.values()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

impl Default for ChannelManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::MessageStream;
    use crate::types::Message;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tokio::sync::mpsc;

    struct FakeChannel {
        name: String,
        stream: MessageStream,
        sent: Mutex<Vec<Response>>,
        start_log: Arc<Mutex<Vec<String>>>,
        stops: Arc<AtomicUsize>,
    }

    impl FakeChannel {
        fn new(name: &str, log: Arc<Mutex<Vec<String>>>, stops: Arc<AtomicUsize>) -> Self {
            Self {
                name: name.to_string(),
                stream: MessageStream::new(4),
                sent: Mutex::new(Vec::new()),
                start_log: log,
                stops,
            }
        }
    }

    #[async_trait]
    impl Channel for FakeChannel {
        fn name(&self) -> &str {
            &self.name
        }

        async fn start(&self) -> Result<(), ChannelError> {
            self.start_log.lock().unwrap().push(self.name.clone());
            Ok(())
        }

        async fn stop(&self) -> Result<(), ChannelError> {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.stream.close();
            Ok(())
        }

        async fn send(&self, resp: &Response) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(resp.clone());
            Ok(())
        }

        fn messages(&self) -> Option<mpsc::Receiver<Message>> {
            self.stream.take()
        }
    }

    #[tokio::test]
    async fn send_to_unknown_channel_fails() {
        let manager = ChannelManager::new();
        let err = manager.send_to("nope", "hi", "1").await.unwrap_err();
        assert!(matches!(err, ChannelError::NotFound(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn start_order_is_web_feishu_cli_then_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stops = Arc::new(AtomicUsize::new(0));
        let mut manager = ChannelManager::new();
        for name in ["cron", "cli", "feishu", "web"] {
            manager.register(Arc::new(FakeChannel::new(
                name,
                Arc::clone(&log),
                Arc::clone(&stops),
            )));
        }
        manager.start_all().await.unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["web", "feishu", "cli", "cron"]);
    }

    #[tokio::test]
    async fn stop_all_reaches_every_channel() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let stops = Arc::new(AtomicUsize::new(0));
        let mut manager = ChannelManager::new();
        for name in ["a", "b", "c"] {
            manager.register(Arc::new(FakeChannel::new(
                name,
                Arc::clone(&log),
                Arc::clone(&stops),
            )));
        }
        let failures = manager.stop_all().await;
        assert!(failures.is_empty());
        assert_eq!(stops.load(Ordering::SeqCst), 3);
    }
}
