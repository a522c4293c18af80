//! The unit of work delivered to a thread, and the one-shot reply path
//! bundled with it.

use std::collections::HashMap;

use futures_util::future::BoxFuture;

use courier_channels::ChannelError;

type DeliverFn = Box<dyn Fn(String) -> BoxFuture<'static, Result<(), ChannelError>> + Send + Sync>;

/// A per-wake reply callback.
///
/// Built by the dispatcher, a sink closes over everything needed to answer
/// the originating message: the channel, the routing token, or — for cron
/// fan-out — a target session. The thread worker invokes it exactly once
/// per wake; sinks are never shared across wakes. Empty text is a valid
/// no-op.
pub struct Sink {
    label: String,
    deliver: DeliverFn,
}

impl Sink {
    pub fn new<F>(label: impl Into<String>, deliver: F) -> Self
    where
        F: Fn(String) -> BoxFuture<'static, Result<(), ChannelError>> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            deliver: Box::new(deliver),
        }
    }

    /// A sink that swallows its reply (silent cron jobs).
    pub fn noop(label: impl Into<String>) -> Self {
        Self::new(label, |_| Box::pin(async { Ok(()) }))
    }

    /// Human description of where the reply goes — surfaced to the agent in
    /// its system prompt so it can write for the destination.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub async fn deliver(&self, text: &str) -> Result<(), ChannelError> {
        if text.is_empty() {
            return Ok(());
        }
        (self.deliver)(text.to_string()).await
    }
}

impl std::fmt::Debug for Sink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sink").field("label", &self.label).finish()
    }
}

/// One unit of work for a session thread.
#[derive(Debug)]
pub struct WakeMessage {
    /// What triggered this wake, e.g. `"telegram"` or `"cron_finished"`.
    pub source: String,
    /// User-visible text, already preprocessed (media summary prepended).
    pub message: String,
    pub sink: Sink,
    /// Agent template to run. Empty means the default agent.
    pub agent_name: String,
    /// Template substitution variables (e.g. `TASK`).
    pub vars: HashMap<String, String>,
}
