//! Interactive terminal channel.
//!
//! Prints a prompt, reads one line at a time, and pairs each emitted message
//! with the reply that comes back through `send`: the prompt stays hidden
//! until the pending request is answered. Out-of-band sends (nothing
//! pending, e.g. a cron result delivered to the main session) are printed
//! with surrounding blank lines and the prompt is redrawn.

use std::io::Write;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    channel::{Channel, MessageStream},
    error::ChannelError,
    types::{Message, Response},
};

const PROMPT: &str = "> ";

/// Words that terminate the read loop. The `/`-prefixed forms mirror the
/// slash-command habit of chat platforms.
const EXIT_WORDS: &[&str] = &["exit", "quit", "/exit", "/quit"];

/// Stdin reads may not be interruptible — wait this long on stop before
/// abandoning the reader task.
const STOP_WAIT_MS: u64 = 500;

pub struct CliChannel {
    stream: MessageStream,
    /// True while an emitted message awaits its reply.
    pending: Arc<AtomicBool>,
    reply_notify: Arc<Notify>,
    cancel: CancellationToken,
    /// Fires when the read loop ends (exit word, EOF, or stop).
    closed: CancellationToken,
    next_id: Arc<AtomicU64>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CliChannel {
    pub fn new() -> Self {
        Self {
            stream: MessageStream::new(1),
            pending: Arc::new(AtomicBool::new(false)),
            reply_notify: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            closed: CancellationToken::new(),
            next_id: Arc::new(AtomicU64::new(1)),
            task: Mutex::new(None),
        }
    }

    /// Token that fires once the read loop has ended — the serve command
    /// watches this to shut the process down when the user types `exit`.
    pub fn closed(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl Default for CliChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for CliChannel {
    fn name(&self) -> &str {
        "cli"
    }

    async fn start(&self) -> Result<(), ChannelError> {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return Ok(());
        }

        let Some(tx) = self.stream.sender() else {
            return Err(ChannelError::ConnectionFailed(
                "cli message stream already closed".to_string(),
            ));
        };

        let pending = Arc::clone(&self.pending);
        let reply_notify = Arc::clone(&self.reply_notify);
        let cancel = self.cancel.clone();
        let closed = self.closed.clone();
        let next_id = Arc::clone(&self.next_id);

        *task = Some(tokio::spawn(read_loop(
            tx,
            pending,
            reply_notify,
            cancel,
            closed,
            next_id,
        )));
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        self.cancel.cancel();
        let handle = self.task.lock().unwrap().take();
        if let Some(mut handle) = handle {
            if timeout(Duration::from_millis(STOP_WAIT_MS), &mut handle)
                .await
                .is_err()
            {
                // The blocking stdin read cannot be interrupted; let the
                // abandoned task die with the process.
                warn!("cli reader did not stop within {STOP_WAIT_MS}ms, abandoning");
                handle.abort();
            }
        }
        self.stream.close();
        Ok(())
    }

    async fn send(&self, resp: &Response) -> Result<(), ChannelError> {
        if resp.text.is_empty() {
            // Still release the prompt latch so the loop doesn't hang.
            if self.pending.swap(false, Ordering::SeqCst) {
                self.reply_notify.notify_one();
            }
            return Ok(());
        }

        let mut out = std::io::stdout().lock();
        if self.pending.swap(false, Ordering::SeqCst) {
            // Paired reply: text, blank line; the read loop redraws the prompt.
            writeln!(out, "{}\n", resp.text)
                .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
            drop(out);
            self.reply_notify.notify_one();
        } else {
            // Out-of-band delivery while the user sits at the prompt.
            writeln!(out, "\n{}\n", resp.text)
                .map_err(|e| ChannelError::SendFailed(e.to_string()))?;
            write!(out, "{PROMPT}").map_err(|e| ChannelError::SendFailed(e.to_string()))?;
            out.flush().map_err(|e| ChannelError::SendFailed(e.to_string()))?;
        }
        Ok(())
    }

    fn messages(&self) -> Option<mpsc::Receiver<Message>> {
        self.stream.take()
    }
}

async fn read_loop(
    tx: mpsc::Sender<Message>,
    pending: Arc<AtomicBool>,
    reply_notify: Arc<Notify>,
    cancel: CancellationToken,
    closed: CancellationToken,
    next_id: Arc<AtomicU64>,
) {
    loop {
        {
            let mut out = std::io::stdout().lock();
            let _ = write!(out, "{PROMPT}");
            let _ = out.flush();
        }

        let line = tokio::select! {
            read = tokio::task::spawn_blocking(read_one_line) => match read {
                Ok(Some(line)) => line,
                _ => break, // EOF or reader panic
            },
            _ = cancel.cancelled() => break,
        };

        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&text) {
            debug!("cli exit word received");
            break;
        }

        let n = next_id.fetch_add(1, Ordering::SeqCst);
        let msg = make_message(n, text);

        pending.store(true, Ordering::SeqCst);
        if tx.send(msg).await.is_err() {
            break;
        }

        // Hold the prompt until the paired reply lands.
        tokio::select! {
            _ = reply_notify.notified() => {}
            _ = cancel.cancelled() => break,
        }
    }

    closed.cancel();
}

fn make_message(n: u64, text: &str) -> Message {
    Message {
        id: format!("cli-{n}"),
        channel_id: "cli:local".to_string(),
        user_id: "local".to_string(),
        username: std::env::var("USER").unwrap_or_else(|_| "local".to_string()),
        text: text.to_string(),
        reply_to: None,
        metadata: Default::default(),
    }
}

fn read_one_line() -> Option<String> {
    let mut buf = String::new();
    match std::io::stdin().read_line(&mut buf) {
        Ok(0) => None, // EOF
        Ok(_) => Some(buf),
        Err(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_ids_are_monotonic() {
        let a = make_message(1, "one");
        let b = make_message(2, "two");
        assert_eq!(a.id, "cli-1");
        assert_eq!(b.id, "cli-2");
        assert_eq!(a.channel_id, "cli:local");
    }

    #[test]
    fn exit_words_cover_slash_variants() {
        for word in ["exit", "quit", "/exit", "/quit"] {
            assert!(EXIT_WORDS.contains(&word));
        }
        assert!(!EXIT_WORDS.contains(&"stop"));
    }

    #[tokio::test]
    async fn paired_send_releases_the_latch() {
        let cli = CliChannel::new();
        cli.pending.store(true, Ordering::SeqCst);
        cli.send(&Response::new("hello", "")).await.unwrap();
        assert!(!cli.pending.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn empty_send_still_releases_the_latch() {
        let cli = CliChannel::new();
        cli.pending.store(true, Ordering::SeqCst);
        cli.send(&Response::new("", "")).await.unwrap();
        assert!(!cli.pending.load(Ordering::SeqCst));
    }
}
