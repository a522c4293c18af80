//! The scheduler surfaced as a [`Channel`].
//!
//! Inbound messages are synthesized from job fires; `send` is a no-op
//! because cron replies travel through the dispatcher's report-to-session
//! sink, never back through this channel.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use courier_channels::channel::{Channel, MessageStream, MESSAGE_BUFFER};
use courier_channels::types::{meta, Message, Response};
use courier_channels::ChannelError;
use courier_core::types::short_hex;

use crate::engine::{FireCallback, Scheduler};
use crate::store::JobStore;
use crate::types::Job;

pub struct CronChannel {
    scheduler: Arc<Scheduler>,
    stream: Arc<MessageStream>,
    shutdown: Mutex<Option<watch::Sender<bool>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl CronChannel {
    pub fn new(store_path: impl Into<PathBuf>) -> Self {
        let stream = Arc::new(MessageStream::new(MESSAGE_BUFFER));
        let fire_stream = Arc::clone(&stream);
        let on_fire: FireCallback = Arc::new(move |job: Job| {
            fire_stream.push("cron", fire_message(&job));
        });
        let scheduler = Arc::new(Scheduler::new(JobStore::new(store_path), on_fire));
        Self {
            scheduler,
            stream,
            shutdown: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    /// Handle for job mutations (`cron set-cron` etc.) while the engine runs.
    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }
}

#[async_trait]
impl Channel for CronChannel {
    fn name(&self) -> &str {
        "cron"
    }

    async fn start(&self) -> Result<(), ChannelError> {
        let mut task = self.task.lock().unwrap();
        if task.is_some() {
            return Ok(());
        }

        // A store that cannot be parsed is a bootstrap failure.
        self.scheduler
            .load()
            .map_err(|e| ChannelError::ConnectionFailed(e.to_string()))?;

        let (tx, rx) = watch::channel(false);
        *self.shutdown.lock().unwrap() = Some(tx);
        *task = Some(tokio::spawn(Arc::clone(&self.scheduler).run(rx)));
        Ok(())
    }

    async fn stop(&self) -> Result<(), ChannelError> {
        if let Some(tx) = self.shutdown.lock().unwrap().take() {
            let _ = tx.send(true);
        }
        let handle = self.task.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.stream.close();
        Ok(())
    }

    /// Replies never return through the scheduler.
    async fn send(&self, _resp: &Response) -> Result<(), ChannelError> {
        Ok(())
    }

    fn messages(&self) -> Option<mpsc::Receiver<Message>> {
        self.stream.take()
    }
}

/// Build the inbound message for one fire: a wake notice listing the job
/// config, a blank line, then the task body.
fn fire_message(job: &Job) -> Message {
    let mut metadata = HashMap::new();
    metadata.insert(meta::JOB_ID.to_string(), job.id.clone());
    metadata.insert(meta::TASK.to_string(), job.task.clone());
    metadata.insert(meta::SILENT.to_string(), job.silent.to_string());
    if let Some(agent) = &job.agent {
        metadata.insert(meta::AGENT.to_string(), agent.clone());
    }
    if let Some(target) = &job.report_to_session {
        metadata.insert(meta::REPORT_TO_SESSION.to_string(), target.clone());
    }

    Message {
        id: format!("cron-{}-{}", job.id, short_hex()),
        channel_id: format!("cron:{}", job.id),
        user_id: String::new(),
        username: String::new(),
        text: format!("{}\n\n{}", job.describe(), job.task),
        reply_to: None,
        metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobKind;
    use chrono::Utc;

    fn job() -> Job {
        Job {
            id: "daily".to_string(),
            kind: JobKind::Cron,
            expr: Some("*/1 * * * *".to_string()),
            at_time: None,
            task: "ping".to_string(),
            agent: Some("worker".to_string()),
            report_to_session: Some("main".to_string()),
            silent: false,
            enabled: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn fire_message_shape() {
        let msg = fire_message(&job());
        assert!(msg.id.starts_with("cron-daily-"));
        assert_eq!(msg.channel_id, "cron:daily");
        assert!(msg.text.starts_with("[Cron job fired]"));
        assert!(msg.text.ends_with("\n\nping"));
        assert_eq!(msg.meta(meta::JOB_ID), Some("daily"));
        assert_eq!(msg.meta(meta::AGENT), Some("worker"));
        assert_eq!(msg.meta(meta::REPORT_TO_SESSION), Some("main"));
        assert_eq!(msg.meta(meta::SILENT), Some("false"));
    }

    #[test]
    fn fire_ids_are_unique_per_fire() {
        let a = fire_message(&job());
        let b = fire_message(&job());
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn send_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let channel = CronChannel::new(dir.path().join("cron.jsonl"));
        channel
            .send(&Response::new("ignored", "nowhere"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn start_fails_on_corrupt_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cron.jsonl");
        std::fs::write(&path, "{bad\n").unwrap();
        let channel = CronChannel::new(&path);
        assert!(channel.start().await.is_err());
    }

    #[tokio::test]
    async fn stop_closes_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let channel = CronChannel::new(dir.path().join("cron.jsonl"));
        channel.start().await.unwrap();
        let mut rx = channel.messages().unwrap();
        channel.stop().await.unwrap();
        assert!(rx.recv().await.is_none());
    }
}
