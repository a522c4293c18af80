//! Per-session serialized execution.
//!
//! Every session is an actor: a FIFO inbox plus one worker task, created
//! lazily on the first wake. Pushing a wake never blocks; the worker
//! consumes the inbox one wake at a time, so a session never has two
//! agent calls in flight. No ordering holds between sessions.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use courier_agent::{AgentRegistry, ContextBudget, GenerateReply};
use courier_sessions::{SessionStore, TranscriptEntry};

use crate::wake::WakeMessage;

/// How long `shutdown` waits for each worker to finish its current wake.
const DRAIN_WAIT_SECS: u64 = 10;

pub struct ThreadManager {
    shared: Arc<Shared>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

struct Shared {
    threads: DashMap<String, mpsc::UnboundedSender<WakeMessage>>,
    sessions: Arc<SessionStore>,
    registry: Arc<AgentRegistry>,
    provider: Arc<dyn GenerateReply>,
    budget: ContextBudget,
    cancel: CancellationToken,
}

impl ThreadManager {
    pub fn new(
        sessions: Arc<SessionStore>,
        registry: Arc<AgentRegistry>,
        provider: Arc<dyn GenerateReply>,
        budget: ContextBudget,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                threads: DashMap::new(),
                sessions,
                registry,
                provider,
                budget,
                cancel: CancellationToken::new(),
            }),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Enqueue one wake on the session's inbox, creating the thread on
    /// first use. Non-blocking.
    pub fn wake(&self, session_key: &str, wake: WakeMessage) {
        if self.shared.cancel.is_cancelled() {
            warn!(session = %session_key, "manager shut down, dropping wake");
            return;
        }

        let tx = self
            .shared
            .threads
            .entry(session_key.to_string())
            .or_insert_with(|| {
                debug!(session = %session_key, "spawning session thread");
                let (tx, rx) = mpsc::unbounded_channel();
                let handle = tokio::spawn(worker(
                    session_key.to_string(),
                    rx,
                    Arc::clone(&self.shared),
                ));
                self.tasks.lock().unwrap().push(handle);
                tx
            })
            .clone();

        if tx.send(wake).is_err() {
            warn!(session = %session_key, "session thread gone, dropping wake");
        }
    }

    /// Stop accepting wakes and wait (bounded) for in-flight work.
    pub async fn shutdown(&self) {
        self.shared.cancel.cancel();
        self.shared.threads.clear();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            if tokio::time::timeout(std::time::Duration::from_secs(DRAIN_WAIT_SECS), task)
                .await
                .is_err()
            {
                warn!("session thread did not drain in time");
            }
        }
        info!("thread manager drained");
    }
}

async fn worker(
    session_key: String,
    mut inbox: mpsc::UnboundedReceiver<WakeMessage>,
    shared: Arc<Shared>,
) {
    loop {
        let wake = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            wake = inbox.recv() => match wake {
                Some(wake) => wake,
                None => break,
            },
        };
        process_wake(&session_key, wake, &shared).await;
    }
    debug!(session = %session_key, "session thread exiting");
}

/// Run one wake to completion: resolve the agent, build the prompt
/// context, call the provider, persist both turns, deliver the reply.
async fn process_wake(session_key: &str, wake: WakeMessage, shared: &Shared) {
    debug!(
        session = %session_key,
        source = %wake.source,
        agent = %wake.agent_name,
        "processing wake"
    );

    let template = shared.registry.resolve(&wake.agent_name);
    let mut system = template.render(&wake.vars);
    system.push_str(&format!(
        "\n\nYour reply will be delivered to: {}.",
        wake.sink.label()
    ));

    // The on-disk transcript stays complete; trimming only shapes what this
    // call sends to the provider.
    let mut transcript = match shared.sessions.history(session_key) {
        Ok(messages) => messages,
        Err(e) => {
            error!(session = %session_key, error = %e, "transcript load failed");
            Vec::new()
        }
    };

    let used = shared.budget.estimate(&transcript, &wake.message);
    if shared.budget.should_warn(used) {
        warn!(session = %session_key, used, window = shared.budget.window, "context window nearly full");
        transcript.push(TranscriptEntry::system(
            "Note: the conversation is close to its context limit; older turns may be dropped.",
        ));
    }
    shared.budget.trim(&mut transcript, &wake.message);

    let reply = match shared
        .provider
        .generate_reply(&system, &transcript, &wake.message)
        .await
    {
        Ok(reply) => reply,
        Err(e) => {
            error!(session = %session_key, error = %e, "agent call failed");
            // Surface the failure to the user; the wake is never re-enqueued.
            if let Err(e) = wake.sink.deliver(&format!("Agent error: {e}")).await {
                error!(session = %session_key, error = %e, "error delivery failed");
            }
            return;
        }
    };

    if let Err(e) = shared.sessions.append(
        session_key,
        &[
            TranscriptEntry::user(&wake.message),
            TranscriptEntry::assistant(&reply.text),
        ],
    ) {
        error!(session = %session_key, error = %e, "transcript append failed");
    }

    if let Err(e) = wake.sink.deliver(&reply.text).await {
        error!(session = %session_key, error = %e, "sink delivery failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wake::Sink;
    use async_trait::async_trait;
    use courier_agent::{ProviderError, ProviderReply};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Provider that records call order and the peak number of concurrent
    /// calls.
    struct TrackingProvider {
        current: AtomicUsize,
        peak: AtomicUsize,
        calls: Mutex<Vec<String>>,
    }

    impl TrackingProvider {
        fn new() -> Self {
            Self {
                current: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GenerateReply for TrackingProvider {
        fn name(&self) -> &str {
            "tracking"
        }

        async fn generate_reply(
            &self,
            _system: &str,
            _transcript: &[TranscriptEntry],
            user: &str,
        ) -> Result<ProviderReply, ProviderError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            self.calls.lock().unwrap().push(user.to_string());
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(ProviderReply::text_only(format!("re: {user}")))
        }
    }

    fn manager_with(provider: Arc<TrackingProvider>) -> (tempfile::TempDir, ThreadManager) {
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::new(dir.path().join("sessions")));
        let manager = ThreadManager::new(
            sessions,
            Arc::new(AgentRegistry::default()),
            provider,
            ContextBudget::new(64_000, 0.8),
        );
        (dir, manager)
    }

    fn wake_with_text(text: &str) -> WakeMessage {
        WakeMessage {
            source: "test".to_string(),
            message: text.to_string(),
            sink: Sink::noop("test"),
            agent_name: String::new(),
            vars: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn wakes_in_one_session_are_serialized_in_order() {
        let provider = Arc::new(TrackingProvider::new());
        let (_dir, manager) = manager_with(Arc::clone(&provider));

        for i in 0..5 {
            manager.wake("main", wake_with_text(&format!("m{i}")));
        }
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        assert_eq!(provider.peak.load(Ordering::SeqCst), 1, "session ran concurrently");
        let calls = provider.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["m0", "m1", "m2", "m3", "m4"]);
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn different_sessions_run_concurrently() {
        let provider = Arc::new(TrackingProvider::new());
        let (_dir, manager) = manager_with(Arc::clone(&provider));

        for i in 0..4 {
            manager.wake(&format!("s{i}"), wake_with_text("go"));
        }
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;

        assert!(provider.peak.load(Ordering::SeqCst) > 1, "sessions never overlapped");
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn reply_is_delivered_through_the_sink_and_persisted() {
        let provider = Arc::new(TrackingProvider::new());
        let dir = tempfile::tempdir().unwrap();
        let sessions = Arc::new(SessionStore::new(dir.path().join("sessions")));
        let manager = ThreadManager::new(
            Arc::clone(&sessions),
            Arc::new(AgentRegistry::default()),
            Arc::clone(&provider) as Arc<dyn GenerateReply>,
            ContextBudget::new(64_000, 0.8),
        );

        let delivered = Arc::new(Mutex::new(Vec::<String>::new()));
        let delivered2 = Arc::clone(&delivered);
        let sink = Sink::new("test", move |text| {
            let delivered = Arc::clone(&delivered2);
            Box::pin(async move {
                delivered.lock().unwrap().push(text);
                Ok(())
            })
        });

        manager.wake(
            "main",
            WakeMessage {
                source: "cli".to_string(),
                message: "hello".to_string(),
                sink,
                agent_name: String::new(),
                vars: HashMap::new(),
            },
        );
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;

        assert_eq!(delivered.lock().unwrap().as_slice(), ["re: hello"]);
        let transcript = sessions.history("main").unwrap();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[0].content, "hello");
        assert_eq!(transcript[1].content, "re: hello");
        manager.shutdown().await;
    }

    #[tokio::test]
    async fn wake_after_shutdown_is_dropped() {
        let provider = Arc::new(TrackingProvider::new());
        let (_dir, manager) = manager_with(Arc::clone(&provider));
        manager.shutdown().await;
        manager.wake("main", wake_with_text("late"));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(provider.calls.lock().unwrap().is_empty());
    }
}
