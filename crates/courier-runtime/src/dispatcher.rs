//! The stateless router from channel messages to session wakes.
//!
//! One consumer task per registered channel reads its message stream until
//! cancellation or closure. Every inbound message goes through the same
//! five steps: route to a session key, build the reply sink, resolve the
//! agent, preprocess the text, enqueue the wake. A processing error is
//! logged and never takes the consumer down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use courier_channels::types::{meta, Message};
use courier_channels::{Channel, ChannelManager};
use courier_core::types::SessionKey;

use crate::threads::ThreadManager;
use crate::wake::{Sink, WakeMessage};

/// The routing knobs the dispatcher reads from config at startup.
#[derive(Debug, Clone, Default)]
pub struct DispatchConfig {
    /// Telegram user id whose messages land in the `main` session.
    pub telegram_admin_user_id: Option<String>,
    /// Feishu open-id whose messages land in the `main` session.
    pub feishu_admin_open_id: Option<String>,
    /// Per-user agent bindings: user id → agent template name.
    pub user_agents: HashMap<String, String>,
}

pub struct Dispatcher {
    manager: Arc<ChannelManager>,
    threads: Arc<ThreadManager>,
    config: DispatchConfig,
    cancel: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Dispatcher {
    pub fn new(
        manager: Arc<ChannelManager>,
        threads: Arc<ThreadManager>,
        config: DispatchConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            threads,
            config,
            cancel: CancellationToken::new(),
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Take every channel's message stream and spawn its consumer task.
    /// Call after the channels have started.
    pub fn run(self: &Arc<Self>) {
        for channel in self.manager.iter() {
            let name = channel.name().to_string();
            let Some(mut rx) = channel.messages() else {
                warn!(channel = %name, "message stream already taken, skipping");
                continue;
            };
            let this = Arc::clone(self);
            let handle = tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = this.cancel.cancelled() => break,
                        msg = rx.recv() => match msg {
                            Some(msg) => this.handle(&name, msg),
                            None => {
                                debug!(channel = %name, "message stream closed");
                                break;
                            }
                        },
                    }
                }
            });
            self.tasks.lock().unwrap().push(handle);
        }
        info!("dispatcher running");
    }

    /// Stop the consumer tasks. Channel streams are closed separately by
    /// the channels themselves.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().unwrap().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
    }

    /// Route one message into its session wake.
    pub fn handle(&self, channel_name: &str, msg: Message) {
        let session_key = self.route(&msg);
        let sink = self.build_sink(channel_name, &msg);
        let (agent_name, vars) = self.resolve_agent(&msg);
        let text = preprocess(&msg);

        debug!(
            channel = %channel_name,
            session = %session_key,
            id = %msg.id,
            "dispatching message"
        );

        self.threads.wake(
            session_key.as_str(),
            WakeMessage {
                source: channel_name.to_string(),
                message: text,
                sink,
                agent_name,
                vars,
            },
        );
    }

    /// Deterministic mapping from message origin to session key — except
    /// `cron:*`, which gets a fresh session per fire on purpose.
    pub fn route(&self, msg: &Message) -> SessionKey {
        let channel_id = msg.channel_id.as_str();

        if channel_id == "cli:local" || channel_id.starts_with("web:") {
            return SessionKey::main();
        }
        if let Some(job_id) = channel_id.strip_prefix("cron:") {
            return SessionKey::for_cron_fire(job_id, Utc::now());
        }
        if channel_id.starts_with("telegram:") {
            return admin_or_per_user(
                "telegram",
                msg,
                self.config.telegram_admin_user_id.as_deref(),
            );
        }
        if channel_id.starts_with("feishu:") {
            return admin_or_per_user("feishu", msg, self.config.feishu_admin_open_id.as_deref());
        }

        if msg.user_id.is_empty() {
            SessionKey::from(channel_id)
        } else {
            SessionKey::from(format!("{channel_id}:{}", msg.user_id))
        }
    }

    /// Build the per-wake reply path.
    ///
    /// Non-cron messages answer through the origin channel. A cron fire
    /// either discards its result (`silent`) or wakes the configured
    /// report-to session with a completion notice.
    pub fn build_sink(&self, channel_name: &str, msg: &Message) -> Sink {
        if channel_name == "cron" {
            return self.build_cron_sink(msg);
        }

        let reply_to = msg
            .meta(meta::CHAT_ID)
            .map(str::to_string)
            .or_else(|| msg.reply_to.clone())
            .unwrap_or_default();
        let label = if reply_to.is_empty() {
            format!("the {channel_name} channel")
        } else {
            format!("the {channel_name} channel ({reply_to})")
        };

        let manager = Arc::clone(&self.manager);
        let channel_name = channel_name.to_string();
        Sink::new(label, move |text| {
            let manager = Arc::clone(&manager);
            let channel_name = channel_name.clone();
            let reply_to = reply_to.clone();
            Box::pin(async move { manager.send_to(&channel_name, &text, &reply_to).await })
        })
    }

    fn build_cron_sink(&self, msg: &Message) -> Sink {
        let job_id = msg.meta(meta::JOB_ID).unwrap_or_default().to_string();

        if msg.meta(meta::SILENT) == Some("true") {
            return Sink::noop(format!("nowhere (silent cron job {job_id})"));
        }

        let Some(target) = msg.meta(meta::REPORT_TO_SESSION).map(str::to_string) else {
            warn!(job_id = %job_id, "non-silent cron fire without report_to_session");
            return Sink::noop(format!("nowhere (cron job {job_id} has no report session)"));
        };

        // The completion notice becomes a brand-new wake on the target
        // session; its own sink broadcasts to the interactive channels so a
        // human actually sees the result.
        let threads = Arc::clone(&self.threads);
        let manager = Arc::clone(&self.manager);
        let label = format!("session '{target}' (cron job {job_id} result)");
        Sink::new(label, move |text| {
            let threads = Arc::clone(&threads);
            let manager = Arc::clone(&manager);
            let target = target.clone();
            let job_id = job_id.clone();
            Box::pin(async move {
                let message =
                    format!("[Cron job completed]\n- id: {job_id}\n- result:\n{text}");
                threads.wake(
                    &target,
                    WakeMessage {
                        source: "cron_finished".to_string(),
                        message,
                        sink: session_broadcast_sink(manager, target.clone()),
                        agent_name: String::new(),
                        vars: HashMap::new(),
                    },
                );
                Ok(())
            })
        })
    }

    /// `metadata.agent`, then the per-user map, then the default agent.
    /// A `task` metadata entry becomes the `TASK` template variable.
    pub fn resolve_agent(&self, msg: &Message) -> (String, HashMap<String, String>) {
        let agent_name = msg
            .meta(meta::AGENT)
            .map(str::to_string)
            .or_else(|| self.config.user_agents.get(&msg.user_id).cloned())
            .unwrap_or_default();

        let mut vars = HashMap::new();
        if let Some(task) = msg.meta(meta::TASK) {
            vars.insert("TASK".to_string(), task.to_string());
        }
        (agent_name, vars)
    }
}

/// Admin users own the `main` session; everyone else gets a per-user one.
/// With no user id at all, the raw channel id is the session.
fn admin_or_per_user(channel: &str, msg: &Message, admin: Option<&str>) -> SessionKey {
    if let Some(admin) = admin {
        if !msg.user_id.is_empty() && msg.user_id == admin {
            return SessionKey::main();
        }
    }
    if msg.user_id.is_empty() {
        SessionKey::from(msg.channel_id.as_str())
    } else {
        SessionKey::for_channel_user(channel, &msg.user_id)
    }
}

/// Prepend the media summary, when present, to the message text.
fn preprocess(msg: &Message) -> String {
    match msg.meta(meta::MEDIA_SUMMARY) {
        Some(summary) => format!("{summary}\n\n{}", msg.text),
        None => msg.text.clone(),
    }
}

/// Reply path for wakes that target a session rather than a transport:
/// deliver out-of-band to whichever interactive channels are up.
fn session_broadcast_sink(manager: Arc<ChannelManager>, session: String) -> Sink {
    let label = format!("the user's interactive session '{session}'");
    Sink::new(label, move |text| {
        let manager = Arc::clone(&manager);
        let session = session.clone();
        Box::pin(async move {
            let mut delivered = false;
            for name in ["web", "cli"] {
                if manager.get(name).is_none() {
                    continue;
                }
                match manager.send_to(name, &text, &session).await {
                    Ok(()) => delivered = true,
                    Err(e) => warn!(channel = name, error = %e, "session broadcast failed"),
                }
            }
            if !delivered {
                warn!(session = %session, "no interactive channel accepted the reply");
            }
            Ok(())
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use courier_agent::{AgentRegistry, ContextBudget, GenerateReply, ProviderError, ProviderReply};
    use courier_channels::types::Response;
    use courier_channels::{ChannelError, MessageStream};
    use courier_sessions::{SessionStore, TranscriptEntry};
    use tokio::sync::mpsc;

    struct CaptureProvider {
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl GenerateReply for CaptureProvider {
        fn name(&self) -> &str {
            "capture"
        }

        async fn generate_reply(
            &self,
            _system: &str,
            _transcript: &[TranscriptEntry],
            user: &str,
        ) -> Result<ProviderReply, ProviderError> {
            self.seen.lock().unwrap().push(user.to_string());
            Ok(ProviderReply::text_only("pong"))
        }
    }

    struct SinkChannel {
        name: String,
        stream: MessageStream,
        sent: Arc<Mutex<Vec<Response>>>,
    }

    #[async_trait]
    impl Channel for SinkChannel {
        fn name(&self) -> &str {
            &self.name
        }
        async fn start(&self) -> Result<(), ChannelError> {
            Ok(())
        }
        async fn stop(&self) -> Result<(), ChannelError> {
            self.stream.close();
            Ok(())
        }
        async fn send(&self, resp: &Response) -> Result<(), ChannelError> {
            self.sent.lock().unwrap().push(resp.clone());
            Ok(())
        }
        fn messages(&self) -> Option<mpsc::Receiver<courier_channels::Message>> {
            self.stream.take()
        }
    }

    fn msg(channel_id: &str, user_id: &str) -> Message {
        Message {
            id: "m1".to_string(),
            channel_id: channel_id.to_string(),
            user_id: user_id.to_string(),
            username: String::new(),
            text: "hi".to_string(),
            reply_to: None,
            metadata: HashMap::new(),
        }
    }

    fn dispatcher() -> (Arc<Dispatcher>, Arc<Mutex<Vec<Response>>>, tempfile::TempDir) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut manager = ChannelManager::new();
        manager.register(Arc::new(SinkChannel {
            name: "telegram".to_string(),
            stream: MessageStream::new(4),
            sent: Arc::clone(&sent),
        }));
        let manager = Arc::new(manager);

        let dir = tempfile::tempdir().unwrap();
        let threads = Arc::new(ThreadManager::new(
            Arc::new(SessionStore::new(dir.path().join("sessions"))),
            Arc::new(AgentRegistry::default()),
            Arc::new(CaptureProvider {
                seen: Mutex::new(Vec::new()),
            }),
            ContextBudget::new(64_000, 0.8),
        ));
        let config = DispatchConfig {
            telegram_admin_user_id: Some("42".to_string()),
            feishu_admin_open_id: Some("ou_admin".to_string()),
            user_agents: HashMap::from([("7".to_string(), "researcher".to_string())]),
        };
        (Dispatcher::new(manager, threads, config), sent, dir)
    }

    #[test]
    fn route_cli_and_web_to_main() {
        let (d, _, _dir) = dispatcher();
        assert_eq!(d.route(&msg("cli:local", "local")).as_str(), "main");
        assert_eq!(d.route(&msg("web:main", "web")).as_str(), "main");
        assert_eq!(d.route(&msg("web:work", "web")).as_str(), "main");
    }

    #[test]
    fn route_telegram_admin_to_main_others_per_user() {
        let (d, _, _dir) = dispatcher();
        assert_eq!(d.route(&msg("telegram:100", "42")).as_str(), "main");
        assert_eq!(d.route(&msg("telegram:100", "7")).as_str(), "telegram:7");
        assert_eq!(d.route(&msg("telegram:100", "")).as_str(), "telegram:100");
    }

    #[test]
    fn route_feishu_mirrors_telegram() {
        let (d, _, _dir) = dispatcher();
        assert_eq!(d.route(&msg("feishu:oc_1", "ou_admin")).as_str(), "main");
        assert_eq!(d.route(&msg("feishu:oc_1", "ou_x")).as_str(), "feishu:ou_x");
    }

    #[test]
    fn route_cron_is_fresh_per_fire() {
        let (d, _, _dir) = dispatcher();
        let a = d.route(&msg("cron:daily", ""));
        let b = d.route(&msg("cron:daily", ""));
        assert!(a.as_str().starts_with("cron:daily:"));
        assert_ne!(a, b);
    }

    #[test]
    fn route_unknown_channel_uses_channel_and_user() {
        let (d, _, _dir) = dispatcher();
        assert_eq!(d.route(&msg("irc:#ops", "nick")).as_str(), "irc:#ops:nick");
        assert_eq!(d.route(&msg("irc:#ops", "")).as_str(), "irc:#ops");
    }

    #[test]
    fn route_is_deterministic() {
        let (d, _, _dir) = dispatcher();
        let m = msg("telegram:100", "7");
        assert_eq!(d.route(&m), d.route(&m));
    }

    #[test]
    fn resolve_agent_prefers_metadata_then_user_map() {
        let (d, _, _dir) = dispatcher();
        let mut m = msg("telegram:100", "7");
        assert_eq!(d.resolve_agent(&m).0, "researcher");
        m.metadata.insert(meta::AGENT.to_string(), "worker".to_string());
        assert_eq!(d.resolve_agent(&m).0, "worker");

        let stranger = msg("telegram:100", "9");
        assert_eq!(d.resolve_agent(&stranger).0, "");
    }

    #[test]
    fn resolve_agent_extracts_task_var() {
        let (d, _, _dir) = dispatcher();
        let mut m = msg("cron:j", "");
        m.metadata.insert(meta::TASK.to_string(), "ping".to_string());
        let (_, vars) = d.resolve_agent(&m);
        assert_eq!(vars.get("TASK").map(String::as_str), Some("ping"));
    }

    #[test]
    fn preprocess_prepends_media_summary() {
        let mut m = msg("telegram:100", "7");
        m.metadata.insert(
            meta::MEDIA_SUMMARY.to_string(),
            "Attached media: kind=photo".to_string(),
        );
        assert_eq!(preprocess(&m), "Attached media: kind=photo\n\nhi");
        let plain = msg("telegram:100", "7");
        assert_eq!(preprocess(&plain), "hi");
    }

    #[tokio::test]
    async fn channel_sink_replies_through_the_manager() {
        let (d, sent, _dir) = dispatcher();
        let mut m = msg("telegram:100", "42");
        m.metadata.insert(meta::CHAT_ID.to_string(), "100".to_string());
        let sink = d.build_sink("telegram", &m);
        sink.deliver("hi!").await.unwrap();

        let sent = sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].text, "hi!");
        assert_eq!(sent[0].reply_to, "100");
    }

    #[tokio::test]
    async fn silent_cron_sink_discards() {
        let (d, sent, _dir) = dispatcher();
        let mut m = msg("cron:j", "");
        m.metadata.insert(meta::JOB_ID.to_string(), "j".to_string());
        m.metadata.insert(meta::SILENT.to_string(), "true".to_string());
        let sink = d.build_sink("cron", &m);
        sink.deliver("result").await.unwrap();
        assert!(sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn cron_sink_enqueues_completion_wake_on_target_session() {
        // Full path: a cron fire's reply becomes a new wake on "main",
        // which the capture provider then sees as user text.
        let sent = Arc::new(Mutex::new(Vec::new()));
        let mut manager = ChannelManager::new();
        manager.register(Arc::new(SinkChannel {
            name: "cli".to_string(),
            stream: MessageStream::new(4),
            sent: Arc::clone(&sent),
        }));
        let manager = Arc::new(manager);

        let dir = tempfile::tempdir().unwrap();
        let provider = Arc::new(CaptureProvider {
            seen: Mutex::new(Vec::new()),
        });
        let threads = Arc::new(ThreadManager::new(
            Arc::new(SessionStore::new(dir.path().join("sessions"))),
            Arc::new(AgentRegistry::default()),
            Arc::clone(&provider) as Arc<dyn GenerateReply>,
            ContextBudget::new(64_000, 0.8),
        ));
        let d = Dispatcher::new(manager, threads, DispatchConfig::default());

        let mut m = msg("cron:daily", "");
        m.metadata.insert(meta::JOB_ID.to_string(), "daily".to_string());
        m.metadata.insert(meta::SILENT.to_string(), "false".to_string());
        m.metadata
            .insert(meta::REPORT_TO_SESSION.to_string(), "main".to_string());

        let sink = d.build_sink("cron", &m);
        sink.deliver("pong").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(150)).await;

        let seen = provider.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], "[Cron job completed]\n- id: daily\n- result:\npong");
        // The completion wake's own reply went out-of-band to the CLI.
        assert_eq!(sent.lock().unwrap().len(), 1);
    }
}
