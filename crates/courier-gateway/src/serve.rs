//! `courier serve` — wire the channels, dispatcher, threads, and scheduler
//! together and run until shutdown.

use std::sync::Arc;

use anyhow::{bail, Context};
use tracing::{error, info, warn};

use courier_agent::{AgentRegistry, AnthropicProvider, ContextBudget, EchoProvider, GenerateReply};
use courier_channels::{Channel, ChannelManager, CliChannel};
use courier_core::CourierConfig;
use courier_feishu::FeishuChannel;
use courier_runtime::{DispatchConfig, Dispatcher, ThreadManager};
use courier_scheduler::CronChannel;
use courier_sessions::SessionStore;
use courier_telegram::TelegramChannel;
use courier_web::WebChannel;

pub struct ChannelSelection {
    pub cli: bool,
    pub telegram: bool,
    pub feishu: bool,
    pub web: bool,
    pub all: bool,
}

impl ChannelSelection {
    /// No explicit flags means "whatever the config enables".
    fn resolve(&self, config: &CourierConfig) -> (bool, bool, bool, bool) {
        let any_flag = self.cli || self.telegram || self.feishu || self.web;
        if self.all {
            (
                true,
                config.channels.telegram.is_some(),
                config.channels.feishu.is_some(),
                true,
            )
        } else if any_flag {
            (self.cli, self.telegram, self.feishu, self.web)
        } else {
            (
                config.channels.cli.enabled,
                config.channels.telegram.is_some(),
                config.channels.feishu.is_some(),
                config.channels.web.is_some(),
            )
        }
    }
}

pub async fn run(config: CourierConfig, selection: ChannelSelection) -> anyhow::Result<()> {
    let (want_cli, want_telegram, want_feishu, want_web) = selection.resolve(&config);

    let sessions = Arc::new(SessionStore::new(config.workspace.sessions_root()));
    let provider = build_provider(&config);
    let mut registry = AgentRegistry::new(config.agent.default_agent.clone());
    registry.extend_from_config(&config.agent.templates);

    let threads = Arc::new(ThreadManager::new(
        Arc::clone(&sessions),
        Arc::new(registry),
        provider,
        ContextBudget::new(config.agent.context_window, config.agent.warn_ratio),
    ));

    // ── Channels ──────────────────────────────────────────────────────────
    let mut manager = ChannelManager::new();

    let cli_channel = if want_cli {
        let channel = Arc::new(CliChannel::new());
        manager.register(Arc::clone(&channel) as Arc<dyn Channel>);
        Some(channel)
    } else {
        None
    };

    if want_telegram {
        let Some(tg) = config.channels.telegram.clone() else {
            bail!("--telegram requested but [channels.telegram] is not configured");
        };
        if tg.bot_token.is_empty() {
            bail!("Telegram bot token missing (set TELEGRAM_BOT_TOKEN or channels.telegram.bot_token)");
        }
        manager.register(Arc::new(TelegramChannel::new(tg)));
    }

    if want_feishu {
        let Some(fs) = config.channels.feishu.clone() else {
            bail!("--feishu requested but [channels.feishu] is not configured");
        };
        if fs.app_id.is_empty() || fs.app_secret.is_empty() {
            bail!("Feishu app credentials missing (set FEISHU_APP_ID / FEISHU_APP_SECRET)");
        }
        manager.register(Arc::new(FeishuChannel::new(fs)));
    }

    if want_web {
        let web = config.channels.web.clone().unwrap_or_default();
        manager.register(Arc::new(WebChannel::new(
            web,
            config.workspace.sessions_root(),
        )));
    }

    // The scheduler always runs with serve.
    let cron = Arc::new(CronChannel::new(config.workspace.cron_store_path()));
    manager.register(Arc::clone(&cron) as Arc<dyn Channel>);

    let manager = Arc::new(manager);
    let dispatcher = Dispatcher::new(
        Arc::clone(&manager),
        Arc::clone(&threads),
        DispatchConfig {
            telegram_admin_user_id: config
                .channels
                .telegram
                .as_ref()
                .and_then(|t| t.admin_user_id.clone()),
            feishu_admin_open_id: config
                .channels
                .feishu
                .as_ref()
                .and_then(|f| f.admin_open_id.clone()),
            user_agents: config.user_agents.clone(),
        },
    );

    // ── Start ─────────────────────────────────────────────────────────────
    manager
        .start_all()
        .await
        .context("channel bootstrap failed")?;
    dispatcher.run();
    info!("courier serving");

    // ── Wait for shutdown ─────────────────────────────────────────────────
    let cli_closed = cli_channel.as_ref().map(|c| c.closed());
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
        _ = async {
            match cli_closed {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        } => info!("cli closed, shutting down"),
    }

    // ── Stop: scheduler → dispatcher → channels → threads ─────────────────
    if let Err(e) = cron.stop().await {
        warn!(error = %e, "scheduler stop failed");
    }
    dispatcher.stop().await;
    for (name, e) in manager.stop_all().await {
        error!(channel = %name, error = %e, "channel stop failed");
    }
    threads.shutdown().await;

    info!("shutdown complete");
    Ok(())
}

pub(crate) fn build_provider(config: &CourierConfig) -> Arc<dyn GenerateReply> {
    match config.agent.api_key.clone() {
        Some(key) if !key.is_empty() => Arc::new(AnthropicProvider::new(
            key,
            config.agent.model.clone(),
            None,
        )),
        _ => {
            warn!("no API key configured, using the echo provider");
            Arc::new(EchoProvider)
        }
    }
}
