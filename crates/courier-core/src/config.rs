use std::collections::HashMap;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

/// Default bind address for HTTP-serving channels.
pub const DEFAULT_BIND: &str = "127.0.0.1";
/// Default port for the web channel (WebSocket + static UI).
pub const DEFAULT_WEB_PORT: u16 = 18710;
/// Default port for the Feishu webhook listener.
pub const DEFAULT_FEISHU_PORT: u16 = 18711;

/// Top-level config (courier.toml + COURIER_* env overrides).
///
/// Read-only after startup — no component mutates config once workers launch.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CourierConfig {
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub agent: AgentConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    /// Per-user agent bindings: user id → agent template name.
    /// Consulted by the dispatcher when a message carries no `agent` metadata.
    #[serde(default)]
    pub user_agents: HashMap<String, String>,
}

/// Where persistent state lives (job store, session transcripts, logs).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "default_workspace_dir")]
    pub dir: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: default_workspace_dir(),
        }
    }
}

impl WorkspaceConfig {
    /// Path to the durable cron job store inside the workspace.
    pub fn cron_store_path(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.dir).join("cron.jsonl")
    }

    /// Root directory for per-session transcripts.
    pub fn sessions_root(&self) -> std::path::PathBuf {
        std::path::Path::new(&self.dir).join("sessions")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Template used when a wake names no agent. "soul" is built in.
    #[serde(default = "default_agent")]
    pub default_agent: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// Context window budget in estimated tokens.
    #[serde(default = "default_context_window")]
    pub context_window: usize,
    /// Fraction of the window at which a soft warning is injected.
    #[serde(default = "default_warn_ratio")]
    pub warn_ratio: f32,
    /// Anthropic API key. Falls back to ANTHROPIC_API_KEY; when neither is
    /// set the echo provider is used so `courier agent -m` still works.
    pub api_key: Option<String>,
    /// Extra agent templates: name → system prompt.
    #[serde(default)]
    pub templates: HashMap<String, String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_agent: default_agent(),
            model: default_model(),
            context_window: default_context_window(),
            warn_ratio: default_warn_ratio(),
            api_key: None,
            templates: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChannelsConfig {
    #[serde(default)]
    pub cli: CliConfig,
    pub telegram: Option<TelegramConfig>,
    pub feishu: Option<FeishuConfig>,
    pub web: Option<WebConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CliConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot API token. Falls back to the TELEGRAM_BOT_TOKEN env var.
    #[serde(default)]
    pub bot_token: String,
    /// Chat ids and user ids permitted to talk to the bot.
    /// Empty means every sender is accepted.
    #[serde(default)]
    pub allow_from: Vec<String>,
    /// Messages from this user id route to the "main" session.
    pub admin_user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeishuConfig {
    /// App id. Falls back to the FEISHU_APP_ID env var.
    #[serde(default)]
    pub app_id: String,
    /// App secret. Falls back to the FEISHU_APP_SECRET env var.
    #[serde(default)]
    pub app_secret: String,
    /// Event-subscription verification token. When set, mismatching
    /// url_verification requests are rejected with 403.
    pub verification_token: Option<String>,
    /// AES encrypt key for encrypted event envelopes.
    pub encrypt_key: Option<String>,
    /// Sender open-ids permitted to talk to the bot. Empty accepts everyone.
    #[serde(default)]
    pub allow_open_ids: Vec<String>,
    /// Messages from this open-id route to the "main" session.
    pub admin_open_id: Option<String>,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_feishu_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_web_port")]
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_web_port(),
        }
    }
}

impl CourierConfig {
    /// Load config from a TOML file with COURIER_* env var overrides.
    ///
    /// Checks in order:
    ///   1. Explicit path argument
    ///   2. COURIER_CONFIG env var
    ///   3. ~/.courier/courier.toml
    ///
    /// Secrets honor their conventional env vars (TELEGRAM_BOT_TOKEN,
    /// FEISHU_APP_ID, FEISHU_APP_SECRET, ANTHROPIC_API_KEY) as fallbacks
    /// when the corresponding config field is empty.
    pub fn load(config_path: Option<&str>) -> crate::error::Result<Self> {
        let path = config_path
            .map(String::from)
            .or_else(|| std::env::var("COURIER_CONFIG").ok())
            .unwrap_or_else(default_config_path);

        let mut config: CourierConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("COURIER_").split("_"))
            .extract()
            .map_err(|e| crate::error::CourierError::Config(e.to_string()))?;

        config.apply_env_fallbacks();
        Ok(config)
    }

    fn apply_env_fallbacks(&mut self) {
        if let Some(tg) = self.channels.telegram.as_mut() {
            if tg.bot_token.is_empty() {
                if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
                    tg.bot_token = token;
                }
            }
        }
        if let Some(fs) = self.channels.feishu.as_mut() {
            if fs.app_id.is_empty() {
                if let Ok(id) = std::env::var("FEISHU_APP_ID") {
                    fs.app_id = id;
                }
            }
            if fs.app_secret.is_empty() {
                if let Ok(secret) = std::env::var("FEISHU_APP_SECRET") {
                    fs.app_secret = secret;
                }
            }
        }
        if self.agent.api_key.is_none() {
            if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
                self.agent.api_key = Some(key);
            }
        }
    }
}

fn default_workspace_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.courier", home)
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{}/.courier/courier.toml", home)
}

fn default_agent() -> String {
    "soul".to_string()
}

fn default_model() -> String {
    "claude-sonnet-4-5".to_string()
}

fn default_context_window() -> usize {
    64_000
}

fn default_warn_ratio() -> f32 {
    0.8
}

fn default_bind() -> String {
    DEFAULT_BIND.to_string()
}

fn default_web_port() -> u16 {
    DEFAULT_WEB_PORT
}

fn default_feishu_port() -> u16 {
    DEFAULT_FEISHU_PORT
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = CourierConfig::default();
        assert_eq!(cfg.agent.default_agent, "soul");
        assert!((cfg.agent.warn_ratio - 0.8).abs() < f32::EPSILON);
        assert!(cfg.channels.telegram.is_none());
        assert!(cfg.workspace.cron_store_path().ends_with("cron.jsonl"));
    }

    #[test]
    fn workspace_paths_derive_from_dir() {
        let ws = WorkspaceConfig {
            dir: "/tmp/courier-test".to_string(),
        };
        assert_eq!(
            ws.sessions_root(),
            std::path::PathBuf::from("/tmp/courier-test/sessions")
        );
    }
}
