use clap::{Parser, Subcommand};

mod cron_cmd;
mod oneshot;
mod serve;

#[derive(Parser)]
#[command(name = "courier", version, about = "Multi-channel conversational agent host")]
struct Cli {
    /// Path to courier.toml (defaults to ~/.courier/courier.toml).
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start channels and the dispatcher.
    Serve {
        /// Interactive terminal channel.
        #[arg(long)]
        cli: bool,
        /// Telegram long-poll channel.
        #[arg(long)]
        telegram: bool,
        /// Feishu webhook channel.
        #[arg(long)]
        feishu: bool,
        /// Browser WebSocket channel.
        #[arg(long)]
        web: bool,
        /// Every channel with configuration present.
        #[arg(long)]
        all: bool,
    },

    /// One-shot: send a message to the agent and print the reply.
    Agent {
        #[arg(short, long)]
        message: String,
    },

    /// Manage scheduled jobs.
    Cron {
        #[command(subcommand)]
        command: cron_cmd::CronCommand,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,hyper=warn,tower_http=warn,reqwest=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = courier_core::CourierConfig::load(cli.config.as_deref())
        .unwrap_or_else(|e| {
            tracing::warn!("config load failed ({e}), using defaults");
            courier_core::CourierConfig::default()
        });

    match cli.command {
        Command::Serve {
            cli,
            telegram,
            feishu,
            web,
            all,
        } => {
            serve::run(
                config,
                serve::ChannelSelection {
                    cli,
                    telegram,
                    feishu,
                    web,
                    all,
                },
            )
            .await
        }
        Command::Agent { message } => oneshot::run(config, &message).await,
        Command::Cron { command } => cron_cmd::run(config, command),
    }
}
