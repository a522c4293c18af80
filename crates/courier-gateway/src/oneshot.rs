//! `courier agent -m <text>` — one wake on the `"agent"` session, reply
//! printed to stdout.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;

use courier_agent::{AgentRegistry, ContextBudget};
use courier_core::CourierConfig;
use courier_runtime::{Sink, ThreadManager, WakeMessage};
use courier_sessions::SessionStore;

pub async fn run(config: CourierConfig, message: &str) -> anyhow::Result<()> {
    let sessions = Arc::new(SessionStore::new(config.workspace.sessions_root()));
    let mut registry = AgentRegistry::new(config.agent.default_agent.clone());
    registry.extend_from_config(&config.agent.templates);

    let threads = ThreadManager::new(
        sessions,
        Arc::new(registry),
        crate::serve::build_provider(&config),
        ContextBudget::new(config.agent.context_window, config.agent.warn_ratio),
    );

    let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(1);
    let sink = Sink::new("the local terminal (one-shot)", move |text| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(text).await;
            Ok(())
        })
    });

    threads.wake(
        "agent",
        WakeMessage {
            source: "cli".to_string(),
            message: message.to_string(),
            sink,
            agent_name: String::new(),
            vars: HashMap::new(),
        },
    );

    let reply = rx.recv().await.context("agent produced no reply")?;
    println!("{reply}");
    threads.shutdown().await;
    Ok(())
}
