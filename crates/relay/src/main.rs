use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use relay_claude_cli::ClaudeCliClient;
use relay_core::{
    config::Config,
    groups::GroupRegistry,
    messaging::port::Channel,
    model::types::{ClaudeCliConfig, PermissionMode},
    ports::{NoopTranscriber, Transcriber},
    storage::GroupStorage,
};
use relay_openai::{OpenAiClient, OpenAiTranscriber};
use relay_slack::{SlackChannel, SlackConfig, SlackWebClient};
use relay_telegram::{TelegramChannel, TelegramConfig};

mod host;
mod orchestrator;

use host::Host;
use orchestrator::Orchestrator;

const REGISTRY_RELOAD_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = Config::load()?;
    relay_core::logging::init("relay")?;

    let registry = Arc::new(
        GroupRegistry::load(&cfg.groups_file)
            .with_context(|| format!("loading {}", cfg.groups_file.display()))?,
    );

    let (tx, mut rx) = mpsc::unbounded_channel();
    let host = Arc::new(Host::new(registry.clone(), tx));

    let transcriber: Arc<dyn Transcriber> = match &cfg.openai_api_key {
        Some(key) => Arc::new(OpenAiTranscriber::new(OpenAiClient::new(key.clone())?)),
        None => Arc::new(NoopTranscriber),
    };
    let storage = GroupStorage::new(cfg.ipc_dir());

    let mut channels: Vec<Arc<dyn Channel>> = Vec::new();
    if let (Some(bot_token), Some(app_token)) = (&cfg.slack_bot_token, &cfg.slack_app_token) {
        channels.push(Arc::new(SlackChannel::new(
            SlackConfig::from_config(&cfg),
            Arc::new(SlackWebClient::new(
                bot_token.clone(),
                app_token.clone(),
                cfg.request_timeout,
            )?),
            host.clone(),
            transcriber.clone(),
            storage.clone(),
        )));
    }
    if let Some(token) = &cfg.telegram_bot_token {
        channels.push(Arc::new(TelegramChannel::new(
            teloxide::Bot::new(token),
            TelegramConfig::from_config(&cfg),
            host.clone(),
            transcriber.clone(),
            storage.clone(),
        )));
    }

    for channel in &channels {
        match channel.connect().await {
            Ok(()) => info!(channel = channel.name(), "channel connected"),
            Err(e) => error!(channel = channel.name(), error = %e, "channel failed to connect"),
        }
    }
    if !channels.iter().any(|c| c.is_connected()) {
        bail!("no channel could connect");
    }

    let model = Arc::new(ClaudeCliClient::new(
        ClaudeCliConfig {
            claude_path: cfg.claude_cli_path.clone(),
            model: cfg.claude_model.clone(),
            permission_mode: cfg.claude_permission_mode,
            dangerously_skip_permissions: cfg.claude_permission_mode
                == PermissionMode::BypassPermissions,
            config_dir: cfg.claude_config_dir.clone(),
        },
        cfg.agent_timeout,
    ));
    let orchestrator = Arc::new(Orchestrator::new(
        channels,
        model,
        registry.clone(),
        cfg.groups_dir(),
        &cfg.assistant_name,
    ));

    info!(assistant = %cfg.assistant_name, "relay running");
    let mut reload = tokio::time::interval(REGISTRY_RELOAD_INTERVAL);
    loop {
        tokio::select! {
            inbound = rx.recv() => {
                let Some((jid, msg)) = inbound else { break };
                orchestrator.submit(jid, msg).await;
            }
            _ = reload.tick() => {
                if let Err(e) = registry.reload() {
                    warn!(error = %e, "group registry reload failed, keeping previous");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown requested");
                break;
            }
        }
    }

    for channel in orchestrator.channels() {
        if let Err(e) = channel.disconnect().await {
            warn!(channel = channel.name(), error = %e, "disconnect failed");
        }
    }
    Ok(())
}
