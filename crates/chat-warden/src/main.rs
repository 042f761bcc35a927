mod chat;
mod cli;
mod config;
mod knowledge;
mod provider;
mod server;
mod storage;

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::{info, warn};

use abuse_guard::AbuseGuard;
use alert_bridge::{AlertSink, TelegramNotifier};

use crate::chat::ChatService;
use crate::cli::Cli;
use crate::knowledge::KnowledgeBase;
use crate::provider::OpenAiProvider;
use crate::server::{RelayServer, ServerConfig};
use crate::storage::MessageStore;

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse CLI args.
    let cli = Cli::parse();

    // 2. Load config, then merge CLI overrides.
    let mut cfg = config::load(&cli.config)?;

    if let Some(ref listen) = cli.listen {
        cfg.network.listen_addr = listen.clone();
    }
    if let Some(ref data_dir) = cli.data_dir {
        cfg.storage.data_dir = data_dir.clone();
    }
    if let Some(ref knowledge_dir) = cli.knowledge_dir {
        cfg.knowledge.dir = knowledge_dir.clone();
    }

    // 3. Init tracing-subscriber with JSON format.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();

    info!(
        config_file = %cli.config.display(),
        listen = %cfg.network.listen_addr,
        model = %cfg.provider.model,
        "chat-warden starting"
    );

    // 4. Validate the provider configuration; missing credentials are a
    //    startup-time fatal condition, not something to discover per request.
    if cfg.provider.base_url.is_empty() {
        bail!("provider.base_url is required (an OpenAI-compatible endpoint)");
    }
    let api_key = match std::env::var(&cfg.provider.api_key_env) {
        Ok(key) if !key.is_empty() => key,
        _ => bail!(
            "environment variable {} must hold the provider API key",
            cfg.provider.api_key_env
        ),
    };

    // 5. Start the alert channel. Telegram credentials come from the config
    //    file or, failing that, the conventional environment variables.
    let bot_token = cfg
        .telegram
        .bot_token
        .clone()
        .or_else(|| std::env::var("TELEGRAM_BOT_TOKEN").ok())
        .filter(|t| !t.is_empty());
    let chat_id = cfg
        .telegram
        .chat_id
        .clone()
        .or_else(|| std::env::var("TELEGRAM_CHAT_ID").ok())
        .filter(|c| !c.is_empty());

    let notifier = match (bot_token, chat_id) {
        (Some(token), Some(chat_id)) => {
            let notifier = TelegramNotifier::new(&token, chat_id)
                .context("failed to build telegram client")?;
            match notifier.get_me().await {
                Ok(profile) => info!(
                    bot = profile.username.as_deref().unwrap_or("<unknown>"),
                    "telegram alerts enabled"
                ),
                Err(err) => warn!(%err, "telegram configured but unreachable; alerts may fail"),
            }
            Some(notifier)
        }
        _ => {
            info!("telegram not configured; alerts will only be logged");
            None
        }
    };
    let (alerts, _alert_handle) = AlertSink::start(notifier);

    // 6. Build the abuse guard.
    let guard = Arc::new(
        AbuseGuard::new(cfg.guard.clone()).context("failed to build abuse guard")?,
    );
    info!(
        max_per_minute = cfg.guard.max_per_minute,
        max_per_hour = cfg.guard.max_per_hour,
        max_strikes = cfg.guard.max_strikes,
        "abuse guard ready"
    );

    // 7. Provider, knowledge base, conversation store.
    let provider = Arc::new(
        OpenAiProvider::new(&cfg.provider, api_key).context("failed to build provider client")?,
    );
    let knowledge = Arc::new(KnowledgeBase::load(&cfg.knowledge.dir));
    let store = Arc::new(
        MessageStore::open(&cfg.storage.data_dir)
            .await
            .context("failed to open conversation store")?,
    );

    let service = Arc::new(ChatService::new(
        guard,
        provider,
        store,
        knowledge,
        alerts,
        cfg.provider.history_limit,
    ));

    // 8. Run the endpoint until a shutdown signal arrives.
    let listen_addr: std::net::SocketAddr = cfg
        .network
        .listen_addr
        .parse()
        .context("invalid listen address")?;

    let server = RelayServer::new(
        ServerConfig {
            listen_addr,
            origin_allowlist: cfg.network.origin_allowlist.clone(),
        },
        service,
    );

    tokio::select! {
        result = server.run() => {
            result.context("server exited")?;
        }
        _ = shutdown_signal() => {
            info!("shutdown signal received");
        }
    }

    info!("chat-warden shutting down");
    Ok(())
}

/// Resolve on ctrl-c or, on unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                warn!(%err, "failed to register SIGTERM handler; relying on ctrl-c");
                ctrl_c.await.ok();
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => info!("received SIGINT (ctrl-c)"),
            _ = sigterm.recv() => info!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("received SIGINT (ctrl-c)");
    }
}
