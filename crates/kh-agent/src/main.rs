//! keyhold agent daemon
//!
//! Listens on a Unix socket and answers SSH agent requests.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kh_agent::prompt::{AskpassPrompter, NoPrompter, PassphrasePrompter};
use kh_agent::service::EVENT_CHANNEL_CAPACITY;
use kh_agent::{run_agent, startup, Agent, AgentListener};
use kh_core::config::{self, AgentConfig};

#[derive(Parser)]
#[command(name = "keyhold-agent")]
#[command(about = "keyhold SSH authentication agent")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket path (overrides config)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Load key files in encrypted form, decrypting on first use
    #[arg(long)]
    encrypted: bool,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Key files to load at startup, in addition to those in the config
    keys: Vec<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("keyhold agent starting...");

    // Load configuration
    let config = if let Some(config_path) = &args.config {
        config::load_config::<AgentConfig>(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                AgentConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            AgentConfig::default()
        }
    };

    let socket_path = args.socket.clone().unwrap_or_else(|| config.socket_path());
    let add_encrypted = args.encrypted || config.add_encrypted;
    let mut key_paths = config.keys.clone();
    key_paths.extend(args.keys.iter().cloned());

    let cancel = CancellationToken::new();
    let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let prompter: Box<dyn PassphrasePrompter> = match config.askpass() {
        Some(askpass) => {
            tracing::info!("Passphrase prompts via {:?}", askpass.program);
            Box::new(AskpassPrompter::new(
                askpass,
                config.prompt_timeout,
                event_tx.clone(),
            ))
        }
        None => {
            tracing::warn!("No askpass program configured - encrypted keys cannot be decrypted");
            Box::new(NoPrompter)
        }
    };
    let mut agent = Agent::new(prompter);

    // Bind before loading keys so a second agent fails fast
    let listener = AgentListener::bind(
        &socket_path,
        agent.client_ids(),
        event_tx.clone(),
        cancel.clone(),
    )
    .await?;

    if !key_paths.is_empty() {
        let summary = startup::load_keys(&mut agent, &key_paths, add_encrypted).await;
        tracing::info!(
            "Loaded {} of {} startup keys",
            summary.loaded,
            key_paths.len()
        );
    }

    println!("SSH_AUTH_SOCK={}; export SSH_AUTH_SOCK;", listener.path().display());

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    drop(event_tx);
    let agent_task = tokio::spawn(run_agent(agent, event_rx, cancel.clone()));

    listener.run().await?;
    agent_task.await.context("Agent task failed")?;

    tracing::info!("Agent shutdown complete");
    Ok(())
}
