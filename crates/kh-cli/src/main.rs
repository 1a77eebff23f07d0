//! keyhold CLI
//!
//! Manages the keys held by a running keyhold (or any compatible) SSH
//! agent:
//! - List, add and delete keys
//! - Re-encrypt keys the agent can decrypt again on demand
//! - Query extensions and sign test data

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kh_cli::commands;
use kh_cli::ipc::{resolve_socket, AgentClient};
use kh_protocol::SignFlags;

#[derive(Parser)]
#[command(name = "keyhold")]
#[command(author, version, about = "Manage the keys held by an SSH agent")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Agent socket (defaults to $SSH_AUTH_SOCK)
    #[arg(short, long, global = true)]
    socket: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the keys held by the agent
    /// Alias: ls
    #[command(alias = "ls")]
    List {
        /// Show whether each key is held encrypted or decrypted
        #[arg(short, long)]
        long: bool,
    },

    /// Add private key files to the agent
    Add {
        /// Private key files, OpenSSH or PuTTY (.ppk) format
        #[arg(required = true)]
        files: Vec<PathBuf>,
        /// Let the agent hold the keys encrypted and decrypt them on first use
        #[arg(short, long)]
        encrypted: bool,
    },

    /// Remove a key from the agent
    /// Alias: rm
    #[command(alias = "rm")]
    Delete {
        /// Fingerprint (or a prefix of its hash) or comment of the key
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        key: Option<String>,
        /// Remove every key
        #[arg(short, long)]
        all: bool,
    },

    /// Make the agent forget the decrypted copy of a key
    Reencrypt {
        /// Fingerprint (or a prefix of its hash) or comment of the key
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        key: Option<String>,
        /// Re-encrypt every key that can be decrypted again
        #[arg(short, long)]
        all: bool,
    },

    /// List the protocol extensions the agent supports
    Extensions,

    /// Sign a file with a key in the agent and print the signature in hex
    Sign {
        /// Fingerprint (or a prefix of its hash) or comment of the key
        key: String,
        /// File to sign, or - for stdin
        file: PathBuf,
        /// Ask for an rsa-sha2-256 signature from an RSA key
        #[arg(long, conflicts_with = "rsa_sha2_512")]
        rsa_sha2_256: bool,
        /// Ask for an rsa-sha2-512 signature from an RSA key
        #[arg(long)]
        rsa_sha2_512: bool,
    },

    /// Manage the agent's configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get specific config value
    Get { key: String },
    /// Set config value
    Set { key: String, value: String },
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },
    /// Edit config in editor
    Edit,
    /// Show config directory path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    match cli.command {
        Commands::List { long } => {
            let mut client = connect(cli.socket).await?;
            commands::list_command(&mut client, long).await?;
        }

        Commands::Add { files, encrypted } => {
            let mut client = connect(cli.socket).await?;
            commands::add_command(&mut client, &files, encrypted).await?;
        }

        Commands::Delete { key, all } => {
            let mut client = connect(cli.socket).await?;
            commands::delete_command(&mut client, key.as_deref(), all).await?;
        }

        Commands::Reencrypt { key, all } => {
            let mut client = connect(cli.socket).await?;
            commands::reencrypt_command(&mut client, key.as_deref(), all).await?;
        }

        Commands::Extensions => {
            let mut client = connect(cli.socket).await?;
            commands::extensions_command(&mut client).await?;
        }

        Commands::Sign {
            key,
            file,
            rsa_sha2_256,
            rsa_sha2_512,
        } => {
            let flags = match (rsa_sha2_256, rsa_sha2_512) {
                (true, _) => SignFlags::RSA_SHA2_256,
                (_, true) => SignFlags::RSA_SHA2_512,
                _ => SignFlags::NONE,
            };
            let mut client = connect(cli.socket).await?;
            commands::sign_command(&mut client, &key, &file, flags).await?;
        }

        Commands::Config { action } => {
            let config_path = cli.config.as_ref();
            match action {
                ConfigAction::Show => commands::config_show(config_path)?,
                ConfigAction::Get { key } => commands::config_get(config_path, &key)?,
                ConfigAction::Set { key, value } => {
                    commands::config_set(config_path, &key, &value)?
                }
                ConfigAction::Init { force } => commands::config_init(config_path, force)?,
                ConfigAction::Edit => commands::config_edit(config_path)?,
                ConfigAction::Path => {
                    println!("{}", kh_core::config::default_config_dir().display());
                }
            }
        }
    }

    Ok(())
}

async fn connect(socket: Option<PathBuf>) -> Result<AgentClient> {
    let socket = resolve_socket(socket)?;
    AgentClient::connect(&socket).await
}
