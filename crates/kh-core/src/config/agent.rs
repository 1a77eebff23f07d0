//! Agent configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;

/// Environment variable naming the askpass program when none is configured
pub const ASKPASS_ENV: &str = "SSH_ASKPASS";

/// Configuration for the agent daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Socket to listen on (defaults to `<runtime dir>/keyhold/agent.sock`)
    pub socket_path: Option<PathBuf>,

    /// Program used to ask the user for a key passphrase
    pub askpass: Option<AskpassConfig>,

    /// Key files loaded when the agent starts
    pub keys: Vec<PathBuf>,

    /// Load startup keys in encrypted form even when they have no passphrase
    pub add_encrypted: bool,

    /// How long a passphrase prompt may stay open before it counts as refused
    #[serde(with = "duration_secs")]
    pub prompt_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            askpass: None,
            keys: vec![],
            add_encrypted: false,
            prompt_timeout: Duration::from_secs(300),
        }
    }
}

impl AgentConfig {
    /// Socket path, falling back to the default location
    pub fn socket_path(&self) -> PathBuf {
        self.socket_path
            .clone()
            .unwrap_or_else(super::default_socket_path)
    }

    /// Askpass program, falling back to `$SSH_ASKPASS`
    pub fn askpass(&self) -> Option<AskpassConfig> {
        self.askpass.clone().or_else(|| {
            std::env::var_os(ASKPASS_ENV)
                .filter(|v| !v.is_empty())
                .map(|program| AskpassConfig {
                    program: PathBuf::from(program),
                    args: vec!["Passphrase for key \"{{comment}}\":".to_string()],
                })
        })
    }
}

/// External passphrase prompt program
///
/// The program prints the passphrase on stdout and exits with status zero,
/// or exits non-zero when the user declines. `{{comment}}` in `args` is
/// replaced with the key's comment (or its fingerprint, if it has none).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AskpassConfig {
    /// Program to run
    pub program: PathBuf,

    /// Arguments, with placeholders
    #[serde(default)]
    pub args: Vec<String>,
}
