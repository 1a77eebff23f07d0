//! Passphrase prompts
//!
//! The agent asks a [`PassphrasePrompter`] to show a prompt and carries on.
//! The answer comes back later as an [`AgentEvent`] naming the dialog.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use zeroize::Zeroizing;

use kh_core::config::AskpassConfig;
use kh_core::DialogId;

use crate::event::AgentEvent;

/// Something that can ask the user for a passphrase
pub trait PassphrasePrompter: Send {
    /// Start a prompt for the key called `comment`
    ///
    /// Returns false if no prompt could be shown. Otherwise exactly one
    /// outcome for `dialog` is delivered later.
    fn ask_passphrase(&mut self, dialog: DialogId, comment: &str) -> bool;
}

/// Prompter for agents that never ask
#[derive(Debug, Default)]
pub struct NoPrompter;

impl PassphrasePrompter for NoPrompter {
    fn ask_passphrase(&mut self, _dialog: DialogId, _comment: &str) -> bool {
        false
    }
}

/// Replace `{{comment}}` in each argument
pub fn render_args(args: &[String], comment: &str) -> Vec<String> {
    args.iter()
        .map(|arg| arg.replace("{{comment}}", comment))
        .collect()
}

/// Runs an askpass program per prompt
///
/// The first line the program prints is the passphrase. Exiting non-zero,
/// printing nothing or running past the timeout counts as a refusal.
#[derive(Debug)]
pub struct AskpassPrompter {
    config: AskpassConfig,
    timeout: Duration,
    events: mpsc::Sender<AgentEvent>,
}

impl AskpassPrompter {
    pub fn new(config: AskpassConfig, timeout: Duration, events: mpsc::Sender<AgentEvent>) -> Self {
        Self {
            config,
            timeout,
            events,
        }
    }
}

impl PassphrasePrompter for AskpassPrompter {
    fn ask_passphrase(&mut self, dialog: DialogId, comment: &str) -> bool {
        let mut command = Command::new(&self.config.program);
        command
            .args(render_args(&self.config.args, comment))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let child = match command.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %self.config.program.display(), error = %e, "failed to launch askpass");
                return false;
            }
        };

        let events = self.events.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let event = match tokio::time::timeout(timeout, read_passphrase(child)).await {
                Ok(Some(passphrase)) => AgentEvent::PassphraseSupplied { dialog, passphrase },
                Ok(None) => AgentEvent::PassphraseRefused { dialog },
                Err(_) => {
                    warn!(%dialog, "askpass timed out");
                    AgentEvent::PassphraseRefused { dialog }
                }
            };
            if events.send(event).await.is_err() {
                debug!(%dialog, "agent gone before prompt finished");
            }
        });
        true
    }
}

async fn read_passphrase(mut child: tokio::process::Child) -> Option<Zeroizing<String>> {
    let stdout = child.stdout.take()?;
    let mut reader = BufReader::new(stdout);
    let mut line = Zeroizing::new(String::new());
    if let Err(e) = reader.read_line(&mut line).await {
        warn!(error = %e, "askpass read error");
        return None;
    }
    drop(reader);

    let status = match child.wait().await {
        Ok(status) => status,
        Err(e) => {
            warn!(error = %e, "askpass wait error");
            return None;
        }
    };

    let len = line.trim_end_matches(['\n', '\r']).len();
    line.truncate(len);
    if !status.success() || line.is_empty() {
        debug!(%status, "askpass cancelled");
        return None;
    }
    Some(line)
}
