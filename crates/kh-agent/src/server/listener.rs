//! Agent socket listener
//!
//! Accepts incoming connections and spawns a task for each client.

use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use kh_core::KhError;

use crate::clients::ClientIdAllocator;
use crate::event::AgentEvent;
use crate::server::connection::serve_connection;

/// Make sure nothing is serving `path`, clearing a stale socket file
pub async fn check_existing_agent(path: &Path) -> Result<(), KhError> {
    if UnixStream::connect(path).await.is_ok() {
        return Err(KhError::AgentAlreadyRunning(path.to_path_buf()));
    }
    if path.exists() {
        tracing::info!("Removing stale agent socket {:?}", path);
        tokio::fs::remove_file(path).await?;
    }
    Ok(())
}

/// Bind `path` so the socket is never reachable with wider permissions
/// than 0600: bind inside a fresh 0700 directory, tighten, then move it.
fn bind_private(path: &Path, parent: &Path) -> Result<UnixListener> {
    let name = path
        .file_name()
        .with_context(|| format!("Socket path {:?} has no file name", path))?;
    let staging = parent.join(format!(
        ".{}.{}.bind",
        name.to_string_lossy(),
        std::process::id()
    ));
    if staging.exists() {
        std::fs::remove_dir_all(&staging)
            .with_context(|| format!("Failed to clear {:?}", staging))?;
    }
    std::fs::DirBuilder::new()
        .mode(0o700)
        .create(&staging)
        .with_context(|| format!("Failed to create directory {:?}", staging))?;

    let staged = staging.join(name);
    let result = UnixListener::bind(&staged)
        .with_context(|| format!("Failed to bind agent socket {:?}", path))
        .and_then(|listener| {
            std::fs::set_permissions(&staged, std::fs::Permissions::from_mode(0o600))
                .with_context(|| format!("chmod 0600 {:?}", staged))?;
            std::fs::rename(&staged, path)
                .with_context(|| format!("Failed to move socket into place at {:?}", path))?;
            Ok(listener)
        });

    if let Err(e) = std::fs::remove_dir_all(&staging) {
        tracing::warn!("Failed to remove {:?}: {}", staging, e);
    }
    result
}

/// Listening agent socket
pub struct AgentListener {
    listener: UnixListener,
    path: PathBuf,
    client_ids: ClientIdAllocator,
    events: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
}

impl AgentListener {
    /// Bind the socket, refusing to replace a live agent
    pub async fn bind(
        path: &Path,
        client_ids: ClientIdAllocator,
        events: mpsc::Sender<AgentEvent>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        check_existing_agent(path).await?;

        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        std::fs::DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;

        let listener = bind_private(path, parent)?;

        Ok(Self {
            listener,
            path: path.to_path_buf(),
            client_ids,
            events,
            cancel,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept connections until cancelled, then remove the socket file
    pub async fn run(self) -> Result<()> {
        tracing::info!("Agent listening on {:?}", self.path);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("Agent listener shutting down");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, _)) => self.spawn_connection(stream),
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
            }
        }

        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!("Failed to remove socket {:?}: {}", self.path, e);
        }
        Ok(())
    }

    fn spawn_connection(&self, stream: UnixStream) {
        let client = self.client_ids.next();
        let events = self.events.clone();
        let cancel = self.cancel.clone();
        tracing::debug!(conn = %client, "New connection");

        tokio::spawn(async move {
            match serve_connection(stream, client, events, cancel).await {
                Ok(()) => tracing::debug!(conn = %client, "Connection closed"),
                Err(e) => tracing::warn!(conn = %client, "Connection closed with error: {}", e),
            }
        });
    }
}
