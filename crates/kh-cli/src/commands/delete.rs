//! Delete command implementation

use anyhow::{anyhow, Result};

use super::find_key;
use crate::ipc::AgentClient;
use crate::output::print_success;

/// Remove one key, or every key
pub async fn delete_command(
    client: &mut AgentClient,
    target: Option<&str>,
    all: bool,
) -> Result<()> {
    if all {
        client.remove_all().await?;
        print_success("Removed all keys");
        return Ok(());
    }

    let target = target.ok_or_else(|| anyhow!("Name a key to delete, or pass --all"))?;
    let key = find_key(client.list_all().await?, target)?;
    client.remove(&key).await?;
    print_success(&format!("Removed {} {}", key.fingerprint(), key.comment));
    Ok(())
}
