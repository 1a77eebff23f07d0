//! Re-encrypt command implementation

use anyhow::{anyhow, bail, Result};

use kh_core::KeyVersion;

use super::find_key;
use crate::ipc::AgentClient;
use crate::output::{print_success, print_warning};

/// Make the agent forget decrypted keys it can decrypt again later
pub async fn reencrypt_command(
    client: &mut AgentClient,
    target: Option<&str>,
    all: bool,
) -> Result<()> {
    if all {
        let remaining = client.reencrypt_all().await?;
        if remaining == 0 {
            print_success("Re-encrypted all keys");
        } else {
            print_warning(&remaining_message(remaining));
        }
        return Ok(());
    }

    let target = target.ok_or_else(|| anyhow!("Name a key to re-encrypt, or pass --all"))?;
    let key = find_key(client.list_all().await?, target)?;
    if key.version == KeyVersion::Ssh1 {
        bail!("SSH-1 keys can't be re-encrypted");
    }
    client.reencrypt(&key.blob).await?;
    print_success(&format!("Re-encrypted {} {}", key.fingerprint(), key.comment));
    Ok(())
}

fn remaining_message(remaining: u32) -> String {
    if remaining == 1 {
        "1 key remains unencrypted".to_string()
    } else {
        format!("{} keys remain unencrypted", remaining)
    }
}
