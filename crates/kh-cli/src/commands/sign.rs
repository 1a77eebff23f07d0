//! Sign command implementation

use std::path::Path;

use anyhow::{bail, Context, Result};
use tokio::io::AsyncReadExt;

use kh_core::KeyVersion;
use kh_protocol::SignFlags;

use super::find_key;
use crate::ipc::AgentClient;

/// Sign a file (or stdin, for `-`) and print the signature blob as hex
pub async fn sign_command(
    client: &mut AgentClient,
    target: &str,
    file: &Path,
    flags: SignFlags,
) -> Result<()> {
    let data = if file == Path::new("-") {
        let mut data = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut data)
            .await
            .context("Failed to read stdin")?;
        data
    } else {
        tokio::fs::read(file)
            .await
            .with_context(|| format!("Failed to read {:?}", file))?
    };

    let key = find_key(client.list_all().await?, target)?;
    if key.version == KeyVersion::Ssh1 {
        bail!("SSH-1 keys can only answer RSA challenges");
    }

    let signature = client.sign(&key.blob, &data, flags).await?;
    println!("{}", hex::encode(&signature));
    Ok(())
}
