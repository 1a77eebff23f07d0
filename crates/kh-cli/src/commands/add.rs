//! Add command implementation

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use bytes::Bytes;
use rand::rngs::OsRng;
use ssh_key::PrivateKey;
use zeroize::Zeroizing;

use kh_agent::keys::ppk::{self, Argon2Params};
use kh_agent::keys::{KeyError, KeyFile};
use kh_core::KeyVersion;

use crate::ipc::{AgentClient, Identity};
use crate::output::{print_error, print_success, print_warning};
use crate::terminal::read_passphrase;

/// Wrong passphrases allowed per key file before giving up
const PASSPHRASE_ATTEMPTS: usize = 3;

/// What happened to one key file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AddOutcome {
    Added,
    AlreadyPresent,
}

/// Add key files to the agent
///
/// With `encrypted`, keys go to the agent as PPK files and are decrypted
/// there on first use. A PPK file is sent as it is; an encrypted OpenSSH
/// file is decrypted here and rewritten as PPK under the same passphrase.
/// Otherwise encrypted files are decrypted here after asking for the
/// passphrase.
pub async fn add_command(
    client: &mut AgentClient,
    files: &[PathBuf],
    encrypted: bool,
) -> Result<()> {
    let existing = client.list_all().await?;
    let mut failed = 0;

    for path in files {
        match add_file(client, &existing, path, encrypted).await {
            Ok(AddOutcome::Added) => print_success(&format!("Added {}", path.display())),
            Ok(AddOutcome::AlreadyPresent) => {
                print_warning(&format!("{} is already in the agent", path.display()))
            }
            Err(e) => {
                print_error(&format!("Failed to add {}: {:#}", path.display(), e));
                failed += 1;
            }
        }
    }

    if failed > 0 {
        bail!("Failed to add {} key file(s)", failed);
    }
    Ok(())
}

async fn add_file(
    client: &mut AgentClient,
    existing: &[Identity],
    path: &Path,
    encrypted: bool,
) -> Result<AddOutcome> {
    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    let file = KeyFile::parse(Bytes::from(contents))?;
    let blob = file.public_blob()?;

    let present = existing
        .iter()
        .find(|k| k.version == KeyVersion::Ssh2 && k.blob == blob);
    if let Some(present) = present {
        if already_satisfied(present, encrypted) {
            return Ok(AddOutcome::AlreadyPresent);
        }
    }

    if !encrypted {
        let key = match file.cleartext()? {
            Some(key) => key,
            None => decrypt_interactively(&file, path)?.0,
        };
        client.add_identity(&key).await?;
        return Ok(AddOutcome::Added);
    }

    if !file.is_encrypted() {
        print_warning(&format!(
            "{} has no passphrase; the agent will hold it unencrypted",
            path.display()
        ));
    }
    match &file {
        KeyFile::Ppk(ppk) => client.add_key_file(ppk.contents()).await?,
        KeyFile::OpenSsh(_) => match file.cleartext()? {
            Some(key) => client.add_identity(&key).await?,
            None => {
                let (key, passphrase) = decrypt_interactively(&file, path)?;
                let converted = ppk::encode(
                    &key,
                    Some(passphrase.as_bytes()),
                    &Argon2Params::default(),
                    &mut OsRng,
                )?;
                client.add_key_file(converted.as_bytes()).await?;
            }
        },
    }
    Ok(AddOutcome::Added)
}

/// Whether the agent already holds the key in the form being asked for
fn already_satisfied(present: &Identity, encrypted: bool) -> bool {
    if encrypted {
        present.state.has_key_file()
    } else {
        // Without an extended listing the state is unknown; any copy will do
        present.state.has_cleartext() || !present.state.has_key_file()
    }
}

/// Ask for the passphrase until it decrypts `file`, returning both
fn decrypt_interactively(file: &KeyFile, path: &Path) -> Result<(PrivateKey, Zeroizing<String>)> {
    let prompt = format!("Enter passphrase for {}: ", path.display());
    for _ in 0..PASSPHRASE_ATTEMPTS {
        let Some(passphrase) = read_passphrase(&prompt)? else {
            bail!("Passphrase entry cancelled");
        };
        match file.decrypt(passphrase.as_bytes()) {
            Ok(key) => return Ok((key, passphrase)),
            Err(KeyError::WrongPassphrase) => print_error("Wrong passphrase"),
            Err(e) => return Err(e.into()),
        }
    }
    bail!("Too many wrong passphrases")
}
