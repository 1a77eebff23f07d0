//! Loading key files named in the configuration or on the command line
//!
//! Keys go in through [`Agent::query_local`], exactly as if a client had
//! sent them. Encrypted PPK files can't be decrypted at startup, so they
//! are added through the key-file extension and decrypted on first use.
//! Encrypted OpenSSH files can't be loaded here at all: nothing short of
//! the passphrase reveals their comment.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use bytes::{BufMut, Bytes, BytesMut};

use kh_protocol::{Extension, MessageType, WireWrite};

use crate::agent::Agent;
use crate::keys::{ssh2, KeyFile};

/// How the startup keys fared
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: usize,
    pub failed: Vec<PathBuf>,
}

/// `SSH2_AGENTC_ADD_IDENTITY` for a cleartext key
pub fn add_identity_message(key: &ssh_key::PrivateKey) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    buf.put_u8(MessageType::Ssh2AddIdentity.as_u8());
    ssh2::encode_agent(key, &mut buf)?;
    Ok(buf.freeze())
}

/// Key-file extension request carrying a whole PPK file
pub fn add_key_file_message(contents: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(MessageType::Extension.as_u8());
    buf.put_string(Extension::AddKeyFile.name().as_bytes());
    buf.put_string(contents);
    buf.freeze()
}

/// Add every key file in `paths`
pub async fn load_keys(agent: &mut Agent, paths: &[PathBuf], add_encrypted: bool) -> LoadSummary {
    let mut summary = LoadSummary::default();
    for path in paths {
        match load_key(agent, path, add_encrypted).await {
            Ok(()) => {
                tracing::info!("Loaded key {:?}", path);
                summary.loaded += 1;
            }
            Err(e) => {
                tracing::warn!("Failed to load key {:?}: {:#}", path, e);
                summary.failed.push(path.clone());
            }
        }
    }
    summary
}

async fn load_key(agent: &mut Agent, path: &Path, add_encrypted: bool) -> Result<()> {
    let contents = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))?;
    let file = KeyFile::parse(Bytes::from(contents))?;

    let message = match &file {
        KeyFile::Ppk(ppk) if ppk.is_encrypted() || add_encrypted => {
            add_key_file_message(ppk.contents())
        }
        _ => match file.cleartext()? {
            Some(key) => add_identity_message(&key)?,
            None => bail!(
                "encrypted OpenSSH key files can only be added with `keyhold add`; \
                 convert the key to PuTTY format to load it at startup"
            ),
        },
    };

    let reply = agent
        .query_local(message)
        .ok_or_else(|| anyhow!("agent could not answer immediately"))?;
    match reply.first().copied().and_then(MessageType::from_u8) {
        Some(MessageType::Success) => Ok(()),
        Some(status) => Err(anyhow!("agent replied {}", status)),
        None => Err(anyhow!("agent sent an empty reply")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::ppk::tests::{encrypted_file, plain_file};
    use crate::keys::ssh2::tests::ed25519;
    use rand::rngs::OsRng;
    use crate::prompt::NoPrompter;
    use kh_core::KeyVersion;
    use ssh_key::LineEnding;

    #[tokio::test]
    async fn test_load_plain_and_encrypted() {
        let dir = tempfile::tempdir().unwrap();
        let plain = ed25519("plain");
        let secret = ed25519("secret");
        let plain_path = dir.path().join("plain");
        let secret_path = dir.path().join("secret.ppk");
        std::fs::write(&plain_path, plain.to_openssh(LineEnding::LF).unwrap().as_bytes()).unwrap();
        std::fs::write(&secret_path, encrypted_file(&secret, "pw")).unwrap();
        let missing = dir.path().join("missing");

        let mut agent = Agent::new(Box::new(NoPrompter));
        let summary = load_keys(
            &mut agent,
            &[plain_path, secret_path, missing.clone()],
            false,
        )
        .await;

        assert_eq!(summary.loaded, 2);
        assert_eq!(summary.failed, vec![missing]);
        let records: Vec<_> = agent.keys().iter_version(KeyVersion::Ssh2).collect();
        assert_eq!(records.len(), 2);
        assert_eq!(records.iter().filter(|r| r.has_cleartext()).count(), 1);

        // the encrypted key is listed under its own name before decryption
        let secret_blob = ssh2::public_blob(&secret).unwrap();
        let record = agent.keys().find(KeyVersion::Ssh2, &secret_blob).unwrap();
        assert!(!record.has_cleartext());
        assert_eq!(record.comment, "secret");
    }

    #[tokio::test]
    async fn test_encrypted_openssh_file_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let key = ed25519("locked").encrypt(&mut OsRng, "pw").unwrap();
        let path = dir.path().join("id_locked");
        std::fs::write(&path, key.to_openssh(LineEnding::LF).unwrap().as_bytes()).unwrap();

        let mut agent = Agent::new(Box::new(NoPrompter));
        let summary = load_keys(&mut agent, &[path.clone()], true).await;

        assert_eq!(summary.loaded, 0);
        assert_eq!(summary.failed, vec![path]);
        assert!(agent.keys().is_empty());
    }

    #[tokio::test]
    async fn test_add_encrypted_keeps_plain_ppk_file() {
        let dir = tempfile::tempdir().unwrap();
        let key = ed25519("plain");
        let path = dir.path().join("plain.ppk");
        std::fs::write(&path, plain_file(&key)).unwrap();

        let mut agent = Agent::new(Box::new(NoPrompter));
        let summary = load_keys(&mut agent, &[path], true).await;

        // an unencrypted file is added as a plain key either way
        assert_eq!(summary.loaded, 1);
        let record = agent.keys().iter().next().unwrap();
        assert!(record.encrypted.is_none());
        assert!(record.has_cleartext());
        assert_eq!(record.comment, "plain");
    }

    #[tokio::test]
    async fn test_add_encrypted_sends_unencrypted_file_as_plain_key() {
        let dir = tempfile::tempdir().unwrap();
        let key = ed25519("plain");
        let path = dir.path().join("plain");
        std::fs::write(&path, key.to_openssh(LineEnding::LF).unwrap().as_bytes()).unwrap();

        let mut agent = Agent::new(Box::new(NoPrompter));
        let summary = load_keys(&mut agent, &[path], true).await;

        assert_eq!(summary.loaded, 1);
        let record = agent.keys().iter().next().unwrap();
        assert!(record.encrypted.is_none());
        assert!(record.has_cleartext());
        assert_eq!(record.comment, "plain");
    }
}
