//! Agent client
//!
//! One connection, one request in flight. Replies are matched to requests
//! by order, so every method sends exactly one message and reads exactly
//! one reply.

use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use bytes::{BufMut, Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::UnixStream;
use tokio_util::codec::Framed;

use kh_agent::startup::{add_identity_message, add_key_file_message};
use kh_core::{KeyVersion, KhError};
use kh_protocol::{AgentCodec, Extension, Frame, MessageType, SignFlags, WireReader, WireWrite};

use super::identity::Identity;

/// Environment variable naming the agent socket
pub const AUTH_SOCK_ENV: &str = "SSH_AUTH_SOCK";

/// Why an extension request did not succeed
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExtensionError {
    /// The agent doesn't recognise the extension at all
    #[error("agent does not support {0}")]
    Unsupported(&'static str),

    /// The agent recognised the extension but the operation failed
    #[error("agent failed to {0}")]
    Failed(&'static str),
}

/// Pick the agent socket: an explicit path, else `$SSH_AUTH_SOCK`
pub fn resolve_socket(explicit: Option<PathBuf>) -> Result<PathBuf, KhError> {
    explicit
        .or_else(|| {
            std::env::var_os(AUTH_SOCK_ENV)
                .filter(|v| !v.is_empty())
                .map(PathBuf::from)
        })
        .ok_or(KhError::NoAgentSocket)
}

/// Connection to a running agent
pub struct AgentClient {
    framed: Framed<UnixStream, AgentCodec>,
    path: PathBuf,
}

impl AgentClient {
    /// Connect to the agent listening on `path`
    pub async fn connect(path: &Path) -> Result<Self> {
        tracing::debug!("Connecting to agent at {:?}", path);

        let stream = UnixStream::connect(path).await.with_context(|| {
            format!("Failed to connect to agent at {:?}. Is it running?", path)
        })?;

        Ok(Self {
            framed: Framed::new(stream, AgentCodec::new()),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send one message and wait for its reply
    pub async fn request(&mut self, message: Bytes) -> Result<Bytes> {
        self.framed
            .send(message)
            .await
            .context("Failed to send request to agent")?;

        match self.framed.next().await {
            Some(Ok(Frame::Message(reply))) if !reply.is_empty() => Ok(reply),
            Some(Ok(Frame::Message(_))) => bail!("Agent sent an empty reply"),
            Some(Ok(Frame::Oversized { len })) => bail!("Agent reply too large ({} bytes)", len),
            Some(Err(e)) => Err(e).context("Failed to read reply from agent"),
            None => bail!("Agent closed the connection"),
        }
    }

    /// Send a request that expects `expected` back, returning the reply body
    async fn exchange(
        &mut self,
        message: Bytes,
        expected: MessageType,
        what: &str,
    ) -> Result<WireReader> {
        let reply = self.request(message).await?;
        match MessageType::from_u8(reply[0]) {
            Some(status) if status == expected => Ok(WireReader::new(reply.slice(1..))),
            Some(MessageType::Failure) => bail!("Agent refused to {}", what),
            Some(other) => bail!("Unexpected reply to request to {}: {}", what, other),
            None => bail!("Unexpected reply type {} to request to {}", reply[0], what),
        }
    }

    /// Send an extension request, telling "not supported" from "failed"
    async fn extension(
        &mut self,
        extension: Extension,
        body: &[u8],
        feature: &'static str,
        action: &'static str,
    ) -> Result<WireReader> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Extension.as_u8());
        buf.put_string(extension.name().as_bytes());
        buf.put_slice(body);

        let reply = self.request(buf.freeze()).await?;
        expect_extension_reply(reply, feature, action)
    }

    /// SSH-1 keys
    pub async fn list_ssh1(&mut self) -> Result<Vec<Identity>> {
        let message = Bytes::from_static(&[MessageType::Ssh1RequestRsaIdentities as u8]);
        let mut reader = self
            .exchange(message, MessageType::Ssh1RsaIdentitiesAnswer, "list SSH-1 keys")
            .await?;
        Identity::read_ssh1_list(&mut reader).context("Malformed SSH-1 key list")
    }

    /// SSH-2 keys, without decryption state
    pub async fn list_ssh2(&mut self) -> Result<Vec<Identity>> {
        let message = Bytes::from_static(&[MessageType::Ssh2RequestIdentities as u8]);
        let mut reader = self
            .exchange(message, MessageType::Ssh2IdentitiesAnswer, "list keys")
            .await?;
        Identity::read_ssh2_list(&mut reader).context("Malformed key list")
    }

    /// SSH-2 keys with decryption state, or `None` if the agent can't say
    pub async fn list_extended(&mut self) -> Result<Option<Vec<Identity>>> {
        match self
            .extension(Extension::ListExtended, &[], "extended key lists", "list keys")
            .await
        {
            Ok(mut reader) => Identity::read_extended_list(&mut reader)
                .map(Some)
                .context("Malformed extended key list"),
            Err(e)
                if matches!(
                    e.downcast_ref::<ExtensionError>(),
                    Some(ExtensionError::Unsupported(_))
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Every key, SSH-1 first
    pub async fn list_all(&mut self) -> Result<Vec<Identity>> {
        let mut keys = self.list_ssh1().await?;
        match self.list_extended().await? {
            Some(extended) => keys.extend(extended),
            None => keys.extend(self.list_ssh2().await?),
        }
        Ok(keys)
    }

    /// Add a decrypted SSH-2 key
    pub async fn add_identity(&mut self, key: &ssh_key::PrivateKey) -> Result<()> {
        let message = add_identity_message(key)?;
        self.exchange(message, MessageType::Success, "add the key")
            .await?;
        Ok(())
    }

    /// Add a PPK key file, which the agent decrypts on first use
    pub async fn add_key_file(&mut self, contents: &[u8]) -> Result<()> {
        let reply = self.request(add_key_file_message(contents)).await?;
        expect_extension_reply(reply, "encrypted keys", "add the key file")?;
        Ok(())
    }

    /// Remove one key
    pub async fn remove(&mut self, identity: &Identity) -> Result<()> {
        let mut buf = BytesMut::new();
        match identity.version {
            KeyVersion::Ssh1 => {
                buf.put_u8(MessageType::Ssh1RemoveRsaIdentity.as_u8());
                buf.put_slice(&identity.blob);
            }
            KeyVersion::Ssh2 => {
                buf.put_u8(MessageType::Ssh2RemoveIdentity.as_u8());
                buf.put_string(&identity.blob);
            }
        }
        self.exchange(buf.freeze(), MessageType::Success, "remove the key")
            .await?;
        Ok(())
    }

    /// Remove every key of both versions
    pub async fn remove_all(&mut self) -> Result<()> {
        for msg_type in [
            MessageType::Ssh1RemoveAllRsaIdentities,
            MessageType::Ssh2RemoveAllIdentities,
        ] {
            let message = Bytes::copy_from_slice(&[msg_type.as_u8()]);
            self.exchange(message, MessageType::Success, "remove all keys")
                .await?;
        }
        Ok(())
    }

    /// Forget the decrypted copy of one key
    pub async fn reencrypt(&mut self, blob: &[u8]) -> Result<()> {
        let mut body = BytesMut::new();
        body.put_string(blob);
        self.extension(Extension::Reencrypt, &body, "re-encryption", "re-encrypt the key")
            .await?;
        Ok(())
    }

    /// Forget every decrypted copy that can be restored; returns how many
    /// keys stay decrypted
    pub async fn reencrypt_all(&mut self) -> Result<u32> {
        let mut reader = self
            .extension(
                Extension::ReencryptAll,
                &[],
                "re-encryption",
                "re-encrypt any key",
            )
            .await?;
        // A bare success carries no count
        if reader.is_empty() {
            return Ok(0);
        }
        reader
            .get_u32("failure count")
            .context("Malformed re-encryption reply")
    }

    /// Names of the extensions the agent supports
    pub async fn query_extensions(&mut self) -> Result<Vec<String>> {
        let mut reader = self
            .extension(Extension::Query, &[], "extension queries", "list extensions")
            .await?;
        let mut names = Vec::new();
        while !reader.is_empty() {
            names.push(
                reader
                    .get_text_lossy("extension name")
                    .context("Malformed extension list")?,
            );
        }
        Ok(names)
    }

    /// Ask the agent to sign `data` with the key `blob`
    pub async fn sign(&mut self, blob: &[u8], data: &[u8], flags: SignFlags) -> Result<Bytes> {
        let mut buf = BytesMut::new();
        buf.put_u8(MessageType::Ssh2SignRequest.as_u8());
        buf.put_string(blob);
        buf.put_string(data);
        buf.put_u32(flags.bits());

        let mut reader = self
            .exchange(buf.freeze(), MessageType::Ssh2SignResponse, "sign")
            .await?;
        reader
            .get_string("signature")
            .map_err(|e| anyhow!("Malformed signature reply: {}", e))
    }
}

fn expect_extension_reply(
    reply: Bytes,
    feature: &'static str,
    action: &'static str,
) -> Result<WireReader> {
    match MessageType::from_u8(reply[0]) {
        Some(MessageType::Success) => Ok(WireReader::new(reply.slice(1..))),
        Some(MessageType::Failure) => Err(ExtensionError::Unsupported(feature).into()),
        Some(MessageType::ExtensionFailure) => Err(ExtensionError::Failed(action).into()),
        _ => bail!("Unexpected reply type {} to extension request", reply[0]),
    }
}
