//! Keys as reported by the agent's list requests

use bytes::Bytes;
use ssh_key::PublicKey;

use kh_agent::keys::{ssh2, Ssh1PublicKey};
use kh_core::KeyVersion;
use kh_protocol::{DecodeError, ListExtendedFlags, WireReader};

/// What the agent holds for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    /// Only the decrypted key; it can't be re-encrypted
    Cleartext,
    /// Only the encrypted file; decrypted on first use
    Encrypted,
    /// Both the encrypted file and the decrypted key
    Decrypted,
    /// The agent doesn't say (no extended listing)
    Unknown,
}

impl KeyState {
    fn from_flags(flags: ListExtendedFlags) -> Self {
        let encrypted = flags.contains(ListExtendedFlags::HAS_ENCRYPTED_KEY_FILE);
        let cleartext = !flags.contains(ListExtendedFlags::HAS_NO_CLEARTEXT_KEY);
        match (encrypted, cleartext) {
            (true, true) => KeyState::Decrypted,
            (true, false) => KeyState::Encrypted,
            _ => KeyState::Cleartext,
        }
    }

    /// Short label for listings
    pub fn label(&self) -> &'static str {
        match self {
            KeyState::Cleartext => "cleartext",
            KeyState::Encrypted => "encrypted",
            KeyState::Decrypted => "re-encryptable",
            KeyState::Unknown => "-",
        }
    }

    /// Whether the agent holds an encrypted key file
    pub fn has_key_file(&self) -> bool {
        matches!(self, KeyState::Encrypted | KeyState::Decrypted)
    }

    /// Whether the agent holds the decrypted key
    pub fn has_cleartext(&self) -> bool {
        matches!(self, KeyState::Cleartext | KeyState::Decrypted)
    }
}

/// One key held by the agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub version: KeyVersion,
    pub blob: Bytes,
    pub comment: String,
    pub state: KeyState,
}

impl Identity {
    /// Read the body of `SSH1_AGENT_RSA_IDENTITIES_ANSWER`
    pub fn read_ssh1_list(reader: &mut WireReader) -> Result<Vec<Self>, DecodeError> {
        let count = reader.get_u32("key count")?;
        let mut keys = Vec::new();
        for _ in 0..count {
            let public = Ssh1PublicKey::decode(reader)?;
            let comment = reader.get_text_lossy("comment")?;
            keys.push(Self {
                version: KeyVersion::Ssh1,
                blob: public.blob(),
                comment,
                state: KeyState::Unknown,
            });
        }
        Ok(keys)
    }

    /// Read the body of `SSH2_AGENT_IDENTITIES_ANSWER`
    pub fn read_ssh2_list(reader: &mut WireReader) -> Result<Vec<Self>, DecodeError> {
        let count = reader.get_u32("key count")?;
        let mut keys = Vec::new();
        for _ in 0..count {
            keys.push(Self {
                version: KeyVersion::Ssh2,
                blob: reader.get_string("key blob")?,
                comment: reader.get_text_lossy("comment")?,
                state: KeyState::Unknown,
            });
        }
        Ok(keys)
    }

    /// Read a `list-extended` reply: each key carries a string-wrapped
    /// flags word after its comment
    pub fn read_extended_list(reader: &mut WireReader) -> Result<Vec<Self>, DecodeError> {
        let count = reader.get_u32("key count")?;
        let mut keys = Vec::new();
        for _ in 0..count {
            let blob = reader.get_string("key blob")?;
            let comment = reader.get_text_lossy("comment")?;
            let mut extra = WireReader::new(reader.get_string("key flags")?);
            let flags = ListExtendedFlags(extra.get_u32("key flags")?);
            keys.push(Self {
                version: KeyVersion::Ssh2,
                blob,
                comment,
                state: KeyState::from_flags(flags),
            });
        }
        Ok(keys)
    }

    pub fn fingerprint(&self) -> String {
        match self.version {
            KeyVersion::Ssh1 => Ssh1PublicKey::decode(&mut WireReader::new(self.blob.clone()))
                .map(|key| key.fingerprint())
                .unwrap_or_else(|_| "unparseable key".to_string()),
            KeyVersion::Ssh2 => ssh2::fingerprint(&self.blob),
        }
    }

    /// Algorithm name, as it appears in the public blob
    pub fn algorithm(&self) -> String {
        match self.version {
            KeyVersion::Ssh1 => "ssh1-rsa".to_string(),
            KeyVersion::Ssh2 => PublicKey::from_bytes(&self.blob)
                .map(|key| key.algorithm().as_str().to_string())
                .unwrap_or_else(|_| "unknown".to_string()),
        }
    }

    /// Whether `target` names this key
    ///
    /// Accepts the full fingerprint, the hash part of an SSH-2 fingerprint
    /// or a prefix of it, or the exact comment.
    pub fn matches(&self, target: &str) -> bool {
        let fingerprint = self.fingerprint();
        if fingerprint == target || (!self.comment.is_empty() && self.comment == target) {
            return true;
        }
        let hash = fingerprint.strip_prefix("SHA256:").unwrap_or(&fingerprint);
        let wanted = target.strip_prefix("SHA256:").unwrap_or(target);
        self.version == KeyVersion::Ssh2 && wanted.len() >= 4 && hash.starts_with(wanted)
    }
}
