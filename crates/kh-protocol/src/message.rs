//! Message types for the SSH agent protocol
//!
//! Every message starts with a one-byte type code followed by type-specific
//! fields. The numeric codes are fixed by the protocol that existing SSH
//! clients speak and must not change.
//!
//! # Message Flow
//!
//! 1. A client sends one request (`SSH*_AGENTC_*`)
//! 2. The agent answers with exactly one reply: a generic status
//!    (`SSH_AGENT_SUCCESS`, `SSH_AGENT_FAILURE`, `SSH_AGENT_EXTENSION_FAILURE`)
//!    or a request-specific answer carrying a payload
//! 3. Replies on one connection arrive in request order

use std::fmt;

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// List SSH-1 RSA keys
    Ssh1RequestRsaIdentities = 1,
    /// Answer to `Ssh1RequestRsaIdentities`
    Ssh1RsaIdentitiesAnswer = 2,
    /// SSH-1 RSA challenge/response authentication
    Ssh1RsaChallenge = 3,
    /// Answer to `Ssh1RsaChallenge`
    Ssh1RsaResponse = 4,
    /// Generic failure
    Failure = 5,
    /// Generic success
    Success = 6,
    /// Add an SSH-1 RSA key
    Ssh1AddRsaIdentity = 7,
    /// Remove one SSH-1 RSA key
    Ssh1RemoveRsaIdentity = 8,
    /// Remove every SSH-1 RSA key
    Ssh1RemoveAllRsaIdentities = 9,
    /// List SSH-2 keys
    Ssh2RequestIdentities = 11,
    /// Answer to `Ssh2RequestIdentities`
    Ssh2IdentitiesAnswer = 12,
    /// Sign data with an SSH-2 key
    Ssh2SignRequest = 13,
    /// Answer to `Ssh2SignRequest`
    Ssh2SignResponse = 14,
    /// Add an SSH-2 key
    Ssh2AddIdentity = 17,
    /// Remove one SSH-2 key
    Ssh2RemoveIdentity = 18,
    /// Remove every SSH-2 key
    Ssh2RemoveAllIdentities = 19,
    /// Named protocol extension
    Extension = 27,
    /// A recognised extension could not be carried out
    ExtensionFailure = 28,
}

impl MessageType {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Ssh1RequestRsaIdentities),
            2 => Some(Self::Ssh1RsaIdentitiesAnswer),
            3 => Some(Self::Ssh1RsaChallenge),
            4 => Some(Self::Ssh1RsaResponse),
            5 => Some(Self::Failure),
            6 => Some(Self::Success),
            7 => Some(Self::Ssh1AddRsaIdentity),
            8 => Some(Self::Ssh1RemoveRsaIdentity),
            9 => Some(Self::Ssh1RemoveAllRsaIdentities),
            11 => Some(Self::Ssh2RequestIdentities),
            12 => Some(Self::Ssh2IdentitiesAnswer),
            13 => Some(Self::Ssh2SignRequest),
            14 => Some(Self::Ssh2SignResponse),
            17 => Some(Self::Ssh2AddIdentity),
            18 => Some(Self::Ssh2RemoveIdentity),
            19 => Some(Self::Ssh2RemoveAllIdentities),
            27 => Some(Self::Extension),
            28 => Some(Self::ExtensionFailure),
            _ => None,
        }
    }

    /// Protocol name of this message type, as used in log lines
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ssh1RequestRsaIdentities => "SSH1_AGENTC_REQUEST_RSA_IDENTITIES",
            Self::Ssh1RsaIdentitiesAnswer => "SSH1_AGENT_RSA_IDENTITIES_ANSWER",
            Self::Ssh1RsaChallenge => "SSH1_AGENTC_RSA_CHALLENGE",
            Self::Ssh1RsaResponse => "SSH1_AGENT_RSA_RESPONSE",
            Self::Failure => "SSH_AGENT_FAILURE",
            Self::Success => "SSH_AGENT_SUCCESS",
            Self::Ssh1AddRsaIdentity => "SSH1_AGENTC_ADD_RSA_IDENTITY",
            Self::Ssh1RemoveRsaIdentity => "SSH1_AGENTC_REMOVE_RSA_IDENTITY",
            Self::Ssh1RemoveAllRsaIdentities => "SSH1_AGENTC_REMOVE_ALL_RSA_IDENTITIES",
            Self::Ssh2RequestIdentities => "SSH2_AGENTC_REQUEST_IDENTITIES",
            Self::Ssh2IdentitiesAnswer => "SSH2_AGENT_IDENTITIES_ANSWER",
            Self::Ssh2SignRequest => "SSH2_AGENTC_SIGN_REQUEST",
            Self::Ssh2SignResponse => "SSH2_AGENT_SIGN_RESPONSE",
            Self::Ssh2AddIdentity => "SSH2_AGENTC_ADD_IDENTITY",
            Self::Ssh2RemoveIdentity => "SSH2_AGENTC_REMOVE_IDENTITY",
            Self::Ssh2RemoveAllIdentities => "SSH2_AGENTC_REMOVE_ALL_IDENTITIES",
            Self::Extension => "SSH2_AGENTC_EXTENSION",
            Self::ExtensionFailure => "SSH_AGENT_EXTENSION_FAILURE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Flag word carried at the end of `SSH2_AGENTC_SIGN_REQUEST`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct SignFlags(pub u32);

impl SignFlags {
    /// Produce an `rsa-sha2-256` signature instead of `ssh-rsa`
    pub const RSA_SHA2_256: SignFlags = SignFlags(2);
    /// Produce an `rsa-sha2-512` signature instead of `ssh-rsa`
    pub const RSA_SHA2_512: SignFlags = SignFlags(4);
    /// No flags
    pub const NONE: SignFlags = SignFlags(0);

    /// Raw flag bits
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set in `self`
    pub fn contains(&self, other: SignFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Bits of `self` that are not present in `allowed`
    pub fn excess_over(&self, allowed: SignFlags) -> SignFlags {
        SignFlags(self.0 & !allowed.0)
    }

    /// True if no bits are set
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for SignFlags {
    type Output = SignFlags;

    fn bitor(self, rhs: SignFlags) -> SignFlags {
        SignFlags(self.0 | rhs.0)
    }
}

/// Per-key flag word in the `list-extended` extension reply
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ListExtendedFlags(pub u32);

impl ListExtendedFlags {
    /// The agent holds an encrypted key file for this key
    pub const HAS_ENCRYPTED_KEY_FILE: ListExtendedFlags = ListExtendedFlags(1);
    /// The agent currently holds no decrypted private key
    pub const HAS_NO_CLEARTEXT_KEY: ListExtendedFlags = ListExtendedFlags(2);

    /// Raw flag bits
    pub fn bits(&self) -> u32 {
        self.0
    }

    /// Whether every bit of `other` is set in `self`
    pub fn contains(&self, other: ListExtendedFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set the bits of `other`
    pub fn insert(&mut self, other: ListExtendedFlags) {
        self.0 |= other.0;
    }
}
