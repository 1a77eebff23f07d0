//! Private key material held by the agent

pub mod file;
pub mod ppk;
pub mod rng;
pub mod ssh1;
pub mod ssh2;

use kh_protocol::DecodeError;
use thiserror::Error;

pub use rng::ForbiddenRng;
pub use ssh1::{Ssh1Key, Ssh1PublicKey};
pub use file::KeyFile;
pub use ppk::PpkFile;

/// Errors raised while decoding or using key material
#[derive(Error, Debug)]
pub enum KeyError {
    /// Request fields could not be read
    #[error("unable to decode request: {0}")]
    Decode(#[from] DecodeError),

    /// The key algorithm is not one the agent supports
    #[error("algorithm unknown")]
    AlgorithmUnknown,

    /// The key fields could not be turned into a usable key
    #[error("key setup failed: {0}")]
    SetupFailed(String),

    /// The key's components are inconsistent
    #[error("key is invalid")]
    Invalid,

    /// A key file could not be parsed or decrypted
    #[error("key file: {0}")]
    KeyFile(String),

    /// Passphrase did not decrypt the key file
    #[error("wrong passphrase")]
    WrongPassphrase,

    /// A cryptographic operation failed
    #[error("crypto: {0}")]
    Crypto(String),
}

/// Cleartext private key of either protocol version
#[derive(Debug)]
pub enum KeyMaterial {
    /// SSH-1 RSA key
    Ssh1(Ssh1Key),
    /// SSH-2 key
    Ssh2(ssh_key::PrivateKey),
}

impl KeyMaterial {
    /// Comment carried by the key itself
    pub fn comment(&self) -> &str {
        match self {
            KeyMaterial::Ssh1(key) => key.comment(),
            KeyMaterial::Ssh2(key) => key.comment(),
        }
    }

    /// The SSH-2 key, if this is one
    pub fn as_ssh2(&self) -> Option<&ssh_key::PrivateKey> {
        match self {
            KeyMaterial::Ssh2(key) => Some(key),
            KeyMaterial::Ssh1(_) => None,
        }
    }

    /// The SSH-1 key, if this is one
    pub fn as_ssh1(&self) -> Option<&Ssh1Key> {
        match self {
            KeyMaterial::Ssh1(key) => Some(key),
            KeyMaterial::Ssh2(_) => None,
        }
    }
}
