//! Private key files read from disk
//!
//! Two formats are understood: PuTTY's PPK and OpenSSH's own. Only PPK
//! files can be held by the agent in encrypted form, since an encrypted
//! OpenSSH file hides its comment along with the private key.

use bytes::Bytes;
use ssh_key::PrivateKey;

use super::ppk::{self, PpkFile};
use super::{ssh2, KeyError};

/// A private key file of either supported format
#[derive(Debug, Clone)]
pub enum KeyFile {
    /// PuTTY key file
    Ppk(PpkFile),
    /// OpenSSH private key, possibly passphrase protected
    OpenSsh(PrivateKey),
}

impl KeyFile {
    /// Parse a key file, telling the formats apart by their first line
    pub fn parse(contents: Bytes) -> Result<Self, KeyError> {
        if ppk::is_ppk(&contents) {
            return PpkFile::parse(contents).map(KeyFile::Ppk);
        }
        PrivateKey::from_openssh(&contents)
            .map(KeyFile::OpenSsh)
            .map_err(|e| KeyError::KeyFile(e.to_string()))
    }

    /// Whether the private half is protected by a passphrase
    pub fn is_encrypted(&self) -> bool {
        match self {
            KeyFile::Ppk(file) => file.is_encrypted(),
            KeyFile::OpenSsh(key) => key.is_encrypted(),
        }
    }

    /// Public blob, available without decrypting
    pub fn public_blob(&self) -> Result<Bytes, KeyError> {
        match self {
            KeyFile::Ppk(file) => Ok(file.public_blob().clone()),
            KeyFile::OpenSsh(key) => ssh2::public_blob(key),
        }
    }

    /// Comment, if it can be read without the passphrase
    pub fn comment(&self) -> Option<&str> {
        match self {
            KeyFile::Ppk(file) => Some(file.comment()),
            KeyFile::OpenSsh(key) if key.is_encrypted() => None,
            KeyFile::OpenSsh(key) => Some(key.comment()),
        }
    }

    /// The private key, if the file is not encrypted
    pub fn cleartext(&self) -> Result<Option<PrivateKey>, KeyError> {
        if self.is_encrypted() {
            return Ok(None);
        }
        self.decrypt(b"").map(Some)
    }

    /// Decrypt the private half; the passphrase is ignored if there is none
    pub fn decrypt(&self, passphrase: &[u8]) -> Result<PrivateKey, KeyError> {
        match self {
            KeyFile::Ppk(file) => file.decrypt(passphrase),
            KeyFile::OpenSsh(key) if !key.is_encrypted() => Ok(key.clone()),
            KeyFile::OpenSsh(key) => match key.decrypt(passphrase) {
                Ok(key) => Ok(key),
                Err(ssh_key::Error::Crypto) => Err(KeyError::WrongPassphrase),
                Err(e) => Err(KeyError::KeyFile(e.to_string())),
            },
        }
    }
}
