//! `SSH2_AGENTC_EXTENSION` handlers
//!
//! An unrecognised extension name is a plain `SSH_AGENT_FAILURE`, so clients
//! can probe for support. Once the name is recognised, any failure is
//! reported as `SSH_AGENT_EXTENSION_FAILURE`.

use bytes::BufMut;

use kh_core::KeyVersion;
use kh_protocol::{Extension, ListExtendedFlags, MessageType, WireReader, WireWrite};

use super::reply::{self, Failure, HandlerResult, RequestLog};
use super::{Agent, ReencryptError};
use crate::keys::{ssh2, PpkFile};
use crate::keystore::AddOutcome;

impl Agent {
    pub(super) fn extension(&mut self, log: &RequestLog, reader: &mut WireReader) -> HandlerResult {
        let name = reader.get_string("extension name")?;
        let Some(extension) = Extension::from_name(&name) else {
            return Err(Failure::generic(format!(
                "unrecognised extension name '{}'",
                String::from_utf8_lossy(&name)
            )));
        };
        log.line(format_args!("extension: {}", extension.name()));

        let result = match extension {
            Extension::Query => Ok(query()),
            Extension::AddKeyFile => self.add_key_file(log, reader),
            Extension::Reencrypt => self.reencrypt_one(log, reader),
            Extension::ReencryptAll => self.reencrypt_all(),
            Extension::ListExtended => Ok(self.list_extended()),
        };
        result.map_err(Failure::into_extension)
    }

    /// Add a PPK file; the comment comes from its cleartext header
    fn add_key_file(&mut self, log: &RequestLog, reader: &mut WireReader) -> HandlerResult {
        let contents = reader.get_string("key file")?;
        let file = PpkFile::parse(contents)
            .map_err(|e| Failure::generic(format!("failed to extract public key blob: {}", e)))?;
        if !ssh2::is_supported_algorithm(file.algorithm().as_bytes()) {
            return Err(Failure::generic("algorithm unknown"));
        }
        let blob = file.public_blob().clone();
        let comment = file.comment().to_string();
        log.line(format_args!(
            "add key file: {} {}",
            ssh2::fingerprint(&blob),
            comment
        ));

        if !file.is_encrypted() {
            let key = file
                .decrypt(b"")
                .map_err(|e| Failure::generic(format!("unable to load key file: {}", e)))?;
            return self.insert_ssh2(blob, key, comment);
        }

        match self.keys.add_encrypted(blob, comment, file) {
            AddOutcome::AlreadyPresent => Err(Failure::generic("key already present")),
            _ => Ok(reply::success()),
        }
    }

    fn reencrypt_one(&mut self, log: &RequestLog, reader: &mut WireReader) -> HandlerResult {
        let blob = reader.get_string("key blob")?;
        log.line(format_args!("key to re-encrypt: {}", ssh2::fingerprint(&blob)));
        match self.reencrypt_key(&blob) {
            Ok(()) => Ok(reply::success()),
            Err(ReencryptError::NotFound) => Err(Failure::generic("key not found")),
            Err(ReencryptError::Unsupported) => {
                Err(Failure::generic("this key couldn't be re-encrypted"))
            }
        }
    }

    fn reencrypt_all(&mut self) -> HandlerResult {
        let summary = self.reencrypt_all_keys();
        if summary.succeeded == 0 && summary.failed > 0 {
            return Err(Failure::generic("no key could be re-encrypted"));
        }
        let mut buf = reply::begin(MessageType::Success);
        buf.put_u32(summary.failed);
        Ok(buf.freeze())
    }

    fn list_extended(&self) -> bytes::Bytes {
        let mut buf = reply::begin(MessageType::Success);
        buf.put_u32(self.keys.count(KeyVersion::Ssh2) as u32);
        for record in self.keys.iter_version(KeyVersion::Ssh2) {
            let mut flags = ListExtendedFlags::default();
            if record.encrypted.is_some() {
                flags.insert(ListExtendedFlags::HAS_ENCRYPTED_KEY_FILE);
            }
            if !record.has_cleartext() {
                flags.insert(ListExtendedFlags::HAS_NO_CLEARTEXT_KEY);
            }
            buf.put_string(record.blob());
            buf.put_string(record.comment.as_bytes());
            buf.put_string(&flags.bits().to_be_bytes());
        }
        buf.freeze()
    }
}

fn query() -> bytes::Bytes {
    let mut buf = reply::begin(MessageType::Success);
    for extension in Extension::ALL {
        buf.put_string(extension.name().as_bytes());
    }
    buf.freeze()
}
