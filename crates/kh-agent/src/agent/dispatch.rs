//! Request decoding and the synchronous handlers

use bytes::{BufMut, Bytes};

use kh_core::KeyVersion;
use kh_protocol::{MessageType, SignFlags, WireReader, WireWrite};

use super::reply::{self, Failure, HandlerResult, RequestLog};
use super::Agent;
use crate::keys::ssh1::SESSION_ID_LEN;
use crate::keys::{ssh2, KeyMaterial, Ssh1Key, Ssh1PublicKey};
use crate::keystore::AddOutcome;
use crate::ops::{OpKind, SignOp};

impl Agent {
    /// Decode one request and turn it into an operation
    pub(super) fn dispatch(&mut self, log: &RequestLog, message: Bytes) -> OpKind {
        let mut reader = WireReader::new(message);
        let Ok(code) = reader.get_u8("message type") else {
            log.line("request: empty message");
            return OpKind::Immediate(Err(Failure::generic("message contained no type code")));
        };
        let Some(msg_type) = MessageType::from_u8(code) else {
            log.line(format_args!("request: unknown message type {}", code));
            return OpKind::Immediate(Err(Failure::generic("unrecognised message")));
        };
        log.request(msg_type);

        let result = match msg_type {
            MessageType::Ssh1RequestRsaIdentities => Ok(self.list_ssh1(log)),
            MessageType::Ssh2RequestIdentities => Ok(self.list_ssh2(log)),
            MessageType::Ssh1RsaChallenge => self.rsa_challenge(log, &mut reader),
            MessageType::Ssh2SignRequest => match self.sign_request(log, &mut reader) {
                Ok(sign) => return OpKind::Sign(sign),
                Err(failure) => Err(failure),
            },
            MessageType::Ssh1AddRsaIdentity => self.add_ssh1(log, &mut reader),
            MessageType::Ssh2AddIdentity => self.add_ssh2(log, &mut reader),
            MessageType::Ssh1RemoveRsaIdentity => self.remove_ssh1(log, &mut reader),
            MessageType::Ssh2RemoveIdentity => self.remove_ssh2(log, &mut reader),
            MessageType::Ssh1RemoveAllRsaIdentities => {
                self.remove_all_keys(KeyVersion::Ssh1);
                Ok(reply::success())
            }
            MessageType::Ssh2RemoveAllIdentities => {
                self.remove_all_keys(KeyVersion::Ssh2);
                Ok(reply::success())
            }
            MessageType::Extension => self.extension(log, &mut reader),
            _ => Err(Failure::generic("unrecognised message")),
        };
        OpKind::Immediate(result)
    }

    fn list_ssh1(&self, log: &RequestLog) -> Bytes {
        let mut buf = reply::begin(MessageType::Ssh1RsaIdentitiesAnswer);
        buf.put_u32(self.keys.count(KeyVersion::Ssh1) as u32);
        for record in self.keys.iter_version(KeyVersion::Ssh1) {
            buf.put_slice(record.blob());
            buf.put_string(record.comment.as_bytes());
            if let Some(key) = record.cleartext.as_ref().and_then(|m| m.as_ssh1()) {
                log.line(format_args!(
                    "returned key: {} {}",
                    key.public().fingerprint(),
                    record.comment
                ));
            }
        }
        buf.freeze()
    }

    fn list_ssh2(&self, log: &RequestLog) -> Bytes {
        let mut buf = reply::begin(MessageType::Ssh2IdentitiesAnswer);
        buf.put_u32(self.keys.count(KeyVersion::Ssh2) as u32);
        for record in self.keys.iter_version(KeyVersion::Ssh2) {
            buf.put_string(record.blob());
            buf.put_string(record.comment.as_bytes());
            log.line(format_args!(
                "returned key: {} {}",
                ssh2::fingerprint(record.blob()),
                record.comment
            ));
        }
        buf.freeze()
    }

    fn rsa_challenge(&self, log: &RequestLog, reader: &mut WireReader) -> HandlerResult {
        let public = Ssh1PublicKey::decode(reader)?;
        let challenge = reader.get_mpint1("challenge")?;
        let session_id = reader.get_bytes(SESSION_ID_LEN, "session id")?;
        let response_type = reader.get_u32("response type")?;

        log.line(format_args!("requested key: {}", public.fingerprint()));
        if response_type != 1 {
            return Err(Failure::generic("response type other than 1 not supported"));
        }

        let key = self
            .keys
            .find(KeyVersion::Ssh1, &public.blob())
            .and_then(|record| record.cleartext.as_ref())
            .and_then(KeyMaterial::as_ssh1)
            .ok_or_else(|| Failure::generic("key not found"))?;
        let response = key.respond(&challenge, &session_id)?;

        let mut buf = reply::begin(MessageType::Ssh1RsaResponse);
        buf.put_slice(&response);
        Ok(buf.freeze())
    }

    fn sign_request(&self, log: &RequestLog, reader: &mut WireReader) -> Result<SignOp, Failure> {
        let blob = reader.get_string("key blob")?;
        let data = reader.get_string("data")?;
        let flags = if reader.is_empty() {
            SignFlags::NONE
        } else {
            SignFlags(reader.get_u32("flags")?)
        };

        log.line(format_args!("requested key: {}", ssh2::fingerprint(&blob)));
        if flags.is_empty() {
            log.line("no signature flags");
        } else {
            log.line(format_args!("signature flags = 0x{:08x}", flags.bits()));
        }

        let record = self
            .keys
            .find(KeyVersion::Ssh2, &blob)
            .ok_or_else(|| Failure::generic("key not found"))?;
        log.line(format_args!("found with comment: {}", record.comment));
        Ok(SignOp::new(record.sort_key(), data, flags))
    }

    fn add_ssh1(&mut self, log: &RequestLog, reader: &mut WireReader) -> HandlerResult {
        let key = Ssh1Key::decode_agent(reader)?;
        let blob = key.public().blob();
        let comment = key.comment().to_string();
        log.line(format_args!(
            "submitted key: {} {}",
            key.public().fingerprint(),
            comment
        ));
        match self
            .keys
            .add(KeyVersion::Ssh1, blob, KeyMaterial::Ssh1(key), comment)
        {
            AddOutcome::AlreadyPresent => Err(Failure::generic("key already present")),
            _ => Ok(reply::success()),
        }
    }

    fn add_ssh2(&mut self, log: &RequestLog, reader: &mut WireReader) -> HandlerResult {
        let key = ssh2::decode_agent(reader)?;
        let blob = ssh2::public_blob(&key)?;
        let comment = key.comment().to_string();
        log.line(format_args!(
            "submitted key: {} {}",
            ssh2::fingerprint(&blob),
            comment
        ));
        self.insert_ssh2(blob, key, comment)
    }

    /// Add a cleartext SSH-2 key, waking anything that was waiting for it
    pub(super) fn insert_ssh2(
        &mut self,
        blob: Bytes,
        key: ssh_key::PrivateKey,
        comment: String,
    ) -> HandlerResult {
        match self
            .keys
            .add(KeyVersion::Ssh2, blob.clone(), KeyMaterial::Ssh2(key), comment.clone())
        {
            AddOutcome::Added => Ok(reply::success()),
            AddOutcome::Upgraded => {
                if let Some(record) = self.keys.find_mut(KeyVersion::Ssh2, &blob) {
                    if record.comment.is_empty() {
                        record.comment = comment;
                    }
                    let key = record.sort_key();
                    self.wake_blocked(&key);
                }
                Ok(reply::success())
            }
            AddOutcome::AlreadyPresent => Err(Failure::generic("key already present")),
        }
    }

    fn remove_ssh1(&mut self, log: &RequestLog, reader: &mut WireReader) -> HandlerResult {
        let public = Ssh1PublicKey::decode(reader)?;
        log.line(format_args!("unwanted key: {}", public.fingerprint()));
        if self.remove_key(KeyVersion::Ssh1, &public.blob()) {
            Ok(reply::success())
        } else {
            Err(Failure::generic("key not found"))
        }
    }

    fn remove_ssh2(&mut self, log: &RequestLog, reader: &mut WireReader) -> HandlerResult {
        let blob = reader.get_string("key blob")?;
        log.line(format_args!("unwanted key: {}", ssh2::fingerprint(&blob)));
        if self.remove_key(KeyVersion::Ssh2, &blob) {
            Ok(reply::success())
        } else {
            Err(Failure::generic("key not found"))
        }
    }
}
