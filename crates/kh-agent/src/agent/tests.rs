use std::sync::{Arc, Mutex};

use bytes::{BufMut, Bytes, BytesMut};
use rsa::traits::{PrivateKeyParts, PublicKeyParts};
use rsa::{BigUint, RsaPrivateKey};
use tokio::sync::mpsc;
use zeroize::Zeroizing;

use kh_core::{ClientId, DialogId, KeyVersion, RequestId};
use kh_protocol::{Extension, SignFlags, WireReader, WireWrite};

use super::*;
use crate::clients::Reply;
use crate::keys::ppk::tests::{encrypted_file, plain_file};
use crate::keys::ssh2::tests::{ed25519, rsa_key};
use crate::keys::ssh2;

type Prompts = Arc<Mutex<Vec<(DialogId, String)>>>;

/// Records prompts instead of showing them
struct RecordingPrompter {
    prompts: Prompts,
    accept: bool,
}

impl PassphrasePrompter for RecordingPrompter {
    fn ask_passphrase(&mut self, dialog: DialogId, comment: &str) -> bool {
        if self.accept {
            self.prompts.lock().unwrap().push((dialog, comment.to_string()));
        }
        self.accept
    }
}

pub(crate) struct Harness {
    pub agent: Agent,
    prompts: Prompts,
    next_request: u64,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_prompts(true)
    }

    pub fn with_prompts(accept: bool) -> Self {
        let prompts = Prompts::default();
        let prompter = RecordingPrompter {
            prompts: prompts.clone(),
            accept,
        };
        Self {
            agent: Agent::new(Box::new(prompter)),
            prompts,
            next_request: 0,
        }
    }

    pub fn connect(&mut self) -> (ClientId, mpsc::UnboundedReceiver<Reply>) {
        let client = self.agent.client_ids().next();
        let (tx, rx) = mpsc::unbounded_channel();
        self.agent.handle_event(AgentEvent::Connect {
            client,
            replies: tx,
        });
        (client, rx)
    }

    pub fn send(&mut self, client: ClientId, message: Bytes) -> RequestId {
        let request = RequestId::new(self.next_request);
        self.next_request += 1;
        self.agent.handle_event(AgentEvent::Request {
            client,
            request,
            message,
        });
        request
    }

    /// Send one request and return its immediate reply
    pub fn ask(&mut self, message: Bytes) -> Bytes {
        let (client, mut rx) = self.connect();
        self.send(client, message);
        let reply = rx.try_recv().expect("reply");
        self.agent.handle_event(AgentEvent::Disconnect { client });
        reply.payload
    }

    pub fn prompts(&self) -> Vec<(DialogId, String)> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn last_dialog(&self) -> DialogId {
        self.prompts().last().expect("a prompt").0
    }

    pub fn supply(&mut self, dialog: DialogId, passphrase: &str) {
        self.agent.handle_event(AgentEvent::PassphraseSupplied {
            dialog,
            passphrase: Zeroizing::new(passphrase.to_string()),
        });
    }

    pub fn refuse(&mut self, dialog: DialogId) {
        self.agent
            .handle_event(AgentEvent::PassphraseRefused { dialog });
    }
}

fn message(code: u8, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(code);
    buf.put_slice(body);
    buf.freeze()
}

pub(crate) fn add_identity(key: &ssh_key::PrivateKey) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(17);
    ssh2::encode_agent(key, &mut buf).unwrap();
    buf.freeze()
}

pub(crate) fn sign_request(blob: &[u8], data: &[u8], flags: Option<u32>) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(13);
    buf.put_string(blob);
    buf.put_string(data);
    if let Some(flags) = flags {
        buf.put_u32(flags);
    }
    buf.freeze()
}

pub(crate) fn extension(ext: Extension, body: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(27);
    buf.put_string(ext.name().as_bytes());
    buf.put_slice(body);
    buf.freeze()
}

fn string(data: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::new();
    buf.put_string(data);
    buf.to_vec()
}

fn blob_of(key: &ssh_key::PrivateKey) -> Bytes {
    ssh2::public_blob(key).unwrap()
}

/// Add an encrypted-only key and return its blob
fn add_encrypted(harness: &mut Harness, comment: &str, passphrase: &str) -> (ssh_key::PrivateKey, Bytes) {
    let key = ed25519(comment);
    let file = encrypted_file(&key, passphrase);
    let reply = harness.ask(extension(Extension::AddKeyFile, &string(&file)));
    assert_eq!(reply.as_ref(), &[6]);
    let blob = blob_of(&key);
    (key, blob)
}

fn signature_of(reply: &Reply) -> Bytes {
    assert_eq!(reply.payload[0], 14, "expected sign response");
    let mut reader = WireReader::new(reply.payload.slice(1..));
    reader.get_string("signature").unwrap()
}

#[test]
fn test_empty_and_unknown_messages_fail() {
    let mut h = Harness::new();
    assert_eq!(h.ask(Bytes::new()).as_ref(), &[5]);
    assert_eq!(h.ask(message(10, &[])).as_ref(), &[5]);
    assert_eq!(h.ask(message(200, &[])).as_ref(), &[5]);
    // reply codes are not requests
    assert_eq!(h.ask(message(12, &[])).as_ref(), &[5]);
}

#[test]
fn test_list_empty() {
    let mut h = Harness::new();
    assert_eq!(h.ask(message(11, &[])).as_ref(), &[12, 0, 0, 0, 0]);
    assert_eq!(h.ask(message(1, &[])).as_ref(), &[2, 0, 0, 0, 0]);
}

#[test]
fn test_adding_a_key_twice_keeps_one() {
    let mut h = Harness::new();
    let key = ed25519("laptop");
    assert_eq!(h.ask(add_identity(&key)).as_ref(), &[6]);
    assert_eq!(h.ask(add_identity(&key)).as_ref(), &[5]);

    let list = h.ask(message(11, &[]));
    let mut reader = WireReader::new(list.slice(1..));
    assert_eq!(reader.get_u32("count").unwrap(), 1);
    assert_eq!(reader.get_string("blob").unwrap(), blob_of(&key));
    assert_eq!(reader.get_string("comment").unwrap().as_ref(), b"laptop");
    assert!(reader.is_empty());
}

#[test]
fn test_truncated_add_is_decode_failure() {
    let mut h = Harness::new();
    let full = add_identity(&ed25519("x"));
    assert_eq!(h.ask(full.slice(..full.len() - 10)).as_ref(), &[5]);
    assert!(h.agent.keys().is_empty());
}

#[test]
fn test_sign_with_cleartext_key() {
    let mut h = Harness::new();
    let key = ed25519("signer");
    h.ask(add_identity(&key));

    let (client, mut rx) = h.connect();
    h.send(client, sign_request(&blob_of(&key), b"session data", None));
    let reply = rx.try_recv().unwrap();
    let sig = signature_of(&reply);

    let mut reader = WireReader::new(sig);
    assert_eq!(reader.get_string("alg").unwrap().as_ref(), b"ssh-ed25519");
    let raw = reader.get_string("raw").unwrap();
    let sig = ssh_key::Signature::new(ssh_key::Algorithm::Ed25519, raw.to_vec()).unwrap();
    use signature::Verifier;
    Verifier::verify(key.public_key(), b"session data", &sig).unwrap();
}

#[test]
fn test_sign_unknown_key_and_bad_flags() {
    let mut h = Harness::new();
    let key = ed25519("k");
    assert_eq!(h.ask(sign_request(&blob_of(&key), b"d", None)).as_ref(), &[5]);

    h.ask(add_identity(&key));
    // Ed25519 accepts no flags at all
    assert_eq!(
        h.ask(sign_request(&blob_of(&key), b"d", Some(SignFlags::RSA_SHA2_256.bits())))
            .as_ref(),
        &[5]
    );
    // flags word is optional but must be whole
    let mut partial = sign_request(&blob_of(&key), b"d", None).to_vec();
    partial.extend_from_slice(&[0, 0]);
    assert_eq!(h.ask(Bytes::from(partial)).as_ref(), &[5]);
}

/// Check a PKCS#1 v1.5 signature against the key's public half
fn verify_rsa(key: &ssh_key::PrivateKey, hash: &str, data: &[u8], raw: &[u8]) {
    use rsa::pkcs1v15::{Signature, VerifyingKey};
    use signature::Verifier;

    let keypair = key.key_data().rsa().unwrap();
    let public = rsa::RsaPublicKey::new(
        BigUint::from_bytes_be(keypair.public.n.as_positive_bytes().unwrap()),
        BigUint::from_bytes_be(keypair.public.e.as_positive_bytes().unwrap()),
    )
    .unwrap();
    let signature = Signature::try_from(raw).unwrap();
    match hash {
        "ssh-rsa" => VerifyingKey::<sha1::Sha1>::new(public).verify(data, &signature),
        "rsa-sha2-256" => VerifyingKey::<sha2::Sha256>::new(public).verify(data, &signature),
        "rsa-sha2-512" => VerifyingKey::<sha2::Sha512>::new(public).verify(data, &signature),
        other => panic!("unexpected signature type {other}"),
    }
    .unwrap();
}

#[test]
fn test_rsa_key_signs_with_each_hash() {
    let mut h = Harness::new();
    let key = rsa_key(1024, "rsa");
    assert_eq!(h.ask(add_identity(&key)).as_ref(), &[6]);

    for (flags, name) in [
        (SignFlags::NONE, "ssh-rsa"),
        (SignFlags::RSA_SHA2_256, "rsa-sha2-256"),
        (SignFlags::RSA_SHA2_512, "rsa-sha2-512"),
    ] {
        let reply = h.ask(sign_request(&blob_of(&key), b"data", Some(flags.bits())));
        assert_eq!(reply[0], 14, "{name}");
        let mut outer = WireReader::new(reply.slice(1..));
        let mut sig = WireReader::new(outer.get_string("signature").unwrap());
        assert_eq!(sig.get_string("alg").unwrap().as_ref(), name.as_bytes());
        let raw = sig.get_string("raw").unwrap();
        assert_eq!(raw.len(), 128);
        verify_rsa(&key, name, b"data", &raw);
    }
}

#[test]
fn test_short_rsa_key_signs_sha1_only() {
    let mut h = Harness::new();
    let key = rsa_key(512, "tiny");
    assert_eq!(h.ask(add_identity(&key)).as_ref(), &[6]);

    let reply = h.ask(sign_request(&blob_of(&key), b"data", Some(0)));
    assert_eq!(reply[0], 14);
    // 64-byte modulus can't hold a SHA-512 DigestInfo
    let reply = h.ask(sign_request(
        &blob_of(&key),
        b"data",
        Some(SignFlags::RSA_SHA2_512.bits()),
    ));
    assert_eq!(reply.as_ref(), &[5]);
}

#[test]
fn test_remove_identity() {
    let mut h = Harness::new();
    let key = ed25519("gone");
    h.ask(add_identity(&key));
    assert_eq!(h.ask(message(18, &string(&blob_of(&key)))).as_ref(), &[6]);
    assert_eq!(h.ask(message(18, &string(&blob_of(&key)))).as_ref(), &[5]);
    assert!(h.agent.keys().is_empty());

    h.ask(add_identity(&key));
    assert_eq!(h.ask(message(19, &[])).as_ref(), &[6]);
    assert_eq!(h.ask(message(19, &[])).as_ref(), &[6]);
    assert!(h.agent.keys().is_empty());
}

fn ssh1_add_message(key: &RsaPrivateKey, comment: &str) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u8(7);
    buf.put_u32(key.n().bits() as u32);
    buf.put_mpint1(&key.n().to_bytes_be());
    buf.put_mpint1(&key.e().to_bytes_be());
    buf.put_mpint1(&key.d().to_bytes_be());
    buf.put_mpint1(&[1]);
    buf.put_mpint1(&key.primes()[1].to_bytes_be());
    buf.put_mpint1(&key.primes()[0].to_bytes_be());
    buf.put_string(comment.as_bytes());
    buf.freeze()
}

#[test]
fn test_ssh1_challenge() {
    let mut h = Harness::new();
    let rsa_key = RsaPrivateKey::new(&mut rand::rngs::OsRng, 512).unwrap();
    assert_eq!(h.ask(ssh1_add_message(&rsa_key, "old")).as_ref(), &[6]);
    assert_eq!(h.ask(ssh1_add_message(&rsa_key, "old")).as_ref(), &[5]);
    assert_eq!(h.agent.keys().count(KeyVersion::Ssh1), 1);

    let secret = [0x42u8; 32];
    let challenge = BigUint::from_bytes_be(&secret).modpow(rsa_key.e(), rsa_key.n());
    let session_id = [9u8; 16];

    let mut public = BytesMut::new();
    public.put_u32(rsa_key.n().bits() as u32);
    public.put_mpint1(&rsa_key.e().to_bytes_be());
    public.put_mpint1(&rsa_key.n().to_bytes_be());

    let mut body = public.clone();
    body.put_mpint1(&challenge.to_bytes_be());
    body.put_slice(&session_id);
    body.put_u32(1);
    let reply = h.ask(message(3, &body));

    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(secret);
    hasher.update(session_id);
    let expected: [u8; 16] = hasher.finalize().into();
    assert_eq!(reply[0], 4);
    assert_eq!(&reply[1..], &expected);

    let mut wrong_type = public.clone();
    wrong_type.put_mpint1(&challenge.to_bytes_be());
    wrong_type.put_slice(&session_id);
    wrong_type.put_u32(0);
    assert_eq!(h.ask(message(3, &wrong_type)).as_ref(), &[5]);

    assert_eq!(h.ask(message(8, &public)).as_ref(), &[6]);
    assert_eq!(h.agent.keys().count(KeyVersion::Ssh1), 0);
}

#[test]
fn test_query_extension() {
    let mut h = Harness::new();
    let reply = h.ask(extension(Extension::Query, &[]));
    assert_eq!(reply[0], 6);
    let mut reader = WireReader::new(reply.slice(1..));
    for ext in Extension::ALL {
        assert_eq!(reader.get_string("name").unwrap().as_ref(), ext.name().as_bytes());
    }
    assert!(reader.is_empty());
}

#[test]
fn test_unknown_extension_is_generic_failure() {
    let mut h = Harness::new();
    let mut body = BytesMut::new();
    body.put_u8(27);
    body.put_string(b"frobnicate@example.com");
    assert_eq!(h.ask(body.freeze()).as_ref(), &[5]);
    // recognised name, broken body
    assert_eq!(h.ask(extension(Extension::AddKeyFile, &[0, 0])).as_ref(), &[28]);
}

#[test]
fn test_encrypted_add_then_extended_list() {
    let mut h = Harness::new();
    let plain = ed25519("plain");
    h.ask(add_identity(&plain));
    let (_, blob) = add_encrypted(&mut h, "secret", "pw");

    let reply = h.ask(extension(Extension::ListExtended, &[]));
    assert_eq!(reply[0], 6);
    let mut reader = WireReader::new(reply.slice(1..));
    assert_eq!(reader.get_u32("count").unwrap(), 2);

    let mut seen = 0;
    for _ in 0..2 {
        let key_blob = reader.get_string("blob").unwrap();
        let _comment = reader.get_string("comment").unwrap();
        let flags = reader.get_string("flags").unwrap();
        let expected: u32 = if key_blob == blob { 3 } else { 0 };
        assert_eq!(flags.as_ref(), &expected.to_be_bytes());
        seen += 1;
    }
    assert_eq!(seen, 2);
    assert!(reader.is_empty());

    // the encrypted key shows up in the plain listing too
    let list = h.ask(message(11, &[]));
    assert_eq!(&list[1..5], &[0, 0, 0, 2]);
}

#[test]
fn test_encrypted_key_lists_with_its_comment() {
    let mut h = Harness::new();
    let (_, blob) = add_encrypted(&mut h, "work@laptop", "pw");

    let list = h.ask(message(11, &[]));
    let mut reader = WireReader::new(list.slice(1..));
    assert_eq!(reader.get_u32("count").unwrap(), 1);
    assert_eq!(reader.get_string("blob").unwrap(), blob);
    assert_eq!(reader.get_string("comment").unwrap().as_ref(), b"work@laptop");
    assert!(!h.agent.keys().find(KeyVersion::Ssh2, &blob).unwrap().has_cleartext());
}

#[test]
fn test_key_file_must_be_ppk() {
    let mut h = Harness::new();
    let key = ed25519("openssh");
    let openssh = key
        .encrypt(&mut rand::rngs::OsRng, "pw")
        .unwrap()
        .to_openssh(ssh_key::LineEnding::LF)
        .unwrap();
    let reply = h.ask(extension(Extension::AddKeyFile, &string(openssh.as_bytes())));
    assert_eq!(reply.as_ref(), &[28]);
    assert!(h.agent.keys().is_empty());

    // an unencrypted PPK file is added as a cleartext key
    let plain = ed25519("plain");
    let reply = h.ask(extension(Extension::AddKeyFile, &string(&plain_file(&plain))));
    assert_eq!(reply.as_ref(), &[6]);
    let record = h.agent.keys().find(KeyVersion::Ssh2, &blob_of(&plain)).unwrap();
    assert!(record.has_cleartext());
    assert!(record.encrypted.is_none());
    assert_eq!(record.comment, "plain");
}

#[test]
fn test_decrypt_wakes_all_waiters() {
    let mut h = Harness::new();
    let (key, blob) = add_encrypted(&mut h, "secret", "pw");

    let (a, mut rx_a) = h.connect();
    let (b, mut rx_b) = h.connect();
    h.send(a, sign_request(&blob, b"one", None));
    h.send(b, sign_request(&blob, b"two", None));
    h.send(a, sign_request(&blob, b"three", None));

    assert_eq!(h.prompts().len(), 1, "one prompt per key");
    assert!(rx_a.try_recv().is_err());
    assert!(rx_b.try_recv().is_err());
    assert_eq!(h.agent.pending_ops(), 3);

    h.supply(h.last_dialog(), "pw");

    let first = rx_a.try_recv().unwrap();
    let third = rx_a.try_recv().unwrap();
    let second = rx_b.try_recv().unwrap();
    assert!(first.request < third.request);
    for (reply, data) in [
        (&first, &b"one"[..]),
        (&second, &b"two"[..]),
        (&third, &b"three"[..]),
    ] {
        let sig = signature_of(reply);
        assert_eq!(sig, ssh2::sign(&key, data, SignFlags::NONE).unwrap());
    }
    assert!(!h.agent.prompt_open());
    assert_eq!(h.agent.pending_ops(), 0);

    let record = h.agent.keys().find(KeyVersion::Ssh2, &blob).unwrap();
    assert!(record.has_cleartext());
    assert_eq!(record.comment, "secret");
}

#[test]
fn test_single_prompt_across_keys() {
    let mut h = Harness::new();
    let (_, blob_a) = add_encrypted(&mut h, "a", "pa");
    let (_, blob_b) = add_encrypted(&mut h, "b", "pb");

    let (client, mut rx) = h.connect();
    h.send(client, sign_request(&blob_a, b"x", None));
    h.send(client, sign_request(&blob_b, b"y", None));
    assert_eq!(h.prompts().len(), 1);
    let first = h.last_dialog();

    h.refuse(first);
    let reply = rx.try_recv().unwrap();
    assert_eq!(reply.payload.as_ref(), &[5]);

    // the other key's waiter gets its own prompt once the first closes
    assert_eq!(h.prompts().len(), 2);
    assert!(h.agent.prompt_open());
    h.supply(h.last_dialog(), "pb");
    assert_eq!(rx.try_recv().unwrap().payload[0], 14);

    // refusal keeps the key
    assert!(h.agent.keys().find(KeyVersion::Ssh2, &blob_a).is_some());
}

#[test]
fn test_wrong_passphrase_prompts_again() {
    let mut h = Harness::new();
    let (_, blob) = add_encrypted(&mut h, "secret", "pw");
    let (client, mut rx) = h.connect();
    h.send(client, sign_request(&blob, b"x", None));

    h.supply(h.last_dialog(), "nope");
    assert!(rx.try_recv().is_err());
    assert_eq!(h.prompts().len(), 2);

    // an answer to the old dialog is ignored
    h.supply(h.prompts()[0].0, "pw");
    assert!(rx.try_recv().is_err());

    h.supply(h.last_dialog(), "pw");
    assert_eq!(rx.try_recv().unwrap().payload[0], 14);
}

#[test]
fn test_refusal_fails_every_waiter() {
    let mut h = Harness::new();
    let (_, blob) = add_encrypted(&mut h, "secret", "pw");
    let mut clients: Vec<_> = (0..3).map(|_| h.connect()).collect();
    for (client, _) in &clients {
        h.send(*client, sign_request(&blob, b"x", None));
    }
    assert_eq!(h.prompts().len(), 1);
    assert_eq!(h.agent.pending_ops(), 3);

    h.refuse(h.last_dialog());
    for (_, rx) in &mut clients {
        assert_eq!(rx.try_recv().unwrap().payload.as_ref(), &[5]);
    }
    assert_eq!(h.prompts().len(), 1);
    assert!(!h.agent.prompt_open());
    assert_eq!(h.agent.pending_ops(), 0);
}

#[test]
fn test_wrong_passphrase_prompts_for_next_waiter() {
    let mut h = Harness::new();
    let (_, blob) = add_encrypted(&mut h, "secret", "pw");
    let (a, mut rx_a) = h.connect();
    let (b, mut rx_b) = h.connect();
    h.send(a, sign_request(&blob, b"x", None));
    h.send(b, sign_request(&blob, b"y", None));
    let first = h.last_dialog();

    // the client the prompt was opened for goes away
    h.agent.handle_event(AgentEvent::Disconnect { client: a });
    h.supply(first, "nope");

    assert_eq!(h.prompts().len(), 2);
    assert!(h.agent.prompt_open());
    assert!(rx_b.try_recv().is_err());

    h.supply(h.last_dialog(), "pw");
    assert_eq!(rx_b.try_recv().unwrap().payload[0], 14);
    assert!(rx_a.try_recv().is_err());
}

#[test]
fn test_wrong_passphrase_without_waiters_does_not_prompt() {
    let mut h = Harness::new();
    let (_, blob) = add_encrypted(&mut h, "secret", "pw");
    let (client, _rx) = h.connect();
    h.send(client, sign_request(&blob, b"x", None));
    h.agent.handle_event(AgentEvent::Disconnect { client });
    assert_eq!(h.agent.pending_ops(), 0);

    h.supply(h.last_dialog(), "nope");
    assert_eq!(h.prompts().len(), 1);
    assert!(!h.agent.prompt_open());
}

#[test]
fn test_cannot_prompt_fails_request() {
    let mut h = Harness::with_prompts(false);
    let (_, blob) = add_encrypted(&mut h, "secret", "pw");
    assert_eq!(h.ask(sign_request(&blob, b"x", None)).as_ref(), &[5]);
    assert_eq!(h.agent.pending_ops(), 0);
}

#[test]
fn test_deleting_key_fails_pending_sign() {
    let mut h = Harness::new();
    let (_, blob) = add_encrypted(&mut h, "secret", "pw");
    let (client, mut rx) = h.connect();
    h.send(client, sign_request(&blob, b"x", None));

    assert_eq!(h.ask(message(18, &string(&blob))).as_ref(), &[6]);
    assert_eq!(rx.try_recv().unwrap().payload.as_ref(), &[5]);
    assert_eq!(h.agent.pending_ops(), 0);

    // the prompt slot is held until its dialog resolves
    assert!(h.agent.prompt_open());
    h.supply(h.last_dialog(), "pw");
    assert!(!h.agent.prompt_open());
}

#[test]
fn test_disconnect_discards_without_reply() {
    let mut h = Harness::new();
    let (_, blob) = add_encrypted(&mut h, "secret", "pw");
    let (a, mut rx_a) = h.connect();
    let (b, mut rx_b) = h.connect();
    h.send(a, sign_request(&blob, b"x", None));
    h.send(b, sign_request(&blob, b"y", None));

    h.agent.handle_event(AgentEvent::Disconnect { client: a });
    assert_eq!(h.agent.pending_ops(), 1);

    h.supply(h.last_dialog(), "pw");
    assert!(rx_a.try_recv().is_err());
    assert_eq!(rx_b.try_recv().unwrap().payload[0], 14);
}

#[test]
fn test_reencrypt_roundtrip_signs_identically() {
    let mut h = Harness::new();
    let (_, blob) = add_encrypted(&mut h, "secret", "pw");
    let (client, mut rx) = h.connect();

    h.send(client, sign_request(&blob, b"data", None));
    h.supply(h.last_dialog(), "pw");
    let before = signature_of(&rx.try_recv().unwrap());

    let reply = h.ask(extension(Extension::Reencrypt, &string(&blob)));
    assert_eq!(reply.as_ref(), &[6]);
    assert!(!h.agent.keys().find(KeyVersion::Ssh2, &blob).unwrap().has_cleartext());
    // already encrypted is fine
    assert_eq!(
        h.ask(extension(Extension::Reencrypt, &string(&blob))).as_ref(),
        &[6]
    );

    h.send(client, sign_request(&blob, b"data", None));
    assert_eq!(h.prompts().len(), 2);
    h.supply(h.last_dialog(), "pw");
    let after = signature_of(&rx.try_recv().unwrap());
    assert_eq!(before, after);
}

#[test]
fn test_reencrypt_fails_waiters() {
    let mut h = Harness::new();
    let (key, blob) = add_encrypted(&mut h, "secret", "pw");
    h.ask(add_identity(&key));
    assert_eq!(h.ask(extension(Extension::Reencrypt, &string(&blob))).as_ref(), &[6]);

    let (client, mut rx) = h.connect();
    h.send(client, sign_request(&blob, b"x", None));
    assert!(rx.try_recv().is_err());

    assert_eq!(h.agent.reencrypt_key(&blob), Ok(()));
    assert_eq!(rx.try_recv().unwrap().payload.as_ref(), &[5]);
}

#[test]
fn test_reencrypt_detaches_open_prompt() {
    let mut h = Harness::new();
    let (_, blob) = add_encrypted(&mut h, "secret", "pw");
    let (client, mut rx) = h.connect();
    h.send(client, sign_request(&blob, b"x", None));
    let stale = h.last_dialog();

    assert_eq!(h.ask(extension(Extension::Reencrypt, &string(&blob))).as_ref(), &[6]);
    assert_eq!(rx.try_recv().unwrap().payload.as_ref(), &[5]);

    // a new request waits for the old dialog to close
    h.send(client, sign_request(&blob, b"y", None));
    assert_eq!(h.prompts().len(), 1);

    // the answer to the old dialog does not decrypt the key
    h.supply(stale, "pw");
    assert!(!h.agent.keys().find(KeyVersion::Ssh2, &blob).unwrap().has_cleartext());
    assert!(rx.try_recv().is_err());
    assert_eq!(h.prompts().len(), 2);

    h.supply(h.last_dialog(), "pw");
    assert_eq!(rx.try_recv().unwrap().payload[0], 14);
}

#[test]
fn test_reencrypt_all_with_only_cleartext_keys() {
    let mut h = Harness::new();
    assert_eq!(
        h.ask(extension(Extension::ReencryptAll, &[])).as_ref(),
        &[6, 0, 0, 0, 0]
    );

    for name in ["a", "b"] {
        h.ask(add_identity(&ed25519(name)));
    }
    assert_eq!(h.ask(extension(Extension::ReencryptAll, &[])).as_ref(), &[28]);
    assert!(h.agent.keys().iter().all(|r| r.has_cleartext()));
}

#[test]
fn test_reencrypt_failures_are_extension_failures() {
    let mut h = Harness::new();
    let plain = ed25519("plain");

    assert_eq!(
        h.ask(extension(Extension::Reencrypt, &string(&blob_of(&plain)))).as_ref(),
        &[28]
    );
    assert_eq!(
        h.ask(extension(Extension::ReencryptAll, &[])).as_ref(),
        &[6, 0, 0, 0, 0]
    );

    h.ask(add_identity(&plain));
    assert_eq!(
        h.ask(extension(Extension::Reencrypt, &string(&blob_of(&plain)))).as_ref(),
        &[28]
    );
    assert_eq!(h.ask(extension(Extension::ReencryptAll, &[])).as_ref(), &[28]);

    let (secret, blob) = add_encrypted(&mut h, "secret", "pw");
    h.ask(add_identity(&secret));
    assert!(h.agent.keys().find(KeyVersion::Ssh2, &blob).unwrap().has_cleartext());
    assert_eq!(
        h.ask(extension(Extension::ReencryptAll, &[])).as_ref(),
        &[6, 0, 0, 0, 1]
    );
    assert!(!h.agent.keys().find(KeyVersion::Ssh2, &blob).unwrap().has_cleartext());
}

#[test]
fn test_adding_cleartext_wakes_waiters() {
    let mut h = Harness::new();
    let (key, blob) = add_encrypted(&mut h, "secret", "pw");
    let (client, mut rx) = h.connect();
    h.send(client, sign_request(&blob, b"x", None));
    assert!(rx.try_recv().is_err());

    assert_eq!(h.ask(add_identity(&key)).as_ref(), &[6]);
    assert_eq!(rx.try_recv().unwrap().payload[0], 14);
    assert_eq!(h.ask(add_identity(&key)).as_ref(), &[5]);
}

#[test]
fn test_key_file_attaches_to_cleartext_key() {
    let mut h = Harness::new();
    let key = ed25519("both");
    h.ask(add_identity(&key));
    let file = encrypted_file(&key, "pw");

    let add = extension(Extension::AddKeyFile, &string(&file));
    assert_eq!(h.ask(add.clone()).as_ref(), &[6]);
    assert_eq!(h.ask(add).as_ref(), &[28]);

    let record = h.agent.keys().find(KeyVersion::Ssh2, &blob_of(&key)).unwrap();
    assert!(record.has_cleartext());
    assert!(record.encrypted.is_some());
}

#[test]
fn test_index_helpers() {
    let mut h = Harness::new();
    for name in ["a", "b", "c"] {
        h.ask(add_identity(&ed25519(name)));
    }
    assert!(h.agent.delete_nth_key(KeyVersion::Ssh2, 1));
    assert!(!h.agent.delete_nth_key(KeyVersion::Ssh2, 2));
    assert_eq!(h.agent.keys().len(), 2);
    assert_eq!(
        h.agent.reencrypt_nth_key(0),
        Err(ReencryptError::Unsupported)
    );
    assert_eq!(h.agent.reencrypt_nth_key(5), Err(ReencryptError::NotFound));
    h.agent.delete_all_keys();
    assert!(h.agent.keys().is_empty());
}

#[test]
fn test_query_local() {
    let mut h = Harness::new();
    let key = ed25519("local");
    assert_eq!(h.agent.query_local(add_identity(&key)).unwrap().as_ref(), &[6]);
    let list = h.agent.query_local(message(11, &[])).unwrap();
    assert_eq!(&list[..5], &[12, 0, 0, 0, 1]);

    // an encrypted key can't be used without prompting
    let (_, blob) = add_encrypted(&mut h, "secret", "pw");
    let reply = h.agent.query_local(sign_request(&blob, b"x", None));
    assert_eq!(reply.unwrap().as_ref(), &[5]);
    assert!(h.prompts().is_empty());
    assert_eq!(h.agent.pending_ops(), 0);
}

#[test]
fn test_query_local_abandons_blocked_request() {
    let mut h = Harness::new();
    let (_, blob_a) = add_encrypted(&mut h, "a", "pa");
    let (_, blob_b) = add_encrypted(&mut h, "b", "pb");
    let (client, _rx) = h.connect();
    h.send(client, sign_request(&blob_a, b"x", None));

    // waits behind the open prompt, so there is no answer yet
    assert!(h.agent.query_local(sign_request(&blob_b, b"y", None)).is_none());
    assert_eq!(h.agent.pending_ops(), 1);
}

#[test]
fn test_shutdown_fails_waiters() {
    let mut h = Harness::new();
    let (_, blob) = add_encrypted(&mut h, "secret", "pw");
    let (client, mut rx) = h.connect();
    h.send(client, sign_request(&blob, b"x", None));

    h.agent.shutdown();
    assert_eq!(rx.try_recv().unwrap().payload.as_ref(), &[5]);
    assert!(h.agent.keys().is_empty());
    assert!(!h.agent.prompt_open());
}
