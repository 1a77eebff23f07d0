//! The agent: key store, clients and in-flight operations
//!
//! One [`Agent`] owns every piece of mutable state and is driven by a
//! single task, one [`AgentEvent`] at a time. After each event the run
//! queue is drained, so every operation that can make progress has done so
//! before the next event is looked at.
//!
//! Sign requests for keys held only in encrypted form suspend until a
//! passphrase outcome arrives. At most one passphrase prompt is open at a
//! time across the whole agent.

mod dispatch;
mod extension;
mod passphrase;
mod reply;
mod sign;

pub use reply::{Failure, HandlerResult};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use kh_core::{ClientId, DialogId, KeyVersion, RequestId};

use crate::clients::{ClientHandle, ClientIdAllocator, ClientRegistry, ReplySink};
use crate::event::AgentEvent;
use crate::keystore::{KeyRecord, KeyStore, SortKey};
use crate::ops::{OpId, OpKind, OpTable, Operation, Step};
use crate::prompt::PassphrasePrompter;

use reply::RequestLog;

/// Reason given to sign requests whose key disappears under them
pub const KEY_DELETED: &str = "key deleted from agent while signing request was pending";

/// Reason given to sign requests whose key is re-encrypted under them
pub const KEY_REENCRYPTED: &str = "key re-encrypted while signing request was pending";

/// The passphrase prompt currently open
#[derive(Debug)]
struct ActivePrompt {
    dialog: DialogId,
    key: SortKey,
}

/// Why a key could not be re-encrypted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReencryptError {
    NotFound,
    Unsupported,
}

/// Tally of a bulk re-encryption
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReencryptSummary {
    pub succeeded: u32,
    pub failed: u32,
}

/// SSH authentication agent state
pub struct Agent {
    keys: KeyStore,
    clients: ClientRegistry,
    ops: OpTable,
    prompt: Option<ActivePrompt>,
    prompter: Box<dyn PassphrasePrompter>,
    next_dialog: u64,
    client_ids: ClientIdAllocator,
}

impl Agent {
    pub fn new(prompter: Box<dyn PassphrasePrompter>) -> Self {
        Self {
            keys: KeyStore::new(),
            clients: ClientRegistry::new(),
            ops: OpTable::new(),
            prompt: None,
            prompter,
            next_dialog: 0,
            client_ids: ClientIdAllocator::default(),
        }
    }

    /// Allocator for identifiers of clients that connect later
    pub fn client_ids(&self) -> ClientIdAllocator {
        self.client_ids.clone()
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    /// Whether a passphrase prompt is open
    pub fn prompt_open(&self) -> bool {
        self.prompt.is_some()
    }

    /// Number of requests not yet answered
    pub fn pending_ops(&self) -> usize {
        self.ops.len()
    }

    /// Process one event, then run everything it made runnable
    pub fn handle_event(&mut self, event: AgentEvent) {
        match event {
            AgentEvent::Connect { client, replies } => self.connect(client, replies),
            AgentEvent::Request {
                client,
                request,
                message,
            } => self.request(client, request, message),
            AgentEvent::Disconnect { client } => self.disconnect(client),
            AgentEvent::PassphraseSupplied { dialog, passphrase } => {
                self.passphrase_supplied(dialog, passphrase)
            }
            AgentEvent::PassphraseRefused { dialog } => self.passphrase_refused(dialog),
        }
        self.run_queue();
    }

    fn connect(&mut self, client: ClientId, replies: ReplySink) {
        debug!(conn = %client, "client connected");
        self.clients.register(client, ClientHandle::new(replies));
    }

    /// Drop a client and every operation it still owns, without replying
    fn disconnect(&mut self, client: ClientId) {
        let Some(handle) = self.clients.unregister(client) else {
            return;
        };
        let abandoned = handle.ops.len();
        for id in handle.ops {
            self.discard(id);
        }
        debug!(conn = %client, abandoned, "client disconnected");
    }

    fn discard(&mut self, id: OpId) {
        let Some(op) = self.ops.take(id) else {
            return;
        };
        if let OpKind::Sign(sign) = &op.kind {
            if let Some(record) = self.keys.get_mut(&sign.key) {
                record.blocked.retain(|&blocked| blocked != id);
            }
        }
    }

    fn request_log(&self, client: ClientId, request: RequestId) -> RequestLog {
        let quiet = self
            .clients
            .get(client)
            .map_or(true, |handle| handle.suppress_logging);
        RequestLog::new(client, request, quiet)
    }

    fn request(&mut self, client: ClientId, request: RequestId, message: Bytes) {
        if self.clients.get(client).is_none() {
            warn!(conn = %client, req = %request, "request from unknown client dropped");
            return;
        }
        let log = self.request_log(client, request);
        let kind = self.dispatch(&log, message);
        let id = self.ops.insert(Operation {
            client,
            request,
            kind,
        });
        if let Some(handle) = self.clients.get_mut(client) {
            handle.ops.insert(id);
        }
        self.ops.schedule(id);
    }

    /// Resume scheduled operations until none are left
    fn run_queue(&mut self) {
        while let Some(id) = self.ops.next_scheduled() {
            let Some(op) = self.ops.take(id) else {
                continue;
            };
            let Operation {
                client,
                request,
                kind,
            } = op;
            match kind {
                OpKind::Immediate(result) => self.complete(id, client, request, result),
                OpKind::Sign(sign) => match self.resume_sign(id, client, request, &sign) {
                    Step::Pending => self.ops.restore(
                        id,
                        Operation {
                            client,
                            request,
                            kind: OpKind::Sign(sign),
                        },
                    ),
                    Step::Ready(result) => self.complete(id, client, request, result),
                },
            }
        }
    }

    /// Send the reply for an operation that has already left the table
    fn complete(&mut self, id: OpId, client: ClientId, request: RequestId, result: HandlerResult) {
        let log = self.request_log(client, request);
        let Some(handle) = self.clients.get_mut(client) else {
            return;
        };
        handle.ops.remove(&id);
        log.reply(&result);
        let payload = match result {
            Ok(payload) => payload,
            Err(failure) => failure.payload(),
        };
        if !handle.send(request, payload) {
            debug!(conn = %client, req = %request, "client went away before reply");
        }
    }

    /// Fail the given operations with the same reason
    fn fail_ops(&mut self, ids: impl IntoIterator<Item = OpId>, reason: &str) {
        for id in ids {
            if let Some(op) = self.ops.take(id) {
                self.complete(id, op.client, op.request, Err(Failure::generic(reason)));
            }
        }
    }

    fn fail_blocked(&mut self, key: &SortKey, reason: &str) {
        let Some(record) = self.keys.get_mut(key) else {
            return;
        };
        let blocked: Vec<OpId> = record.blocked.drain(..).collect();
        self.fail_ops(blocked, reason);
    }

    /// Schedule every operation waiting on a key, oldest first
    fn wake_blocked(&mut self, key: &SortKey) {
        let Some(record) = self.keys.get_mut(key) else {
            return;
        };
        for id in record.blocked.drain(..) {
            self.ops.schedule(id);
        }
    }

    fn forget_records(&mut self, records: Vec<KeyRecord>) {
        for mut record in records {
            let blocked: Vec<OpId> = record.blocked.drain(..).collect();
            self.fail_ops(blocked, KEY_DELETED);
        }
    }

    /// Remove one key; false if it was not present
    pub fn remove_key(&mut self, version: KeyVersion, blob: &[u8]) -> bool {
        match self.keys.remove(version, blob) {
            Some(record) => {
                self.forget_records(vec![record]);
                true
            }
            None => false,
        }
    }

    /// Remove every key of one version
    pub fn remove_all_keys(&mut self, version: KeyVersion) {
        let removed = self.keys.remove_all(version);
        self.forget_records(removed);
    }

    /// Remove the `index`-th key of one version; false if out of range
    pub fn delete_nth_key(&mut self, version: KeyVersion, index: usize) -> bool {
        let Some(blob) = self.keys.nth(version, index).map(|r| r.blob().clone()) else {
            return false;
        };
        self.remove_key(version, &blob)
    }

    /// Remove every key
    pub fn delete_all_keys(&mut self) {
        let removed = self.keys.clear();
        self.forget_records(removed);
    }

    /// Forget the cleartext of one SSH-2 key
    pub fn reencrypt_key(&mut self, blob: &[u8]) -> Result<(), ReencryptError> {
        let record = self
            .keys
            .find_mut(KeyVersion::Ssh2, blob)
            .ok_or(ReencryptError::NotFound)?;
        if !record.reencrypt() {
            return Err(ReencryptError::Unsupported);
        }
        let key = record.sort_key();
        self.fail_blocked(&key, KEY_REENCRYPTED);
        Ok(())
    }

    /// Forget the cleartext of the `index`-th SSH-2 key
    pub fn reencrypt_nth_key(&mut self, index: usize) -> Result<(), ReencryptError> {
        let blob = self
            .keys
            .nth(KeyVersion::Ssh2, index)
            .map(|r| r.blob().clone())
            .ok_or(ReencryptError::NotFound)?;
        self.reencrypt_key(&blob)
    }

    /// Forget the cleartext of every key that can be re-decrypted later
    pub fn reencrypt_all_keys(&mut self) -> ReencryptSummary {
        let mut summary = ReencryptSummary::default();
        let mut reencrypted = Vec::new();
        for record in self.keys.iter_mut() {
            if record.reencrypt() {
                summary.succeeded += 1;
                reencrypted.push(record.sort_key());
            } else {
                summary.failed += 1;
            }
        }
        for key in &reencrypted {
            self.fail_blocked(key, KEY_REENCRYPTED);
        }
        summary
    }

    /// Run a request on behalf of the agent itself
    ///
    /// The request is handled by a client that logs nothing and cannot open
    /// passphrase prompts. Returns `None` if it could not be answered
    /// straight away, in which case it is abandoned.
    pub fn query_local(&mut self, message: Bytes) -> Option<Bytes> {
        let client = self.client_ids.next();
        let (tx, mut rx) = mpsc::unbounded_channel();
        self.clients.register(client, ClientHandle::internal(tx));
        self.request(client, RequestId::new(0), message);
        self.run_queue();
        let reply = rx.try_recv().ok().map(|reply| reply.payload);
        self.disconnect(client);
        reply
    }

    /// Fail every outstanding sign request and drop all keys
    pub fn shutdown(&mut self) {
        let keys = self.keys.len();
        self.delete_all_keys();
        self.prompt = None;
        for client in self.clients.ids() {
            self.disconnect(client);
        }
        info!(keys, "agent shut down");
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("keys", &self.keys.len())
            .field("clients", &self.clients.len())
            .field("ops", &self.ops.len())
            .field("prompt", &self.prompt)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests;
