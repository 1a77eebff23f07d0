//! Resumable agent operations
//!
//! Every request becomes an [`Operation`] owned by the [`OpTable`]. Most
//! carry a reply computed up front; sign operations may suspend while the
//! key they need is waiting for a passphrase. Operations are addressed by
//! [`OpId`]s that are never reused, so a handle left behind in a run queue
//! or a key's blocked list after its operation went away simply fails to
//! look up.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use bytes::Bytes;

use kh_core::{ClientId, RequestId};
use kh_protocol::SignFlags;

use crate::agent::HandlerResult;
use crate::keystore::SortKey;

/// Handle of one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OpId(u64);

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// "Sign this data with this key"
#[derive(Debug)]
pub struct SignOp {
    /// Key to sign with
    pub key: SortKey,
    /// Data to sign
    pub data: Bytes,
    /// Flags from the request
    pub flags: SignFlags,
}

impl SignOp {
    pub fn new(key: SortKey, data: Bytes, flags: SignFlags) -> Self {
        Self { key, data, flags }
    }
}

/// Variant state of an operation
#[derive(Debug)]
pub enum OpKind {
    /// Reply already known
    Immediate(HandlerResult),
    /// Signature that may need a passphrase first
    Sign(SignOp),
}

/// One in-flight request
#[derive(Debug)]
pub struct Operation {
    /// Client that sent the request
    pub client: ClientId,
    /// Request within that client
    pub request: RequestId,
    /// What remains to be done
    pub kind: OpKind,
}

/// Result of running an operation until it can go no further
#[derive(Debug)]
pub enum Step {
    /// Suspended; something else will reschedule it
    Pending,
    /// Finished with this reply
    Ready(HandlerResult),
}

/// Owner of every in-flight operation, plus the run queue
#[derive(Debug, Default)]
pub struct OpTable {
    next_id: u64,
    ops: HashMap<OpId, Operation>,
    run_queue: VecDeque<OpId>,
}

impl OpTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of a new operation and return its handle
    pub fn insert(&mut self, op: Operation) -> OpId {
        let id = OpId(self.next_id);
        self.next_id += 1;
        self.ops.insert(id, op);
        id
    }

    /// Look up an operation
    pub fn get(&self, id: OpId) -> Option<&Operation> {
        self.ops.get(&id)
    }

    pub fn contains(&self, id: OpId) -> bool {
        self.ops.contains_key(&id)
    }

    /// Remove an operation, e.g. to run it or to discard it
    pub fn take(&mut self, id: OpId) -> Option<Operation> {
        self.ops.remove(&id)
    }

    /// Put back an operation that was taken out to run and is still pending
    pub fn restore(&mut self, id: OpId, op: Operation) {
        self.ops.insert(id, op);
    }

    /// Queue an operation to be resumed
    pub fn schedule(&mut self, id: OpId) {
        self.run_queue.push_back(id);
    }

    /// Next queued handle that still refers to a live operation
    pub fn next_scheduled(&mut self) -> Option<OpId> {
        while let Some(id) = self.run_queue.pop_front() {
            if self.ops.contains_key(&id) {
                return Some(id);
            }
        }
        None
    }

    /// Number of live operations
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}
