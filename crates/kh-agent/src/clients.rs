//! Connected clients and the operations each one owns

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use kh_core::{ClientId, RequestId};

use crate::ops::OpId;

/// A reply travelling back to a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Request being answered
    pub request: RequestId,
    /// Complete reply body (type byte first)
    pub payload: Bytes,
}

/// Channel the agent delivers a client's replies on
pub type ReplySink = mpsc::UnboundedSender<Reply>;

/// Source of client identifiers, shared between the agent and its listeners
#[derive(Debug, Clone, Default)]
pub struct ClientIdAllocator(Arc<AtomicU64>);

impl ClientIdAllocator {
    pub fn next(&self) -> ClientId {
        ClientId::new(self.0.fetch_add(1, Ordering::Relaxed))
    }
}

/// A connected logical client
#[derive(Debug)]
pub struct ClientHandle {
    sink: ReplySink,
    /// Operations still outstanding for this client
    pub ops: BTreeSet<OpId>,
    /// Don't log this client's requests (in-process queries)
    pub suppress_logging: bool,
    /// Whether requests from this client may open passphrase prompts
    pub can_prompt: bool,
}

impl ClientHandle {
    /// A socket client
    pub fn new(sink: ReplySink) -> Self {
        Self {
            sink,
            ops: BTreeSet::new(),
            suppress_logging: false,
            can_prompt: true,
        }
    }

    /// An in-process client: silent and unable to prompt
    pub fn internal(sink: ReplySink) -> Self {
        Self {
            sink,
            ops: BTreeSet::new(),
            suppress_logging: true,
            can_prompt: false,
        }
    }

    /// Deliver a reply; false if the client has gone away
    pub fn send(&self, request: RequestId, payload: Bytes) -> bool {
        self.sink.send(Reply { request, payload }).is_ok()
    }
}

/// Every connected client
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: HashMap<ClientId, ClientHandle>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, id: ClientId, handle: ClientHandle) {
        self.clients.insert(id, handle);
    }

    /// Remove a client, handing back whatever it still owned
    pub fn unregister(&mut self, id: ClientId) -> Option<ClientHandle> {
        self.clients.remove(&id)
    }

    pub fn get(&self, id: ClientId) -> Option<&ClientHandle> {
        self.clients.get(&id)
    }

    pub fn get_mut(&mut self, id: ClientId) -> Option<&mut ClientHandle> {
        self.clients.get_mut(&id)
    }

    /// Identifiers of every client
    pub fn ids(&self) -> Vec<ClientId> {
        self.clients.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
