//! Events that drive the agent

use bytes::Bytes;
use zeroize::Zeroizing;

use kh_core::{ClientId, DialogId, RequestId};

use crate::clients::ReplySink;

/// Everything the agent task reacts to
pub enum AgentEvent {
    /// A client connected; its replies go to `replies`
    Connect { client: ClientId, replies: ReplySink },

    /// A complete request message arrived
    Request {
        client: ClientId,
        request: RequestId,
        message: Bytes,
    },

    /// A client went away
    Disconnect { client: ClientId },

    /// The user typed a passphrase into a prompt
    PassphraseSupplied {
        dialog: DialogId,
        passphrase: Zeroizing<String>,
    },

    /// The user dismissed a prompt, or it could not complete
    PassphraseRefused { dialog: DialogId },
}

impl std::fmt::Debug for AgentEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentEvent::Connect { client, .. } => {
                f.debug_struct("Connect").field("client", client).finish()
            }
            AgentEvent::Request {
                client,
                request,
                message,
            } => f
                .debug_struct("Request")
                .field("client", client)
                .field("request", request)
                .field("len", &message.len())
                .finish(),
            AgentEvent::Disconnect { client } => {
                f.debug_struct("Disconnect").field("client", client).finish()
            }
            AgentEvent::PassphraseSupplied { dialog, .. } => f
                .debug_struct("PassphraseSupplied")
                .field("dialog", dialog)
                .finish_non_exhaustive(),
            AgentEvent::PassphraseRefused { dialog } => f
                .debug_struct("PassphraseRefused")
                .field("dialog", dialog)
                .finish(),
        }
    }
}
