//! One client connection
//!
//! Requests are forwarded to the agent task as soon as they are framed.
//! Replies can come back in any order, so each request takes a slot in a
//! [`ResponseQueue`] and replies are written strictly in slot order.

use std::collections::VecDeque;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use kh_core::{ClientId, RequestId};
use kh_protocol::{AgentCodec, Frame, MessageType, ProtocolError};

use crate::event::AgentEvent;

/// Reply slots for one connection, in request order
#[derive(Debug, Default)]
pub struct ResponseQueue {
    next_id: u64,
    slots: VecDeque<(RequestId, Option<Bytes>)>,
}

impl ResponseQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the slot for the next request
    pub fn push(&mut self) -> RequestId {
        let id = RequestId::new(self.next_id);
        self.next_id += 1;
        self.slots.push_back((id, None));
        id
    }

    /// Fill in the reply for a request; false if there is no such slot
    pub fn complete(&mut self, id: RequestId, payload: Bytes) -> bool {
        match self.slots.iter_mut().find(|(slot, _)| *slot == id) {
            Some((_, reply)) => {
                *reply = Some(payload);
                true
            }
            None => false,
        }
    }

    /// Take the oldest reply, if it is ready
    pub fn pop_ready(&mut self) -> Option<Bytes> {
        if self.slots.front().is_some_and(|(_, reply)| reply.is_some()) {
            self.slots.pop_front().and_then(|(_, reply)| reply)
        } else {
            None
        }
    }

    /// Number of requests not yet written back
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

/// Serve one connection until the peer hangs up or the agent shuts down
pub async fn serve_connection(
    stream: UnixStream,
    client: ClientId,
    events: mpsc::Sender<AgentEvent>,
    cancel: CancellationToken,
) -> Result<(), ProtocolError> {
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    if events
        .send(AgentEvent::Connect {
            client,
            replies: reply_tx,
        })
        .await
        .is_err()
    {
        return Ok(());
    }

    let mut framed = Framed::new(stream, AgentCodec::new());
    let mut queue = ResponseQueue::new();
    let mut reading = true;

    let result = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),

            frame = framed.next(), if reading => {
                match frame {
                    Some(Ok(Frame::Message(message))) => {
                        let request = queue.push();
                        let event = AgentEvent::Request { client, request, message };
                        if events.send(event).await.is_err() {
                            break Ok(());
                        }
                    }
                    Some(Ok(Frame::Oversized { len })) => {
                        tracing::debug!(conn = %client, len, "discarding oversized message");
                        let request = queue.push();
                        queue.complete(request, Bytes::copy_from_slice(&[MessageType::Failure.as_u8()]));
                    }
                    Some(Err(e)) => break Err(e),
                    // Peer stopped sending; answer what it already asked
                    None => reading = false,
                }
            }

            reply = reply_rx.recv() => {
                match reply {
                    Some(reply) => {
                        if !queue.complete(reply.request, reply.payload) {
                            tracing::warn!(conn = %client, req = %reply.request, "reply for unknown request");
                        }
                    }
                    None => break Ok(()),
                }
            }
        }

        if let Err(e) = write_ready(&mut framed, &mut queue).await {
            break Err(e);
        }
        if !reading && queue.is_empty() {
            break Ok(());
        }
    };

    let _ = events.send(AgentEvent::Disconnect { client }).await;
    result
}

async fn write_ready(
    framed: &mut Framed<UnixStream, AgentCodec>,
    queue: &mut ResponseQueue,
) -> Result<(), ProtocolError> {
    while let Some(payload) = queue.pop_ready() {
        framed.feed(payload).await?;
    }
    framed.flush().await
}
