//! The agent task
//!
//! Owns the [`Agent`] and feeds it events until shutdown.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::agent::Agent;
use crate::event::AgentEvent;

/// Capacity of the event channel shared by connections and prompts
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Process events until cancelled or every sender is gone, then shut the
/// agent down and hand it back
pub async fn run_agent(
    mut agent: Agent,
    mut events: mpsc::Receiver<AgentEvent>,
    cancel: CancellationToken,
) -> Agent {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Agent task shutting down");
                break;
            }

            event = events.recv() => {
                match event {
                    Some(event) => {
                        tracing::trace!(?event, "agent event");
                        agent.handle_event(event);
                    }
                    None => break,
                }
            }
        }
    }

    agent.shutdown();
    agent
}
