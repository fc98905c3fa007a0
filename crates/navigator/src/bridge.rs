//! In-process delivery of backend-emitted events.
//!
//! Every subscription owns an unbounded queue, so a burst from the backend
//! (a large directory listing is emitted in one go) is never dropped, and
//! unsubscribing one never disturbs the others. A subscriber whose backlog
//! grows past the configured threshold is reported once per episode.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::mpsc;

use crate::error::{NavigatorError, Result};

pub const DEFAULT_BACKLOG_WARNING: usize = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub channel: String,
    /// Per-channel sequence number, starting at 1.
    pub sequence: u64,
    pub payload: serde_json::Value,
}

impl EventEnvelope {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.payload.clone()).map_err(NavigatorError::from)
    }
}

#[derive(Debug, Default)]
struct ChannelState {
    subscribers: Vec<mpsc::UnboundedSender<EventEnvelope>>,
    sequence: u64,
}

#[derive(Debug, Default)]
struct BridgeState {
    channels: HashMap<String, ChannelState>,
    shut_down: bool,
}

#[derive(Debug)]
pub struct EventBridge {
    backlog_warning: usize,
    state: RwLock<BridgeState>,
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new(DEFAULT_BACKLOG_WARNING)
    }
}

impl EventBridge {
    /// `backlog_warning` is the number of undelivered events a subscriber may
    /// accumulate before a warning is logged. Nothing is ever dropped.
    pub fn new(backlog_warning: usize) -> Self {
        Self {
            backlog_warning: backlog_warning.max(1),
            state: RwLock::new(BridgeState::default()),
        }
    }

    /// Opens a new subscription on `channel`.
    pub fn subscribe(&self, channel: &str) -> Result<Subscription> {
        let mut state = self.state.write();
        if state.shut_down {
            return Err(NavigatorError::Subscription(format!(
                "event bridge is shut down, cannot listen on {channel}"
            )));
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        state
            .channels
            .entry(channel.to_string())
            .or_default()
            .subscribers
            .push(sender);
        Ok(Subscription {
            channel: channel.to_string(),
            receiver,
            backlog_warning: self.backlog_warning,
            warned: false,
        })
    }

    /// Serializes `payload` and fans it out to every subscriber of `channel`.
    ///
    /// Emitting to a channel without subscribers still advances its sequence.
    pub fn emit<T: Serialize>(&self, channel: &str, payload: &T) -> Result<EventEnvelope> {
        let payload = serde_json::to_value(payload)?;
        let mut state = self.state.write();
        if state.shut_down {
            return Err(NavigatorError::Subscription(format!(
                "event bridge is shut down, cannot emit on {channel}"
            )));
        }
        let entry = state.channels.entry(channel.to_string()).or_default();
        entry.sequence += 1;
        let envelope = EventEnvelope {
            channel: channel.to_string(),
            sequence: entry.sequence,
            payload,
        };
        // Dropped subscriptions are pruned here.
        entry
            .subscribers
            .retain(|subscriber| subscriber.send(envelope.clone()).is_ok());
        Ok(envelope)
    }

    /// Drops `channel`. Live subscriptions drain what is queued, then end.
    pub fn close(&self, channel: &str) -> bool {
        self.state.write().channels.remove(channel).is_some()
    }

    /// Last sequence number emitted on `channel` (0 if none).
    pub fn sequence(&self, channel: &str) -> u64 {
        self.state
            .read()
            .channels
            .get(channel)
            .map(|entry| entry.sequence)
            .unwrap_or(0)
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .read()
            .channels
            .get(channel)
            .map(|entry| {
                entry
                    .subscribers
                    .iter()
                    .filter(|subscriber| !subscriber.is_closed())
                    .count()
            })
            .unwrap_or(0)
    }

    /// Closes every channel and refuses new subscriptions and emissions.
    pub fn shutdown(&self) {
        let mut state = self.state.write();
        state.shut_down = true;
        state.channels.clear();
    }
}

/// A live listener on one channel. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    receiver: mpsc::UnboundedReceiver<EventEnvelope>,
    backlog_warning: usize,
    warned: bool,
}

impl Subscription {
    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next event, or `None` once the channel was closed and drained.
    pub async fn recv(&mut self) -> Option<EventEnvelope> {
        let envelope = self.receiver.recv().await?;
        self.check_backlog();
        Some(envelope)
    }

    /// Next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<EventEnvelope> {
        let envelope = self.receiver.try_recv().ok()?;
        self.check_backlog();
        Some(envelope)
    }

    /// Number of events queued and not yet received.
    pub fn backlog(&self) -> usize {
        self.receiver.len()
    }

    fn check_backlog(&mut self) {
        let backlog = self.receiver.len();
        if backlog >= self.backlog_warning {
            if !self.warned {
                log::warn!(
                    "event subscriber on {} is {} events behind",
                    self.channel,
                    backlog
                );
                self.warned = true;
            }
        } else {
            self.warned = false;
        }
    }

    pub fn unsubscribe(self) {
        log::debug!("unsubscribed from {}", self.channel);
    }
}
