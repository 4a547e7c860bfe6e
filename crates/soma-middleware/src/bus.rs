//! Per-instance, typed publish/subscribe event bus.
//!
//! Every manager, monitor and component owns its own [`EventBus`]; there is
//! no process-wide bus.  The bus wraps a [`tokio::sync::broadcast`] channel
//! so that every subscriber receives every message without any single
//! subscriber blocking the publisher.
//!
//! Subscribers that only care about some notifications use
//! [`EventBus::subscribe_kinds`], which filters by [`EventKind`].
//!
//! Publishing is best-effort: a bus without subscribers silently drops the
//! event, and a subscriber that falls more than `capacity` events behind
//! loses the oldest ones (the same drop-oldest policy the orchestrator
//! applies to its own buffers).

use soma_types::{Event, EventKind, EventPayload};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (number of buffered events before old ones are
/// dropped for slow subscribers).
pub const DEFAULT_CAPACITY: usize = 1024;

/// Cloneable handle to one instance-scoped broadcast channel.  All clones
/// share the same underlying channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    source: String,
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Create a bus whose events are stamped with `source`.
    pub fn new(source: impl Into<String>, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            source: source.into(),
            sender,
        }
    }

    /// Create a bus with [`DEFAULT_CAPACITY`].
    pub fn named(source: impl Into<String>) -> Self {
        Self::new(source, DEFAULT_CAPACITY)
    }

    /// The source label stamped on events built by [`emit`][Self::emit].
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Publish a fully built event.
    ///
    /// Returns the number of subscribers that were handed the event; `0` when
    /// nobody is listening, which is a normal condition.
    pub fn publish(&self, event: Event) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Wrap `payload` in an [`Event`] stamped with this bus's source and
    /// publish it.
    pub fn emit(&self, payload: EventPayload) -> usize {
        self.publish(Event::new(self.source.clone(), payload))
    }

    /// Subscribe to every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Subscribe to the events whose kind is listed in `kinds`.
    pub fn subscribe_kinds(&self, kinds: &[EventKind]) -> KindSubscriber {
        KindSubscriber {
            kinds: kinds.to_vec(),
            receiver: self.sender.subscribe(),
        }
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::named("soma")
    }
}

// ---------------------------------------------------------------------------
// Kind-filtered subscriber
// ---------------------------------------------------------------------------

/// A subscriber that only delivers events of the requested kinds.
pub struct KindSubscriber {
    kinds: Vec<EventKind>,
    receiver: broadcast::Receiver<Event>,
}

impl KindSubscriber {
    fn wants(&self, event: &Event) -> bool {
        self.kinds.contains(&event.kind())
    }

    /// Wait for the next matching event.
    ///
    /// Returns `None` once the bus has been dropped.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(kinds = ?self.kinds, lagged_by = n, "KindSubscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Return the next matching event that is already buffered, without
    /// waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.wants(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!(kinds = ?self.kinds, lagged_by = n, "KindSubscriber lagged");
                    continue;
                }
                Err(_) => return None,
            }
        }
    }

    /// Drain every matching event that is already buffered.
    pub fn drain(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}
