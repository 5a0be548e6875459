// forge-ctl-bus/src/bus.rs
// ============================================================================
// Module: In-Process Room Bus
// Description: Room-keyed broadcast channels implementing EventPublisher.
// Purpose: Implement the Real-Time Bus component's delivery semantics.
// Dependencies: forge-ctl-core, tokio::sync::broadcast
// ============================================================================

//! ## Overview
//! One `tokio::sync::broadcast` channel per room. Publishing never blocks:
//! a room with no subscribers simply reports [`forge_ctl_core::BusError::NoSubscribers`]
//! rather than buffering for a connection that does not yet exist. Ordering
//! is preserved per room because `broadcast::Sender::send` serializes against
//! its own channel; there is no cross-room ordering guarantee.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use forge_ctl_core::BusError;
use forge_ctl_core::Event;
use forge_ctl_core::EventPublisher;
use forge_ctl_core::Room;
use tokio::sync::broadcast;

const DEFAULT_ROOM_CAPACITY: usize = 256;

/// A live subscription to one room. Dropping it unsubscribes; the bus does
/// not need to be told explicitly.
pub struct RoomSubscription {
    /// The subscribed room, retained for diagnostics.
    pub room: Room,
    receiver: broadcast::Receiver<Event>,
}

impl RoomSubscription {
    /// Awaits the next event published to this room. Returns `None` once the
    /// sender side has no remaining publishers reachable (the bus itself is
    /// dropped), which does not happen in normal operation.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(room = %self.room, skipped, "subscriber lagged, dropping buffered events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// In-process, room-keyed pub/sub bus.
pub struct InProcessBus {
    rooms: Mutex<HashMap<Room, broadcast::Sender<Event>>>,
    room_capacity: usize,
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new(DEFAULT_ROOM_CAPACITY)
    }
}

impl InProcessBus {
    /// Creates a bus whose per-room broadcast channels buffer up to
    /// `room_capacity` events for the slowest still-connected subscriber
    /// before it starts lagging.
    #[must_use]
    pub fn new(room_capacity: usize) -> Self {
        Self { rooms: Mutex::new(HashMap::new()), room_capacity }
    }

    /// Subscribes to `room`, creating its channel if this is the first
    /// subscriber.
    ///
    /// # Panics
    ///
    /// Panics if the internal room map's mutex is poisoned, which only
    /// happens if a prior publisher panicked while holding the lock.
    #[must_use]
    pub fn subscribe(&self, room: &Room) -> RoomSubscription {
        #[allow(clippy::unwrap_used, reason = "poisoned only on a prior panic inside this lock, which is itself a bug worth crashing on")]
        let mut rooms = self.rooms.lock().unwrap();
        let sender = rooms.entry(room.clone()).or_insert_with(|| broadcast::channel(self.room_capacity).0);
        RoomSubscription { room: room.clone(), receiver: sender.subscribe() }
    }

    /// Returns the number of currently subscribed connections for `room`.
    ///
    /// # Panics
    ///
    /// Panics if the internal room map's mutex is poisoned.
    #[must_use]
    pub fn subscriber_count(&self, room: &Room) -> usize {
        #[allow(clippy::unwrap_used, reason = "poisoned only on a prior panic inside this lock, which is itself a bug worth crashing on")]
        let rooms = self.rooms.lock().unwrap();
        rooms.get(room).map_or(0, broadcast::Sender::receiver_count)
    }
}

#[async_trait]
impl EventPublisher for InProcessBus {
    async fn publish(&self, room: Room, event: Event) -> Result<(), BusError> {
        #[allow(clippy::unwrap_used, reason = "poisoned only on a prior panic inside this lock, which is itself a bug worth crashing on")]
        let sender = {
            let mut rooms = self.rooms.lock().unwrap();
            rooms.entry(room.clone()).or_insert_with(|| broadcast::channel(self.room_capacity).0).clone()
        };
        sender.send(event).map(drop).map_err(|_send_error| BusError::NoSubscribers(room.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_ctl_core::Clock;
    use forge_ctl_core::EventId;
    use forge_ctl_core::EventSubject;
    use forge_ctl_core::EventType;
    use forge_ctl_core::SystemClock;
    use forge_ctl_core::TicketId;

    fn sample_event() -> Event {
        Event {
            id: EventId::new("evt-1"),
            subject: EventSubject::Ticket(TicketId::new("t1")),
            event_type: EventType::TicketActivity,
            payload: serde_json::json!({}),
            created_at: SystemClock.now(),
        }
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_reports_no_subscribers() {
        let bus = InProcessBus::default();
        let room = Room::Ticket(TicketId::new("t1"));
        let result = bus.publish(room, sample_event()).await;
        assert!(matches!(result, Err(BusError::NoSubscribers(_))));
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let bus = InProcessBus::default();
        let room = Room::Ticket(TicketId::new("t1"));
        let mut subscription = bus.subscribe(&room);
        bus.publish(room, sample_event()).await.expect("publish");
        let received = subscription.recv().await.expect("event");
        assert_eq!(received.id, EventId::new("evt-1"));
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let bus = InProcessBus::default();
        let room_a = Room::Ticket(TicketId::new("a"));
        let room_b = Room::Ticket(TicketId::new("b"));
        let mut sub_a = bus.subscribe(&room_a);
        let _sub_b = bus.subscribe(&room_b);
        bus.publish(room_a, sample_event()).await.expect("publish");
        let received = sub_a.recv().await.expect("event");
        assert_eq!(received.id, EventId::new("evt-1"));
        assert_eq!(bus.subscriber_count(&room_b), 1);
    }
}
