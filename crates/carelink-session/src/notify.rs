// SPDX-FileCopyrightText: 2026 Carelink Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-session push channel.
//!
//! Delivery is best-effort and lossy: `publish` never blocks, events with
//! no connected subscriber are dropped, and the session document stays the
//! source of truth. One subscriber per session id; a new subscription
//! replaces the previous sender, closing the old receiver.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::debug;

use carelink_core::types::SessionEvent;

/// Buffered events per subscriber before publishes start dropping.
const CHANNEL_CAPACITY: usize = 32;

/// Receiver half of a session subscription plus the channel identity that
/// registered it.
///
/// The identity is a weak sender: it does not hold the channel open, so a
/// replaced subscription still observes its receiver closing.
pub struct Subscription {
    pub events: mpsc::Receiver<SessionEvent>,
    handle: mpsc::WeakSender<SessionEvent>,
}

impl Subscription {
    /// Channel identity of this subscription, for targeted removal.
    pub fn handle(&self) -> &mpsc::WeakSender<SessionEvent> {
        &self.handle
    }
}

/// Registry of connected session-event subscribers.
#[derive(Debug, Default)]
pub struct NotificationHub {
    channels: DashMap<String, mpsc::Sender<SessionEvent>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscriber for `session_id`, replacing any existing one.
    pub fn subscribe(&self, session_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let handle = tx.downgrade();
        if self.channels.insert(session_id.to_string(), tx).is_some() {
            debug!(session_id, "replaced existing session subscriber");
        }
        Subscription { events: rx, handle }
    }

    /// Removes the subscriber for `session_id`, if any.
    pub fn unsubscribe(&self, session_id: &str) {
        self.channels.remove(session_id);
    }

    /// Removes the registration only while `handle` still owns it.
    ///
    /// A connection that was replaced must not deregister its successor on
    /// teardown, so removal is guarded by channel identity.
    pub fn unsubscribe_own(&self, session_id: &str, handle: &mpsc::WeakSender<SessionEvent>) {
        self.channels.remove_if(session_id, |_, tx| {
            handle.upgrade().is_some_and(|own| own.same_channel(tx))
        });
    }

    /// Pushes an event to the session's subscriber, if one is connected.
    ///
    /// Returns whether the event was handed to a live channel. A full or
    /// closed channel drops the event; closed channels are deregistered.
    pub fn publish(&self, session_id: &str, event: SessionEvent) -> bool {
        let Some(sender) = self.channels.get(session_id) else {
            return false;
        };
        match sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!(session_id, "subscriber channel full, event dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                drop(sender);
                self.channels.remove(session_id);
                false
            }
        }
    }

    /// Number of connected subscribers, for the health endpoint.
    pub fn subscriber_count(&self) -> usize {
        self.channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use carelink_core::types::{EventType, SessionStatus};

    fn event() -> SessionEvent {
        SessionEvent::now(EventType::Status, SessionStatus::Initiated, None)
    }

    #[tokio::test]
    async fn publish_without_subscriber_drops() {
        let hub = NotificationHub::new();
        assert!(!hub.publish("s1", event()));
    }

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let hub = NotificationHub::new();
        let mut sub = hub.subscribe("s1");
        assert!(hub.publish("s1", event()));
        let received = sub.events.recv().await.unwrap();
        assert_eq!(received.event_type, EventType::Status);
    }

    #[tokio::test]
    async fn resubscribe_replaces_previous_subscriber() {
        let hub = NotificationHub::new();
        let mut old = hub.subscribe("s1");
        let mut new = hub.subscribe("s1");
        assert_eq!(hub.subscriber_count(), 1);
        assert!(hub.publish("s1", event()));
        assert!(new.events.recv().await.is_some());
        // The replaced receiver observes its channel closing.
        assert!(old.events.recv().await.is_none());
    }

    #[tokio::test]
    async fn closed_subscriber_is_deregistered_on_publish() {
        let hub = NotificationHub::new();
        let sub = hub.subscribe("s1");
        drop(sub);
        assert!(!hub.publish("s1", event()));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn replaced_subscriber_cannot_deregister_its_successor() {
        let hub = NotificationHub::new();
        let old = hub.subscribe("s1");
        let mut new = hub.subscribe("s1");

        // A dying connection tears down with its own handle; the newer
        // registration must survive.
        hub.unsubscribe_own("s1", old.handle());
        assert_eq!(hub.subscriber_count(), 1);
        assert!(hub.publish("s1", event()));
        assert!(new.events.recv().await.is_some());

        // The live owner removes itself normally.
        hub.unsubscribe_own("s1", new.handle());
        assert_eq!(hub.subscriber_count(), 0);
    }
}
