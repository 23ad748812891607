// SPDX-License-Identifier: GPL-3.0-only

//! Typed fan-out of registry events to subscribed consumers.

use futures::stream::Stream;
use futures::task::{Context, Poll};
use tokio::sync::mpsc;

/// Broadcasts every emitted value to all live subscribers.
///
/// Emission never blocks, so it can be called from the notification handler.
pub struct EventBus<E> {
    subscribers: Vec<mpsc::UnboundedSender<E>>,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }
}

impl<E: Clone> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> EventStream<E> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.subscribers.push(sender);
        EventStream { receiver }
    }

    pub fn emit(&mut self, event: E) {
        // Dropped receivers are pruned here.
        self.subscribers
            .retain(|subscriber| subscriber.send(event.clone()).is_ok());
    }

    #[cfg(test)]
    fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }
}

/// Receiving half of an [`EventBus`] subscription.
pub struct EventStream<E> {
    receiver: mpsc::UnboundedReceiver<E>,
}

impl<E> EventStream<E> {
    pub async fn recv(&mut self) -> Option<E> {
        self.receiver.recv().await
    }

    /// Next event if one is already queued.
    pub fn try_recv(&mut self) -> Option<E> {
        self.receiver.try_recv().ok()
    }

    /// Drain everything queued so far.
    pub fn drain(&mut self) -> Vec<E> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

impl<E> Stream for EventStream<E> {
    type Item = E;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_sees_every_event() {
        let mut bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.emit(1u32);
        bus.emit(2u32);

        assert_eq!(first.drain(), vec![1, 2]);
        assert_eq!(second.drain(), vec![1, 2]);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut bus = EventBus::new();
        let mut kept = bus.subscribe();
        drop(bus.subscribe());

        bus.emit("added");

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv(), Some("added"));
        assert_eq!(kept.try_recv(), None);
    }
}
