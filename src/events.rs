use std::sync::Arc;

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;

use crate::model::FeedItem;

/// Application-wide notifications crossing view boundaries.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    ReviewPosted(FeedItem),
    ReviewDeleted { review_id: String },
}

impl AppEvent {
    pub fn name(&self) -> &'static str {
        match self {
            AppEvent::ReviewPosted(_) => "review-posted",
            AppEvent::ReviewDeleted { .. } => "review-deleted",
        }
    }
}

/// Broadcast bus. Each subscriber owns a receiver; dropping it unsubscribes.
pub struct Bus<E> {
    subscribers: Arc<Mutex<Vec<Sender<E>>>>,
}

impl<E> Clone for Bus<E> {
    fn clone(&self) -> Self {
        Self {
            subscribers: self.subscribers.clone(),
        }
    }
}

impl<E> Default for Bus<E> {
    fn default() -> Self {
        Self {
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<E: Clone + Send + 'static> Bus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<E> {
        let (tx, rx) = unbounded();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Delivers `event` to every live subscriber and returns how many got it.
    pub fn publish(&self, event: E) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        subscribers.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publish_reaches_all_subscribers() {
        let bus = Bus::<AppEvent>::new();
        let first = bus.subscribe();
        let second = bus.subscribe();
        let event = AppEvent::ReviewDeleted {
            review_id: "r1".into(),
        };
        assert_eq!(bus.publish(event.clone()), 2);
        assert_eq!(first.try_recv().unwrap(), event);
        assert_eq!(second.try_recv().unwrap(), event);
    }

    #[test]
    fn dropped_receivers_are_pruned() {
        let bus = Bus::<AppEvent>::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());
        let delivered = bus.publish(AppEvent::ReviewPosted(FeedItem::default()));
        assert_eq!(delivered, 1);
        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap().name(), "review-posted");
    }
}
