//! Event subscriptions on a Space.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::{Entry, Template};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An entry was inserted.
    Write,
    /// An entry was removed by a caller (`take` or `cancel`).
    Take,
    /// An entry's lease ran out; no caller removed it.
    Expire,
    /// The subscription ended. Always the last event delivered.
    Close,
}

impl EventKind {
    /// `Take` and `Expire` both mean the entry is gone.
    pub fn is_removal(self) -> bool {
        matches!(self, EventKind::Take | EventKind::Expire)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpaceEvent {
    pub kind: EventKind,
    /// `None` only for `Close`.
    pub entry: Option<Entry>,
}

/// Store-side half of a subscription.
///
/// The sender sits behind its own lock so that `cancel` (from any task,
/// including the one consuming events) and delivery from inside the store
/// cannot interleave: once `Close` is sent the sender is gone.
#[derive(Debug)]
pub(crate) struct SubscriberSlot {
    kinds: Vec<EventKind>,
    template: Template,
    sender: Mutex<Option<mpsc::UnboundedSender<SpaceEvent>>>,
}

impl SubscriberSlot {
    /// Deliver if the event is of interest. Returns `false` once the
    /// subscription is closed so the store can drop the slot.
    pub(crate) fn deliver(&self, kind: EventKind, entry: &Entry) -> bool {
        let guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = guard.as_ref() else {
            return false;
        };
        if !self.kinds.contains(&kind) || !self.template.matches(entry) {
            return true;
        }
        sender
            .send(SpaceEvent {
                kind,
                entry: Some(entry.clone()),
            })
            .is_ok()
    }

    pub(crate) fn close(&self) {
        let mut guard = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = guard.take() {
            let _ = sender.send(SpaceEvent {
                kind: EventKind::Close,
                entry: None,
            });
        }
    }
}

/// Ordered stream of events for entries matching a template.
pub struct Subscription {
    slot: Arc<SubscriberSlot>,
    events: mpsc::UnboundedReceiver<SpaceEvent>,
}

impl Subscription {
    pub(crate) fn new(kinds: &[EventKind], template: Template) -> (Self, Arc<SubscriberSlot>) {
        let (sender, events) = mpsc::unbounded_channel();
        let slot = Arc::new(SubscriberSlot {
            kinds: kinds.to_vec(),
            template,
            sender: Mutex::new(Some(sender)),
        });
        let subscription = Self {
            slot: Arc::clone(&slot),
            events,
        };
        (subscription, slot)
    }

    /// Next event, or `None` after `Close` has been returned.
    pub async fn recv(&mut self) -> Option<SpaceEvent> {
        self.events.recv().await
    }

    /// Stop delivery. Events already queued are still returned, then
    /// `Close`, then `None`. Safe to call more than once.
    pub fn cancel(&self) {
        self.slot.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.slot.close();
    }
}
