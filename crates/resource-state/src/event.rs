use std::collections::VecDeque;
use std::sync::{Arc, Mutex, Weak};

use tokio::sync::Notify;
use tracing::trace;

use crate::error::{Error, Result};
use crate::metadata::{Kind, Pointer};
use crate::resource::{RawResource, Resource, ResourceSpec};
use crate::Context;

/// Default number of pending events a queue holds before coalescing.
const DEFAULT_CAPACITY: usize = 128;

/// Discriminant of an [`Event`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EventType {
    /// A resource appeared, or was part of the initial snapshot.
    Created,
    /// A resource changed.
    Updated,
    /// A resource was removed.
    Destroyed,
    /// The initial snapshot of a watch was fully delivered.
    Bootstrapped,
    /// The watch failed.
    Errored,
}

/// A change notification delivered to a watch.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// A resource appeared, or was part of the initial snapshot.
    Created(RawResource),
    /// A resource changed; carries the new state.
    Updated(RawResource),
    /// A resource was removed; carries the last state.
    Destroyed(RawResource),
    /// The initial snapshot for the kind was fully delivered.
    Bootstrapped(Kind),
    /// The watch failed.
    Errored(String),
}

impl Event {
    /// The event discriminant.
    pub fn event_type(&self) -> EventType {
        match self {
            Event::Created(_) => EventType::Created,
            Event::Updated(_) => EventType::Updated,
            Event::Destroyed(_) => EventType::Destroyed,
            Event::Bootstrapped(_) => EventType::Bootstrapped,
            Event::Errored(_) => EventType::Errored,
        }
    }

    /// The resource carried by the event, if any.
    pub fn resource(&self) -> Option<&RawResource> {
        match self {
            Event::Created(r) | Event::Updated(r) | Event::Destroyed(r) => Some(r),
            _ => None,
        }
    }

    /// The carried resource converted to spec type `S`.
    pub fn typed<S: ResourceSpec>(&self) -> Option<Result<Resource<S>>> {
        self.resource().map(|r| r.typed())
    }

    fn pointer(&self) -> Option<Pointer> {
        self.resource().map(|r| r.metadata.pointer())
    }
}

#[derive(Debug)]
pub(crate) struct QueueInner {
    events: Mutex<VecDeque<Event>>,
    notify: Notify,
    capacity: usize,
}

impl QueueInner {
    pub(crate) fn push(&self, event: Event) {
        {
            let mut events = match self.events.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if events.len() >= self.capacity && coalesce(&mut events, &event) {
                trace!(pending = events.len(), "coalesced event into pending state");
            } else {
                events.push_back(event);
            }
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Event> {
        match self.events.lock() {
            Ok(mut guard) => guard.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        }
    }

    fn len(&self) -> usize {
        match self.events.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

/// Folds a Created/Updated event into the last pending event for the same
/// resource. Destroyed events are never folded.
fn coalesce(events: &mut VecDeque<Event>, event: &Event) -> bool {
    let new_state = match event {
        Event::Created(r) | Event::Updated(r) => r,
        _ => return false,
    };
    let pointer = new_state.metadata.pointer();
    for pending in events.iter_mut().rev() {
        if pending.pointer().as_ref() != Some(&pointer) {
            continue;
        }
        return match pending {
            Event::Created(r) | Event::Updated(r) => {
                *r = new_state.clone();
                true
            }
            _ => false,
        };
    }
    false
}

/// Receiving end of a watch.
///
/// The queue never blocks the store: once more than `capacity` events are
/// pending, new states for a resource replace the state already pending for
/// it. Destroyed events are always kept.
#[derive(Clone, Debug)]
pub struct EventQueue {
    inner: Arc<QueueInner>,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    /// A queue with the default capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// A queue that starts coalescing after `capacity` pending events.
    pub fn with_capacity(capacity: usize) -> Self {
        EventQueue {
            inner: Arc::new(QueueInner {
                events: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Waits for the next event. Returns [`Error::Cancelled`] once `ctx` is
    /// cancelled.
    pub async fn recv(&self, ctx: &Context) -> Result<Event> {
        loop {
            if ctx.is_cancelled() {
                return Err(Error::Cancelled);
            }
            if let Some(event) = self.inner.pop() {
                return Ok(event);
            }
            tokio::select! {
                _ = ctx.cancelled() => return Err(Error::Cancelled),
                _ = self.inner.notify.notified() => {}
            }
        }
    }

    /// Takes the next event without waiting.
    pub fn try_recv(&self) -> Option<Event> {
        self.inner.pop()
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True if no events are pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn push(&self, event: Event) {
        self.inner.push(event)
    }

    pub(crate) fn downgrade(&self) -> Weak<QueueInner> {
        Arc::downgrade(&self.inner)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metadata::Metadata;

    fn raw(id: &str, value: u64) -> RawResource {
        RawResource {
            metadata: Metadata::new("ns", "Things.test", id),
            spec: serde_json::json!({ "value": value }),
        }
    }

    fn summary(event: Option<Event>) -> (EventType, String, u64) {
        let event = event.unwrap();
        let r = event.resource().unwrap();
        (
            event.event_type(),
            r.metadata.id().to_string(),
            r.spec["value"].as_u64().unwrap(),
        )
    }

    #[tokio::test]
    async fn delivers_in_order() {
        let ctx = Context::new();
        let queue = EventQueue::new();
        queue.push(Event::Created(raw("a", 1)));
        queue.push(Event::Updated(raw("a", 2)));
        let first = queue.recv(&ctx).await.unwrap();
        let second = queue.recv(&ctx).await.unwrap();
        assert_eq!((EventType::Created, "a".to_string(), 1), summary(Some(first)));
        assert_eq!((EventType::Updated, "a".to_string(), 2), summary(Some(second)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn cancelled_context_stops_recv() {
        let ctx = Context::new();
        let queue = EventQueue::new();
        ctx.cancel();
        assert!(queue.recv(&ctx).await.unwrap_err().is_cancelled());
    }

    #[tokio::test]
    async fn wakes_on_push_from_another_task() {
        let ctx = Context::new();
        let queue = EventQueue::new();
        let sender = queue.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            sender.push(Event::Errored("boom".into()));
        });
        assert_eq!(EventType::Errored, queue.recv(&ctx).await.unwrap().event_type());
    }

    #[test]
    fn full_queue_coalesces_updates_but_keeps_destroys() {
        let queue = EventQueue::with_capacity(2);
        queue.push(Event::Created(raw("a", 1)));
        queue.push(Event::Created(raw("b", 1)));
        queue.push(Event::Updated(raw("a", 2)));
        queue.push(Event::Updated(raw("a", 3)));
        assert_eq!(2, queue.len());

        queue.push(Event::Destroyed(raw("a", 3)));
        queue.push(Event::Updated(raw("a", 4)));
        assert_eq!(4, queue.len());

        let a = "a".to_string();
        assert_eq!((EventType::Created, a.clone(), 3), summary(queue.try_recv()));
        assert_eq!((EventType::Created, "b".to_string(), 1), summary(queue.try_recv()));
        assert_eq!((EventType::Destroyed, a.clone(), 3), summary(queue.try_recv()));
        assert_eq!((EventType::Updated, a, 4), summary(queue.try_recv()));
    }
}
