//! Routes decoded events to subscribers.
//!
//! Every event is delivered to up to three buckets, in order: its exact tag,
//! the `*` bucket, then `server.*` or `client.*` depending on the tag's origin.
//! Within a bucket persistent subscribers run first in registration order, then
//! the bucket's one-shot subscribers are taken out and run. Subscriber errors
//! and panics are logged and never stop delivery to the rest.

use super::handlers::{BoxFuture, EventHandler, OnceHandler};
use crate::Result;
use crate::protocol::codec::Event;
use crate::protocol::event_type::EventType;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::oneshot;

/// Opaque token returned at subscribe time; the only way to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Shared id allocator so handles can hand out ids before the event loop
/// registers the subscriber.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionIds(Arc<AtomicU64>);

impl SubscriptionIds {
    #[must_use]
    pub fn next_id(&self) -> SubscriptionId {
        SubscriptionId(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}

pub enum Subscriber {
    Persistent(EventHandler),
    Once(OnceHandler),
    /// Resolver half of a `wait_for_next` rendezvous.
    Waiter(oneshot::Sender<Event>),
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Self::Persistent(_) => "Persistent",
            Self::Once(_) => "Once",
            Self::Waiter(_) => "Waiter",
        };
        f.write_str(kind)
    }
}

enum OneShot {
    Handler(OnceHandler),
    Waiter(oneshot::Sender<Event>),
}

#[derive(Default)]
pub struct Dispatcher {
    ids: SubscriptionIds,
    persistent: HashMap<EventType, Vec<(SubscriptionId, EventHandler)>>,
    one_shot: HashMap<EventType, Vec<(SubscriptionId, OneShot)>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("subscriptions", &self.len())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses an allocator shared with session handles.
    #[must_use]
    pub fn with_ids(ids: SubscriptionIds) -> Self {
        Self {
            ids,
            ..Self::default()
        }
    }

    pub fn insert(&mut self, id: SubscriptionId, tag: EventType, subscriber: Subscriber) {
        match subscriber {
            Subscriber::Persistent(handler) => {
                self.persistent.entry(tag).or_default().push((id, handler));
            }
            Subscriber::Once(handler) => {
                self.one_shot
                    .entry(tag)
                    .or_default()
                    .push((id, OneShot::Handler(handler)));
            }
            Subscriber::Waiter(resolver) => {
                self.one_shot
                    .entry(tag)
                    .or_default()
                    .push((id, OneShot::Waiter(resolver)));
            }
        }
    }

    pub fn on(&mut self, tag: EventType, handler: EventHandler) -> SubscriptionId {
        let id = self.ids.next_id();
        self.insert(id, tag, Subscriber::Persistent(handler));
        id
    }

    pub fn on_next(&mut self, tag: EventType, handler: OnceHandler) -> SubscriptionId {
        let id = self.ids.next_id();
        self.insert(id, tag, Subscriber::Once(handler));
        id
    }

    /// Registers a rendezvous; the receiver yields the next matching event, or
    /// an error once the entry is removed without firing.
    pub fn wait(&mut self, tag: EventType) -> (SubscriptionId, oneshot::Receiver<Event>) {
        let (tx, rx) = oneshot::channel();
        let id = self.ids.next_id();
        self.insert(id, tag, Subscriber::Waiter(tx));
        (id, rx)
    }

    /// Removes a subscription of any kind. Returns whether it was present.
    pub fn off(&mut self, id: SubscriptionId) -> bool {
        fn remove_from<V>(table: &mut HashMap<EventType, Vec<(SubscriptionId, V)>>, id: SubscriptionId) -> bool {
            let mut found = false;
            table.retain(|_, entries| {
                let before = entries.len();
                entries.retain(|(entry_id, _)| *entry_id != id);
                found |= entries.len() != before;
                !entries.is_empty()
            });
            found
        }
        remove_from(&mut self.persistent, id) || remove_from(&mut self.one_shot, id)
    }

    /// Drops every subscription. Pending waits observe a closed channel.
    pub fn clear(&mut self) {
        self.persistent.clear();
        self.one_shot.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.persistent.values().map(Vec::len).sum::<usize>()
            + self.one_shot.values().map(Vec::len).sum::<usize>()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn dispatch(&mut self, event: &Event) {
        let tag = event.event_type();
        let mut buckets = vec![tag.clone()];
        if !tag.is_wildcard() {
            buckets.push(EventType::All);
            if let Some(origin) = tag.origin() {
                buckets.push(origin.wildcard());
            }
        }
        for bucket in &buckets {
            self.deliver(bucket, event).await;
        }
    }

    async fn deliver(&mut self, bucket: &EventType, event: &Event) {
        let persistent: Vec<(SubscriptionId, EventHandler)> = self
            .persistent
            .get(bucket)
            .map(|entries| {
                entries
                    .iter()
                    .map(|(id, handler)| (*id, Arc::clone(handler)))
                    .collect()
            })
            .unwrap_or_default();
        for (id, handler) in persistent {
            let event = event.clone();
            run_guarded(bucket, id, move || handler(event)).await;
        }

        let Some(one_shot) = self.one_shot.remove(bucket) else {
            return;
        };
        for (id, entry) in one_shot {
            match entry {
                OneShot::Handler(handler) => {
                    let event = event.clone();
                    run_guarded(bucket, id, move || handler(event)).await;
                }
                OneShot::Waiter(resolver) => {
                    if resolver.send(event.clone()).is_err() {
                        tracing::trace!(%bucket, ?id, "waiter dropped before delivery");
                    }
                }
            }
        }
    }
}

async fn run_guarded<F>(bucket: &EventType, id: SubscriptionId, start: F)
where
    F: FnOnce() -> BoxFuture<Result<()>>,
{
    let future = match std::panic::catch_unwind(AssertUnwindSafe(start)) {
        Ok(future) => future,
        Err(_) => {
            tracing::warn!(%bucket, ?id, "event subscriber panicked");
            return;
        }
    };
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(%bucket, ?id, error = %err, "event subscriber failed"),
        Err(_) => tracing::warn!(%bucket, ?id, "event subscriber panicked"),
    }
}
