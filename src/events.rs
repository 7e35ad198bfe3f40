//! Publish/subscribe fabric carrying node events to application listeners.
//!
//! Every subscription is driven by its own task draining its own queue, so a
//! listener observes events in publish order while a slow or failing
//! listener never holds up its siblings or the node's receive loop.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use crate::model::{
    PlayerUpdate,
    Ready,
    Stats,
    TrackEnd,
    TrackException,
    TrackStart,
    TrackStuck,
    WebSocketClosed,
};
use crate::{Error, Result};

pub type ListenerError = Box<dyn StdError + Send + Sync>;
pub type ListenerResult = std::result::Result<(), ListenerError>;

/// The closed set of event kinds listeners subscribe to.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
pub enum EventKind {
    Ready,
    PlayerUpdate,
    Stats,
    TrackStart,
    TrackEnd,
    TrackException,
    TrackStuck,
    WebSocketClosed,
    Unknown,
    Connected,
    Resumed,
    Disconnected,
    Reconnecting,
    ConnectionFailed,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    Ready(Ready),
    PlayerUpdate(PlayerUpdate),
    Stats(Stats),
    TrackStart(TrackStart),
    TrackEnd(TrackEnd),
    TrackException(TrackException),
    TrackStuck(TrackStuck),
    WebSocketClosed(WebSocketClosed),
    /// A node message this client does not understand.
    Unknown(Value),
    /// A new session was established.
    Connected { session_id: String },
    /// A previous session was resumed.
    Resumed { session_id: String },
    /// An established session was lost.
    Disconnected { reason: String },
    /// A reconnect attempt is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// The node gave up connecting and is now closed.
    ConnectionFailed { reason: String },
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Ready(_) => EventKind::Ready,
            Event::PlayerUpdate(_) => EventKind::PlayerUpdate,
            Event::Stats(_) => EventKind::Stats,
            Event::TrackStart(_) => EventKind::TrackStart,
            Event::TrackEnd(_) => EventKind::TrackEnd,
            Event::TrackException(_) => EventKind::TrackException,
            Event::TrackStuck(_) => EventKind::TrackStuck,
            Event::WebSocketClosed(_) => EventKind::WebSocketClosed,
            Event::Unknown(_) => EventKind::Unknown,
            Event::Connected { .. } => EventKind::Connected,
            Event::Resumed { .. } => EventKind::Resumed,
            Event::Disconnected { .. } => EventKind::Disconnected,
            Event::Reconnecting { .. } => EventKind::Reconnecting,
            Event::ConnectionFailed { .. } => EventKind::ConnectionFailed,
        }
    }
}

/// An asynchronous event callback.
pub trait Listener: Send + Sync + 'static {
    fn on_event(&self, event: Arc<Event>) -> BoxFuture<'static, ListenerResult>;
}

struct FnListener<F>(F);

impl<F, Fut> Listener for FnListener<F>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ListenerResult> + Send + 'static,
{
    fn on_event(&self, event: Arc<Event>) -> BoxFuture<'static, ListenerResult> {
        (self.0)(event).boxed()
    }
}

/// Wraps an async closure into a listener.
///
/// Keep the returned handle to unsubscribe later.
pub fn listener<F, Fut>(f: F) -> Arc<dyn Listener>
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ListenerResult> + Send + 'static,
{
    Arc::new(FnListener(f))
}

/// Something that can be subscribed to an event kind.
#[derive(Clone)]
pub enum Callback {
    Listener(Arc<dyn Listener>),
    /// Events are pushed into the channel; the receiver drives them.
    Channel(UnboundedSender<Arc<Event>>),
}

impl Callback {
    fn same(&self, other: &Callback) -> bool {
        match (self, other) {
            (Callback::Listener(a), Callback::Listener(b)) => {
                Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
            },
            (Callback::Channel(a), Callback::Channel(b)) => a.same_channel(b),
            _ => false,
        }
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Callback::Listener(listener) => {
                write!(f, "Listener({:p})", Arc::as_ptr(listener) as *const ())
            },
            Callback::Channel(_) => f.write_str("Channel"),
        }
    }
}

impl From<Arc<dyn Listener>> for Callback {
    fn from(listener: Arc<dyn Listener>) -> Self {
        Callback::Listener(listener)
    }
}

impl From<UnboundedSender<Arc<Event>>> for Callback {
    fn from(sender: UnboundedSender<Arc<Event>>) -> Self {
        Callback::Channel(sender)
    }
}

#[derive(Clone)]
struct Subscription {
    callback: Callback,
    queue: UnboundedSender<Arc<Event>>,
}

/// Per-kind listener lists.
///
/// Cloning yields another handle to the same lists.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    listeners: Arc<RwLock<HashMap<EventKind, Vec<Subscription>>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a listener to the kind's list.
    ///
    /// Subscribing the same callback twice delivers every event to it twice;
    /// deduplication is up to the caller.
    ///
    /// Fails with [`Error::NotSupported`] outside of a tokio runtime, or for a
    /// channel whose receiver is already gone.
    pub fn subscribe(&self, kind: EventKind, callback: impl Into<Callback>) -> Result<()> {
        let callback = callback.into();

        let queue = match callback {
            Callback::Listener(ref listener) => {
                let handle = Handle::try_current()
                    .map_err(|_| Error::NotSupported("listeners must be subscribed within a tokio runtime"))?;
                let (tx, rx) = mpsc::unbounded_channel();
                handle.spawn(drive(kind, Arc::clone(listener), rx));

                tx
            },
            Callback::Channel(ref sender) => {
                if sender.is_closed() {
                    return Err(Error::NotSupported("channel listener has no receiver"));
                }

                sender.clone()
            },
        };

        debug!("Subscribed {:?} to {:?} events", callback, kind);

        self.listeners
            .write()
            .entry(kind)
            .or_insert_with(Vec::new)
            .push(Subscription { callback, queue });

        Ok(())
    }

    /// Removes every subscription of the callback to the kind.
    ///
    /// Events already published to it are still delivered.
    pub fn unsubscribe(&self, kind: EventKind, callback: impl Into<Callback>) {
        let callback = callback.into();
        let mut listeners = self.listeners.write();

        if let Some(subscriptions) = listeners.get_mut(&kind) {
            subscriptions.retain(|subscription| !subscription.callback.same(&callback));

            if subscriptions.is_empty() {
                listeners.remove(&kind);
            }
        }
    }

    /// Queues the event for every current listener of its kind, in
    /// subscription order, without waiting for any of them.
    pub fn publish(&self, event: Event) {
        let kind = event.kind();
        let subscriptions = match self.listeners.read().get(&kind) {
            Some(subscriptions) => subscriptions.clone(),
            None => return,
        };

        trace!("Dispatching {:?} to {} listeners", kind, subscriptions.len());

        let event = Arc::new(event);

        for subscription in subscriptions {
            if subscription.queue.send(Arc::clone(&event)).is_err() {
                debug!("Dropped {:?} event for a closed listener", kind);
            }
        }
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.read().get(&kind).map_or(0, Vec::len)
    }
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("kinds", &self.listeners.read().len())
            .finish()
    }
}

async fn drive(kind: EventKind, listener: Arc<dyn Listener>, mut queue: UnboundedReceiver<Arc<Event>>) {
    while let Some(event) = queue.recv().await {
        let call = async { listener.on_event(event).await };

        match AssertUnwindSafe(call).catch_unwind().await {
            Ok(Ok(())) => {},
            Ok(Err(why)) => warn!("Listener for {:?} failed: {}", kind, why),
            Err(_) => warn!("Listener for {:?} panicked", kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::timeout;

    fn disconnected(reason: &str) -> Event {
        Event::Disconnected {
            reason: reason.to_owned(),
        }
    }

    fn reason(event: &Event) -> &str {
        match event {
            Event::Disconnected { reason } => reason,
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn failing_listener_does_not_block_siblings() {
        let events = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first = tx.clone();
        events
            .subscribe(
                EventKind::Disconnected,
                listener(move |event| {
                    let first = first.clone();
                    async move {
                        first.send(("first", event)).ok();
                        Ok(())
                    }
                }),
            )
            .unwrap();
        events
            .subscribe(
                EventKind::Disconnected,
                listener(|_| async { Err::<(), ListenerError>("boom".into()) }),
            )
            .unwrap();
        events
            .subscribe(
                EventKind::Disconnected,
                listener(|_| async {
                    let healthy = false;
                    assert!(healthy, "listener panic");
                    Ok(())
                }),
            )
            .unwrap();
        let third = tx.clone();
        events
            .subscribe(
                EventKind::Disconnected,
                listener(move |event| {
                    let third = third.clone();
                    async move {
                        third.send(("third", event)).ok();
                        Ok(())
                    }
                }),
            )
            .unwrap();

        events.publish(disconnected("a"));

        let mut seen = Vec::new();
        for _ in 0..2 {
            let (name, event) = timeout(Duration::from_secs(1), rx.recv()).await.unwrap().unwrap();
            assert_eq!(reason(&event), "a");
            seen.push(name);
        }
        seen.sort();
        assert_eq!(seen, ["first", "third"]);
    }

    #[tokio::test]
    async fn listeners_only_see_events_while_subscribed() {
        let events = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        events.publish(disconnected("before"));
        events.subscribe(EventKind::Disconnected, tx.clone()).unwrap();
        events.publish(disconnected("during"));
        events.unsubscribe(EventKind::Disconnected, tx.clone());
        events.publish(disconnected("after"));
        drop(tx);

        let event = rx.recv().await.unwrap();
        assert_eq!(reason(&event), "during");
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn duplicate_subscriptions_are_dispatched_independently() {
        let events = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let (done_tx, mut done_rx) = mpsc::unbounded_channel();

        let counter = Arc::clone(&count);
        let handle = listener(move |_| {
            let counter = Arc::clone(&counter);
            let done = done_tx.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                done.send(()).ok();
                Ok(())
            }
        });

        events.subscribe(EventKind::Stats, Arc::clone(&handle)).unwrap();
        events.subscribe(EventKind::Stats, Arc::clone(&handle)).unwrap();
        assert_eq!(events.listener_count(EventKind::Stats), 2);

        events.publish(Event::Unknown(Value::Null));
        events.publish(Event::Stats(serde_json::from_value(serde_json::json!({
            "players": 0,
            "playingPlayers": 0,
            "uptime": 0,
            "memory": {"free": 0, "used": 0, "allocated": 0, "reservable": 0},
            "cpu": {"cores": 1, "systemLoad": 0.0, "lavalinkLoad": 0.0},
        })).unwrap()));

        done_rx.recv().await.unwrap();
        done_rx.recv().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        events.unsubscribe(EventKind::Stats, handle);
        assert_eq!(events.listener_count(EventKind::Stats), 0);
    }

    #[tokio::test]
    async fn per_listener_order_follows_publish_order() {
        let events = EventDispatcher::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        events
            .subscribe(
                EventKind::Disconnected,
                listener(move |event| {
                    let tx = tx.clone();
                    async move {
                        tokio::task::yield_now().await;
                        tx.send(event).ok();
                        Ok(())
                    }
                }),
            )
            .unwrap();

        for i in 0..20 {
            events.publish(disconnected(&i.to_string()));
        }

        for i in 0..20 {
            let event = rx.recv().await.unwrap();
            assert_eq!(reason(&event), i.to_string());
        }
    }

    #[test]
    fn subscribing_outside_a_runtime_is_rejected() {
        let events = EventDispatcher::new();
        let noop = listener(|_| async { Ok::<(), ListenerError>(()) });
        let result = events.subscribe(EventKind::Ready, noop);

        assert!(matches!(result, Err(Error::NotSupported(_))));
    }

    #[tokio::test]
    async fn closed_channels_are_rejected() {
        let events = EventDispatcher::new();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        assert!(matches!(
            events.subscribe(EventKind::Ready, tx),
            Err(Error::NotSupported(_)),
        ));
    }
}
